//! Geospatial commands (spec.md §4.2): members are stored as an ordinary
//! sorted set keyed by the 52-bit interleaved geohash score.

use super::helpers::Ctx;
use crate::client::Client;
use crate::db::now_ms;
use crate::error::CommandError;
use crate::eviction::ensure_capacity;
use crate::geo;
use crate::protocol::Reply;
use crate::value::{Entry, Value, ZSet};
use bytes::Bytes;

fn with_geo_zset<T>(ctx: &Ctx, client: &Client, key: &Bytes, create_if_missing: bool, f: impl FnOnce(&mut ZSet) -> T) -> Result<Option<T>, CommandError> {
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return Err(CommandError::Generic("DB index is out of range".into()));
    };
    let now = now_ms();
    let cfg = ctx.config.read().unwrap();
    let (maxmemory, policy, samples) = (cfg.maxmemory, cfg.eviction, cfg.maxmemory_samples);
    drop(cfg);
    db.write(|inner| {
        inner.expire_if_due(key, now);
        let before = inner.map.get(key).map(|e| e.value.approx_size()).unwrap_or(0);
        if !inner.map.contains_key(key) {
            if !create_if_missing {
                return Ok(None);
            }
            ensure_capacity(inner, maxmemory, 32, policy, samples)?;
            inner.set(key.clone(), Entry::new(Value::ZSet(ZSet::default()), now));
        }
        let entry = inner.map.get_mut(key).unwrap();
        let zset = match &mut entry.value {
            Value::ZSet(z) => z,
            _ => return Err(CommandError::WrongType),
        };
        let result = f(zset);
        let empty = zset.is_empty();
        inner.adjust_for_mutation(key, before);
        if empty {
            inner.remove(key);
        }
        Ok(Some(result))
    })
}

pub fn geoadd(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    if (args.len() - 2) % 3 != 0 {
        return CommandError::Syntax.into();
    }
    let mut triples = Vec::new();
    for chunk in args[2..].chunks(3) {
        let lon: f64 = match std::str::from_utf8(&chunk[0]).ok().and_then(|s| s.parse().ok()) {
            Some(v) => v,
            None => return CommandError::NotAFloat.into(),
        };
        let lat: f64 = match std::str::from_utf8(&chunk[1]).ok().and_then(|s| s.parse().ok()) {
            Some(v) => v,
            None => return CommandError::NotAFloat.into(),
        };
        triples.push((lon, lat, chunk[2].clone()));
    }
    let result = with_geo_zset(ctx, client, &args[1], true, |zset| {
        triples
            .into_iter()
            .filter(|(lon, lat, member)| {
                let score = geo::encode(*lon, *lat) as f64;
                zset.insert(member.clone(), score)
            })
            .count()
    });
    match result {
        Ok(Some(n)) => {
            ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            Reply::Integer(n as i64)
        }
        Ok(None) => unreachable!(),
        Err(e) => e.into(),
    }
}

pub fn geopos(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let result = with_geo_zset(ctx, client, &args[1], false, |zset| {
        args[2..]
            .iter()
            .map(|m| zset.scores.get(m).copied())
            .collect::<Vec<_>>()
    });
    match result {
        Ok(Some(scores)) => Reply::array(
            scores
                .into_iter()
                .map(|s| match s {
                    Some(bits) => {
                        let (lon, lat) = geo::decode(bits as u64);
                        Reply::array(vec![Reply::bulk(format!("{lon:.17}")), Reply::bulk(format!("{lat:.17}"))])
                    }
                    None => Reply::nil_array(),
                })
                .collect(),
        ),
        Ok(None) => Reply::array(args[2..].iter().map(|_| Reply::nil_array()).collect()),
        Err(e) => e.into(),
    }
}

pub fn geodist(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let unit = args.get(4).map(|u| String::from_utf8_lossy(u).to_string()).unwrap_or_else(|| "m".into());
    let result = with_geo_zset(ctx, client, &args[1], false, |zset| {
        (zset.scores.get(&args[2]).copied(), zset.scores.get(&args[3]).copied())
    });
    match result {
        Ok(Some((Some(a), Some(b)))) => {
            let (lon1, lat1) = geo::decode(a as u64);
            let (lon2, lat2) = geo::decode(b as u64);
            let meters = geo::haversine_m(lon1, lat1, lon2, lat2);
            Reply::bulk(format!("{:.4}", geo::convert_from_meters(meters, &unit)))
        }
        Ok(_) => Reply::nil(),
        Err(e) => e.into(),
    }
}

/// `GEOSEARCH key FROMMEMBER m | FROMLONLAT lon lat BYRADIUS r unit [ASC|DESC]`.
/// Covers the radius-search form only; the box-search (`BYBOX`) variant is
/// left out as a rarely-used generic-CRUD-derivable extension.
pub fn geosearch(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let mut i = 2;
    let center = match args.get(i).map(|a| a.to_ascii_uppercase()) {
        Some(ref a) if a == b"FROMMEMBER" => {
            let member = match args.get(i + 1) {
                Some(m) => m.clone(),
                None => return CommandError::Syntax.into(),
            };
            i += 2;
            let result = with_geo_zset(ctx, client, &args[1], false, |z| z.scores.get(&member).copied());
            match result {
                Ok(Some(Some(bits))) => geo::decode(bits as u64),
                Ok(_) => return Reply::array(vec![]),
                Err(e) => return e.into(),
            }
        }
        Some(ref a) if a == b"FROMLONLAT" => {
            let lon: f64 = match args.get(i + 1).and_then(|a| std::str::from_utf8(a).ok()).and_then(|s| s.parse().ok()) {
                Some(v) => v,
                None => return CommandError::NotAFloat.into(),
            };
            let lat: f64 = match args.get(i + 2).and_then(|a| std::str::from_utf8(a).ok()).and_then(|s| s.parse().ok()) {
                Some(v) => v,
                None => return CommandError::NotAFloat.into(),
            };
            i += 3;
            (lon, lat)
        }
        _ => return CommandError::Syntax.into(),
    };
    if args.get(i).map(|a| a.eq_ignore_ascii_case(b"BYRADIUS")).unwrap_or(false) {
        i += 1;
    } else {
        return CommandError::Syntax.into();
    }
    let radius: f64 = match args.get(i).and_then(|a| std::str::from_utf8(a).ok()).and_then(|s| s.parse().ok()) {
        Some(v) => v,
        None => return CommandError::NotAFloat.into(),
    };
    let unit = args.get(i + 1).map(|u| String::from_utf8_lossy(u).to_string()).unwrap_or_else(|| "m".into());
    i += 2;
    let desc = args.get(i).map(|a| a.eq_ignore_ascii_case(b"DESC")).unwrap_or(false);

    let radius_m = geo::convert_to_meters(radius, &unit);
    let (clon, clat) = center;
    let result = with_geo_zset(ctx, client, &args[1], false, |z| {
        let mut hits: Vec<(Bytes, f64)> = z
            .iter_ascending()
            .filter_map(|(m, score)| {
                let (lon, lat) = geo::decode(score as u64);
                let d = geo::haversine_m(clon, clat, lon, lat);
                (d <= radius_m).then(|| (m.clone(), d))
            })
            .collect();
        hits.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        if desc {
            hits.reverse();
        }
        hits
    });
    match result {
        Ok(Some(hits)) => Reply::array(hits.into_iter().map(|(m, _)| Reply::bulk(m)).collect()),
        Ok(None) => Reply::array(vec![]),
        Err(e) => e.into(),
    }
}

pub fn geohash(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let result = with_geo_zset(ctx, client, &args[1], false, |zset| {
        args[2..].iter().map(|m| zset.scores.get(m).copied()).collect::<Vec<_>>()
    });
    match result {
        Ok(Some(scores)) => Reply::array(
            scores
                .into_iter()
                .map(|s| match s {
                    Some(bits) => Reply::bulk(geo::to_base32(bits as u64)),
                    None => Reply::nil(),
                })
                .collect(),
        ),
        Ok(None) => Reply::array(args[2..].iter().map(|_| Reply::nil()).collect()),
        Err(e) => e.into(),
    }
}
