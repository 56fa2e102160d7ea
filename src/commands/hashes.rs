//! Hash commands (spec.md §4.2), including per-field expiry (`HEXPIRE`
//! family), which stores a `HashField` carrying its own optional `expire_at`.

use super::helpers::{parse_f64, parse_i64, Ctx};
use crate::client::Client;
use crate::db::now_ms;
use crate::error::CommandError;
use crate::eviction::ensure_capacity;
use crate::protocol::Reply;
use crate::value::{Entry, HashField, Value};
use bytes::Bytes;
use std::collections::HashMap;

fn with_hash_mut<T>(
    ctx: &Ctx,
    client: &Client,
    key: &Bytes,
    create_if_missing: bool,
    f: impl FnOnce(&mut HashMap<Bytes, HashField>, i64) -> T,
) -> Result<Option<T>, CommandError> {
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
            inner.set(key.clone(), Entry::new(Value::Hash(HashMap::new()), now));
        }
        let entry = inner.map.get_mut(key).unwrap();
        let hash = match &mut entry.value {
            Value::Hash(h) => h,
            _ => return Err(CommandError::WrongType),
        };
        hash.retain(|_, v| !v.is_expired(now));
        let result = f(hash, now);
        let empty = hash.is_empty();
        inner.adjust_for_mutation(key, before);
        if empty {
            inner.remove(key);
        }
        Ok(Some(result))
    })
}

pub fn hset(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    if (args.len() - 2) % 2 != 0 {
        return CommandError::Syntax.into();
    }
    let fields: Vec<(Bytes, Bytes)> = args[2..].chunks(2).map(|c| (c[0].clone(), c[1].clone())).collect();
    let result = with_hash_mut(ctx, client, &args[1], true, |hash, _now| {
        let mut added = 0i64;
        for (field, value) in fields {
            if hash.insert(field, HashField::new(value)).is_none() {
                added += 1;
            }
        }
        added
    });
    match result {
        Ok(Some(n)) => {
            ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            Reply::Integer(n)
        }
        Ok(None) => unreachable!(),
        Err(e) => e.into(),
    }
}

pub fn hsetnx(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let result = with_hash_mut(ctx, client, &args[1], true, |hash, _now| {
        if hash.contains_key(&args[2]) {
            false
        } else {
            hash.insert(args[2].clone(), HashField::new(args[3].clone()));
            true
        }
    });
    match result {
        Ok(Some(set)) => {
            if set {
                ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            }
            Reply::Integer(set as i64)
        }
        Ok(None) => unreachable!(),
        Err(e) => e.into(),
    }
}

pub fn hget(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let result = with_hash_mut(ctx, client, &args[1], false, |hash, _now| {
        hash.get(&args[2]).map(|f| f.data.clone())
    });
    match result {
        Ok(Some(Some(v))) => Reply::bulk(v),
        Ok(_) => Reply::nil(),
        Err(e) => e.into(),
    }
}

pub fn hmget(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let result = with_hash_mut(ctx, client, &args[1], false, |hash, _now| {
        args[2..]
            .iter()
            .map(|f| hash.get(f).map(|v| v.data.clone()))
            .collect::<Vec<_>>()
    });
    match result {
        Ok(Some(values)) => Reply::array(
            values
                .into_iter()
                .map(|v| v.map(Reply::bulk).unwrap_or_else(Reply::nil))
                .collect(),
        ),
        Ok(None) => Reply::array(args[2..].iter().map(|_| Reply::nil()).collect()),
        Err(e) => e.into(),
    }
}

pub fn hdel(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let result = with_hash_mut(ctx, client, &args[1], false, |hash, _now| {
        args[2..].iter().filter(|f| hash.remove(*f).is_some()).count()
    });
    match result {
        Ok(Some(n)) => {
            if n > 0 {
                ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            }
            Reply::Integer(n as i64)
        }
        Ok(None) => Reply::Integer(0),
        Err(e) => e.into(),
    }
}

pub fn hexists(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let result = with_hash_mut(ctx, client, &args[1], false, |hash, _now| hash.contains_key(&args[2]));
    match result {
        Ok(Some(b)) => Reply::Integer(b as i64),
        Ok(None) => Reply::Integer(0),
        Err(e) => e.into(),
    }
}

pub fn hlen(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let result = with_hash_mut(ctx, client, &args[1], false, |hash, _now| hash.len());
    match result {
        Ok(Some(n)) => Reply::Integer(n as i64),
        Ok(None) => Reply::Integer(0),
        Err(e) => e.into(),
    }
}

pub fn hkeys(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let result = with_hash_mut(ctx, client, &args[1], false, |hash, _now| {
        hash.keys().cloned().collect::<Vec<_>>()
    });
    match result {
        Ok(Some(keys)) => Reply::array(keys.into_iter().map(Reply::bulk).collect()),
        Ok(None) => Reply::array(vec![]),
        Err(e) => e.into(),
    }
}

pub fn hvals(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let result = with_hash_mut(ctx, client, &args[1], false, |hash, _now| {
        hash.values().map(|v| v.data.clone()).collect::<Vec<_>>()
    });
    match result {
        Ok(Some(vals)) => Reply::array(vals.into_iter().map(Reply::bulk).collect()),
        Ok(None) => Reply::array(vec![]),
        Err(e) => e.into(),
    }
}

pub fn hgetall(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let result = with_hash_mut(ctx, client, &args[1], false, |hash, _now| {
        hash.iter().map(|(k, v)| (k.clone(), v.data.clone())).collect::<Vec<_>>()
    });
    match result {
        Ok(Some(pairs)) => Reply::array(
            pairs
                .into_iter()
                .flat_map(|(k, v)| [Reply::bulk(k), Reply::bulk(v)])
                .collect(),
        ),
        Ok(None) => Reply::array(vec![]),
        Err(e) => e.into(),
    }
}

pub fn hincrby(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let delta = match parse_i64(&args[3]) {
        Ok(n) => n,
        Err(e) => return e.into(),
    };
    let result = with_hash_mut(ctx, client, &args[1], true, |hash, _now| {
        let current: i64 = match hash.get(&args[2]) {
            None => 0,
            Some(f) => std::str::from_utf8(&f.data)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or(CommandError::NotAnInteger)?,
        };
        let next = current.checked_add(delta).ok_or(CommandError::Generic("increment or decrement would overflow".into()))?;
        hash.insert(args[2].clone(), HashField::new(Bytes::from(next.to_string())));
        Ok::<i64, CommandError>(next)
    });
    match result {
        Ok(Some(Ok(n))) => {
            ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            Reply::Integer(n)
        }
        Ok(Some(Err(e))) => e.into(),
        Ok(None) => unreachable!(),
        Err(e) => e.into(),
    }
}

pub fn hincrbyfloat(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let delta = match parse_f64(&args[3]) {
        Ok(n) => n,
        Err(e) => return e.into(),
    };
    let result = with_hash_mut(ctx, client, &args[1], true, |hash, _now| {
        let current: f64 = match hash.get(&args[2]) {
            None => 0.0,
            Some(f) => std::str::from_utf8(&f.data)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or(CommandError::NotAFloat)?,
        };
        let next = current + delta;
        let rendered = format!("{next}");
        hash.insert(args[2].clone(), HashField::new(Bytes::from(rendered.clone())));
        Ok::<String, CommandError>(rendered)
    });
    match result {
        Ok(Some(Ok(s))) => {
            ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            Reply::bulk(s)
        }
        Ok(Some(Err(e))) => e.into(),
        Ok(None) => unreachable!(),
        Err(e) => e.into(),
    }
}

pub fn hexpire(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let secs = match parse_i64(&args[2]) {
        Ok(n) => n,
        Err(e) => return e.into(),
    };
    let result = with_hash_mut(ctx, client, &args[1], false, |hash, now| {
        match hash.get_mut(&args[3]) {
            Some(f) => {
                f.expire_at = Some(now + secs * 1000);
                1
            }
            None => 0,
        }
    });
    match result {
        Ok(Some(1)) => {
            ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            Reply::Integer(1)
        }
        Ok(_) => Reply::Integer(0),
        Err(e) => e.into(),
    }
}

pub fn httl(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let result = with_hash_mut(ctx, client, &args[1], false, |hash, now| {
        hash.get(&args[2]).map(|f| match f.expire_at {
            Some(at) => (at - now).max(0) / 1000,
            None => -1,
        })
    });
    match result {
        Ok(Some(Some(ttl))) => Reply::Integer(ttl),
        Ok(_) => Reply::Integer(-2),
        Err(e) => e.into(),
    }
}

pub fn hpersist(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let result = with_hash_mut(ctx, client, &args[1], false, |hash, _now| match hash.get_mut(&args[2]) {
        Some(f) if f.expire_at.is_some() => {
            f.expire_at = None;
            1
        }
        Some(_) => 0,
        None => -1,
    });
    match result {
        Ok(Some(1)) => {
            ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            Reply::Integer(1)
        }
        Ok(Some(n)) => Reply::Integer(n),
        Ok(None) => Reply::Integer(-1),
        Err(e) => e.into(),
    }
}
