//! Sorted-set commands (spec.md §4.2), backed by `value::ZSet`'s
//! score-ordered `BTreeSet` index.

use super::helpers::{normalize_index, parse_f64, parse_i64, Ctx};
use crate::client::Client;
use crate::db::now_ms;
use crate::error::CommandError;
use crate::eviction::ensure_capacity;
use crate::protocol::Reply;
use crate::value::{Entry, Value, ZSet};
use bytes::Bytes;

fn with_zset_mut<T>(
    ctx: &Ctx,
    client: &Client,
    key: &Bytes,
    create_if_missing: bool,
    f: impl FnOnce(&mut ZSet) -> T,
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

/// Parses a `ZRANGEBYSCORE`-style bound: `-inf`, `+inf`, `(value` (exclusive)
/// or a plain number (inclusive). Returns `(value, inclusive)`.
fn parse_bound(b: &[u8]) -> Result<(f64, bool), CommandError> {
    let s = std::str::from_utf8(b).map_err(|_| CommandError::NotAFloat)?;
    if s.eq_ignore_ascii_case("-inf") {
        return Ok((f64::NEG_INFINITY, true));
    }
    if s.eq_ignore_ascii_case("+inf") || s.eq_ignore_ascii_case("inf") {
        return Ok((f64::INFINITY, true));
    }
    if let Some(rest) = s.strip_prefix('(') {
        let v: f64 = rest.parse().map_err(|_| CommandError::NotAFloat)?;
        Ok((v, false))
    } else {
        let v: f64 = s.parse().map_err(|_| CommandError::NotAFloat)?;
        Ok((v, true))
    }
}

pub fn zadd(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    if (args.len() - 2) % 2 != 0 {
        return CommandError::Syntax.into();
    }
    let pairs: Result<Vec<(f64, Bytes)>, CommandError> = args[2..]
        .chunks(2)
        .map(|c| parse_f64(&c[0]).map(|score| (score, c[1].clone())))
        .collect();
    let pairs = match pairs {
        Ok(p) => p,
        Err(e) => return e.into(),
    };
    let result = with_zset_mut(ctx, client, &args[1], true, |zset| {
        pairs.into_iter().filter(|(score, member)| zset.insert(member.clone(), *score)).count()
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

pub fn zrem(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let result = with_zset_mut(ctx, client, &args[1], false, |zset| {
        args[2..].iter().filter(|m| zset.remove(m)).count()
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

pub fn zscore(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    match with_zset_mut(ctx, client, &args[1], false, |z| z.scores.get(&args[2]).copied()) {
        Ok(Some(Some(score))) => Reply::bulk(format!("{score}")),
        Ok(_) => Reply::nil(),
        Err(e) => e.into(),
    }
}

pub fn zcard(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    match with_zset_mut(ctx, client, &args[1], false, |z| z.len()) {
        Ok(Some(n)) => Reply::Integer(n as i64),
        Ok(None) => Reply::Integer(0),
        Err(e) => e.into(),
    }
}

pub fn zincrby(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let delta = match parse_f64(&args[2]) {
        Ok(n) => n,
        Err(e) => return e.into(),
    };
    let result = with_zset_mut(ctx, client, &args[1], true, |zset| {
        let current = zset.scores.get(&args[3]).copied().unwrap_or(0.0);
        let next = current + delta;
        zset.insert(args[3].clone(), next);
        next
    });
    match result {
        Ok(Some(next)) => {
            ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            Reply::bulk(format!("{next}"))
        }
        Ok(None) => unreachable!(),
        Err(e) => e.into(),
    }
}

fn rank(ctx: &Ctx, client: &Client, args: &[Bytes], reverse: bool) -> Reply {
    let result = with_zset_mut(ctx, client, &args[1], false, |z| {
        z.rank_ascending(&args[2]).map(|r| if reverse { z.len() - 1 - r } else { r })
    });
    match result {
        Ok(Some(Some(r))) => Reply::Integer(r as i64),
        Ok(_) => Reply::nil(),
        Err(e) => e.into(),
    }
}

pub fn zrank(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    rank(ctx, client, args, false)
}

pub fn zrevrank(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    rank(ctx, client, args, true)
}

fn range_by_index(ctx: &Ctx, client: &Client, args: &[Bytes], reverse: bool) -> Reply {
    let (start, end) = match (parse_i64(&args[2]), parse_i64(&args[3])) {
        (Ok(s), Ok(e)) => (s, e),
        _ => return CommandError::NotAnInteger.into(),
    };
    let with_scores = args.get(4).map(|a| a.eq_ignore_ascii_case(b"WITHSCORES")).unwrap_or(false);
    let result = with_zset_mut(ctx, client, &args[1], false, |z| {
        let len = z.len();
        let s = normalize_index(start, len).min(len as i64) as usize;
        let e = normalize_index(end, len).min(len as i64 - 1);
        if e < 0 || s as i64 > e || s >= len {
            Vec::new()
        } else {
            let items: Vec<(Bytes, f64)> = z.iter_ascending().map(|(m, s)| (m.clone(), s)).collect();
            let slice = &items[s..=(e as usize)];
            if reverse {
                slice.iter().rev().cloned().collect()
            } else {
                slice.to_vec()
            }
        }
    });
    match result {
        Ok(Some(items)) => render_members(items, with_scores),
        Ok(None) => Reply::array(vec![]),
        Err(e) => e.into(),
    }
}

pub fn zrange(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    range_by_index(ctx, client, args, false)
}

pub fn zrevrange(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    range_by_index(ctx, client, args, true)
}

fn render_members(items: Vec<(Bytes, f64)>, with_scores: bool) -> Reply {
    if with_scores {
        Reply::array(
            items
                .into_iter()
                .flat_map(|(m, s)| [Reply::bulk(m), Reply::bulk(format!("{s}"))])
                .collect(),
        )
    } else {
        Reply::array(items.into_iter().map(|(m, _)| Reply::bulk(m)).collect())
    }
}

pub fn zrangebyscore(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let (min, min_incl) = match parse_bound(&args[2]) {
        Ok(b) => b,
        Err(e) => return e.into(),
    };
    let (max, max_incl) = match parse_bound(&args[3]) {
        Ok(b) => b,
        Err(e) => return e.into(),
    };
    let with_scores = args.get(4).map(|a| a.eq_ignore_ascii_case(b"WITHSCORES")).unwrap_or(false);
    let result = with_zset_mut(ctx, client, &args[1], false, |z| {
        z.iter_ascending()
            .filter(|(_, s)| {
                let lo_ok = if min_incl { *s >= min } else { *s > min };
                let hi_ok = if max_incl { *s <= max } else { *s < max };
                lo_ok && hi_ok
            })
            .map(|(m, s)| (m.clone(), s))
            .collect::<Vec<_>>()
    });
    match result {
        Ok(Some(items)) => render_members(items, with_scores),
        Ok(None) => Reply::array(vec![]),
        Err(e) => e.into(),
    }
}

pub fn zcount(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let (min, min_incl) = match parse_bound(&args[2]) {
        Ok(b) => b,
        Err(e) => return e.into(),
    };
    let (max, max_incl) = match parse_bound(&args[3]) {
        Ok(b) => b,
        Err(e) => return e.into(),
    };
    let result = with_zset_mut(ctx, client, &args[1], false, |z| {
        z.iter_ascending()
            .filter(|(_, s)| {
                let lo_ok = if min_incl { *s >= min } else { *s > min };
                let hi_ok = if max_incl { *s <= max } else { *s < max };
                lo_ok && hi_ok
            })
            .count()
    });
    match result {
        Ok(Some(n)) => Reply::Integer(n as i64),
        Ok(None) => Reply::Integer(0),
        Err(e) => e.into(),
    }
}

fn pop_extreme(ctx: &Ctx, client: &mut Client, args: &[Bytes], from_low: bool) -> Reply {
    let count = match args.get(2) {
        Some(a) => match parse_i64(a) {
            Ok(n) if n >= 0 => n as usize,
            _ => return CommandError::NotAnInteger.into(),
        },
        None => 1,
    };
    let result = with_zset_mut(ctx, client, &args[1], false, |z| {
        let members: Vec<Bytes> = if from_low {
            z.iter_ascending().take(count).map(|(m, _)| m.clone()).collect()
        } else {
            z.iter_ascending().rev().take(count).map(|(m, _)| m.clone()).collect()
        };
        members
            .into_iter()
            .map(|m| {
                let score = z.scores[&m];
                z.remove(&m);
                (m, score)
            })
            .collect::<Vec<_>>()
    });
    match result {
        Ok(Some(popped)) => {
            if !popped.is_empty() {
                ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            }
            render_members(popped, true)
        }
        Ok(None) => Reply::array(vec![]),
        Err(e) => e.into(),
    }
}

pub fn zpopmin(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    pop_extreme(ctx, client, args, true)
}

pub fn zpopmax(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    pop_extreme(ctx, client, args, false)
}

pub fn zrevrangebyscore(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let (max, max_incl) = match parse_bound(&args[2]) {
        Ok(b) => b,
        Err(e) => return e.into(),
    };
    let (min, min_incl) = match parse_bound(&args[3]) {
        Ok(b) => b,
        Err(e) => return e.into(),
    };
    let with_scores = args.get(4).map(|a| a.eq_ignore_ascii_case(b"WITHSCORES")).unwrap_or(false);
    let result = with_zset_mut(ctx, client, &args[1], false, |z| {
        z.iter_ascending()
            .rev()
            .filter(|(_, s)| {
                let lo_ok = if min_incl { *s >= min } else { *s > min };
                let hi_ok = if max_incl { *s <= max } else { *s < max };
                lo_ok && hi_ok
            })
            .map(|(m, s)| (m.clone(), s))
            .collect::<Vec<_>>()
    });
    match result {
        Ok(Some(items)) => render_members(items, with_scores),
        Ok(None) => Reply::array(vec![]),
        Err(e) => e.into(),
    }
}

/// Parses a `ZRANGEBYLEX`-style bound: `-`, `+`, `[value` (inclusive) or
/// `(value` (exclusive). Lexicographic comparisons only make sense across
/// members inserted with equal scores, per Redis's own documented caveat.
fn parse_lex_bound(b: &[u8]) -> Result<(Option<Bytes>, bool), CommandError> {
    match b {
        b"-" => Ok((None, true)),
        b"+" => Ok((None, false)),
        _ if b.first() == Some(&b'[') => Ok((Some(Bytes::copy_from_slice(&b[1..])), true)),
        _ if b.first() == Some(&b'(') => Ok((Some(Bytes::copy_from_slice(&b[1..])), false)),
        _ => Err(CommandError::Syntax),
    }
}

pub fn zrangebylex(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let (min, min_incl) = match parse_lex_bound(&args[2]) {
        Ok(b) => b,
        Err(e) => return e.into(),
    };
    let (max, max_incl) = match parse_lex_bound(&args[3]) {
        Ok(b) => b,
        Err(e) => return e.into(),
    };
    let is_min_unbounded = args[2].as_ref() == b"-";
    let is_max_unbounded = args[3].as_ref() == b"+";
    let result = with_zset_mut(ctx, client, &args[1], false, |z| {
        z.iter_ascending()
            .filter(|(m, _)| {
                let lo_ok = is_min_unbounded
                    || match &min {
                        Some(b) if min_incl => m.as_ref() >= b.as_ref(),
                        Some(b) => m.as_ref() > b.as_ref(),
                        None => true,
                    };
                let hi_ok = is_max_unbounded
                    || match &max {
                        Some(b) if max_incl => m.as_ref() <= b.as_ref(),
                        Some(b) => m.as_ref() < b.as_ref(),
                        None => true,
                    };
                lo_ok && hi_ok
            })
            .map(|(m, _)| m.clone())
            .collect::<Vec<_>>()
    });
    match result {
        Ok(Some(members)) => Reply::array(members.into_iter().map(Reply::bulk).collect()),
        Ok(None) => Reply::array(vec![]),
        Err(e) => e.into(),
    }
}

/// `BZPOPMIN`/`BZPOPMAX` without a blocking wait: the store has no
/// cross-connection wake mechanism, so these poll once and return nil
/// immediately on a miss rather than waiting out the timeout (spec.md §4.2's
/// no-wait polling semantics for blocking commands).
pub fn bzpopmin(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    bpop_extreme(ctx, client, args, true)
}

pub fn bzpopmax(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    bpop_extreme(ctx, client, args, false)
}

fn bpop_extreme(ctx: &Ctx, client: &mut Client, args: &[Bytes], from_low: bool) -> Reply {
    for key in &args[1..args.len() - 1] {
        let popped = with_zset_mut(ctx, client, key, false, |z| {
            let member = if from_low {
                z.iter_ascending().next().map(|(m, _)| m.clone())
            } else {
                z.iter_ascending().next_back().map(|(m, _)| m.clone())
            };
            member.map(|m| {
                let score = z.scores[&m];
                z.remove(&m);
                (m, score)
            })
        });
        match popped {
            Ok(Some(Some((member, score)))) => {
                ctx.finish_write(client.db_index, args, &[key.clone()]);
                return Reply::array(vec![Reply::bulk(key.clone()), Reply::bulk(member), Reply::bulk(format!("{score}"))]);
            }
            Ok(_) => continue,
            Err(e) => return e.into(),
        }
    }
    Reply::nil_array()
}
