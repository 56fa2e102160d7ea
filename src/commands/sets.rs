//! Set commands (spec.md §4.2): membership, random access, and the
//! union/intersection/difference family, both ad-hoc and stored.

use super::helpers::{parse_i64, Ctx};
use crate::client::Client;
use crate::db::now_ms;
use crate::error::CommandError;
use crate::eviction::ensure_capacity;
use crate::protocol::Reply;
use crate::value::{Entry, Value};
use bytes::Bytes;
use std::collections::HashSet;

fn with_set_mut<T>(
    ctx: &Ctx,
    client: &Client,
    key: &Bytes,
    create_if_missing: bool,
    f: impl FnOnce(&mut HashSet<Bytes>) -> T,
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
            inner.set(key.clone(), Entry::new(Value::Set(HashSet::new()), now));
        }
        let entry = inner.map.get_mut(key).unwrap();
        let set = match &mut entry.value {
            Value::Set(s) => s,
            _ => return Err(CommandError::WrongType),
        };
        let result = f(set);
        let empty = set.is_empty();
        inner.adjust_for_mutation(key, before);
        if empty {
            inner.remove(key);
        }
        Ok(Some(result))
    })
}

fn read_set(ctx: &Ctx, client: &Client, key: &Bytes) -> Result<HashSet<Bytes>, CommandError> {
    Ok(with_set_mut(ctx, client, key, false, |s| s.clone())?.unwrap_or_default())
}

pub fn sadd(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let result = with_set_mut(ctx, client, &args[1], true, |set| {
        args[2..].iter().filter(|m| set.insert((*m).clone())).count()
    });
    match result {
        Ok(Some(n)) => {
            if n > 0 {
                ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            }
            Reply::Integer(n as i64)
        }
        Ok(None) => unreachable!(),
        Err(e) => e.into(),
    }
}

pub fn srem(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let result = with_set_mut(ctx, client, &args[1], false, |set| {
        args[2..].iter().filter(|m| set.remove(*m)).count()
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

pub fn sismember(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    match with_set_mut(ctx, client, &args[1], false, |set| set.contains(&args[2])) {
        Ok(Some(b)) => Reply::Integer(b as i64),
        Ok(None) => Reply::Integer(0),
        Err(e) => e.into(),
    }
}

pub fn scard(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    match with_set_mut(ctx, client, &args[1], false, |set| set.len()) {
        Ok(Some(n)) => Reply::Integer(n as i64),
        Ok(None) => Reply::Integer(0),
        Err(e) => e.into(),
    }
}

pub fn smembers(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    match read_set(ctx, client, &args[1]) {
        Ok(set) => Reply::array(set.into_iter().map(Reply::bulk).collect()),
        Err(e) => e.into(),
    }
}

pub fn spop(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let count = match args.get(2) {
        Some(a) => match parse_i64(a) {
            Ok(n) if n >= 0 => Some(n as usize),
            _ => return CommandError::NotAnInteger.into(),
        },
        None => None,
    };
    use rand::seq::IteratorRandom;
    let result = with_set_mut(ctx, client, &args[1], false, |set| {
        let mut rng = rand::thread_rng();
        let n = count.unwrap_or(1);
        let picks: Vec<Bytes> = set.iter().cloned().choose_multiple(&mut rng, n);
        for p in &picks {
            set.remove(p);
        }
        picks
    });
    match result {
        Ok(Some(picks)) => {
            if !picks.is_empty() {
                ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            }
            if count.is_none() {
                picks.into_iter().next().map(Reply::bulk).unwrap_or_else(Reply::nil)
            } else {
                Reply::array(picks.into_iter().map(Reply::bulk).collect())
            }
        }
        Ok(None) => {
            if count.is_none() {
                Reply::nil()
            } else {
                Reply::array(vec![])
            }
        }
        Err(e) => e.into(),
    }
}

pub fn srandmember(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let count = match args.get(2) {
        Some(a) => match parse_i64(a) {
            Ok(n) => Some(n),
            Err(e) => return e.into(),
        },
        None => None,
    };
    use rand::seq::IteratorRandom;
    use rand::Rng;
    let set = match read_set(ctx, client, &args[1]) {
        Ok(s) => s,
        Err(e) => return e.into(),
    };
    let mut rng = rand::thread_rng();
    match count {
        None => set.into_iter().choose(&mut rng).map(Reply::bulk).unwrap_or_else(Reply::nil),
        Some(n) if n >= 0 => {
            let items: Vec<Bytes> = set.into_iter().choose_multiple(&mut rng, n as usize);
            Reply::array(items.into_iter().map(Reply::bulk).collect())
        }
        Some(n) => {
            // negative count: duplicates allowed, exactly |n| picks
            let pool: Vec<Bytes> = set.into_iter().collect();
            if pool.is_empty() {
                return Reply::array(vec![]);
            }
            let items: Vec<Bytes> = (0..(-n)).map(|_| pool[rng.gen_range(0..pool.len())].clone()).collect();
            Reply::array(items.into_iter().map(Reply::bulk).collect())
        }
    }
}

pub fn smove(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let removed = with_set_mut(ctx, client, &args[1], false, |set| set.remove(&args[3]));
    match removed {
        Ok(Some(true)) => {
            let _ = with_set_mut(ctx, client, &args[2], true, |set| set.insert(args[3].clone()));
            ctx.finish_write(client.db_index, args, &[args[1].clone(), args[2].clone()]);
            Reply::Integer(1)
        }
        Ok(_) => Reply::Integer(0),
        Err(e) => e.into(),
    }
}

fn combine(ctx: &Ctx, client: &Client, keys: &[Bytes], op: fn(&mut HashSet<Bytes>, &HashSet<Bytes>)) -> Result<HashSet<Bytes>, CommandError> {
    let mut acc = read_set(ctx, client, &keys[0])?;
    for key in &keys[1..] {
        let other = read_set(ctx, client, key)?;
        op(&mut acc, &other);
    }
    Ok(acc)
}

pub fn sunion(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    match combine(ctx, client, &args[1..], |a, b| a.extend(b.iter().cloned())) {
        Ok(set) => Reply::array(set.into_iter().map(Reply::bulk).collect()),
        Err(e) => e.into(),
    }
}

pub fn sinter(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    match combine(ctx, client, &args[1..], |a, b| a.retain(|m| b.contains(m))) {
        Ok(set) => Reply::array(set.into_iter().map(Reply::bulk).collect()),
        Err(e) => e.into(),
    }
}

pub fn sdiff(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    match combine(ctx, client, &args[1..], |a, b| a.retain(|m| !b.contains(m))) {
        Ok(set) => Reply::array(set.into_iter().map(Reply::bulk).collect()),
        Err(e) => e.into(),
    }
}

fn store_result(ctx: &Ctx, client: &mut Client, args: &[Bytes], dest: &Bytes, set: HashSet<Bytes>) -> Reply {
    let len = set.len();
    let result = with_set_mut(ctx, client, dest, true, |s| *s = set);
    match result {
        Ok(_) => {
            ctx.finish_write(client.db_index, args, &[dest.clone()]);
            Reply::Integer(len as i64)
        }
        Err(e) => e.into(),
    }
}

pub fn sunionstore(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    match combine(ctx, client, &args[2..], |a, b| a.extend(b.iter().cloned())) {
        Ok(set) => store_result(ctx, client, args, &args[1].clone(), set),
        Err(e) => e.into(),
    }
}

pub fn sinterstore(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    match combine(ctx, client, &args[2..], |a, b| a.retain(|m| b.contains(m))) {
        Ok(set) => store_result(ctx, client, args, &args[1].clone(), set),
        Err(e) => e.into(),
    }
}

pub fn sdiffstore(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    match combine(ctx, client, &args[2..], |a, b| a.retain(|m| !b.contains(m))) {
        Ok(set) => store_result(ctx, client, args, &args[1].clone(), set),
        Err(e) => e.into(),
    }
}
