//! Key-space commands that apply to any value kind (spec.md §4.2's generic
//! row): existence, expiry, renaming, enumeration, and the whole-database
//! operations.

use super::helpers::{parse_i64, Ctx};
use crate::client::Client;
use crate::db::now_ms;
use crate::error::CommandError;
use crate::protocol::Reply;
use crate::pubsub::glob_match;
use bytes::Bytes;

pub fn select(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let idx = match parse_i64(&args[1]) {
        Ok(n) if n >= 0 && (n as usize) < ctx.dbs.len() => n as usize,
        Ok(_) => return CommandError::Generic("DB index is out of range".into()).into(),
        Err(e) => return e.into(),
    };
    client.db_index = idx;
    Reply::ok()
}

pub fn del(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return CommandError::Generic("DB index is out of range".into()).into();
    };
    let now = now_ms();
    let mut deleted_keys: Vec<Bytes> = Vec::new();
    db.write(|inner| {
        for key in &args[1..] {
            if inner.expire_if_due(key, now) {
                // already gone
            } else if inner.remove(key).is_some() {
                deleted_keys.push(key.clone());
            }
        }
    });
    if !deleted_keys.is_empty() {
        ctx.finish_write(client.db_index, args, &deleted_keys);
    }
    Reply::Integer(deleted_keys.len() as i64)
}

pub fn exists(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return CommandError::Generic("DB index is out of range".into()).into();
    };
    let count = args[1..]
        .iter()
        .filter(|k| db.get_live(k, now_ms()).is_some())
        .count();
    Reply::Integer(count as i64)
}

pub fn type_cmd(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return CommandError::Generic("DB index is out of range".into()).into();
    };
    match db.get_live(&args[1], now_ms()) {
        Some(entry) => Reply::Simple(entry.value.kind().name().to_string()),
        None => Reply::Simple("none".into()),
    }
}

pub fn keys(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return CommandError::Generic("DB index is out of range".into()).into();
    };
    let now = now_ms();
    let matched: Vec<Reply> = db.read(|inner| {
        inner
            .map
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .filter(|(k, _)| glob_match(&args[1], k))
            .map(|(k, _)| Reply::bulk(k.clone()))
            .collect()
    });
    Reply::array(matched)
}

pub fn randomkey(ctx: &Ctx, client: &mut Client, _args: &[Bytes]) -> Reply {
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return CommandError::Generic("DB index is out of range".into()).into();
    };
    use rand::seq::IteratorRandom;
    let now = now_ms();
    let picked = db.read(|inner| {
        let mut rng = rand::thread_rng();
        inner
            .map
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .choose(&mut rng)
            .map(|(k, _)| k.clone())
    });
    match picked {
        Some(k) => Reply::bulk(k),
        None => Reply::nil(),
    }
}

pub fn rename(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return CommandError::Generic("DB index is out of range".into()).into();
    };
    let now = now_ms();
    let result = db.write(|inner| {
        inner.expire_if_due(&args[1], now);
        match inner.remove(&args[1]) {
            Some(entry) => {
                inner.set(args[2].clone(), entry);
                Ok(())
            }
            None => Err(CommandError::Generic("no such key".into())),
        }
    });
    match result {
        Ok(()) => {
            ctx.finish_write(client.db_index, args, &[args[1].clone(), args[2].clone()]);
            Reply::ok()
        }
        Err(e) => e.into(),
    }
}

pub fn renamenx(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return CommandError::Generic("DB index is out of range".into()).into();
    };
    let now = now_ms();
    let result = db.write(|inner| {
        inner.expire_if_due(&args[1], now);
        inner.expire_if_due(&args[2], now);
        if !inner.map.contains_key(&args[1]) {
            return Err(CommandError::Generic("no such key".into()));
        }
        if inner.map.contains_key(&args[2]) {
            return Ok(false);
        }
        let entry = inner.remove(&args[1]).unwrap();
        inner.set(args[2].clone(), entry);
        Ok(true)
    });
    match result {
        Ok(true) => {
            ctx.finish_write(client.db_index, args, &[args[1].clone(), args[2].clone()]);
            Reply::Integer(1)
        }
        Ok(false) => Reply::Integer(0),
        Err(e) => e.into(),
    }
}

pub fn expire_generic(ctx: &Ctx, client: &mut Client, key: &Bytes, target_ms: i64) -> Reply {
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return CommandError::Generic("DB index is out of range".into()).into();
    };
    let now = now_ms();
    let set = db.write(|inner| {
        inner.expire_if_due(key, now);
        match inner.map.get_mut(key) {
            Some(entry) => {
                entry.expire_at = Some(target_ms);
                true
            }
            None => false,
        }
    });
    Reply::Integer(set as i64)
}

pub fn expire(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let secs = match parse_i64(&args[2]) {
        Ok(n) => n,
        Err(e) => return e.into(),
    };
    let reply = expire_generic(ctx, client, &args[1], now_ms() + secs * 1000);
    if matches!(reply, Reply::Integer(1)) {
        ctx.finish_write(client.db_index, args, &[args[1].clone()]);
    }
    reply
}

pub fn pexpire(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let ms = match parse_i64(&args[2]) {
        Ok(n) => n,
        Err(e) => return e.into(),
    };
    let reply = expire_generic(ctx, client, &args[1], now_ms() + ms);
    if matches!(reply, Reply::Integer(1)) {
        ctx.finish_write(client.db_index, args, &[args[1].clone()]);
    }
    reply
}

pub fn expireat(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let secs = match parse_i64(&args[2]) {
        Ok(n) => n,
        Err(e) => return e.into(),
    };
    let reply = expire_generic(ctx, client, &args[1], secs * 1000);
    if matches!(reply, Reply::Integer(1)) {
        ctx.finish_write(client.db_index, args, &[args[1].clone()]);
    }
    reply
}

pub fn pexpireat(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let ms = match parse_i64(&args[2]) {
        Ok(n) => n,
        Err(e) => return e.into(),
    };
    let reply = expire_generic(ctx, client, &args[1], ms);
    if matches!(reply, Reply::Integer(1)) {
        ctx.finish_write(client.db_index, args, &[args[1].clone()]);
    }
    reply
}

pub fn persist(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return CommandError::Generic("DB index is out of range".into()).into();
    };
    let now = now_ms();
    let cleared = db.write(|inner| {
        inner.expire_if_due(&args[1], now);
        match inner.map.get_mut(&args[1]) {
            Some(entry) if entry.expire_at.is_some() => {
                entry.expire_at = None;
                true
            }
            _ => false,
        }
    });
    if cleared {
        ctx.finish_write(client.db_index, args, &[args[1].clone()]);
    }
    Reply::Integer(cleared as i64)
}

pub fn ttl(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    pttl_inner(ctx, client, args).map_or_else(|r| r, |ms| Reply::Integer(if ms < 0 { ms } else { ms / 1000 }))
}

pub fn pttl(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    pttl_inner(ctx, client, args).map_or_else(|r| r, Reply::Integer)
}

fn pttl_inner(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Result<i64, Reply> {
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return Err(CommandError::Generic("DB index is out of range".into()).into());
    };
    match db.get_live(&args[1], now_ms()) {
        None => Ok(-2),
        Some(entry) => match entry.expire_at {
            None => Ok(-1),
            Some(at) => Ok((at - now_ms()).max(0)),
        },
    }
}

pub fn flushdb(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return CommandError::Generic("DB index is out of range".into()).into();
    };
    db.flush();
    ctx.finish_write(client.db_index, args, &[]);
    Reply::ok()
}

pub fn flushall(ctx: &Ctx, _client: &mut Client, _args: &[Bytes]) -> Reply {
    for db in ctx.dbs.iter() {
        db.flush();
    }
    ctx.reset_all_trackers();
    Reply::ok()
}

pub fn dbsize(ctx: &Ctx, client: &mut Client, _args: &[Bytes]) -> Reply {
    match ctx.dbs.get(client.db_index) {
        Some(db) => Reply::Integer(db.dbsize() as i64),
        None => CommandError::Generic("DB index is out of range".into()).into(),
    }
}
