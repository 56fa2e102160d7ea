//! String commands (spec.md §4.2): get/set family, counters, and range ops.

use super::helpers::{parse_f64, parse_i64, Ctx};
use crate::client::Client;
use crate::db::now_ms;
use crate::error::CommandError;
use crate::eviction::ensure_capacity;
use crate::protocol::Reply;
use crate::value::{Entry, Kind, Value};
use bytes::Bytes;

fn get_str(ctx: &Ctx, client: &Client, key: &[u8]) -> Result<Option<Bytes>, Reply> {
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return Err(CommandError::Generic("DB index is out of range".into()).into());
    };
    match db.get_live(key, now_ms()) {
        None => Ok(None),
        Some(entry) => match entry.value {
            Value::Str(b) => Ok(Some(b)),
            _ => Err(CommandError::WrongType.into()),
        },
    }
}

pub fn get(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    match get_str(ctx, client, &args[1]) {
        Ok(Some(b)) => Reply::bulk(b),
        Ok(None) => Reply::nil(),
        Err(r) => r,
    }
}

/// Shared `SET` body: inserts `key`→`value` with memory-budget enforcement
/// (spec.md §9: existence check, eviction, insertion under one exclusive
/// latch) and an optional absolute expiry.
fn do_set(ctx: &Ctx, client: &Client, key: Bytes, value: Bytes, expire_at: Option<i64>) -> Result<(), CommandError> {
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return Err(CommandError::Generic("DB index is out of range".into()));
    };
    let cfg = ctx.config.read().unwrap();
    let (maxmemory, policy, samples) = (cfg.maxmemory, cfg.eviction, cfg.maxmemory_samples);
    drop(cfg);
    let now = now_ms();
    db.write(|inner| {
        let mut entry = Entry::new(Value::Str(value), now);
        entry.expire_at = expire_at;
        let extra = entry.approx_size(key.len());
        ensure_capacity(inner, maxmemory, extra, policy, samples)?;
        inner.set(key, entry);
        Ok(())
    })
}

pub fn set(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let key = args[1].clone();
    let value = args[2].clone();
    let mut expire_at = None;
    let mut nx = false;
    let mut xx = false;
    let mut i = 3;
    while i < args.len() {
        match String::from_utf8_lossy(&args[i]).to_ascii_uppercase().as_str() {
            "NX" => nx = true,
            "XX" => xx = true,
            "EX" => {
                i += 1;
                match args.get(i).map(|a| parse_i64(a)) {
                    Some(Ok(secs)) => expire_at = Some(now_ms() + secs * 1000),
                    _ => return CommandError::Syntax.into(),
                }
            }
            "PX" => {
                i += 1;
                match args.get(i).map(|a| parse_i64(a)) {
                    Some(Ok(ms)) => expire_at = Some(now_ms() + ms),
                    _ => return CommandError::Syntax.into(),
                }
            }
            _ => return CommandError::Syntax.into(),
        }
        i += 1;
    }

    if nx || xx {
        let exists = get_str(ctx, client, &key).map(|v| v.is_some());
        match exists {
            Ok(true) if nx => return Reply::nil(),
            Ok(false) if xx => return Reply::nil(),
            Err(_) => {}
            _ => {}
        }
    }

    match do_set(ctx, client, key, value, expire_at) {
        Ok(()) => {
            ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            Reply::ok()
        }
        Err(e) => e.into(),
    }
}

pub fn setnx(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    match get_str(ctx, client, &args[1]) {
        Ok(Some(_)) => Reply::Integer(0),
        Ok(None) => match do_set(ctx, client, args[1].clone(), args[2].clone(), None) {
            Ok(()) => {
                ctx.finish_write(client.db_index, args, &[args[1].clone()]);
                Reply::Integer(1)
            }
            Err(e) => e.into(),
        },
        Err(r) => r,
    }
}

pub fn setex(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let secs = match parse_i64(&args[2]) {
        Ok(n) if n > 0 => n,
        Ok(_) => return CommandError::Generic("invalid expire time".into()).into(),
        Err(e) => return e.into(),
    };
    match do_set(ctx, client, args[1].clone(), args[3].clone(), Some(now_ms() + secs * 1000)) {
        Ok(()) => {
            ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            Reply::ok()
        }
        Err(e) => e.into(),
    }
}

pub fn psetex(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let ms = match parse_i64(&args[2]) {
        Ok(n) if n > 0 => n,
        Ok(_) => return CommandError::Generic("invalid expire time".into()).into(),
        Err(e) => return e.into(),
    };
    match do_set(ctx, client, args[1].clone(), args[3].clone(), Some(now_ms() + ms)) {
        Ok(()) => {
            ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            Reply::ok()
        }
        Err(e) => e.into(),
    }
}

pub fn getset(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let old = match get_str(ctx, client, &args[1]) {
        Ok(v) => v,
        Err(r) => return r,
    };
    match do_set(ctx, client, args[1].clone(), args[2].clone(), None) {
        Ok(()) => {
            ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            match old {
                Some(b) => Reply::bulk(b),
                None => Reply::nil(),
            }
        }
        Err(e) => e.into(),
    }
}

pub fn getdel(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return CommandError::Generic("DB index is out of range".into()).into();
    };
    let now = now_ms();
    let result = db.write(|inner| {
        inner.expire_if_due(&args[1], now);
        match inner.map.get(&args[1]) {
            Some(e) if e.value.kind() != Kind::Str => Err(CommandError::WrongType),
            _ => Ok(inner.remove(&args[1])),
        }
    });
    match result {
        Ok(Some(entry)) => {
            ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            match entry.value {
                Value::Str(b) => Reply::bulk(b),
                _ => Reply::nil(),
            }
        }
        Ok(None) => Reply::nil(),
        Err(e) => e.into(),
    }
}

pub fn append(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return CommandError::Generic("DB index is out of range".into()).into();
    };
    let now = now_ms();
    let cfg = ctx.config.read().unwrap();
    let (maxmemory, policy, samples) = (cfg.maxmemory, cfg.eviction, cfg.maxmemory_samples);
    drop(cfg);
    let result = db.write(|inner| {
        inner.expire_if_due(&args[1], now);
        let before = inner.map.get(&args[1]).map(|e| e.value.approx_size()).unwrap_or(0);
        match inner.map.get_mut(&args[1]) {
            Some(entry) => match &mut entry.value {
                Value::Str(s) => {
                    let mut buf = s.to_vec();
                    buf.extend_from_slice(&args[2]);
                    *s = Bytes::from(buf);
                    let len = s.len();
                    inner.adjust_for_mutation(&args[1], before);
                    Ok(len)
                }
                _ => Err(CommandError::WrongType),
            },
            None => {
                ensure_capacity(inner, maxmemory, args[2].len() + 32, policy, samples)?;
                let len = args[2].len();
                inner.set(args[1].clone(), Entry::new(Value::Str(args[2].clone()), now));
                Ok(len)
            }
        }
    });
    match result {
        Ok(len) => {
            ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            Reply::Integer(len as i64)
        }
        Err(e) => e.into(),
    }
}

pub fn strlen(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    match get_str(ctx, client, &args[1]) {
        Ok(Some(b)) => Reply::Integer(b.len() as i64),
        Ok(None) => Reply::Integer(0),
        Err(r) => r,
    }
}

fn incr_by(ctx: &Ctx, client: &mut Client, args: &[Bytes], key: &Bytes, delta: i64) -> Reply {
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return CommandError::Generic("DB index is out of range".into()).into();
    };
    let now = now_ms();
    let result = db.write(|inner| {
        inner.expire_if_due(key, now);
        let current: i64 = match inner.map.get(key) {
            None => 0,
            Some(e) => match &e.value {
                Value::Str(b) => std::str::from_utf8(b)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or(CommandError::NotAnInteger)?,
                _ => return Err(CommandError::WrongType),
            },
        };
        let next = current.checked_add(delta).ok_or(CommandError::Generic(
            "increment or decrement would overflow".into(),
        ))?;
        inner.set(key.clone(), Entry::new(Value::Str(Bytes::from(next.to_string())), now));
        Ok(next)
    });
    match result {
        Ok(n) => {
            ctx.finish_write(client.db_index, args, &[key.clone()]);
            Reply::Integer(n)
        }
        Err(e) => e.into(),
    }
}

pub fn incr(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    incr_by(ctx, client, args, &args[1].clone(), 1)
}

pub fn decr(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    incr_by(ctx, client, args, &args[1].clone(), -1)
}

pub fn incrby(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let delta = match parse_i64(&args[2]) {
        Ok(n) => n,
        Err(e) => return e.into(),
    };
    incr_by(ctx, client, args, &args[1].clone(), delta)
}

pub fn decrby(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let delta = match parse_i64(&args[2]) {
        Ok(n) => n,
        Err(e) => return e.into(),
    };
    incr_by(ctx, client, args, &args[1].clone(), -delta)
}

pub fn incrbyfloat(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let delta = match parse_f64(&args[2]) {
        Ok(n) => n,
        Err(e) => return e.into(),
    };
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return CommandError::Generic("DB index is out of range".into()).into();
    };
    let now = now_ms();
    let result = db.write(|inner| {
        inner.expire_if_due(&args[1], now);
        let current: f64 = match inner.map.get(&args[1]) {
            None => 0.0,
            Some(e) => match &e.value {
                Value::Str(b) => std::str::from_utf8(b)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or(CommandError::NotAFloat)?,
                _ => return Err(CommandError::WrongType),
            },
        };
        let next = current + delta;
        let rendered = format!("{next}");
        inner.set(args[1].clone(), Entry::new(Value::Str(Bytes::from(rendered.clone())), now));
        Ok(rendered)
    });
    match result {
        Ok(rendered) => {
            ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            Reply::bulk(rendered)
        }
        Err(e) => e.into(),
    }
}

pub fn getrange(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let (start, end) = match (parse_i64(&args[2]), parse_i64(&args[3])) {
        (Ok(s), Ok(e)) => (s, e),
        _ => return CommandError::NotAnInteger.into(),
    };
    match get_str(ctx, client, &args[1]) {
        Ok(Some(b)) => {
            let len = b.len() as i64;
            if len == 0 {
                return Reply::bulk(Bytes::new());
            }
            let norm = |i: i64| -> i64 { if i < 0 { (len + i).max(0) } else { i } };
            let s = norm(start).min(len - 1).max(0);
            let e = norm(end).min(len - 1);
            if s > e || s >= len {
                Reply::bulk(Bytes::new())
            } else {
                Reply::bulk(Bytes::copy_from_slice(&b[s as usize..=e as usize]))
            }
        }
        Ok(None) => Reply::bulk(Bytes::new()),
        Err(r) => r,
    }
}

pub fn setrange(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let offset = match parse_i64(&args[2]) {
        Ok(n) if n >= 0 => n as usize,
        Ok(_) => return CommandError::Generic("offset is out of range".into()).into(),
        Err(e) => return e.into(),
    };
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return CommandError::Generic("DB index is out of range".into()).into();
    };
    let now = now_ms();
    let result = db.write(|inner| {
        inner.expire_if_due(&args[1], now);
        let before = inner.map.get(&args[1]).map(|e| e.value.approx_size()).unwrap_or(0);
        let mut buf = match inner.map.get(&args[1]) {
            None => Vec::new(),
            Some(e) => match &e.value {
                Value::Str(s) => s.to_vec(),
                _ => return Err(CommandError::WrongType),
            },
        };
        if buf.len() < offset + args[3].len() {
            buf.resize(offset + args[3].len(), 0);
        }
        buf[offset..offset + args[3].len()].copy_from_slice(&args[3]);
        let len = buf.len();
        if inner.map.contains_key(&args[1]) {
            if let Some(e) = inner.map.get_mut(&args[1]) {
                e.value = Value::Str(Bytes::from(buf));
            }
            inner.adjust_for_mutation(&args[1], before);
        } else {
            inner.set(args[1].clone(), Entry::new(Value::Str(Bytes::from(buf)), now));
        }
        Ok(len)
    });
    match result {
        Ok(len) => {
            ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            Reply::Integer(len as i64)
        }
        Err(e) => e.into(),
    }
}

pub fn mset(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    if (args.len() - 1) % 2 != 0 {
        return CommandError::Syntax.into();
    }
    let mut keys = Vec::new();
    for pair in args[1..].chunks(2) {
        if let Err(e) = do_set(ctx, client, pair[0].clone(), pair[1].clone(), None) {
            return e.into();
        }
        keys.push(pair[0].clone());
    }
    ctx.finish_write(client.db_index, args, &keys);
    Reply::ok()
}

pub fn msetnx(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    if (args.len() - 1) % 2 != 0 {
        return CommandError::Syntax.into();
    }
    for pair in args[1..].chunks(2) {
        match get_str(ctx, client, &pair[0]) {
            Ok(Some(_)) => return Reply::Integer(0),
            Ok(None) => {}
            Err(r) => return r,
        }
    }
    let mut keys = Vec::new();
    for pair in args[1..].chunks(2) {
        let _ = do_set(ctx, client, pair[0].clone(), pair[1].clone(), None);
        keys.push(pair[0].clone());
    }
    ctx.finish_write(client.db_index, args, &keys);
    Reply::Integer(1)
}

pub fn mget(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let items = args[1..]
        .iter()
        .map(|k| match get_str(ctx, client, k) {
            Ok(Some(b)) => Reply::bulk(b),
            _ => Reply::nil(),
        })
        .collect();
    Reply::array(items)
}
