//! List commands (spec.md §4.2): push/pop from both ends, range access, and
//! in-place editing.

use super::helpers::{normalize_index, parse_i64, Ctx};
use crate::client::Client;
use crate::db::now_ms;
use crate::error::CommandError;
use crate::eviction::ensure_capacity;
use crate::protocol::Reply;
use crate::value::{Entry, Value};
use bytes::Bytes;
use std::collections::VecDeque;

fn with_list_mut<T>(
    ctx: &Ctx,
    client: &Client,
    key: &Bytes,
    create_if_missing: bool,
    f: impl FnOnce(&mut VecDeque<Bytes>) -> T,
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
            inner.set(key.clone(), Entry::new(Value::List(VecDeque::new()), now));
        }
        let entry = inner.map.get_mut(key).unwrap();
        let list = match &mut entry.value {
            Value::List(l) => l,
            _ => return Err(CommandError::WrongType),
        };
        let result = f(list);
        let empty = list.is_empty();
        inner.adjust_for_mutation(key, before);
        if empty {
            inner.remove(key);
        }
        Ok(Some(result))
    })
}

pub fn lpush(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let result = with_list_mut(ctx, client, &args[1], true, |list| {
        for item in &args[2..] {
            list.push_front(item.clone());
        }
        list.len()
    });
    match result {
        Ok(Some(len)) => {
            ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            Reply::Integer(len as i64)
        }
        Ok(None) => unreachable!(),
        Err(e) => e.into(),
    }
}

pub fn rpush(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let result = with_list_mut(ctx, client, &args[1], true, |list| {
        for item in &args[2..] {
            list.push_back(item.clone());
        }
        list.len()
    });
    match result {
        Ok(Some(len)) => {
            ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            Reply::Integer(len as i64)
        }
        Ok(None) => unreachable!(),
        Err(e) => e.into(),
    }
}

fn pushx(ctx: &Ctx, client: &mut Client, args: &[Bytes], front: bool) -> Reply {
    let result = with_list_mut(ctx, client, &args[1], false, |list| {
        for item in &args[2..] {
            if front {
                list.push_front(item.clone());
            } else {
                list.push_back(item.clone());
            }
        }
        list.len()
    });
    match result {
        Ok(Some(len)) => {
            ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            Reply::Integer(len as i64)
        }
        Ok(None) => Reply::Integer(0),
        Err(e) => e.into(),
    }
}

pub fn lpushx(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    pushx(ctx, client, args, true)
}

pub fn rpushx(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    pushx(ctx, client, args, false)
}

fn pop(ctx: &Ctx, client: &mut Client, args: &[Bytes], front: bool) -> Reply {
    let count = match args.get(2) {
        Some(a) => match parse_i64(a) {
            Ok(n) if n >= 0 => n as usize,
            _ => return CommandError::NotAnInteger.into(),
        },
        None => 1,
    };
    let result = with_list_mut(ctx, client, &args[1], false, |list| {
        let mut popped = Vec::new();
        for _ in 0..count {
            let item = if front { list.pop_front() } else { list.pop_back() };
            match item {
                Some(v) => popped.push(v),
                None => break,
            }
        }
        popped
    });
    match result {
        Ok(Some(popped)) => {
            if !popped.is_empty() {
                ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            }
            if args.get(2).is_none() {
                match popped.into_iter().next() {
                    Some(v) => Reply::bulk(v),
                    None => Reply::nil(),
                }
            } else {
                Reply::array(popped.into_iter().map(Reply::bulk).collect())
            }
        }
        Ok(None) => {
            if args.get(2).is_none() {
                Reply::nil()
            } else {
                Reply::nil_array()
            }
        }
        Err(e) => e.into(),
    }
}

pub fn lpop(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    pop(ctx, client, args, true)
}

pub fn rpop(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    pop(ctx, client, args, false)
}

pub fn llen(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    match with_list_mut(ctx, client, &args[1], false, |l| l.len()) {
        Ok(Some(len)) => Reply::Integer(len as i64),
        Ok(None) => Reply::Integer(0),
        Err(e) => e.into(),
    }
}

pub fn lrange(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let (start, end) = match (parse_i64(&args[2]), parse_i64(&args[3])) {
        (Ok(s), Ok(e)) => (s, e),
        _ => return CommandError::NotAnInteger.into(),
    };
    let result = with_list_mut(ctx, client, &args[1], false, |list| {
        let len = list.len();
        let s = normalize_index(start, len).min(len as i64) as usize;
        let e = normalize_index(end, len).min(len as i64 - 1);
        if e < 0 || s as i64 > e || s >= len {
            Vec::new()
        } else {
            list.iter().skip(s).take((e as usize - s) + 1).cloned().collect()
        }
    });
    match result {
        Ok(Some(items)) => Reply::array(items.into_iter().map(Reply::bulk).collect()),
        Ok(None) => Reply::array(vec![]),
        Err(e) => e.into(),
    }
}

pub fn lindex(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let idx = match parse_i64(&args[2]) {
        Ok(n) => n,
        Err(e) => return e.into(),
    };
    let result = with_list_mut(ctx, client, &args[1], false, |list| {
        let len = list.len();
        let i = normalize_index(idx, len);
        if i < 0 || i as usize >= len {
            None
        } else {
            list.get(i as usize).cloned()
        }
    });
    match result {
        Ok(Some(Some(v))) => Reply::bulk(v),
        Ok(_) => Reply::nil(),
        Err(e) => e.into(),
    }
}

pub fn lset(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let idx = match parse_i64(&args[2]) {
        Ok(n) => n,
        Err(e) => return e.into(),
    };
    let result = with_list_mut(ctx, client, &args[1], false, |list| {
        let len = list.len();
        let i = normalize_index(idx, len);
        if i < 0 || i as usize >= len {
            Err(CommandError::Generic("index out of range".into()))
        } else {
            list[i as usize] = args[3].clone();
            Ok(())
        }
    });
    match result {
        Ok(Some(Ok(()))) => {
            ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            Reply::ok()
        }
        Ok(Some(Err(e))) => e.into(),
        Ok(None) => CommandError::Generic("no such key".into()).into(),
        Err(e) => e.into(),
    }
}

pub fn lrem(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let count = match parse_i64(&args[2]) {
        Ok(n) => n,
        Err(e) => return e.into(),
    };
    let target = args[3].clone();
    let result = with_list_mut(ctx, client, &args[1], false, |list| {
        let mut removed = 0i64;
        if count >= 0 {
            let limit = if count == 0 { usize::MAX } else { count as usize };
            let mut kept = VecDeque::new();
            for item in list.drain(..) {
                if removed < limit as i64 && item == target {
                    removed += 1;
                } else {
                    kept.push_back(item);
                }
            }
            *list = kept;
        } else {
            let limit = (-count) as usize;
            let mut kept = VecDeque::new();
            for item in list.drain(..).rev() {
                if (removed as usize) < limit && item == target {
                    removed += 1;
                } else {
                    kept.push_front(item);
                }
            }
            *list = kept;
        }
        removed
    });
    match result {
        Ok(Some(n)) => {
            if n > 0 {
                ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            }
            Reply::Integer(n)
        }
        Ok(None) => Reply::Integer(0),
        Err(e) => e.into(),
    }
}

pub fn ltrim(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let (start, end) = match (parse_i64(&args[2]), parse_i64(&args[3])) {
        (Ok(s), Ok(e)) => (s, e),
        _ => return CommandError::NotAnInteger.into(),
    };
    let result = with_list_mut(ctx, client, &args[1], false, |list| {
        let len = list.len();
        let s = normalize_index(start, len).min(len as i64) as usize;
        let e = normalize_index(end, len).min(len as i64 - 1);
        if e < 0 || s as i64 > e || s >= len {
            list.clear();
        } else {
            let kept: VecDeque<Bytes> = list.iter().skip(s).take((e as usize - s) + 1).cloned().collect();
            *list = kept;
        }
        len != list.len()
    });
    match result {
        Ok(Some(changed)) => {
            if changed {
                ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            }
            Reply::ok()
        }
        Ok(None) => Reply::ok(),
        Err(e) => e.into(),
    }
}

pub fn linsert(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let before = match String::from_utf8_lossy(&args[2]).to_ascii_uppercase().as_str() {
        "BEFORE" => true,
        "AFTER" => false,
        _ => return CommandError::Syntax.into(),
    };
    let pivot = args[3].clone();
    let value = args[4].clone();
    let result = with_list_mut(ctx, client, &args[1], false, |list| {
        match list.iter().position(|e| *e == pivot) {
            Some(pos) => {
                let insert_at = if before { pos } else { pos + 1 };
                list.insert(insert_at, value);
                list.len() as i64
            }
            None => -1,
        }
    });
    match result {
        Ok(Some(n)) => {
            if n > 0 {
                ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            }
            Reply::Integer(n)
        }
        Ok(None) => Reply::Integer(0),
        Err(e) => e.into(),
    }
}
