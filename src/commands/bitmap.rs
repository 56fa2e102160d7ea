//! `SETBIT`/`GETBIT`/`BITCOUNT`/`BITPOS`/`BITOP` (spec.md §4.2), backed by
//! `bitmap`'s byte-wise helpers over a plain `Value::Bitmap` buffer.

use super::helpers::{parse_i64, Ctx};
use crate::bitmap::{self, BitOp};
use crate::client::Client;
use crate::db::now_ms;
use crate::error::CommandError;
use crate::eviction::ensure_capacity;
use crate::protocol::Reply;
use crate::value::{Entry, Value};
use bytes::Bytes;

pub fn setbit(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let offset = match parse_i64(&args[2]) {
        Ok(n) if n >= 0 => n as usize,
        _ => return CommandError::Generic("bit offset is not an integer or out of range".into()).into(),
    };
    let value = match args[3].as_ref() {
        b"0" => false,
        b"1" => true,
        _ => return CommandError::Generic("bit is not an integer or out of range".into()).into(),
    };
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
        if !inner.map.contains_key(&args[1]) {
            ensure_capacity(inner, maxmemory, offset / 8 + 1, policy, samples)?;
            inner.set(args[1].clone(), Entry::new(Value::Bitmap(Vec::new()), now));
        }
        let entry = inner.map.get_mut(&args[1]).unwrap();
        let buf = match &mut entry.value {
            Value::Bitmap(b) => b,
            _ => return Err(CommandError::WrongType),
        };
        let old = bitmap::set_bit(buf, offset, value);
        inner.adjust_for_mutation(&args[1], before);
        Ok(old)
    });
    match result {
        Ok(old) => {
            ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            Reply::Integer(old as i64)
        }
        Err(e) => e.into(),
    }
}

fn read_bitmap(ctx: &Ctx, client: &Client, key: &Bytes) -> Result<Vec<u8>, CommandError> {
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return Err(CommandError::Generic("DB index is out of range".into()));
    };
    match db.get_live(key, now_ms()) {
        None => Ok(Vec::new()),
        Some(entry) => match entry.value {
            Value::Bitmap(b) => Ok(b),
            _ => Err(CommandError::WrongType),
        },
    }
}

pub fn getbit(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let offset = match parse_i64(&args[2]) {
        Ok(n) if n >= 0 => n as usize,
        _ => return CommandError::Generic("bit offset is not an integer or out of range".into()).into(),
    };
    match read_bitmap(ctx, client, &args[1]) {
        Ok(buf) => Reply::Integer(bitmap::get_bit(&buf, offset) as i64),
        Err(e) => e.into(),
    }
}

pub fn bitcount(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let buf = match read_bitmap(ctx, client, &args[1]) {
        Ok(b) => b,
        Err(e) => return e.into(),
    };
    let (start, end) = match (args.get(2), args.get(3)) {
        (Some(s), Some(e)) => match (parse_i64(s), parse_i64(e)) {
            (Ok(s), Ok(e)) => (s, e),
            _ => return CommandError::NotAnInteger.into(),
        },
        _ => (0, -1),
    };
    let len = buf.len() as i64;
    if len == 0 {
        return Reply::Integer(0);
    }
    let norm = |i: i64| -> i64 { if i < 0 { (len + i).max(0) } else { i } };
    let s = norm(start).min(len - 1).max(0) as usize;
    let e = norm(end).min(len - 1);
    if e < 0 || s as i64 > e {
        Reply::Integer(0)
    } else {
        Reply::Integer(bitmap::count_ones(&buf, s, e as usize) as i64)
    }
}

pub fn bitpos(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let buf = match read_bitmap(ctx, client, &args[1]) {
        Ok(b) => b,
        Err(e) => return e.into(),
    };
    let target = match args[2].as_ref() {
        b"0" => false,
        b"1" => true,
        _ => return CommandError::NotAnInteger.into(),
    };
    let start = match args.get(3) {
        Some(s) => match parse_i64(s) {
            Ok(n) if n >= 0 => n as usize,
            _ => return CommandError::NotAnInteger.into(),
        },
        None => 0,
    };
    let end = match args.get(4) {
        Some(e) => match parse_i64(e) {
            Ok(n) if n >= 0 => Some(n as usize),
            _ => return CommandError::NotAnInteger.into(),
        },
        None => None,
    };
    match bitmap::bit_pos(&buf, target, start, end) {
        Some(pos) => Reply::Integer(pos),
        None => Reply::Integer(-1),
    }
}

pub fn bitop(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let op = match String::from_utf8_lossy(&args[1]).to_ascii_uppercase().as_str() {
        "AND" => BitOp::And,
        "OR" => BitOp::Or,
        "XOR" => BitOp::Xor,
        "NOT" => BitOp::Not,
        _ => return CommandError::Syntax.into(),
    };
    if op == BitOp::Not && args.len() != 4 {
        return CommandError::Generic("BITOP NOT must be called with a single source key".into()).into();
    }
    let sources: Result<Vec<Vec<u8>>, CommandError> = args[3..].iter().map(|k| read_bitmap(ctx, client, k)).collect();
    let sources = match sources {
        Ok(s) => s,
        Err(e) => return e.into(),
    };
    let refs: Vec<&[u8]> = sources.iter().map(|s| s.as_slice()).collect();
    let result = bitmap::bit_op(op, &refs);
    let len = result.len();
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return CommandError::Generic("DB index is out of range".into()).into();
    };
    let now = now_ms();
    let changed = db.write(|inner| {
        inner.expire_if_due(&args[2], now);
        if result.is_empty() {
            inner.remove(&args[2]).is_some()
        } else {
            inner.set(args[2].clone(), Entry::new(Value::Bitmap(result), now));
            true
        }
    });
    if changed {
        ctx.finish_write(client.db_index, args, &[args[2].clone()]);
    }
    Reply::Integer(len as i64)
}
