//! `PFADD`/`PFCOUNT`/`PFMERGE` (spec.md §4.2), backed by `hyperloglog`'s
//! dense register layout stored as a plain `Value::HyperLogLog` byte buffer.

use super::helpers::Ctx;
use crate::client::Client;
use crate::db::now_ms;
use crate::error::CommandError;
use crate::eviction::ensure_capacity;
use crate::hyperloglog;
use crate::protocol::Reply;
use crate::value::{Entry, Value};
use bytes::Bytes;

pub fn pfadd(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
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
            ensure_capacity(inner, maxmemory, hyperloglog::REGISTER_COUNT, policy, samples)?;
            inner.set(args[1].clone(), Entry::new(Value::HyperLogLog(hyperloglog::new_registers()), now));
        }
        let entry = inner.map.get_mut(&args[1]).unwrap();
        let buf = match &mut entry.value {
            Value::HyperLogLog(b) => b,
            _ => return Err(CommandError::WrongType),
        };
        let mut changed = false;
        for element in &args[2..] {
            if hyperloglog::add(buf, element) {
                changed = true;
            }
        }
        inner.adjust_for_mutation(&args[1], before);
        Ok(changed)
    });
    match result {
        Ok(changed) => {
            if changed {
                ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            }
            Reply::Integer(changed as i64)
        }
        Err(e) => e.into(),
    }
}

pub fn pfcount(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return CommandError::Generic("DB index is out of range".into()).into();
    };
    let now = now_ms();
    let buffers: Result<Vec<Vec<u8>>, CommandError> = args[1..]
        .iter()
        .map(|key| match db.get_live(key, now) {
            None => Ok(hyperloglog::new_registers()),
            Some(entry) => match entry.value {
                Value::HyperLogLog(b) => Ok(b),
                _ => Err(CommandError::WrongType),
            },
        })
        .collect();
    match buffers {
        Ok(bufs) if bufs.len() == 1 => Reply::Integer(hyperloglog::count(&bufs[0]) as i64),
        Ok(bufs) => {
            let refs: Vec<&[u8]> = bufs.iter().map(|b| b.as_slice()).collect();
            Reply::Integer(hyperloglog::count(&hyperloglog::merge(&refs)) as i64)
        }
        Err(e) => e.into(),
    }
}

pub fn pfmerge(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return CommandError::Generic("DB index is out of range".into()).into();
    };
    let now = now_ms();
    let sources: Result<Vec<Vec<u8>>, CommandError> = args[2..]
        .iter()
        .map(|key| match db.get_live(key, now) {
            None => Ok(hyperloglog::new_registers()),
            Some(entry) => match entry.value {
                Value::HyperLogLog(b) => Ok(b),
                _ => Err(CommandError::WrongType),
            },
        })
        .collect();
    let sources = match sources {
        Ok(s) => s,
        Err(e) => return e.into(),
    };
    let result = db.write(|inner| {
        inner.expire_if_due(&args[1], now);
        let existing = match inner.map.get(&args[1]) {
            Some(e) => match &e.value {
                Value::HyperLogLog(b) => Some(b.clone()),
                _ => return Err(CommandError::WrongType),
            },
            None => None,
        };
        let mut refs: Vec<&[u8]> = sources.iter().map(|b| b.as_slice()).collect();
        if let Some(e) = &existing {
            refs.push(e.as_slice());
        }
        let merged = hyperloglog::merge(&refs);
        inner.set(args[1].clone(), Entry::new(Value::HyperLogLog(merged), now));
        Ok(())
    });
    match result {
        Ok(()) => {
            ctx.finish_write(client.db_index, args, &[args[1].clone()]);
            Reply::ok()
        }
        Err(e) => e.into(),
    }
}
