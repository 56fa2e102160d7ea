//! `MULTI`/`EXEC`/`DISCARD`/`WATCH`/`UNWATCH` (spec.md §4.6): optimistic
//! locking via a per-client failure flag set by any watched key's mutation.

use super::helpers::Ctx;
use crate::client::{Client, QueuedCommand};
use crate::error::CommandError;
use crate::protocol::Reply;
use bytes::Bytes;
use std::sync::atomic::Ordering;

pub fn multi(_ctx: &Ctx, client: &mut Client, _args: &[Bytes]) -> Reply {
    if client.in_tx {
        return CommandError::Generic("MULTI calls can not be nested".into()).into();
    }
    client.in_tx = true;
    client.queue.clear();
    Reply::ok()
}

pub fn discard(ctx: &Ctx, client: &mut Client, _args: &[Bytes]) -> Reply {
    if !client.in_tx {
        return CommandError::Generic("DISCARD without MULTI".into()).into();
    }
    for (db_index, key) in client.watched_keys.drain(..).collect::<Vec<_>>() {
        if let Some(db) = ctx.dbs.get(db_index) {
            db.unwatch_all(&client.tx_failed);
        }
        let _ = key;
    }
    client.reset_tx_state();
    Reply::ok()
}

pub fn watch(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    if client.in_tx {
        return CommandError::Generic("WATCH inside MULTI is not allowed".into()).into();
    }
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return CommandError::Generic("DB index is out of range".into()).into();
    };
    for key in &args[1..] {
        db.watch(key.clone(), client.tx_failed.clone());
        client.watched_keys.push((client.db_index, key.clone()));
    }
    Reply::ok()
}

pub fn unwatch(ctx: &Ctx, client: &mut Client, _args: &[Bytes]) -> Reply {
    for (db_index, _) in client.watched_keys.drain(..).collect::<Vec<_>>() {
        if let Some(db) = ctx.dbs.get(db_index) {
            db.unwatch_all(&client.tx_failed);
        }
    }
    client.tx_failed.store(false, Ordering::SeqCst);
    Reply::ok()
}

/// Runs the queued body under the transaction latch held exclusively, so no
/// other command can interleave and invalidate a watched key mid-`EXEC`
/// (spec.md §4.6, §5).
pub fn exec(ctx: &Ctx, client: &mut Client, _args: &[Bytes]) -> Reply {
    if !client.in_tx {
        return CommandError::Generic("EXEC without MULTI".into()).into();
    }
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return CommandError::Generic("DB index is out of range".into()).into();
    };
    let _guard = db.tx_write();

    if client.tx_failed.load(Ordering::SeqCst) {
        for (db_index, _) in client.watched_keys.drain(..).collect::<Vec<_>>() {
            if let Some(d) = ctx.dbs.get(db_index) {
                d.unwatch_all(&client.tx_failed);
            }
        }
        client.reset_tx_state();
        return Reply::nil_array();
    }

    let queued: Vec<QueuedCommand> = std::mem::take(&mut client.queue);
    let mut replies = Vec::with_capacity(queued.len());
    for cmd in &queued {
        replies.push(super::execute_queued(ctx, client, &cmd.args));
    }

    for (db_index, _) in client.watched_keys.drain(..).collect::<Vec<_>>() {
        if let Some(d) = ctx.dbs.get(db_index) {
            d.unwatch_all(&client.tx_failed);
        }
    }
    client.reset_tx_state();
    Reply::array(replies)
}
