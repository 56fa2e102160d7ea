//! Admin-gated commands (spec.md §4.3, §4.5): user management, persistence
//! triggers, and `MONITOR`. All names here also appear in
//! `users::ADMIN_COMMANDS`, enforced by the dispatcher before the handler
//! ever runs.

use super::helpers::Ctx;
use crate::client::Client;
use crate::db::now_ms;
use crate::error::CommandError;
use crate::persistence::rdb;
use crate::protocol::Reply;
use crate::users::User;
use bytes::Bytes;
use std::sync::atomic::Ordering;

pub fn useradd(ctx: &Ctx, _client: &mut Client, args: &[Bytes]) -> Reply {
    let name = String::from_utf8_lossy(&args[1]).to_string();
    let password = String::from_utf8_lossy(&args[2]).to_string();
    ctx.users.add(User::new(name, &password, false));
    persist_users(ctx);
    Reply::ok()
}

pub fn userdel(ctx: &Ctx, _client: &mut Client, args: &[Bytes]) -> Reply {
    let name = String::from_utf8_lossy(&args[1]).to_string();
    let removed = ctx.users.remove(&name);
    if removed {
        persist_users(ctx);
    }
    Reply::Integer(removed as i64)
}

pub fn users(ctx: &Ctx, _client: &mut Client, _args: &[Bytes]) -> Reply {
    Reply::array(ctx.users.names().into_iter().map(Reply::bulk).collect())
}

fn persist_users(ctx: &Ctx) {
    let cfg = ctx.config.read().unwrap();
    let path = cfg.passwd_path();
    if let Err(e) = std::fs::write(&path, ctx.users.serialize()) {
        tracing::warn!(error = %e, "failed to persist user store");
    }
}

/// `SAVE`: blocking snapshot of the current database (spec.md §4.5).
pub fn save(ctx: &Ctx, client: &mut Client, _args: &[Bytes]) -> Reply {
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return CommandError::Generic("DB index is out of range".into()).into();
    };
    let cfg = ctx.config.read().unwrap();
    let path = cfg.rdb_path(client.db_index);
    let guard = db.exclusive();
    match rdb::save_snapshot(&path, &guard, &cfg, now_ms()) {
        Ok(()) => Reply::ok(),
        Err(e) => CommandError::Generic(e.to_string()).into(),
    }
}

/// `BGSAVE`: single-flight per database via `bgsave_in_progress` (spec.md
/// §4.5, §9's resolved open question). The copy is taken under the store's
/// read latch, which is released before the encode/write/fsync pipeline runs
/// on a blocking task, so writers are never held up behind disk I/O.
pub fn bgsave(ctx: &Ctx, client: &mut Client, _args: &[Bytes]) -> Reply {
    if ctx.bgsave_in_progress[client.db_index].swap(true, Ordering::SeqCst) {
        return CommandError::Generic("Background save already in progress".into()).into();
    }
    let Some(db) = ctx.dbs.get(client.db_index) else {
        ctx.bgsave_in_progress[client.db_index].store(false, Ordering::SeqCst);
        return CommandError::Generic("DB index is out of range".into()).into();
    };
    let cfg = ctx.config.read().unwrap().clone();
    let path = cfg.rdb_path(client.db_index);
    let snapshot = db.read(|inner| inner.clone());
    let db_index = client.db_index;
    let ctx = ctx.clone();
    tokio::spawn(async move {
        let result = tokio::task::spawn_blocking(move || rdb::save_snapshot(&path, &snapshot, &cfg, now_ms())).await;
        ctx.bgsave_in_progress[db_index].store(false, Ordering::SeqCst);
        match result {
            Ok(Ok(())) => tracing::info!(db_index, "background save finished"),
            Ok(Err(e)) => tracing::warn!(db_index, error = %e, "background save failed"),
            Err(e) => tracing::warn!(db_index, error = %e, "background save task panicked"),
        }
    });
    Reply::Simple("Background saving started".into())
}

/// `BGREWRITEAOF`: rewrites the current database's append-only log to a
/// minimal body derived from its present contents (spec.md §4.4).
pub fn bgrewriteaof(ctx: &Ctx, client: &mut Client, _args: &[Bytes]) -> Reply {
    let Some(db) = ctx.dbs.get(client.db_index) else {
        return CommandError::Generic("DB index is out of range".into()).into();
    };
    let mut guard = ctx.aof[client.db_index].lock().unwrap();
    let Some(writer) = guard.as_mut() else {
        return CommandError::Generic("append-only log is not enabled".into()).into();
    };
    writer.begin_rewrite();
    let minimal = db.read(|inner| minimal_rewrite_body(inner));
    let cfg = ctx.config.read().unwrap();
    match writer.finish_rewrite(minimal, &cfg) {
        Ok(()) => Reply::Simple("Background append only file rewriting started".into()),
        Err(e) => CommandError::Generic(e.to_string()).into(),
    }
}

fn minimal_rewrite_body(inner: &crate::db::DbInner) -> Vec<u8> {
    use crate::protocol::encode_request;
    let mut buf = Vec::new();
    for (key, entry) in inner.map.iter() {
        for args in crate::persistence::aof::rewrite_frames(key, entry) {
            buf.extend_from_slice(&encode_request(&args));
        }
    }
    buf
}

pub fn monitor(ctx: &Ctx, client: &mut Client, _args: &[Bytes]) -> Reply {
    client.monitor = true;
    ctx.monitors.add(client.id, client.out.clone());
    Reply::ok()
}
