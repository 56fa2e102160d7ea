//! The command table and dispatcher (spec.md §4.1, §4.3).
//!
//! Generalizes the teacher's `redis/cmd.rs` static command table (name,
//! arity, handler function pointer) into the same shape, keyed through
//! `once_cell::Lazy` exactly as the teacher builds its own lookup table, but
//! routed through an explicit `Arc<AppState>` instead of a global singleton.

mod admin;
mod bitmap;
mod connection;
mod generic;
mod geo;
mod hashes;
mod helpers;
mod hll;
mod lists;
mod pubsub;
mod sets;
mod strings;
mod transactions;
mod zsets;

pub use helpers::Ctx;
use helpers::{check_arity, Handler};

use crate::client::Client;
use crate::error::CommandError;
use crate::protocol::Reply;
use crate::users::{ADMIN_COMMANDS, SAFE_COMMANDS};
use bytes::Bytes;
use once_cell::sync::Lazy;
use std::collections::HashMap;

pub struct CommandSpec {
    pub name: &'static str,
    /// Positive: exact argument count including the command name. Negative:
    /// minimum argument count (its absolute value), for variadic commands.
    pub arity: i32,
    pub handler: Handler,
}

/// Commands that manage a transaction itself; never queued, never wrapped in
/// the transaction latch (spec.md §4.6).
const TX_CONTROL: &[&str] = &["MULTI", "EXEC", "DISCARD", "WATCH", "UNWATCH"];

macro_rules! spec {
    ($name:literal, $arity:expr, $handler:expr) => {
        (
            $name,
            CommandSpec {
                name: $name,
                arity: $arity,
                handler: $handler,
            },
        )
    };
}

static COMMANDS: Lazy<HashMap<&'static str, CommandSpec>> = Lazy::new(|| {
    HashMap::from([
        spec!("PING", -1, connection::ping),
        spec!("ECHO", 2, connection::echo),
        spec!("AUTH", -2, connection::auth),
        spec!("WHOAMI", 1, connection::whoami),
        spec!("COMMAND", -1, connection::command),
        spec!("COMMANDS", 1, connection::command),
        spec!("QUIT", 1, connection::quit),
        //
        spec!("SELECT", 2, generic::select),
        spec!("DEL", -2, generic::del),
        spec!("EXISTS", -2, generic::exists),
        spec!("TYPE", 2, generic::type_cmd),
        spec!("KEYS", 2, generic::keys),
        spec!("RANDOMKEY", 1, generic::randomkey),
        spec!("RENAME", 3, generic::rename),
        spec!("RENAMENX", 3, generic::renamenx),
        spec!("EXPIRE", 3, generic::expire),
        spec!("PEXPIRE", 3, generic::pexpire),
        spec!("EXPIREAT", 3, generic::expireat),
        spec!("PEXPIREAT", 3, generic::pexpireat),
        spec!("PERSIST", 2, generic::persist),
        spec!("TTL", 2, generic::ttl),
        spec!("PTTL", 2, generic::pttl),
        spec!("FLUSHDB", 1, generic::flushdb),
        spec!("FLUSHALL", 1, generic::flushall),
        spec!("DBSIZE", 1, generic::dbsize),
        //
        spec!("SET", -3, strings::set),
        spec!("SETNX", 3, strings::setnx),
        spec!("SETEX", 4, strings::setex),
        spec!("PSETEX", 4, strings::psetex),
        spec!("GET", 2, strings::get),
        spec!("GETSET", 3, strings::getset),
        spec!("GETDEL", 2, strings::getdel),
        spec!("APPEND", 3, strings::append),
        spec!("STRLEN", 2, strings::strlen),
        spec!("INCR", 2, strings::incr),
        spec!("DECR", 2, strings::decr),
        spec!("INCRBY", 3, strings::incrby),
        spec!("DECRBY", 3, strings::decrby),
        spec!("INCRBYFLOAT", 3, strings::incrbyfloat),
        spec!("GETRANGE", 4, strings::getrange),
        spec!("SETRANGE", 4, strings::setrange),
        spec!("MSET", -3, strings::mset),
        spec!("MSETNX", -3, strings::msetnx),
        spec!("MGET", -2, strings::mget),
        //
        spec!("LPUSH", -3, lists::lpush),
        spec!("RPUSH", -3, lists::rpush),
        spec!("LPUSHX", -3, lists::lpushx),
        spec!("RPUSHX", -3, lists::rpushx),
        spec!("LPOP", -2, lists::lpop),
        spec!("RPOP", -2, lists::rpop),
        spec!("LLEN", 2, lists::llen),
        spec!("LRANGE", 4, lists::lrange),
        spec!("LINDEX", 3, lists::lindex),
        spec!("LSET", 4, lists::lset),
        spec!("LREM", 4, lists::lrem),
        spec!("LTRIM", 4, lists::ltrim),
        spec!("LINSERT", 5, lists::linsert),
        //
        spec!("HSET", -4, hashes::hset),
        spec!("HSETNX", 4, hashes::hsetnx),
        spec!("HMSET", -4, hashes::hset),
        spec!("HGET", 3, hashes::hget),
        spec!("HMGET", -3, hashes::hmget),
        spec!("HDEL", -3, hashes::hdel),
        spec!("HEXISTS", 3, hashes::hexists),
        spec!("HLEN", 2, hashes::hlen),
        spec!("HKEYS", 2, hashes::hkeys),
        spec!("HVALS", 2, hashes::hvals),
        spec!("HGETALL", 2, hashes::hgetall),
        spec!("HINCRBY", 4, hashes::hincrby),
        spec!("HINCRBYFLOAT", 4, hashes::hincrbyfloat),
        spec!("HEXPIRE", 4, hashes::hexpire),
        spec!("HTTL", 3, hashes::httl),
        spec!("HPERSIST", 3, hashes::hpersist),
        //
        spec!("SADD", -3, sets::sadd),
        spec!("SREM", -3, sets::srem),
        spec!("SISMEMBER", 3, sets::sismember),
        spec!("SCARD", 2, sets::scard),
        spec!("SMEMBERS", 2, sets::smembers),
        spec!("SPOP", -2, sets::spop),
        spec!("SRANDMEMBER", -2, sets::srandmember),
        spec!("SMOVE", 4, sets::smove),
        spec!("SUNION", -2, sets::sunion),
        spec!("SINTER", -2, sets::sinter),
        spec!("SDIFF", -2, sets::sdiff),
        spec!("SUNIONSTORE", -3, sets::sunionstore),
        spec!("SINTERSTORE", -3, sets::sinterstore),
        spec!("SDIFFSTORE", -3, sets::sdiffstore),
        //
        spec!("ZADD", -4, zsets::zadd),
        spec!("ZREM", -3, zsets::zrem),
        spec!("ZSCORE", 3, zsets::zscore),
        spec!("ZCARD", 2, zsets::zcard),
        spec!("ZINCRBY", 4, zsets::zincrby),
        spec!("ZRANK", 3, zsets::zrank),
        spec!("ZREVRANK", 3, zsets::zrevrank),
        spec!("ZRANGE", -4, zsets::zrange),
        spec!("ZREVRANGE", -4, zsets::zrevrange),
        spec!("ZRANGEBYSCORE", -4, zsets::zrangebyscore),
        spec!("ZCOUNT", 4, zsets::zcount),
        spec!("ZPOPMIN", -2, zsets::zpopmin),
        spec!("ZPOPMAX", -2, zsets::zpopmax),
        spec!("ZREVRANGEBYSCORE", -4, zsets::zrevrangebyscore),
        spec!("ZRANGEBYLEX", -4, zsets::zrangebylex),
        spec!("BZPOPMIN", -3, zsets::bzpopmin),
        spec!("BZPOPMAX", -3, zsets::bzpopmax),
        //
        spec!("GEOADD", -5, geo::geoadd),
        spec!("GEOPOS", -2, geo::geopos),
        spec!("GEODIST", -4, geo::geodist),
        spec!("GEOHASH", -2, geo::geohash),
        spec!("GEOSEARCH", -7, geo::geosearch),
        //
        spec!("PFADD", -2, hll::pfadd),
        spec!("PFCOUNT", -2, hll::pfcount),
        spec!("PFMERGE", -2, hll::pfmerge),
        //
        spec!("SETBIT", 4, bitmap::setbit),
        spec!("GETBIT", 3, bitmap::getbit),
        spec!("BITCOUNT", -2, bitmap::bitcount),
        spec!("BITPOS", -3, bitmap::bitpos),
        spec!("BITOP", -4, bitmap::bitop),
        //
        spec!("MULTI", 1, transactions::multi),
        spec!("EXEC", 1, transactions::exec),
        spec!("DISCARD", 1, transactions::discard),
        spec!("WATCH", -2, transactions::watch),
        spec!("UNWATCH", 1, transactions::unwatch),
        //
        spec!("SUBSCRIBE", -2, pubsub::subscribe),
        spec!("UNSUBSCRIBE", -1, pubsub::unsubscribe),
        spec!("PSUBSCRIBE", -2, pubsub::psubscribe),
        spec!("PUNSUBSCRIBE", -1, pubsub::punsubscribe),
        spec!("PUBLISH", 3, pubsub::publish),
        //
        spec!("USERADD", 3, admin::useradd),
        spec!("USERDEL", 2, admin::userdel),
        spec!("USERS", 1, admin::users),
        spec!("SAVE", 1, admin::save),
        spec!("BGSAVE", 1, admin::bgsave),
        spec!("BGREWRITEAOF", 1, admin::bgrewriteaof),
        spec!("MONITOR", 1, admin::monitor),
    ])
});

fn lookup(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.get(name)
}

/// Used by `COMMAND`/`COMMANDS` to list every known command name.
pub(crate) fn command_names() -> Vec<&'static str> {
    COMMANDS.keys().copied().collect()
}

fn requires_auth(ctx: &Ctx, client: &Client) -> bool {
    ctx.config.read().unwrap().requirepass && !client.authenticated
}

/// Runs one already-resolved command: arity check, then (unless `latch` is
/// false, which `EXEC` uses for its queued body) the transaction-read latch
/// held for the handler's duration (spec.md §5's ordering rule: transaction
/// latch acquired before any store-latch access the handler makes).
fn run(ctx: &Ctx, client: &mut Client, spec: &CommandSpec, args: &[Bytes], latch: bool) -> Reply {
    if let Err(e) = check_arity(spec.name, args.len(), spec.arity) {
        return e.into();
    }
    if latch && !TX_CONTROL.contains(&spec.name) {
        match ctx.dbs.get(client.db_index) {
            Some(db) => {
                let _guard = db.tx_read();
                (spec.handler)(ctx, client, args)
            }
            None => CommandError::Generic("DB index is out of range".into()).into(),
        }
    } else {
        (spec.handler)(ctx, client, args)
    }
}

/// Entry point for a freshly-read request frame (spec.md §4.3's full
/// algorithm: lookup, auth gate, admin gate, transaction queueing, then
/// execution under the transaction latch, with monitor fan-out throughout).
pub fn dispatch(ctx: &Ctx, client: &mut Client, args: Vec<Bytes>) -> Reply {
    if args.is_empty() {
        return CommandError::Generic("empty command".into()).into();
    }

    ctx.monitors.fan_out(client.id, &args);

    let raw_name = String::from_utf8_lossy(&args[0]).into_owned();
    let sensitive = ctx.config.read().unwrap().sensitive;
    let lookup_name = if sensitive {
        raw_name.clone()
    } else {
        raw_name.to_ascii_uppercase()
    };

    let spec = match lookup(&lookup_name) {
        Some(s) => s,
        None => return CommandError::UnknownCommand(raw_name).into(),
    };

    if requires_auth(ctx, client) && !SAFE_COMMANDS.contains(&spec.name) {
        return CommandError::NoAuth.into();
    }
    if ADMIN_COMMANDS.contains(&spec.name) && !client.is_admin {
        return CommandError::NoPerm.into();
    }

    if client.in_tx && !TX_CONTROL.contains(&spec.name) {
        if let Err(e) = check_arity(spec.name, args.len(), spec.arity) {
            return e.into();
        }
        client.queue.push(crate::client::QueuedCommand { args });
        return Reply::Simple("QUEUED".into());
    }

    run(ctx, client, spec, &args, true)
}

/// Runs a single queued command from inside `EXEC`, which already holds the
/// transaction latch exclusively; the inner call must not try to acquire it
/// again (spec.md §4.6).
pub(crate) fn execute_queued(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
    match lookup(&name) {
        Some(spec) => run(ctx, client, spec, args, false),
        None => CommandError::UnknownCommand(name).into(),
    }
}
