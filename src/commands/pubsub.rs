//! `SUBSCRIBE`/`UNSUBSCRIBE`/`PSUBSCRIBE`/`PUNSUBSCRIBE`/`PUBLISH` (spec.md
//! §4.7). Each channel/pattern in a multi-argument (un)subscribe call gets
//! its own confirmation frame; all but the last are pushed straight onto
//! `client.out` (the same queue the dispatcher's own return value rides),
//! and the last is returned normally so exactly one frame is sent per item.

use super::helpers::Ctx;
use crate::client::Client;
use crate::protocol::Reply;
use bytes::Bytes;

fn confirmation(kind: &str, channel: &Bytes, count: usize) -> Reply {
    Reply::array(vec![
        Reply::from_string(kind),
        Reply::bulk(channel.clone()),
        Reply::Integer(count as i64),
    ])
}

pub fn subscribe(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let mut last = None;
    for channel in &args[1..] {
        ctx.pubsub.subscribe(channel.clone(), client.id, client.out.clone());
        client.subscribed_channels.push(channel.clone());
        let count = client.subscribed_channels.len() + client.subscribed_patterns.len();
        let reply = confirmation("subscribe", channel, count);
        if let Some(prev) = last.replace(reply) {
            let _ = client.out.send(prev);
        }
    }
    last.unwrap_or_else(Reply::nil_array)
}

pub fn psubscribe(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let mut last = None;
    for pattern in &args[1..] {
        ctx.pubsub.psubscribe(pattern.clone(), client.id, client.out.clone());
        client.subscribed_patterns.push(pattern.clone());
        let count = client.subscribed_channels.len() + client.subscribed_patterns.len();
        let reply = confirmation("psubscribe", pattern, count);
        if let Some(prev) = last.replace(reply) {
            let _ = client.out.send(prev);
        }
    }
    last.unwrap_or_else(Reply::nil_array)
}

pub fn unsubscribe(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let channels: Vec<Bytes> = if args.len() > 1 {
        args[1..].to_vec()
    } else {
        client.subscribed_channels.clone()
    };
    if channels.is_empty() {
        return confirmation("unsubscribe", &Bytes::new(), client.subscribed_patterns.len());
    }
    let mut last = None;
    for channel in channels {
        ctx.pubsub.unsubscribe(&channel, client.id);
        client.subscribed_channels.retain(|c| c != &channel);
        let count = client.subscribed_channels.len() + client.subscribed_patterns.len();
        let reply = confirmation("unsubscribe", &channel, count);
        if let Some(prev) = last.replace(reply) {
            let _ = client.out.send(prev);
        }
    }
    last.unwrap_or_else(Reply::nil_array)
}

pub fn punsubscribe(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let patterns: Vec<Bytes> = if args.len() > 1 {
        args[1..].to_vec()
    } else {
        client.subscribed_patterns.clone()
    };
    if patterns.is_empty() {
        return confirmation("punsubscribe", &Bytes::new(), client.subscribed_channels.len());
    }
    let mut last = None;
    for pattern in patterns {
        ctx.pubsub.punsubscribe(&pattern, client.id);
        client.subscribed_patterns.retain(|p| p != &pattern);
        let count = client.subscribed_channels.len() + client.subscribed_patterns.len();
        let reply = confirmation("punsubscribe", &pattern, count);
        if let Some(prev) = last.replace(reply) {
            let _ = client.out.send(prev);
        }
    }
    last.unwrap_or_else(Reply::nil_array)
}

pub fn publish(ctx: &Ctx, _client: &mut Client, args: &[Bytes]) -> Reply {
    let delivered = ctx.pubsub.publish(&args[1], &args[2]);
    Reply::Integer(delivered as i64)
}
