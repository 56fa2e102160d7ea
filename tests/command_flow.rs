//! End-to-end tests driving the command dispatcher the way a connected
//! client would: build an `AppState`, a `Client` wired to an unbounded
//! channel, and send requests straight through `commands::dispatch`,
//! inspecting both the returned reply and whatever else lands on the
//! client's outbound channel (pub/sub deliveries, extra subscribe frames).

use bytes::Bytes;
use redberry::client::Client;
use redberry::commands::{self, Ctx};
use redberry::config::Config;
use redberry::protocol::Reply;
use redberry::state::AppState;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};

fn test_ctx() -> Ctx {
    let mut cfg = Config::default();
    cfg.dir = std::env::temp_dir().join(format!("redberry-test-{}", std::process::id()));
    std::fs::create_dir_all(&cfg.dir).unwrap();
    Arc::new(AppState::new(cfg))
}

fn test_client(ctx: &Ctx) -> (Client, UnboundedReceiver<Reply>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut client = Client::new(ctx.next_client_id(), tx);
    client.is_admin = true;
    client.authenticated = true;
    (client, rx)
}

fn req(parts: &[&str]) -> Vec<Bytes> {
    parts.iter().map(|p| Bytes::copy_from_slice(p.as_bytes())).collect()
}

fn bulk_str(reply: &Reply) -> String {
    match reply {
        Reply::Bulk(Some(b)) => String::from_utf8_lossy(b).into_owned(),
        other => panic!("expected bulk reply, got {other:?}"),
    }
}

#[tokio::test]
async fn set_then_get_round_trips() {
    let ctx = test_ctx();
    let (mut client, _rx) = test_client(&ctx);

    let reply = commands::dispatch(&ctx, &mut client, req(&["SET", "greeting", "hello"]));
    assert_eq!(reply, Reply::ok());

    let reply = commands::dispatch(&ctx, &mut client, req(&["GET", "greeting"]));
    assert_eq!(bulk_str(&reply), "hello");

    let reply = commands::dispatch(&ctx, &mut client, req(&["GET", "missing"]));
    assert_eq!(reply, Reply::nil());
}

#[tokio::test]
async fn incr_and_type_checking() {
    let ctx = test_ctx();
    let (mut client, _rx) = test_client(&ctx);

    commands::dispatch(&ctx, &mut client, req(&["SET", "counter", "10"]));
    let reply = commands::dispatch(&ctx, &mut client, req(&["INCRBY", "counter", "5"]));
    assert_eq!(reply, Reply::Integer(15));

    commands::dispatch(&ctx, &mut client, req(&["LPUSH", "mylist", "a"]));
    let reply = commands::dispatch(&ctx, &mut client, req(&["INCR", "mylist"]));
    assert!(matches!(reply, Reply::Error(_)));
}

#[tokio::test]
async fn multi_exec_applies_all_queued_commands() {
    let ctx = test_ctx();
    let (mut client, _rx) = test_client(&ctx);

    assert_eq!(commands::dispatch(&ctx, &mut client, req(&["MULTI"])), Reply::ok());
    assert_eq!(
        commands::dispatch(&ctx, &mut client, req(&["SET", "a", "1"])),
        Reply::Simple("QUEUED".into())
    );
    assert_eq!(
        commands::dispatch(&ctx, &mut client, req(&["INCR", "a"])),
        Reply::Simple("QUEUED".into())
    );

    let reply = commands::dispatch(&ctx, &mut client, req(&["EXEC"]));
    match reply {
        Reply::Array(Some(items)) => {
            assert_eq!(items.len(), 2);
            assert_eq!(items[0], Reply::ok());
            assert_eq!(items[1], Reply::Integer(2));
        }
        other => panic!("expected array reply, got {other:?}"),
    }
    assert!(!client.in_tx);

    let reply = commands::dispatch(&ctx, &mut client, req(&["GET", "a"]));
    assert_eq!(bulk_str(&reply), "2");
}

#[tokio::test]
async fn watch_aborts_exec_on_concurrent_mutation() {
    let ctx = test_ctx();
    let (mut client, _rx) = test_client(&ctx);
    let (mut other, _rx2) = test_client(&ctx);

    commands::dispatch(&ctx, &mut client, req(&["SET", "balance", "100"]));
    commands::dispatch(&ctx, &mut client, req(&["WATCH", "balance"]));

    // A different connection mutates the watched key before EXEC runs.
    commands::dispatch(&ctx, &mut other, req(&["SET", "balance", "50"]));

    commands::dispatch(&ctx, &mut client, req(&["MULTI"]));
    commands::dispatch(&ctx, &mut client, req(&["GET", "balance"]));
    let reply = commands::dispatch(&ctx, &mut client, req(&["EXEC"]));
    assert_eq!(reply, Reply::nil_array());
}

#[tokio::test]
async fn auth_gates_commands_until_successful_password() {
    let ctx = test_ctx();
    {
        let mut cfg = ctx.config.write().unwrap();
        cfg.requirepass = true;
        cfg.admin_password = "s3cret".into();
    }
    ctx.bootstrap_default_admin("s3cret");

    let (tx, _rx) = mpsc::unbounded_channel();
    let mut client = Client::new(ctx.next_client_id(), tx);

    let reply = commands::dispatch(&ctx, &mut client, req(&["GET", "anything"]));
    assert!(matches!(reply, Reply::Error(_)));

    let reply = commands::dispatch(&ctx, &mut client, req(&["AUTH", "wrong"]));
    assert!(matches!(reply, Reply::Error(_)));
    assert!(!client.authenticated);

    let reply = commands::dispatch(&ctx, &mut client, req(&["AUTH", "s3cret"]));
    assert_eq!(reply, Reply::ok());
    assert!(client.authenticated);
    assert!(client.is_admin);

    let reply = commands::dispatch(&ctx, &mut client, req(&["GET", "anything"]));
    assert_eq!(reply, Reply::nil());
}

#[tokio::test]
async fn publish_delivers_to_subscribed_clients() {
    let ctx = test_ctx();
    let (mut subscriber, mut sub_rx) = test_client(&ctx);
    let (mut publisher, _pub_rx) = test_client(&ctx);

    let reply = commands::dispatch(&ctx, &mut subscriber, req(&["SUBSCRIBE", "news"]));
    match reply {
        Reply::Array(Some(items)) => {
            assert_eq!(items[0], Reply::bulk(Bytes::from_static(b"subscribe")));
            assert_eq!(items[2], Reply::Integer(1));
        }
        other => panic!("expected subscribe confirmation array, got {other:?}"),
    }

    let reply = commands::dispatch(&ctx, &mut publisher, req(&["PUBLISH", "news", "hello"]));
    assert_eq!(reply, Reply::Integer(1));

    let delivered = sub_rx.recv().await.expect("expected a published message");
    match delivered {
        Reply::Array(Some(items)) => {
            assert_eq!(items[0], Reply::bulk(Bytes::from_static(b"message")));
            assert_eq!(items[1], Reply::bulk(Bytes::from_static(b"news")));
            assert_eq!(items[2], Reply::bulk(Bytes::from_static(b"hello")));
        }
        other => panic!("expected a message array, got {other:?}"),
    }
}

#[tokio::test]
async fn expired_key_reads_as_missing() {
    let ctx = test_ctx();
    let (mut client, _rx) = test_client(&ctx);

    commands::dispatch(&ctx, &mut client, req(&["SET", "temp", "v"]));
    commands::dispatch(&ctx, &mut client, req(&["PEXPIRE", "temp", "1"]));
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let reply = commands::dispatch(&ctx, &mut client, req(&["GET", "temp"]));
    assert_eq!(reply, Reply::nil());
    let reply = commands::dispatch(&ctx, &mut client, req(&["EXISTS", "temp"]));
    assert_eq!(reply, Reply::Integer(0));
}

#[tokio::test]
async fn unknown_and_wrong_arity_commands_report_errors() {
    let ctx = test_ctx();
    let (mut client, _rx) = test_client(&ctx);

    let reply = commands::dispatch(&ctx, &mut client, req(&["NOPE"]));
    assert!(matches!(reply, Reply::Error(_)));

    let reply = commands::dispatch(&ctx, &mut client, req(&["GET"]));
    assert!(matches!(reply, Reply::Error(_)));
}
