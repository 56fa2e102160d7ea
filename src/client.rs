//! Per-connection client state: selected database, auth, transaction queue,
//! watch list, and subscription/monitor flags (spec.md §4.6, §4.8).

use crate::db::WatchFlag;
use crate::protocol::Reply;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// One command queued inside a `MULTI`/`EXEC` block: the raw frame (for
/// error messages and AOF) plus the resolved command name.
pub struct QueuedCommand {
    pub args: Vec<Bytes>,
}

pub struct Client {
    pub id: u64,
    pub db_index: usize,
    pub authenticated: bool,
    pub username: Option<String>,
    pub is_admin: bool,

    pub in_tx: bool,
    pub queue: Vec<QueuedCommand>,
    pub watched_keys: Vec<(usize, Bytes)>,
    pub tx_failed: WatchFlag,

    pub monitor: bool,
    pub subscribed_channels: Vec<Bytes>,
    pub subscribed_patterns: Vec<Bytes>,

    /// Outbound channel: both command replies and asynchronously-delivered
    /// pub/sub messages / monitor fan-out flow through here to a single
    /// writer task, avoiding concurrent writers on one socket.
    pub out: UnboundedSender<Reply>,
}

impl Client {
    pub fn new(id: u64, out: UnboundedSender<Reply>) -> Self {
        Client {
            id,
            db_index: 0,
            authenticated: false,
            username: None,
            is_admin: false,
            in_tx: false,
            queue: Vec::new(),
            watched_keys: Vec::new(),
            tx_failed: Arc::new(AtomicBool::new(false)),
            monitor: false,
            subscribed_channels: Vec::new(),
            subscribed_patterns: Vec::new(),
            out,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        !self.subscribed_channels.is_empty() || !self.subscribed_patterns.is_empty()
    }

    pub fn reset_tx_state(&mut self) {
        self.in_tx = false;
        self.queue.clear();
        self.tx_failed.store(false, Ordering::SeqCst);
    }
}
