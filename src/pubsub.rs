//! Channel and pattern subscriber registries (spec.md §4.7), guarded by a
//! single RW latch as the teacher's `handler.rs` guards its connection
//! tables.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc::UnboundedSender;

use crate::protocol::Reply;

pub type SubscriberId = u64;

struct Subscriber {
    id: SubscriberId,
    tx: UnboundedSender<Reply>,
}

#[derive(Default)]
pub struct PubSub {
    channels: RwLock<HashMap<Bytes, Vec<Subscriber>>>,
    patterns: RwLock<HashMap<Bytes, Vec<Subscriber>>>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, channel: Bytes, id: SubscriberId, tx: UnboundedSender<Reply>) {
        self.channels
            .write()
            .unwrap()
            .entry(channel)
            .or_default()
            .push(Subscriber { id, tx });
    }

    pub fn unsubscribe(&self, channel: &[u8], id: SubscriberId) {
        let mut guard = self.channels.write().unwrap();
        if let Some(subs) = guard.get_mut(channel) {
            subs.retain(|s| s.id != id);
            if subs.is_empty() {
                guard.remove(channel);
            }
        }
    }

    pub fn psubscribe(&self, pattern: Bytes, id: SubscriberId, tx: UnboundedSender<Reply>) {
        self.patterns
            .write()
            .unwrap()
            .entry(pattern)
            .or_default()
            .push(Subscriber { id, tx });
    }

    pub fn punsubscribe(&self, pattern: &[u8], id: SubscriberId) {
        let mut guard = self.patterns.write().unwrap();
        if let Some(subs) = guard.get_mut(pattern) {
            subs.retain(|s| s.id != id);
            if subs.is_empty() {
                guard.remove(pattern);
            }
        }
    }

    pub fn unsubscribe_all(&self, id: SubscriberId) {
        let mut channels = self.channels.write().unwrap();
        channels.retain(|_, subs| {
            subs.retain(|s| s.id != id);
            !subs.is_empty()
        });
        let mut patterns = self.patterns.write().unwrap();
        patterns.retain(|_, subs| {
            subs.retain(|s| s.id != id);
            !subs.is_empty()
        });
    }

    /// `PUBLISH channel message`: best-effort, non-blocking delivery.
    /// Returns the number of subscribers the message was handed to.
    pub fn publish(&self, channel: &[u8], message: &[u8]) -> u64 {
        let mut delivered = 0u64;
        {
            let guard = self.channels.read().unwrap();
            if let Some(subs) = guard.get(channel) {
                let reply = Reply::array(vec![
                    Reply::from_string("message"),
                    Reply::bulk(Bytes::copy_from_slice(channel)),
                    Reply::bulk(Bytes::copy_from_slice(message)),
                ]);
                for s in subs {
                    if s.tx.send(reply.clone()).is_ok() {
                        delivered += 1;
                    }
                }
            }
        }
        {
            let guard = self.patterns.read().unwrap();
            for (pattern, subs) in guard.iter() {
                if glob_match(pattern, channel) {
                    let reply = Reply::array(vec![
                        Reply::from_string("pmessage"),
                        Reply::bulk(Bytes::copy_from_slice(pattern)),
                        Reply::bulk(Bytes::copy_from_slice(channel)),
                        Reply::bulk(Bytes::copy_from_slice(message)),
                    ]);
                    for s in subs {
                        if s.tx.send(reply.clone()).is_ok() {
                            delivered += 1;
                        }
                    }
                }
            }
        }
        delivered
    }
}

/// Redis-style glob matching (`*`, `?`, `[...]`), used for `PSUBSCRIBE` and
/// `KEYS`.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    glob_match_rec(pattern, text)
}

fn glob_match_rec(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some(b'*') => {
            if glob_match_rec(&pattern[1..], text) {
                return true;
            }
            for i in 0..text.len() {
                if glob_match_rec(&pattern[1..], &text[i + 1..]) {
                    return true;
                }
            }
            false
        }
        Some(b'?') => !text.is_empty() && glob_match_rec(&pattern[1..], &text[1..]),
        Some(b'[') => {
            let Some(close) = pattern.iter().position(|&b| b == b']') else {
                return !text.is_empty() && pattern[0] == text[0] && glob_match_rec(&pattern[1..], &text[1..]);
            };
            if text.is_empty() {
                return false;
            }
            let class = &pattern[1..close];
            let (negate, class) = if class.first() == Some(&b'^') {
                (true, &class[1..])
            } else {
                (false, class)
            };
            let mut matched = false;
            let mut i = 0;
            while i < class.len() {
                if i + 2 < class.len() && class[i + 1] == b'-' {
                    if class[i] <= text[0] && text[0] <= class[i + 2] {
                        matched = true;
                    }
                    i += 3;
                } else {
                    if class[i] == text[0] {
                        matched = true;
                    }
                    i += 1;
                }
            }
            if matched == negate {
                return false;
            }
            glob_match_rec(&pattern[close + 1..], &text[1..])
        }
        Some(&c) => !text.is_empty() && c == text[0] && glob_match_rec(&pattern[1..], &text[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_star_and_question_mark() {
        assert!(glob_match(b"news.*", b"news.tech"));
        assert!(glob_match(b"h?llo", b"hello"));
        assert!(!glob_match(b"h?llo", b"hllo"));
    }

    #[test]
    fn glob_char_class() {
        assert!(glob_match(b"[ab]ey", b"key") == false);
        assert!(glob_match(b"[kd]ey", b"key"));
        assert!(glob_match(b"[^k]ey", b"dey"));
        assert!(!glob_match(b"[^k]ey", b"key"));
    }

    #[tokio::test]
    async fn publish_delivers_to_channel_and_pattern_subscribers() {
        let ps = PubSub::new();
        let (tx1, mut rx1) = tokio::sync::mpsc::unbounded_channel();
        let (tx2, mut rx2) = tokio::sync::mpsc::unbounded_channel();
        ps.subscribe(Bytes::from("news.tech"), 1, tx1);
        ps.psubscribe(Bytes::from("news.*"), 2, tx2);
        let count = ps.publish(b"news.tech", b"hello");
        assert_eq!(count, 2);
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }
}
