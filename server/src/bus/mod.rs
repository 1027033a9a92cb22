//! In-memory fan-out bus
//!
//! Per-agent mailbox channels and per-topic channels carrying lightweight
//! hints about newly persisted deliveries. The bus is a notifier, never the
//! source of truth: writers never block, a hint that finds no live receiver
//! is dropped and counted, and subscribers that miss hints (lag, reconnect)
//! recover by re-reading the inbox by cursor.
//!
//! Subscribe/unsubscribe take the write lock; publish holds the read lock
//! and performs non-blocking sends. No lock is held across an await.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::constants::{MAILBOX_CHANNEL_CAPACITY, TOPIC_CHANNEL_CAPACITY};

/// Lightweight notification: message id plus routing shape
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryHint {
    pub message_id: i64,
    pub delivery_id: i64,
    /// Recipient mailbox this hint targets, if any
    pub recipient_agent_id: Option<String>,
    /// Topic channel this hint targets, if any
    pub topic_id: Option<String>,
}

struct Channel {
    sender: broadcast::Sender<DeliveryHint>,
    dropped: AtomicU64,
}

impl Channel {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            dropped: AtomicU64::new(0),
        }
    }

    /// Non-blocking send; a hint with no live receiver is dropped
    fn send(&self, hint: DeliveryHint) {
        if self.sender.send(hint).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Per-topic statistics
#[derive(Debug, Clone, Serialize)]
pub struct TopicStats {
    pub topic_id: String,
    pub subscribers: usize,
    pub buffered: usize,
    pub dropped: u64,
}

/// Mailbox and topic channel registry
pub struct MailboxBus {
    mailboxes: RwLock<FxHashMap<String, Arc<Channel>>>,
    topics: RwLock<FxHashMap<String, Arc<Channel>>>,
}

impl Default for MailboxBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MailboxBus {
    pub fn new() -> Self {
        Self {
            mailboxes: RwLock::new(FxHashMap::default()),
            topics: RwLock::new(FxHashMap::default()),
        }
    }

    fn channel(
        map: &RwLock<FxHashMap<String, Arc<Channel>>>,
        key: &str,
        capacity: usize,
    ) -> Arc<Channel> {
        {
            let read = map.read();
            if let Some(channel) = read.get(key) {
                return Arc::clone(channel);
            }
        }
        let mut write = map.write();
        Arc::clone(
            write
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Channel::new(capacity))),
        )
    }

    /// Subscribe to an agent's mailbox channel
    ///
    /// At most one channel exists per agent; every subscriber of the same
    /// mailbox sees every hint.
    pub fn subscribe_mailbox(&self, agent_id: &str) -> broadcast::Receiver<DeliveryHint> {
        Self::channel(&self.mailboxes, agent_id, MAILBOX_CHANNEL_CAPACITY).sender.subscribe()
    }

    /// Subscribe to a topic channel
    pub fn subscribe_topic(&self, topic_id: &str) -> broadcast::Receiver<DeliveryHint> {
        Self::channel(&self.topics, topic_id, TOPIC_CHANNEL_CAPACITY).sender.subscribe()
    }

    /// Publish hints for newly persisted deliveries
    ///
    /// Routes each hint to the matching mailbox channel and, when the
    /// delivery fanned out from a topic, to that topic's channel. Failures
    /// are counted, never surfaced: correctness rests on cursored reads.
    pub fn publish(&self, hints: &[DeliveryHint]) {
        {
            let mailboxes = self.mailboxes.read();
            for hint in hints {
                if let Some(agent_id) = &hint.recipient_agent_id
                    && let Some(channel) = mailboxes.get(agent_id)
                {
                    channel.send(hint.clone());
                }
            }
        }
        {
            let topics = self.topics.read();
            for hint in hints {
                if let Some(topic_id) = &hint.topic_id
                    && let Some(channel) = topics.get(topic_id)
                {
                    channel.send(hint.clone());
                }
            }
        }
    }

    /// Statistics for one topic channel
    pub fn topic_stats(&self, topic_id: &str) -> Option<TopicStats> {
        let topics = self.topics.read();
        topics.get(topic_id).map(|channel| TopicStats {
            topic_id: topic_id.to_string(),
            subscribers: channel.sender.receiver_count(),
            buffered: channel.sender.len(),
            dropped: channel.dropped.load(Ordering::Relaxed),
        })
    }

    /// Statistics for every live topic channel
    pub fn all_topic_stats(&self) -> Vec<TopicStats> {
        let topics = self.topics.read();
        let mut stats: Vec<TopicStats> = topics
            .iter()
            .map(|(topic_id, channel)| TopicStats {
                topic_id: topic_id.clone(),
                subscribers: channel.sender.receiver_count(),
                buffered: channel.sender.len(),
                dropped: channel.dropped.load(Ordering::Relaxed),
            })
            .collect();
        stats.sort_by(|a, b| a.topic_id.cmp(&b.topic_id));
        stats
    }

    /// Count of live mailbox channels
    pub fn mailbox_count(&self) -> usize {
        self.mailboxes.read().len()
    }

    /// Drop channels nobody listens to anymore (sweeper maintenance)
    pub fn reap_idle(&self) -> usize {
        let mut reaped = 0;
        {
            let mut mailboxes = self.mailboxes.write();
            let before = mailboxes.len();
            mailboxes.retain(|_, channel| channel.sender.receiver_count() > 0);
            reaped += before - mailboxes.len();
        }
        {
            let mut topics = self.topics.write();
            let before = topics.len();
            topics.retain(|_, channel| channel.sender.receiver_count() > 0);
            reaped += before - topics.len();
        }
        reaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hint_for_agent(agent_id: &str, delivery_id: i64) -> DeliveryHint {
        DeliveryHint {
            message_id: 1,
            delivery_id,
            recipient_agent_id: Some(agent_id.to_string()),
            topic_id: None,
        }
    }

    fn hint_for_topic(topic_id: &str, delivery_id: i64) -> DeliveryHint {
        DeliveryHint {
            message_id: 1,
            delivery_id,
            recipient_agent_id: None,
            topic_id: Some(topic_id.to_string()),
        }
    }

    #[tokio::test]
    async fn test_mailbox_receives_hint() {
        let bus = MailboxBus::new();
        let mut rx = bus.subscribe_mailbox("bob");

        bus.publish(&[hint_for_agent("bob", 7)]);

        let hint = rx.recv().await.unwrap();
        assert_eq!(hint.delivery_id, 7);
        assert_eq!(hint.recipient_agent_id.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_hint_does_not_cross_mailboxes() {
        let bus = MailboxBus::new();
        let mut bob = bus.subscribe_mailbox("bob");
        let mut carol = bus.subscribe_mailbox("carol");

        bus.publish(&[hint_for_agent("bob", 1)]);

        assert_eq!(bob.recv().await.unwrap().delivery_id, 1);
        assert!(matches!(
            carol.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_topic_fanout_to_all_subscribers() {
        let bus = MailboxBus::new();
        let mut rx1 = bus.subscribe_topic("t1");
        let mut rx2 = bus.subscribe_topic("t1");

        bus.publish(&[hint_for_topic("t1", 3)]);

        assert_eq!(rx1.recv().await.unwrap().delivery_id, 3);
        assert_eq!(rx2.recv().await.unwrap().delivery_id, 3);
    }

    #[test]
    fn test_publish_without_subscribers_counts_drops() {
        let bus = MailboxBus::new();
        // create the channel, then drop the only receiver
        let rx = bus.subscribe_topic("t1");
        drop(rx);

        bus.publish(&[hint_for_topic("t1", 1)]);
        bus.publish(&[hint_for_topic("t1", 2)]);

        let stats = bus.topic_stats("t1").unwrap();
        assert_eq!(stats.subscribers, 0);
        assert_eq!(stats.dropped, 2);
    }

    #[test]
    fn test_publish_to_unknown_channel_is_silent() {
        let bus = MailboxBus::new();
        // no channel exists; nothing to do, nothing to count
        bus.publish(&[hint_for_agent("ghost", 1), hint_for_topic("ghost", 2)]);
        assert!(bus.topic_stats("ghost").is_none());
    }

    #[tokio::test]
    async fn test_topic_stats_subscribers_and_buffered() {
        let bus = MailboxBus::new();
        let _rx = bus.subscribe_topic("t1");
        let _rx2 = bus.subscribe_topic("t1");

        bus.publish(&[hint_for_topic("t1", 1)]);

        let stats = bus.topic_stats("t1").unwrap();
        assert_eq!(stats.subscribers, 2);
        assert_eq!(stats.buffered, 1);
        assert_eq!(stats.dropped, 0);
    }

    #[tokio::test]
    async fn test_reap_idle_removes_dead_channels() {
        let bus = MailboxBus::new();
        let rx = bus.subscribe_mailbox("bob");
        let _held = bus.subscribe_topic("t1");
        drop(rx);

        assert_eq!(bus.reap_idle(), 1);
        assert_eq!(bus.mailbox_count(), 0);
        assert!(bus.topic_stats("t1").is_some());
    }

    #[tokio::test]
    async fn test_lagged_receiver_recovers_with_gap() {
        let bus = MailboxBus::new();
        let mut rx = bus.subscribe_mailbox("bob");

        // overflow the bounded channel
        for i in 0..(MAILBOX_CHANNEL_CAPACITY as i64 + 10) {
            bus.publish(&[hint_for_agent("bob", i)]);
        }

        // first recv reports the lag; the subscriber is expected to fall
        // back to a cursored inbox read
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => assert!(n >= 10),
            other => panic!("expected lag, got {:?}", other),
        }
    }
}
