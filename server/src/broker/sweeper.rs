//! Background sweeper
//!
//! A single task per process. Each tick expires leases (re-arm or
//! dead-letter), purges TTL-expired messages, and reaps idle bus channels.
//! Ticks run strictly sequentially; a slow tick delays the next one rather
//! than overlapping it. Errors are logged and the next tick retries.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::bus::MailboxBus;
use crate::core::config::BrokerConfig;
use crate::data::repositories::{deliveries, now_ms};
use crate::data::StoreService;

/// Spawn the sweeper task
pub fn start(
    store: Arc<StoreService>,
    bus: Arc<MailboxBus>,
    config: BrokerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.sweep_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(
            interval_secs = config.sweep_interval.as_secs(),
            "Sweeper started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::debug!("Sweeper shutting down");
                        break;
                    }
                }
                _ = interval.tick() => {
                    tick(&store, &bus, &config).await;
                }
            }
        }
    })
}

async fn tick(store: &StoreService, bus: &MailboxBus, config: &BrokerConfig) {
    let now = now_ms();

    match deliveries::sweep_leases(store.pool(), now, config.max_attempts).await {
        Ok((redelivered, dead)) => {
            if redelivered > 0 || dead > 0 {
                tracing::info!(redelivered, dead, "Expired leases swept");
            }
        }
        Err(e) => tracing::warn!(error = %e, "Lease sweep failed"),
    }

    match deliveries::purge_expired(store.pool(), now).await {
        Ok(purged) if purged > 0 => tracing::info!(purged, "Expired messages purged"),
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Message purge failed"),
    }

    let reaped = bus.reap_idle();
    if reaped > 0 {
        tracing::debug!(reaped, "Idle bus channels reaped");
    }
    for stats in bus.all_topic_stats() {
        tracing::trace!(
            topic = %stats.topic_id,
            subscribers = stats.subscribers,
            buffered = stats.buffered,
            dropped = stats.dropped,
            "Topic stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::data::repositories::deliveries::InboxFilter;
    use crate::data::repositories::{agents, messages};
    use crate::data::types::{AgentKind, DeliveryStatus, NewMessage, PlannedDelivery, Priority};

    async fn seed_store() -> Arc<StoreService> {
        Arc::new(StoreService::open_in_memory().await.unwrap())
    }

    async fn seed_leased_delivery(store: &StoreService, lease_ms: i64) -> i64 {
        let alice = agents::create_agent(store.pool(), "alice", AgentKind::Ai, &[], "h1", None)
            .await
            .unwrap();
        let bob = agents::create_agent(store.pool(), "bob", AgentKind::Ai, &[], "h2", None)
            .await
            .unwrap();
        let msg = NewMessage {
            from_agent_id: alice.id.clone(),
            to_agent_id: Some(bob.id.clone()),
            topic_id: None,
            group_id: None,
            broadcast: false,
            content_type: "text/plain".to_string(),
            content: "x".to_string(),
            priority: Priority::Normal,
            reply_to_id: None,
            metadata: serde_json::json!({}),
            tags: vec![],
            expires_at: None,
        };
        let plan = vec![PlannedDelivery {
            recipient_agent_id: Some(bob.id.clone()),
            group_id: None,
            topic_id: None,
        }];
        let (_, rows) = messages::insert_message_with_deliveries(store.pool(), &msg, &plan)
            .await
            .unwrap();
        deliveries::claim_pending(
            store.pool(),
            &bob.id,
            &[],
            &InboxFilter::default(),
            1,
            lease_ms,
            5,
        )
        .await
        .unwrap();
        rows[0].id
    }

    #[tokio::test]
    async fn test_sweeper_rearms_expired_lease() {
        let store = seed_store().await;
        let bus = Arc::new(MailboxBus::new());
        let config = BrokerConfig {
            sweep_interval: Duration::from_millis(30),
            ..Default::default()
        };
        let delivery_id = seed_leased_delivery(&store, 10).await;

        let (tx, rx) = watch::channel(false);
        let handle = start(Arc::clone(&store), bus, config, rx);

        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = tx.send(true);
        handle.await.unwrap();

        let row = deliveries::get_delivery(store.pool(), delivery_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, DeliveryStatus::Pending);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let store = seed_store().await;
        let bus = Arc::new(MailboxBus::new());
        let (tx, rx) = watch::channel(false);
        let handle = start(store, bus, BrokerConfig::default(), rx);

        let _ = tx.send(true);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
