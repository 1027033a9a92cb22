//! Broker service façade

use std::sync::Arc;
use std::time::Duration;

use crate::bus::MailboxBus;
use crate::core::config::BrokerConfig;
use crate::data::repositories::{deliveries, groups, messages, topics};
use crate::data::repositories::deliveries::InboxFilter;
use crate::data::types::{Cursor, InboxEntry, MessageRow};
use crate::data::StoreService;

use super::planner::{self, PublishSpec};
use super::BrokerError;

/// The broker façade: publish, claim, ack/nack/renew, inbox reads
///
/// Owns no state of its own; the store is the source of truth, the bus is
/// the notifier.
pub struct BrokerService {
    store: Arc<StoreService>,
    bus: Arc<MailboxBus>,
    config: BrokerConfig,
    broadcast_topic_id: String,
}

impl BrokerService {
    /// Build the service, ensuring the reserved broadcast topic exists
    pub async fn init(
        store: Arc<StoreService>,
        bus: Arc<MailboxBus>,
        config: BrokerConfig,
    ) -> Result<Self, BrokerError> {
        let broadcast = topics::ensure_broadcast_topic(store.pool()).await?;
        Ok(Self {
            store,
            bus,
            config,
            broadcast_topic_id: broadcast.id,
        })
    }

    pub fn store(&self) -> &Arc<StoreService> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<MailboxBus> {
        &self.bus
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn broadcast_topic_id(&self) -> &str {
        &self.broadcast_topic_id
    }

    /// Publish a message: validate, plan, persist atomically, then notify
    ///
    /// Bus notification failures are invisible by design; consumers
    /// reconverge through cursored reads.
    pub async fn publish(
        &self,
        from_agent_id: &str,
        spec: &PublishSpec,
    ) -> Result<(MessageRow, usize), BrokerError> {
        let plan = planner::plan_message(
            self.store.pool(),
            &self.config,
            &self.broadcast_topic_id,
            from_agent_id,
            spec,
        )
        .await?;

        let (message, rows) = messages::insert_message_with_deliveries(
            self.store.pool(),
            &plan.message,
            &plan.deliveries,
        )
        .await?;

        self.bus.publish(&planner::hints_for(&rows));

        tracing::debug!(
            message_id = message.id,
            deliveries = rows.len(),
            from = %from_agent_id,
            "Message published"
        );

        Ok((message, rows.len()))
    }

    /// Clamp a requested lease to `[1s, max_lease]`, defaulting when absent
    pub fn clamp_lease(&self, requested_secs: Option<u64>) -> Duration {
        match requested_secs {
            None => self.config.default_lease,
            Some(secs) => Duration::from_secs(secs.max(1)).min(self.config.max_lease),
        }
    }

    /// Claim up to `limit` pending deliveries with an exclusive lease
    pub async fn claim(
        &self,
        agent_id: &str,
        filter: &InboxFilter,
        limit: u32,
        lease_secs: Option<u64>,
    ) -> Result<Vec<InboxEntry>, BrokerError> {
        let lease = self.clamp_lease(lease_secs);
        let queue_groups =
            groups::queue_group_ids_for_member(self.store.pool(), agent_id).await?;
        let claimed = deliveries::claim_pending(
            self.store.pool(),
            agent_id,
            &queue_groups,
            filter,
            limit,
            lease.as_millis() as i64,
            self.config.max_attempts,
        )
        .await?;

        if !claimed.is_empty() {
            tracing::debug!(agent = %agent_id, count = claimed.len(), "Deliveries claimed");
        }
        Ok(claimed)
    }

    pub async fn ack(&self, delivery_id: i64, claim_token: &str) -> Result<(), BrokerError> {
        deliveries::ack(self.store.pool(), delivery_id, claim_token).await?;
        Ok(())
    }

    pub async fn nack(
        &self,
        delivery_id: i64,
        claim_token: &str,
        reason: Option<&str>,
    ) -> Result<(), BrokerError> {
        deliveries::nack(self.store.pool(), delivery_id, claim_token, reason).await?;
        Ok(())
    }

    /// Extend a lease; returns the new expiry in epoch milliseconds
    pub async fn renew(
        &self,
        delivery_id: i64,
        claim_token: &str,
        extension_secs: Option<u64>,
    ) -> Result<i64, BrokerError> {
        let extension = self.clamp_lease(extension_secs);
        let expiry = deliveries::renew(
            self.store.pool(),
            delivery_id,
            claim_token,
            extension.as_millis() as i64,
            self.config.max_lease.as_millis() as i64,
        )
        .await?;
        Ok(expiry)
    }

    /// Bulk ack by explicit ids
    pub async fn bulk_ack_ids(&self, agent_id: &str, ids: &[i64]) -> Result<u64, BrokerError> {
        Ok(deliveries::bulk_ack_ids(self.store.pool(), agent_id, ids).await?)
    }

    /// Bulk ack everything up to and including a cursor
    pub async fn bulk_ack_up_to(&self, agent_id: &str, up_to: Cursor) -> Result<u64, BrokerError> {
        Ok(deliveries::bulk_ack_up_to(self.store.pool(), agent_id, up_to).await?)
    }

    /// Fetch one message, enforcing sender-or-recipient visibility
    pub async fn get_message_for(
        &self,
        message_id: i64,
        agent_id: &str,
        is_admin: bool,
    ) -> Result<MessageRow, BrokerError> {
        let message = messages::get_message(self.store.pool(), message_id)
            .await?
            .ok_or_else(|| BrokerError::not_found("message not found"))?;
        if !is_admin
            && !messages::agent_can_see(self.store.pool(), message_id, agent_id).await?
        {
            // hide existence from non-participants
            return Err(BrokerError::not_found("message not found"));
        }
        Ok(message)
    }

    /// Mark a delivery observed over a stream without a claim
    pub async fn mark_delivered(&self, delivery_id: i64) -> Result<bool, BrokerError> {
        Ok(deliveries::mark_delivered(self.store.pool(), delivery_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::repositories::agents;
    use crate::data::types::{AgentKind, DeliveryStatus};

    pub(crate) async fn test_broker() -> BrokerService {
        let store = Arc::new(StoreService::open_in_memory().await.unwrap());
        let bus = Arc::new(MailboxBus::new());
        BrokerService::init(store, bus, BrokerConfig::default())
            .await
            .unwrap()
    }

    async fn seed_agent(broker: &BrokerService, name: &str) -> String {
        let agent = agents::create_agent(
            broker.store().pool(),
            name,
            AgentKind::Ai,
            &[],
            &format!("h-{name}"),
            None,
        )
        .await
        .unwrap();
        topics::subscribe(
            broker.store().pool(),
            &agent.id,
            broker.broadcast_topic_id(),
            0,
        )
        .await
        .unwrap();
        agent.id
    }

    fn direct_spec(to: &str, content: &str) -> PublishSpec {
        PublishSpec {
            to_agent: Some(to.to_string()),
            content: content.to_string(),
            metadata: serde_json::json!({}),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_publish_claim_ack_round_trip() {
        let broker = test_broker().await;
        let alice = seed_agent(&broker, "alice").await;
        let bob = seed_agent(&broker, "bob").await;

        let (message, count) = broker
            .publish(&alice, &direct_spec("bob", "x"))
            .await
            .unwrap();
        assert_eq!(count, 1);

        let claimed = broker
            .claim(&bob, &InboxFilter::default(), 1, Some(60))
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].message.id, message.id);
        let token = claimed[0].delivery.claim_token.clone().unwrap();

        broker.ack(claimed[0].delivery.id, &token).await.unwrap();

        let all = InboxFilter {
            include_all: true,
            ..Default::default()
        };
        let (entries, _, _) =
            deliveries::list_inbox(broker.store().pool(), &bob, &all, 0, 10)
                .await
                .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].delivery.status, DeliveryStatus::Acked);
    }

    #[tokio::test]
    async fn test_publish_notifies_mailbox() {
        let broker = test_broker().await;
        let alice = seed_agent(&broker, "alice").await;
        let bob = seed_agent(&broker, "bob").await;

        let mut rx = broker.bus().subscribe_mailbox(&bob);
        let (message, _) = broker
            .publish(&alice, &direct_spec("bob", "x"))
            .await
            .unwrap();

        let hint = rx.recv().await.unwrap();
        assert_eq!(hint.message_id, message.id);
        assert_eq!(hint.recipient_agent_id.as_deref(), Some(bob.as_str()));
    }

    #[tokio::test]
    async fn test_publish_failure_persists_nothing() {
        let broker = test_broker().await;
        let alice = seed_agent(&broker, "alice").await;

        let err = broker
            .publish(&alice, &direct_spec("ghost", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::NotFound(_)));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(broker.store().pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_lease_clamping() {
        let broker = test_broker().await;
        assert_eq!(broker.clamp_lease(None), broker.config().default_lease);
        assert_eq!(broker.clamp_lease(Some(0)), Duration::from_secs(1));
        assert_eq!(
            broker.clamp_lease(Some(999_999_999)),
            broker.config().max_lease
        );
    }

    #[tokio::test]
    async fn test_broadcast_fan_out_and_exclusion() {
        let broker = test_broker().await;
        let admin = seed_agent(&broker, "admin").await;
        let a = seed_agent(&broker, "worker-a").await;
        let b = seed_agent(&broker, "worker-b").await;

        let spec = PublishSpec {
            broadcast: true,
            content: "checkpoint".to_string(),
            metadata: serde_json::json!({}),
            ..Default::default()
        };
        let (_, count) = broker.publish(&admin, &spec).await.unwrap();
        assert_eq!(count, 2);

        for agent in [&a, &b] {
            let (entries, _, _) = deliveries::list_inbox(
                broker.store().pool(),
                agent,
                &InboxFilter::default(),
                0,
                10,
            )
            .await
            .unwrap();
            assert_eq!(entries.len(), 1);
            assert_eq!(
                entries[0].delivery.topic_id.as_deref(),
                Some(broker.broadcast_topic_id())
            );
        }

        // the sender receives nothing
        let (entries, _, _) = deliveries::list_inbox(
            broker.store().pool(),
            &admin,
            &InboxFilter::default(),
            0,
            10,
        )
        .await
        .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_get_message_visibility() {
        let broker = test_broker().await;
        let alice = seed_agent(&broker, "alice").await;
        let bob = seed_agent(&broker, "bob").await;
        let carol = seed_agent(&broker, "carol").await;

        let (message, _) = broker
            .publish(&alice, &direct_spec("bob", "x"))
            .await
            .unwrap();

        broker.get_message_for(message.id, &alice, false).await.unwrap();
        broker.get_message_for(message.id, &bob, false).await.unwrap();
        let err = broker
            .get_message_for(message.id, &carol, false)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::NotFound(_)));
        // admins bypass participant checks
        broker.get_message_for(message.id, &carol, true).await.unwrap();
    }
}
