//! Routing and delivery planning
//!
//! Turns a validated publish request into the message row and its delivery
//! set. All size, target, and recipient checks happen here, before
//! persistence; the store then writes everything or nothing.

use sqlx::SqlitePool;

use super::BrokerError;
use crate::bus::DeliveryHint;
use crate::core::config::BrokerConfig;
use crate::core::constants::MAX_TAGS;
use crate::data::repositories::{agents, groups, messages, now_ms, topics};
use crate::data::types::{
    AgentStatus, DeliveryRow, GroupMode, NewMessage, PlannedDelivery, Priority, TopicVisibility,
};

/// A publish request as the API layer hands it over
///
/// Targets accept an id or a name; exactly one must be set. `broadcast`
/// counts as a target.
#[derive(Debug, Clone, Default)]
pub struct PublishSpec {
    pub to_agent: Option<String>,
    pub topic: Option<String>,
    pub to_group: Option<String>,
    pub broadcast: bool,
    pub content_type: Option<String>,
    pub content: String,
    pub priority: Priority,
    pub reply_to_id: Option<i64>,
    pub metadata: serde_json::Value,
    pub tags: Vec<String>,
    pub ttl_secs: Option<u64>,
}

/// The planned outcome: what to persist and whom to notify
#[derive(Debug)]
pub struct Plan {
    pub message: NewMessage,
    pub deliveries: Vec<PlannedDelivery>,
}

async fn resolve_agent(
    pool: &SqlitePool,
    id_or_name: &str,
) -> Result<Option<crate::data::types::AgentRow>, BrokerError> {
    if let Some(agent) = agents::get_agent(pool, id_or_name).await? {
        return Ok(Some(agent));
    }
    Ok(agents::get_by_name(pool, id_or_name).await?)
}

async fn resolve_topic(
    pool: &SqlitePool,
    id_or_name: &str,
) -> Result<Option<crate::data::types::TopicRow>, BrokerError> {
    if let Some(topic) = topics::get_topic(pool, id_or_name).await? {
        return Ok(Some(topic));
    }
    Ok(topics::get_by_name(pool, id_or_name).await?)
}

async fn resolve_group(
    pool: &SqlitePool,
    id_or_name: &str,
) -> Result<Option<crate::data::types::GroupRow>, BrokerError> {
    if let Some(group) = groups::get_group(pool, id_or_name).await? {
        return Ok(Some(group));
    }
    Ok(groups::get_by_name(pool, id_or_name).await?)
}

/// Validate a publish request and compute its delivery set
pub async fn plan_message(
    pool: &SqlitePool,
    config: &BrokerConfig,
    broadcast_topic_id: &str,
    from_agent_id: &str,
    spec: &PublishSpec,
) -> Result<Plan, BrokerError> {
    let target_count = spec.to_agent.is_some() as u8
        + spec.topic.is_some() as u8
        + spec.to_group.is_some() as u8
        + spec.broadcast as u8;
    if target_count != 1 {
        return Err(BrokerError::validation(
            "exactly one of to_agent, topic, to_group, broadcast must be set",
        ));
    }

    if spec.content.len() > config.max_payload_bytes {
        return Err(BrokerError::validation(format!(
            "content exceeds maximum payload size of {} bytes",
            config.max_payload_bytes
        )));
    }
    if spec.tags.len() > MAX_TAGS {
        return Err(BrokerError::validation(format!(
            "at most {} tags allowed",
            MAX_TAGS
        )));
    }
    if !spec.metadata.is_object() {
        return Err(BrokerError::validation("metadata must be a JSON object"));
    }

    if let Some(reply_to) = spec.reply_to_id
        && messages::get_message(pool, reply_to).await?.is_none()
    {
        return Err(BrokerError::validation("reply_to_id references no message"));
    }

    let mut message = NewMessage {
        from_agent_id: from_agent_id.to_string(),
        to_agent_id: None,
        topic_id: None,
        group_id: None,
        broadcast: spec.broadcast,
        content_type: spec
            .content_type
            .clone()
            .unwrap_or_else(|| "text/plain".to_string()),
        content: spec.content.clone(),
        priority: spec.priority,
        reply_to_id: spec.reply_to_id,
        metadata: spec.metadata.clone(),
        tags: spec.tags.clone(),
        expires_at: spec.ttl_secs.map(|ttl| now_ms() + (ttl as i64) * 1000),
    };

    let deliveries = if let Some(ref target) = spec.to_agent {
        let recipient = resolve_agent(pool, target)
            .await?
            .ok_or_else(|| BrokerError::not_found(format!("agent '{}' not found", target)))?;
        if recipient.status != AgentStatus::Active {
            return Err(BrokerError::not_found(format!(
                "agent '{}' is inactive",
                target
            )));
        }
        message.to_agent_id = Some(recipient.id.clone());
        vec![PlannedDelivery {
            recipient_agent_id: Some(recipient.id),
            group_id: None,
            topic_id: None,
        }]
    } else if let Some(ref target) = spec.topic {
        let topic = resolve_topic(pool, target)
            .await?
            .ok_or_else(|| BrokerError::not_found(format!("topic '{}' not found", target)))?;
        if topic.visibility == TopicVisibility::Private
            && topic.created_by.as_deref() != Some(from_agent_id)
            && !topics::is_subscribed(pool, from_agent_id, &topic.id).await?
        {
            return Err(BrokerError::forbidden("topic is private"));
        }
        message.topic_id = Some(topic.id.clone());
        // Publish-time snapshot: later subscribers do not see this message
        topics::subscriber_ids(pool, &topic.id)
            .await?
            .into_iter()
            .map(|agent_id| PlannedDelivery {
                recipient_agent_id: Some(agent_id),
                group_id: None,
                topic_id: Some(topic.id.clone()),
            })
            .collect()
    } else if let Some(ref target) = spec.to_group {
        let group = resolve_group(pool, target)
            .await?
            .ok_or_else(|| BrokerError::not_found(format!("group '{}' not found", target)))?;
        message.group_id = Some(group.id.clone());
        match group.mode {
            GroupMode::Fanout => groups::member_ids(pool, &group.id)
                .await?
                .into_iter()
                .map(|agent_id| PlannedDelivery {
                    recipient_agent_id: Some(agent_id),
                    group_id: None,
                    topic_id: None,
                })
                .collect(),
            // One pool row; the claiming member becomes the recipient
            GroupMode::Queue => vec![PlannedDelivery {
                recipient_agent_id: None,
                group_id: Some(group.id.clone()),
                topic_id: None,
            }],
        }
    } else {
        // Broadcast rides the reserved topic's subscriber snapshot
        topics::subscriber_ids(pool, broadcast_topic_id)
            .await?
            .into_iter()
            .filter(|agent_id| agent_id != from_agent_id)
            .map(|agent_id| PlannedDelivery {
                recipient_agent_id: Some(agent_id),
                group_id: None,
                topic_id: Some(broadcast_topic_id.to_string()),
            })
            .collect()
    };

    Ok(Plan {
        message,
        deliveries,
    })
}

/// Hints for the bus, one per persisted delivery
pub fn hints_for(deliveries: &[DeliveryRow]) -> Vec<DeliveryHint> {
    deliveries
        .iter()
        .map(|d| DeliveryHint {
            message_id: d.message_id,
            delivery_id: d.id,
            recipient_agent_id: d.recipient_agent_id.clone(),
            topic_id: d.topic_id.clone(),
        })
        .collect()
}
