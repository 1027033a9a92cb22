//! Shared store types
//!
//! Rows are mapped by hand from `sqlx` rows; enums are stored as TEXT and
//! parsed on read so an unknown value surfaces as a decode error instead of
//! silently defaulting.

use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

/// Monotonic per-recipient delivery ordering key, exposed to clients as an
/// opaque cursor string.
pub type Cursor = i64;

// =============================================================================
// Enums
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Human,
    Ai,
    System,
}

impl AgentKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Human => "human",
            AgentKind::Ai => "ai",
            AgentKind::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "human" => Some(Self::Human),
            "ai" => Some(Self::Ai),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Inactive,
}

impl AgentStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicVisibility {
    Public,
    Private,
}

impl TopicVisibility {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TopicVisibility::Public => "public",
            TopicVisibility::Private => "private",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Self::Public),
            "private" => Some(Self::Private),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupMode {
    Fanout,
    Queue,
}

impl GroupMode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            GroupMode::Fanout => "fanout",
            GroupMode::Queue => "queue",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fanout" => Some(Self::Fanout),
            "queue" => Some(Self::Queue),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Leased,
    Delivered,
    Acked,
    Nacked,
    Dead,
}

impl DeliveryStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Leased => "leased",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Acked => "acked",
            DeliveryStatus::Nacked => "nacked",
            DeliveryStatus::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "leased" => Some(Self::Leased),
            "delivered" => Some(Self::Delivered),
            "acked" => Some(Self::Acked),
            "nacked" => Some(Self::Nacked),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }

    /// Statuses a default inbox read returns
    pub const fn is_visible(&self) -> bool {
        matches!(self, Self::Pending | Self::Leased | Self::Delivered)
    }
}

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct AgentRow {
    pub id: String,
    pub name: String,
    pub kind: AgentKind,
    pub status: AgentStatus,
    pub roles: Vec<String>,
    #[serde(skip_serializing)]
    pub credential_hash: String,
    #[serde(skip_serializing)]
    pub fingerprint: Option<String>,
    pub created_at: i64,
    pub last_seen_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopicRow {
    pub id: String,
    pub name: String,
    pub visibility: TopicVisibility,
    pub created_by: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionRow {
    pub agent_id: String,
    pub topic_id: String,
    pub since_cursor: Cursor,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupRow {
    pub id: String,
    pub name: String,
    pub mode: GroupMode,
    pub created_by: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageRow {
    pub id: i64,
    pub from_agent_id: String,
    pub to_agent_id: Option<String>,
    pub topic_id: Option<String>,
    pub group_id: Option<String>,
    pub broadcast: bool,
    pub content_type: String,
    pub content: String,
    pub priority: Priority,
    pub reply_to_id: Option<i64>,
    pub metadata: serde_json::Value,
    pub tags: Vec<String>,
    pub created_at: i64,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryRow {
    pub id: i64,
    pub message_id: i64,
    pub recipient_agent_id: Option<String>,
    pub group_id: Option<String>,
    pub topic_id: Option<String>,
    pub status: DeliveryStatus,
    pub attempts: i64,
    pub claim_token: Option<String>,
    pub lease_expires_at: Option<i64>,
    pub nack_reason: Option<String>,
    pub dead_reason: Option<String>,
    pub last_transition_at: i64,
}

/// A delivery joined with its message, as served by inbox reads and claims
#[derive(Debug, Clone, Serialize)]
pub struct InboxEntry {
    pub delivery: DeliveryRow,
    pub message: MessageRow,
}

/// Input to message persistence; routing already validated by the planner
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub from_agent_id: String,
    pub to_agent_id: Option<String>,
    pub topic_id: Option<String>,
    pub group_id: Option<String>,
    pub broadcast: bool,
    pub content_type: String,
    pub content: String,
    pub priority: Priority,
    pub reply_to_id: Option<i64>,
    pub metadata: serde_json::Value,
    pub tags: Vec<String>,
    pub expires_at: Option<i64>,
}

/// One delivery row to create alongside a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDelivery {
    /// Recipient; None for a queue-group pool row
    pub recipient_agent_id: Option<String>,
    /// Set only for queue-group pool rows
    pub group_id: Option<String>,
    /// Routing shape: the topic this delivery fanned out from
    pub topic_id: Option<String>,
}

// =============================================================================
// Row mapping
// =============================================================================

fn decode_err(index: &str, msg: &str) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: index.to_string(),
        source: msg.into(),
    }
}

fn json_array(raw: &str, index: &str) -> Result<Vec<String>, sqlx::Error> {
    serde_json::from_str(raw).map_err(|_| decode_err(index, "invalid JSON array"))
}

pub(crate) fn agent_from_row(row: &SqliteRow) -> Result<AgentRow, sqlx::Error> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let roles: String = row.try_get("roles")?;
    Ok(AgentRow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        kind: AgentKind::parse(&kind).ok_or_else(|| decode_err("kind", "unknown agent kind"))?,
        status: AgentStatus::parse(&status)
            .ok_or_else(|| decode_err("status", "unknown agent status"))?,
        roles: json_array(&roles, "roles")?,
        credential_hash: row.try_get("credential_hash")?,
        fingerprint: row.try_get("fingerprint")?,
        created_at: row.try_get("created_at")?,
        last_seen_at: row.try_get("last_seen_at")?,
    })
}

pub(crate) fn topic_from_row(row: &SqliteRow) -> Result<TopicRow, sqlx::Error> {
    let visibility: String = row.try_get("visibility")?;
    Ok(TopicRow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        visibility: TopicVisibility::parse(&visibility)
            .ok_or_else(|| decode_err("visibility", "unknown topic visibility"))?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn group_from_row(row: &SqliteRow) -> Result<GroupRow, sqlx::Error> {
    let mode: String = row.try_get("mode")?;
    Ok(GroupRow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        mode: GroupMode::parse(&mode).ok_or_else(|| decode_err("mode", "unknown group mode"))?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Map a message from a row with unprefixed column names
pub(crate) fn message_from_row(row: &SqliteRow) -> Result<MessageRow, sqlx::Error> {
    let priority: String = row.try_get("priority")?;
    let metadata: String = row.try_get("metadata")?;
    let tags: String = row.try_get("tags")?;
    let broadcast: i64 = row.try_get("broadcast")?;
    Ok(MessageRow {
        id: row.try_get("id")?,
        from_agent_id: row.try_get("from_agent_id")?,
        to_agent_id: row.try_get("to_agent_id")?,
        topic_id: row.try_get("topic_id")?,
        group_id: row.try_get("group_id")?,
        broadcast: broadcast != 0,
        content_type: row.try_get("content_type")?,
        content: row.try_get("content")?,
        priority: Priority::parse(&priority)
            .ok_or_else(|| decode_err("priority", "unknown priority"))?,
        reply_to_id: row.try_get("reply_to_id")?,
        metadata: serde_json::from_str(&metadata)
            .map_err(|_| decode_err("metadata", "invalid JSON object"))?,
        tags: json_array(&tags, "tags")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

/// Map a delivery from a row with unprefixed column names
pub(crate) fn delivery_from_row(row: &SqliteRow) -> Result<DeliveryRow, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(DeliveryRow {
        id: row.try_get("id")?,
        message_id: row.try_get("message_id")?,
        recipient_agent_id: row.try_get("recipient_agent_id")?,
        group_id: row.try_get("group_id")?,
        topic_id: row.try_get("topic_id")?,
        status: DeliveryStatus::parse(&status)
            .ok_or_else(|| decode_err("status", "unknown delivery status"))?,
        attempts: row.try_get("attempts")?,
        claim_token: row.try_get("claim_token")?,
        lease_expires_at: row.try_get("lease_expires_at")?,
        nack_reason: row.try_get("nack_reason")?,
        dead_reason: row.try_get("dead_reason")?,
        last_transition_at: row.try_get("last_transition_at")?,
    })
}

/// Map an inbox entry from a delivery-join-message row where delivery
/// columns are aliased `d_*` and message columns `m_*`.
pub(crate) fn inbox_entry_from_row(row: &SqliteRow) -> Result<InboxEntry, sqlx::Error> {
    let d_status: String = row.try_get("d_status")?;
    let m_priority: String = row.try_get("m_priority")?;
    let m_metadata: String = row.try_get("m_metadata")?;
    let m_tags: String = row.try_get("m_tags")?;
    let m_broadcast: i64 = row.try_get("m_broadcast")?;

    let delivery = DeliveryRow {
        id: row.try_get("d_id")?,
        message_id: row.try_get("d_message_id")?,
        recipient_agent_id: row.try_get("d_recipient_agent_id")?,
        group_id: row.try_get("d_group_id")?,
        topic_id: row.try_get("d_topic_id")?,
        status: DeliveryStatus::parse(&d_status)
            .ok_or_else(|| decode_err("d_status", "unknown delivery status"))?,
        attempts: row.try_get("d_attempts")?,
        claim_token: row.try_get("d_claim_token")?,
        lease_expires_at: row.try_get("d_lease_expires_at")?,
        nack_reason: row.try_get("d_nack_reason")?,
        dead_reason: row.try_get("d_dead_reason")?,
        last_transition_at: row.try_get("d_last_transition_at")?,
    };
    let message = MessageRow {
        id: row.try_get("m_id")?,
        from_agent_id: row.try_get("m_from_agent_id")?,
        to_agent_id: row.try_get("m_to_agent_id")?,
        topic_id: row.try_get("m_topic_id")?,
        group_id: row.try_get("m_group_id")?,
        broadcast: m_broadcast != 0,
        content_type: row.try_get("m_content_type")?,
        content: row.try_get("m_content")?,
        priority: Priority::parse(&m_priority)
            .ok_or_else(|| decode_err("m_priority", "unknown priority"))?,
        reply_to_id: row.try_get("m_reply_to_id")?,
        metadata: serde_json::from_str(&m_metadata)
            .map_err(|_| decode_err("m_metadata", "invalid JSON object"))?,
        tags: json_array(&m_tags, "m_tags")?,
        created_at: row.try_get("m_created_at")?,
        expires_at: row.try_get("m_expires_at")?,
    };
    Ok(InboxEntry { delivery, message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_round_trips() {
        for kind in [AgentKind::Human, AgentKind::Ai, AgentKind::System] {
            assert_eq!(AgentKind::parse(kind.as_str()), Some(kind));
        }
        for status in [
            DeliveryStatus::Pending,
            DeliveryStatus::Leased,
            DeliveryStatus::Delivered,
            DeliveryStatus::Acked,
            DeliveryStatus::Nacked,
            DeliveryStatus::Dead,
        ] {
            assert_eq!(DeliveryStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(Priority::parse("bogus"), None);
        assert_eq!(GroupMode::parse("queue"), Some(GroupMode::Queue));
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn test_visible_statuses() {
        assert!(DeliveryStatus::Pending.is_visible());
        assert!(DeliveryStatus::Leased.is_visible());
        assert!(DeliveryStatus::Delivered.is_visible());
        assert!(!DeliveryStatus::Acked.is_visible());
        assert!(!DeliveryStatus::Dead.is_visible());
    }

    #[test]
    fn test_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&DeliveryStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(
            serde_json::from_str::<Priority>("\"critical\"").unwrap(),
            Priority::Critical
        );
    }

    #[test]
    fn test_agent_row_hides_credentials() {
        let agent = AgentRow {
            id: "a1".into(),
            name: "worker".into(),
            kind: AgentKind::Ai,
            status: AgentStatus::Active,
            roles: vec!["agent".into()],
            credential_hash: "secret-hash".into(),
            fingerprint: Some("fp".into()),
            created_at: 0,
            last_seen_at: None,
        };
        let json = serde_json::to_string(&agent).unwrap();
        assert!(!json.contains("secret-hash"));
        assert!(!json.contains("fingerprint"));
    }
}
