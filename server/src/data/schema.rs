//! SQLite schema definitions
//!
//! Initial schema with all tables. No migrations needed for first version.

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Complete schema SQL
pub const SCHEMA: &str = r#"
-- =============================================================================
-- Infrastructure: Schema version tracking
-- =============================================================================
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    applied_at INTEGER NOT NULL,
    description TEXT
);

CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at INTEGER NOT NULL,
    checksum TEXT NOT NULL,
    execution_time_ms INTEGER,
    success INTEGER NOT NULL DEFAULT 1
);

-- =============================================================================
-- 1. Agents
-- =============================================================================
CREATE TABLE IF NOT EXISTS agents (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE CHECK(length(name) >= 1 AND length(name) <= 100),
    kind TEXT NOT NULL DEFAULT 'ai' CHECK(kind IN ('human', 'ai', 'system')),
    status TEXT NOT NULL DEFAULT 'active' CHECK(status IN ('active', 'inactive')),
    roles TEXT NOT NULL DEFAULT '[]',
    credential_hash TEXT NOT NULL,
    fingerprint TEXT UNIQUE,
    created_at INTEGER NOT NULL,
    last_seen_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_agents_credential ON agents(credential_hash);
CREATE INDEX IF NOT EXISTS idx_agents_status ON agents(status);

-- =============================================================================
-- 2. Topics and subscriptions
-- =============================================================================
CREATE TABLE IF NOT EXISTS topics (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE CHECK(length(name) >= 1 AND length(name) <= 100),
    visibility TEXT NOT NULL DEFAULT 'public' CHECK(visibility IN ('public', 'private')),
    created_by TEXT REFERENCES agents(id) ON DELETE SET NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS topic_subscriptions (
    agent_id TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
    topic_id TEXT NOT NULL REFERENCES topics(id) ON DELETE CASCADE,
    since_cursor INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (agent_id, topic_id)
);

CREATE INDEX IF NOT EXISTS idx_topic_subs_topic ON topic_subscriptions(topic_id);

-- =============================================================================
-- 3. Groups and members
-- =============================================================================
CREATE TABLE IF NOT EXISTS groups (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE CHECK(length(name) >= 1 AND length(name) <= 100),
    mode TEXT NOT NULL DEFAULT 'fanout' CHECK(mode IN ('fanout', 'queue')),
    created_by TEXT REFERENCES agents(id) ON DELETE SET NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    agent_id TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (group_id, agent_id)
);

CREATE INDEX IF NOT EXISTS idx_group_members_agent ON group_members(agent_id);

-- =============================================================================
-- 4. Messages
-- =============================================================================
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    from_agent_id TEXT NOT NULL REFERENCES agents(id),
    to_agent_id TEXT REFERENCES agents(id),
    topic_id TEXT REFERENCES topics(id),
    group_id TEXT REFERENCES groups(id),
    broadcast INTEGER NOT NULL DEFAULT 0,
    content_type TEXT NOT NULL DEFAULT 'text/plain',
    content TEXT NOT NULL,
    priority TEXT NOT NULL DEFAULT 'normal' CHECK(priority IN ('low', 'normal', 'high', 'critical')),
    reply_to_id INTEGER REFERENCES messages(id) ON DELETE SET NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    tags TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL,
    expires_at INTEGER,
    -- exactly one routing target
    CHECK((to_agent_id IS NOT NULL) + (topic_id IS NOT NULL) + (group_id IS NOT NULL) + (broadcast != 0) = 1),
    CHECK(expires_at IS NULL OR expires_at >= created_at)
);

CREATE INDEX IF NOT EXISTS idx_messages_expires ON messages(expires_at) WHERE expires_at IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(from_agent_id);

-- =============================================================================
-- 5. Deliveries
-- =============================================================================
-- The rowid is the monotonic ordering key backing cursors. A row with a
-- NULL recipient and a group_id is a queue-group pool row; claiming stamps
-- the winning member as recipient.
CREATE TABLE IF NOT EXISTS deliveries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    recipient_agent_id TEXT REFERENCES agents(id) ON DELETE CASCADE,
    group_id TEXT REFERENCES groups(id) ON DELETE CASCADE,
    topic_id TEXT REFERENCES topics(id) ON DELETE SET NULL,
    status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending', 'leased', 'delivered', 'acked', 'nacked', 'dead')),
    attempts INTEGER NOT NULL DEFAULT 0,
    claim_token TEXT,
    lease_expires_at INTEGER,
    nack_reason TEXT,
    dead_reason TEXT,
    last_transition_at INTEGER NOT NULL,
    CHECK(recipient_agent_id IS NOT NULL OR group_id IS NOT NULL),
    CHECK(status != 'leased' OR (claim_token IS NOT NULL AND lease_expires_at IS NOT NULL))
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_deliveries_message_recipient
    ON deliveries(message_id, recipient_agent_id)
    WHERE recipient_agent_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_deliveries_recipient_status
    ON deliveries(recipient_agent_id, status, id);
CREATE INDEX IF NOT EXISTS idx_deliveries_group_pool
    ON deliveries(group_id, status)
    WHERE group_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_deliveries_lease
    ON deliveries(status, lease_expires_at)
    WHERE status = 'leased';
"#;
