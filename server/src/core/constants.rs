// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display and platform directories)
pub const APP_NAME: &str = "OpenCortex";

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "opencortex";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".opencortex";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "opencortex.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "OPENCORTEX_CONFIG";

// =============================================================================
// Environment Variables - Server
// =============================================================================

/// Environment variable for server host
pub const ENV_HOST: &str = "OPENCORTEX_HOST";

/// Environment variable for server port
pub const ENV_PORT: &str = "OPENCORTEX_PORT";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "OPENCORTEX_LOG";

/// Environment variable to override data directory
pub const ENV_DATA_DIR: &str = "OPENCORTEX_DATA_DIR";

// =============================================================================
// Environment Variables - Broker
// =============================================================================

pub const ENV_MAX_PAYLOAD_BYTES: &str = "OPENCORTEX_MAX_PAYLOAD_BYTES";
pub const ENV_DEFAULT_LEASE_SECS: &str = "OPENCORTEX_DEFAULT_LEASE_SECS";
pub const ENV_MAX_LEASE_SECS: &str = "OPENCORTEX_MAX_LEASE_SECS";
pub const ENV_MAX_ATTEMPTS: &str = "OPENCORTEX_MAX_ATTEMPTS";
pub const ENV_SWEEP_INTERVAL_SECS: &str = "OPENCORTEX_SWEEP_INTERVAL_SECS";
pub const ENV_RATE_LIMIT_ENABLED: &str = "OPENCORTEX_RATE_LIMIT_ENABLED";
pub const ENV_RATE_LIMIT_RPM: &str = "OPENCORTEX_RATE_LIMIT_RPM";

// =============================================================================
// Server Defaults
// =============================================================================

/// Default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port
pub const DEFAULT_PORT: u16 = 7437;

/// Request body limit in bytes (payload ceiling plus envelope headroom)
pub const DEFAULT_BODY_LIMIT: usize = 4 * 1024 * 1024;

/// Seconds to wait for background tasks during shutdown
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// Process State Files
// =============================================================================

/// Lock file recording pid and listen address
pub const RUN_FILE_NAME: &str = "opencortex.lock";

/// Sibling file recording the server URL
pub const URL_FILE_NAME: &str = "opencortex.url";

// =============================================================================
// SQLite Store
// =============================================================================

/// SQLite database filename
pub const SQLITE_DB_FILENAME: &str = "opencortex.db";

/// SQLite connection pool max connections
pub const SQLITE_MAX_CONNECTIONS: u32 = 5;

/// SQLite busy timeout in seconds
pub const SQLITE_BUSY_TIMEOUT_SECS: u64 = 30;

/// SQLite cache size (negative = KB, so -64000 = 64MB)
pub const SQLITE_CACHE_SIZE: &str = "-64000";

/// SQLite WAL autocheckpoint page threshold
pub const SQLITE_WAL_AUTOCHECKPOINT: &str = "1000";

/// Interval between WAL checkpoints in seconds
pub const SQLITE_CHECKPOINT_INTERVAL_SECS: u64 = 300;

// =============================================================================
// Authentication
// =============================================================================

/// Credential token prefix
pub const TOKEN_PREFIX: &str = "oc_";

/// Random portion length of a credential token
pub const TOKEN_RANDOM_LENGTH: usize = 50;

/// Name of the bootstrap root agent created on first init
pub const ROOT_AGENT_NAME: &str = "root";

/// TTL for cached credential validations in seconds
pub const AUTH_CACHE_TTL_SECS: u64 = 60;

/// Maximum cached credential validations
pub const AUTH_CACHE_MAX_ENTRIES: u64 = 10_000;

/// Query parameter carrying the credential on stream upgrades
pub const API_KEY_QUERY_PARAM: &str = "api_key";

// =============================================================================
// Broker Defaults
// =============================================================================

/// Maximum message payload size in bytes
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Lease applied when a claim does not request one, in seconds
pub const DEFAULT_LEASE_SECS: u64 = 60;

/// Ceiling for requested and renewed leases, in seconds
pub const DEFAULT_MAX_LEASE_SECS: u64 = 3600;

/// Lease transitions before a delivery is dead-lettered
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Sweeper tick interval in seconds
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 5;

/// Server-enforced ceiling on long-poll waits, in seconds
pub const DEFAULT_LONG_POLL_MAX_SECS: u64 = 60;

/// Reserved topic every agent subscribes to at registration
pub const BROADCAST_TOPIC_NAME: &str = "system.broadcast";

// =============================================================================
// Inbox & Claim Limits
// =============================================================================

/// Default rows per inbox page
pub const DEFAULT_INBOX_LIMIT: u32 = 50;

/// Maximum rows per inbox page
pub const MAX_INBOX_LIMIT: u32 = 500;

/// Default rows per claim
pub const DEFAULT_CLAIM_LIMIT: u32 = 10;

/// Maximum rows per claim
pub const MAX_CLAIM_LIMIT: u32 = 100;

/// Maximum ids per bulk ack
pub const MAX_BULK_ACK_IDS: usize = 500;

// =============================================================================
// Fan-Out Bus
// =============================================================================

/// Mailbox broadcast channel capacity (hints, not messages)
pub const MAILBOX_CHANNEL_CAPACITY: usize = 256;

/// Topic broadcast channel capacity
pub const TOPIC_CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// Stream Hub
// =============================================================================

/// Per-frame write deadline in seconds; a stalled connection is closed
pub const WS_WRITE_DEADLINE_SECS: u64 = 5;

/// Deliveries included in the initial_image frame
pub const WS_INITIAL_IMAGE_LIMIT: u32 = 100;

// =============================================================================
// Rate Limiting
// =============================================================================

/// Default requests per minute per identity
pub const DEFAULT_RATE_LIMIT_RPM: u32 = 600;

// =============================================================================
// Validation
// =============================================================================

/// Maximum entity name length
pub const MAX_NAME_LENGTH: usize = 100;

/// Maximum tag count per message
pub const MAX_TAGS: usize = 32;
