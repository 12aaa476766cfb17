/// Protocol version advertised by the pairing event channel
pub const PROTOCOL_VERSION: &str = "/vizora/pairing/1.0.0";

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Lifetime of a pairing code (10 minutes)
pub const DEFAULT_PAIRING_TTL_SECS: u64 = 600;

/// Interval between expiry sweeps of the pairing session store
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Number of characters in a pairing code
pub const PAIRING_CODE_LENGTH: usize = 6;

/// Characters a pairing code is drawn from. Excludes 0/O and 1/I so a code
/// read off a TV screen can be typed back without ambiguity.
pub const PAIRING_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Attempts at drawing a code that does not collide with a live session
pub const MAX_CODE_ATTEMPTS: usize = 10;

/// Per-subscriber buffer of pending pairing updates
pub const SUBSCRIBER_BUFFER: usize = 16;

/// Device token size in bytes (hex-encoded on the wire)
pub const DEVICE_TOKEN_SIZE: usize = 32;

/// Default content cache budget in MiB
pub const DEFAULT_CACHE_MAX_MB: u64 = 500;

/// Default capacity of the offline action queue
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;

/// Window in which equivalent queued actions are coalesced
pub const DEFAULT_DEDUPE_WINDOW_SECS: u64 = 60;

/// Delivery attempts before a queued action is discarded
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Base delay before a failed action is retried (doubles per attempt)
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;

/// Upper bound on the retry backoff
pub const MAX_RETRY_DELAY_SECS: u64 = 300;

/// Storage key under which the offline queue is persisted
pub const QUEUE_STORAGE_KEY: &str = "offline_action_queue";

/// Storage key under which the device credentials are persisted
pub const CREDENTIALS_STORAGE_KEY: &str = "device_credentials";

/// Cache manifest format version
pub const MANIFEST_VERSION: u32 = 1;
