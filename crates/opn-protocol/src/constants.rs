/// Upper bound (exclusive) for a stream partition index.
pub const MAX_PARTITION_COUNT: u32 = 100;

/// Suffix appended to an operator address to form its coordination stream.
pub const COORDINATION_STREAM_SUFFIX: &str = "/operator/coordination";

pub const DEFAULT_HEARTBEAT_UPDATE_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_PRUNE_AGE_MS: u64 = 30_000;
pub const DEFAULT_PRUNE_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_LATENCY_EXTRA_MS: u64 = 2_000;
pub const DEFAULT_WARMUP_PERIOD_MS: u64 = 5_000;

pub const DEFAULT_INSPECT_RANDOM_NODE_INTERVAL_MS: u64 = 15 * 60 * 1000;
pub const DEFAULT_MAX_INSPECTION_COUNT: u32 = 10;
pub const DEFAULT_INSPECTION_INTERVAL_MS: u64 = 8 * 60 * 1000;
pub const DEFAULT_MAX_DELAY_BEFORE_FIRST_INSPECTION_MS: u64 = 60 * 1000;

pub const DEFAULT_ANNOUNCE_POLL_INTERVAL_MS: u64 = 10 * 60 * 1000;
pub const DEFAULT_ANNOUNCE_WRITE_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;
