use std::time::Duration;

/// Upper bound on expanded targets per request. Excess targets are dropped.
pub const DEFAULT_TARGET_CAP: usize = 10_000;
pub const DEFAULT_LATENCY_CONCURRENCY: usize = 50;
/// Throughput probes share local bandwidth, so they run one at a time.
pub const DEFAULT_THROUGHPUT_CONCURRENCY: usize = 1;
pub const DEFAULT_LATENCY_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Whole-request bound for the throughput probe: connect budget plus download budget.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_READ_WINDOW: Duration = Duration::from_secs(5);
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Knobs for one scan. Every request is scanned with its own copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    pub target_cap: usize,
    pub latency_concurrency: usize,
    pub throughput_concurrency: usize,
    /// Connect timeout of the latency probe.
    pub latency_timeout: Duration,
    /// Connect/TLS budget of the throughput probe.
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// How long the throughput probe keeps reading the body.
    pub read_window: Duration,
    pub chunk_size: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            target_cap: DEFAULT_TARGET_CAP,
            latency_concurrency: DEFAULT_LATENCY_CONCURRENCY,
            throughput_concurrency: DEFAULT_THROUGHPUT_CONCURRENCY,
            latency_timeout: DEFAULT_LATENCY_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            read_window: DEFAULT_READ_WINDOW,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}
