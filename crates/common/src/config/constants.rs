// Constants for resilience configuration
use std::time::Duration;

/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff, in milliseconds
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;

/// Default multiplier applied to the delay after each retry
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Default jitter fraction (0.0 = no jitter)
pub const DEFAULT_JITTER_FRACTION: f64 = 0.1;

/// Status codes that indicate a transient server-side problem
pub const DEFAULT_RETRIABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Circuit breaker: consecutive failures before the circuit opens
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Circuit breaker: cooldown before a trial call is allowed, in seconds
pub const DEFAULT_RECOVERY_TIMEOUT_SECS: u64 = 60;

/// Credentials within this many seconds of expiry are treated as expired
pub const DEFAULT_EXPIRY_MARGIN_SECS: u64 = 10;

/// Upper bound for a single backoff delay when no cap is configured
pub const BACKOFF_CEILING: Duration = Duration::from_secs(3_600);

/// Maximum allowed max_retries value
pub const MAX_MAX_RETRIES: u32 = 100;

/// Longest credential lifetime honoured by the cache (about 100 years)
pub const MAX_CREDENTIAL_LIFETIME: Duration = Duration::from_secs(100 * 365 * 24 * 3_600);
