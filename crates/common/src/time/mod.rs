//! Time abstractions
//!
//! - **[`Clock`]**: monotonic and wall-clock time, real ([`SystemClock`]) or
//!   controllable ([`MockClock`])
//! - **[`Sleeper`]**: blocking waits between retry attempts, real
//!   ([`ThreadSleeper`]) or recorded by [`MockClock`]
//!
//! Everything that measures cooldowns, expiries or backoff delays takes one
//! of these so tests never wait on real time.
//!
//! ```rust
//! use std::time::Duration;
//!
//! use bulwark_common::time::{Clock, MockClock, Sleeper};
//!
//! let clock = MockClock::new();
//! let start = clock.now();
//!
//! clock.sleep(Duration::from_secs(2));
//!
//! assert_eq!(clock.now().duration_since(start), Duration::from_secs(2));
//! assert_eq!(clock.recorded_sleeps(), vec![Duration::from_secs(2)]);
//! ```

pub mod clock;
pub mod sleep;

pub use clock::{Clock, MockClock, SystemClock};
pub use sleep::{Sleeper, ThreadSleeper};
