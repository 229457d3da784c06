//! # Shingle Common
//!
//! Pieces shared by every crate of the offline gateway workspace.
//!
//! ## Features
//!
//! - Logging configuration and `tracing-subscriber` setup
//! - Wall-clock helper used for cache entry timestamps

use std::time::{SystemTime, UNIX_EPOCH};

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LoggingError};

/// Milliseconds since the Unix epoch.
///
/// A clock set before 1970 yields `0` rather than failing.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_millis_is_monotone_enough() {
        let a = unix_millis();
        let b = unix_millis();
        assert!(a > 0);
        assert!(b >= a);
    }
}
