//! Time utilities
//!
//! Timestamps published by the agent are Unix seconds, with `-1` meaning
//! "not known".

use std::time::{SystemTime, UNIX_EPOCH};

/// Marker for an unknown timestamp
pub const INVALID_TIMESTAMP: i64 = -1;

/// Get the current Unix timestamp in seconds.
///
/// Returns 0 if the system clock is before the Unix epoch.
///
/// # Examples
/// ```
/// use fwid_core::time::current_time_secs;
///
/// let now = current_time_secs();
/// assert!(now > 0);
/// ```
pub fn current_time_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Map a timestamp to its published form: zero becomes [`INVALID_TIMESTAMP`]
pub fn published_timestamp(secs: i64) -> i64 {
    if secs > 0 {
        secs
    } else {
        INVALID_TIMESTAMP
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_time_secs_is_positive() {
        assert!(current_time_secs() > 0);
    }

    #[test]
    fn test_published_timestamp() {
        assert_eq!(published_timestamp(0), INVALID_TIMESTAMP);
        assert_eq!(published_timestamp(-5), INVALID_TIMESTAMP);
        assert_eq!(published_timestamp(1_700_000_000), 1_700_000_000);
    }
}
