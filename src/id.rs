//! ID generation utilities for evalloop
//!
//! Attempt IDs must never be reused, including across processes writing to
//! the same log directory.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

static ATTEMPT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Current wall-clock time
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Generate a unique attempt ID
///
/// Format: `{timestamp_ms}-{hex8}`
/// Example: `1738300800123-9f2c01ab`
///
/// The hex suffix is a digest of the full-precision time, the process id and
/// an in-process counter, so two attempts created in the same millisecond by
/// the same or different processes still differ.
pub fn generate_attempt_id() -> String {
    let ts = now();
    let seq = ATTEMPT_COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut hasher = Sha256::new();
    hasher.update(ts.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    hasher.update(seq.to_le_bytes());
    let digest = hasher.finalize();

    format!("{}-{}", ts.timestamp_millis(), hex::encode(&digest[..4]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_now_is_reasonable() {
        let ts = now().timestamp_millis();
        assert!(ts > 1577836800000); // 2020-01-01
        assert!(ts < 4102444800000); // 2100-01-01
    }

    #[test]
    fn test_generate_attempt_id_format() {
        let id = generate_attempt_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[1].len(), 8);
        assert!(parts[1].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_attempt_id_uniqueness() {
        let ids: HashSet<String> = (0..1000).map(|_| generate_attempt_id()).collect();
        assert_eq!(ids.len(), 1000);
    }
}
