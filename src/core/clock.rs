//! Wall clock helpers.

use chrono::Utc;

/// Current unix time in milliseconds.
pub fn unix_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_millis_is_monotone_enough() {
        let a = unix_millis();
        let b = unix_millis();
        assert!(b >= a);
        // 2020-01-01
        assert!(a > 1_577_836_800_000);
    }
}
