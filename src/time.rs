//! Timestamp utilities

use chrono::Utc;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// UTC stamp for backup directory names. Lexical order equals
/// chronological order and the result is path-safe on every platform.
pub fn backup_stamp() -> String {
    Utc::now().format("%Y%m%dT%H%M%S%3f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_stamps_sort_chronologically() {
        let a = backup_stamp();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = backup_stamp();
        assert!(a < b);
        assert!(!a.contains(':'));
    }
}
