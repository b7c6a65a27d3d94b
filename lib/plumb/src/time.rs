use std::time::SystemTime;

/// Returns the current unix timestamp (seconds elapsed since 1970-01-01).
#[inline]
pub fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("System clock predates the unix epoch")
        .as_secs()
}

/// Converts a `SystemTime` to floating point seconds since the epoch.
/// Timestamps before the epoch come out negative.
#[inline]
pub fn system_time_secs(time: SystemTime) -> f64 {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs_f64(),
        Err(err) => -err.duration().as_secs_f64(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_system_time_secs() {
        let time = SystemTime::UNIX_EPOCH + Duration::from_millis(1500);
        assert!((system_time_secs(time) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_system_time_secs_before_epoch() {
        let time = SystemTime::UNIX_EPOCH - Duration::from_secs(2);
        assert!((system_time_secs(time) + 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_timestamp_secs_nonzero() {
        assert!(timestamp_secs() > 0);
    }
}
