//! Display helpers

/// Placeholder shown when no lap time is set
pub const NO_LAP_TIME: &str = "--:--";

/// Format milliseconds as `M:SS.mmm`
pub fn format_lap_time(ms: i64) -> String {
    if ms <= 0 {
        return NO_LAP_TIME.to_string();
    }
    format_clock(ms)
}

/// Format a fractional elapsed time such as the running lap clock.
///
/// Rounds to the nearest millisecond. Any positive value, including the
/// just-started sentinel, renders as a time.
pub fn format_elapsed(ms: f64) -> String {
    if !ms.is_finite() || ms <= 0.0 {
        return NO_LAP_TIME.to_string();
    }
    format_clock(ms.round() as i64)
}

fn format_clock(ms: i64) -> String {
    let minutes = ms / 60_000;
    let seconds = (ms % 60_000) / 1000;
    let millis = ms % 1000;
    format!("{}:{:02}.{:03}", minutes, seconds, millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_lap_time() {
        assert_eq!(format_lap_time(95_123), "1:35.123");
        assert_eq!(format_lap_time(5_007), "0:05.007");
        assert_eq!(format_lap_time(600_000), "10:00.000");
    }

    #[test]
    fn test_unset_lap_time() {
        assert_eq!(format_lap_time(0), "--:--");
        assert_eq!(format_lap_time(-1), "--:--");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(61_500.9), "1:01.501");
        assert_eq!(format_elapsed(61_500.4), "1:01.500");
        assert_eq!(format_elapsed(59_999.6), "1:00.000");
    }

    #[test]
    fn test_format_elapsed_started_and_unset() {
        // Just-started lap still reads as a running clock
        assert_eq!(format_elapsed(0.001), "0:00.000");
        assert_eq!(format_elapsed(0.0), "--:--");
        assert_eq!(format_elapsed(-5.0), "--:--");
        assert_eq!(format_elapsed(f64::NAN), "--:--");
    }
}
