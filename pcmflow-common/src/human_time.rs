//! Human-readable time formatting
//!
//! Provides consistent playback position display for the CLI report and
//! the GUI position indicator.

/// Time display format selection thresholds (seconds)
const SHORT_FORMAT_MAX: f64 = 100.0;     // < 100s → X.XXs
const MEDIUM_FORMAT_MAX: f64 = 6000.0;   // < 100m → M:SS.Xs
                                          // >= 100m → H:MM:SS

/// Format seconds as human-readable time.
///
/// Format selection by typical maximum value, so that a position and the
/// total duration it is shown against use the same layout:
/// - Short format (`X.XXs`): typical max < 100 seconds
/// - Medium format (`M:SS.Xs`): typical max 100s to 100m
/// - Long format (`H:MM:SS`): typical max >= 100m
///
/// # Arguments
///
/// * `seconds` - Duration in seconds (negative values keep their sign)
/// * `typical_max` - Typical maximum value for this field (determines format)
///
/// # Examples
///
/// ```
/// use pcmflow_common::human_time::format_human_time;
///
/// assert_eq!(format_human_time(45.0, 60.0), "45.00s");
/// assert_eq!(format_human_time(330.5, 600.0), "5:30.5s");
/// assert_eq!(format_human_time(3661.0, 7200.0), "1:01:01");
/// ```
pub fn format_human_time(seconds: f64, typical_max: f64) -> String {
    let is_negative = seconds < 0.0;
    let abs_seconds = seconds.abs();

    let formatted = if typical_max < SHORT_FORMAT_MAX {
        format!("{:.2}s", abs_seconds)
    } else if typical_max < MEDIUM_FORMAT_MAX {
        // Round to tenths first so 59.96 does not print as "0:60.0s"
        let tenths = (abs_seconds * 10.0).round() as u64;
        let minutes = tenths / 600;
        let secs = (tenths % 600) as f64 / 10.0;
        format!("{}:{:04.1}s", minutes, secs)
    } else {
        let whole = abs_seconds.round() as u64;
        let hours = whole / 3600;
        let mins = (whole % 3600) / 60;
        let secs = whole % 60;
        format!("{}:{:02}:{:02}", hours, mins, secs)
    };

    if is_negative {
        format!("-{}", formatted)
    } else {
        formatted
    }
}

/// Format a position against a total duration using one shared layout.
///
/// ```
/// use pcmflow_common::human_time::format_position;
///
/// assert_eq!(format_position(3.0, Some(5.0)), "3.00s / 5.00s");
/// assert_eq!(format_position(3.0, None), "3.00s");
/// ```
pub fn format_position(position_secs: f64, duration_secs: Option<f64>) -> String {
    match duration_secs {
        Some(total) => {
            let typical_max = total.max(position_secs);
            format!(
                "{} / {}",
                format_human_time(position_secs, typical_max),
                format_human_time(total, typical_max)
            )
        }
        None => format_human_time(position_secs, position_secs * 1.2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_format() {
        assert_eq!(format_human_time(0.0, 60.0), "0.00s");
        assert_eq!(format_human_time(5.25, 60.0), "5.25s");
        assert_eq!(format_human_time(99.0, 99.0), "99.00s");
    }

    #[test]
    fn test_medium_format() {
        assert_eq!(format_human_time(100.0, 600.0), "1:40.0s");
        assert_eq!(format_human_time(120.0, 600.0), "2:00.0s");
        assert_eq!(format_human_time(59.96, 600.0), "1:00.0s");
        assert_eq!(format_human_time(5999.0, 5999.0), "99:59.0s");
    }

    #[test]
    fn test_long_format() {
        assert_eq!(format_human_time(6000.0, 9000.0), "1:40:00");
        assert_eq!(format_human_time(3661.0, 9000.0), "1:01:01");
    }

    #[test]
    fn test_negative_values() {
        assert_eq!(format_human_time(-5.0, 60.0), "-5.00s");
    }

    #[test]
    fn test_position_shares_layout() {
        assert_eq!(format_position(61.0, Some(300.0)), "1:01.0s / 5:00.0s");
        assert_eq!(format_position(0.5, Some(2.0)), "0.50s / 2.00s");
    }
}
