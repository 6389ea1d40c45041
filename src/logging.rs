//! Timing helpers for phase logging

use std::time::{Duration, Instant};

use log::info;

/// Formats a duration in human-readable form
///
/// ```
/// use genmod::logging::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(Duration::from_secs(45)), "45s");
/// assert_eq!(format_duration(Duration::from_secs(135)), "2m 15s");
/// assert_eq!(format_duration(Duration::from_secs(5400)), "1h 30m");
/// ```
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        let (mins, rem) = (secs / 60, secs % 60);
        if rem == 0 {
            format!("{mins}m")
        } else {
            format!("{mins}m {rem}s")
        }
    } else {
        let (hours, mins) = (secs / 3600, (secs % 3600) / 60);
        if mins == 0 {
            format!("{hours}h")
        } else {
            format!("{hours}h {mins}m")
        }
    }
}

/// Variants per second, or per minute for slow phases
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
pub fn format_rate(count: u64, duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 0.001 {
        return format!("{count} variants/s");
    }
    let rate = count as f64 / secs;
    if rate >= 1.0 {
        format!("{} variants/s", rate as u64)
    } else {
        format!("{:.1} variants/min", count as f64 / (secs / 60.0))
    }
}

/// Logs the start and the completion of one run phase
pub struct PhaseTimer {
    phase: &'static str,
    start: Instant,
}
impl PhaseTimer {
    #[must_use]
    pub fn start(phase: &'static str) -> Self {
        info!("{phase} ...");
        Self {
            phase,
            start: Instant::now(),
        }
    }

    pub fn finish(self, count: u64) {
        let elapsed = self.start.elapsed();
        info!(
            "{} completed: {count} variant(s) in {} ({})",
            self.phase,
            format_duration(elapsed),
            format_rate(count, elapsed)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0s");
        assert_eq!(format_duration(Duration::from_secs(120)), "2m");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m");
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(100, Duration::from_secs(10)), "10 variants/s");
        assert_eq!(format_rate(1, Duration::from_secs(120)), "0.5 variants/min");
        assert_eq!(format_rate(7, Duration::ZERO), "7 variants/s");
    }
}
