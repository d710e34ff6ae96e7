//! Wall-clock helpers for metrics snapshots.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Placeholder rendered for a duration that does not exist yet.
pub const ABSENT_HMS: &str = "--:--:--";

/// Render a duration as `HH:MM:SS`.
///
/// Hours are not wrapped at 24; a 30 hour run renders as `30:00:00`.
pub fn format_hms(duration: Option<Duration>) -> String {
    match duration {
        None => ABSENT_HMS.to_string(),
        Some(d) => {
            let total = d.as_secs();
            let (hours, rest) = (total / 3600, total % 3600);
            let (minutes, seconds) = (rest / 60, rest % 60);
            format!("{hours:02}:{minutes:02}:{seconds:02}")
        }
    }
}

/// Non-negative span between two instants (clock skew clamps to zero).
pub fn span(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or(Duration::ZERO)
}
