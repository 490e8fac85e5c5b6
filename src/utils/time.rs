/// Time utilities for Test Object lifecycle handling
///
/// All business timestamps are UTC. Components that depend on "now"
/// (transient expiry, sweep scheduling) read it through a [`Clock`] so tests
/// can move time forward without sleeping.
use chrono::{DateTime, Duration, NaiveTime, Utc};
use std::sync::Mutex;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Format a UTC timestamp as RFC 3339 with second precision.
///
/// Format: "2025-12-17T02:30:00Z"
pub fn format_utc(datetime: DateTime<Utc>) -> String {
    datetime.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Parse an "HH:MM" daily anchor.
pub fn parse_anchor(anchor: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(anchor.trim(), "%H:%M")
        .map_err(|e| format!("Invalid anchor time '{}': {}", anchor, e))
}

/// First occurrence of the daily `anchor` (UTC) at or after `not_before`.
pub fn next_anchor(not_before: DateTime<Utc>, anchor: NaiveTime) -> DateTime<Utc> {
    let same_day = not_before.date_naive().and_time(anchor).and_utc();
    if same_day >= not_before {
        same_day
    } else {
        same_day + Duration::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2025, 12, 17, 2, 30, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::minutes(7));
        assert_eq!(clock.now(), start + Duration::minutes(7));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_format_utc() {
        let dt = Utc.with_ymd_and_hms(2025, 12, 17, 2, 30, 0).unwrap();
        assert_eq!(format_utc(dt), "2025-12-17T02:30:00Z");
    }

    #[test]
    fn test_parse_anchor() {
        let anchor = parse_anchor("00:09").unwrap();
        assert_eq!(anchor, NaiveTime::from_hms_opt(0, 9, 0).unwrap());
        assert!(parse_anchor("25:00").is_err());
        assert!(parse_anchor("noon").unwrap_err().contains("Invalid anchor"));
    }

    #[test]
    fn test_next_anchor() {
        let anchor = NaiveTime::from_hms_opt(0, 9, 0).unwrap();

        let before = Utc.with_ymd_and_hms(2025, 12, 17, 0, 5, 0).unwrap();
        assert_eq!(
            next_anchor(before, anchor),
            Utc.with_ymd_and_hms(2025, 12, 17, 0, 9, 0).unwrap()
        );

        let after = Utc.with_ymd_and_hms(2025, 12, 17, 10, 0, 0).unwrap();
        assert_eq!(
            next_anchor(after, anchor),
            Utc.with_ymd_and_hms(2025, 12, 18, 0, 9, 0).unwrap()
        );

        let exact = Utc.with_ymd_and_hms(2025, 12, 17, 0, 9, 0).unwrap();
        assert_eq!(next_anchor(exact, anchor), exact);
    }
}
