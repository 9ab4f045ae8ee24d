//! FX trading calendar.
//!
//! The market closes for the weekend from Friday 22:00 UTC until Sunday
//! 22:00 UTC, with an optional daily maintenance window on top.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Calendar configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCalendarConfig {
    /// Trade through weekends and maintenance (24/7 venues).
    #[serde(default)]
    pub always_open: bool,
    /// Weekend close hour (Friday, UTC).
    #[serde(default = "default_close_hour")]
    pub weekend_close_hour_utc: u32,
    /// Weekend open hour (Sunday, UTC).
    #[serde(default = "default_open_hour")]
    pub weekend_open_hour_utc: u32,
    /// Daily maintenance window start hour (UTC); None disables it.
    #[serde(default)]
    pub maintenance_start_hour_utc: Option<u32>,
    /// Maintenance window length in minutes.
    #[serde(default = "default_maintenance_minutes")]
    pub maintenance_minutes: u32,
}

fn default_close_hour() -> u32 {
    22
}

fn default_open_hour() -> u32 {
    22
}

fn default_maintenance_minutes() -> u32 {
    5
}

impl Default for SessionCalendarConfig {
    fn default() -> Self {
        Self {
            always_open: false,
            weekend_close_hour_utc: default_close_hour(),
            weekend_open_hour_utc: default_open_hour(),
            maintenance_start_hour_utc: None,
            maintenance_minutes: default_maintenance_minutes(),
        }
    }
}

/// Trading-session calendar.
#[derive(Debug, Clone)]
pub struct SessionCalendar {
    config: SessionCalendarConfig,
}

impl SessionCalendar {
    pub fn new(config: SessionCalendarConfig) -> Self {
        Self { config }
    }

    /// True during the weekend market close.
    pub fn is_weekend_at(&self, at: DateTime<Utc>) -> bool {
        if self.config.always_open {
            return false;
        }
        match at.weekday() {
            Weekday::Sat => true,
            Weekday::Fri => at.hour() >= self.config.weekend_close_hour_utc,
            Weekday::Sun => at.hour() < self.config.weekend_open_hour_utc,
            _ => false,
        }
    }

    /// True during the daily maintenance window (if configured).
    pub fn is_maintenance_at(&self, at: DateTime<Utc>) -> bool {
        if self.config.always_open {
            return false;
        }
        let Some(start_hour) = self.config.maintenance_start_hour_utc else {
            return false;
        };
        let start_min = start_hour * 60;
        let end_min = start_min + self.config.maintenance_minutes;
        let now_min = at.hour() * 60 + at.minute();
        now_min >= start_min && now_min < end_min
    }

    pub fn is_open_at(&self, at: DateTime<Utc>) -> bool {
        !self.is_weekend_at(at) && !self.is_maintenance_at(at)
    }

    pub fn is_open(&self) -> bool {
        self.is_open_at(Utc::now())
    }
}

impl Default for SessionCalendar {
    fn default() -> Self {
        Self::new(SessionCalendarConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_weekend_window() {
        let cal = SessionCalendar::default();
        // 2026-07-31 is a Friday.
        assert!(cal.is_open_at(at(2026, 7, 31, 21, 59)));
        assert!(!cal.is_open_at(at(2026, 7, 31, 22, 0)));
        assert!(!cal.is_open_at(at(2026, 8, 1, 12, 0))); // Saturday
        assert!(!cal.is_open_at(at(2026, 8, 2, 21, 59))); // Sunday pre-open
        assert!(cal.is_open_at(at(2026, 8, 2, 22, 0))); // Sunday open
        assert!(cal.is_open_at(at(2026, 8, 3, 9, 0))); // Monday
    }

    #[test]
    fn test_maintenance_window() {
        let cal = SessionCalendar::new(SessionCalendarConfig {
            maintenance_start_hour_utc: Some(17),
            maintenance_minutes: 5,
            ..Default::default()
        });
        assert!(!cal.is_open_at(at(2026, 8, 3, 17, 0)));
        assert!(!cal.is_open_at(at(2026, 8, 3, 17, 4)));
        assert!(cal.is_open_at(at(2026, 8, 3, 17, 5)));
    }
}
