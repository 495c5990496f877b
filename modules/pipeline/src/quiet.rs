use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};

/// Local-time window during which publishing is held back. `start == end` disables it;
/// `start > end` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuietHours {
    pub start_hour: u8,
    pub end_hour: u8,
    pub utc_offset_minutes: i32,
}

impl Default for QuietHours {
    fn default() -> Self { QuietHours { start_hour: 23, end_hour: 7, utc_offset_minutes: 330 } }
}

impl QuietHours {
    pub fn disabled() -> Self { QuietHours { start_hour: 0, end_hour: 0, utc_offset_minutes: 0 } }

    pub fn contains_hour(&self, hour: u8) -> bool {
        let (s, e) = (self.start_hour % 24, self.end_hour % 24);
        match s.cmp(&e) {
            std::cmp::Ordering::Equal => false,
            std::cmp::Ordering::Less => hour >= s && hour < e,
            std::cmp::Ordering::Greater => hour >= s || hour < e,
        }
    }

    pub fn is_quiet_at(&self, at: OffsetDateTime) -> bool {
        let offset = UtcOffset::from_whole_seconds(self.utc_offset_minutes.saturating_mul(60)).unwrap_or(UtcOffset::UTC);
        self.contains_hour(at.to_offset(offset).hour())
    }

    pub fn is_quiet_now(&self) -> bool { self.is_quiet_at(OffsetDateTime::now_utc()) }
}
