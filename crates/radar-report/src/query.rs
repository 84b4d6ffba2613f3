use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use radar_state::RecordFilter;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// District selection meaning "no district filter".
pub const ALL_DISTRICTS: &str = "All Districts";

/// Length of the default report window.
const WINDOW_MINUTES: i64 = 15;

/// Fully resolved report selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportQuery {
    pub date: NaiveDate,
    /// Inclusive
    pub start: NaiveDateTime,
    /// Exclusive
    pub end: NaiveDateTime,
    /// `None` selects every district
    pub district: Option<String>,
}

impl ReportQuery {
    /// Resolve raw request parameters.
    ///
    /// - missing or malformed date: today (from `now`)
    /// - missing start time: the quarter hour at or after `now`, for 15 minutes
    /// - malformed start/end time, or start without end: the whole day
    /// - empty district or "All Districts": no district filter
    pub fn resolve(
        date: Option<&str>,
        start: Option<&str>,
        end: Option<&str>,
        district: Option<&str>,
        now: NaiveDateTime,
    ) -> Self {
        let date = match date.filter(|d| !d.trim().is_empty()) {
            Some(d) => NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").unwrap_or_else(|e| {
                warn!("Invalid date '{}': {}. Defaulting to today", d, e);
                now.date()
            }),
            None => now.date(),
        };

        let (start, end) = match start.filter(|s| !s.trim().is_empty()) {
            None => {
                let from = next_quarter_hour(now.time());
                let start = date.and_time(from);
                (start, start + Duration::minutes(WINDOW_MINUTES))
            }
            Some(s) => match (parse_time(s), end.and_then(parse_time)) {
                (Some(from), Some(to)) => (date.and_time(from), date.and_time(to)),
                _ => {
                    warn!("Invalid time range {:?}..{:?}. Defaulting to full day", start, end);
                    full_day(date)
                }
            },
        };

        let district = district
            .map(str::trim)
            .filter(|d| !d.is_empty() && !d.eq_ignore_ascii_case(ALL_DISTRICTS))
            .map(str::to_string);

        Self {
            date,
            start,
            end,
            district,
        }
    }

    pub fn district_label(&self) -> &str {
        self.district.as_deref().unwrap_or(ALL_DISTRICTS)
    }

    /// Stored-record filter for this selection, without no-signal records.
    pub fn record_filter(&self) -> RecordFilter {
        RecordFilter {
            start: Some(self.start),
            end: Some(self.end),
            district: self.district.clone(),
            ..RecordFilter::for_date(self.date)
        }
    }

    /// e.g. `2025-06-27_Coimbatore_10-00-10-15`
    pub fn folder_name(&self) -> String {
        format!(
            "{}_{}_{}-{}",
            self.date.format("%Y-%m-%d"),
            self.district_label().replace(' ', "_"),
            self.start.format("%H-%M"),
            self.end.format("%H-%M"),
        )
    }
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()
}

fn full_day(date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
    (date.and_time(NaiveTime::MIN), date.and_time(NaiveTime::MIN) + Duration::days(1))
}

/// Round up to the next multiple of 15 minutes; wraps past midnight.
fn next_quarter_hour(t: NaiveTime) -> NaiveTime {
    let minute = t.minute();
    let rounded = minute.div_ceil(15) * 15;
    let hour = (t.hour() + rounded / 60) % 24;
    NaiveTime::from_hms_opt(hour, rounded % 60, 0).unwrap_or(NaiveTime::MIN)
}
