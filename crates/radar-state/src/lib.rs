//! Persisted classification records and the on-disk run archive.

mod archive;

pub use archive::{ArchivedRun, RunArchive, CROPPED_IMAGE, FULL_IMAGE, RESULTS_FILE, RUN_DIR_FORMAT};

use chrono::{NaiveDate, NaiveDateTime};
use radar_vision::{CaptureRun, ClassificationResult, NO_SIGNAL};
use serde::{Deserialize, Serialize};

/// Category literal stored with every record.
pub const CATEGORY: &str = "Weather radar";

/// One district's classification as stored and pushed downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub city: String,
    pub values: String,
    #[serde(rename = "type")]
    pub category: String,
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
}

impl AnalysisRecord {
    pub fn from_result(result: &ClassificationResult) -> Self {
        Self {
            city: result.district.clone(),
            values: result.text(),
            category: CATEGORY.to_string(),
            timestamp: result.captured_at.naive_local(),
        }
    }

    pub fn is_no_signal(&self) -> bool {
        self.values.eq_ignore_ascii_case(NO_SIGNAL)
    }
}

/// Records for every classified district of a run, in run order.
pub fn records_for_run(run: &CaptureRun) -> Vec<AnalysisRecord> {
    run.results.iter().map(AnalysisRecord::from_result).collect()
}

/// `YYYY-MM-DD HH:MM:SS` local time.
mod timestamp_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&s, FORMAT).map_err(serde::de::Error::custom)
    }
}

/// Selection of stored records for a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFilter {
    pub date: NaiveDate,
    /// Inclusive lower bound
    pub start: Option<NaiveDateTime>,
    /// Exclusive upper bound
    pub end: Option<NaiveDateTime>,
    /// Exact district name, compared case-insensitively. `None` keeps all districts.
    pub district: Option<String>,
    pub exclude_no_signal: bool,
}

impl RecordFilter {
    pub fn for_date(date: NaiveDate) -> Self {
        Self {
            date,
            start: None,
            end: None,
            district: None,
            exclude_no_signal: true,
        }
    }

    pub fn matches(&self, record: &AnalysisRecord) -> bool {
        if record.timestamp.date() != self.date {
            return false;
        }
        if self.start.is_some_and(|start| record.timestamp < start) {
            return false;
        }
        if self.end.is_some_and(|end| record.timestamp >= end) {
            return false;
        }
        if let Some(ref district) = self.district {
            if !record.city.to_lowercase().eq(&district.to_lowercase()) {
                return false;
            }
        }
        !(self.exclude_no_signal && record.is_no_signal())
    }

    /// Matching records ordered by district, then time.
    pub fn apply<'a>(&self, records: impl IntoIterator<Item = &'a AnalysisRecord>) -> Vec<AnalysisRecord> {
        let mut out: Vec<AnalysisRecord> = records.into_iter().filter(|r| self.matches(r)).cloned().collect();
        out.sort_by(|a, b| a.city.cmp(&b.city).then(a.timestamp.cmp(&b.timestamp)));
        out
    }
}
