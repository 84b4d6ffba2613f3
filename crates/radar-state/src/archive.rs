use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use image::RgbaImage;
use radar_vision::CaptureRun;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::{records_for_run, AnalysisRecord, RecordFilter};

/// Run folder names, e.g. `2025-06-27_10-00-00`.
pub const RUN_DIR_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
pub const FULL_IMAGE: &str = "full/windy_map_full.png";
pub const CROPPED_IMAGE: &str = "cropped/tamil_nadu_cropped.png";
pub const RESULTS_FILE: &str = "cloud_analysis_results.json";
const MASKED_DIR: &str = "masked_cropped";

/// A capture run found in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedRun {
    pub captured_at: NaiveDateTime,
    pub dir: PathBuf,
}

impl ArchivedRun {
    pub fn cropped_path(&self) -> PathBuf {
        self.dir.join(CROPPED_IMAGE)
    }

    pub fn results_path(&self) -> PathBuf {
        self.dir.join(RESULTS_FILE)
    }

    pub fn load_records(&self) -> Result<Vec<AnalysisRecord>> {
        let path = self.results_path();
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

/// Per-run folders of imagery and results under one root directory.
///
/// ```text
/// root/2025-06-27_10-00-00/
///     full/windy_map_full.png
///     cropped/tamil_nadu_cropped.png
///     masked_cropped/<District>/<district>_masked.png
///     cloud_analysis_results.json
/// ```
#[derive(Debug, Clone)]
pub struct RunArchive {
    root: PathBuf,
}

impl RunArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, captured_at: NaiveDateTime) -> PathBuf {
        self.root.join(captured_at.format(RUN_DIR_FORMAT).to_string())
    }

    /// Store one completed run. The results file is written last and renamed
    /// into place, so a run folder without it is an incomplete run.
    pub fn save_run(&self, run: &CaptureRun, full: Option<&RgbaImage>, cropped: &RgbaImage) -> Result<PathBuf> {
        let dir = self.run_dir(run.captured_at.naive_local());

        if let Some(full) = full {
            save_png(full, &dir.join(FULL_IMAGE))?;
        }
        save_png(cropped, &dir.join(CROPPED_IMAGE))?;

        let records = records_for_run(run);
        let json = serde_json::to_string_pretty(&records).context("Failed to serialize results")?;
        let tmp = dir.join(format!("{}.tmp", RESULTS_FILE));
        std::fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, dir.join(RESULTS_FILE))
            .with_context(|| format!("Failed to move results into {}", dir.display()))?;

        info!(
            "Archived {} result(s) for run {}",
            records.len(),
            dir.display()
        );
        Ok(dir)
    }

    /// Store the isolated image of one district for a run.
    pub fn save_masked(&self, captured_at: NaiveDateTime, district: &str, image: &RgbaImage) -> Result<PathBuf> {
        let path = self
            .run_dir(captured_at)
            .join(MASKED_DIR)
            .join(district.replace(' ', "_"))
            .join(format!("{}_masked.png", district.to_lowercase().replace(' ', "_")));
        save_png(image, &path)?;
        Ok(path)
    }

    /// Every run folder whose name parses as a timestamp, oldest first.
    pub fn list_runs(&self) -> Result<Vec<ArchivedRun>> {
        if !self.root.is_dir() {
            debug!("Archive root {} does not exist", self.root.display());
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let entries = std::fs::read_dir(&self.root)
            .with_context(|| format!("Failed to list {}", self.root.display()))?;
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Ok(captured_at) = NaiveDateTime::parse_from_str(name, RUN_DIR_FORMAT) {
                runs.push(ArchivedRun {
                    captured_at,
                    dir: entry.path(),
                });
            }
        }
        runs.sort_by_key(|r| r.captured_at);
        Ok(runs)
    }

    /// Runs captured in `[start, end)`.
    pub fn runs_between(&self, start: NaiveDateTime, end: NaiveDateTime) -> Result<Vec<ArchivedRun>> {
        Ok(self
            .list_runs()?
            .into_iter()
            .filter(|r| r.captured_at >= start && r.captured_at < end)
            .collect())
    }

    /// All records of all complete runs. Unreadable results files are skipped.
    pub fn load_records(&self) -> Result<Vec<AnalysisRecord>> {
        let mut records = Vec::new();
        for run in self.list_runs()? {
            if !run.results_path().exists() {
                continue;
            }
            match run.load_records() {
                Ok(mut r) => records.append(&mut r),
                Err(e) => warn!("{:#}", e),
            }
        }
        Ok(records)
    }

    pub fn query(&self, filter: &RecordFilter) -> Result<Vec<AnalysisRecord>> {
        Ok(filter.apply(&self.load_records()?))
    }
}

fn save_png(image: &RgbaImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    image
        .save(path)
        .with_context(|| format!("Failed to save {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, NaiveDate, TimeZone};
    use image::Rgba;
    use radar_vision::ClassificationResult;
    use std::collections::BTreeSet;

    fn temp_archive(tag: &str) -> RunArchive {
        let dir = std::env::temp_dir().join(format!("radar_state_{}_{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        RunArchive::new(dir)
    }

    fn run_at(h: u32, m: u32, labels: &[&str]) -> CaptureRun {
        let captured_at = Local.with_ymd_and_hms(2025, 6, 27, h, m, 0).unwrap();
        CaptureRun {
            captured_at,
            width: 4,
            height: 4,
            results: vec![ClassificationResult {
                district: "Chennai".into(),
                labels: labels.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
                captured_at,
            }],
            skipped: vec![],
        }
    }

    #[test]
    fn test_save_and_query_runs() {
        let archive = temp_archive("query");
        let cropped = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]));

        for (h, m, labels) in [(10, 0, vec!["20 mm - Red"]), (10, 15, vec![]), (11, 0, vec!["2 mm - Cyan"])] {
            archive.save_run(&run_at(h, m, &labels), None, &cropped).unwrap();
        }
        // Not a run folder
        std::fs::create_dir_all(archive.root().join("report_images")).unwrap();

        let runs = archive.list_runs().unwrap();
        assert_eq!(runs.len(), 3);
        assert!(runs[0].cropped_path().exists());

        let date = NaiveDate::from_ymd_opt(2025, 6, 27).unwrap();
        let between = archive
            .runs_between(date.and_hms_opt(10, 0, 0).unwrap(), date.and_hms_opt(11, 0, 0).unwrap())
            .unwrap();
        assert_eq!(between.len(), 2);

        let records = archive.query(&RecordFilter::for_date(date)).unwrap();
        let values: Vec<_> = records.iter().map(|r| r.values.as_str()).collect();
        assert_eq!(values, vec!["20 mm - Red", "2 mm - Cyan"]);

        let _ = std::fs::remove_dir_all(archive.root());
    }

    #[test]
    fn test_masked_image_path() {
        let archive = temp_archive("masked");
        let ts = NaiveDate::from_ymd_opt(2025, 6, 27).unwrap().and_hms_opt(9, 30, 0).unwrap();
        let path = archive
            .save_masked(ts, "The Nilgiris", &RgbaImage::new(2, 2))
            .unwrap();
        assert!(path.ends_with("2025-06-27_09-30-00/masked_cropped/The_Nilgiris/the_nilgiris_masked.png"));
        assert!(path.exists());
        let _ = std::fs::remove_dir_all(archive.root());
    }

    #[test]
    fn test_missing_root_is_empty() {
        let archive = RunArchive::new("/nonexistent/radar");
        assert!(archive.list_runs().unwrap().is_empty());
        assert!(archive.load_records().unwrap().is_empty());
    }
}
