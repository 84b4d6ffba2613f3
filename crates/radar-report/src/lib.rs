//! Radar report assembly: stored records and re-rendered imagery for a
//! date, time window and district.

mod query;

pub use query::{ReportQuery, ALL_DISTRICTS};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use image::RgbaImage;
use radar_data::{available_district_names, DeploymentConfig, DistrictCatalog};
use radar_state::{AnalysisRecord, ArchivedRun, RunArchive};
use radar_vision::{extract, rasterize, AffineMap, BoundingBox, DistrictGeometry};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const REPORT_FILE: &str = "report.json";

/// Images rendered for one archived capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportImageSet {
    pub timestamp: NaiveDateTime,
    pub cropped: PathBuf,
    /// The cropped image itself when no district is selected; `None` when the
    /// selected district has no geometry.
    pub masked_district: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub query: ReportQuery,
    pub district: String,
    pub available_districts: Vec<String>,
    pub records: Vec<AnalysisRecord>,
    pub images: Vec<ReportImageSet>,
}

/// Collect the report for `query` and write its images and `report.json`
/// under `out_root/<query folder>/`.
pub fn build_report(
    config: &DeploymentConfig,
    archive: &RunArchive,
    catalog: Option<&DistrictCatalog>,
    query: &ReportQuery,
    out_root: &Path,
) -> Result<(Report, PathBuf)> {
    let out_dir = out_root.join(query.folder_name());
    if out_dir.exists() {
        debug!("Replacing existing report directory {}", out_dir.display());
        std::fs::remove_dir_all(&out_dir)
            .with_context(|| format!("Failed to clear {}", out_dir.display()))?;
    }
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let district = match (&query.district, catalog) {
        (Some(name), Some(catalog)) => Some(
            catalog
                .get(name)
                .unwrap_or_else(|| DistrictGeometry::missing(name.clone())),
        ),
        (Some(name), None) => Some(DistrictGeometry::missing(name.clone())),
        (None, _) => None,
    };

    let runs: Vec<ArchivedRun> = archive
        .runs_between(query.start, query.end)?
        .into_iter()
        .filter(|r| r.captured_at.date() == query.date)
        .filter(|r| {
            let complete = r.results_path().exists();
            if !complete {
                debug!("Skipping incomplete run {}", r.dir.display());
            }
            complete
        })
        .collect();
    info!(
        "Found {} archived run(s) between {} and {}",
        runs.len(),
        query.start,
        query.end
    );

    let mut images = Vec::new();
    for run in &runs {
        match render_run(run, district.as_ref(), config.bbox, &out_dir) {
            Ok(set) => images.push(set),
            Err(e) => warn!("Skipping images for {}: {:#}", run.captured_at, e),
        }
    }

    let records = archive.query(&query.record_filter())?;
    info!(
        "Fetched {} record(s) for {} ({})",
        records.len(),
        query.date,
        query.district_label()
    );

    let available_districts = match catalog {
        Some(catalog) => catalog.names(),
        None => available_district_names(&config.geometry_path, &config.region, &config.fallback_districts),
    };

    let report = Report {
        query: query.clone(),
        district: query.district_label().to_string(),
        available_districts,
        records,
        images,
    };

    let report_path = out_dir.join(REPORT_FILE);
    let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
    std::fs::write(&report_path, json)
        .with_context(|| format!("Failed to write {}", report_path.display()))?;

    Ok((report, out_dir))
}

/// Re-render one archived capture into `out_dir/<HH-MM-SS>/`.
fn render_run(
    run: &ArchivedRun,
    district: Option<&DistrictGeometry>,
    bbox: BoundingBox,
    out_dir: &Path,
) -> Result<ReportImageSet> {
    let cropped = radar_capture_image(&run.cropped_path())?;
    let dir = out_dir.join(run.captured_at.format("%H-%M-%S").to_string());
    std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let cropped_path = dir.join("cropped_tn.png");
    cropped
        .save(&cropped_path)
        .with_context(|| format!("Failed to save {}", cropped_path.display()))?;

    let masked_district = match district {
        None => Some(cropped_path.clone()),
        Some(d) if d.is_missing() => {
            warn!("District '{}' not found for masked image at {}", d.name, run.captured_at);
            None
        }
        Some(d) => {
            let map = AffineMap::from_bounds(bbox, cropped.width(), cropped.height())?;
            let mask = rasterize(&d.polygons, &map)?;
            let masked = extract(&cropped, &mask)?;
            let path = dir.join("masked_district.png");
            masked
                .save(&path)
                .with_context(|| format!("Failed to save {}", path.display()))?;
            Some(path)
        }
    };

    Ok(ReportImageSet {
        timestamp: run.captured_at,
        cropped: cropped_path,
        masked_district,
    })
}

fn radar_capture_image(path: &Path) -> Result<RgbaImage> {
    let img = image::open(path).with_context(|| format!("Base image {} not found", path.display()))?;
    Ok(img.to_rgba8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use geo::{LineString, Polygon};
    use image::Rgba;
    use radar_vision::{run_cycle, Legend};

    struct Fixture {
        root: PathBuf,
        config: DeploymentConfig,
        archive: RunArchive,
        catalog: DistrictCatalog,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    fn district(name: &str, map: &AffineMap, y0: f64, y1: f64) -> DistrictGeometry {
        let corners = [(0.0, y0), (40.0, y0), (40.0, y1), (0.0, y1), (0.0, y0)]
            .iter()
            .map(|&(x, y)| map.pixel_to_geo(x, y))
            .collect::<Vec<_>>();
        DistrictGeometry::from_parts(name, [Polygon::new(LineString::from(corners), vec![])])
    }

    fn fixture(tag: &str) -> Fixture {
        let root = std::env::temp_dir().join(format!("radar_report_{}_{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        let config = DeploymentConfig {
            geometry_path: root.join("missing.json"),
            ..DeploymentConfig::default()
        };
        let archive = RunArchive::new(root.join("images"));

        let image = RgbaImage::from_fn(40, 40, |_, y| {
            if y < 20 {
                Rgba([241, 86, 59, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        });
        let map = AffineMap::from_bounds(config.bbox, 40, 40).unwrap();
        let districts = vec![district("Chennai", &map, 0.0, 20.0), district("Salem", &map, 20.0, 40.0)];

        for minute in [0, 10, 40] {
            let captured_at = Local.with_ymd_and_hms(2025, 6, 27, 10, minute, 0).unwrap();
            let run = run_cycle(&image, captured_at, &districts, config.bbox, &Legend::windy(), 60.0).unwrap();
            archive.save_run(&run, None, &image).unwrap();
        }

        Fixture {
            root,
            config,
            archive,
            catalog: DistrictCatalog::from_districts(districts),
        }
    }

    #[test]
    fn test_report_for_district_window() {
        let f = fixture("district");
        let query = ReportQuery::resolve(
            Some("2025-06-27"),
            Some("10:00"),
            Some("10:30"),
            Some("chennai"),
            f.root_now(),
        );
        let (report, dir) = build_report(&f.config, &f.archive, Some(&f.catalog), &query, &f.root.join("reports")).unwrap();

        assert_eq!(report.images.len(), 2);
        assert_eq!(report.records.len(), 2);
        assert!(report.records.iter().all(|r| r.values == "20 mm - Red"));
        assert_eq!(report.available_districts, vec!["Chennai".to_string(), "Salem".to_string()]);
        assert!(dir.join(REPORT_FILE).exists());

        let masked = image::open(report.images[0].masked_district.as_ref().unwrap())
            .unwrap()
            .to_rgba8();
        assert_eq!(masked.get_pixel(5, 5)[3], 255);
        assert_eq!(masked.get_pixel(5, 30)[3], 0);
    }

    #[test]
    fn test_report_all_districts_excludes_no_signal() {
        let f = fixture("all");
        let query = ReportQuery::resolve(Some("2025-06-27"), Some("00:00"), Some("23:59"), None, f.root_now());
        let (report, _) = build_report(&f.config, &f.archive, None, &query, &f.root.join("reports")).unwrap();

        assert_eq!(report.images.len(), 3);
        assert!(report.images.iter().all(|s| s.masked_district.as_ref() == Some(&s.cropped)));
        // Salem only ever had the sentinel
        assert!(report.records.iter().all(|r| r.city == "Chennai"));
        assert_eq!(report.records.len(), 3);
        // Geometry file missing: configured fallback list
        assert_eq!(report.available_districts, f.config.fallback_districts);
    }

    #[test]
    fn test_incomplete_runs_get_no_images() {
        let f = fixture("incomplete");
        let ts = f.root_now().date().and_hms_opt(10, 10, 0).unwrap();
        std::fs::remove_file(f.archive.run_dir(ts).join(radar_state::RESULTS_FILE)).unwrap();

        let query = ReportQuery::resolve(Some("2025-06-27"), Some("10:00"), Some("10:30"), None, f.root_now());
        let (report, _) = build_report(&f.config, &f.archive, None, &query, &f.root.join("reports")).unwrap();

        let times: Vec<_> = report.images.iter().map(|s| s.timestamp.format("%H:%M").to_string()).collect();
        assert_eq!(times, vec!["10:00"]);
        assert_eq!(report.records.len(), 1);
    }

    #[test]
    fn test_unknown_district_has_no_mask() {
        let f = fixture("unknown");
        let query = ReportQuery::resolve(Some("2025-06-27"), Some("10:00"), Some("10:05"), Some("Madurai"), f.root_now());
        let (report, _) = build_report(&f.config, &f.archive, Some(&f.catalog), &query, &f.root.join("reports")).unwrap();
        assert_eq!(report.images.len(), 1);
        assert!(report.images[0].masked_district.is_none());
        assert!(report.records.is_empty());
    }

    impl Fixture {
        fn root_now(&self) -> NaiveDateTime {
            chrono::NaiveDate::from_ymd_opt(2025, 6, 27)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap()
        }
    }
}
