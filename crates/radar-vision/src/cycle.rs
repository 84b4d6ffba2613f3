use chrono::{DateTime, Local};
use image::RgbaImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::classify::{classify_district, ClassificationResult, DistrictGeometry};
use crate::error::{ClassificationError, CycleError};
use crate::geo_raster::{AffineMap, BoundingBox};
use crate::legend::Legend;

/// A district that produced no result in a cycle, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistrictFailure {
    pub district: String,
    pub reason: String,
}

/// Every district classification derived from one capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRun {
    pub captured_at: DateTime<Local>,
    pub width: u32,
    pub height: u32,
    /// In input district order
    pub results: Vec<ClassificationResult>,
    pub skipped: Vec<DistrictFailure>,
}

impl CaptureRun {
    pub fn result_for(&self, district: &str) -> Option<&ClassificationResult> {
        self.results
            .iter()
            .find(|r| r.district.eq_ignore_ascii_case(district))
    }

    pub fn with_signal(&self) -> impl Iterator<Item = &ClassificationResult> {
        self.results.iter().filter(|r| r.has_signal())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CycleOptions {
    /// Classify districts on the rayon pool. Output order is unchanged.
    pub parallel: bool,
}

/// Classify every district of one capture, sequentially.
pub fn run_cycle(
    base: &RgbaImage,
    captured_at: DateTime<Local>,
    districts: &[DistrictGeometry],
    bbox: BoundingBox,
    legend: &Legend,
    tolerance: f64,
) -> Result<CaptureRun, CycleError> {
    run_cycle_with(
        base,
        captured_at,
        districts,
        bbox,
        legend,
        tolerance,
        CycleOptions::default(),
    )
}

/// Classify every district of one capture.
///
/// Cycle preconditions (non-empty image and district list, valid bounding box)
/// fail the whole cycle before any district is touched. A failing district is
/// logged and listed in [`CaptureRun::skipped`] instead.
pub fn run_cycle_with(
    base: &RgbaImage,
    captured_at: DateTime<Local>,
    districts: &[DistrictGeometry],
    bbox: BoundingBox,
    legend: &Legend,
    tolerance: f64,
    options: CycleOptions,
) -> Result<CaptureRun, CycleError> {
    if base.width() == 0 || base.height() == 0 {
        return Err(CycleError::EmptyImage);
    }
    if districts.is_empty() {
        return Err(CycleError::NoDistricts);
    }
    let map = AffineMap::from_bounds(bbox, base.width(), base.height())?;

    let classify = |d: &DistrictGeometry| classify_district(d, base, &map, legend, tolerance, captured_at);

    let outcomes: Vec<Result<ClassificationResult, ClassificationError>> = if options.parallel {
        districts.par_iter().map(classify).collect()
    } else {
        districts.iter().map(classify).collect()
    };

    let mut results = Vec::with_capacity(districts.len());
    let mut skipped = Vec::new();
    for (district, outcome) in districts.iter().zip(outcomes) {
        match outcome {
            Ok(result) => results.push(result),
            Err(e) => {
                warn!("Skipping district {}: {}", district.name, e);
                skipped.push(DistrictFailure {
                    district: district.name.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        "Cycle {}: {} district(s) classified, {} with signal, {} skipped",
        captured_at.format("%Y-%m-%d %H:%M:%S"),
        results.len(),
        results.iter().filter(|r| r.has_signal()).count(),
        skipped.len()
    );

    Ok(CaptureRun {
        captured_at,
        width: base.width(),
        height: base.height(),
        results,
        skipped,
    })
}
