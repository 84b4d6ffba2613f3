use std::collections::BTreeSet;

use chrono::{DateTime, Local};
use geo::{MultiPolygon, Polygon};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ClassificationError, GeometryError};
use crate::extract::{extract, present_colors};
use crate::geo_raster::AffineMap;
use crate::legend::Legend;
use crate::rasterize::rasterize;

/// Text recorded for a district where no legend color was found.
pub const NO_SIGNAL: &str = "No significant cloud levels found for precipitation";

/// A named district boundary in EPSG:4326 lon/lat degrees.
#[derive(Debug, Clone, PartialEq)]
pub struct DistrictGeometry {
    pub name: String,
    /// Every part of the district. Empty when the geometry source has no entry for `name`.
    pub polygons: MultiPolygon<f64>,
}

impl DistrictGeometry {
    pub fn new(name: impl Into<String>, polygons: MultiPolygon<f64>) -> Self {
        Self {
            name: name.into(),
            polygons,
        }
    }

    /// Merge several boundary pieces of one district into a single geometry.
    pub fn from_parts(name: impl Into<String>, parts: impl IntoIterator<Item = Polygon<f64>>) -> Self {
        Self::new(name, MultiPolygon(parts.into_iter().collect()))
    }

    /// A district known by name only.
    pub fn missing(name: impl Into<String>) -> Self {
        Self::new(name, MultiPolygon(vec![]))
    }

    pub fn is_missing(&self) -> bool {
        self.polygons.0.is_empty()
    }
}

/// Legend labels found in one district for one capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub district: String,
    pub labels: BTreeSet<String>,
    pub captured_at: DateTime<Local>,
}

impl ClassificationResult {
    /// Labels sorted and comma-joined, or [`NO_SIGNAL`].
    pub fn text(&self) -> String {
        if self.labels.is_empty() {
            NO_SIGNAL.to_string()
        } else {
            self.labels.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
        }
    }

    pub fn has_signal(&self) -> bool {
        !self.labels.is_empty()
    }
}

/// Classify one district of a base image against the legend.
///
/// Presence only: each label appears once however many pixels match it.
pub fn classify_district(
    district: &DistrictGeometry,
    base: &RgbaImage,
    map: &AffineMap,
    legend: &Legend,
    tolerance: f64,
    captured_at: DateTime<Local>,
) -> Result<ClassificationResult, ClassificationError> {
    if district.is_missing() {
        return Err(GeometryError::Missing.into());
    }

    let mask = rasterize(&district.polygons, map)?;
    let isolated = extract(base, &mask)?;
    let colors = present_colors(&isolated);

    let labels: BTreeSet<String> = colors
        .iter()
        .filter_map(|&rgb| legend.match_color(rgb, tolerance))
        .map(|entry| entry.label.clone())
        .collect();

    debug!(
        "{}: {} masked pixels, {} distinct colors, {} label(s)",
        district.name,
        mask.count(),
        colors.len(),
        labels.len()
    );

    Ok(ClassificationResult {
        district: district.name.clone(),
        labels,
        captured_at,
    })
}
