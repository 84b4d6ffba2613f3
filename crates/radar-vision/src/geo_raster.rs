use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Geographic extent (EPSG:4326 degrees) covered by a cropped radar screenshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, max_lon: f64, min_lat: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            max_lon,
            min_lat,
            max_lat,
        }
    }

    /// Both axes finite and strictly increasing.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let finite = [self.min_lon, self.max_lon, self.min_lat, self.max_lat]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.min_lon >= self.max_lon || self.min_lat >= self.max_lat {
            return Err(ConfigurationError::InvalidBoundingBox(*self));
        }
        Ok(())
    }

    pub fn lon_span(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn lat_span(&self) -> f64 {
        self.max_lat - self.min_lat
    }
}

/// Tamil Nadu alignment of the Windy radar crop.
impl Default for BoundingBox {
    fn default() -> Self {
        Self::new(74.80, 80.37, 7.98, 13.53)
    }
}

/// Affine mapping between geographic coordinates and a `width x height` pixel grid.
///
/// The north-west corner `(min_lon, max_lat)` lands on pixel `(0, 0)` and the
/// south-east corner `(max_lon, min_lat)` on `(width, height)`. Pixel space is
/// continuous: pixel `(c, r)` covers `[c, c+1) x [r, r+1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineMap {
    bbox: BoundingBox,
    width: u32,
    height: u32,
    /// Degrees of longitude per pixel column
    lon_per_px: f64,
    /// Degrees of latitude per pixel row (positive; rows grow southward)
    lat_per_px: f64,
}

impl AffineMap {
    pub fn from_bounds(bbox: BoundingBox, width: u32, height: u32) -> Result<Self, ConfigurationError> {
        bbox.validate()?;
        if width == 0 || height == 0 {
            return Err(ConfigurationError::InvalidDimensions { width, height });
        }
        Ok(Self {
            bbox,
            width,
            height,
            lon_per_px: bbox.lon_span() / width as f64,
            lat_per_px: bbox.lat_span() / height as f64,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    /// Continuous pixel coordinates `(col, row)` of a lon/lat position.
    pub fn geo_to_pixel(&self, lon: f64, lat: f64) -> (f64, f64) {
        (
            (lon - self.bbox.min_lon) / self.lon_per_px,
            (self.bbox.max_lat - lat) / self.lat_per_px,
        )
    }

    /// Inverse of [`AffineMap::geo_to_pixel`].
    pub fn pixel_to_geo(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.bbox.min_lon + col * self.lon_per_px,
            self.bbox.max_lat - row * self.lat_per_px,
        )
    }
}
