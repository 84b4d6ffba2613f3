use thiserror::Error;

use crate::geo_raster::BoundingBox;

/// Invalid bounding box or image dimensions. Fatal to a capture cycle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("Invalid bounding box: {0:?}")]
    InvalidBoundingBox(BoundingBox),
    #[error("Invalid image dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}

/// District geometry that cannot be rasterized.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("No geometry for district")]
    Missing,
    #[error("Degenerate geometry: {0}")]
    Degenerate(String),
}

/// Per-district failure. Recoverable: the district is skipped, the cycle continues.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClassificationError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error("Mask is {mask_width}x{mask_height} but image is {image_width}x{image_height}")]
    DimensionMismatch {
        mask_width: u32,
        mask_height: u32,
        image_width: u32,
        image_height: u32,
    },
}

/// Whole-cycle failure, raised before any district work begins.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CycleError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("Base image is empty")]
    EmptyImage,
    #[error("No districts to classify")]
    NoDistricts,
}
