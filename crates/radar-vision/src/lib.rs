//! District-level classification of radar screenshots.
//!
//! A cropped radar image is aligned to a geographic [`BoundingBox`]; each
//! district polygon is rasterized onto the image grid, the pixels under it are
//! isolated, and their colors are matched against the radar [`Legend`].

pub mod classify;
pub mod cycle;
pub mod error;
pub mod extract;
pub mod geo_raster;
pub mod legend;
pub mod rasterize;

pub use classify::{classify_district, ClassificationResult, DistrictGeometry, NO_SIGNAL};
pub use cycle::{run_cycle, run_cycle_with, CaptureRun, CycleOptions, DistrictFailure};
pub use error::{ClassificationError, ConfigurationError, CycleError, GeometryError};
pub use extract::{extract, present_colors, ABSENT};
pub use geo_raster::{AffineMap, BoundingBox};
pub use legend::{color_distance, Legend, LegendEntry, DEFAULT_TOLERANCE};
pub use rasterize::{rasterize, PixelMask};
