//! Deployment configuration and district boundaries.

mod catalog;

pub use catalog::{available_district_names, DistrictCatalog, RegionFilter};

use anyhow::{bail, Context, Result};
use radar_capture::CropBox;
use radar_vision::{BoundingBox, Legend, DEFAULT_TOLERANCE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the configuration file inside the data directory.
pub const CONFIG_FILE: &str = "deployment.json";

/// Static per-deployment settings. Every field has a default, so a partial
/// `deployment.json` only overrides what it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    /// Geographic extent the cropped screenshot covers
    pub bbox: BoundingBox,
    pub crop_box: CropBox,
    pub legend: Legend,
    pub tolerance: f64,
    /// Screenshot written by the external browser automation
    pub screenshot_path: PathBuf,
    /// Root of the per-run image and results archive
    pub archive_dir: PathBuf,
    /// GeoJSON file with district boundaries
    pub geometry_path: PathBuf,
    pub region: RegionFilter,
    /// Districts to report when the geometry file can't be read
    pub fallback_districts: Vec<String>,
    pub capture_interval_secs: u64,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            bbox: BoundingBox::default(),
            crop_box: CropBox::default(),
            legend: Legend::windy(),
            tolerance: DEFAULT_TOLERANCE,
            screenshot_path: PathBuf::from("images/windy_map_full.png"),
            archive_dir: PathBuf::from("images"),
            geometry_path: PathBuf::from("data/gadm41_IND_2.json"),
            region: RegionFilter::default(),
            fallback_districts: ["Coimbatore", "Chennai", "Madurai", "Trichy", "Salem", "Ariyalur"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            capture_interval_secs: 900,
        }
    }
}

impl DeploymentConfig {
    /// Load `deployment.json` from the data directory.
    /// Relative paths in the file are resolved against `data_dir`.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join(CONFIG_FILE);
        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            let config: Self = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?;
            tracing::info!("Loaded deployment config from {}", config_path.display());
            config
        } else {
            tracing::warn!(
                "No {} found at {}. Using built-in defaults",
                CONFIG_FILE,
                config_path.display()
            );
            Self::default()
        };

        for path in [
            &mut config.screenshot_path,
            &mut config.archive_dir,
            &mut config.geometry_path,
        ] {
            if path.is_relative() {
                *path = data_dir.join(&*path);
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.bbox.validate()?;
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            bail!("Tolerance must be a non-negative number, got {}", self.tolerance);
        }
        if self.legend.is_empty() {
            bail!("Legend has no entries");
        }
        if self.crop_box.width() == 0 || self.crop_box.height() == 0 {
            bail!("Crop box {:?} is empty", self.crop_box);
        }
        Ok(())
    }
}
