use anyhow::{Context, Result};
use radar_capture::{CaptureSource, CaptureStatus, CapturedFrame};
use radar_data::{DeploymentConfig, DistrictCatalog};
use radar_state::RunArchive;
use radar_vision::{
    extract, rasterize, run_cycle_with, AffineMap, CaptureRun, ClassificationError, CycleOptions, DistrictGeometry,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Manages the capture → crop → classify → archive pipeline
pub struct Pipeline {
    config: DeploymentConfig,
    districts: Vec<DistrictGeometry>,
    archive: RunArchive,
    options: CycleOptions,
    save_masked: bool,
}

impl Pipeline {
    /// Load the district catalog named by the config.
    pub fn new(config: DeploymentConfig) -> Result<Self> {
        let catalog = DistrictCatalog::load(&config.geometry_path, &config.region)?;
        if catalog.is_empty() {
            anyhow::bail!(
                "No districts matched {:?} in {}",
                config.region.regions,
                config.geometry_path.display()
            );
        }
        info!("Loaded {} district(s)", catalog.len());
        Ok(Self::with_districts(config, catalog.districts()))
    }

    pub fn with_districts(config: DeploymentConfig, districts: Vec<DistrictGeometry>) -> Self {
        let archive = RunArchive::new(config.archive_dir.clone());
        Self {
            config,
            districts,
            archive,
            options: CycleOptions::default(),
            save_masked: true,
        }
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.options.parallel = parallel;
        self
    }

    /// Store each district's isolated image with the run. On by default.
    pub fn save_masked(mut self, save_masked: bool) -> Self {
        self.save_masked = save_masked;
        self
    }

    pub fn archive(&self) -> &RunArchive {
        &self.archive
    }

    /// One capture cycle. Its records are stored only when cropping, the cycle
    /// and every image write succeed.
    pub fn run_once(&self, frame: &CapturedFrame) -> Result<CaptureRun> {
        let cropped = radar_capture::crop(&frame.image, &self.config.crop_box)?;
        let run = run_cycle_with(
            &cropped,
            frame.captured_at,
            &self.districts,
            self.config.bbox,
            &self.config.legend,
            self.config.tolerance,
            self.options,
        )
        .context("Capture cycle failed")?;

        // Masked images go first; the results file written by save_run marks
        // the run complete.
        if self.save_masked {
            let map = AffineMap::from_bounds(self.config.bbox, cropped.width(), cropped.height())?;
            let ts = run.captured_at.naive_local();
            for district in self.districts.iter().filter(|d| !d.is_missing()) {
                let masked = rasterize(&district.polygons, &map)
                    .map_err(ClassificationError::from)
                    .and_then(|mask| extract(&cropped, &mask));
                match masked {
                    Ok(image) => {
                        self.archive.save_masked(ts, &district.name, &image)?;
                    }
                    Err(e) => debug!("No masked image for {}: {}", district.name, e),
                }
            }
        }

        self.archive.save_run(&run, Some(&frame.image), &cropped)?;

        Ok(run)
    }

    /// Start the capture loop and the classification task behind it.
    pub fn start<S>(self: Arc<Self>, source: S) -> WatchHandle
    where
        S: CaptureSource + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));

        let (frame_tx, frame_rx) = watch::channel::<Option<Arc<CapturedFrame>>>(None);
        let (status_tx, status_rx) = watch::channel(CaptureStatus::default());
        let (run_tx, run_rx) = watch::channel::<Option<Arc<CaptureRun>>>(None);

        let interval = Duration::from_secs(self.config.capture_interval_secs);

        let stop_capture = stop.clone();
        tokio::spawn(radar_capture::capture_loop(source, frame_tx, status_tx, interval, stop_capture));

        // Classification loop
        let mut cycle_frame_rx = frame_rx;
        let stop_cycle = stop.clone();
        let pipeline = self;
        tokio::spawn(async move {
            loop {
                if stop_cycle.load(Ordering::Relaxed) {
                    break;
                }
                if cycle_frame_rx.changed().await.is_err() {
                    break;
                }

                let frame = cycle_frame_rx.borrow().clone();
                let Some(frame) = frame else {
                    continue;
                };
                let p = pipeline.clone();
                let result = tokio::task::spawn_blocking(move || p.run_once(&frame)).await;

                match result {
                    Ok(Ok(run)) => {
                        let _ = run_tx.send(Some(Arc::new(run)));
                    }
                    Ok(Err(e)) => warn!("Cycle skipped: {:#}", e),
                    Err(e) => {
                        warn!("Cycle task panicked: {}", e);
                        break;
                    }
                }
            }
            debug!("Classification loop stopped");
        });

        info!("Pipeline started");

        WatchHandle {
            stop,
            status_rx,
            run_rx,
        }
    }
}

/// Running pipeline: status, latest completed run, and the stop switch.
pub struct WatchHandle {
    stop: Arc<AtomicBool>,
    status_rx: watch::Receiver<CaptureStatus>,
    run_rx: watch::Receiver<Option<Arc<CaptureRun>>>,
}

impl WatchHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        info!("Pipeline stop requested");
    }

    pub fn capture_status(&self) -> CaptureStatus {
        self.status_rx.borrow().clone()
    }

    pub fn latest_run(&self) -> Option<Arc<CaptureRun>> {
        self.run_rx.borrow().clone()
    }

    /// Wait for the next completed run. `None` once the pipeline has shut down.
    pub async fn next_run(&mut self) -> Option<Arc<CaptureRun>> {
        loop {
            self.run_rx.changed().await.ok()?;
            if let Some(run) = self.run_rx.borrow_and_update().clone() {
                return Some(run);
            }
        }
    }
}

/// Screenshot path from the CLI, or the configured one.
pub fn screenshot_path(config: &DeploymentConfig, overridden: Option<PathBuf>) -> PathBuf {
    overridden.unwrap_or_else(|| config.screenshot_path.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use geo::{LineString, Polygon};
    use image::{Rgba, RgbaImage};
    use radar_capture::CropBox;
    use radar_state::RecordFilter;

    const RED: Rgba<u8> = Rgba([241, 86, 59, 255]);
    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    fn temp_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("radar_watch_{}_{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    /// 60x50 frame whose 40x40 crop at (10, 5) is red on the top half.
    fn frame() -> CapturedFrame {
        let image = RgbaImage::from_fn(60, 50, |x, y| {
            if (10..50).contains(&x) && (5..25).contains(&y) {
                RED
            } else {
                WHITE
            }
        });
        CapturedFrame {
            image,
            captured_at: Local.with_ymd_and_hms(2025, 6, 27, 10, 0, 0).unwrap(),
        }
    }

    fn pipeline(root: &std::path::Path) -> Pipeline {
        let config = DeploymentConfig {
            crop_box: CropBox::new(10, 5, 50, 45),
            archive_dir: root.to_path_buf(),
            ..DeploymentConfig::default()
        };
        let map = AffineMap::from_bounds(config.bbox, 40, 40).unwrap();
        let district = |name: &str, y0: f64, y1: f64| {
            let corners = [(0.0, y0), (40.0, y0), (40.0, y1), (0.0, y1), (0.0, y0)]
                .iter()
                .map(|&(x, y)| map.pixel_to_geo(x, y))
                .collect::<Vec<_>>();
            DistrictGeometry::from_parts(name, [Polygon::new(LineString::from(corners), vec![])])
        };
        let districts = vec![
            district("Chennai", 0.0, 20.0),
            district("Salem", 20.0, 40.0),
            DistrictGeometry::missing("Atlantis"),
        ];
        Pipeline::with_districts(config, districts)
    }

    #[test]
    fn test_run_once_archives_run() {
        let root = temp_root("once");
        let p = pipeline(&root);
        let f = frame();

        let run = p.run_once(&f).unwrap();
        assert_eq!(run.results.len(), 2);
        assert_eq!(run.skipped.len(), 1);
        assert_eq!(run.result_for("chennai").unwrap().text(), "20 mm - Red");
        assert!(!run.result_for("Salem").unwrap().has_signal());

        let runs = p.archive().list_runs().unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].cropped_path().exists());
        assert!(runs[0].dir.join(radar_state::FULL_IMAGE).exists());
        assert!(runs[0]
            .dir
            .join("masked_cropped/Chennai/chennai_masked.png")
            .exists());

        let records = p
            .archive()
            .query(&RecordFilter::for_date(f.captured_at.date_naive()))
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].city, "Chennai");

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_failed_cycle_persists_nothing() {
        let root = temp_root("failed");
        let p = pipeline(&root);
        let small = CapturedFrame {
            image: RgbaImage::from_pixel(30, 30, WHITE),
            captured_at: Local::now(),
        };
        assert!(p.run_once(&small).is_err());
        assert!(p.archive().list_runs().unwrap().is_empty());

        let empty = Pipeline::with_districts(p.config.clone(), Vec::new());
        assert!(empty.run_once(&frame()).is_err());
        assert!(empty.archive().list_runs().unwrap().is_empty());
    }

    #[test]
    fn test_failed_masked_write_persists_no_records() {
        let root = temp_root("masked_fail");
        let p = pipeline(&root);
        let f = frame();

        // A plain file where the masked image directory should go
        let run_dir = p.archive().run_dir(f.captured_at.naive_local());
        std::fs::create_dir_all(&run_dir).unwrap();
        std::fs::write(run_dir.join("masked_cropped"), b"").unwrap();

        assert!(p.run_once(&f).is_err());
        let records = p
            .archive()
            .query(&RecordFilter::for_date(f.captured_at.date_naive()))
            .unwrap();
        assert!(records.is_empty());
        assert!(!run_dir.join(radar_state::RESULTS_FILE).exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_masked_images_can_be_disabled() {
        let root = temp_root("no_masked");
        let p = pipeline(&root).save_masked(false);
        let f = frame();

        p.run_once(&f).unwrap();
        let run_dir = p.archive().run_dir(f.captured_at.naive_local());
        assert!(run_dir.join(radar_state::RESULTS_FILE).exists());
        assert!(!run_dir.join("masked_cropped").exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    struct RepeatSource;

    impl CaptureSource for RepeatSource {
        fn describe(&self) -> String {
            "[Test] repeat".into()
        }

        fn capture(&mut self) -> Result<CapturedFrame> {
            Ok(frame())
        }
    }

    #[tokio::test]
    async fn test_watch_publishes_runs() {
        let root = temp_root("watch");
        let mut p = pipeline(&root).parallel(true);
        p.config.capture_interval_secs = 1;
        let mut handle = Arc::new(p).start(RepeatSource);

        let run = tokio::time::timeout(Duration::from_secs(10), handle.next_run())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(run.results.len(), 2);
        assert!(handle.latest_run().is_some());
        assert!(handle.capture_status().captures >= 1);

        handle.stop();
        let _ = std::fs::remove_dir_all(&root);
    }
}
