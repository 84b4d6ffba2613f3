use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Pixel rectangle `[left, right) x [top, bottom)` cut out of a full screenshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl CropBox {
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    /// Whether the box is non-empty and lies inside a `width x height` frame.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.left < self.right && self.right <= width && self.top < self.bottom && self.bottom <= height
    }
}

/// Tamil Nadu region of a 1920x1080 Windy radar screenshot.
impl Default for CropBox {
    fn default() -> Self {
        Self::new(551, 170, 1065, 687)
    }
}

/// A screenshot and the moment it was taken.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub image: RgbaImage,
    pub captured_at: DateTime<Local>,
}

/// Something that can produce radar screenshots on demand.
///
/// Driving the browser is left to an external automation; implementations
/// only have to hand over the resulting image.
pub trait CaptureSource: Send {
    fn describe(&self) -> String;
    fn capture(&mut self) -> Result<CapturedFrame>;
}

/// Picks up the screenshot an external browser automation writes to a fixed path.
pub struct FileCapture {
    path: PathBuf,
}

impl FileCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CaptureSource for FileCapture {
    fn describe(&self) -> String {
        format!("[File] {}", self.path.display())
    }

    fn capture(&mut self) -> Result<CapturedFrame> {
        let captured_at = Local::now();
        let image = load_frame(&self.path)?;
        debug!(
            "Loaded {}x{} screenshot from {}",
            image.width(),
            image.height(),
            self.path.display()
        );
        Ok(CapturedFrame { image, captured_at })
    }
}

/// Open any supported image file as RGBA.
pub fn load_frame(path: &Path) -> Result<RgbaImage> {
    let img = image::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(img.to_rgba8())
}

/// Cut `crop` out of a full screenshot. Fails if the box falls outside the frame.
pub fn crop(frame: &RgbaImage, crop: &CropBox) -> Result<RgbaImage> {
    let (w, h) = frame.dimensions();
    if !crop.fits(w, h) {
        bail!("Crop box {:?} is out of bounds for a {}x{} frame", crop, w, h);
    }
    Ok(image::imageops::crop_imm(frame, crop.left, crop.top, crop.width(), crop.height()).to_image())
}

/// Status of the capture loop
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureStatus {
    pub is_capturing: bool,
    pub source: Option<String>,
    pub captures: u64,
    pub failures: u64,
    pub last_capture_time: Option<DateTime<Local>>,
    pub resolution: Option<(u32, u32)>,
}

/// The capture loop that runs as a background task.
/// Sends frames through the watch channel and status updates through the status channel.
pub async fn capture_loop<S>(
    source: S,
    frame_tx: watch::Sender<Option<Arc<CapturedFrame>>>,
    status_tx: watch::Sender<CaptureStatus>,
    capture_interval: Duration,
    stop: Arc<AtomicBool>,
) where
    S: CaptureSource + 'static,
{
    info!("Capture loop started, interval: {:?}", capture_interval);

    let description = source.describe();
    let mut source = Some(source);
    let mut status = CaptureStatus {
        source: Some(description),
        ..CaptureStatus::default()
    };

    loop {
        if stop.load(Ordering::Relaxed) {
            info!("Capture loop stopping (stop signal received)");
            break;
        }

        let tick = Instant::now();

        // Capture on a blocking thread; the source comes back with the result
        let Some(mut src) = source.take() else {
            break;
        };
        let capture_result = tokio::task::spawn_blocking(move || {
            let frame = src.capture();
            (src, frame)
        })
        .await;

        match capture_result {
            Ok((src, Ok(frame))) => {
                source = Some(src);
                status.is_capturing = true;
                status.captures += 1;
                status.last_capture_time = Some(frame.captured_at);
                status.resolution = Some(frame.image.dimensions());
                let _ = status_tx.send(status.clone());
                let _ = frame_tx.send(Some(Arc::new(frame)));
            }
            Ok((src, Err(e))) => {
                source = Some(src);
                warn!("Capture failed: {:#}", e);
                status.is_capturing = false;
                status.failures += 1;
                let _ = status_tx.send(status.clone());
            }
            Err(e) => {
                warn!("Capture task panicked: {}", e);
                break;
            }
        }

        // Sleep until next capture interval
        let elapsed = tick.elapsed();
        if elapsed < capture_interval {
            tokio::time::sleep(capture_interval - elapsed).await;
        } else {
            // Yield to prevent busy loop
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    let _ = status_tx.send(CaptureStatus::default());
    info!("Capture loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    struct SolidSource {
        remaining: u32,
    }

    impl CaptureSource for SolidSource {
        fn describe(&self) -> String {
            "[Test] solid".into()
        }

        fn capture(&mut self) -> Result<CapturedFrame> {
            if self.remaining == 0 {
                bail!("exhausted");
            }
            self.remaining -= 1;
            Ok(CapturedFrame {
                image: RgbaImage::from_pixel(8, 6, Rgba([1, 2, 3, 255])),
                captured_at: Local::now(),
            })
        }
    }

    #[test]
    fn test_crop_box_default_fits_full_hd() {
        let crop_box = CropBox::default();
        assert!(crop_box.fits(1920, 1080));
        assert_eq!(crop_box.width(), 514);
        assert_eq!(crop_box.height(), 517);
    }

    #[test]
    fn test_crop() {
        let img = RgbaImage::from_fn(1920, 1080, |x, y| Rgba([(x % 256) as u8, (y % 256) as u8, 0, 255]));
        let cropped = crop(&img, &CropBox::default()).unwrap();
        assert_eq!(cropped.dimensions(), (514, 517));
        assert_eq!(*cropped.get_pixel(0, 0), *img.get_pixel(551, 170));
    }

    #[test]
    fn test_crop_out_of_bounds() {
        let img = RgbaImage::new(800, 600);
        assert!(crop(&img, &CropBox::default()).is_err());
        assert!(crop(&img, &CropBox::new(10, 10, 10, 20)).is_err());
    }

    #[test]
    fn test_file_capture_missing_file() {
        let mut source = FileCapture::new("/nonexistent/windy_map_full.png");
        assert!(source.capture().is_err());
    }

    #[test]
    fn test_file_capture_reads_png() {
        let dir = std::env::temp_dir().join(format!("radar_capture_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("shot.png");
        RgbaImage::from_pixel(5, 4, Rgba([9, 8, 7, 255])).save(&path).unwrap();

        let frame = FileCapture::new(&path).capture().unwrap();
        assert_eq!(frame.image.dimensions(), (5, 4));
        assert_eq!(*frame.image.get_pixel(2, 2), Rgba([9, 8, 7, 255]));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_capture_loop_publishes_frames() {
        let (frame_tx, mut frame_rx) = watch::channel(None);
        let (status_tx, status_rx) = watch::channel(CaptureStatus::default());
        let stop = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn(capture_loop(
            SolidSource { remaining: 1 },
            frame_tx,
            status_tx,
            Duration::from_millis(10),
            stop.clone(),
        ));

        frame_rx.changed().await.unwrap();
        let frame = frame_rx.borrow().clone().unwrap();
        assert_eq!(frame.image.dimensions(), (8, 6));
        assert!(status_rx.borrow().captures >= 1);

        stop.store(true, Ordering::Relaxed);
        handle.await.unwrap();
    }
}
