// src/frame_source.rs
//
// Frame collaborators: where rasters come from and how they reach the
// pipeline.
//
// The producer paces the source at the configured fps and publishes into a
// `watch` channel. A watch slot holds exactly one value, so a consumer that
// falls behind only ever sees the most recent frame; intermediate frames
// are overwritten rather than queued. The consumer detects the drop from
// gaps in `frame_id`.

use crate::types::{CaptureRegion, Frame};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

pub trait FrameSource {
    /// The next frame, or `Ok(None)` when no frame is available.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

// ============================================================================
// DIRECTORY SOURCE
// ============================================================================

/// Replays a directory of captured chart images in file-name order.
///
/// Timestamps are synthesised at the capture interval, so a recorded
/// sequence replays with the same timing it was captured at.
pub struct DirectoryFrameSource {
    files: Vec<PathBuf>,
    next_index: usize,
    interval_ms: f64,
    region: Option<CaptureRegion>,
}

impl DirectoryFrameSource {
    pub fn open<P: AsRef<Path>>(dir: P, fps: f64, region: Option<CaptureRegion>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            anyhow::bail!("Frame directory {} does not exist", dir.display());
        }

        let files = find_image_files(dir);
        info!("Found {} frame images in {}", files.len(), dir.display());

        Ok(Self {
            files,
            next_index: 0,
            interval_ms: 1000.0 / fps,
            region,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.files.len().saturating_sub(self.next_index)
    }
}

impl FrameSource for DirectoryFrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.get(self.next_index) else {
            return Ok(None);
        };
        // advance first: a file that fails to decode is skipped, not retried
        let index = self.next_index;
        self.next_index += 1;

        let timestamp_ms = index as f64 * self.interval_ms;
        let frame = load_frame(path, self.region, timestamp_ms, index as u64)?;
        Ok(Some(frame))
    }
}

pub fn find_image_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}

/// Decode an image file into an RGB frame, cropped to `region` if given.
pub fn load_frame(
    path: &Path,
    region: Option<CaptureRegion>,
    timestamp_ms: f64,
    frame_id: u64,
) -> Result<Frame> {
    let mut rgb = image::open(path)
        .with_context(|| format!("Failed to open image: {}", path.display()))?
        .to_rgb8();

    if let Some(r) = region {
        rgb = image::imageops::crop_imm(&rgb, r.left, r.top, r.width, r.height).to_image();
    }

    let (width, height) = rgb.dimensions();
    debug!(
        "Frame {} loaded from {} ({}x{})",
        frame_id,
        path.display(),
        width,
        height
    );
    Ok(Frame::new(
        rgb.into_raw(),
        width as usize,
        height as usize,
        timestamp_ms,
        frame_id,
    ))
}

// ============================================================================
// PACED PRODUCER
// ============================================================================

/// Latest-frame slot shared by producer and consumer.
pub type FrameReceiver = watch::Receiver<Option<Arc<Frame>>>;

/// Drive `source` at `fps` and publish each frame into a latest-wins slot.
///
/// The task ends when the source is exhausted or every receiver is gone,
/// returning how many frames were published. Decode errors skip the file.
pub fn spawn_paced_producer<S>(source: S, fps: f64) -> (FrameReceiver, JoinHandle<Result<u64>>)
where
    S: FrameSource + Send + 'static,
{
    let (tx, rx) = watch::channel(None);
    let period = Duration::from_secs_f64(1.0 / fps);

    let handle = tokio::spawn(async move {
        let mut source = source;
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut published = 0u64;

        loop {
            ticker.tick().await;

            // decoding is blocking file I/O; keep it off the async workers
            let (returned, next) = tokio::task::spawn_blocking(move || {
                let next = source.next_frame();
                (source, next)
            })
            .await
            .context("frame source task panicked")?;
            source = returned;

            match next {
                Ok(Some(frame)) => {
                    if tx.send(Some(Arc::new(frame))).is_err() {
                        debug!("All frame receivers dropped, producer stopping");
                        break;
                    }
                    published += 1;
                }
                Ok(None) => {
                    info!("📭 Frame source exhausted after {} frames", published);
                    break;
                }
                Err(e) => warn!("⚠️  Skipping frame: {:#}", e),
            }
        }

        Ok(published)
    });

    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VecSource {
        frames: std::vec::IntoIter<Frame>,
    }

    impl FrameSource for VecSource {
        fn next_frame(&mut self) -> Result<Option<Frame>> {
            Ok(self.frames.next())
        }
    }

    fn write_png(path: &Path, width: u32, height: u32, rgb: [u8; 3]) {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb(rgb));
        img.save(path).unwrap();
    }

    #[test]
    fn test_directory_source_orders_and_stamps_frames() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("frame_002.png"), 4, 3, [0, 0, 255]);
        write_png(&dir.path().join("frame_001.png"), 4, 3, [255, 0, 0]);
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let mut source = DirectoryFrameSource::open(dir.path(), 2.0, None).unwrap();
        assert_eq!(source.len(), 2);

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!((first.width, first.height), (4, 3));
        assert_eq!(first.pixel(0, 0), [255, 0, 0]);
        assert_eq!(first.timestamp_ms, 0.0);
        assert!(first.validate().is_ok());

        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.timestamp_ms, 500.0);
        assert_eq!(second.frame_id, 1);

        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_region_crop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        write_png(&path, 10, 8, [10, 20, 30]);

        let region = CaptureRegion {
            left: 2,
            top: 1,
            width: 5,
            height: 4,
        };
        let frame = load_frame(&path, Some(region), 0.0, 0).unwrap();
        assert_eq!((frame.width, frame.height), (5, 4));
        assert_eq!(frame.data.len(), 5 * 4 * 3);
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        assert!(DirectoryFrameSource::open("/definitely/not/here", 2.0, None).is_err());
    }

    #[test]
    fn test_corrupt_file_is_skipped_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"garbage").unwrap();
        write_png(&dir.path().join("b.png"), 2, 2, [0, 0, 0]);

        let mut source = DirectoryFrameSource::open(dir.path(), 2.0, None).unwrap();
        assert!(source.next_frame().is_err());
        assert!(source.next_frame().unwrap().is_some());
        assert_eq!(source.remaining(), 0);
    }

    #[tokio::test]
    async fn test_producer_delivers_latest_frame_and_stops() {
        let frames: Vec<Frame> = (0..5)
            .map(|i| Frame::filled(2, 2, [0, 0, 0], i as f64 * 10.0, i))
            .collect();
        let source = VecSource {
            frames: frames.into_iter(),
        };

        let (mut rx, handle) = spawn_paced_producer(source, 200.0);
        let mut last_seen = None;
        while rx.changed().await.is_ok() {
            if let Some(frame) = rx.borrow_and_update().clone() {
                if let Some(prev) = last_seen {
                    assert!(frame.frame_id > prev);
                }
                last_seen = Some(frame.frame_id);
            }
        }

        assert_eq!(handle.await.unwrap().unwrap(), 5);
        // whatever was skipped, the final frame always arrives
        assert_eq!(last_seen, Some(4));
    }
}
