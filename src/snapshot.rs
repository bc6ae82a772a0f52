//! Snapshot path: published-frame handoff, trigger channel and PNG writer.
//!
//! The main loop never shares its working frame. After presenting it, the loop
//! publishes the frame into a [`FrameExchange`] and gets a spare buffer back,
//! so the snapshot worker only ever sees complete frames.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use flume::{Receiver, Sender, TrySendError};
use image::{ExtendedColorType, ImageFormat};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::pipeline::frame::{Frame, BYTES_PER_PIXEL};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("frame is empty")]
    EmptyFrame,
    #[error("buffer of {actual} bytes does not hold {rows} rows of stride {stride}")]
    Geometry {
        rows: u32,
        stride: usize,
        actual: usize,
    },
    #[error("unsupported channel count {0}")]
    Channels(u8),
    #[error("failed to encode snapshot")]
    Encode(#[from] image::ImageError),
    #[error("snapshot task failed")]
    Task(#[from] tokio::task::JoinError),
}

/// Writes a packed image somewhere
pub trait ImageEncoder: Send + Sync {
    fn encode(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        channels: u8,
        stride: usize,
    ) -> Result<(), SnapshotError>;
}

/// PNG file writer
#[derive(Debug, Clone)]
pub struct PngEncoder {
    path: PathBuf,
}

impl PngEncoder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ImageEncoder for PngEncoder {
    fn encode(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        channels: u8,
        stride: usize,
    ) -> Result<(), SnapshotError> {
        let color = match channels {
            3 => ExtendedColorType::Rgb8,
            4 => ExtendedColorType::Rgba8,
            n => return Err(SnapshotError::Channels(n)),
        };
        let row = width as usize * channels as usize;
        if stride < row || pixels.len() < stride * height as usize {
            return Err(SnapshotError::Geometry {
                rows: height,
                stride,
                actual: pixels.len(),
            });
        }

        // the encoder wants tightly packed rows
        let packed: Vec<u8>;
        let data = if stride == row {
            &pixels[..row * height as usize]
        } else {
            packed = pixels
                .chunks(stride)
                .take(height as usize)
                .flat_map(|line| &line[..row])
                .copied()
                .collect();
            packed.as_slice()
        };

        image::save_buffer_with_format(&self.path, data, width, height, color, ImageFormat::Png)?;
        Ok(())
    }
}

/// Copy `frame` into RGBA order and hand it to `encoder`
pub fn write_snapshot(frame: &Frame, encoder: &dyn ImageEncoder) -> Result<(), SnapshotError> {
    if frame.pixel_count() == 0 {
        return Err(SnapshotError::EmptyFrame);
    }

    let mut rgba = frame.as_bytes().to_vec();
    for px in rgba.chunks_exact_mut(BYTES_PER_PIXEL) {
        px.swap(0, 2);
    }

    encoder.encode(
        &rgba,
        frame.width(),
        frame.height(),
        BYTES_PER_PIXEL as u8,
        frame.stride(),
    )?;
    metrics::counter!("snapshots_written_total").increment(1);
    Ok(())
}

/// Slot holding the most recently completed frame
pub struct FrameExchange {
    slot: ArcSwap<Frame>,
}

impl FrameExchange {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            slot: ArcSwap::from_pointee(Frame::new(width, height)),
        }
    }

    /// Publish a finished frame and get a buffer to draw the next one into.
    /// The previous frame is reused unless a reader still holds it.
    pub fn publish(&self, frame: Frame) -> Frame {
        let previous = self.slot.swap(Arc::new(frame));
        match Arc::try_unwrap(previous) {
            Ok(spare) => spare,
            Err(shared) => Frame::new(shared.width(), shared.height()),
        }
    }

    pub fn latest(&self) -> Arc<Frame> {
        self.slot.load_full()
    }
}

/// Sending half of the snapshot request channel
#[derive(Debug, Clone)]
pub struct SnapshotTrigger {
    tx: Sender<()>,
}

impl SnapshotTrigger {
    /// Single-slot channel; requests made while one is pending coalesce
    pub fn channel() -> (Self, Receiver<()>) {
        let (tx, rx) = flume::bounded(1);
        (Self { tx }, rx)
    }

    /// Ask for a snapshot. Returns false if the worker is gone.
    pub fn request(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                debug!("Snapshot already pending");
                true
            }
            Err(TrySendError::Disconnected(())) => false,
        }
    }
}

/// Spawn the snapshot worker. It exits once every trigger is dropped.
pub fn spawn_snapshot_worker<E>(
    exchange: Arc<FrameExchange>,
    requests: Receiver<()>,
    encoder: Arc<E>,
) -> JoinHandle<u64>
where
    E: ImageEncoder + 'static,
{
    tokio::spawn(async move {
        let mut written = 0;
        while requests.recv_async().await.is_ok() {
            let frame = exchange.latest();
            let encoder = Arc::clone(&encoder);
            let result = tokio::task::spawn_blocking(move || write_snapshot(&frame, &*encoder))
                .await
                .map_err(SnapshotError::from)
                .and_then(|r| r);

            match result {
                Ok(()) => {
                    written += 1;
                    info!("Snapshot written");
                }
                Err(e) => error!("Snapshot failed: {}", e),
            }
        }
        debug!("Snapshot worker stopped after {} snapshots", written);
        written
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::frame::Pixel;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        images: Mutex<Vec<(Vec<u8>, u32, u32, u8, usize)>>,
    }

    impl ImageEncoder for Recording {
        fn encode(
            &self,
            pixels: &[u8],
            width: u32,
            height: u32,
            channels: u8,
            stride: usize,
        ) -> Result<(), SnapshotError> {
            self.images
                .lock()
                .unwrap()
                .push((pixels.to_vec(), width, height, channels, stride));
            Ok(())
        }
    }

    #[test]
    fn snapshot_swaps_red_and_blue() {
        let mut frame = Frame::new(2, 1);
        frame.set_pixel(0, 0, Pixel::opaque(10, 20, 30));
        frame.set_pixel(1, 0, Pixel::opaque(255, 0, 0));

        let rec = Recording::default();
        write_snapshot(&frame, &rec).unwrap();

        let images = rec.images.lock().unwrap();
        let (pixels, w, h, channels, stride) = &images[0];
        assert_eq!((*w, *h, *channels, *stride), (2, 1, 4, 8));
        assert_eq!(pixels, &vec![10, 20, 30, 255, 255, 0, 0, 255]);
        // the source frame is untouched
        assert_eq!(frame.pixel(0, 0), Pixel::opaque(10, 20, 30));
    }

    #[test]
    fn empty_frame_is_rejected() {
        let rec = Recording::default();
        let frame = Frame::new(0, 0);
        assert!(matches!(
            write_snapshot(&frame, &rec),
            Err(SnapshotError::EmptyFrame)
        ));
    }

    #[test]
    fn publish_recycles_unshared_frames() {
        let exchange = FrameExchange::new(4, 2);
        let first = Frame::filled(4, 2, Pixel::opaque(1, 2, 3));
        let spare = exchange.publish(first);
        assert_eq!(spare.width(), 4);
        assert_eq!(exchange.latest().pixel(3, 1), Pixel::opaque(1, 2, 3));

        // a reader holding the published frame keeps it alive and intact
        let held = exchange.latest();
        let spare = exchange.publish(Frame::filled(4, 2, Pixel::opaque(9, 9, 9)));
        assert_eq!(spare.pixel(0, 0), Pixel::default());
        assert_eq!(held.pixel(0, 0), Pixel::opaque(1, 2, 3));
        assert_eq!(exchange.latest().pixel(0, 0), Pixel::opaque(9, 9, 9));
    }

    #[test]
    fn requests_coalesce() {
        let (trigger, rx) = SnapshotTrigger::channel();
        assert!(trigger.request());
        assert!(trigger.request());
        assert_eq!(rx.len(), 1);
        drop(rx);
        assert!(!trigger.request());
    }

    #[test]
    fn png_round_trip_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.png");
        let frame = Frame::filled(6, 3, Pixel::opaque(0, 0, 255));

        write_snapshot(&frame, &PngEncoder::new(&path)).unwrap();

        let img = image::open(&path).unwrap().into_rgba8();
        assert_eq!(img.dimensions(), (6, 3));
        assert_eq!(img.get_pixel(5, 2).0, [0, 0, 255, 255]);
    }

    #[test]
    fn png_repacks_padded_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("padded.png");
        // two RGB pixels per row, padded to 8 bytes
        let pixels = [1, 2, 3, 4, 5, 6, 0, 0, 7, 8, 9, 10, 11, 12, 0, 0];

        PngEncoder::new(&path).encode(&pixels, 2, 2, 3, 8).unwrap();

        let img = image::open(&path).unwrap().into_rgb8();
        assert_eq!(img.get_pixel(1, 1).0, [10, 11, 12]);
        assert!(matches!(
            PngEncoder::new(&path).encode(&pixels, 2, 3, 3, 8),
            Err(SnapshotError::Geometry { .. })
        ));
    }

    #[tokio::test]
    async fn worker_writes_latest_frame() {
        let exchange = Arc::new(FrameExchange::new(2, 2));
        let (trigger, rx) = SnapshotTrigger::channel();
        let rec = Arc::new(Recording::default());
        let worker = spawn_snapshot_worker(Arc::clone(&exchange), rx, Arc::clone(&rec));

        exchange.publish(Frame::filled(2, 2, Pixel::opaque(0, 255, 0)));
        assert!(trigger.request());
        drop(trigger);

        assert_eq!(worker.await.unwrap(), 1);
        let images = rec.images.lock().unwrap();
        assert_eq!(&images[0].0[..4], &[0, 255, 0, 255]);
    }
}
