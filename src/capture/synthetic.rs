//! In-memory capture device producing YUYV test frames

use std::io;
use std::time::Instant;

use nix::errno::Errno;
use ringbuf::{traits::*, HeapRb};
use tracing::debug;

use super::device::{CaptureDevice, CaptureError};
use super::frame::{Dequeued, NegotiatedFormat, PixelFormat};

/// Neutral mid-gray macropixel
pub const GRAY: [u8; 4] = [128, 128, 128, 128];

/// Fills a buffer for frame `sequence` and returns the bytes used
pub type FramePainter = Box<dyn FnMut(u32, u32, u32, &mut [u8]) -> usize + Send>;

/// Uniform gray YUYV frame
pub fn gray_frame(width: u32, height: u32) -> Vec<u8> {
    GRAY.repeat(width as usize * height as usize / 2)
}

/// Make pixel (x, y) a saturated red marker. Its macropixel partner gets a
/// luma too dark to qualify, so exactly one pixel stands out.
pub fn put_marker(raw: &mut [u8], width: u32, x: u32, y: u32) {
    let pair = (y as usize * width as usize + (x & !1) as usize) * 2;
    let macropixel = if x % 2 == 0 {
        [81, 90, 16, 240]
    } else {
        [16, 90, 81, 240]
    };
    raw[pair..pair + 4].copy_from_slice(&macropixel);
}

/// Capture device backed by heap buffers.
///
/// Queued buffers are filled in FIFO order, like a driver would. An empty
/// queue yields `CaptureError::Starved` instead of blocking forever.
pub struct SyntheticDevice {
    format: Option<NegotiatedFormat>,
    buffers: Vec<Vec<u8>>,
    mapped: Vec<bool>,
    queue: HeapRb<usize>,
    streaming: bool,
    sequence: u32,
    started: Instant,
    painter: FramePainter,
}

impl SyntheticDevice {
    pub fn new(painter: FramePainter) -> Self {
        Self {
            format: None,
            buffers: Vec::new(),
            mapped: Vec::new(),
            queue: HeapRb::new(1),
            streaming: false,
            sequence: 0,
            started: Instant::now(),
            painter,
        }
    }

    /// Gray scene with a red dot wandering through every direction zone
    pub fn moving_dot() -> Self {
        Self::new(Box::new(|sequence, width, height, buf| {
            let frame = gray_frame(width, height);
            let len = frame.len().min(buf.len());
            buf[..len].copy_from_slice(&frame[..len]);

            let x = sequence.wrapping_mul(7) % width;
            let y = sequence.wrapping_mul(3) % height;
            if len == frame.len() {
                put_marker(buf, width, x, y);
            }
            len
        }))
    }

    /// Every frame is a copy of `raw`
    pub fn replay(raw: Vec<u8>) -> Self {
        Self::new(Box::new(move |_, _, _, buf| {
            let len = raw.len().min(buf.len());
            buf[..len].copy_from_slice(&raw[..len]);
            len
        }))
    }

    /// Indices currently queued, in fill order
    pub fn queued(&self) -> Vec<usize> {
        self.queue.iter().copied().collect()
    }

    fn invalid(op: &'static str) -> CaptureError {
        CaptureError::Io {
            op,
            source: io::Error::from(Errno::EINVAL),
        }
    }
}

impl CaptureDevice for SyntheticDevice {
    fn negotiate(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<NegotiatedFormat, CaptureError> {
        let negotiated = NegotiatedFormat {
            width,
            height,
            format,
            stride: width * 2,
            size: format.frame_bytes(width, height) as u32,
        };
        self.format = Some(negotiated);
        Ok(negotiated)
    }

    fn request_buffers(&mut self, count: u32) -> Result<u32, CaptureError> {
        let format = self.format.ok_or_else(|| Self::invalid("VIDIOC_REQBUFS"))?;
        let count = count as usize;
        self.buffers = vec![vec![0; format.size as usize]; count];
        self.mapped = vec![false; count];
        self.queue = HeapRb::new(count.max(1));
        Ok(count as u32)
    }

    fn map_buffer(&mut self, index: usize) -> Result<usize, CaptureError> {
        let len = self
            .buffers
            .get(index)
            .map(Vec::len)
            .ok_or_else(|| Self::invalid("VIDIOC_QUERYBUF"))?;
        self.mapped[index] = true;
        Ok(len)
    }

    fn buffer(&self, index: usize) -> Option<&[u8]> {
        match self.mapped.get(index) {
            Some(true) => self.buffers.get(index).map(Vec::as_slice),
            _ => None,
        }
    }

    fn stream_on(&mut self) -> Result<(), CaptureError> {
        self.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> Result<(), CaptureError> {
        self.streaming = false;
        self.queue.clear();
        Ok(())
    }

    fn enqueue(&mut self, index: usize) -> Result<(), CaptureError> {
        if !self.mapped.get(index).copied().unwrap_or(false) || self.queue.iter().any(|&i| i == index) {
            return Err(Self::invalid("VIDIOC_QBUF"));
        }
        self.queue
            .try_push(index)
            .map_err(|_| Self::invalid("VIDIOC_QBUF"))
    }

    fn dequeue(&mut self) -> Result<Dequeued, CaptureError> {
        if !self.streaming {
            return Err(CaptureError::NotStreaming);
        }
        let index = self.queue.try_pop().ok_or(CaptureError::Starved)?;
        let format = self.format.ok_or_else(|| Self::invalid("VIDIOC_DQBUF"))?;

        self.sequence = self.sequence.wrapping_add(1);
        let bytes_used = (self.painter)(
            self.sequence,
            format.width,
            format.height,
            &mut self.buffers[index],
        );
        debug!("Synthetic frame {} in buffer {}", self.sequence, index);

        Ok(Dequeued {
            index,
            bytes_used,
            sequence: self.sequence,
            timestamp: Some(self.started.elapsed()),
        })
    }

    fn release_buffers(&mut self) -> Result<(), CaptureError> {
        self.buffers.clear();
        self.mapped.clear();
        self.queue.clear();
        Ok(())
    }
}
