//! Capture device seam: the V4L2 style buffer handshake

use std::io;

use nix::errno::Errno;
use thiserror::Error;

use super::frame::{Dequeued, NegotiatedFormat, PixelFormat};
use super::ring::BufferState;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open capture device {path}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{path} does not support streaming video capture")]
    NotCapture { path: String },
    #[error("device negotiated {actual} instead of {requested}")]
    FormatMismatch { requested: String, actual: String },
    #[error("{op} failed")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("failed to map buffer {index}")]
    Map {
        index: usize,
        #[source]
        source: io::Error,
    },
    #[error("device granted {granted} buffers, at least {required} required")]
    InsufficientBuffers { granted: u32, required: u32 },
    #[error("buffer {index} is out of range for a pool of {count}")]
    UnknownBuffer { index: usize, count: usize },
    #[error("buffer {index} is {actual:?}, expected {expected:?}")]
    Ownership {
        index: usize,
        actual: BufferState,
        expected: BufferState,
    },
    #[error("stream is not running")]
    NotStreaming,
    #[error("no buffer is queued to the device")]
    Starved,
}

impl CaptureError {
    pub(crate) fn io(op: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| CaptureError::Io { op, source }
    }

    /// Interrupted or would-block I/O that is worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            CaptureError::Io { source, .. } => matches!(
                source.raw_os_error().map(Errno::from_raw),
                Some(Errno::EINTR | Errno::EAGAIN)
            ),
            _ => false,
        }
    }
}

/// Operations a capture backend exposes to the buffer ring.
///
/// Call order: `negotiate`, `request_buffers`, `map_buffer` for each index,
/// `enqueue` for each index, `stream_on`, then any number of
/// `dequeue`/`enqueue` pairs, `stream_off`, `release_buffers`.
pub trait CaptureDevice {
    /// Set frame geometry and pixel format
    fn negotiate(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<NegotiatedFormat, CaptureError>;

    /// Ask for `count` buffers; returns how many the device granted
    fn request_buffers(&mut self, count: u32) -> Result<u32, CaptureError>;

    /// Map buffer `index` into process memory; returns its length in bytes
    fn map_buffer(&mut self, index: usize) -> Result<usize, CaptureError>;

    /// Mapped memory of buffer `index`
    fn buffer(&self, index: usize) -> Option<&[u8]>;

    fn stream_on(&mut self) -> Result<(), CaptureError>;

    fn stream_off(&mut self) -> Result<(), CaptureError>;

    /// Hand buffer `index` to the device
    fn enqueue(&mut self, index: usize) -> Result<(), CaptureError>;

    /// Wait for the next filled buffer. Blocks until the device has one.
    fn dequeue(&mut self) -> Result<Dequeued, CaptureError>;

    /// Unmap every buffer and free the pool
    fn release_buffers(&mut self) -> Result<(), CaptureError>;
}
