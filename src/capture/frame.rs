use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Packed 4:2:2, `Y0 U Y1 V`: four bytes for two pixels
    Yuyv4,
}

impl PixelFormat {
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            PixelFormat::Yuyv4 => *b"YUYV",
        }
    }

    /// Bytes one full frame occupies
    pub fn frame_bytes(&self, width: u32, height: u32) -> usize {
        match self {
            PixelFormat::Yuyv4 => width as usize * height as usize * 2,
        }
    }
}

/// Format the device actually accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Bytes per line
    pub stride: u32,
    /// Maximum bytes per image
    pub size: u32,
}

/// A filled buffer handed back by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dequeued {
    pub index: usize,
    pub bytes_used: usize,
    pub sequence: u32,
    /// Hardware timestamp if available
    pub timestamp: Option<Duration>,
}
