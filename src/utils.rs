use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing::{debug, info};
use v4l::{capability::Flags, video::Capture, Device, FourCC};

use crate::capture::frame::PixelFormat;

// Detected capture device info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundDevice {
    pub path: String,
    pub card: String,
}

/// Find the first capture node that streams `format`
pub fn auto_detect_device(format: PixelFormat) -> Result<FoundDevice> {
    info!("Auto-detecting capture devices...");
    let fourcc = FourCC::new(&format.fourcc());

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            debug!("Cannot open {}", path);
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps
            .capabilities
            .contains(Flags::VIDEO_CAPTURE | Flags::STREAMING)
        {
            continue;
        }

        if let Ok(formats) = dev.enum_formats() {
            if formats.iter().any(|fmt| fmt.fourcc == fourcc) {
                info!("Found {} device: {} - {}", fourcc, path, caps.card);
                return Ok(FoundDevice {
                    path,
                    card: caps.card,
                });
            }
        }
    }

    Err(eyre!("No capture device streaming {} found", fourcc))
}
