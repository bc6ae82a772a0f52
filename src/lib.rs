pub mod app;
pub mod capture;
pub mod display;
pub mod pipeline;
pub mod snapshot;
pub mod utils;

use std::path::{Path, PathBuf};

use capture::frame::PixelFormat;
use capture::ring::RingSpec;
use pipeline::{MarkerThresholds, RingStyle};
use serde::{Deserialize, Serialize};

/// Prefix of environment overrides, e.g. `LASERDOT_CAPTURE__DEVICE`
pub const ENV_PREFIX: &str = "LASERDOT";

/// System configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
    pub detector: MarkerThresholds,
    pub overlay: RingStyle,
    pub snapshot: SnapshotConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Device node; empty or `auto` scans for one
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
    /// Retries for interrupted or would-block dequeues
    pub dequeue_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Conversion worker threads, one segment each
    pub workers: usize,
    pub pin_workers: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                device: "/dev/video0".into(),
                width: 640,
                height: 480,
                format: PixelFormat::Yuyv4,
                buffer_count: 2,
                dequeue_retries: 3,
            },
            pipeline: PipelineConfig {
                workers: 8,
                pin_workers: false,
            },
            detector: MarkerThresholds::default(),
            overlay: RingStyle::default(),
            snapshot: SnapshotConfig {
                path: "snapshot.png".into(),
            },
            display: DisplayConfig {
                title: "laserdot".into(),
                width: 640,
                height: 480,
            },
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidConfig {
    #[error("frame size {0}x{1} has a zero dimension")]
    ZeroSize(u32, u32),
    #[error("frame width {0} is odd; a macropixel spans two columns")]
    OddWidth(u32),
    #[error("at least one capture buffer is required")]
    NoBuffers,
    #[error("at least one conversion worker is required")]
    NoWorkers,
    #[error("ring thickness {thickness} exceeds its radius {radius}")]
    RingTooThick { radius: u32, thickness: u32 },
}

impl Config {
    /// Defaults, then `path` (TOML), then `LASERDOT_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&Self::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }
        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn validate(&self) -> Result<(), InvalidConfig> {
        let CaptureConfig { width, height, .. } = self.capture;
        if width == 0 || height == 0 {
            return Err(InvalidConfig::ZeroSize(width, height));
        }
        if width % 2 != 0 {
            return Err(InvalidConfig::OddWidth(width));
        }
        if self.capture.buffer_count == 0 {
            return Err(InvalidConfig::NoBuffers);
        }
        if self.pipeline.workers == 0 {
            return Err(InvalidConfig::NoWorkers);
        }
        if self.overlay.thickness > self.overlay.radius {
            return Err(InvalidConfig::RingTooThick {
                radius: self.overlay.radius,
                thickness: self.overlay.thickness,
            });
        }
        Ok(())
    }

    /// Whether the device path asks for auto-detection
    pub fn wants_auto_device(&self) -> bool {
        let device = self.capture.device.trim();
        device.is_empty() || device.eq_ignore_ascii_case("auto")
    }

    pub fn ring_spec(&self) -> RingSpec {
        RingSpec {
            width: self.capture.width,
            height: self.capture.height,
            format: self.capture.format,
            buffer_count: self.capture.buffer_count,
            dequeue_retries: self.capture.dequeue_retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.capture.buffer_count, 2);
        assert_eq!(config.pipeline.workers, 8);
        assert_eq!(config.overlay.color, [0, 0, 255]);
        assert!(!config.wants_auto_device());
    }

    #[test]
    fn validation_failures() {
        let mut config = Config::default();
        config.capture.width = 641;
        assert_eq!(config.validate(), Err(InvalidConfig::OddWidth(641)));

        let mut config = Config::default();
        config.capture.height = 0;
        assert_eq!(config.validate(), Err(InvalidConfig::ZeroSize(640, 0)));

        let mut config = Config::default();
        config.capture.buffer_count = 0;
        assert_eq!(config.validate(), Err(InvalidConfig::NoBuffers));

        let mut config = Config::default();
        config.pipeline.workers = 0;
        assert_eq!(config.validate(), Err(InvalidConfig::NoWorkers));

        let mut config = Config::default();
        config.overlay.thickness = 60;
        assert!(matches!(
            config.validate(),
            Err(InvalidConfig::RingTooThick { radius: 50, thickness: 60 })
        ));
    }

    #[test]
    fn auto_device() {
        let mut config = Config::default();
        config.capture.device = "auto".into();
        assert!(config.wants_auto_device());
        config.capture.device = "".into();
        assert!(config.wants_auto_device());
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[capture]\nwidth = 320\nheight = 240\n\n[overlay]\nradius = 20\nthickness = 3\n"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!((config.capture.width, config.capture.height), (320, 240));
        assert_eq!(config.overlay.radius, 20);
        assert_eq!(config.overlay.thickness, 3);
        // untouched keys keep their defaults
        assert_eq!(config.capture.buffer_count, 2);
        assert_eq!(config.overlay.color, [0, 0, 255]);
    }

    #[test]
    fn environment_overrides() {
        std::env::set_var("LASERDOT_DETECTOR__MIN_RED", "220");
        let config = Config::load(None).unwrap();
        std::env::remove_var("LASERDOT_DETECTOR__MIN_RED");
        assert_eq!(config.detector.min_red, 220);
        assert_eq!(config.detector.max_green, 60);
    }

    #[test]
    fn ring_spec_follows_capture() {
        let spec = Config::default().ring_spec();
        assert_eq!((spec.width, spec.height, spec.buffer_count), (640, 480, 2));
        assert_eq!(spec.dequeue_retries, 3);
    }
}
