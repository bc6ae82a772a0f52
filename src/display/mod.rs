pub mod display;

use color_eyre::Result;

use crate::pipeline::Frame;

pub use display::{Sdl2Display, Sdl2Input};

/// Something a finished frame can be shown on
pub trait DisplaySurface {
    fn present(&mut self, frame: &Frame) -> Result<()>;
}

/// User requests, polled once per main loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Exit,
    CaptureRequested,
}

/// Non-blocking source of [`InputEvent`]s
pub trait InputSource {
    fn poll_events(&mut self) -> Vec<InputEvent>;
}
