//! SDL2 Window Display Module
//! Shows processed frames in a window and turns keyboard and window events
//! into [`InputEvent`]s.

use color_eyre::{eyre::eyre, Result};
use sdl2::event::Event;
use sdl2::keyboard::Keycode;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use sdl2::EventPump;
use tracing::info;

use super::{DisplaySurface, InputEvent, InputSource};
use crate::pipeline::Frame;

/// SDL2 window with a streaming texture the size of a frame
pub struct Sdl2Display {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
}

impl Sdl2Display {
    pub fn new(sdl_context: &sdl2::Sdl, title: &str, width: u32, height: u32) -> Result<Self> {
        let video_subsystem = sdl_context.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window(title, width, height)
            .position_centered()
            .build()?;

        let canvas = window.into_canvas().present_vsync().build()?;
        let texture_creator = canvas.texture_creator();
        info!("Display window {}x{} opened", width, height);

        Ok(Self {
            canvas,
            texture_creator,
        })
    }
}

impl DisplaySurface for Sdl2Display {
    fn present(&mut self, frame: &Frame) -> Result<()> {
        // frames are BGRA in memory, which is ARGB8888 on little-endian
        let mut texture = self
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::ARGB8888, frame.width(), frame.height())
            .map_err(|e| eyre!(e))?;

        texture
            .update(None, frame.as_bytes(), frame.stride())
            .map_err(|e| eyre!(e))?;

        self.canvas.clear();
        self.canvas
            .copy(&texture, None, None)
            .map_err(|e| eyre!(e))?;

        self.canvas.present();
        Ok(())
    }
}

/// Keyboard and window events from SDL2
pub struct Sdl2Input {
    event_pump: EventPump,
}

impl Sdl2Input {
    pub fn new(sdl_context: &sdl2::Sdl) -> Result<Self> {
        let event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;
        Ok(Self { event_pump })
    }
}

impl InputSource for Sdl2Input {
    fn poll_events(&mut self) -> Vec<InputEvent> {
        self.event_pump
            .poll_iter()
            .filter_map(|event| match event {
                Event::Quit { .. }
                | Event::KeyDown {
                    keycode: Some(Keycode::ESCAPE),
                    ..
                } => Some(InputEvent::Exit),
                Event::KeyDown {
                    keycode: Some(Keycode::C),
                    repeat: false,
                    ..
                } => Some(InputEvent::CaptureRequested),
                _ => None,
            })
            .collect()
    }
}
