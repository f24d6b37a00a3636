//! SDL2 Window Display Module
//! Shows the live stream, or the DVR's playback while a recording is played.
//!
//! Keys: `R` record, `P` play, `Space` pause, `Backspace` rewind, `S` stop,
//! `Escape`/`Q` quit.

use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use flume::{Receiver, RecvTimeoutError};
use sdl2::event::Event;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use tracing::{debug, info};

use crate::capture::Frame;
use crate::dvr::DvrController;
use crate::filters::FilterBank;

/// Longest the event loop blocks waiting for a frame
const FRAME_WAIT: Duration = Duration::from_millis(16);

pub struct Sdl2Display {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    rgb: Vec<u8>,
}

impl Sdl2Display {
    pub fn new(sdl_context: &sdl2::Sdl, width: u32, height: u32) -> Result<Self> {
        let video_subsystem = sdl_context.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window("Argus", width, height)
            .position_centered()
            .resizable()
            .build()?;

        let canvas = window.into_canvas().present_vsync().build()?;
        let texture_creator = canvas.texture_creator();

        Ok(Self {
            canvas,
            texture_creator,
            rgb: Vec::new(),
        })
    }

    pub fn render_frame(&mut self, frame: &Frame) -> Result<()> {
        let shape = frame.shape();
        let pixels: &[u8] = match shape.channels {
            3 => &frame.data,
            1 => {
                self.rgb.clear();
                self.rgb.extend(frame.data.iter().flat_map(|&v| [v, v, v]));
                &self.rgb
            }
            n => return Err(eyre!("cannot display {n} channel frames")),
        };

        let mut texture = self
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::RGB24, shape.width, shape.height)
            .map_err(|e| eyre!(e))?;
        texture
            .update(None, pixels, shape.width as usize * 3)
            .map_err(|e| eyre!(e))?;

        self.canvas.clear();
        self.canvas
            .copy(&texture, None, None)
            .map_err(|e| eyre!(e))?;
        self.canvas.present();
        Ok(())
    }

    /// Run until the window closes. Live frames go through `filters`;
    /// playback frames are shown as recorded.
    pub fn run(
        &mut self,
        sdl_context: &sdl2::Sdl,
        live: Receiver<Frame>,
        dvr: &mut DvrController,
        filters: &mut FilterBank,
    ) -> Result<()> {
        let mut event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;
        let playback = dvr.playback();

        'running: loop {
            for event in event_pump.poll_iter() {
                let key = match event {
                    Event::Quit { .. } => None,
                    Event::KeyDown {
                        keycode: Some(key), ..
                    } => Some(key.name()),
                    _ => continue,
                };
                match key.as_deref() {
                    None | Some("Escape" | "Q") => {
                        info!("Quit event received");
                        break 'running;
                    }
                    Some("R") => dvr.record(),
                    Some("P") => dvr.play(),
                    Some("Space") => dvr.pause(),
                    Some("Backspace") => dvr.rewind(),
                    Some("S") => dvr.stop(),
                    Some(_) => {}
                }
            }
            dvr.process_events();

            let (source, filtered) = if dvr.is_playing() {
                (&playback, false)
            } else {
                (&live, true)
            };
            match source.recv_timeout(FRAME_WAIT) {
                Ok(frame) => {
                    let frame = if filtered {
                        filters.apply(&frame)
                    } else {
                        frame
                    };
                    self.render_frame(&frame)?;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Frame stream closed");
                    break 'running;
                }
            }
        }

        Ok(())
    }
}
