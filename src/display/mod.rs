//! SDL2 window showing the live or played-back stream

pub mod sdl;

pub use sdl::Sdl2Display;
