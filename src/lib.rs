//! Render apitrace captures to video.
//!
//! `apitrace dump-images` writes PPM frames to a pipe that `ffmpeg` reads
//! from directly. The [`engine`] builds those command lines, runs the two
//! processes and sequences the uncompressed and sample passes; [`config`]
//! holds the persisted settings.

pub mod config;
pub mod engine;
