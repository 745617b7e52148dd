//! # Input Module
//!
//! Gamepad input handling.
//!
//! This module handles:
//! - The normalized [`InputEvent`] the arbiter consumes
//! - Detecting a Logitech F710 pad via evdev and translating its raw events

pub mod event;
pub mod gamepad;

pub use event::{InputEvent, InputKey, InputPart, InputState};
