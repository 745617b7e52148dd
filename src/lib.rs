//! # Arm Arbiter Library
//!
//! Drive a robotic arm from a single gamepad.
//!
//! This library arbitrates one input device among the arm's actuator
//! channels (platform and head servos, gripper, face display), samples the
//! active channel at a fixed rate with saturating integration, replays
//! remote command batches as synthetic key holds, and bounces a remote
//! bargraph indicator from joystick telemetry.

pub mod arbiter;
pub mod bargraph;
pub mod config;
pub mod display;
pub mod error;
pub mod input;
pub mod replay;
pub mod sink;
pub mod system;
pub mod telemetry;
