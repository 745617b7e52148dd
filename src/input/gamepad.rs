//! # Gamepad Module
//!
//! Logitech F710 gamepad input via the Linux evdev interface (XInput mode).
//!
//! ## Controller Detection
//!
//! The first `/dev/input/event*` device with the Logitech vendor id
//! (0x046d) is used, unless a device path is configured.
//!
//! ## Layout
//!
//! | Control | evdev Code | Input Key |
//! |---------|------------|-----------|
//! | Left stick | ABS_X / ABS_Y | LEFT_X / LEFT_Y |
//! | Right stick | ABS_RX / ABS_RY | RIGHT_X / RIGHT_Y |
//! | D-Pad | ABS_HAT0X / ABS_HAT0Y | PAD_X / PAD_Y |
//! | LB / RB | BTN_TL / BTN_TR | FRONT_UP_LEFT / FRONT_UP_RIGHT |
//! | LT / RT | BTN_TL2 / BTN_TR2 or ABS_Z / ABS_RZ | FRONT_DOWN_LEFT / FRONT_DOWN_RIGHT |
//! | X / A / B / Y | BTN_WEST / BTN_SOUTH / BTN_EAST / BTN_NORTH | BLUE / GREEN / RED / YELLOW |
//! | Back / Start | BTN_SELECT / BTN_START | BACK / START |
//!
//! Sticks report PRESSED when they leave the deadzone and RELEASED when they
//! return to it. Buttons report PRESSED with amount 1 and RELEASED with
//! amount 0. Only transitions are reported.

use std::collections::HashSet;
use std::path::Path;
use std::thread::JoinHandle;

use evdev::{AbsoluteAxisType, Device, InputEventKind, Key};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::arbiter::ArbiterHandle;
use crate::error::{ArmError, Result};
use crate::input::{InputEvent, InputKey};

/// Logitech vendor ID
const LOGITECH_VENDOR_ID: u16 = 0x046d;

/// Full-scale stick value; the hat's -1/0/1 is scaled to this.
pub const AXIS_FULL_SCALE: i32 = 32767;

/// Translates raw evdev events into arbiter input events.
///
/// Keeps track of which controls are currently held so repeated reports of
/// the same position produce nothing.
#[derive(Debug)]
pub struct GamepadMapper {
    deadzone: i32,
    held: HashSet<InputKey>,
}

impl GamepadMapper {
    #[must_use]
    pub fn new(deadzone: i32) -> Self {
        Self {
            deadzone: deadzone.max(0),
            held: HashSet::new(),
        }
    }

    /// Whether a control is currently held.
    pub fn is_held(&self, key: InputKey) -> bool {
        self.held.contains(&key)
    }

    /// Translate one evdev event. Sync reports, unknown codes, key
    /// auto-repeat and non-transitions yield `None`.
    pub fn translate(&mut self, event: &evdev::InputEvent) -> Option<InputEvent> {
        match event.kind() {
            InputEventKind::AbsAxis(axis) => self.translate_axis(axis, event.value()),
            InputEventKind::Key(key) => self.translate_key(key, event.value()),
            _ => None,
        }
    }

    fn translate_axis(&mut self, axis: AbsoluteAxisType, value: i32) -> Option<InputEvent> {
        match axis {
            AbsoluteAxisType::ABS_X => self.stick(InputKey::LeftX, value),
            AbsoluteAxisType::ABS_Y => self.stick(InputKey::LeftY, value),
            AbsoluteAxisType::ABS_RX => self.stick(InputKey::RightX, value),
            AbsoluteAxisType::ABS_RY => self.stick(InputKey::RightY, value),
            AbsoluteAxisType::ABS_HAT0X => self.stick(InputKey::PadX, value.signum() * AXIS_FULL_SCALE),
            AbsoluteAxisType::ABS_HAT0Y => self.stick(InputKey::PadY, value.signum() * AXIS_FULL_SCALE),
            // Analog triggers
            AbsoluteAxisType::ABS_Z => self.button(InputKey::FrontDownLeft, value > 0),
            AbsoluteAxisType::ABS_RZ => self.button(InputKey::FrontDownRight, value > 0),
            _ => None,
        }
    }

    fn translate_key(&mut self, key: Key, value: i32) -> Option<InputEvent> {
        let input = match key {
            Key::BTN_TL => InputKey::FrontUpLeft,
            Key::BTN_TR => InputKey::FrontUpRight,
            Key::BTN_TL2 => InputKey::FrontDownLeft,
            Key::BTN_TR2 => InputKey::FrontDownRight,
            Key::BTN_WEST => InputKey::Blue,
            Key::BTN_SOUTH => InputKey::Green,
            Key::BTN_EAST => InputKey::Red,
            Key::BTN_NORTH => InputKey::Yellow,
            Key::BTN_SELECT => InputKey::Back,
            Key::BTN_START => InputKey::Start,
            _ => return None,
        };
        match value {
            0 => self.button(input, false),
            1 => self.button(input, true),
            // 2 is auto-repeat
            _ => None,
        }
    }

    fn stick(&mut self, key: InputKey, value: i32) -> Option<InputEvent> {
        let outside = value.abs() > self.deadzone;
        let was_held = self.held.contains(&key);

        if outside && !was_held {
            self.held.insert(key);
            let amount = value.clamp(-AXIS_FULL_SCALE, AXIS_FULL_SCALE) as i16;
            Some(InputEvent::pressed(key, amount))
        } else if !outside && was_held {
            self.held.remove(&key);
            Some(InputEvent::released(key, 0))
        } else {
            None
        }
    }

    fn button(&mut self, key: InputKey, down: bool) -> Option<InputEvent> {
        if down {
            self.held.insert(key).then(|| InputEvent::pressed(key, 1))
        } else {
            self.held.remove(&key).then(|| InputEvent::released(key, 0))
        }
    }
}

/// Open evdev gamepad.
pub struct Gamepad {
    device: Device,
    device_path: String,
}

impl Gamepad {
    /// Open `device_path`, or scan `/dev/input` for a Logitech pad when it
    /// is empty.
    ///
    /// # Errors
    ///
    /// - `ControllerNotFound`: no Logitech device found
    /// - `Controller`: the configured device cannot be opened
    pub fn open(device_path: &str) -> Result<Self> {
        if !device_path.is_empty() {
            let device = Device::open(device_path)
                .map_err(|e| ArmError::Controller(format!("Failed to open {}: {}", device_path, e)))?;
            info!("Opened gamepad at {}", device_path);
            return Ok(Self {
                device,
                device_path: device_path.to_string(),
            });
        }
        Self::detect()
    }

    fn detect() -> Result<Self> {
        let input_dir = Path::new("/dev/input");
        if !input_dir.exists() {
            return Err(ArmError::Controller("/dev/input directory not found".to_string()));
        }

        let mut entries: Vec<_> = std::fs::read_dir(input_dir)
            .map_err(|e| ArmError::Controller(format!("Failed to read /dev/input: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ArmError::Controller(format!("Failed to read directory entry: {}", e)))?;

        // Deterministic choice when several pads are connected
        entries.sort_by_key(|entry| entry.path());

        for entry in entries {
            let path = entry.path();
            let is_event = path
                .file_name()
                .map_or(false, |name| name.to_string_lossy().starts_with("event"));
            if !is_event {
                continue;
            }

            match Device::open(&path) {
                Ok(device) => {
                    let id = device.input_id();
                    debug!(
                        "Found input device: {} (vendor: 0x{:04x}, product: 0x{:04x})",
                        path.display(),
                        id.vendor(),
                        id.product()
                    );
                    if id.vendor() == LOGITECH_VENDOR_ID {
                        let device_path = path.to_string_lossy().to_string();
                        info!("Found Logitech gamepad at: {}", device_path);
                        return Ok(Self { device, device_path });
                    }
                }
                Err(e) => debug!("Could not open {}: {}", path.display(), e),
            }
        }

        Err(ArmError::ControllerNotFound)
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    pub fn name(&self) -> Option<&str> {
        self.device.name()
    }

    /// Start reading on a dedicated thread, forwarding translated events to
    /// the arbiter's router.
    ///
    /// The read blocks until the pad reports something, so shutdown and a
    /// closed router are noticed on the next event.
    pub fn spawn_reader(
        mut self,
        mut mapper: GamepadMapper,
        handle: ArbiterHandle,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        let thread = std::thread::Builder::new()
            .name("gamepad-reader".to_string())
            .spawn(move || {
                info!("Reading gamepad {} ({})", self.device_path, self.name().unwrap_or("unnamed"));
                while !shutdown.is_cancelled() {
                    let events = match self.device.fetch_events() {
                        Ok(events) => events,
                        Err(e) => {
                            warn!("Gamepad read failed, stopping reader: {}", e);
                            return;
                        }
                    };
                    for raw in events {
                        let Some(event) = mapper.translate(&raw) else {
                            continue;
                        };
                        debug!("Gamepad {} {:?} {}", event.key(), event.state(), event.amount());
                        if handle.blocking_submit(event).is_err() {
                            info!("Arbiter router closed, stopping gamepad reader");
                            return;
                        }
                    }
                }
                debug!("Gamepad reader stopped");
            })?;
        Ok(thread)
    }
}
