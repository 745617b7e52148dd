//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Target names and step sizes have no sensible defaults, so they are
//! deserialized as `Option`s and checked eagerly: a missing value aborts
//! startup with [`ArmError::MissingOption`] naming the option.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{ArmError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub arm: ArmConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub bargraph: BargraphConfig,
    #[serde(default)]
    pub gamepad: GamepadConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Arm controller configuration: actuator target names and servo parameters
#[derive(Debug, Deserialize, Clone)]
pub struct ArmConfig {
    pub target_platform_x: Option<String>,
    pub target_platform_y: Option<String>,
    pub target_platform_yx: Option<String>,
    pub target_head_x: Option<String>,
    pub target_head_y: Option<String>,
    pub target_head_rotation: Option<String>,
    pub target_gripper: Option<String>,
    pub target_display: Option<String>,

    pub servo_platform_x_step: Option<f32>,
    pub servo_platform_yx_step: Option<f32>,
    pub servo_rotation_step: Option<f32>,
    pub servo_rotation_head_left_right_step: Option<f32>,

    #[serde(default = "default_joystick_pos")]
    pub abs_right_joystick_pos: i32,

    #[serde(default = "default_joystick_pos")]
    pub abs_left_joystick_pos: i32,

    #[serde(default = "default_joystick_pos")]
    pub abs_pad_joystick_pos: i32,

    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Auxiliary sink receiving raw joystick magnitudes. Optional.
    #[serde(default)]
    pub telemetry_target: Option<String>,
}

/// LED matrix face display configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DisplayConfig {
    pub target: Option<String>,
}

/// Remote bargraph configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct BargraphConfig {
    pub target_system: Option<String>,
    pub target: Option<String>,
}

/// Gamepad configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GamepadConfig {
    #[serde(default = "default_gamepad_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub device_path: String,

    #[serde(default = "default_deadzone")]
    pub deadzone: i32,
}

/// Telemetry configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

impl Default for ArmConfig {
    fn default() -> Self {
        Self {
            target_platform_x: None,
            target_platform_y: None,
            target_platform_yx: None,
            target_head_x: None,
            target_head_y: None,
            target_head_rotation: None,
            target_gripper: None,
            target_display: None,
            servo_platform_x_step: None,
            servo_platform_yx_step: None,
            servo_rotation_step: None,
            servo_rotation_head_left_right_step: None,
            abs_right_joystick_pos: default_joystick_pos(),
            abs_left_joystick_pos: default_joystick_pos(),
            abs_pad_joystick_pos: default_joystick_pos(),
            delay_ms: default_delay_ms(),
            telemetry_target: None,
        }
    }
}

impl Default for GamepadConfig {
    fn default() -> Self {
        Self {
            enabled: default_gamepad_enabled(),
            device_path: String::new(),
            deadzone: default_deadzone(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_dir: default_log_dir(),
        }
    }
}

// Default value functions
fn default_joystick_pos() -> i32 { 32767 }
fn default_delay_ms() -> u64 { 200 }

fn default_gamepad_enabled() -> bool { true }
fn default_deadzone() -> i32 { 2000 }

fn default_log_dir() -> String { "./logs".to_string() }

/// Actuator target names, all validated non-empty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Targets {
    pub platform_x: String,
    pub platform_y: String,
    pub platform_yx: String,
    pub head_x: String,
    pub head_y: String,
    pub head_rotation: String,
    pub gripper: String,
    pub display: String,
}

impl Targets {
    /// Every primary target name, in wiring order.
    pub fn all(&self) -> [&str; 8] {
        [
            &self.platform_x,
            &self.platform_y,
            &self.platform_yx,
            &self.head_x,
            &self.head_y,
            &self.head_rotation,
            &self.gripper,
            &self.display,
        ]
    }
}

/// Arm settings with every required option resolved
#[derive(Debug, Clone, PartialEq)]
pub struct ArmSettings {
    pub targets: Targets,
    pub platform_x_step: f32,
    pub platform_yx_step: f32,
    pub rotation_step: f32,
    pub head_left_right_step: f32,
    pub abs_right_joystick_pos: i16,
    pub abs_left_joystick_pos: i16,
    pub abs_pad_joystick_pos: i16,
    pub period: Duration,
    pub telemetry_target: Option<String>,
}

/// Bargraph settings with every required option resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BargraphSettings {
    pub target_system: String,
    pub target: String,
}

fn require_name(value: &Option<String>, option: &str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(ArmError::MissingOption(option.to_string())),
    }
}

fn require_step(value: Option<f32>, option: &str) -> Result<f32> {
    let step = value.ok_or_else(|| ArmError::MissingOption(option.to_string()))?;
    if !step.is_finite() || step <= 0.0 || step > 1.0 {
        return Err(ArmError::InvalidOption(format!(
            "{} must be in (0.0, 1.0], got {}",
            option, step
        )));
    }
    Ok(step)
}

fn joystick_pos(value: i32, option: &str) -> Result<i16> {
    if value <= 0 || value > i16::MAX as i32 {
        return Err(ArmError::InvalidOption(format!(
            "{} must be between 1 and {}",
            option,
            i16::MAX
        )));
    }
    Ok(value as i16)
}

impl ArmConfig {
    /// Resolve every required option, failing on the first one absent
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::MissingOption`] naming the absent option, or
    /// [`ArmError::InvalidOption`] for out-of-range values.
    pub fn resolve(&self) -> Result<ArmSettings> {
        let targets = Targets {
            platform_x: require_name(&self.target_platform_x, "arm.target_platform_x")?,
            platform_y: require_name(&self.target_platform_y, "arm.target_platform_y")?,
            platform_yx: require_name(&self.target_platform_yx, "arm.target_platform_yx")?,
            head_x: require_name(&self.target_head_x, "arm.target_head_x")?,
            head_y: require_name(&self.target_head_y, "arm.target_head_y")?,
            head_rotation: require_name(&self.target_head_rotation, "arm.target_head_rotation")?,
            gripper: require_name(&self.target_gripper, "arm.target_gripper")?,
            display: require_name(&self.target_display, "arm.target_display")?,
        };

        if self.delay_ms == 0 || self.delay_ms > 60000 {
            return Err(ArmError::InvalidOption(
                "arm.delay_ms must be between 1 and 60000".to_string(),
            ));
        }

        let telemetry_target = match self.telemetry_target.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Some(name.to_string()),
            _ => None,
        };

        Ok(ArmSettings {
            targets,
            platform_x_step: require_step(self.servo_platform_x_step, "arm.servo_platform_x_step")?,
            platform_yx_step: require_step(self.servo_platform_yx_step, "arm.servo_platform_yx_step")?,
            rotation_step: require_step(self.servo_rotation_step, "arm.servo_rotation_step")?,
            head_left_right_step: require_step(
                self.servo_rotation_head_left_right_step,
                "arm.servo_rotation_head_left_right_step",
            )?,
            abs_right_joystick_pos: joystick_pos(self.abs_right_joystick_pos, "arm.abs_right_joystick_pos")?,
            abs_left_joystick_pos: joystick_pos(self.abs_left_joystick_pos, "arm.abs_left_joystick_pos")?,
            abs_pad_joystick_pos: joystick_pos(self.abs_pad_joystick_pos, "arm.abs_pad_joystick_pos")?,
            period: Duration::from_millis(self.delay_ms),
            telemetry_target,
        })
    }
}

impl DisplayConfig {
    /// Name of the LED matrix driver the face controller renders to
    pub fn resolve(&self) -> Result<String> {
        require_name(&self.target, "display.target")
    }
}

impl BargraphConfig {
    /// Resolve the remote system and target names
    pub fn resolve(&self) -> Result<BargraphSettings> {
        Ok(BargraphSettings {
            target_system: require_name(&self.target_system, "bargraph.target_system")?,
            target: require_name(&self.target, "bargraph.target")?,
        })
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - A required option is missing or a value is out of range
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use arm_arbiter::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any required option is absent or any value is out of
    /// its valid range
    pub fn validate(&self) -> Result<()> {
        self.arm.resolve()?;
        self.display.resolve()?;
        self.bargraph.resolve()?;

        if self.gamepad.deadzone < 0 || self.gamepad.deadzone > 16384 {
            return Err(ArmError::InvalidOption(
                "gamepad.deadzone must be between 0 and 16384".to_string(),
            ));
        }

        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(ArmError::InvalidOption(
                "telemetry.log_dir cannot be empty when enabled".to_string(),
            ));
        }

        Ok(())
    }
}
