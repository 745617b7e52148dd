//! # Channel Listeners
//!
//! One listener per input key. A listener owns the mutable state of its
//! channel (active flag, last raw amount, last emitted value) behind its own
//! lock, so routing and sampling of unrelated channels never contend.
//!
//! ## Update Law
//!
//! | Kind | Next value |
//! |------|------------|
//! | Continuous | `current + (amount / abs_scale) * step` |
//! | Stepped | `current + step` or `current - step` by polarity |
//! | OneShot | `amount` (fires its face while `amount == 1`) |
//!
//! Every result goes through [`saturate`]: anything beyond unit magnitude
//! collapses to its sign.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::display::FaceExpression;
use crate::input::InputKey;
use crate::sink::ActuatorMessage;

/// Clamp a value to its sign once it leaves `[-1.0, 1.0]`.
///
/// # Examples
///
/// ```
/// use arm_arbiter::arbiter::listener::saturate;
///
/// assert_eq!(saturate(0.4), 0.4);
/// assert_eq!(saturate(1.3), 1.0);
/// assert_eq!(saturate(-7.0), -1.0);
/// ```
#[inline]
#[must_use]
pub fn saturate(next: f32) -> f32 {
    if next.abs() > 1.0 {
        next.signum()
    } else {
        next
    }
}

/// Channel family and its parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelKind {
    /// Joystick axis integrating its deflection every sample
    Continuous { abs_scale: i16, step: f32 },
    /// Button moving a servo one step per sample
    Stepped { positive: bool, step: f32 },
    /// Button showing a face on the display
    OneShot { face: FaceExpression },
}

/// Mutable part of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ListenerState {
    pub active: bool,
    pub amount: i16,
    pub value: f32,
}

impl ListenerState {
    /// Take control with the press amount, continuing from `value`.
    pub fn activate(&mut self, amount: i16, value: f32) {
        self.amount = amount;
        self.value = value;
        self.active = true;
    }
}

impl ChannelKind {
    /// Compute the next state and the message to emit for it.
    ///
    /// Pure: callers decide whether the channel is active.
    #[must_use]
    pub fn process(&self, state: ListenerState) -> (ListenerState, Option<ActuatorMessage>) {
        match *self {
            ChannelKind::Continuous { abs_scale, step } => {
                let ratio = f32::from(state.amount) / f32::from(abs_scale.max(1));
                let value = saturate(state.value + ratio * step);
                (ListenerState { value, ..state }, Some(ActuatorMessage::Position(value)))
            }
            ChannelKind::Stepped { positive, step } => {
                let next = if positive {
                    state.value + step
                } else {
                    state.value - step
                };
                let value = saturate(next);
                (ListenerState { value, ..state }, Some(ActuatorMessage::Position(value)))
            }
            ChannelKind::OneShot { face } => {
                let value = saturate(f32::from(state.amount));
                let message = (state.amount == 1).then_some(ActuatorMessage::Face(face));
                (ListenerState { value, ..state }, message)
            }
        }
    }
}

/// Result of sampling an active listener.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Value to store in the value cache
    pub value: f32,
    /// Raw amount the channel was pressed with
    pub amount: i16,
    /// Message for the channel's actuator, if any
    pub message: Option<ActuatorMessage>,
}

/// Per-key channel state and update rule.
#[derive(Debug)]
pub struct ChannelListener {
    name: String,
    key: InputKey,
    kind: ChannelKind,
    state: Mutex<ListenerState>,
}

impl ChannelListener {
    #[must_use]
    pub fn new(name: impl Into<String>, key: InputKey, kind: ChannelKind) -> Self {
        Self {
            name: name.into(),
            key,
            kind,
            state: Mutex::new(ListenerState::default()),
        }
    }

    /// Joystick channel normalised by `abs_scale`.
    #[must_use]
    pub fn continuous(name: impl Into<String>, key: InputKey, abs_scale: i16, step: f32) -> Self {
        Self::new(name, key, ChannelKind::Continuous { abs_scale, step })
    }

    /// Button channel stepping up (`positive`) or down.
    #[must_use]
    pub fn stepped(name: impl Into<String>, key: InputKey, positive: bool, step: f32) -> Self {
        Self::new(name, key, ChannelKind::Stepped { positive, step })
    }

    /// Face button.
    #[must_use]
    pub fn one_shot(name: impl Into<String>, key: InputKey, face: FaceExpression) -> Self {
        Self::new(name, key, ChannelKind::OneShot { face })
    }

    /// Target actuator name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> InputKey {
        self.key
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn is_active(&self) -> bool {
        self.lock_state().active
    }

    /// Consistent snapshot of the mutable fields.
    pub fn state(&self) -> ListenerState {
        *self.lock_state()
    }

    // Listener state is plain data, so a poisoned lock is still usable.
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ListenerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Advance an active listener by one period. Inactive listeners are not
    /// evaluated and yield `None`.
    pub fn sample(&self) -> Option<Sample> {
        let mut state = self.lock_state();
        if !state.active {
            return None;
        }
        let (next, message) = self.kind.process(*state);
        *state = next;
        Some(Sample {
            value: next.value,
            amount: next.amount,
            message,
        })
    }
}
