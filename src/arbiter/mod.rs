//! # Arbiter Module
//!
//! Gives exactly one channel at a time control of the arm.
//!
//! ## Control Flow
//!
//! ```text
//! InputEvent ──► route() ──► ChannelListener (acquire / release)
//!                                   │
//!          interval(period) ──► sample_once() ──► ValueCache ──► actuator sink
//! ```
//!
//! - A PRESSED event acquires the arbiter only while no key holds it. The
//!   acquisition is a single compare-and-set on the active key, so of two
//!   simultaneous presses exactly one wins.
//! - Only a RELEASED event for the holding key gives it back. Every other
//!   combination is dropped: the pad drives one channel at a time.
//! - The sampling loop advances the active listener once per period, stores
//!   the value by target name and forwards it to that target's sink.

pub mod handle;
pub mod listener;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::ArmSettings;
use crate::display::FaceExpression;
use crate::error::{ArmError, Result};
use crate::input::{InputEvent, InputKey, InputState};
use crate::sink::{ActuatorMessage, Directory, SinkRef};
use crate::telemetry::{self, TelemetryRecord};

pub use handle::{ArbiterHandle, EventSink};
pub use listener::{saturate, ChannelKind, ChannelListener, ListenerState, Sample};

/// Default sampling period.
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(200);

/// How long the router keeps routing releases after shutdown.
pub const RELEASE_GRACE: Duration = Duration::from_millis(500);

/// Active-key value meaning "nobody holds the arbiter".
const NO_KEY: u8 = 0;

/// What [`Arbiter::route`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The event's channel took control
    Acquired,
    /// The holding channel gave control back
    Released,
    /// A press arrived while another channel holds control
    Busy,
    /// A release for a key that does not hold control
    StaleRelease,
    /// No listener for this key
    Unregistered,
}

/// Collects listeners before the arbiter starts.
#[derive(Debug)]
pub struct ArbiterBuilder {
    listeners: HashMap<InputKey, ChannelListener>,
    period: Duration,
    telemetry_target: Option<String>,
}

impl Default for ArbiterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ArbiterBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: HashMap::new(),
            period: DEFAULT_PERIOD,
            telemetry_target: None,
        }
    }

    /// Sampling period of the control loop.
    #[must_use]
    pub fn period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Auxiliary sink receiving raw joystick magnitudes. Missing at runtime is tolerated.
    #[must_use]
    pub fn telemetry_target(mut self, target: Option<String>) -> Self {
        self.telemetry_target = target;
        self
    }

    /// Add a listener keyed by its input key. A second listener for the same
    /// key replaces the first.
    pub fn register(&mut self, listener: ChannelListener) -> &mut Self {
        if let Some(previous) = self.listeners.insert(listener.key(), listener) {
            warn!("Listener for {} ({}) replaced", previous.key(), previous.name());
        }
        self
    }

    /// Resolve every listener's target and build the arbiter.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::UnresolvedTarget`] if any listener's target has no
    /// sink in `directory`. Nothing is started in that case.
    pub fn build(self, directory: Arc<dyn Directory>) -> Result<Arbiter> {
        let mut sinks = HashMap::new();
        let mut values = HashMap::new();

        for listener in self.listeners.values() {
            let name = listener.name();
            if sinks.contains_key(name) {
                continue;
            }
            let sink = directory
                .lookup(name)
                .ok_or_else(|| ArmError::UnresolvedTarget(name.to_string()))?;
            sinks.insert(name.to_string(), sink);
            values.insert(name.to_string(), 0.0);
        }

        info!(
            "Arbiter ready: {} listeners, {} targets, period {:?}",
            self.listeners.len(),
            sinks.len(),
            self.period
        );

        Ok(Arbiter {
            registry: self.listeners,
            active_key: AtomicU8::new(NO_KEY),
            values: Mutex::new(values),
            sinks,
            directory,
            telemetry_target: self.telemetry_target,
            period: self.period,
        })
    }
}

/// Exclusive-access controller for the arm's channels.
pub struct Arbiter {
    registry: HashMap<InputKey, ChannelListener>,
    active_key: AtomicU8,
    values: Mutex<HashMap<String, f32>>,
    sinks: HashMap<String, SinkRef>,
    directory: Arc<dyn Directory>,
    telemetry_target: Option<String>,
    period: Duration,
}

impl fmt::Debug for Arbiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arbiter")
            .field("listeners", &self.registry.len())
            .field("active_key", &self.active_key())
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}

impl Arbiter {
    #[must_use]
    pub fn builder() -> ArbiterBuilder {
        ArbiterBuilder::new()
    }

    /// Build the arm's standard wiring from resolved settings.
    ///
    /// | Key | Kind | Target |
    /// |-----|------|--------|
    /// | RIGHT_X | continuous | platform X |
    /// | LEFT_X | continuous | platform YX |
    /// | LEFT_Y | continuous | platform Y |
    /// | PAD_X / PAD_Y | continuous | head X / head Y |
    /// | FRONT_UP_RIGHT / FRONT_DOWN_RIGHT | stepped +/- | head rotation |
    /// | FRONT_UP_LEFT / FRONT_DOWN_LEFT | stepped +/- | gripper |
    /// | BLUE / GREEN / YELLOW | one-shot | display |
    ///
    /// # Errors
    ///
    /// Fails when a target does not resolve in `directory`.
    pub fn from_settings(settings: &ArmSettings, directory: Arc<dyn Directory>) -> Result<Self> {
        let t = &settings.targets;
        let mut builder = ArbiterBuilder::new()
            .period(settings.period)
            .telemetry_target(settings.telemetry_target.clone());

        builder
            .register(ChannelListener::continuous(
                &t.platform_x,
                InputKey::RightX,
                settings.abs_right_joystick_pos,
                settings.platform_x_step,
            ))
            .register(ChannelListener::continuous(
                &t.platform_yx,
                InputKey::LeftX,
                settings.abs_left_joystick_pos,
                settings.platform_yx_step,
            ))
            .register(ChannelListener::continuous(
                &t.platform_y,
                InputKey::LeftY,
                settings.abs_left_joystick_pos,
                settings.platform_yx_step,
            ))
            .register(ChannelListener::continuous(
                &t.head_x,
                InputKey::PadX,
                settings.abs_pad_joystick_pos,
                settings.platform_yx_step,
            ))
            .register(ChannelListener::continuous(
                &t.head_y,
                InputKey::PadY,
                settings.abs_pad_joystick_pos,
                settings.platform_yx_step,
            ))
            .register(ChannelListener::stepped(
                &t.head_rotation,
                InputKey::FrontUpRight,
                true,
                settings.head_left_right_step,
            ))
            .register(ChannelListener::stepped(
                &t.head_rotation,
                InputKey::FrontDownRight,
                false,
                settings.head_left_right_step,
            ))
            .register(ChannelListener::stepped(
                &t.gripper,
                InputKey::FrontUpLeft,
                true,
                settings.head_left_right_step,
            ))
            .register(ChannelListener::stepped(
                &t.gripper,
                InputKey::FrontDownLeft,
                false,
                settings.head_left_right_step,
            ))
            .register(ChannelListener::one_shot(&t.display, InputKey::Blue, FaceExpression::Neutral))
            .register(ChannelListener::one_shot(&t.display, InputKey::Green, FaceExpression::Smile))
            .register(ChannelListener::one_shot(&t.display, InputKey::Yellow, FaceExpression::Sad));

        builder.build(directory)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Key currently holding control.
    pub fn active_key(&self) -> Option<InputKey> {
        InputKey::from_code(self.active_key.load(Ordering::Acquire))
    }

    /// Number of listeners with the active flag set. Never more than one.
    pub fn active_count(&self) -> usize {
        self.registry.values().filter(|l| l.is_active()).count()
    }

    pub fn listener(&self, key: InputKey) -> Option<&ChannelListener> {
        self.registry.get(&key)
    }

    pub fn listeners(&self) -> impl Iterator<Item = &ChannelListener> {
        self.registry.values()
    }

    /// Last value emitted for a target.
    pub fn value_of(&self, target: &str) -> Option<f32> {
        self.lock_values().get(target).copied()
    }

    /// Snapshot of the value cache.
    pub fn values(&self) -> HashMap<String, f32> {
        self.lock_values().clone()
    }

    fn lock_values(&self) -> MutexGuard<'_, HashMap<String, f32>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route one input event.
    ///
    /// Safe to call from any number of tasks at once. The active key only
    /// moves to or from a key while that key's listener is locked, so under
    /// the lock `active_key() == Some(key)` exactly when the listener is active.
    pub fn route(&self, event: &InputEvent) -> RouteOutcome {
        let Some(listener) = self.registry.get(&event.key()) else {
            trace!("No listener for {}", event.key());
            return RouteOutcome::Unregistered;
        };
        let code = event.key().code();

        match event.state() {
            InputState::Pressed => {
                let mut state = listener.lock_state();
                if self
                    .active_key
                    .compare_exchange(NO_KEY, code, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    trace!("{} pressed while {:?} holds control", event.key(), self.active_key());
                    return RouteOutcome::Busy;
                }
                let value = self.value_of(listener.name()).unwrap_or(0.0);
                state.activate(event.amount(), value);
                drop(state);
                info!(
                    "{} acquired {} (amount {}, from {:.3})",
                    event.key(),
                    listener.name(),
                    event.amount(),
                    value
                );
                RouteOutcome::Acquired
            }
            InputState::Released => {
                // Under the listener's lock only this key can move the active
                // key away from `code`, so the plain store cannot clobber a
                // newer holder.
                let mut state = listener.lock_state();
                if self.active_key.load(Ordering::Acquire) != code || !state.active {
                    trace!("Stale release for {}", event.key());
                    return RouteOutcome::StaleRelease;
                }
                state.active = false;
                self.active_key.store(NO_KEY, Ordering::Release);
                drop(state);
                info!("{} released {}", event.key(), listener.name());
                RouteOutcome::Released
            }
        }
    }

    /// Sample every active listener once; returns how many were sampled.
    pub fn sample_once(&self) -> usize {
        let mut sampled = 0;
        for listener in self.registry.values() {
            let Some(sample) = listener.sample() else {
                continue;
            };
            sampled += 1;

            self.lock_values().insert(listener.name().to_string(), sample.value);
            debug!("{} -> {:.4}", listener.name(), sample.value);

            if let Some(message) = sample.message {
                self.deliver(listener.name(), message);
            }

            if let ChannelKind::Continuous { .. } = listener.kind() {
                self.forward_telemetry(sample.amount);
                telemetry::emit(&TelemetryRecord::platform(listener.name(), sample.value));
            }
        }
        sampled
    }

    fn deliver(&self, target: &str, message: ActuatorMessage) {
        match self.sinks.get(target) {
            Some(sink) => {
                if let Err(e) = sink.send(message) {
                    error!("Failed to deliver to {}: {}", target, e);
                }
            }
            None => warn!("No sink for {}", target),
        }
    }

    fn forward_telemetry(&self, amount: i16) {
        let Some(target) = self.telemetry_target.as_deref() else {
            return;
        };
        if let Some(sink) = self.directory.lookup(target) {
            if let Err(e) = sink.send(ActuatorMessage::Telemetry(f32::from(amount))) {
                debug!("Telemetry sink {} rejected sample: {}", target, e);
            }
        }
    }

    /// Fixed-rate sampling loop.
    ///
    /// Each cycle runs to completion before the next tick is awaited, so a
    /// listener is never sampled by two cycles at once. Cancellation is only
    /// observed between cycles.
    pub async fn run_sampler(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Starting sampling loop every {:?}", self.period);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.sample_once();
                }
            }
        }

        info!("Sampling loop stopped");
    }

    /// Give control back from whichever key holds it, without a release
    /// event. Returns the key that was holding.
    pub fn release_held(&self) -> Option<InputKey> {
        let key = self.active_key()?;
        let listener = self.registry.get(&key)?;
        let mut state = listener.lock_state();
        if self.active_key.load(Ordering::Acquire) != key.code() {
            return None;
        }
        state.active = false;
        self.active_key.store(NO_KEY, Ordering::Release);
        Some(key)
    }

    /// Route events until the channel closes or shutdown is requested.
    ///
    /// After shutdown no new key can take control, but releases still
    /// arriving within [`RELEASE_GRACE`] are routed. A key still held after
    /// that is released by force, so the arbiter never stops with a holder.
    pub async fn run_router(self: Arc<Self>, mut events: mpsc::Receiver<InputEvent>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        self.route(&event);
                    }
                    None => break,
                },
            }
        }

        self.drain_releases(&mut events).await;
        if let Some(key) = self.release_held() {
            warn!("{} still held at shutdown, released", key);
        }
        debug!("Router stopped");
    }

    async fn drain_releases(&self, events: &mut mpsc::Receiver<InputEvent>) {
        let deadline = tokio::time::Instant::now() + RELEASE_GRACE;
        while self.active_key().is_some() {
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Some(event)) if !event.is_pressed() => {
                    self.route(&event);
                }
                Ok(Some(event)) => trace!("Dropping {} press during shutdown", event.key()),
                Ok(None) | Err(_) => break,
            }
        }
    }
}

#[async_trait]
impl EventSink for Arbiter {
    async fn submit(&self, event: InputEvent) -> Result<()> {
        self.route(&event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Targets;
    use crate::sink::{ChannelSink, LoggingSink, MockMessageSink, SinkRegistry};
    use tokio::sync::mpsc::UnboundedReceiver;

    const EPS: f32 = 1e-6;

    fn settings() -> ArmSettings {
        ArmSettings {
            targets: Targets {
                platform_x: "platformX".to_string(),
                platform_y: "platformY".to_string(),
                platform_yx: "platformYX".to_string(),
                head_x: "headX".to_string(),
                head_y: "headY".to_string(),
                head_rotation: "headRotation".to_string(),
                gripper: "gripper".to_string(),
                display: "display".to_string(),
            },
            platform_x_step: 0.1,
            platform_yx_step: 0.2,
            rotation_step: 0.05,
            head_left_right_step: 0.25,
            abs_right_joystick_pos: 32767,
            abs_left_joystick_pos: 32767,
            abs_pad_joystick_pos: 32767,
            period: Duration::from_millis(50),
            telemetry_target: Some("remoteBargraphController".to_string()),
        }
    }

    /// Registry with a channel sink per target; receivers keyed by target.
    fn channel_registry(targets: &Targets) -> (SinkRegistry, HashMap<String, UnboundedReceiver<ActuatorMessage>>) {
        let mut registry = SinkRegistry::new();
        let mut receivers = HashMap::new();
        for name in targets.all() {
            let (sink, rx) = ChannelSink::new(name);
            registry.register(name, Arc::new(sink));
            receivers.insert(name.to_string(), rx);
        }
        (registry, receivers)
    }

    fn arbiter() -> (Arbiter, HashMap<String, UnboundedReceiver<ActuatorMessage>>) {
        let settings = settings();
        let (registry, receivers) = channel_registry(&settings.targets);
        let arbiter = Arbiter::from_settings(&settings, Arc::new(registry)).unwrap();
        (arbiter, receivers)
    }

    fn drain(rx: &mut UnboundedReceiver<ActuatorMessage>) -> Vec<ActuatorMessage> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    // ==================== Build ====================

    #[test]
    fn test_from_settings_wires_twelve_listeners() {
        let (arbiter, _rx) = arbiter();
        assert_eq!(arbiter.listeners().count(), 12);
        assert_eq!(arbiter.period(), Duration::from_millis(50));

        let head_x = arbiter.listener(InputKey::PadX).unwrap();
        assert_eq!(head_x.name(), "headX");
        assert_eq!(head_x.kind(), ChannelKind::Continuous { abs_scale: 32767, step: 0.2 });

        let gripper = arbiter.listener(InputKey::FrontDownLeft).unwrap();
        assert_eq!(gripper.kind(), ChannelKind::Stepped { positive: false, step: 0.25 });

        let smile = arbiter.listener(InputKey::Green).unwrap();
        assert_eq!(smile.kind(), ChannelKind::OneShot { face: FaceExpression::Smile });
    }

    #[test]
    fn test_value_cache_seeded_with_zero() {
        let (arbiter, _rx) = arbiter();
        let values = arbiter.values();
        assert_eq!(values.len(), 8);
        assert!(values.values().all(|v| *v == 0.0));
    }

    #[test]
    fn test_build_fails_on_missing_primary_target() {
        let settings = settings();
        let mut registry = SinkRegistry::new();
        for name in settings.targets.all() {
            if name != "gripper" {
                registry.register(name, Arc::new(LoggingSink::new(name)));
            }
        }

        let result = Arbiter::from_settings(&settings, Arc::new(registry));
        assert!(matches!(result, Err(ArmError::UnresolvedTarget(name)) if name == "gripper"));
    }

    #[test]
    fn test_register_replaces_same_key() {
        let mut builder = Arbiter::builder();
        builder
            .register(ChannelListener::stepped("a", InputKey::Red, true, 0.1))
            .register(ChannelListener::stepped("b", InputKey::Red, true, 0.1));

        let mut registry = SinkRegistry::new();
        registry.register("b", Arc::new(LoggingSink::new("b")));
        let arbiter = builder.build(Arc::new(registry)).unwrap();

        assert_eq!(arbiter.listeners().count(), 1);
        assert_eq!(arbiter.listener(InputKey::Red).unwrap().name(), "b");
    }

    // ==================== Routing ====================

    #[test]
    fn test_press_acquires_and_release_frees() {
        let (arbiter, _rx) = arbiter();

        let outcome = arbiter.route(&InputEvent::pressed(InputKey::RightX, 16384));
        assert_eq!(outcome, RouteOutcome::Acquired);
        assert_eq!(arbiter.active_key(), Some(InputKey::RightX));

        let state = arbiter.listener(InputKey::RightX).unwrap().state();
        assert!(state.active);
        assert_eq!(state.amount, 16384);
        assert_eq!(state.value, 0.0);

        let outcome = arbiter.route(&InputEvent::released(InputKey::RightX, 0));
        assert_eq!(outcome, RouteOutcome::Released);
        assert_eq!(arbiter.active_key(), None);
        assert_eq!(arbiter.active_count(), 0);
    }

    #[test]
    fn test_press_while_busy_leaves_new_channel_untouched() {
        let (arbiter, _rx) = arbiter();
        arbiter.route(&InputEvent::pressed(InputKey::LeftX, 1000));

        let before = arbiter.listener(InputKey::PadY).unwrap().state();
        let outcome = arbiter.route(&InputEvent::pressed(InputKey::PadY, 32767));
        let after = arbiter.listener(InputKey::PadY).unwrap().state();

        assert_eq!(outcome, RouteOutcome::Busy);
        assert_eq!(before, after);
        assert!(!after.active);
        assert_eq!(arbiter.active_key(), Some(InputKey::LeftX));
    }

    #[test]
    fn test_repeated_press_of_holder_keeps_first_amount() {
        let (arbiter, _rx) = arbiter();
        arbiter.route(&InputEvent::pressed(InputKey::LeftY, 100));
        let outcome = arbiter.route(&InputEvent::pressed(InputKey::LeftY, 30000));

        assert_eq!(outcome, RouteOutcome::Busy);
        assert_eq!(arbiter.listener(InputKey::LeftY).unwrap().state().amount, 100);
    }

    #[test]
    fn test_stale_release_is_ignored() {
        let (arbiter, _rx) = arbiter();
        arbiter.route(&InputEvent::pressed(InputKey::FrontUpRight, 1));

        let outcome = arbiter.route(&InputEvent::released(InputKey::FrontDownRight, 1));
        assert_eq!(outcome, RouteOutcome::StaleRelease);
        assert_eq!(arbiter.active_key(), Some(InputKey::FrontUpRight));

        // Release while idle
        arbiter.route(&InputEvent::released(InputKey::FrontUpRight, 1));
        let outcome = arbiter.route(&InputEvent::released(InputKey::FrontUpRight, 1));
        assert_eq!(outcome, RouteOutcome::StaleRelease);
    }

    #[test]
    fn test_unregistered_key_is_noop() {
        let (arbiter, _rx) = arbiter();
        let outcome = arbiter.route(&InputEvent::pressed(InputKey::Start, 1));
        assert_eq!(outcome, RouteOutcome::Unregistered);
        assert_eq!(arbiter.active_key(), None);
    }

    #[test]
    fn test_exclusivity_over_interleaved_sequence() {
        let (arbiter, _rx) = arbiter();
        let keys = [
            InputKey::RightX,
            InputKey::LeftX,
            InputKey::PadX,
            InputKey::FrontUpLeft,
            InputKey::Blue,
        ];

        // Deterministic pseudo-random interleaving
        let mut seed: u32 = 0x2545_f491;
        for _ in 0..2000 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let key = keys[(seed % keys.len() as u32) as usize];
            let event = if seed & 0x100 == 0 {
                InputEvent::pressed(key, (seed % 32767) as i16)
            } else {
                InputEvent::released(key, 0)
            };
            arbiter.route(&event);

            assert!(arbiter.active_count() <= 1);
            match arbiter.active_key() {
                Some(holder) => {
                    assert!(arbiter.listener(holder).unwrap().is_active());
                    assert_eq!(arbiter.active_count(), 1);
                }
                None => assert_eq!(arbiter.active_count(), 0),
            }
        }
    }

    #[test]
    fn test_concurrent_presses_have_one_winner() {
        for _ in 0..50 {
            let (arbiter, _rx) = arbiter();
            let arbiter = Arc::new(arbiter);
            let barrier = Arc::new(std::sync::Barrier::new(4));
            let keys = [InputKey::RightX, InputKey::LeftX, InputKey::LeftY, InputKey::PadX];

            let handles: Vec<_> = keys
                .iter()
                .map(|&key| {
                    let arbiter = Arc::clone(&arbiter);
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        arbiter.route(&InputEvent::pressed(key, 1000))
                    })
                })
                .collect();

            let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            let winners = outcomes.iter().filter(|o| **o == RouteOutcome::Acquired).count();
            assert_eq!(winners, 1);
            assert_eq!(arbiter.active_count(), 1);
        }
    }

    #[test]
    fn test_active_key_matches_listener_under_its_lock() {
        let (arbiter, _rx) = arbiter();
        let arbiter = Arc::new(arbiter);
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let workers: Vec<_> = [InputKey::RightX, InputKey::LeftX]
            .into_iter()
            .map(|key| {
                let arbiter = Arc::clone(&arbiter);
                std::thread::spawn(move || {
                    for _ in 0..2000 {
                        arbiter.route(&InputEvent::pressed(key, 1000));
                        arbiter.route(&InputEvent::released(key, 0));
                    }
                })
            })
            .collect();

        let observer = {
            let arbiter = Arc::clone(&arbiter);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    let listener = arbiter.listener(InputKey::RightX).unwrap();
                    let state = listener.lock_state();
                    assert_eq!(arbiter.active_key() == Some(InputKey::RightX), state.active);
                }
            })
        };

        for worker in workers {
            worker.join().unwrap();
        }
        done.store(true, Ordering::Release);
        observer.join().unwrap();
        assert_eq!(arbiter.active_key(), None);
    }

    // ==================== Sampling ====================

    #[test]
    fn test_sample_writes_cache_and_sends() {
        let (arbiter, mut rx) = arbiter();
        arbiter.route(&InputEvent::pressed(InputKey::RightX, 16384));

        assert_eq!(arbiter.sample_once(), 1);

        let value = arbiter.value_of("platformX").unwrap();
        assert!((value - (16384.0 / 32767.0) * 0.1).abs() < EPS);
        assert_eq!(
            drain(rx.get_mut("platformX").unwrap()),
            vec![ActuatorMessage::Position(value)]
        );
    }

    #[test]
    fn test_sample_with_nobody_active_is_noop() {
        let (arbiter, mut rx) = arbiter();
        assert_eq!(arbiter.sample_once(), 0);
        for receiver in rx.values_mut() {
            assert!(drain(receiver).is_empty());
        }
    }

    #[test]
    fn test_value_continues_from_cache_on_next_press() {
        let (arbiter, _rx) = arbiter();

        arbiter.route(&InputEvent::pressed(InputKey::FrontUpRight, 1));
        arbiter.sample_once();
        arbiter.sample_once();
        arbiter.route(&InputEvent::released(InputKey::FrontUpRight, 1));
        assert!((arbiter.value_of("headRotation").unwrap() - 0.5).abs() < EPS);

        // The opposite button shares the headRotation target
        arbiter.route(&InputEvent::pressed(InputKey::FrontDownRight, 1));
        assert!((arbiter.listener(InputKey::FrontDownRight).unwrap().state().value - 0.5).abs() < EPS);
        arbiter.sample_once();
        assert!((arbiter.value_of("headRotation").unwrap() - 0.25).abs() < EPS);
    }

    #[test]
    fn test_face_button_sends_face() {
        let (arbiter, mut rx) = arbiter();
        arbiter.route(&InputEvent::pressed(InputKey::Yellow, 1));
        arbiter.sample_once();
        arbiter.sample_once();

        assert_eq!(
            drain(rx.get_mut("display").unwrap()),
            vec![
                ActuatorMessage::Face(FaceExpression::Sad),
                ActuatorMessage::Face(FaceExpression::Sad)
            ]
        );
        assert_eq!(arbiter.value_of("display"), Some(1.0));
    }

    #[test]
    fn test_continuous_forwards_amount_to_telemetry_target() {
        let settings = settings();
        let (mut registry, _receivers) = channel_registry(&settings.targets);

        let mut telemetry = MockMessageSink::new();
        telemetry
            .expect_send()
            .withf(|m| *m == ActuatorMessage::Telemetry(-1200.0))
            .times(2)
            .returning(|_| Ok(()));
        registry.register("remoteBargraphController", Arc::new(telemetry));

        let arbiter = Arbiter::from_settings(&settings, Arc::new(registry)).unwrap();
        arbiter.route(&InputEvent::pressed(InputKey::PadY, -1200));
        arbiter.sample_once();
        arbiter.sample_once();
    }

    #[test]
    fn test_missing_telemetry_target_is_tolerated() {
        let (arbiter, _rx) = arbiter();
        arbiter.route(&InputEvent::pressed(InputKey::LeftX, 500));
        assert_eq!(arbiter.sample_once(), 1);
    }

    #[test]
    fn test_failing_sink_does_not_stop_sampling() {
        let mut builder = Arbiter::builder();
        builder.register(ChannelListener::stepped("gripper", InputKey::FrontUpLeft, true, 0.1));

        let mut sink = MockMessageSink::new();
        sink.expect_send()
            .returning(|_| Err(ArmError::SinkUnavailable("servo offline".to_string())));
        let mut registry = SinkRegistry::new();
        registry.register("gripper", Arc::new(sink));

        let arbiter = builder.build(Arc::new(registry)).unwrap();
        arbiter.route(&InputEvent::pressed(InputKey::FrontUpLeft, 1));
        arbiter.sample_once();
        arbiter.sample_once();
        assert!((arbiter.value_of("gripper").unwrap() - 0.2).abs() < EPS);
    }

    // ==================== Tasks ====================

    #[tokio::test(start_paused = true)]
    async fn test_sampler_runs_at_period_and_stops_on_cancel() {
        let (arbiter, mut rx) = arbiter();
        let arbiter = Arc::new(arbiter);
        let shutdown = CancellationToken::new();

        arbiter.route(&InputEvent::pressed(InputKey::FrontUpLeft, 1));
        let task = tokio::spawn(Arc::clone(&arbiter).run_sampler(shutdown.clone()));

        // First tick fires immediately, then every 50ms
        tokio::time::sleep(Duration::from_millis(125)).await;
        shutdown.cancel();
        task.await.unwrap();

        let sent = drain(rx.get_mut("gripper").unwrap());
        assert_eq!(sent.len(), 3);
        assert!((arbiter.value_of("gripper").unwrap() - 0.75).abs() < EPS);
    }

    #[tokio::test]
    async fn test_router_routes_until_channel_closes() {
        let (arbiter, _rx) = arbiter();
        let arbiter = Arc::new(arbiter);
        let (handle, events) = ArbiterHandle::channel(8);
        let task = tokio::spawn(Arc::clone(&arbiter).run_router(events, CancellationToken::new()));

        handle.submit(InputEvent::pressed(InputKey::PadX, 10)).await.unwrap();
        drop(handle);
        task.await.unwrap();

        // The press was routed, and with no input left the holder is let go
        let state = arbiter.listener(InputKey::PadX).unwrap().state();
        assert_eq!(state.amount, 10);
        assert!(!state.active);
        assert_eq!(arbiter.active_key(), None);
    }

    #[tokio::test]
    async fn test_router_routes_queued_release_after_cancel() {
        let (arbiter, _rx) = arbiter();
        let arbiter = Arc::new(arbiter);
        let (handle, events) = ArbiterHandle::channel(8);
        let shutdown = CancellationToken::new();

        arbiter.route(&InputEvent::pressed(InputKey::PadX, 5000));
        handle.submit(InputEvent::pressed(InputKey::LeftX, 100)).await.unwrap();
        handle.submit(InputEvent::released(InputKey::PadX, 0)).await.unwrap();
        handle.submit(InputEvent::pressed(InputKey::LeftY, 100)).await.unwrap();
        shutdown.cancel();

        Arc::clone(&arbiter).run_router(events, shutdown).await;

        assert_eq!(arbiter.active_key(), None);
        assert_eq!(arbiter.active_count(), 0);
        assert!(!arbiter.listener(InputKey::LeftX).unwrap().is_active());
        assert!(!arbiter.listener(InputKey::LeftY).unwrap().is_active());
        drop(handle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_router_forces_release_after_grace() {
        let (arbiter, _rx) = arbiter();
        let arbiter = Arc::new(arbiter);
        let (handle, events) = ArbiterHandle::channel(8);
        let shutdown = CancellationToken::new();

        arbiter.route(&InputEvent::pressed(InputKey::FrontUpLeft, 1));
        shutdown.cancel();

        let started = tokio::time::Instant::now();
        Arc::clone(&arbiter).run_router(events, shutdown).await;

        assert!(started.elapsed() >= RELEASE_GRACE);
        assert_eq!(arbiter.active_key(), None);
        assert!(!arbiter.listener(InputKey::FrontUpLeft).unwrap().is_active());
        drop(handle);
    }

    #[test]
    fn test_release_held_with_nobody_holding() {
        let (arbiter, _rx) = arbiter();
        assert_eq!(arbiter.release_held(), None);

        arbiter.route(&InputEvent::pressed(InputKey::Red, 1));
        assert_eq!(arbiter.release_held(), Some(InputKey::Red));
        assert_eq!(arbiter.active_key(), None);
        assert_eq!(arbiter.active_count(), 0);

        // Free again for the next press
        assert_eq!(arbiter.route(&InputEvent::pressed(InputKey::Blue, 1)), RouteOutcome::Acquired);
    }

    #[tokio::test]
    async fn test_arbiter_is_an_event_sink() {
        let (arbiter, _rx) = arbiter();
        arbiter.submit(InputEvent::pressed(InputKey::Green, 1)).await.unwrap();
        assert_eq!(arbiter.active_key(), Some(InputKey::Green));
    }
}
