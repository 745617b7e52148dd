//! # Sink Module
//!
//! Named message sinks standing in for the actuator drivers, and the two
//! lookup seams the controllers are given:
//!
//! - [`Directory`]: resolves a target name to a sink inside one system
//! - [`Discovery`]: resolves a logical system name to that system's directory
//!
//! Both are injected capabilities so tests can substitute fakes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::display::{FaceExpression, RenderDirective};
use crate::error::{ArmError, Result};

/// Message delivered to an actuator sink.
#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorMessage {
    /// Servo position in `[-1.0, 1.0]`
    Position(f32),
    /// Raw magnitude forwarded to an auxiliary indicator
    Telemetry(f32),
    /// Face to show on the LED matrix
    Face(FaceExpression),
    /// Low-level render directive for an LED backpack
    Render(RenderDirective),
}

/// Something that accepts actuator messages by value.
#[cfg_attr(test, mockall::automock)]
pub trait MessageSink: Send + Sync {
    /// Deliver a message. Delivery is best-effort and at-most-once.
    fn send(&self, message: ActuatorMessage) -> Result<()>;
}

/// Shared handle to a sink.
pub type SinkRef = Arc<dyn MessageSink>;

/// Name lookup within one system.
pub trait Directory: Send + Sync {
    fn lookup(&self, name: &str) -> Option<SinkRef>;
}

/// Logical system lookup.
pub trait Discovery: Send + Sync {
    fn context(&self, system: &str) -> Option<Arc<dyn Directory>>;
}

/// In-process [`Directory`] backed by a map.
#[derive(Default, Clone)]
pub struct SinkRegistry {
    sinks: HashMap<String, SinkRef>,
}

impl fmt::Debug for SinkRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.sinks.keys().collect();
        names.sort();
        f.debug_struct("SinkRegistry").field("sinks", &names).finish()
    }
}

impl SinkRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sink` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, sink: SinkRef) -> &mut Self {
        self.sinks.insert(name.into(), sink);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sinks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Directory for SinkRegistry {
    fn lookup(&self, name: &str) -> Option<SinkRef> {
        self.sinks.get(name).cloned()
    }
}

/// In-process [`Discovery`] with a fixed set of systems.
#[derive(Default, Clone)]
pub struct LocalDiscovery {
    systems: HashMap<String, Arc<dyn Directory>>,
}

impl LocalDiscovery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, system: impl Into<String>, directory: Arc<dyn Directory>) -> &mut Self {
        self.systems.insert(system.into(), directory);
        self
    }
}

impl Discovery for LocalDiscovery {
    fn context(&self, system: &str) -> Option<Arc<dyn Directory>> {
        self.systems.get(system).cloned()
    }
}

/// Sink forwarding into an unbounded channel, preserving send order.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    name: String,
    tx: mpsc::UnboundedSender<ActuatorMessage>,
}

impl ChannelSink {
    /// Create a sink together with the receiver that drains it.
    #[must_use]
    pub fn new(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<ActuatorMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                name: name.into(),
                tx,
            },
            rx,
        )
    }
}

impl MessageSink for ChannelSink {
    fn send(&self, message: ActuatorMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| ArmError::SinkUnavailable(format!("{} receiver dropped", self.name)))
    }
}

/// Sink that only logs what it receives. Stands in for a hardware driver.
#[derive(Debug, Clone)]
pub struct LoggingSink {
    name: String,
}

impl LoggingSink {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl MessageSink for LoggingSink {
    fn send(&self, message: ActuatorMessage) -> Result<()> {
        info!(sink = %self.name, ?message, "actuator message");
        Ok(())
    }
}
