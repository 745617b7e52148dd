//! Trait abstraction for handing input events to the arbiter, to enable testing

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{ArmError, Result};
use crate::input::InputEvent;

/// Something that accepts input events for routing
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Submit one event
    async fn submit(&self, event: InputEvent) -> Result<()>;
}

/// Cloneable sender side of the arbiter's router channel
#[derive(Debug, Clone)]
pub struct ArbiterHandle {
    tx: mpsc::Sender<InputEvent>,
}

impl ArbiterHandle {
    /// Create a handle and the receiver the router task drains
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<InputEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Submit from a blocking thread (the gamepad reader)
    pub fn blocking_submit(&self, event: InputEvent) -> Result<()> {
        self.tx
            .blocking_send(event)
            .map_err(|_| ArmError::SinkUnavailable("arbiter router stopped".to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait]
impl EventSink for ArbiterHandle {
    async fn submit(&self, event: InputEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| ArmError::SinkUnavailable("arbiter router stopped".to_string()))
    }
}
