//! # Bargraph Module
//!
//! Bouncing level indicator on a remote 24-segment bargraph.
//!
//! Every telemetry sample moves a counter one step through `0..=23` and back,
//! and lights that many segments. Each update is a `Clear` and a `Display`
//! directive that must reach the bargraph together and in order, so
//! producers only enqueue complete updates and a single consumer task
//! resolves the remote sink and delivers them.
//!
//! ```text
//! Telemetry(f32) ──► BargraphDispatcher ──► queue ──► BargraphConsumer ──► Discovery ──► bargraph
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::BargraphSettings;
use crate::display::{BiColor, PackElement, RenderDirective};
use crate::error::{ArmError, Result};
use crate::sink::{ActuatorMessage, Discovery, MessageSink};
use crate::telemetry::{self, TelemetryRecord};

/// Highest counter value (number of segments minus one).
pub const BARGRAPH_MAX: u8 = 23;

/// Direction the counter is moving in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incrementing,
    Decrementing,
}

/// Counter bouncing between 0 and [`BARGRAPH_MAX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BargraphCounter {
    value: u8,
    direction: Direction,
}

impl Default for BargraphCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl BargraphCounter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            value: 0,
            direction: Direction::Incrementing,
        }
    }

    pub fn value(&self) -> u8 {
        self.value
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Move one step, reversing on reaching a bound.
    pub fn advance(&mut self) {
        match self.direction {
            Direction::Incrementing => {
                self.value = (self.value + 1).min(BARGRAPH_MAX);
                if self.value == BARGRAPH_MAX {
                    self.direction = Direction::Decrementing;
                }
            }
            Direction::Decrementing => {
                self.value = self.value.saturating_sub(1);
                if self.value == 0 {
                    self.direction = Direction::Incrementing;
                }
            }
        }
    }
}

/// One undivided render update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderUpdate {
    pub clear: RenderDirective,
    pub display: RenderDirective,
}

impl RenderUpdate {
    /// Update lighting segments `0..count` of the first row.
    #[must_use]
    pub fn for_count(count: u8) -> Self {
        let cells = (0..count)
            .map(|x| PackElement::new(x, 0, BiColor::Green))
            .collect();
        Self {
            clear: RenderDirective::Clear,
            display: RenderDirective::Display(cells),
        }
    }
}

/// Producer side: accepts telemetry samples and queues render updates.
pub struct BargraphDispatcher {
    counter: Mutex<BargraphCounter>,
    queue: mpsc::UnboundedSender<RenderUpdate>,
    shutdown: CancellationToken,
}

/// Consumer side: drains the queue to the remote bargraph.
pub struct BargraphConsumer {
    settings: BargraphSettings,
    discovery: Arc<dyn Discovery>,
    queue: mpsc::UnboundedReceiver<RenderUpdate>,
}

impl BargraphDispatcher {
    /// Create a dispatcher and the consumer that must be run for updates to
    /// reach the bargraph.
    pub fn new(
        settings: BargraphSettings,
        discovery: Arc<dyn Discovery>,
        shutdown: CancellationToken,
    ) -> (Self, BargraphConsumer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            counter: Mutex::new(BargraphCounter::new()),
            queue: tx,
            shutdown,
        };
        let consumer = BargraphConsumer {
            settings,
            discovery,
            queue: rx,
        };
        (dispatcher, consumer)
    }

    /// Current counter state.
    pub fn counter(&self) -> BargraphCounter {
        *self.counter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept one telemetry sample.
    ///
    /// Samples arriving after shutdown has begun are dropped.
    pub fn on_sample(&self, amount: f32) -> Result<()> {
        if self.shutdown.is_cancelled() {
            debug!("Bargraph stopping, dropping sample {}", amount);
            return Ok(());
        }

        // Enqueue while holding the counter so queue order follows counter order.
        let mut counter = self.counter.lock().unwrap_or_else(PoisonError::into_inner);
        let shown = *counter;
        counter.advance();

        telemetry::emit(&TelemetryRecord::bargraph(
            amount,
            shown.value(),
            shown.direction() == Direction::Incrementing,
        ));

        self.queue
            .send(RenderUpdate::for_count(shown.value()))
            .map_err(|_| ArmError::SinkUnavailable("bargraph consumer stopped".to_string()))
    }
}

impl MessageSink for BargraphDispatcher {
    fn send(&self, message: ActuatorMessage) -> Result<()> {
        match message {
            ActuatorMessage::Telemetry(amount) => self.on_sample(amount),
            other => {
                debug!(?other, "Bargraph ignores non-telemetry message");
                Ok(())
            }
        }
    }
}

impl BargraphConsumer {
    /// Deliver queued updates until shutdown or until every dispatcher is gone.
    ///
    /// An update that has been taken off the queue is always delivered in
    /// full before shutdown is observed.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            "Bargraph consumer started for {}/{}",
            self.settings.target_system, self.settings.target
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                update = self.queue.recv() => match update {
                    Some(update) => self.deliver(update),
                    None => break,
                },
            }
        }

        info!("Bargraph consumer stopped");
    }

    fn deliver(&self, update: RenderUpdate) {
        let BargraphSettings { target_system, target } = &self.settings;

        let Some(directory) = self.discovery.context(target_system) else {
            warn!("Bargraph system {} not found, dropping update", target_system);
            return;
        };
        let Some(sink) = directory.lookup(target) else {
            warn!("Bargraph {} not found in {}, dropping update", target, target_system);
            return;
        };

        let result = sink
            .send(ActuatorMessage::Render(update.clear))
            .and_then(|()| sink.send(ActuatorMessage::Render(update.display)));
        if let Err(e) = result {
            error!("Failed to update bargraph {}: {}", target, e);
        }
    }
}
