//! # Arm System
//!
//! Wires the arbiter, the face display, the bargraph and command replay
//! together and owns their tasks.
//!
//! ```text
//! gamepad ─┐
//!          ├──► ArbiterHandle ──► router ──► Arbiter ──► sampler ──► drivers
//! replay  ─┘                                               │
//!                                                          └──► BargraphDispatcher ──► consumer ──► bargraph
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::arbiter::{Arbiter, ArbiterHandle, EventSink};
use crate::bargraph::{BargraphConsumer, BargraphDispatcher};
use crate::config::Config;
use crate::display::LedMatrixController;
use crate::error::{ArmError, Result};
use crate::input::InputEvent;
use crate::replay::CommandReplayAdapter;
use crate::sink::{Directory, Discovery, LocalDiscovery, LoggingSink, SinkRegistry};

/// Capacity of the router channel.
const ROUTER_CAPACITY: usize = 64;

/// Running (or ready to run) arm.
pub struct ArmSystem {
    arbiter: Arc<Arbiter>,
    dispatcher: Option<Arc<BargraphDispatcher>>,
    handle: ArbiterHandle,
    replay: CommandReplayAdapter,
    shutdown: CancellationToken,
    pending: Option<(mpsc::Receiver<InputEvent>, BargraphConsumer)>,
    tasks: Vec<JoinHandle<()>>,
}

impl ArmSystem {
    /// Build every component. Nothing runs until [`ArmSystem::start`].
    ///
    /// `drivers` holds the actuator sinks by name: every arm target except
    /// the display, plus the LED matrix named by `display.target`. The face
    /// controller and the bargraph dispatcher are added on top of it.
    ///
    /// # Errors
    ///
    /// Fails on the first missing option or unresolved target.
    pub fn build(config: &Config, drivers: SinkRegistry, discovery: Arc<dyn Discovery>) -> Result<Self> {
        let settings = config.arm.resolve()?;
        let matrix_target = config.display.resolve()?;
        let bargraph = config.bargraph.resolve()?;
        let shutdown = CancellationToken::new();

        let mut directory = drivers;
        let matrix = directory
            .lookup(&matrix_target)
            .ok_or_else(|| ArmError::UnresolvedTarget(matrix_target.clone()))?;
        directory.register(settings.targets.display.clone(), Arc::new(LedMatrixController::new(matrix)));

        let (dispatcher, consumer) = BargraphDispatcher::new(bargraph, discovery, shutdown.clone());
        let dispatcher = match &settings.telemetry_target {
            Some(target) => {
                let dispatcher = Arc::new(dispatcher);
                directory.register(target.clone(), dispatcher.clone());
                Some(dispatcher)
            }
            None => {
                info!("No telemetry target configured, bargraph idle");
                None
            }
        };

        let arbiter = Arc::new(Arbiter::from_settings(&settings, Arc::new(directory))?);
        let (handle, events) = ArbiterHandle::channel(ROUTER_CAPACITY);
        let replay = CommandReplayAdapter::new(Arc::new(handle.clone()), shutdown.clone());

        Ok(Self {
            arbiter,
            dispatcher,
            handle,
            replay,
            shutdown,
            pending: Some((events, consumer)),
            tasks: Vec::new(),
        })
    }

    /// Spawn the router, the sampling loop and the bargraph consumer.
    /// Calling it twice has no effect.
    pub fn start(&mut self) {
        let Some((events, consumer)) = self.pending.take() else {
            warn!("Arm system already started");
            return;
        };

        self.tasks.push(tokio::spawn(
            Arc::clone(&self.arbiter).run_router(events, self.shutdown.clone()),
        ));
        self.tasks.push(tokio::spawn(
            Arc::clone(&self.arbiter).run_sampler(self.shutdown.clone()),
        ));
        self.tasks.push(tokio::spawn(consumer.run(self.shutdown.clone())));

        info!("Arm system started");
    }

    pub fn arbiter(&self) -> &Arc<Arbiter> {
        &self.arbiter
    }

    pub fn dispatcher(&self) -> Option<&Arc<BargraphDispatcher>> {
        self.dispatcher.as_ref()
    }

    /// Sender for input sources running outside the runtime.
    pub fn handle(&self) -> ArbiterHandle {
        self.handle.clone()
    }

    /// Input sink for async sources.
    pub fn events(&self) -> Arc<dyn EventSink> {
        Arc::new(self.handle.clone())
    }

    pub fn replay(&self) -> &CommandReplayAdapter {
        &self.replay
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop every task, letting in-flight cycles and updates finish.
    pub async fn shutdown(self) {
        info!("Shutting down arm system");
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Task ended abnormally: {}", e);
            }
        }
        info!("Arm system stopped");
    }
}

/// Stand-in drivers that log every message: one per arm target (except the
/// display, which gets the face controller) and the LED matrix, plus a
/// discovery entry for the bargraph system.
pub fn logging_drivers(config: &Config) -> Result<(SinkRegistry, LocalDiscovery)> {
    let settings = config.arm.resolve()?;
    let matrix = config.display.resolve()?;
    let bargraph = config.bargraph.resolve()?;

    let mut drivers = SinkRegistry::new();
    for name in settings.targets.all() {
        if name != settings.targets.display {
            drivers.register(name, Arc::new(LoggingSink::new(name)));
        }
    }
    drivers.register(matrix.clone(), Arc::new(LoggingSink::new(matrix)));

    let mut remote = SinkRegistry::new();
    remote.register(bargraph.target.clone(), Arc::new(LoggingSink::new(bargraph.target)));
    let mut discovery = LocalDiscovery::new();
    discovery.register(bargraph.target_system, Arc::new(remote));

    Ok((drivers, discovery))
}
