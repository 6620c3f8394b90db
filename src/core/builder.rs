use std::sync::Arc;

use tokio::runtime::Handle;

use crate::core::GuardianConfig;
use crate::core::guardian::{Guardian, GuardianParts};
use crate::core::registry::Registry;
use crate::engine::{Engine, Terminator};
use crate::error::GuardError;
use crate::events::Bus;
use crate::process::{CommandSpawner, Spawn};
use crate::subscribers::{LogWriter, Subscribe, SubscriberSet};

/// Builder for constructing a [`Guardian`] with optional features.
pub struct GuardianBuilder {
    cfg: GuardianConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
    spawner: Arc<dyn Spawn>,
    grouping: Option<Arc<dyn Terminator>>,
}

impl GuardianBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: GuardianConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            spawner: Arc::new(CommandSpawner::new()),
            grouping: None,
        }
    }

    /// Sets event subscribers.
    ///
    /// Subscribers receive guardian events through dedicated workers with
    /// bounded queues. `detailed_logging` adds a [`LogWriter`] to this list.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Replaces the default [`CommandSpawner`].
    pub fn with_spawner<S: Spawn>(mut self, spawner: S) -> Self {
        self.spawner = Arc::new(spawner);
        self
    }

    /// Replaces the platform grouping engine (ignored in `TerminationMode::TreeWalk`).
    pub fn with_grouping_engine(mut self, engine: Arc<dyn Terminator>) -> Self {
        self.grouping = Some(engine);
        self
    }

    /// Builds the guardian.
    ///
    /// Must be called from within a tokio runtime: the event listener, the
    /// subscriber workers and the cleanup scheduler are spawned on it.
    ///
    /// # Errors
    /// [`GuardError::InvalidConfig`] if the configuration does not validate or
    /// no runtime is available.
    pub fn build(self) -> Result<Arc<Guardian>, GuardError> {
        self.cfg.validate()?;
        let runtime = Handle::try_current().map_err(|e| GuardError::InvalidConfig {
            reason: format!("guardian must be built inside a tokio runtime: {e}"),
        })?;

        let bus = Bus::new(self.cfg.bus_capacity_clamped());

        let mut subscribers = self.subscribers;
        if self.cfg.detailed_logging {
            subscribers.push(Arc::new(LogWriter::new()));
        }
        let subs = SubscriberSet::new(subscribers, bus.clone());

        let engine = Engine::for_mode(
            self.cfg.termination_mode,
            self.grouping,
            self.cfg.forced_exit_grace,
        );

        Ok(Arc::new(Guardian::new_internal(GuardianParts {
            cfg: self.cfg,
            bus,
            registry: Arc::new(Registry::new()),
            engine,
            spawner: self.spawner,
            subs,
            runtime,
        })))
    }
}
