//! # Guardian: registry, termination and teardown of spawned processes.
//!
//! The [`Guardian`] owns the event bus, the process registry, the termination
//! engine and the optional cleanup scheduler. Every process it starts is
//! terminated no later than the guardian itself: by [`Guardian::kill`],
//! [`Guardian::kill_all`], [`Guardian::dispose`], the drop safety net, or (with
//! a grouping engine) by the kernel when the host dies.
//!
//! ## High-level architecture
//! ```text
//! start(spec):
//!   ensure_live ─► registry.len() < max ─► Spawn::spawn(spec) ─► Child
//!     └─► registry.insert(pid)            (AlreadyManaged on collision)
//!     └─► engine.attach()                 ─► GroupAttached | ManualTrackingActivated
//!     └─► publish Started
//!     └─► watch_exit(child)               ─► Exited (once, when the process ends)
//!
//! kill_all(timeout):
//!   registry.claim_all() ─► join_all(engine.terminate(p, timeout)) per entry
//!     ├─ Forced{..} ─► ForcedTerminated
//!     ├─ Err(e)     ─► OperationFailed
//!     └─► CleanupCompleted{ succeeded, failed, elapsed }
//!
//! Event flow:
//!   Guardian / exit watchers / scheduler ── publish ──► Bus ──► listener ──► SubscriberSet
//!                                                        └────► Guardian::subscribe() receivers
//!
//! dispose():
//!   disposed: false ─► true (once)
//!     └─► hooks.cancel()            (shutdown-signal helper)
//!     └─► gate.close()              (pending start_bounded → UseAfterDispose)
//!     └─► scheduler.stop().await
//!     └─► kill_all(None)
//!     └─► engine.release()          (closes the job object)
//!     └─► runtime_token.cancel()    ─► listener drains and stops subscribers
//! ```
//!
//! ## Rules
//! - After disposal every operation except `kill_all`, `dispose`,
//!   `dispose_blocking` and `is_disposed` returns [`GuardError::UseAfterDispose`].
//! - Termination failures are always published; `kill` returns them only with
//!   `propagate_operation_errors`.
//! - Dropping an undisposed guardian force-kills what is still registered.
//!
//! ## Example
//! ```no_run
//! use std::time::Duration;
//! use procguard::{Guardian, GuardianConfig, SpawnSpec};
//!
//! #[tokio::main]
//! async fn main() -> procguard::Result<()> {
//!     let mut cfg = GuardianConfig::default();
//!     cfg.max_managed_processes = 8;
//!     cfg.process_kill_timeout = Duration::from_secs(2);
//!
//!     let guardian = Guardian::builder(cfg).build()?;
//!     let worker = guardian.start(SpawnSpec::new("sleep").arg("60")).await?;
//!     println!("started pid {}", worker.pid());
//!
//!     guardian.dispose().await;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::cleanup::{self, CleanupScheduler};
use crate::core::registry::Registry;
use crate::core::{GuardianBuilder, GuardianConfig, Statistics, shutdown};
use crate::engine::{Engine, Termination};
use crate::error::{GuardError, Result};
use crate::events::{Bus, Event, EventKind};
use crate::process::{AttachmentState, ManagedProcess, ProcessRef, Spawn, SpawnSpec, watch_exit};
use crate::subscribers::SubscriberSet;

/// Supervises spawned processes and bounds their lifetime to its own.
pub struct Guardian {
    cfg: GuardianConfig,
    bus: Bus,
    registry: Arc<Registry>,
    engine: Engine,
    spawner: Arc<dyn Spawn>,
    gate: Arc<Semaphore>,
    cleanup: Mutex<Option<CleanupScheduler>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
    /// Cancels shutdown-signal hooks.
    hooks: CancellationToken,
    /// Stops the event listener.
    runtime_token: CancellationToken,
    runtime: Handle,
}

pub(crate) struct GuardianParts {
    pub cfg: GuardianConfig,
    pub bus: Bus,
    pub registry: Arc<Registry>,
    pub engine: Engine,
    pub spawner: Arc<dyn Spawn>,
    pub subs: SubscriberSet,
    pub runtime: Handle,
}

impl Guardian {
    /// Starts building a guardian with `cfg`.
    pub fn builder(cfg: GuardianConfig) -> GuardianBuilder {
        GuardianBuilder::new(cfg)
    }

    pub(crate) fn new_internal(parts: GuardianParts) -> Self {
        let GuardianParts {
            cfg,
            bus,
            registry,
            engine,
            spawner,
            subs,
            runtime,
        } = parts;

        let runtime_token = CancellationToken::new();
        let listener = (!subs.is_empty())
            .then(|| subscriber_listener(&runtime, &bus, subs, runtime_token.clone()));

        let cleanup = cfg.cleanup_period().map(|period| {
            let _enter = runtime.enter();
            CleanupScheduler::start(Arc::clone(&registry), bus.clone(), period)
        });

        tracing::debug!(
            engine = engine.active_name(),
            max = cfg.max_managed_processes,
            cleanup = ?cfg.cleanup_period(),
            "guardian created"
        );

        Self {
            gate: Arc::new(Semaphore::new(cfg.max_managed_processes)),
            cfg,
            bus,
            registry,
            engine,
            spawner,
            cleanup: Mutex::new(cleanup),
            listener: Mutex::new(listener),
            disposed: AtomicBool::new(false),
            hooks: CancellationToken::new(),
            runtime_token,
            runtime,
        }
    }

    // ---------------------------
    // Registration
    // ---------------------------

    /// Spawns `spec` and puts the new process under supervision.
    ///
    /// # Errors
    /// - [`GuardError::UseAfterDispose`] once disposed
    /// - [`GuardError::CapacityExceeded`] when `max_managed_processes` are registered
    /// - [`GuardError::SpawnFailure`] when the spawner fails (nothing is registered)
    /// - [`GuardError::AlreadyManaged`] if the OS handed out a pid that is still registered
    pub async fn start(&self, spec: SpawnSpec) -> Result<ProcessRef> {
        self.ensure_live()?;

        let max = self.cfg.max_managed_processes;
        if self.registry.len() >= max {
            return Err(GuardError::CapacityExceeded { max });
        }

        let child = match self.spawner.spawn(&spec) {
            Ok(child) => child,
            Err(source) => {
                let err = GuardError::SpawnFailure {
                    program: spec.program().to_string(),
                    source,
                };
                tracing::error!(program = spec.program(), error = %err, "spawn failed");
                self.bus
                    .publish(Event::operation_failed("start", &err).with_program(spec.program()));
                return Err(err);
            }
        };

        self.register(child, spec)
    }

    /// Like [`start`](Self::start), but first waits for a capacity-gate permit.
    ///
    /// The permit is held while the process is spawned and registered. An
    /// already-cancelled `cancel` always wins over a free permit.
    ///
    /// # Errors
    /// [`GuardError::CancelledWait`] if `cancel` fires first (nothing is spawned),
    /// plus everything [`start`](Self::start) returns.
    pub async fn start_bounded(
        &self,
        spec: SpawnSpec,
        cancel: &CancellationToken,
    ) -> Result<ProcessRef> {
        self.ensure_live()?;

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GuardError::CancelledWait),
            permit = Arc::clone(&self.gate).acquire_owned() => {
                permit.map_err(|_closed| GuardError::UseAfterDispose)?
            }
        };

        self.start(spec).await
    }

    fn register(&self, mut child: tokio::process::Child, spec: SpawnSpec) -> Result<ProcessRef> {
        let Some(pid) = child.id() else {
            let err = GuardError::SpawnFailure {
                program: spec.program().to_string(),
                source: std::io::Error::other("process was reaped before registration"),
            };
            self.bus.publish(Event::operation_failed("start", &err));
            return Err(err);
        };

        let (process, notifier) = ManagedProcess::new(pid, spec);
        let process = Arc::new(process);

        if !self.registry.insert(Arc::clone(&process)) {
            if let Err(e) = child.start_kill() {
                tracing::error!(pid, error = %e, "failed to kill duplicate child");
            }
            let err = GuardError::AlreadyManaged { pid };
            self.bus.publish(Event::operation_failed("start", &err));
            return Err(err);
        }

        let attached = self.engine.attach(&process, &child);
        match attached.state {
            AttachmentState::GroupAttached => {
                self.bus
                    .publish(Event::new(EventKind::GroupAttached).with_process(&process));
            }
            _ => {
                let mut ev = Event::new(EventKind::ManualTrackingActivated).with_process(&process);
                if let Some(reason) = attached.reason {
                    ev = ev.with_reason(reason.into_owned());
                }
                if attached.switched {
                    // Marks the attach that disabled the grouping engine.
                    ev = ev.with_operation("attach");
                }
                self.bus.publish(ev);
            }
        }

        self.bus
            .publish(Event::new(EventKind::Started).with_process(&process));
        tracing::debug!(
            pid,
            program = %process.program(),
            attachment = ?process.attachment(),
            "process started"
        );

        let terminator = self.engine.exit_hook(&process);
        watch_exit(
            child,
            Arc::clone(&process),
            notifier,
            self.bus.clone(),
            move |process| terminator.observe_exit(process),
        );

        // Lost a race with dispose(): its kill_all may already have run.
        if self.is_disposed() && self.registry.remove(pid).is_some() {
            process.release();
            self.engine.force_now(&process);
            return Err(GuardError::UseAfterDispose);
        }

        Ok(process)
    }

    /// Takes `pid` out of supervision without terminating it.
    ///
    /// Returns whether the pid was registered.
    pub fn remove(&self, pid: u32) -> Result<bool> {
        self.ensure_live()?;
        let Some(process) = self.registry.remove(pid) else {
            return Ok(false);
        };
        process.release();
        self.bus.publish(
            Event::new(EventKind::Removed)
                .with_process(&process)
                .with_reason("removed"),
        );
        tracing::debug!(pid, "process removed from supervision");
        Ok(true)
    }

    // ---------------------------
    // Termination
    // ---------------------------

    /// Terminates one managed process and unregisters it.
    ///
    /// `timeout` bounds the cooperative phase (default: `process_kill_timeout`).
    /// Returns `Ok(false)` if `pid` is not managed, or if termination failed and
    /// `propagate_operation_errors` is off. A process that could not be
    /// terminated stays registered, unless the guardian was disposed in the
    /// meantime; then it is force-killed instead.
    pub async fn kill(&self, pid: u32, timeout: Option<Duration>) -> Result<bool> {
        self.ensure_live()?;
        let Some(process) = self.registry.remove(pid) else {
            return Ok(false);
        };

        match self.terminate_one(&process, timeout, "kill").await {
            Ok(_) => {
                process.release();
                Ok(true)
            }
            Err(e) => {
                if !process.has_exited() {
                    self.registry.insert(Arc::clone(&process));
                    // dispose() ran meanwhile and had nothing left to claim.
                    if self.is_disposed() && self.registry.remove(pid).is_some() {
                        process.release();
                        self.engine.force_now(&process);
                    }
                } else {
                    process.release();
                }
                if self.cfg.propagate_operation_errors {
                    Err(e)
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Terminates every process registered right now, concurrently.
    ///
    /// Returns the number of processes that are gone afterwards. Never fails:
    /// per-process failures are published as `OperationFailed`. Works during and
    /// after disposal. Concurrent calls split the entries between them; each
    /// publishes its own `CleanupCompleted`, with zero counts if it claimed nothing.
    pub async fn kill_all(&self, timeout: Option<Duration>) -> usize {
        let started = Instant::now();
        let claimed = self.registry.claim_all();
        let results = futures::future::join_all(
            claimed
                .iter()
                .map(|p| self.terminate_one(p, timeout, "kill_all")),
        )
        .await;

        let mut succeeded = 0;
        let mut failed = 0;
        for (process, res) in claimed.iter().zip(results) {
            process.release();
            match res {
                Ok(_) => succeeded += 1,
                Err(_) => failed += 1,
            }
        }

        let elapsed = started.elapsed();
        if !claimed.is_empty() {
            tracing::info!(succeeded, failed, ?elapsed, "kill-all finished");
        }
        self.bus.publish(
            Event::new(EventKind::CleanupCompleted).with_cleanup(succeeded, failed, elapsed),
        );
        succeeded
    }

    async fn terminate_one(
        &self,
        process: &ManagedProcess,
        timeout: Option<Duration>,
        operation: &'static str,
    ) -> Result<Termination> {
        let timeout = self.cfg.kill_timeout_or_default(timeout);
        let pid = process.pid();

        match self
            .engine
            .terminate(process, timeout, self.cfg.force_kill_on_timeout)
            .await
        {
            Ok(outcome) => {
                if let Termination::Forced { signalled } = outcome {
                    tracing::warn!(pid, ?timeout, signalled, "process needed forced termination");
                    self.bus.publish(
                        Event::new(EventKind::ForcedTerminated)
                            .with_process(process)
                            .with_timeout(timeout)
                            .with_killed(signalled),
                    );
                } else {
                    tracing::debug!(pid, ?outcome, "process terminated");
                }
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(pid, operation, error = %e, "termination failed");
                self.bus
                    .publish(Event::operation_failed(operation, &e).with_program(process.program()));
                Err(e)
            }
        }
    }

    // ---------------------------
    // Queries
    // ---------------------------

    /// Aggregate counters over the current registry.
    pub fn statistics(&self) -> Result<Statistics> {
        self.ensure_live()?;
        Ok(Statistics::from_snapshot(&self.registry.snapshot()))
    }

    /// The managed process with this pid.
    pub fn get(&self, pid: u32) -> Result<Option<ProcessRef>> {
        self.ensure_live()?;
        Ok(self.registry.get(pid))
    }

    /// All managed processes, sorted by pid.
    pub fn processes(&self) -> Result<Vec<ProcessRef>> {
        self.ensure_live()?;
        Ok(self.registry.snapshot())
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn is_managed(&self, pid: u32) -> bool {
        self.registry.contains(pid)
    }

    /// Evicts exited entries now, as one scheduler tick would.
    pub fn sweep_exited(&self) -> Result<usize> {
        self.ensure_live()?;
        Ok(cleanup::sweep(&self.registry, &self.bus))
    }

    /// Receiver for every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    pub fn config(&self) -> &GuardianConfig {
        &self.cfg
    }

    /// Name of the engine new processes attach to ("process-group", "job-object", "tree-walk", ...).
    pub fn active_engine(&self) -> &'static str {
        self.engine.active_name()
    }

    /// True once every new process is manually tracked.
    pub fn is_manual_tracking(&self) -> bool {
        self.engine.is_manual_only()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            Err(GuardError::UseAfterDispose)
        } else {
            Ok(())
        }
    }

    // ---------------------------
    // Shutdown
    // ---------------------------

    /// Disposes the guardian when the host receives SIGINT/SIGTERM/SIGQUIT (Ctrl-C on Windows).
    ///
    /// Publishes `ShutdownRequested` first. The hook holds a weak reference and
    /// is cancelled by [`dispose`](Self::dispose).
    pub fn dispose_on_shutdown_signal(self: &Arc<Self>) -> Result<()> {
        self.ensure_live()?;

        let guardian = Arc::downgrade(self);
        let hooks = self.hooks.clone();
        let bus = self.bus.clone();

        self.runtime.spawn(async move {
            tokio::select! {
                _ = hooks.cancelled() => {}
                res = shutdown::wait_for_shutdown_signal() => {
                    if let Err(e) = res {
                        tracing::warn!(error = %e, "failed to register shutdown signal handlers");
                        return;
                    }
                    tracing::info!("shutdown signal received, disposing guardian");
                    bus.publish(Event::new(EventKind::ShutdownRequested));
                    if let Some(guardian) = guardian.upgrade() {
                        guardian.dispose().await;
                    }
                }
            }
        });
        Ok(())
    }

    /// Terminates everything and releases native resources. Idempotent.
    ///
    /// Only the first caller tears down; later callers return immediately.
    /// Never fails: problems are published as `OperationFailed`.
    pub async fn dispose(&self) {
        if self
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        tracing::debug!(managed = self.registry.len(), "disposing guardian");

        self.hooks.cancel();
        self.gate.close();

        if let Some(scheduler) = take(&self.cleanup) {
            scheduler.stop().await;
        }

        let killed = self.kill_all(None).await;
        self.release_engine();

        self.runtime_token.cancel();
        if let Some(listener) = take(&self.listener) {
            if let Err(e) = listener.await {
                tracing::warn!(error = %e, "event listener ended abnormally");
            }
        }
        tracing::info!(killed, "guardian disposed");
    }

    /// Blocking [`dispose`](Self::dispose) for synchronous shutdown paths.
    ///
    /// Meant for callers outside the runtime. On a multi-thread runtime worker it
    /// blocks in place; on a current-thread runtime it cannot wait, so it
    /// force-kills immediately instead.
    pub fn dispose_blocking(&self) {
        match Handle::try_current() {
            Err(_) => self.runtime.block_on(self.dispose()),
            Ok(current) if current.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| self.runtime.block_on(self.dispose()));
            }
            Ok(_) => {
                if self.disposed.swap(true, Ordering::AcqRel) {
                    return;
                }
                tracing::warn!("dispose_blocking on a current-thread runtime, forcing termination");
                self.teardown_now();
            }
        }
    }

    fn release_engine(&self) {
        if let Err(e) = self.engine.release() {
            tracing::error!(error = %e, "failed to release grouping engine");
            self.bus.publish(Event::operation_failed("dispose", &e));
        }
    }

    /// Synchronous teardown: force-kill without waiting.
    fn teardown_now(&self) {
        self.hooks.cancel();
        self.gate.close();
        if let Some(scheduler) = take(&self.cleanup) {
            scheduler.abort();
        }
        for process in self.registry.claim_all() {
            process.release();
            self.engine.force_now(&process);
        }
        self.release_engine();
        self.runtime_token.cancel();
    }
}

impl Drop for Guardian {
    fn drop(&mut self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        #[cfg(debug_assertions)]
        tracing::warn!(
            managed = self.registry.len(),
            "guardian dropped without dispose(), forcing termination"
        );
        self.teardown_now();
    }
}

impl std::fmt::Debug for Guardian {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guardian")
            .field("managed", &self.registry.len())
            .field("engine", &self.engine.active_name())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Forwards bus events to the subscriber set until `token` fires, then drains
/// what is already queued and shuts the workers down.
fn subscriber_listener(
    runtime: &Handle,
    bus: &Bus,
    subs: SubscriberSet,
    token: CancellationToken,
) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    runtime.spawn(async move {
        loop {
            tokio::select! {
                biased;
                msg = rx.recv() => match msg {
                    Ok(ev) => subs.emit(&ev),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event listener lagged behind the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = token.cancelled() => {
                    while let Ok(ev) = rx.try_recv() {
                        subs.emit(&ev);
                    }
                    break;
                }
            }
        }
        subs.shutdown().await;
    })
}
