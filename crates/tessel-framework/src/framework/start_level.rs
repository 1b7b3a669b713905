//! Framework start level and per-bundle start levels.
//!
//! Level changes are applied by one dedicated worker thread, so overlapping
//! requests serialize in submission order. The worker drives the ordinary
//! `start`/`stop` operations and therefore takes the same per-bundle locks
//! as direct callers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle, ThreadId};

use tessel_core::{BundleId, BundleState, LifecycleOptions};
use tessel_events::FrameworkEventKind;
use tessel_telemetry::OperationContext;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{Framework, FrameworkInner};
use crate::error::{FrameworkError, FrameworkResult};

const WORKER_NAME: &str = "tessel-start-level";

enum Command {
    SetLevel {
        target: u32,
        done: oneshot::Sender<()>,
    },
    BundleLevel {
        bundle: BundleId,
        level: u32,
        done: oneshot::Sender<()>,
    },
    Shutdown,
}

struct Worker {
    tx: mpsc::UnboundedSender<Command>,
    handle: JoinHandle<()>,
    thread: ThreadId,
}

/// A start-level change handed to the worker.
#[derive(Debug)]
#[must_use = "a pending change can be waited on"]
pub struct PendingChange {
    rx: oneshot::Receiver<()>,
}

impl PendingChange {
    /// Block until the worker has applied the change.
    ///
    /// Inside an async runtime use [`done`](Self::done) instead.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::IllegalState`] when called on a thread
    /// driving a tokio runtime, and [`FrameworkError::WorkerUnavailable`]
    /// if the worker exited without applying the change.
    pub fn wait(self) -> FrameworkResult<()> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(FrameworkError::IllegalState(
                "cannot block on a start-level change inside an async runtime; await done()".into(),
            ));
        }
        self.rx
            .blocking_recv()
            .map_err(|_| FrameworkError::WorkerUnavailable("change was dropped".into()))
    }

    /// Wait asynchronously until the worker has applied the change.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::WorkerUnavailable`] if the worker exited
    /// without applying it.
    pub async fn done(self) -> FrameworkResult<()> {
        self.rx
            .await
            .map_err(|_| FrameworkError::WorkerUnavailable("change was dropped".into()))
    }
}

/// Tracks the framework start level and owns the worker that changes it.
pub struct StartLevelController {
    level: Mutex<u32>,
    worker: Mutex<Option<Worker>>,
}

impl std::fmt::Debug for StartLevelController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartLevelController")
            .field("level", &self.level())
            .finish_non_exhaustive()
    }
}

impl StartLevelController {
    pub(crate) fn new() -> Self {
        Self {
            level: Mutex::new(0),
            worker: Mutex::new(None),
        }
    }

    /// The current framework start level.
    #[must_use]
    pub fn level(&self) -> u32 {
        *self.level.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_level(&self, level: u32) {
        *self.level.lock().unwrap_or_else(PoisonError::into_inner) = level;
    }

    fn worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the calling thread is the start-level worker.
    #[must_use]
    pub fn is_worker_thread(&self) -> bool {
        let current = thread::current().id();
        self.worker().as_ref().is_some_and(|w| w.thread == current)
    }

    fn dispatch(&self, framework: Weak<FrameworkInner>, command: Command) -> FrameworkResult<()> {
        let mut worker = self.worker();
        if worker.is_none() {
            let (tx, rx) = mpsc::unbounded_channel();
            let handle = thread::Builder::new()
                .name(WORKER_NAME.into())
                .spawn(move || run_worker(&framework, rx))
                .map_err(|e| FrameworkError::WorkerUnavailable(e.to_string()))?;
            debug!("Start-level worker spawned");
            *worker = Some(Worker {
                tx,
                thread: handle.thread().id(),
                handle,
            });
        }
        worker
            .as_ref()
            .ok_or_else(|| FrameworkError::WorkerUnavailable("not running".into()))?
            .tx
            .send(command)
            .map_err(|_| FrameworkError::WorkerUnavailable("worker has exited".into()))
    }

    fn stop_worker(&self) -> Option<JoinHandle<()>> {
        let worker = self.worker().take()?;
        // The worker may already be gone; the join below still succeeds.
        let _ = worker.tx.send(Command::Shutdown);
        Some(worker.handle)
    }
}

fn run_worker(framework: &Weak<FrameworkInner>, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = rx.blocking_recv() {
        let Some(inner) = framework.upgrade() else {
            break;
        };
        let framework = Framework::from_inner(inner);
        match command {
            Command::SetLevel { target, done } => {
                framework.apply_start_level(target);
                let _ = done.send(());
            },
            Command::BundleLevel {
                bundle,
                level,
                done,
            } => {
                framework.apply_bundle_start_level(bundle, level);
                let _ = done.send(());
            },
            Command::Shutdown => break,
        }
    }
    debug!("Start-level worker exiting");
}

impl Framework {
    /// The current framework start level.
    #[must_use]
    pub fn start_level(&self) -> u32 {
        self.inner.start_level.level()
    }

    /// The start-level controller.
    #[must_use]
    pub fn start_level_controller(&self) -> &StartLevelController {
        &self.inner.start_level
    }

    /// A bundle's persisted start level, or the initial bundle start level.
    #[must_use]
    pub fn bundle_start_level(&self, id: BundleId) -> u32 {
        self.inner
            .storage
            .start_level(id)
            .unwrap_or(self.inner.settings.initial_bundle_start_level)
    }

    /// Move the framework to start level `target`.
    ///
    /// The change runs on the start-level worker; the returned
    /// [`PendingChange`] completes when it has been applied.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::InvalidStartLevel`] for level 0.
    pub fn set_start_level(&self, target: u32) -> FrameworkResult<PendingChange> {
        if target == 0 {
            return Err(FrameworkError::InvalidStartLevel(target));
        }
        self.dispatch_level(target)
    }

    /// [`set_start_level`](Self::set_start_level) and wait for it.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::IllegalState`] when called from the
    /// start-level worker itself (for example from an activator), since the
    /// worker would wait on itself, or from inside an async runtime.
    pub fn set_start_level_blocking(&self, target: u32) -> FrameworkResult<()> {
        self.ensure_may_block("set_start_level_blocking")?;
        self.set_start_level(target)?.wait()
    }

    fn dispatch_level(&self, target: u32) -> FrameworkResult<PendingChange> {
        let (done, rx) = oneshot::channel();
        self.inner.start_level.dispatch(
            Arc::downgrade(&self.inner),
            Command::SetLevel { target, done },
        )?;
        Ok(PendingChange { rx })
    }

    fn ensure_not_worker(&self, method: &str) -> FrameworkResult<()> {
        if self.inner.start_level.is_worker_thread() {
            return Err(FrameworkError::IllegalState(format!(
                "{method} cannot wait on the start-level worker from the worker"
            )));
        }
        Ok(())
    }

    /// Checks for the blocking forms, made before anything is changed.
    fn ensure_may_block(&self, method: &str) -> FrameworkResult<()> {
        self.ensure_not_worker(method)?;
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(FrameworkError::IllegalState(format!(
                "{method} blocks and cannot run inside an async runtime; use its async form"
            )));
        }
        Ok(())
    }

    /// Persist a bundle's start level and start or stop it to match.
    ///
    /// The start or stop runs on the start-level worker.
    ///
    /// # Errors
    ///
    /// Fails for the system bundle, level 0, and unknown or uninstalled
    /// bundles, before anything is persisted.
    pub fn set_bundle_start_level(&self, id: BundleId, level: u32) -> FrameworkResult<PendingChange> {
        Self::reject_system("set_bundle_start_level", id)?;
        if level == 0 {
            return Err(FrameworkError::InvalidStartLevel(level));
        }
        self.lookup_live(id)?;
        self.inner.storage.set_start_level(id, level);

        let (done, rx) = oneshot::channel();
        self.inner.start_level.dispatch(
            Arc::downgrade(&self.inner),
            Command::BundleLevel {
                bundle: id,
                level,
                done,
            },
        )?;
        Ok(PendingChange { rx })
    }

    /// [`set_bundle_start_level`](Self::set_bundle_start_level) and wait for
    /// it.
    ///
    /// # Errors
    ///
    /// As for [`set_bundle_start_level`](Self::set_bundle_start_level), plus
    /// [`FrameworkError::IllegalState`] when called from the worker.
    pub fn set_bundle_start_level_blocking(&self, id: BundleId, level: u32) -> FrameworkResult<()> {
        self.ensure_may_block("set_bundle_start_level_blocking")?;
        self.set_bundle_start_level(id, level)?.wait()
    }

    fn restart_options(&self, id: BundleId) -> LifecycleOptions {
        if self.inner.storage.activation_policy_used(id) {
            LifecycleOptions::TRANSIENT | LifecycleOptions::ACTIVATION_POLICY
        } else {
            LifecycleOptions::TRANSIENT
        }
    }

    /// Startable bundles and their start levels, by id.
    fn leveled_bundles(&self) -> Vec<(BundleId, u32, BundleState)> {
        let bundles: Vec<(BundleId, BundleState)> = self
            .inner
            .registry
            .read()
            .bundles
            .values()
            .filter(|r| {
                !r.id.is_system() && !r.kind.is_fragment() && r.state != BundleState::Uninstalled
            })
            .map(|r| (r.id, r.state))
            .collect();
        bundles
            .into_iter()
            .map(|(id, state)| (id, self.bundle_start_level(id), state))
            .collect()
    }

    fn apply_start_level(&self, target: u32) {
        let controller = &self.inner.start_level;
        let from = controller.level();
        let _op = OperationContext::new("start_level")
            .with_operation("set_start_level")
            .with_field("from", from)
            .with_field("target", target)
            .enter();

        while controller.level() < target {
            let level = controller.level().saturating_add(1);
            controller.set_level(level);
            debug!(level, "Raised start level");
            for (id, _, state) in self
                .leveled_bundles()
                .into_iter()
                .filter(|(_, l, _)| *l == level)
            {
                if state.is_active_or_starting() || !self.inner.storage.is_persistently_started(id) {
                    continue;
                }
                if let Err(err) = self.start(id, self.restart_options(id)) {
                    self.report(Some(id), &err);
                }
            }
        }

        while controller.level() > target {
            let level = controller.level();
            let mut stopping: Vec<_> = self
                .leveled_bundles()
                .into_iter()
                .filter(|(_, l, state)| *l >= level && state.is_active_or_starting())
                .collect();
            stopping.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)));
            for (id, _, _) in stopping {
                if let Err(err) = self.stop(id, LifecycleOptions::TRANSIENT) {
                    self.report(Some(id), &err);
                }
            }
            controller.set_level(level.saturating_sub(1));
            debug!(level = level.saturating_sub(1), "Lowered start level");
        }

        self.fire_framework(FrameworkEventKind::StartLevelChanged);
        info!(from, to = target, "Start level changed");
    }

    fn apply_bundle_start_level(&self, id: BundleId, level: u32) {
        let Some(state) = self.state(id) else {
            return;
        };
        if state == BundleState::Uninstalled {
            return;
        }
        let current = self.start_level();
        let result = if level <= current {
            if self.inner.storage.is_persistently_started(id) && !state.is_active_or_starting() {
                self.start(id, self.restart_options(id))
            } else {
                Ok(())
            }
        } else if state.is_active_or_starting() {
            self.stop(id, LifecycleOptions::TRANSIENT)
        } else {
            Ok(())
        };
        if let Err(err) = result {
            self.report(Some(id), &err);
        }
    }

    /// Launch the framework: mark the system bundle active, then raise the
    /// start level to the beginning start level and wait for it.
    ///
    /// Blocks the calling thread; async callers use
    /// [`launch_async`](Self::launch_async).
    ///
    /// # Errors
    ///
    /// Returns an error if the start-level change cannot be dispatched, and
    /// [`FrameworkError::IllegalState`] when called from the worker or from
    /// inside an async runtime.
    pub fn launch(&self) -> FrameworkResult<()> {
        self.ensure_may_block("launch")?;
        self.begin_launch()?.wait()
    }

    /// [`launch`](Self::launch) for async callers.
    ///
    /// # Errors
    ///
    /// As for [`launch`](Self::launch), without the runtime restriction.
    pub async fn launch_async(&self) -> FrameworkResult<()> {
        self.ensure_not_worker("launch_async")?;
        self.begin_launch()?.done().await
    }

    fn begin_launch(&self) -> FrameworkResult<PendingChange> {
        self.transition(BundleId::SYSTEM, BundleState::Active);
        self.fire_framework(FrameworkEventKind::Started);
        info!("Framework launched");
        self.set_start_level(self.inner.settings.beginning_start_level)
    }

    /// Shut the framework down: lower the start level to 0, stop the
    /// worker and mark the system bundle resolved.
    ///
    /// Blocks the calling thread; async callers use
    /// [`shutdown_async`](Self::shutdown_async).
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::IllegalState`] when called from the worker
    /// or from inside an async runtime, and
    /// [`FrameworkError::WorkerUnavailable`] if the worker failed.
    pub fn shutdown(&self) -> FrameworkResult<()> {
        self.ensure_may_block("shutdown")?;
        self.dispatch_level(0)?.wait()?;
        self.finish_shutdown()
    }

    /// [`shutdown`](Self::shutdown) for async callers.
    ///
    /// # Errors
    ///
    /// As for [`shutdown`](Self::shutdown), without the runtime restriction.
    pub async fn shutdown_async(&self) -> FrameworkResult<()> {
        self.ensure_not_worker("shutdown_async")?;
        self.dispatch_level(0)?.done().await?;
        self.finish_shutdown()
    }

    /// The worker has already drained to level 0, so the join is short.
    fn finish_shutdown(&self) -> FrameworkResult<()> {
        if let Some(handle) = self.inner.start_level.stop_worker()
            && handle.join().is_err()
        {
            warn!("Start-level worker panicked");
            return Err(FrameworkError::WorkerUnavailable("worker panicked".into()));
        }
        self.transition(BundleId::SYSTEM, BundleState::Resolved);
        self.fire_framework(FrameworkEventKind::Stopped);
        info!("Framework stopped");
        Ok(())
    }
}
