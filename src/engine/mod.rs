//! Query serialization engine.
//!
//! Turns one interactive line-oriented tool into a request/response
//! service. Queries from any number of callers are validated, queued in
//! FIFO order and written to the tool one at a time; each caller gets
//! exactly one result, in submission order.
//!
//! [`Engine`] is a cheap, cloneable handle. The state lives in a single
//! actor task (see `actor`) that owns the tool process.

mod actor;
pub mod aggregator;
pub mod observer;
pub mod query;

use std::collections::VecDeque;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, trace};

use crate::errors::QueryError;
use crate::tool::{SpawnConfig, ToolProcess};
use crate::{AppError, Result};

use actor::{Command, EngineActor};
pub use aggregator::{Aggregator, AggregatorState, LineOutcome};
pub use observer::{EngineObserver, TracingObserver};
pub use query::{validate_query, QueryId, QueryResult};

/// Why the tool stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The tool exited on its own; `None` when it died from a signal.
    Exited(Option<i32>),
    /// The tool closed its stdout.
    OutputClosed,
    /// [`Engine::stop`] was called (or every handle was dropped).
    StopRequested,
}

impl Display for StopReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(Some(code)) => write!(f, "Exited with code {code}."),
            Self::Exited(None) => f.write_str("Killed by a signal."),
            Self::OutputClosed => f.write_str("Output stream ended."),
            Self::StopRequested => f.write_str("Stop requested."),
        }
    }
}

/// Externally visible engine lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    /// Waiting for the tool's first prompt.
    Starting,
    /// Accepting queries.
    Ready,
    /// The tool is gone. Terminal.
    Stopped(StopReason),
}

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How to launch the tool.
    pub spawn: SpawnConfig,
    /// Literal line the tool prints when ready for input. Enables
    /// multi-line responses: everything up to the next prompt is one result.
    pub prompt: Option<String>,
    /// Fail queued, not yet dispatched queries as soon as the tool stops
    /// instead of leaving them pending.
    pub drain_queue_on_stop: bool,
}

impl EngineConfig {
    /// Settings for `cmdline` in single-line-response mode.
    #[must_use]
    pub fn new(cmdline: impl Into<String>) -> Self {
        Self {
            spawn: SpawnConfig::new(cmdline),
            prompt: None,
            drain_queue_on_stop: false,
        }
    }

    /// Enable multi-line mode with `prompt` as the readiness marker.
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}

/// Handle to a running engine.
#[derive(Debug, Clone)]
pub struct Engine {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<EngineStatus>,
    running: Arc<AtomicBool>,
    pid: Option<u32>,
}

impl Engine {
    /// Launch the tool and the engine actor. Must run inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the tool cannot be started.
    pub fn spawn(config: EngineConfig, observer: Arc<dyn EngineObserver>) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let process = ToolProcess::spawn(&config.spawn, event_tx)?;
        let pid = process.pid();

        let aggregator = Aggregator::new(config.prompt);
        let initial = if aggregator.is_ready() {
            EngineStatus::Ready
        } else {
            info!("waiting for the tool to print its prompt");
            EngineStatus::Starting
        };
        let (status_tx, status) = watch::channel(initial);
        let running = Arc::new(AtomicBool::new(true));
        let (commands, command_rx) = mpsc::unbounded_channel();

        let actor = EngineActor {
            aggregator,
            process,
            queue: VecDeque::new(),
            current: None,
            status_tx,
            running: Arc::clone(&running),
            observer,
            drain_queue_on_stop: config.drain_queue_on_stop,
        };
        tokio::spawn(actor.run(command_rx, event_rx));

        Ok(Self {
            commands,
            status,
            running,
            pid,
        })
    }

    /// Validate `text` and queue it for the tool.
    ///
    /// Validation and readiness failures resolve the returned submission
    /// immediately and never reach the tool; its cancel handle is a no-op.
    #[must_use]
    pub fn submit(&self, text: &str) -> Submission {
        if let EngineStatus::Stopped(_) = *self.status.borrow() {
            return Submission::failed(QueryError::Stopped);
        }

        let query = match validate_query(text) {
            Ok(query) => query,
            Err(err) => return Submission::failed(err),
        };

        if !self.is_ready() {
            return Submission::failed(QueryError::NotReady);
        }

        let (item, rx) = query::QueryItem::new(query);
        let id = item.id;
        if self.commands.send(Command::Submit(item)).is_err() {
            return Submission::failed(QueryError::Stopped);
        }

        Submission {
            id: Some(id),
            outcome: Outcome::Pending(rx),
            cancel: CancelHandle {
                target: Some((id, self.commands.downgrade())),
            },
        }
    }

    /// Stop the tool. Idempotent.
    ///
    /// Returns `true` only for the call that initiated shutdown; `false`
    /// if the engine was already stopping or the tool had already exited.
    pub fn stop(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            info!("stop requested but the tool is already stopping or stopped");
            return false;
        }
        info!("stopping the tool");
        if self.commands.send(Command::Stop).is_err() {
            trace!("engine actor already gone; nothing to stop");
        }
        true
    }

    /// Whether queries are currently accepted.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.status.borrow() == EngineStatus::Ready
    }

    /// Snapshot of the lifecycle state.
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    /// OS process id of the tool's shell.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait until the tool is ready.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Stopped` if the tool stopped before becoming ready.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut status = self.status.clone();
        let reached = status
            .wait_for(|s| *s != EngineStatus::Starting)
            .await
            .map(|s| (*s).clone());
        match reached {
            Ok(EngineStatus::Ready) => Ok(()),
            Ok(EngineStatus::Stopped(reason)) => Err(AppError::Stopped(reason.to_string())),
            Ok(EngineStatus::Starting) | Err(_) => {
                Err(AppError::Stopped("engine actor is gone".into()))
            }
        }
    }

    /// Wait until the tool has stopped and report why.
    pub async fn wait_stopped(&self) -> StopReason {
        let mut status = self.status.clone();
        let reached = status
            .wait_for(|s| matches!(s, EngineStatus::Stopped(_)))
            .await
            .map(|s| (*s).clone());
        match reached {
            Ok(EngineStatus::Stopped(reason)) => reason,
            _ => StopReason::StopRequested,
        }
    }
}

#[derive(Debug)]
enum Outcome {
    Resolved(QueryResult),
    Pending(oneshot::Receiver<QueryResult>),
}

/// A submitted query's pending result.
#[derive(Debug)]
pub struct Submission {
    id: Option<QueryId>,
    outcome: Outcome,
    cancel: CancelHandle,
}

impl Submission {
    fn failed(err: QueryError) -> Self {
        Self {
            id: None,
            outcome: Outcome::Resolved(Err(err)),
            cancel: CancelHandle { target: None },
        }
    }

    /// Id of the queued item; `None` if the submission was rejected.
    #[must_use]
    pub fn id(&self) -> Option<QueryId> {
        self.id
    }

    /// Handle that cancels this query while it is in flight.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Wait for the result.
    ///
    /// # Errors
    ///
    /// Returns the [`QueryError`] the query failed with. A query dropped
    /// by a shut-down engine reports [`QueryError::Stopped`].
    pub async fn wait(self) -> QueryResult {
        match self.outcome {
            Outcome::Resolved(outcome) => outcome,
            Outcome::Pending(rx) => rx.await.unwrap_or(Err(QueryError::Stopped)),
        }
    }
}

/// Cancels one query, if it is the one currently in flight.
///
/// Holds only a weak reference to the engine: outstanding handles do not
/// keep the engine actor alive.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    target: Option<(QueryId, mpsc::WeakUnboundedSender<Command>)>,
}

impl CancelHandle {
    /// Whether this handle can never cancel anything.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.target.is_none()
    }

    /// Request cancellation. Non-blocking; a no-op unless the query is the
    /// one currently dispatched. The tool itself is not interrupted.
    pub fn cancel(&self, reason: Option<String>) {
        if let Some((id, commands)) = &self.target {
            match commands.upgrade() {
                Some(commands) if commands.send(Command::Cancel { id: *id, reason }).is_ok() => {}
                _ => trace!(query_id = %id, "cancel dropped: engine actor is gone"),
            }
        }
    }

    /// Guard that cancels with `reason` when dropped, unless disarmed.
    #[must_use]
    pub fn on_drop(self, reason: impl Into<String>) -> CancelGuard {
        CancelGuard {
            handle: Some(self),
            reason: reason.into(),
        }
    }
}

/// Cancels its query on drop. See [`CancelHandle::on_drop`].
#[derive(Debug)]
pub struct CancelGuard {
    handle: Option<CancelHandle>,
    reason: String,
}

impl CancelGuard {
    /// Keep the query running when the guard drops.
    pub fn disarm(mut self) {
        self.handle = None;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.cancel(Some(std::mem::take(&mut self.reason)));
        }
    }
}
