//! Engine actor: the single task that owns the query queue.
//!
//! Submissions, cancellations, stop requests and tool events all arrive
//! over channels and are handled one at a time, so the queue, the
//! in-flight slot and the aggregator need no locks. At most one query is
//! written to the tool at a time and completions leave in queue order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use super::aggregator::{Aggregator, LineOutcome};
use super::observer::EngineObserver;
use super::query::{QueryId, QueryItem, QueryResult};
use super::{EngineStatus, StopReason};
use crate::errors::QueryError;
use crate::tool::{ToolEvent, ToolProcess};

/// Requests from [`Engine`](super::Engine) handles.
#[derive(Debug)]
pub(crate) enum Command {
    Submit(QueryItem),
    Cancel {
        id: QueryId,
        reason: Option<String>,
    },
    Stop,
}

pub(crate) struct EngineActor {
    pub(crate) aggregator: Aggregator,
    pub(crate) process: ToolProcess,
    pub(crate) queue: VecDeque<QueryItem>,
    pub(crate) current: Option<QueryItem>,
    pub(crate) status_tx: watch::Sender<EngineStatus>,
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) observer: Arc<dyn EngineObserver>,
    pub(crate) drain_queue_on_stop: bool,
}

impl EngineActor {
    /// Process commands and tool events until every engine handle is gone.
    ///
    /// The actor outlives the tool: after it stops, submissions keep being
    /// answered with [`QueryError::Stopped`]. Items still queued when the
    /// actor exits are dropped, which resolves their submissions as stopped.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<ToolEvent>,
    ) {
        let mut events_open = true;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event),
                    None => events_open = false,
                },
            }
        }

        debug!("engine actor: all handles dropped, shutting down");
        self.shutdown(StopReason::StopRequested);
        self.process.join().await;
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit(item) => {
                if matches!(*self.status_tx.borrow(), EngineStatus::Stopped(_)) {
                    self.complete(item, Err(QueryError::Stopped));
                } else if !self.aggregator.is_ready() {
                    self.complete(item, Err(QueryError::NotReady));
                } else {
                    trace!(query_id = %item.id, "query queued");
                    self.queue.push_back(item);
                    self.dispatch_next();
                }
            }
            Command::Cancel { id, reason } => {
                let is_current = self.current.as_ref().is_some_and(|item| item.id == id);
                if !is_current {
                    debug!(query_id = %id, "cancel ignored: query is not in flight");
                    return;
                }
                if let Some(item) = self.current.take() {
                    if let Some(partial) = self.aggregator.abort() {
                        trace!(query_id = %id, partial = ?partial, "discarding partial output");
                    }
                    self.complete(item, Err(QueryError::Canceled(reason)));
                }
                self.dispatch_next();
            }
            Command::Stop => self.shutdown(StopReason::StopRequested),
        }
    }

    fn handle_event(&mut self, event: ToolEvent) {
        match event {
            ToolEvent::Line(line) => match self.aggregator.on_line(&line) {
                LineOutcome::Ignored => trace!(line = ?line, "tool output ignored"),
                LineOutcome::Pending => {}
                LineOutcome::Ready => {
                    self.status_tx.send_replace(EngineStatus::Ready);
                    self.observer.on_ready(self.process.uptime());
                }
                LineOutcome::Complete(result) => {
                    if let Some(item) = self.current.take() {
                        self.complete(item, Ok(result));
                    }
                    self.dispatch_next();
                }
                LineOutcome::Unsolicited(line) => self.observer.on_protocol_error(&line),
            },
            ToolEvent::OutputClosed => self.shutdown(StopReason::OutputClosed),
            ToolEvent::Exited(code) => self.shutdown(StopReason::Exited(code)),
        }
    }

    /// Write the queue head to the tool if nothing is in flight.
    fn dispatch_next(&mut self) {
        if self.current.is_some() || !self.process.is_alive() {
            return;
        }
        let Some(mut item) = self.queue.pop_front() else {
            return;
        };
        if !self.aggregator.begin() {
            self.queue.push_front(item);
            return;
        }

        let now = Instant::now();
        item.dispatched_at = Some(now);
        self.process.write(&item.text);
        self.observer
            .on_dispatch(item.id, &item.text, now.duration_since(item.queued_at));
        self.current = Some(item);
    }

    /// Report `outcome` to the observer and deliver it to the submitter.
    /// Every item the actor resolves goes through here.
    fn complete(&self, item: QueryItem, outcome: QueryResult) {
        let elapsed = item
            .dispatched_at
            .map_or_else(|| item.queued_at.elapsed(), |at| at.elapsed());
        self.observer.on_complete(item.id, elapsed, &outcome);
        item.finish(outcome);
    }

    /// Move to the terminal state. Runs at most once; later calls are no-ops.
    fn shutdown(&mut self, reason: StopReason) {
        if matches!(*self.status_tx.borrow(), EngineStatus::Stopped(_)) {
            return;
        }

        self.aggregator.stop();
        self.process.terminate();
        self.running.store(false, Ordering::SeqCst);
        self.status_tx.send_replace(EngineStatus::Stopped(reason.clone()));

        if let Some(item) = self.current.take() {
            self.complete(item, Err(QueryError::ToolStopped(reason.to_string())));
        }
        if self.drain_queue_on_stop {
            while let Some(item) = self.queue.pop_front() {
                self.complete(item, Err(QueryError::ToolStopped(reason.to_string())));
            }
        } else if !self.queue.is_empty() {
            debug!(
                queued = self.queue.len(),
                "tool stopped with queries still queued; they stay pending"
            );
        }

        self.observer.on_terminated(&reason);
    }
}
