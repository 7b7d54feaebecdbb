//! Engine event sink.
//!
//! The engine reports dispatches, completions, protocol violations and
//! lifecycle changes through [`EngineObserver`] instead of logging
//! directly, so hosts and tests can capture them.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::query::{QueryId, QueryResult};
use super::StopReason;

/// Receives engine events. Every method defaults to a no-op.
///
/// Methods are called from the engine actor task, one at a time and in
/// event order; implementations must not block.
pub trait EngineObserver: Send + Sync {
    /// The tool emitted its first prompt `after` start-up.
    fn on_ready(&self, _after: Duration) {}

    /// A query was written to the tool after waiting `queued` in the queue.
    fn on_dispatch(&self, _id: QueryId, _query: &str, _queued: Duration) {}

    /// A dispatched query finished `elapsed` after dispatch.
    fn on_complete(&self, _id: QueryId, _elapsed: Duration, _outcome: &QueryResult) {}

    /// The tool wrote `line` while no query was in flight.
    fn on_protocol_error(&self, _line: &str) {}

    /// The tool is gone; no further queries will be dispatched.
    fn on_terminated(&self, _reason: &StopReason) {}
}

/// Observer that writes every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl EngineObserver for TracingObserver {
    fn on_ready(&self, after: Duration) {
        info!(elapsed_ms = millis(after), "tool ready");
    }

    fn on_dispatch(&self, id: QueryId, query: &str, queued: Duration) {
        info!(query_id = %id, queued_ms = millis(queued), query = ?query, "query dispatched");
    }

    fn on_complete(&self, id: QueryId, elapsed: Duration, outcome: &QueryResult) {
        match outcome {
            Ok(result) => {
                info!(query_id = %id, elapsed_ms = millis(elapsed), "query completed");
                debug!(query_id = %id, result = ?result, "query result");
            }
            Err(err) => {
                warn!(query_id = %id, elapsed_ms = millis(elapsed), %err, "query failed");
            }
        }
    }

    fn on_protocol_error(&self, line: &str) {
        warn!(line = ?line, "tool produced output while no query was in flight");
    }

    fn on_terminated(&self, reason: &StopReason) {
        info!(%reason, "tool stopped");
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
