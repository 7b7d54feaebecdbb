//! Query items and submission validation.

use std::fmt::{Display, Formatter};
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::trace;
use uuid::Uuid;

use crate::errors::QueryError;

/// Outcome delivered to a submitter.
pub type QueryResult = std::result::Result<String, QueryError>;

/// Random identifier correlating a query's log lines.
///
/// Never written to the tool; it is not part of the pipe protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryId(Uuid);

impl QueryId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for QueryId {
    /// Short form: the first eight hex digits.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut buf = Uuid::encode_buffer();
        let full = self.0.simple().encode_lower(&mut buf);
        f.write_str(&full[..8])
    }
}

/// Reduce raw submission text to the single query line.
///
/// Lines are trimmed and blank lines dropped; exactly one must remain.
///
/// # Errors
///
/// - [`QueryError::Empty`] when no non-blank line remains.
/// - [`QueryError::MultiLine`] when more than one remains.
pub fn validate_query(text: &str) -> std::result::Result<String, QueryError> {
    let mut lines = text.split('\n').map(str::trim).filter(|l| !l.is_empty());

    let first = lines.next().ok_or(QueryError::Empty)?;
    if lines.next().is_some() {
        return Err(QueryError::MultiLine);
    }
    Ok(first.to_owned())
}

/// One accepted query, owned by the engine actor until it completes.
#[derive(Debug)]
pub(crate) struct QueryItem {
    pub(crate) id: QueryId,
    pub(crate) text: String,
    pub(crate) queued_at: Instant,
    pub(crate) dispatched_at: Option<Instant>,
    reply: oneshot::Sender<QueryResult>,
}

impl QueryItem {
    pub(crate) fn new(text: String) -> (Self, oneshot::Receiver<QueryResult>) {
        let (reply, rx) = oneshot::channel();
        let item = Self {
            id: QueryId::new(),
            text,
            queued_at: Instant::now(),
            dispatched_at: None,
            reply,
        };
        (item, rx)
    }

    /// Deliver the outcome; a submitter that stopped listening is ignored.
    pub(crate) fn finish(self, outcome: QueryResult) {
        if self.reply.send(outcome).is_err() {
            trace!(query_id = %self.id, "submitter stopped listening; result dropped");
        }
    }
}
