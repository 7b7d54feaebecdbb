//! Raw line front end.
//!
//! Every non-blank input line is submitted as a query. Results are written
//! to the output in submission order, each as the tool produced it (one
//! `\n` terminated line per tool output line). Reading never waits on the
//! tool: a second task awaits results while input keeps flowing.

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::{Engine, Submission};
use crate::errors::QueryError;
use crate::lines::line_stream;
use crate::{AppError, Result};

/// Feed `input` lines to `engine` and write results to `output`.
///
/// Returns once `input` ends and every submitted query has been answered,
/// or as soon as `cancel` fires.
///
/// # Errors
///
/// Returns `AppError::Io` if writing to `output` fails.
pub async fn run<R, W>(
    engine: Engine,
    input: R,
    mut output: W,
    max_line_bytes: usize,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let (pending_tx, mut pending_rx) = mpsc::unbounded_channel::<Submission>();

    let reader = {
        let cancel = cancel.clone();
        async move {
            let mut lines = line_stream(input, max_line_bytes);
            loop {
                tokio::select! {
                    biased;

                    () = cancel.cancelled() => break,

                    next = lines.next() => match next {
                        Some(Ok(line)) => {
                            if pending_tx.send(engine.submit(&line)).is_err() {
                                break;
                            }
                        }
                        Some(Err(err)) => {
                            warn!(%err, "stdin front end: input unreadable");
                            break;
                        }
                        None => {
                            debug!("stdin front end: end of input");
                            break;
                        }
                    },
                }
            }
        }
    };

    let writer = async move {
        loop {
            let submission = tokio::select! {
                biased;

                () = cancel.cancelled() => break,
                next = pending_rx.recv() => match next {
                    Some(submission) => submission,
                    None => break,
                },
            };

            let outcome = tokio::select! {
                biased;

                () = cancel.cancelled() => break,
                outcome = submission.wait() => outcome,
            };

            match outcome {
                Ok(result) => {
                    let text = if result.is_empty() { "\n" } else { result.as_str() };
                    output
                        .write_all(text.as_bytes())
                        .await
                        .map_err(|e| AppError::Io(format!("stdout write failed: {e}")))?;
                    output
                        .flush()
                        .await
                        .map_err(|e| AppError::Io(format!("stdout flush failed: {e}")))?;
                }
                Err(QueryError::NotReady) => debug!("query dropped: tool not ready yet"),
                Err(err) => warn!(%err, "query failed"),
            }
        }
        Ok::<(), AppError>(())
    };

    let ((), written) = tokio::join!(reader, writer);
    written
}
