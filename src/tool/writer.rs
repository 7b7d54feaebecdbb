//! Tool stdin writer task.
//!
//! Receives query lines from an unbounded channel and writes each one,
//! newline terminated, to the tool's stdin. Writes never block the engine:
//! the engine only enqueues.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Writer task: append `\n` to every received line and write it to `stdin`.
///
/// The task exits cleanly when:
/// - `cancel` is triggered, or
/// - `line_rx` is closed (the owning `ToolProcess` was dropped).
///
/// # Errors
///
/// Returns [`AppError::Io`] if a write or flush fails, which happens once
/// the tool has closed its stdin or exited.
pub async fn run_writer<W>(
    mut stdin: W,
    mut line_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("tool writer: cancellation received, stopping");
                break;
            }

            line = line_rx.recv() => {
                let Some(line) = line else {
                    debug!("tool writer: line channel closed, stopping");
                    break;
                };

                let mut bytes = line.into_bytes();
                bytes.push(b'\n');

                stdin.write_all(&bytes).await.map_err(|e| {
                    warn!(error = %e, "tool writer: write to stdin failed");
                    AppError::Io(format!("write failed: {e}"))
                })?;
                stdin
                    .flush()
                    .await
                    .map_err(|e| AppError::Io(format!("flush failed: {e}")))?;
            }
        }
    }

    Ok(())
}
