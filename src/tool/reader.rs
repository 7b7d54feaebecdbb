//! Tool stdout reader task.
//!
//! Reads the tool's stdout through [`line_stream`] and forwards each line
//! as [`ToolEvent::Line`]. The task returning is the end-of-stream signal:
//! the exit monitor awaits it so that the termination report always
//! follows the last line.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::ToolEvent;
use crate::lines::line_stream;

/// Forward tool output lines into `event_tx` until EOF, an unrecoverable
/// framing error, or cancellation.
pub async fn run_reader<R>(
    stdout: R,
    max_line_bytes: usize,
    event_tx: mpsc::UnboundedSender<ToolEvent>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut lines = line_stream(stdout, max_line_bytes);

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("tool reader: cancellation received, stopping");
                return;
            }

            next = lines.next() => {
                match next {
                    Some(Ok(line)) => {
                        trace!(line = %line, "tool output line");
                        if event_tx.send(ToolEvent::Line(line)).is_err() {
                            debug!("tool reader: engine gone, stopping");
                            return;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(%err, "tool reader: output stream unreadable");
                        return;
                    }
                    None => {
                        debug!("tool reader: end of stream");
                        return;
                    }
                }
            }
        }
    }
}
