//! External tool process supervision.
//!
//! The tool is one long-lived child process launched through a shell. Three
//! background tasks surround it:
//! - `reader`: frames stdout into lines and forwards them as [`ToolEvent`]s.
//! - `writer`: drains queued query lines into the tool's stdin.
//! - `spawner::monitor_exit`: reports termination once, after stdout is
//!   drained.
//!
//! Lines and the termination report share one [`ToolEvent`] channel
//! consumed by the engine.

pub mod reader;
pub mod spawner;
pub mod writer;

pub use spawner::{default_shell, SpawnConfig, ToolProcess};

/// Something the tool did that the engine must react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolEvent {
    /// A trimmed, non-blank line arrived on the tool's stdout.
    Line(String),
    /// The tool closed its stdout (or it became unreadable) while the
    /// process kept running.
    OutputClosed,
    /// The tool process exited and its stdout was drained; `None` when it
    /// was killed by a signal.
    Exited(Option<i32>),
}
