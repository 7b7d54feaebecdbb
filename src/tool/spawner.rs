//! Tool process spawner and lifecycle handle.
//!
//! The configured command line runs through a shell, so it may contain
//! pipes, loops or an interpreter that forks further children. On unix the
//! shell is made the leader of a fresh process group and termination
//! signals the whole group, not just the immediate child.

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{reader, writer, ToolEvent};
use crate::lines::DEFAULT_MAX_LINE_BYTES;
use crate::{AppError, Result};

/// How long a terminated tool gets to exit before it is killed outright.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// How long stdout may stay open after the tool exited (held by a
/// descendant) before the exit is reported anyway.
const OUTPUT_DRAIN: Duration = Duration::from_secs(2);

/// How long the tool gets to exit after closing stdout before the stream
/// end alone is reported.
const EXIT_SETTLE: Duration = Duration::from_millis(500);

/// Shell used when none is configured.
#[must_use]
pub fn default_shell() -> String {
    if cfg!(windows) {
        "cmd".into()
    } else {
        "/bin/sh".into()
    }
}

fn shell_flag() -> &'static str {
    if cfg!(windows) {
        "/C"
    } else {
        "-c"
    }
}

/// Configuration for launching the external tool.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Command line handed to the shell verbatim.
    pub cmdline: String,
    /// Shell binary (`/bin/sh` by default).
    pub shell: String,
    /// Longest stdout line accepted before the output stream is abandoned.
    pub max_line_bytes: usize,
}

impl SpawnConfig {
    /// Config for `cmdline` with the default shell and line limit.
    #[must_use]
    pub fn new(cmdline: impl Into<String>) -> Self {
        Self {
            cmdline: cmdline.into(),
            shell: default_shell(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

/// Handle to the running tool.
///
/// Owns the stdin line channel and the cancellation token shared by the
/// reader, writer and exit monitor tasks. Exactly one exists per engine and
/// it is never restarted.
#[derive(Debug)]
pub struct ToolProcess {
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    started: Instant,
    input: mpsc::UnboundedSender<String>,
    alive: bool,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ToolProcess {
    /// Launch the tool and start its reader, writer and exit-monitor tasks.
    ///
    /// Output lines are forwarded through `event_tx`, followed by exactly
    /// one termination report once the tool goes away on its own.
    ///
    /// # Errors
    ///
    /// - `AppError::Spawn("failed to spawn tool: …")`: OS spawn failure.
    /// - `AppError::Spawn("failed to capture tool …")`: missing stdio pipe.
    pub fn spawn(config: &SpawnConfig, event_tx: mpsc::UnboundedSender<ToolEvent>) -> Result<Self> {
        let mut cmd = Command::new(&config.shell);
        cmd.arg(shell_flag())
            .arg(&config.cmdline)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|err| AppError::Spawn(format!("failed to spawn tool: {err}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture tool stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture tool stdout".into()))?;

        let pid = child.id();
        let started_at = Utc::now();
        info!(
            pid = pid.unwrap_or(0),
            cmdline = %config.cmdline,
            shell = %config.shell,
            started_at = %started_at.to_rfc3339(),
            "tool process spawned"
        );

        let shutdown = CancellationToken::new();
        let (input, line_rx) = mpsc::unbounded_channel();

        let writer_cancel = shutdown.clone();
        let writer_task = tokio::spawn(async move {
            if let Err(err) = writer::run_writer(stdin, line_rx, writer_cancel).await {
                warn!(%err, "tool writer stopped");
            }
        });

        let reader_task = tokio::spawn(reader::run_reader(
            stdout,
            config.max_line_bytes,
            event_tx.clone(),
            shutdown.clone(),
        ));

        let monitor_task = monitor_exit(child, reader_task, event_tx, shutdown.clone());

        Ok(Self {
            pid,
            started_at,
            started: Instant::now(),
            input,
            alive: true,
            shutdown,
            tasks: vec![writer_task, monitor_task],
        })
    }

    /// OS process id of the shell, if it was still known at spawn time.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wall-clock time the tool was started.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Time elapsed since the tool was started.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether the tool is still considered running.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Queue `text` plus a newline for the tool's stdin.
    ///
    /// Silently does nothing once the tool is gone; callers check
    /// [`is_alive`](Self::is_alive) first.
    pub fn write(&self, text: &str) {
        if !self.alive {
            return;
        }
        if self.input.send(text.to_owned()).is_err() {
            debug!("tool writer already stopped; dropping line");
        }
    }

    /// Send `SIGTERM` to the tool's whole process group and stop the helper
    /// tasks.
    ///
    /// Returns `false` if the tool was already terminated.
    #[cfg(unix)]
    pub fn terminate(&mut self) -> bool {
        self.terminate_with(nix::sys::signal::Signal::SIGTERM)
    }

    /// Stop the helper tasks; the exit monitor kills the tool.
    ///
    /// Returns `false` if the tool was already terminated.
    #[cfg(not(unix))]
    pub fn terminate(&mut self) -> bool {
        if !self.alive {
            return false;
        }
        self.alive = false;
        self.shutdown.cancel();
        true
    }

    /// Like [`terminate`](Self::terminate) with a chosen signal. A tool
    /// that survives it is killed after a grace period.
    #[cfg(unix)]
    pub fn terminate_with(&mut self, signal: nix::sys::signal::Signal) -> bool {
        if !self.alive {
            return false;
        }
        self.alive = false;

        if let Some(pid) = self.pid {
            signal_group(pid, signal);
        }

        self.shutdown.cancel();
        true
    }

    /// Wait for the reader, writer and exit monitor tasks to finish.
    pub async fn join(&mut self) {
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                warn!(%err, "tool task panicked");
            }
        }
    }
}

impl Drop for ToolProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Send `signal` to the process group led by `pid`.
#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        warn!(pid, "pid out of range; cannot signal process group");
        return;
    };

    info!(pid, %signal, "signalling tool process group");
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => {}
        Err(Errno::ESRCH) => debug!(pid, "tool process group already gone"),
        Err(err) => warn!(pid, %signal, error = ?err, "killpg failed"),
    }
}

/// How the monitored tool first showed signs of going away.
enum FirstEnd {
    Canceled,
    Exited(std::io::Result<ExitStatus>),
    OutputEnded(std::result::Result<(), JoinError>),
}

/// Spawn the task that reports the tool's termination exactly once.
///
/// The report always follows every stdout line the reader forwarded:
/// - the child exits: stdout is drained (for up to [`OUTPUT_DRAIN`]), then
///   [`ToolEvent::Exited`] is sent;
/// - stdout ends first: the child gets [`EXIT_SETTLE`] to exit, giving
///   [`ToolEvent::Exited`], otherwise [`ToolEvent::OutputClosed`] is sent.
///
/// When `cancel` fires first, nothing is reported; a still-running child
/// is given [`KILL_GRACE`] to exit on its own, then killed and reaped.
#[must_use]
fn monitor_exit(
    mut child: Child,
    mut reader: JoinHandle<()>,
    event_tx: mpsc::UnboundedSender<ToolEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let first = tokio::select! {
            biased;

            () = cancel.cancelled() => FirstEnd::Canceled,
            result = child.wait() => FirstEnd::Exited(result),
            joined = &mut reader => FirstEnd::OutputEnded(joined),
        };

        let mut exited = false;
        let mut reader_done = false;
        let report = match first {
            FirstEnd::Canceled => None,
            FirstEnd::Exited(result) => {
                exited = true;
                match tokio::time::timeout(OUTPUT_DRAIN, &mut reader).await {
                    Ok(joined) => {
                        reader_done = true;
                        log_reader_end(joined);
                    }
                    Err(_) => debug!("tool exited with its stdout still open"),
                }
                Some(ToolEvent::Exited(exit_code(result)))
            }
            FirstEnd::OutputEnded(joined) => {
                reader_done = true;
                log_reader_end(joined);
                if let Ok(result) = tokio::time::timeout(EXIT_SETTLE, child.wait()).await {
                    exited = true;
                    Some(ToolEvent::Exited(exit_code(result)))
                } else {
                    info!("tool closed its stdout but keeps running");
                    Some(ToolEvent::OutputClosed)
                }
            }
        };

        if let Some(event) = report {
            if event_tx.send(event).is_err() {
                trace!("tool exit monitor: engine gone before the termination report");
            }
        }
        drop(event_tx);

        if !exited {
            cancel.cancelled().await;

            #[cfg(not(unix))]
            let _ = child.start_kill();

            if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
                warn!("tool ignored its termination signal; killing it");
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
            debug!("tool exit monitor: process reaped after termination");
        }

        if !reader_done {
            cancel.cancelled().await;
            log_reader_end(reader.await);
        }
    })
}

fn exit_code(result: std::io::Result<ExitStatus>) -> Option<i32> {
    match result {
        Ok(status) => {
            let code = status.code();
            info!(code = ?code, "tool process exited");
            code
        }
        Err(err) => {
            warn!(%err, "error waiting for tool process");
            None
        }
    }
}

fn log_reader_end(joined: std::result::Result<(), JoinError>) {
    if let Err(err) = joined {
        warn!(%err, "tool reader panicked");
    }
}
