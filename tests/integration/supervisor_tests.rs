//! Integration tests for the tool process supervisor.

use std::time::Duration;

use tokio::sync::mpsc;

use replgate::tool::{SpawnConfig, ToolEvent, ToolProcess};

use super::test_helpers::TEST_TIMEOUT;

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ToolEvent>) -> ToolEvent {
    tokio::time::timeout(TEST_TIMEOUT, rx.recv())
        .await
        .expect("event in time")
        .expect("channel open")
}

#[tokio::test]
async fn write_and_read_through_the_shell() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut process = ToolProcess::spawn(&SpawnConfig::new("cat"), tx).expect("spawn");
    assert!(process.is_alive());
    assert!(process.pid().is_some());
    assert!(process.started_at() <= chrono::Utc::now());

    process.write("ping");
    assert_eq!(next_event(&mut rx).await, ToolEvent::Line("ping".into()));

    assert!(process.terminate());
    assert!(!process.terminate(), "second terminate is a no-op");
    process.write("ignored");
    process.join().await;
}

#[tokio::test]
async fn exit_is_reported_once_after_the_last_line() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut process =
        ToolProcess::spawn(&SpawnConfig::new("echo one; echo bye; exit 7"), tx).expect("spawn");

    assert_eq!(next_event(&mut rx).await, ToolEvent::Line("one".into()));
    assert_eq!(next_event(&mut rx).await, ToolEvent::Line("bye".into()));
    assert_eq!(next_event(&mut rx).await, ToolEvent::Exited(Some(7)));

    let rest = tokio::time::timeout(TEST_TIMEOUT, rx.recv())
        .await
        .expect("channel closes in time");
    assert_eq!(rest, None, "no second termination report");
    process.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clean_exit_always_reports_its_code() {
    for _ in 0..20 {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut process = ToolProcess::spawn(&SpawnConfig::new("exit 0"), tx).expect("spawn");
        assert_eq!(next_event(&mut rx).await, ToolEvent::Exited(Some(0)));
        process.join().await;
    }
}

#[tokio::test]
async fn closed_stdout_on_a_running_tool_is_output_closed() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut process =
        ToolProcess::spawn(&SpawnConfig::new("echo up; exec >&-; sleep 30"), tx).expect("spawn");

    assert_eq!(next_event(&mut rx).await, ToolEvent::Line("up".into()));
    assert_eq!(next_event(&mut rx).await, ToolEvent::OutputClosed);
    assert!(process.is_alive(), "reporting does not terminate");

    assert!(process.terminate());
    tokio::time::timeout(TEST_TIMEOUT, process.join())
        .await
        .expect("terminated tool is reaped");
}

#[tokio::test]
async fn missing_shell_is_a_spawn_error() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let config = SpawnConfig {
        shell: "/definitely/not/a/shell".into(),
        ..SpawnConfig::new("cat")
    };
    let err = ToolProcess::spawn(&config, tx).expect_err("no such shell");
    assert!(matches!(err, replgate::AppError::Spawn(_)));
}

#[cfg(unix)]
#[tokio::test]
async fn terminate_kills_the_whole_process_group() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut process =
        ToolProcess::spawn(&SpawnConfig::new("sleep 30 & echo $!; wait"), tx).expect("spawn");

    let ToolEvent::Line(line) = next_event(&mut rx).await else {
        panic!("expected the grandchild pid");
    };
    let grandchild: i32 = line.parse().expect("pid");
    assert!(is_running(grandchild), "grandchild started");

    process.terminate();
    process.join().await;

    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while is_running(grandchild) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "grandchild {grandchild} survived terminate"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Alive and not a zombie awaiting its reaper.
#[cfg(unix)]
fn is_running(pid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if kill(Pid::from_raw(pid), None).is_err() {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => !stat
            .rsplit_once(')')
            .is_some_and(|(_, rest)| rest.trim_start().starts_with('Z')),
        Err(_) => !cfg!(target_os = "linux"),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn terminate_with_sends_the_chosen_signal() {
    use nix::sys::signal::Signal;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut process =
        ToolProcess::spawn(&SpawnConfig::new("trap '' TERM; echo up; sleep 30"), tx)
            .expect("spawn");
    assert_eq!(next_event(&mut rx).await, ToolEvent::Line("up".into()));

    let started = std::time::Instant::now();
    assert!(process.terminate_with(Signal::SIGKILL));
    assert!(!process.terminate(), "already terminated");
    process.join().await;
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "SIGKILL must not wait out the kill grace period"
    );
}
