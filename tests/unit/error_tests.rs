//! Unit tests for error display and exit codes.

use replgate::engine::StopReason;
use replgate::errors::{EXIT_BIND, EXIT_CONFIG, EXIT_FAULT};
use replgate::{AppError, QueryError};

#[test]
fn app_error_display_has_kind_prefix() {
    assert_eq!(AppError::Config("bad".into()).to_string(), "config: bad");
    assert_eq!(AppError::Bind("taken".into()).to_string(), "bind: taken");
    assert_eq!(AppError::Spawn("no shell".into()).to_string(), "spawn: no shell");
}

#[test]
fn app_error_message_no_trailing_period() {
    let s = AppError::Io("write failed".into()).to_string();
    assert!(!s.ends_with('.'), "error message must not end with a period: {s}");
}

#[test]
fn exit_codes_follow_error_kind() {
    assert_eq!(AppError::Config(String::new()).exit_code(), EXIT_CONFIG);
    assert_eq!(AppError::Bind(String::new()).exit_code(), EXIT_BIND);
    assert_eq!(AppError::Spawn(String::new()).exit_code(), EXIT_FAULT);
    assert_eq!(AppError::Http(String::new()).exit_code(), EXIT_FAULT);
    assert_eq!((EXIT_CONFIG, EXIT_BIND), (1, 2));
}

#[test]
fn toml_errors_become_config_errors() {
    let err: AppError = toml::from_str::<toml::Value>("= nope")
        .expect_err("invalid toml")
        .into();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn query_error_messages_are_user_facing() {
    assert_eq!(QueryError::Empty.to_string(), "Need a nonempty query.");
    assert_eq!(QueryError::MultiLine.to_string(), "Need a single-line query.");
    assert_eq!(QueryError::NotReady.to_string(), "Not available yet.");
    assert_eq!(QueryError::Stopped.to_string(), "Stopped.");
    assert_eq!(QueryError::Canceled(None).to_string(), "Canceled.");
    assert_eq!(
        QueryError::Canceled(Some("Connection closed.".into())).to_string(),
        "Canceled. Connection closed."
    );
}

#[test]
fn tool_stopped_error_carries_the_reason() {
    let err = QueryError::ToolStopped(StopReason::Exited(Some(3)).to_string());
    assert_eq!(
        err.to_string(),
        "The external tool was stopped. Exited with code 3."
    );
    assert_eq!(StopReason::OutputClosed.to_string(), "Output stream ended.");
    assert_eq!(StopReason::StopRequested.to_string(), "Stop requested.");
    assert_eq!(StopReason::Exited(None).to_string(), "Killed by a signal.");
}
