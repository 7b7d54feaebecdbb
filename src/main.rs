#![forbid(unsafe_code)]

//! `replgate`: expose an interactive line-oriented tool over HTTP.
//!
//! Parses configuration, launches the tool, then serves it over HTTP and
//! the process's own stdin until the tool stops or a signal arrives.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use replgate::config::Overrides;
use replgate::engine::{StopReason, TracingObserver};
use replgate::errors::{EXIT_CONFIG, EXIT_FAULT};
use replgate::gateway::{http, stdin};
use replgate::{AppError, Engine, Result, ServerConfig};

/// How long runtime shutdown waits on a blocked stdin read.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "replgate", about = "Serve a line-oriented tool over HTTP", version, long_about = None)]
struct Cli {
    /// The command to run, through the shell.
    #[arg(short = 'c', long)]
    cmdline: Option<String>,

    /// Port to listen on [default: 8000].
    #[arg(short, long)]
    port: Option<u16>,

    /// The route to serve the command on [default: /].
    #[arg(short, long)]
    route: Option<String>,

    /// Line the tool prints when ready; enables multi-line responses.
    #[arg(long)]
    prompt: Option<String>,

    /// Address to listen on [default: 127.0.0.1].
    #[arg(long)]
    bind: Option<String>,

    /// Shell used to run the command [default: /bin/sh].
    #[arg(long)]
    shell: Option<String>,

    /// URL shown in the usage hint for unsupported methods.
    #[arg(long)]
    public_url: Option<String>,

    /// Do not read queries from stdin.
    #[arg(long)]
    no_stdin: bool,

    /// Fail queued queries as soon as the tool stops.
    #[arg(long)]
    drain_on_stop: bool,

    /// Optional TOML configuration file; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            cmdline: self.cmdline.clone(),
            port: self.port,
            route: self.route.clone(),
            prompt: self.prompt.clone(),
            bind: self.bind.clone(),
            shell: self.shell.clone(),
            public_url: self.public_url.clone(),
            no_stdin: self.no_stdin,
            drain_queue_on_stop: self.drain_on_stop,
        }
    }
}

fn main() -> ExitCode {
    let args = match Cli::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // Help and version requests are not errors.
            let code = if err.use_stderr() { EXIT_CONFIG } else { 0 };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("{err}");
        return ExitCode::from(err.exit_code());
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "invalid configuration");
            return ExitCode::from(err.exit_code());
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "failed to build tokio runtime");
            return ExitCode::from(EXIT_FAULT);
        }
    };

    let result = runtime.block_on(run(config));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    match result {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!(%err, "replgate failed");
            ExitCode::from(err.exit_code())
        }
    }
}

fn load_config(args: &Cli) -> Result<ServerConfig> {
    let base = match &args.config {
        Some(path) => ServerConfig::load_from_path(path)?,
        None => ServerConfig::default(),
    };
    let mut config = base.with_overrides(args.overrides());
    config.validate()?;
    Ok(config)
}

async fn run(config: ServerConfig) -> Result<u8> {
    let addr = config.listen_addr()?;
    let listener = http::bind(addr).await?;

    info!(cmdline = %config.cmdline, "making the tool curlable");
    let engine = Engine::spawn(config.engine_config(), Arc::new(TracingObserver))?;

    let ct = CancellationToken::new();

    let router = http::router(
        &config.route,
        http::HttpState::new(engine.clone(), config.public_url.clone()),
    );
    let server = tokio::spawn(http::serve(listener, router, ct.clone()));

    let stdin_task = config.stdin.then(|| {
        tokio::spawn(stdin::run(
            engine.clone(),
            tokio::io::stdin(),
            tokio::io::stdout(),
            config.max_line_bytes,
            ct.clone(),
        ))
    });

    info!(%addr, route = %config.route, "service started");

    let reason = tokio::select! {
        reason = engine.wait_stopped() => reason,
        () = shutdown_signal() => {
            info!("shutdown signal received");
            engine.stop();
            engine.wait_stopped().await
        }
    };

    ct.cancel();

    if let Some(task) = stdin_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%err, "stdin front end failed"),
            Err(err) => warn!(%err, "stdin front end panicked"),
        }
    }

    server
        .await
        .map_err(|err| AppError::Http(format!("server task panicked: {err}")))??;

    let code = match reason {
        StopReason::StopRequested | StopReason::Exited(Some(0)) => 0,
        StopReason::Exited(_) | StopReason::OutputClosed => {
            warn!(%reason, "the tool stopped on its own");
            EXIT_FAULT
        }
    };

    info!("replgate shut down");
    Ok(code)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
