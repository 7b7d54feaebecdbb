//! Server configuration: TOML file, command-line overrides, validation.

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use serde::Deserialize;

use crate::engine::EngineConfig;
use crate::lines::DEFAULT_MAX_LINE_BYTES;
use crate::tool::{default_shell, SpawnConfig};
use crate::{AppError, Result};

fn default_port() -> u16 {
    8000
}

fn default_route() -> String {
    "/".into()
}

fn default_bind() -> String {
    "127.0.0.1".into()
}

fn default_true() -> bool {
    true
}

fn default_max_line_bytes() -> usize {
    DEFAULT_MAX_LINE_BYTES
}

/// Gateway configuration, optionally parsed from a TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ServerConfig {
    /// Command line of the tool to wrap, run through `shell`.
    #[serde(default)]
    pub cmdline: String,
    /// HTTP listen port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// HTTP route the tool is served on. Must start with `/`.
    #[serde(default = "default_route")]
    pub route: String,
    /// Ready prompt; enables multi-line responses.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Address to listen on.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Shell used to run `cmdline`.
    #[serde(default = "default_shell")]
    pub shell: String,
    /// URL quoted in the usage hint for unsupported methods.
    #[serde(default)]
    pub public_url: Option<String>,
    /// Also accept queries line by line on the gateway's own stdin.
    #[serde(default = "default_true")]
    pub stdin: bool,
    /// Fail queued queries immediately when the tool stops.
    #[serde(default)]
    pub drain_queue_on_stop: bool,
    /// Longest accepted tool output line, in bytes.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            cmdline: String::new(),
            port: default_port(),
            route: default_route(),
            prompt: None,
            bind: default_bind(),
            shell: default_shell(),
            public_url: None,
            stdin: true,
            drain_queue_on_stop: false,
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

/// Values given on the command line; each `Some` replaces the file value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// `--cmdline`
    pub cmdline: Option<String>,
    /// `--port`
    pub port: Option<u16>,
    /// `--route`
    pub route: Option<String>,
    /// `--prompt`
    pub prompt: Option<String>,
    /// `--bind`
    pub bind: Option<String>,
    /// `--shell`
    pub shell: Option<String>,
    /// `--public-url`
    pub public_url: Option<String>,
    /// `--no-stdin`
    pub no_stdin: bool,
    /// `--drain-on-stop`
    pub drain_queue_on_stop: bool,
}

impl ServerConfig {
    /// Load configuration from a TOML file path. Not validated; apply
    /// overrides first, then call [`validate`](Self::validate).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` on invalid TOML or unknown keys.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Replace file values with command-line values.
    #[must_use]
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(cmdline) = overrides.cmdline {
            self.cmdline = cmdline;
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(route) = overrides.route {
            self.route = route;
        }
        if overrides.prompt.is_some() {
            self.prompt = overrides.prompt;
        }
        if let Some(bind) = overrides.bind {
            self.bind = bind;
        }
        if let Some(shell) = overrides.shell {
            self.shell = shell;
        }
        if overrides.public_url.is_some() {
            self.public_url = overrides.public_url;
        }
        if overrides.no_stdin {
            self.stdin = false;
        }
        if overrides.drain_queue_on_stop {
            self.drain_queue_on_stop = true;
        }
        self
    }

    /// Check and normalize the configuration. Trims the command line and
    /// the prompt.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first invalid setting.
    pub fn validate(&mut self) -> Result<()> {
        self.cmdline = self.cmdline.trim().to_owned();
        if self.cmdline.is_empty() {
            return Err(AppError::Config("a command line to run is required".into()));
        }

        validate_route(&self.route)?;

        if let Some(prompt) = self.prompt.as_mut() {
            *prompt = prompt.trim().to_owned();
            if prompt.is_empty() {
                return Err(AppError::Config("prompt must not be blank".into()));
            }
        }

        if self.shell.trim().is_empty() {
            return Err(AppError::Config("shell must not be blank".into()));
        }

        if self.max_line_bytes == 0 {
            return Err(AppError::Config(
                "max_line_bytes must be greater than zero".into(),
            ));
        }

        self.listen_addr()?;
        Ok(())
    }

    /// Socket address to listen on.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `bind` is not an IP address.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .bind
            .parse()
            .map_err(|err| AppError::Config(format!("invalid bind address {:?}: {err}", self.bind)))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Engine settings derived from this configuration.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            spawn: SpawnConfig {
                cmdline: self.cmdline.clone(),
                shell: self.shell.clone(),
                max_line_bytes: self.max_line_bytes,
            },
            prompt: self.prompt.clone(),
            drain_queue_on_stop: self.drain_queue_on_stop,
        }
    }
}

/// A route must be an absolute, literal path: axum would read `{..}` and
/// `:`/`*` segments as captures.
fn validate_route(route: &str) -> Result<()> {
    if !route.starts_with('/') {
        return Err(AppError::Config(format!(
            "route must start with '/': {route:?}"
        )));
    }
    if route.chars().any(char::is_whitespace) {
        return Err(AppError::Config(format!(
            "route must not contain whitespace: {route:?}"
        )));
    }
    if route.contains(['{', '}'])
        || route
            .split('/')
            .any(|segment| segment.starts_with(':') || segment.starts_with('*'))
    {
        return Err(AppError::Config(format!(
            "route must be a literal path without captures: {route:?}"
        )));
    }
    Ok(())
}
