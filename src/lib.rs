#![forbid(unsafe_code)]

//! `replgate`: serve an interactive line-oriented tool as a
//! request/response service.
//!
//! The [`engine`] owns the spawned tool and serializes queries onto its
//! stdin/stdout; the [`gateway`] adapters expose it over HTTP and over a
//! raw line stream.

pub mod config;
pub mod engine;
pub mod errors;
pub mod gateway;
pub mod lines;
pub mod tool;

pub use config::ServerConfig;
pub use engine::{Engine, EngineConfig};
pub use errors::{AppError, QueryError, Result};
