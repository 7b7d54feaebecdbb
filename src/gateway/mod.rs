//! Front ends that feed queries to the [`Engine`](crate::Engine).
//!
//! - `http`: one axum route; POST runs a query, DELETE stops the tool.
//! - `stdin`: one query per line of a raw byte stream.

pub mod http;
pub mod stdin;
