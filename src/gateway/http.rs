//! HTTP front end.
//!
//! Serves a single route:
//!
//! | Method   | Behaviour                                                  |
//! |----------|------------------------------------------------------------|
//! | `POST`   | body is the query; 200 + result, 500 + error, 503 if not ready |
//! | `DELETE` | stops the tool; "Terminating." or "Already terminated."    |
//! | *other*  | 405 with a usage hint                                      |
//!
//! A POST whose client disconnects before the result is ready cancels its
//! query.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::Engine;
use crate::{AppError, Result};

/// State shared by every request.
#[derive(Debug, Clone)]
pub struct HttpState {
    engine: Engine,
    public_url: Option<String>,
}

impl HttpState {
    /// `public_url` is quoted in the 405 usage hint; `$URL` when absent.
    #[must_use]
    pub fn new(engine: Engine, public_url: Option<String>) -> Self {
        Self { engine, public_url }
    }
}

/// Build the router serving the engine on `route`.
///
/// `route` must already be validated (see
/// [`ServerConfig::validate`](crate::ServerConfig::validate)).
pub fn router(route: &str, state: HttpState) -> Router {
    Router::new()
        .route(route, any(handle))
        .with_state(Arc::new(state))
}

/// Bind the listening socket.
///
/// # Errors
///
/// Returns `AppError::Bind` if the address is unavailable.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::Bind(format!("failed to listen on {addr}: {err}")))
}

/// Serve `router` on `listener` until `ct` is cancelled, then drain
/// in-flight requests.
///
/// # Errors
///
/// Returns `AppError::Http` if the server fails.
pub async fn serve(listener: TcpListener, router: Router, ct: CancellationToken) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "starting HTTP front end");
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Http(format!("server error: {err}")))?;

    info!("HTTP front end shut down");
    Ok(())
}

async fn handle(State(state): State<Arc<HttpState>>, method: Method, body: String) -> Response {
    match method {
        Method::POST => run_query(&state, &body).await,
        Method::DELETE => stop_tool(&state),
        _ => usage(&state),
    }
}

async fn run_query(state: &HttpState, body: &str) -> Response {
    if !state.engine.is_ready() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Not available yet.\n").into_response();
    }

    let submission = state.engine.submit(body);
    let guard = submission.cancel_handle().on_drop("Connection closed.");
    let outcome = submission.wait().await;
    guard.disarm();

    let cors = [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")];
    match outcome {
        Ok(result) => (StatusCode::OK, cors, result).into_response(),
        Err(err) => {
            debug!(%err, "query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, cors, format!("{err}\n")).into_response()
        }
    }
}

fn stop_tool(state: &HttpState) -> Response {
    info!("stop requested over HTTP");
    if state.engine.stop() {
        "Terminating.\n".into_response()
    } else {
        "Already terminated.\n".into_response()
    }
}

fn usage(state: &HttpState) -> Response {
    (StatusCode::METHOD_NOT_ALLOWED, usage_hint(state.public_url.as_deref())).into_response()
}

/// Usage text for unsupported methods.
fn usage_hint(public_url: Option<&str>) -> String {
    let url = public_url.map_or_else(|| "$URL".to_owned(), |url| format!("'{url}'"));
    format!("Need POST (`curl -d '...' {url}`) or DELETE (`curl -X DELETE ...`).\n")
}
