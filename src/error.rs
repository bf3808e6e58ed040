//! Error taxonomy for the gateway.
//!
//! Follows the pattern `proxy/src/serverless/sql_over_http.rs` uses for
//! `ConnInfoError` / `HttpConnError` / `SqlOverHttpError`: one
//! `thiserror` enum per concern, each wired into a `to_client_message`
//! that decides exactly what text crosses the wire. The backend's own
//! error text is always forwarded verbatim (spec §7's propagation
//! policy) — this module never rewrites it, only classifies it.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Failure obtaining a cost estimate from the planner (spec §4.1, §7 kind 2).
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("{0}")]
    Backend(String),
    #[error("could not determine costs from explain output")]
    NoCostRow,
    #[error("could not parse explain output: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Failure during the shaped query's execution (spec §7 kind 3).
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("{0}")]
    Backend(String),
    #[error("query returned no rows")]
    NoRows,
    #[error("query cancelled")]
    Cancelled,
}

/// Top-level error surfaced by the dispatcher to the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("no data field given")]
    MissingData,
    #[error("{0}")]
    Planner(#[from] PlannerError),
    #[error("{0}")]
    Exec(#[from] ExecError),
    #[error("invalid isolation options")]
    InvalidOptions,
    /// The selected pool's queue was closed (only happens during shutdown).
    #[error("gateway is shutting down")]
    PoolClosed,
}

impl GatewayError {
    /// The spec mandates uniform HTTP 400 for every one of these (see
    /// spec.md §9's open question on error classification: the reference
    /// behavior is uniform 400 and this implementation does not silently
    /// change it). `PoolClosed` is the one exception, since it reflects
    /// the gateway itself going away rather than anything about the
    /// request.
    fn status(&self) -> StatusCode {
        match self {
            GatewayError::PoolClosed => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (status, self.to_string()).into_response();
        response
            .headers_mut()
            .insert("Access-Control-Allow-Origin", "*".parse().unwrap());
        response
    }
}
