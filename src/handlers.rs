//! Dispatcher / Request Handler (spec §4.4, §6).
//!
//! Wires the whole admission pipeline — probe, classify, enqueue, await
//! reply — behind two HTTP endpoints. Built on `axum`, already part of
//! the teacher's own workspace (`proxy` depends on it for its own HTTP
//! surface) rather than hand-rolling a `hyper` service the way
//! `serverless/sql_over_http.rs` does at a lower level than we need
//! here.
//!
//! Cancellation on client disconnect is realized the way `axum`/`hyper`
//! actually expose it: there is no portable `r.Context().Done()`
//! equivalent (`original_source/postpass/handlers.go`'s `task.closer`),
//! so instead a [`CancellationToken`] is attached to the handler's own
//! future via [`CancellationToken::drop_guard`] — if Hyper drops the
//! handler future because the client went away, the guard drops with
//! it and fires the same cancellation the worker already watches for
//! (see `workpool::process_item`).

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::classify::{classify, Class};
use crate::connpool::ConnPool;
use crate::error::{ExecError, GatewayError};
use crate::observability::Observability;
use crate::probe;
use crate::workpool::{SqlResponse, WorkItem, WorkerPool};

/// The three isolation options, identical across `/interpreter` and
/// `/explain`, and across `GET` (query string) and `POST` (form body)
/// per spec §6.1. All default to `true`, matching
/// `original_source/postpass/handlers.go`'s parameter defaults.
#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
    pub geojson: bool,
    pub pretty: bool,
    pub collection: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        QueryOptions {
            geojson: true,
            pretty: true,
            collection: true,
        }
    }
}

#[derive(Debug)]
struct RequestParams {
    data: Option<String>,
    options: QueryOptions,
}

/// `original_source/postpass/handlers.go` reads its three options from
/// `r.Form["options[geojson]"]` etc. — literal bracket-suffixed form
/// keys, not a nested structure — and feeds whatever string is present
/// through `strconv.ParseBool`, silently keeping the default on a
/// malformed value since the Go code discards that error with `_`.
/// `axum`'s built-in `Query`/`Form` extractors deserialize flat
/// `serde` structs and have no notion of this bracket convention, so
/// parameters are read from the raw `key=value` pairs by hand instead.
fn parse_params(raw: &str) -> RequestParams {
    let mut data = None;
    let mut options = QueryOptions::default();

    for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
        match key.as_ref() {
            "data" => data = Some(value.into_owned()),
            "options[geojson]" => options.geojson = parse_bool(&value, options.geojson),
            "options[pretty]" => options.pretty = parse_bool(&value, options.pretty),
            "options[collection]" => options.collection = parse_bool(&value, options.collection),
            _ => {}
        }
    }

    RequestParams { data, options }
}

/// Mirrors `strconv.ParseBool`'s accepted spellings; an unrecognized
/// value falls back to `default` rather than rejecting the request,
/// matching the Go handler discarding `ParseBool`'s error.
fn parse_bool(value: &str, default: bool) -> bool {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => true,
        "0" | "f" | "F" | "FALSE" | "false" | "False" => false,
        _ => default,
    }
}

#[derive(Serialize)]
struct ExplainResponse {
    plan: serde_json::Value,
    queue: &'static str,
}

#[derive(Clone)]
pub struct AppState {
    pub probe_pool: ConnPool,
    pub quick: Arc<WorkerPool>,
    pub medium: Arc<WorkerPool>,
    pub slow: Arc<WorkerPool>,
    pub quick_medium_threshold: i64,
    pub medium_slow_threshold: i64,
    pub observability: Arc<Observability>,
}

impl AppState {
    fn pool_for(&self, class: Class) -> &WorkerPool {
        match class {
            Class::Quick => self.quick.as_ref(),
            Class::Medium => self.medium.as_ref(),
            Class::Slow => self.slow.as_ref(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/interpreter", get(interpreter_get).post(interpreter_post))
        .route("/explain", get(explain_get).post(explain_post))
        .with_state(state)
}

async fn interpreter_get(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Response, GatewayError> {
    handle_interpreter(state, parse_params(query.as_deref().unwrap_or(""))).await
}

async fn interpreter_post(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let raw = String::from_utf8_lossy(&body);
    handle_interpreter(state, parse_params(&raw)).await
}

async fn explain_get(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Response, GatewayError> {
    handle_explain(state, parse_params(query.as_deref().unwrap_or(""))).await
}

async fn explain_post(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let raw = String::from_utf8_lossy(&body);
    handle_explain(state, parse_params(&raw)).await
}

fn required_query(params: &RequestParams) -> Result<&str, GatewayError> {
    params
        .data
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or(GatewayError::MissingData)
}

/// The admission pipeline proper: probe → classify → enqueue → await
/// reply, racing the reply against the caller going away (spec §4.4).
async fn handle_interpreter(state: AppState, params: RequestParams) -> Result<Response, GatewayError> {
    let query = required_query(&params)?.to_string();
    let id = state.observability.next_request_id();

    let outcome = probe::explain(&state.probe_pool, &query, false).await?;
    let class = classify(
        outcome.startup,
        outcome.total,
        state.quick_medium_threshold,
        state.medium_slow_threshold,
    );

    let (reply_tx, reply_rx) = oneshot::channel();
    let cancel = CancellationToken::new();
    // Fires cancellation the instant this future is dropped — the only
    // signal axum/hyper give us for "the client disconnected".
    let _cancel_on_drop = cancel.clone().drop_guard();

    let item = WorkItem {
        id,
        query,
        options: params.options,
        reply: reply_tx,
        cancel,
    };

    state
        .pool_for(class)
        .enqueue(item)
        .await
        .map_err(|_| GatewayError::PoolClosed)?;

    let response = reply_rx.await.map_err(|_| GatewayError::PoolClosed)?;

    match response {
        SqlResponse::Ok(text) => Ok(json_response(text)),
        SqlResponse::Err(message) => Err(GatewayError::Exec(ExecError::Backend(message))),
    }
}

async fn handle_explain(state: AppState, params: RequestParams) -> Result<Response, GatewayError> {
    let query = required_query(&params)?.to_string();

    let outcome = probe::explain(&state.probe_pool, &query, true).await?;
    let class = classify(
        outcome.startup,
        outcome.total,
        state.quick_medium_threshold,
        state.medium_slow_threshold,
    );
    let plan = outcome
        .plan
        .expect("explain() with want_plan=true always populates the plan");

    let body = ExplainResponse {
        plan,
        queue: class.as_str(),
    };
    let text = serde_json::to_string(&body).expect("ExplainResponse is always representable as JSON");
    Ok(json_response(text))
}

fn json_response(body: String) -> Response {
    let mut response = (StatusCode::OK, body).into_response();
    response
        .headers_mut()
        .insert("Content-Type", "application/json".parse().unwrap());
    response
        .headers_mut()
        .insert("Access-Control-Allow-Origin", "*".parse().unwrap());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_data_is_rejected() {
        let params = RequestParams {
            data: Some(String::new()),
            options: QueryOptions {
                geojson: true,
                pretty: true,
                collection: true,
            },
        };
        assert!(matches!(
            required_query(&params),
            Err(GatewayError::MissingData)
        ));
    }

    #[test]
    fn present_data_is_accepted() {
        let params = RequestParams {
            data: Some("SELECT 1".to_string()),
            options: QueryOptions {
                geojson: true,
                pretty: true,
                collection: true,
            },
        };
        assert_eq!(required_query(&params).unwrap(), "SELECT 1");
    }

    #[test]
    fn parse_params_reads_bracketed_option_keys() {
        let params = parse_params("data=SELECT+1&options%5Bgeojson%5D=false&options%5Bpretty%5D=0");
        assert_eq!(params.data.as_deref(), Some("SELECT 1"));
        assert!(!params.options.geojson);
        assert!(!params.options.pretty);
        assert!(params.options.collection); // absent, keeps the default
    }

    #[test]
    fn parse_params_defaults_all_options_to_true() {
        let params = parse_params("data=SELECT+1");
        assert!(params.options.geojson);
        assert!(params.options.pretty);
        assert!(params.options.collection);
    }

    #[test]
    fn parse_bool_falls_back_to_default_on_garbage() {
        assert!(parse_bool("not-a-bool", true));
        assert!(!parse_bool("not-a-bool", false));
        assert!(parse_bool("TRUE", false));
        assert!(!parse_bool("False", true));
    }

    #[test]
    fn missing_data_field_parses_to_none() {
        let params = parse_params("options%5Bgeojson%5D=true");
        assert!(params.data.is_none());
    }
}
