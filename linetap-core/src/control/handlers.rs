use crate::conf::{ConfigUpdate, FieldError, Updated};
use crate::control::ControlState;
use crate::control::stream::{Framing, line_stream};
use crate::service::RotateResult;
use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

type Params = Query<HashMap<String, String>>;

fn flag(params: &HashMap<String, String>, key: &str) -> bool {
    params
        .get(key)
        .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

fn display(path: Option<&Path>) -> Option<String> {
    path.map(|p| p.display().to_string())
}

pub(super) async fn metrics(State(state): State<ControlState>) -> Response {
    let body = state.capture.metrics().scrape();
    ([(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)], body).into_response()
}

pub(super) async fn healthz() -> Response {
    ([(header::CONTENT_TYPE, "text/plain")], "ok\n").into_response()
}

pub(super) async fn stream(State(state): State<ControlState>, Query(params): Params) -> Response {
    let framing = if flag(&params, "raw") {
        Framing::Raw
    } else {
        Framing::Sse
    };

    let capture = &state.capture;
    let body = line_stream(
        capture.hub(),
        capture.metrics().clone(),
        framing,
        state.heartbeat,
    );
    tracing::debug!(?framing, "stream client connected");

    (
        [
            (header::CONTENT_TYPE, framing.content_type()),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
struct RotateResponse {
    ok: bool,
    message: String,
    previous_file: Option<String>,
    current_file: Option<String>,
}

pub(super) async fn rotate(State(state): State<ControlState>, Query(params): Params) -> Response {
    let soft = flag(&params, "soft");
    let capture = state.capture.clone();
    let result = tokio::task::spawn_blocking(move || capture.rotate(soft)).await;

    let (status, body) = match result {
        Ok(Ok(RotateResult::Scheduled { current_file })) => (
            StatusCode::OK,
            RotateResponse {
                ok: true,
                message: "scheduled".to_string(),
                previous_file: None,
                current_file: display(current_file.as_deref()),
            },
        ),
        Ok(Ok(RotateResult::Rotated(report))) => (
            StatusCode::OK,
            RotateResponse {
                ok: true,
                message: "rotated".to_string(),
                previous_file: display(report.previous_file.as_deref()),
                current_file: display(Some(report.current_file.as_path())),
            },
        ),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "rotate request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, rotate_failure(e.to_string()))
        }
        Err(e) => {
            tracing::error!(error = %e, "rotate task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, rotate_failure(e.to_string()))
        }
    };

    (status, Json(body)).into_response()
}

fn rotate_failure(reason: String) -> RotateResponse {
    RotateResponse {
        ok: false,
        message: format!("rotate failed: {reason}"),
        previous_file: None,
        current_file: None,
    }
}

pub(super) async fn get_config(State(state): State<ControlState>) -> Response {
    Json(state.capture.config_view()).into_response()
}

#[derive(Debug, Serialize)]
struct ConfigResponse {
    ok: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated: Option<Updated>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<FieldError>,
}

pub(super) async fn post_config(State(state): State<ControlState>, body: Bytes) -> Response {
    let capture = state.capture.clone();

    // Validation may create the output directory, so it runs off the reactor.
    let result = tokio::task::spawn_blocking(move || {
        ConfigUpdate::from_slice(&body).map(|update| capture.apply_config(&update))
    })
    .await;

    let (status, response) = match result {
        Ok(Ok(outcome)) => match outcome.rotation {
            Some(Err(e)) => {
                tracing::warn!(error = %e, "rotation requested by config update failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ConfigResponse {
                        ok: false,
                        message: format!("applied, but rotate failed: {e}"),
                        updated: Some(outcome.updated),
                        errors: Vec::new(),
                    },
                )
            }
            rotation => (
                StatusCode::OK,
                ConfigResponse {
                    ok: true,
                    message: if rotation.is_some() {
                        "applied and rotated".to_string()
                    } else {
                        "applied".to_string()
                    },
                    updated: Some(outcome.updated),
                    errors: Vec::new(),
                },
            ),
        },
        Ok(Err(e)) => {
            tracing::info!(error = %e, "config update rejected");
            (
                StatusCode::BAD_REQUEST,
                ConfigResponse {
                    ok: false,
                    message: e.to_string(),
                    updated: None,
                    errors: e.field_errors(),
                },
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "config task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ConfigResponse {
                    ok: false,
                    message: e.to_string(),
                    updated: None,
                    errors: Vec::new(),
                },
            )
        }
    };

    (status, Json(response)).into_response()
}
