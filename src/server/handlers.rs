use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};

use super::AppState;
use crate::error::{NO_MATCH_MESSAGE, UNEXPECTED_MESSAGE};
use crate::index::UploadRequest;
use crate::search::{FileLocation, SearchRequest};

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[derive(Serialize)]
struct SearchResponse {
    matches: Vec<FileLocation>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
}

/// Malformed bodies are a client error; everything else keeps its status
fn rejection_response(rejection: JsonRejection) -> Response {
    let status = match rejection.status() {
        StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    };
    warn!("Rejected request body: {}", rejection.body_text());
    (status, Json(ErrorResponse::new(rejection.body_text()))).into_response()
}

fn invalid(message: String) -> Response {
    (StatusCode::UNPROCESSABLE_ENTITY, Json(ErrorResponse::new(message))).into_response()
}

pub(crate) async fn upload_handler(
    State(state): State<AppState>,
    payload: Result<Json<UploadRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return rejection_response(rejection),
    };
    if let Err(e) = request.validate() {
        return invalid(e.to_string());
    }

    let indexer = state.indexer.clone();
    match tokio::task::spawn_blocking(move || indexer.upload(request)).await {
        Ok(Ok(outcome)) => Json(outcome).into_response(),
        Ok(Err(e)) => Json(ErrorResponse::new(e.to_string())).into_response(),
        Err(e) => {
            error!("Upload task failed: {}", e);
            Json(ErrorResponse::new(UNEXPECTED_MESSAGE)).into_response()
        }
    }
}

pub(crate) async fn search_handler(
    State(state): State<AppState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return rejection_response(rejection),
    };
    if let Err(e) = request.validate() {
        return invalid(e.to_string());
    }

    let search = state.search.clone();
    match tokio::task::spawn_blocking(move || search.search(&request)).await {
        Ok(Ok(matches)) if matches.is_empty() => Json(ErrorResponse::new(NO_MATCH_MESSAGE)).into_response(),
        Ok(Ok(matches)) => Json(SearchResponse { matches }).into_response(),
        Ok(Err(e)) => {
            if !e.is_not_found() {
                error!("Search failed: {}", e);
            }
            Json(ErrorResponse::new(e.search_message())).into_response()
        }
        Err(e) => {
            error!("Search task failed: {}", e);
            Json(ErrorResponse::new(UNEXPECTED_MESSAGE)).into_response()
        }
    }
}

pub(crate) async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_response_serializes() {
        let resp = HealthResponse {
            status: "ok",
            uptime_secs: 42,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"status":"ok","uptime_secs":42}"#);
    }

    #[test]
    fn search_response_serializes() {
        let resp = SearchResponse {
            matches: vec![FileLocation {
                file_path: "a.py".to_string(),
                line_number: 21,
            }],
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"matches":[{"file_path":"a.py","line_number":21}]}"#);
    }
}
