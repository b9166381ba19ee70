//! HTTP control API for the read-aloud engine.
//!
//! Runs on port 2004 by default. CORS-permissive so a browser extension or
//! page script can drive it from any origin.

use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use readit_core::types::{ProbeReport, Settings, SettingsPatch, SpeechStatus};

use crate::error::ReadError;
use crate::reader::{ReadSource, ReaderEngine, Synthesized};

/// Default listen port.
pub const DEFAULT_PORT: u16 = 2004;

/// Build the axum router with a shared [`ReaderEngine`].
pub fn router(engine: ReaderEngine) -> Router {
    Router::new()
        .route("/read", post(read))
        .route("/read-selection", post(read_selection))
        .route("/pause", post(pause))
        .route("/resume", post(resume))
        .route("/cancel", post(cancel))
        .route("/status", get(status))
        .route("/probe", post(probe))
        .route("/tts", post(tts))
        .route("/settings", get(get_settings).put(put_settings))
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

#[derive(serde::Deserialize)]
struct TextRequest {
    text: String,
}

#[derive(serde::Serialize)]
struct OkResponse {
    ok: bool,
}

#[derive(serde::Serialize)]
struct ErrorResponse {
    ok: bool,
    error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            ok: false,
            error: error.to_string(),
        }),
    )
        .into_response()
}

async fn read(
    State(engine): State<ReaderEngine>,
    Json(req): Json<TextRequest>,
) -> Json<OkResponse> {
    engine.start_read(ReadSource::Text(req.text));
    Json(OkResponse { ok: true })
}

async fn read_selection(State(engine): State<ReaderEngine>) -> Json<OkResponse> {
    engine.start_read(ReadSource::Selection);
    Json(OkResponse { ok: true })
}

async fn pause(State(engine): State<ReaderEngine>) -> Json<OkResponse> {
    engine.pause().await;
    Json(OkResponse { ok: true })
}

async fn resume(State(engine): State<ReaderEngine>) -> Json<OkResponse> {
    engine.resume().await;
    Json(OkResponse { ok: true })
}

async fn cancel(State(engine): State<ReaderEngine>) -> Json<OkResponse> {
    engine.cancel().await;
    Json(OkResponse { ok: true })
}

async fn status(State(engine): State<ReaderEngine>) -> Json<SpeechStatus> {
    Json(engine.status())
}

async fn probe(State(engine): State<ReaderEngine>) -> Json<ProbeReport> {
    Json(engine.probe().await)
}

async fn tts(State(engine): State<ReaderEngine>, Json(req): Json<TextRequest>) -> Response {
    match engine.synthesize(&req.text).await {
        Ok(Synthesized::Audio(audio)) => {
            ([(CONTENT_TYPE, audio.mime)], Body::from(audio.bytes)).into_response()
        }
        Ok(Synthesized::Remote(remote)) => Json(serde_json::json!({
            "ok": true,
            "played": remote.played,
            "info": remote.info,
        }))
        .into_response(),
        Err(e @ (ReadError::EmptyText | ReadError::NoEndpointConfigured)) => {
            error_response(StatusCode::BAD_REQUEST, e)
        }
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e),
    }
}

async fn get_settings(State(engine): State<ReaderEngine>) -> Json<Settings> {
    Json(engine.settings().settings().await)
}

async fn put_settings(
    State(engine): State<ReaderEngine>,
    Json(patch): Json<SettingsPatch>,
) -> Response {
    match engine.settings().update(patch).await {
        Ok(settings) => Json(settings).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}
