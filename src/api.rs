//! HTTP API for the synthesis service.
//!
//! Routes (text comes from `?text=`, else the request body, else the path):
//! - `/synthesize[/{text}]`: download the WAV (`glados_tts.wav`)
//! - `/synthesize-local[/{text}]`: play on this host's speakers
//! - `/ask-llama[/{text}]`: ask the chat server, speak its reply locally
//! - `/status`: device and cache summary
//!
//! Both delivery routes hand out an ephemeral copy of the cached artifact,
//! so delivering never empties the cache.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::Artifact;
use crate::chat::ChatCompletion;
use crate::delivery::{play_and_remove, stream_and_remove};
use crate::error::TtsError;
use crate::playback::AudioSink;
use crate::synthesizer::Synthesizer;

pub const DOWNLOAD_FILENAME: &str = "glados_tts.wav";
pub const AUDIO_MIME: &str = "audio/wav";

#[derive(Clone)]
pub struct AppState {
    pub synthesizer: Arc<Synthesizer>,
    pub sink: Arc<dyn AudioSink>,
    pub chat: Arc<dyn ChatCompletion>,
}

#[derive(Deserialize)]
pub struct TextQuery {
    text: Option<String>,
}

#[derive(Serialize)]
struct StatusResponse {
    device: String,
    cache_dir: String,
    cached_artifacts: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    status: String,
    error: String,
}

impl IntoResponse for TtsError {
    fn into_response(self) -> Response {
        let status = match &self {
            TtsError::EmptyInput => return StatusCode::NO_CONTENT.into_response(),
            TtsError::Chat(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!("Request failed: {self}");
        let body = ErrorResponse {
            status: "error".into(),
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Build the axum router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/synthesize", get(handle_synthesize).post(handle_synthesize))
        .route("/synthesize/", get(handle_synthesize).post(handle_synthesize))
        .route("/synthesize/{*text}", get(handle_synthesize).post(handle_synthesize))
        .route("/synthesize-local", get(handle_local).post(handle_local))
        .route("/synthesize-local/", get(handle_local).post(handle_local))
        .route("/synthesize-local/{*text}", get(handle_local).post(handle_local))
        .route("/ask-llama", get(handle_ask_llama).post(handle_ask_llama))
        .route("/ask-llama/", get(handle_ask_llama).post(handle_ask_llama))
        .route("/ask-llama/{*text}", get(handle_ask_llama).post(handle_ask_llama))
        .with_state(state)
}

/// Serve until ctrl-c.
pub async fn serve(state: AppState, addr: SocketAddr) -> Result<(), TtsError> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{addr}/synthesize/{{PHRASE}}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;
    Ok(())
}

/// Query parameter wins, then a request body, then the path tail.
fn request_text(path: Option<Path<String>>, query: TextQuery, body: String) -> String {
    if let Some(text) = query.text.filter(|t| !t.is_empty()) {
        return text;
    }
    if !body.is_empty() {
        return body;
    }
    path.map(|Path(text)| text).unwrap_or_default()
}

fn preview(text: &str) -> String {
    let head: String = text.chars().take(80).collect();
    let ellipsis = if text.chars().count() > 80 { "..." } else { "" };
    format!("\"{}{ellipsis}\"", head.replace('\n', " "))
}

/// Produce the artifact and hand back an ephemeral copy for delivery.
async fn deliverable(state: &AppState, text: &str) -> Result<Artifact, TtsError> {
    let t0 = Instant::now();
    let copy = state.synthesizer.produce_ephemeral(text).await?;
    info!("Generating audio took {}ms", t0.elapsed().as_millis());
    Ok(copy)
}

/// Play an ephemeral artifact on the blocking pool and wait for it.
async fn play_locally(state: &AppState, artifact: Artifact) {
    let sink = state.sink.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || play_and_remove(&*sink, artifact)).await {
        warn!("Playback task failed: {e}");
    }
}

// --- Handlers ---

async fn handle_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, TtsError> {
    let cache = state.synthesizer.cache();
    Ok(Json(StatusResponse {
        device: state.synthesizer.device().to_string(),
        cache_dir: cache.dir().display().to_string(),
        cached_artifacts: cache.entries()?.len(),
    }))
}

async fn handle_synthesize(
    State(state): State<AppState>,
    path: Option<Path<String>>,
    Query(query): Query<TextQuery>,
    body: String,
) -> Result<Response, TtsError> {
    let text = request_text(path, query, body);
    if text.trim().is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    info!("HTTP /synthesize: {}", preview(&text));

    let copy = deliverable(&state, &text).await?;
    let stream = stream_and_remove(copy).await?;

    Ok((
        [
            (header::CONTENT_TYPE, AUDIO_MIME.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={DOWNLOAD_FILENAME}"),
            ),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

async fn handle_local(
    State(state): State<AppState>,
    path: Option<Path<String>>,
    Query(query): Query<TextQuery>,
    body: String,
) -> Result<StatusCode, TtsError> {
    let text = request_text(path, query, body);
    if text.trim().is_empty() {
        return Ok(StatusCode::NO_CONTENT);
    }
    info!("HTTP /synthesize-local: {}", preview(&text));

    let copy = deliverable(&state, &text).await?;
    play_locally(&state, copy).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_ask_llama(
    State(state): State<AppState>,
    path: Option<Path<String>>,
    Query(query): Query<TextQuery>,
    body: String,
) -> Result<StatusCode, TtsError> {
    let prompt = request_text(path, query, body);
    if prompt.trim().is_empty() {
        return Ok(StatusCode::NO_CONTENT);
    }
    info!("HTTP /ask-llama: {}", preview(&prompt));

    let reply = state.chat.chat(&prompt).await?;
    info!("llama: {}", preview(&reply));

    let copy = deliverable(&state, &reply).await?;
    play_locally(&state, copy).await;
    Ok(StatusCode::NO_CONTENT)
}
