//! Audio fetcher — one POST to the configured TTS endpoint per chunk.
//!
//! The endpoint URL is read from settings on every call, so a settings change
//! applies to the next chunk without rebuilding anything. No retries here:
//! the coordinator decides what a failure means for the run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use futures_util::StreamExt;
use readit_core::types::{AudioPayload, DEFAULT_AUDIO_MIME, ProbeReport, RemotePlayback};
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ReadError;
use crate::settings::SettingsProvider;

/// Text sent by [`AudioFetcher::probe`].
const PROBE_TEXT: &str = "test";

/// Upper bound on one upstream request, body included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Source of synthesized audio.
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    /// Synthesize `text`. `voice` overrides the configured voice.
    async fn fetch_audio(&self, text: &str, voice: Option<&str>) -> Result<AudioPayload, ReadError>;

    /// Ask a play-only endpoint to speak `text` itself.
    async fn play_remote(&self, text: &str, voice: Option<&str>)
    -> Result<RemotePlayback, ReadError>;

    /// Check that the endpoint answers at all.
    async fn probe(&self) -> ProbeReport;
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<&'a str>,
}

/// [`AudioFetcher`] over HTTP.
pub struct HttpFetcher {
    client: reqwest::Client,
    settings: Arc<dyn SettingsProvider>,
}

impl HttpFetcher {
    pub fn new(settings: Arc<dyn SettingsProvider>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!("fetch: client builder failed ({e}); using defaults");
                reqwest::Client::new()
            });
        Self { client, settings }
    }

    /// POST `{ text, voice }` and return the response if it is 2xx.
    async fn post(&self, text: &str, voice: Option<&str>) -> Result<reqwest::Response, ReadError> {
        let settings = self.settings.settings().await;
        let url = settings.endpoint().ok_or(ReadError::NoEndpointConfigured)?;
        let voice = voice.or(settings.voice.as_deref());

        debug!("fetch: POST {} chars to {url}", text.chars().count());

        let resp = self
            .client
            .post(url)
            .json(&SpeechRequest { text, voice })
            .send()
            .await
            .map_err(|e| ReadError::upstream(None, format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ReadError::upstream(Some(status.as_u16()), body));
        }
        Ok(resp)
    }
}

#[async_trait]
impl AudioFetcher for HttpFetcher {
    async fn fetch_audio(&self, text: &str, voice: Option<&str>) -> Result<AudioPayload, ReadError> {
        let resp = self.post(text, voice).await?;

        let mime = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_AUDIO_MIME)
            .to_string();

        let capacity = resp
            .content_length()
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0);
        let mut body = BytesMut::with_capacity(capacity);
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| ReadError::upstream(None, format!("body stream error: {e}")))?;
            body.extend_from_slice(&chunk);
        }

        debug!("fetch: {} bytes of {mime}", body.len());
        Ok(AudioPayload::new(body.freeze(), mime))
    }

    async fn play_remote(
        &self,
        text: &str,
        voice: Option<&str>,
    ) -> Result<RemotePlayback, ReadError> {
        let resp = self.post(text, voice).await?;
        let info = resp.json::<serde_json::Value>().await.ok();
        let played = info
            .as_ref()
            .and_then(|v| v.get("played"))
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        Ok(RemotePlayback { played, info })
    }

    async fn probe(&self) -> ProbeReport {
        match self.post(PROBE_TEXT, None).await {
            Ok(resp) => ProbeReport {
                ok: true,
                status: Some(resp.status().as_u16()),
                error: None,
            },
            Err(ReadError::Upstream {
                status: Some(status),
                ..
            }) => ProbeReport {
                ok: false,
                status: Some(status),
                error: None,
            },
            Err(e) => ProbeReport {
                ok: false,
                status: None,
                error: Some(e.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::Router;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use readit_core::types::Settings;

    use crate::settings::MemorySettings;

    #[derive(serde::Deserialize)]
    struct EchoRequest {
        text: String,
        voice: Option<String>,
    }

    async fn echo(axum::Json(req): axum::Json<EchoRequest>) -> Response {
        let voice = req.voice.unwrap_or_else(|| "-".into());
        (
            [(CONTENT_TYPE, "audio/mpeg")],
            format!("{voice}:{}", req.text),
        )
            .into_response()
    }

    async fn bare() -> Response {
        Response::new(Body::from(vec![9u8, 8, 7]))
    }

    async fn played() -> Response {
        axum::Json(serde_json::json!({ "played": true })).into_response()
    }

    async fn broken() -> Response {
        (StatusCode::SERVICE_UNAVAILABLE, "warming up").into_response()
    }

    async fn spawn_tts() -> String {
        let app = Router::new()
            .route("/api/tts", post(echo))
            .route("/bare", post(bare))
            .route("/api/tts/play", post(played))
            .route("/broken", post(broken));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn fetcher(url: Option<String>, voice: Option<&str>) -> HttpFetcher {
        HttpFetcher::new(Arc::new(MemorySettings::new(Settings {
            rate: 1.0,
            voice: voice.map(String::from),
            tts_url: url,
        })))
    }

    #[tokio::test]
    async fn fetches_audio_with_content_type() {
        let base = spawn_tts().await;
        let f = fetcher(Some(format!("{base}/api/tts")), Some("af_heart"));

        let audio = f.fetch_audio("hello", None).await.unwrap();
        assert_eq!(audio.mime, "audio/mpeg");
        assert_eq!(&audio.bytes[..], b"af_heart:hello");

        let audio = f.fetch_audio("hello", Some("override")).await.unwrap();
        assert_eq!(&audio.bytes[..], b"override:hello");
    }

    #[tokio::test]
    async fn omits_voice_when_unset() {
        let base = spawn_tts().await;
        let audio = fetcher(Some(format!("{base}/api/tts")), None)
            .fetch_audio("hi", None)
            .await
            .unwrap();
        assert_eq!(&audio.bytes[..], b"-:hi");
    }

    #[tokio::test]
    async fn defaults_mime_to_wav() {
        let base = spawn_tts().await;
        let audio = fetcher(Some(format!("{base}/bare")), None)
            .fetch_audio("x", None)
            .await
            .unwrap();
        assert_eq!(audio.mime, DEFAULT_AUDIO_MIME);
        assert_eq!(audio.len(), 3);
    }

    #[tokio::test]
    async fn no_endpoint_fails_without_request() {
        let err = fetcher(None, None).fetch_audio("x", None).await.unwrap_err();
        assert!(matches!(err, ReadError::NoEndpointConfigured));
    }

    #[tokio::test]
    async fn non_success_is_upstream_error() {
        let base = spawn_tts().await;
        let err = fetcher(Some(format!("{base}/broken")), None)
            .fetch_audio("x", None)
            .await
            .unwrap_err();
        match err {
            ReadError::Upstream { status, message } => {
                assert_eq!(status, Some(503));
                assert_eq!(message, "warming up");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_is_upstream_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = fetcher(Some(format!("http://{addr}/api/tts")), None)
            .fetch_audio("x", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReadError::Upstream { status: None, .. }));
    }

    #[tokio::test]
    async fn play_remote_reads_played_flag() {
        let base = spawn_tts().await;
        let outcome = fetcher(Some(format!("{base}/api/tts/play")), None)
            .play_remote("hello", None)
            .await
            .unwrap();
        assert!(outcome.played);
        assert!(outcome.info.is_some());
    }

    #[tokio::test]
    async fn probe_reports_status() {
        let base = spawn_tts().await;
        let ok = fetcher(Some(format!("{base}/api/tts")), None).probe().await;
        assert_eq!(ok, ProbeReport { ok: true, status: Some(200), error: None });

        let down = fetcher(Some(format!("{base}/broken")), None).probe().await;
        assert_eq!(down.status, Some(503));
        assert!(!down.ok);

        let unset = fetcher(None, None).probe().await;
        assert_eq!(unset.error.as_deref(), Some("no ttsUrl configured"));
    }
}
