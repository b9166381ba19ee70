//! Shared types for the readit pipeline.
//!
//! Kept free of async and I/O so the control surface, the CLI and tests can
//! depend on them without pulling in tokio, reqwest or rodio.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::text_prep::DEFAULT_MAX_CHUNK_LEN;

// ─── Settings ──────────────────────────────────────────────────────────────

/// Suffix marking an endpoint that plays audio on the server itself.
const PLAY_ONLY_SUFFIX: &str = "/play";

/// User preferences read by the pipeline before every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Speaking rate, 0.5..=2.0.
    #[serde(default = "default_rate")]
    pub rate: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tts_url: Option<String>,
}

fn default_rate() -> f32 {
    1.0
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            voice: None,
            tts_url: None,
        }
    }
}

impl Settings {
    /// The configured TTS endpoint, if it is usable (non-blank).
    pub fn endpoint(&self) -> Option<&str> {
        self.tts_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// True when the endpoint plays audio server-side and answers with JSON.
    pub fn is_play_only(&self) -> bool {
        self.endpoint()
            .is_some_and(|url| url.ends_with(PLAY_ONLY_SUFFIX))
    }

    /// Overlay a partial update onto these settings.
    pub fn apply(&mut self, patch: SettingsPatch) {
        if let Some(rate) = patch.rate {
            self.rate = rate;
        }
        if let Some(voice) = patch.voice {
            self.voice = Some(voice).filter(|v| !v.is_empty());
        }
        if let Some(url) = patch.tts_url {
            self.tts_url = Some(url).filter(|u| !u.trim().is_empty());
        }
    }
}

/// Partial settings update. An empty string clears `voice` / `ttsUrl`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub rate: Option<f32>,
    pub voice: Option<String>,
    pub tts_url: Option<String>,
}

// ─── Pipeline configuration ──────────────────────────────────────────────

/// Tuning knobs for one coordinator.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Longest chunk sent to the TTS endpoint, in characters. Texts no
    /// longer than this take the single-shot path.
    pub max_chunk_len: usize,
    /// Most chunks fetched ahead of delivery at any time.
    pub prefetch_count: usize,
    /// How long one delivery may go unacknowledged before moving on.
    pub chunk_timeout: Duration,
    /// Wait granularity for audio availability.
    pub poll_interval: Duration,
    /// Wait granularity while paused.
    pub pause_poll_interval: Duration,
    /// Bound on pause/resume/stop signals to the playback sink.
    pub control_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_chunk_len: DEFAULT_MAX_CHUNK_LEN,
            prefetch_count: 2,
            chunk_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(100),
            pause_poll_interval: Duration::from_millis(200),
            control_timeout: Duration::from_secs(5),
        }
    }
}

// ─── Audio ───────────────────────────────────────────────────────────────

/// MIME type assumed when the endpoint omits `content-type`.
pub const DEFAULT_AUDIO_MIME: &str = "audio/wav";

/// Synthesized audio for one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPayload {
    pub bytes: Bytes,
    pub mime: String,
}

impl AudioPayload {
    pub fn new(bytes: impl Into<Bytes>, mime: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime: mime.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Messages understood by a playback surface. Each one is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkMessage {
    PlayAudio(AudioPayload),
    PauseSpeech,
    ResumeSpeech,
    StopSpeech,
}

impl SinkMessage {
    /// Wire name of the message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlayAudio(_) => "PLAY_AUDIO",
            Self::PauseSpeech => "PAUSE_SPEECH",
            Self::ResumeSpeech => "RESUME_SPEECH",
            Self::StopSpeech => "STOP_SPEECH",
        }
    }
}

// ─── Status ──────────────────────────────────────────────────────────────

/// Observable speech state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechState {
    Idle,
    Paused,
    Playing,
    Cancelled,
}

/// Status snapshot for UI polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechStatus {
    pub state: SpeechState,
    /// 1-based position of the chunk being delivered; 0 when idle.
    pub current: usize,
    pub total: usize,
}

impl SpeechStatus {
    pub fn idle() -> Self {
        Self {
            state: SpeechState::Idle,
            current: 0,
            total: 0,
        }
    }
}

// ─── Endpoint reports ────────────────────────────────────────────────────

/// Result of a connectivity probe against the TTS endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Answer of a play-only endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePlayback {
    pub played: bool,
    /// Raw JSON body, when the endpoint sent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<serde_json::Value>,
}
