//! Error types for the read-aloud engine.
//!
//! None of these cross the coordinator's public read/control operations:
//! they are logged and folded into a [`crate::reader::RunOutcome`].

use std::time::Duration;

/// Why a read produced less speech than requested.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// Settings carry no usable TTS URL.
    #[error("no ttsUrl configured")]
    NoEndpointConfigured,

    /// The TTS endpoint answered non-2xx or could not be reached.
    #[error("tts service error{}: {message}", .status.map(|s| format!(" {s}")).unwrap_or_default())]
    Upstream { status: Option<u16>, message: String },

    /// The playback surface did not acknowledge a chunk in time.
    #[error("chunk {index} not acknowledged within {timeout:?}")]
    DeliveryTimeout { index: usize, timeout: Duration },

    /// The playback surface and the fallback both refused the audio.
    #[error("audio delivery failed: {0}")]
    DeliveryFailure(String),

    /// There was no text to speak.
    #[error("empty text")]
    EmptyText,

    /// The page selection could not be read.
    #[error("failed to read selection: {0}")]
    Selection(String),
}

impl ReadError {
    pub(crate) fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }
}

/// Failures reported by a playback sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Nothing is listening on the other end of the sink.
    #[error("no playback surface is receiving")]
    NoReceiver,

    /// The surface dropped the message without acknowledging it.
    #[error("playback surface dropped the acknowledgement")]
    AckDropped,

    /// The surface received the audio but could not play it.
    #[error("playback failed: {0}")]
    Playback(String),

    /// No audio output could be opened.
    #[error("audio output unavailable: {0}")]
    Device(String),

    /// An external player could not be started.
    #[error("failed to start player: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Failures of a persistent settings store.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
