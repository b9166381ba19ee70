//! Playback sinks — where fetched audio goes to be heard.
//!
//! A sink accepts one [`SinkMessage`] at a time and resolves once the surface
//! acknowledges it. For `PLAY_AUDIO` that acknowledgement may only come when
//! the clip has finished, which is why the coordinator races it against a
//! per-chunk timeout.

use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use readit_core::types::SinkMessage;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::SinkError;

/// A surface that plays audio and obeys pause/resume/stop.
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    async fn send(&self, message: SinkMessage) -> Result<(), SinkError>;
}

// ─── Channel sink ──────────────────────────────────────────────────────────

/// Acknowledgement a surface sends back; `Err` carries its reason.
pub type Ack = Result<(), String>;

/// One message in flight to a playback surface.
pub struct SinkRequest {
    pub message: SinkMessage,
    pub ack: oneshot::Sender<Ack>,
}

/// Sink backed by a message channel to a playback surface.
///
/// The surface owns the receiving end; once it is gone every send fails with
/// [`SinkError::NoReceiver`].
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkRequest>,
}

impl ChannelSink {
    /// Create a sink and the receiver a surface should drain.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl PlaybackSink for ChannelSink {
    async fn send(&self, message: SinkMessage) -> Result<(), SinkError> {
        let kind = message.kind();
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(SinkRequest {
                message,
                ack: ack_tx,
            })
            .map_err(|_| SinkError::NoReceiver)?;

        debug!("sink: {kind} sent, awaiting ack");
        ack_rx
            .await
            .map_err(|_| SinkError::AckDropped)?
            .map_err(SinkError::Playback)
    }
}

// ─── Command sink ──────────────────────────────────────────────────────────

/// Fallback sink that pipes audio into an external player process.
///
/// Playback is fire-and-forget: `PLAY_AUDIO` resolves as soon as the player
/// has started. Pause and resume are not supported by a plain pipe and are
/// accepted as no-ops; stop kills the most recent player.
pub struct CommandSink {
    program: String,
    args: Vec<String>,
    current: Mutex<Option<Child>>,
}

impl CommandSink {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            current: Mutex::new(None),
        }
    }

    /// Build from a whitespace-separated command line, e.g. `"aplay -q"`.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(String::from);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    fn kill_current(&self) {
        let child = self.current.lock().ok().and_then(|mut guard| guard.take());
        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                debug!("command sink: kill failed: {e}");
            }
        }
    }
}

#[async_trait]
impl PlaybackSink for CommandSink {
    async fn send(&self, message: SinkMessage) -> Result<(), SinkError> {
        match message {
            SinkMessage::PlayAudio(audio) => {
                let mut child = Command::new(&self.program)
                    .args(&self.args)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn()?;

                if let Some(mut stdin) = child.stdin.take() {
                    let program = self.program.clone();
                    tokio::spawn(async move {
                        if let Err(e) = stdin.write_all(&audio.bytes).await {
                            warn!("command sink: writing to {program} failed: {e}");
                        }
                    });
                }

                debug!("command sink: started {} ({})", self.program, audio.mime);
                if let Ok(mut guard) = self.current.lock() {
                    *guard = Some(child);
                }
                Ok(())
            }
            SinkMessage::StopSpeech => {
                self.kill_current();
                Ok(())
            }
            SinkMessage::PauseSpeech | SinkMessage::ResumeSpeech => {
                debug!("command sink: {} ignored", message.kind());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use readit_core::types::AudioPayload;

    #[tokio::test]
    async fn channel_sink_resolves_on_ack() {
        let (sink, mut rx) = ChannelSink::new();
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                let ack = match req.message {
                    SinkMessage::PlayAudio(a) if a.is_empty() => Err("empty audio".to_string()),
                    _ => Ok(()),
                };
                let _ = req.ack.send(ack);
            }
        });

        sink.send(SinkMessage::PlayAudio(AudioPayload::new(vec![1u8], "audio/wav")))
            .await
            .unwrap();
        sink.send(SinkMessage::PauseSpeech).await.unwrap();

        let err = sink
            .send(SinkMessage::PlayAudio(AudioPayload::new(Vec::new(), "audio/wav")))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Playback(ref m) if m == "empty audio"));
    }

    #[tokio::test]
    async fn channel_sink_without_surface_fails() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        assert!(matches!(
            sink.send(SinkMessage::StopSpeech).await,
            Err(SinkError::NoReceiver)
        ));
    }

    #[tokio::test]
    async fn channel_sink_reports_dropped_ack() {
        let (sink, mut rx) = ChannelSink::new();
        tokio::spawn(async move {
            // Receive and drop without answering.
            let _ = rx.recv().await;
        });
        assert!(matches!(
            sink.send(SinkMessage::ResumeSpeech).await,
            Err(SinkError::AckDropped)
        ));
    }

    #[test]
    fn parses_command_line() {
        let sink = CommandSink::from_command_line("  aplay -q  ").unwrap();
        assert_eq!(sink.program, "aplay");
        assert_eq!(sink.args, vec!["-q"]);
        assert!(CommandSink::from_command_line("   ").is_none());
    }

    #[tokio::test]
    async fn command_sink_missing_program_is_spawn_error() {
        let sink = CommandSink::new("readit-no-such-player-binary", Vec::new());
        let err = sink
            .send(SinkMessage::PlayAudio(AudioPayload::new(vec![0u8; 4], "audio/wav")))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Spawn(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_sink_pipes_into_player() {
        let sink = CommandSink::new("cat", Vec::new());
        sink.send(SinkMessage::PlayAudio(AudioPayload::new(vec![1u8, 2, 3], "audio/wav")))
            .await
            .unwrap();
        sink.send(SinkMessage::PauseSpeech).await.unwrap();
        sink.send(SinkMessage::StopSpeech).await.unwrap();
        assert!(sink.current.lock().unwrap().is_none());
    }
}
