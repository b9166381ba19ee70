//! Shared mocks for the engine integration tests.
//!
//! The fetcher echoes the chunk text back as the "audio" bytes, so whatever
//! reaches the sink can be mapped back to the chunk it came from.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use readit_lib::error::{ReadError, SinkError};
use readit_lib::fetch::AudioFetcher;
use readit_lib::reader::ReaderEngine;
use readit_lib::readit_core::types::{
    AudioPayload, PipelineConfig, ProbeReport, RemotePlayback, Settings, SinkMessage,
};
use readit_lib::settings::MemorySettings;
use readit_lib::sink::PlaybackSink;

pub const TTS_URL: &str = "http://tts.invalid/api/tts";

/// Sentences of ~30 chars; with `max_chunk_len = 40` each becomes a chunk.
pub fn sentences(n: usize) -> String {
    (0..n)
        .map(|i| format!("This is sentence number {i:03}."))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        max_chunk_len: 40,
        prefetch_count: 2,
        chunk_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(5),
        pause_poll_interval: Duration::from_millis(5),
        control_timeout: Duration::from_secs(1),
    }
}

pub fn settings(url: Option<&str>) -> Arc<MemorySettings> {
    Arc::new(MemorySettings::new(Settings {
        rate: 1.0,
        voice: Some("test-voice".into()),
        tts_url: url.map(String::from),
    }))
}

// ─── Fetcher ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockFetcher {
    fetched: Mutex<Vec<String>>,
    remote_calls: AtomicUsize,
    /// Chunk text → extra latency for that fetch.
    delays: Mutex<HashMap<String, Duration>>,
    /// Fail the fetch with this zero-based call number.
    fail_on_call: Mutex<Option<usize>>,
    /// Deliveries completed so far, shared with a [`RecordingSink`].
    delivered: Mutex<Option<Arc<AtomicUsize>>>,
    max_ahead: AtomicUsize,
}

impl MockFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_on_call(&self, n: usize) {
        *self.fail_on_call.lock().unwrap() = Some(n);
    }

    pub fn delay(&self, text: &str, by: Duration) {
        self.delays.lock().unwrap().insert(text.to_string(), by);
    }

    pub fn track_window(&self, sink: &RecordingSink) {
        *self.delivered.lock().unwrap() = Some(sink.completed.clone());
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn remote_calls(&self) -> usize {
        self.remote_calls.load(Ordering::SeqCst)
    }

    /// Largest fetched-minus-delivered count seen once a fetch lands.
    pub fn max_ahead(&self) -> usize {
        self.max_ahead.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioFetcher for MockFetcher {
    async fn fetch_audio(&self, text: &str, _voice: Option<&str>) -> Result<AudioPayload, ReadError> {
        let call = {
            let mut fetched = self.fetched.lock().unwrap();
            fetched.push(text.to_string());
            fetched.len() - 1
        };
        if let Some(delivered) = self.delivered.lock().unwrap().as_ref() {
            let ahead = (call + 1).saturating_sub(delivered.load(Ordering::SeqCst));
            self.max_ahead.fetch_max(ahead, Ordering::SeqCst);
        }

        let delay = self.delays.lock().unwrap().get(text).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if *self.fail_on_call.lock().unwrap() == Some(call) {
            return Err(ReadError::Upstream {
                status: Some(500),
                message: "synthesis exploded".into(),
            });
        }
        Ok(AudioPayload::new(text.as_bytes().to_vec(), "audio/wav"))
    }

    async fn play_remote(
        &self,
        _text: &str,
        _voice: Option<&str>,
    ) -> Result<RemotePlayback, ReadError> {
        self.remote_calls.fetch_add(1, Ordering::SeqCst);
        Ok(RemotePlayback {
            played: true,
            info: None,
        })
    }

    async fn probe(&self) -> ProbeReport {
        ProbeReport {
            ok: true,
            status: Some(200),
            error: None,
        }
    }
}

// ─── Sink ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayBehavior {
    /// Acknowledge after the delay.
    Ack(Duration),
    /// Never acknowledge `PLAY_AUDIO`.
    Hang,
    /// Reject `PLAY_AUDIO` as if no surface were listening.
    Reject,
    /// Reject `PLAY_AUDIO` after the delay.
    RejectAfter(Duration),
}

pub struct RecordingSink {
    behavior: Mutex<PlayBehavior>,
    log: Mutex<Vec<SinkMessage>>,
    completed: Arc<AtomicUsize>,
}

impl RecordingSink {
    pub fn new(behavior: PlayBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            log: Mutex::new(Vec::new()),
            completed: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn set_behavior(&self, behavior: PlayBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.log.lock().unwrap().iter().map(SinkMessage::kind).collect()
    }

    /// Text of every `PLAY_AUDIO` payload, in arrival order.
    pub fn played(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m {
                SinkMessage::PlayAudio(a) => Some(String::from_utf8_lossy(&a.bytes).into_owned()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaybackSink for RecordingSink {
    async fn send(&self, message: SinkMessage) -> Result<(), SinkError> {
        let is_play = matches!(message, SinkMessage::PlayAudio(_));
        self.log.lock().unwrap().push(message);
        if !is_play {
            return Ok(());
        }

        let behavior = *self.behavior.lock().unwrap();
        match behavior {
            PlayBehavior::Ack(delay) => {
                tokio::time::sleep(delay).await;
                self.completed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            PlayBehavior::Hang => std::future::pending().await,
            PlayBehavior::Reject => Err(SinkError::NoReceiver),
            PlayBehavior::RejectAfter(delay) => {
                tokio::time::sleep(delay).await;
                Err(SinkError::NoReceiver)
            }
        }
    }
}

// ─── Helpers ───────────────────────────────────────────────────────────────

pub fn engine(fetcher: &Arc<MockFetcher>, sink: &Arc<RecordingSink>) -> ReaderEngine {
    ReaderEngine::builder(settings(Some(TTS_URL)), fetcher.clone(), sink.clone())
        .config(fast_config())
        .build()
}

/// Poll until `cond` holds or a generous deadline passes.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Assert the played texts are exactly `expected`, with no repeats.
pub fn assert_played_in_order(played: &[String], expected: &[String]) {
    assert_eq!(played, expected);
    let unique: HashSet<_> = played.iter().collect();
    assert_eq!(unique.len(), played.len(), "a chunk was delivered twice");
}
