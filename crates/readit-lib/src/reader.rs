//! Read-aloud engine — chunked fetch-ahead with strictly ordered playback.
//!
//! Pipeline for one read:
//!
//! ```text
//! read(source) → resolve text → settings
//!     ├─ play-only endpoint → one POST, server speaks it
//!     ├─ short text         → fetch → deliver
//!     └─ long text          → split_into_chunks
//!            producer: fetch chunk i (at most prefetch_count ahead) ─┐
//!            consumer: wait for chunk i → PLAY_AUDIO (timeout) ──────┘ joined
//! ```
//!
//! Producer and consumer are two futures joined inside one task, so they
//! interleave only at `.await` points. Both watch the session's cancel flag
//! and stop at their next checkpoint.
//!
//! A fetch failure cancels the whole run rather than leaving a gap in the
//! spoken text. A delivery that is not acknowledged within `chunk_timeout`
//! is logged and skipped past. A delivery the sink rejects goes to the
//! fallback sink once; if that fails too the run is cancelled.
//!
//! Starting a read supersedes the active one. Only the active run may send
//! the closing `STOP_SPEECH`, so a superseded run never silences its successor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use readit_core::text_prep::split_into_chunks;
use readit_core::types::{
    AudioPayload, PipelineConfig, ProbeReport, RemotePlayback, SinkMessage, SpeechStatus,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ReadError;
use crate::fetch::AudioFetcher;
use crate::selection::SelectionSource;
use crate::session::Session;
use crate::settings::SettingsProvider;
use crate::sink::PlaybackSink;

/// What to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadSource {
    Text(String),
    /// The current selection, resolved by the configured [`SelectionSource`].
    Selection,
}

/// How a read ended. Informational only: every failure has been logged.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every chunk was handed to the sink.
    Completed { chunks: usize },
    /// Cancelled by the user or superseded by a newer read.
    Cancelled,
    /// Nothing to read.
    Skipped,
    /// A play-only endpoint took the whole text.
    PlayedRemotely(RemotePlayback),
    /// The run stopped early on an error.
    Failed(ReadError),
}

/// Result of [`ReaderEngine::synthesize`].
#[derive(Debug)]
pub enum Synthesized {
    Audio(AudioPayload),
    Remote(RemotePlayback),
}

/// Cloneable handle to the read-aloud engine.
#[derive(Clone)]
pub struct ReaderEngine {
    inner: Arc<Inner>,
}

struct Inner {
    config: PipelineConfig,
    settings: Arc<dyn SettingsProvider>,
    fetcher: Arc<dyn AudioFetcher>,
    sink: Arc<dyn PlaybackSink>,
    fallback: Option<Arc<dyn PlaybackSink>>,
    selection: Option<Arc<dyn SelectionSource>>,
    active: Mutex<Option<Arc<Session>>>,
    next_id: AtomicU64,
}

/// Builder for [`ReaderEngine`].
pub struct ReaderEngineBuilder {
    config: PipelineConfig,
    settings: Arc<dyn SettingsProvider>,
    fetcher: Arc<dyn AudioFetcher>,
    sink: Arc<dyn PlaybackSink>,
    fallback: Option<Arc<dyn PlaybackSink>>,
    selection: Option<Arc<dyn SelectionSource>>,
}

impl ReaderEngineBuilder {
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sink tried once when the primary sink rejects a chunk.
    pub fn fallback(mut self, sink: Arc<dyn PlaybackSink>) -> Self {
        self.fallback = Some(sink);
        self
    }

    pub fn selection(mut self, source: Arc<dyn SelectionSource>) -> Self {
        self.selection = Some(source);
        self
    }

    pub fn build(self) -> ReaderEngine {
        ReaderEngine {
            inner: Arc::new(Inner {
                config: self.config,
                settings: self.settings,
                fetcher: self.fetcher,
                sink: self.sink,
                fallback: self.fallback,
                selection: self.selection,
                active: Mutex::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }
}

impl ReaderEngine {
    pub fn builder(
        settings: Arc<dyn SettingsProvider>,
        fetcher: Arc<dyn AudioFetcher>,
        sink: Arc<dyn PlaybackSink>,
    ) -> ReaderEngineBuilder {
        ReaderEngineBuilder {
            config: PipelineConfig::default(),
            settings,
            fetcher,
            sink,
            fallback: None,
            selection: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn settings(&self) -> &Arc<dyn SettingsProvider> {
        &self.inner.settings
    }

    // ─── Control operations ──────────────────────────────────────────────

    /// Start reading in the background. The handle may be dropped.
    pub fn start_read(&self, source: ReadSource) -> JoinHandle<RunOutcome> {
        let engine = self.clone();
        tokio::spawn(async move { engine.read(source).await })
    }

    /// Pause fetching and delivery, and tell the sink to pause. Idempotent.
    pub async fn pause(&self) {
        if let Some(session) = self.current() {
            session.set_paused(true);
            info!("read {}: paused", session.id());
        }
        self.signal(SinkMessage::PauseSpeech).await;
    }

    /// Undo [`pause`](Self::pause). Idempotent.
    pub async fn resume(&self) {
        if let Some(session) = self.current() {
            session.set_paused(false);
            info!("read {}: resumed", session.id());
        }
        self.signal(SinkMessage::ResumeSpeech).await;
    }

    /// Cancel the active read, if any, and stop the sink. Idempotent.
    pub async fn cancel(&self) {
        let session = self.active().take();
        if let Some(session) = session {
            session.cancel();
            info!("read {}: cancelled", session.id());
        }
        self.signal(SinkMessage::StopSpeech).await;
    }

    pub fn status(&self) -> SpeechStatus {
        self.current()
            .map_or_else(SpeechStatus::idle, |session| session.status())
    }

    /// Check the configured endpoint.
    pub async fn probe(&self) -> ProbeReport {
        self.inner.fetcher.probe().await
    }

    /// Synthesize `text` in one request without playing it.
    pub async fn synthesize(&self, text: &str) -> Result<Synthesized, ReadError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ReadError::EmptyText);
        }
        let settings = self.inner.settings.settings().await;
        if settings.endpoint().is_none() {
            return Err(ReadError::NoEndpointConfigured);
        }
        let voice = settings.voice.as_deref();
        if settings.is_play_only() {
            self.inner
                .fetcher
                .play_remote(text, voice)
                .await
                .map(Synthesized::Remote)
        } else {
            self.inner
                .fetcher
                .fetch_audio(text, voice)
                .await
                .map(Synthesized::Audio)
        }
    }

    // ─── Read ────────────────────────────────────────────────────────────

    /// Read `source` aloud and wait for the run to end.
    pub async fn read(&self, source: ReadSource) -> RunOutcome {
        let text = match self.resolve(source).await {
            Ok(text) => text,
            Err(e) => {
                warn!("read: {e}");
                return RunOutcome::Failed(e);
            }
        };
        let text = text.trim();
        if text.is_empty() {
            debug!("read: nothing to read");
            return RunOutcome::Skipped;
        }

        let settings = self.inner.settings.settings().await;
        if settings.endpoint().is_none() {
            warn!("read: no ttsUrl configured; nothing will be spoken");
            return RunOutcome::Failed(ReadError::NoEndpointConfigured);
        }
        let voice = settings.voice.as_deref();

        if settings.is_play_only() {
            self.supersede().await;
            return match self.inner.fetcher.play_remote(text, voice).await {
                Ok(remote) => {
                    info!("read: server-side playback (played={})", remote.played);
                    RunOutcome::PlayedRemotely(remote)
                }
                Err(e) => {
                    warn!("read: play-only POST failed: {e}");
                    RunOutcome::Failed(e)
                }
            };
        }

        let max_len = self.inner.config.max_chunk_len;
        let short = text.chars().count() <= max_len;
        let chunks = if short {
            vec![text.to_string()]
        } else {
            split_into_chunks(text, max_len)
        };

        let session = self.begin(chunks).await;
        info!(
            "read {}: {} chunk(s), {} chars",
            session.id(),
            session.len(),
            text.chars().count()
        );

        let outcome = if short {
            self.read_short(&session, voice).await
        } else {
            self.run_pipeline(&session, voice).await
        };

        self.finish(&session).await;
        debug!("read {}: {outcome:?}", session.id());
        outcome
    }

    async fn resolve(&self, source: ReadSource) -> Result<String, ReadError> {
        match source {
            ReadSource::Text(text) => Ok(text),
            ReadSource::Selection => match &self.inner.selection {
                Some(selection) => selection.selection().await,
                None => Err(ReadError::Selection(
                    "no selection source configured".into(),
                )),
            },
        }
    }

    /// Single fetch-and-deliver for text that fits in one chunk.
    async fn read_short(&self, session: &Session, voice: Option<&str>) -> RunOutcome {
        let audio = match self.inner.fetcher.fetch_audio(session.chunk(0), voice).await {
            Ok(audio) => audio,
            Err(e) => {
                // Nothing reached the sink yet; no STOP_SPEECH.
                warn!("read {}: fetch failed: {e}", session.id());
                return RunOutcome::Failed(e);
            }
        };

        while session.is_paused() && !session.is_cancelled() {
            session.wait(self.inner.config.pause_poll_interval).await;
        }
        if session.is_cancelled() {
            return RunOutcome::Cancelled;
        }

        match self.deliver(session, 0, audio).await {
            Ok(()) => RunOutcome::Completed { chunks: 1 },
            Err(e) => {
                warn!("read {}: {e}", session.id());
                session.cancel();
                RunOutcome::Failed(e)
            }
        }
    }

    async fn run_pipeline(&self, session: &Session, voice: Option<&str>) -> RunOutcome {
        let (produced, consumed) = tokio::join!(
            self.produce(session, voice),
            self.consume(session)
        );

        if let Err(e) = produced.and(consumed) {
            return RunOutcome::Failed(e);
        }
        if session.is_cancelled() {
            RunOutcome::Cancelled
        } else {
            RunOutcome::Completed {
                chunks: session.len(),
            }
        }
    }

    /// Fetch chunks in index order, staying at most `prefetch_count` ahead.
    async fn produce(&self, session: &Session, voice: Option<&str>) -> Result<(), ReadError> {
        let result = self.produce_all(session, voice).await;
        session.mark_producer_done();
        result
    }

    async fn produce_all(&self, session: &Session, voice: Option<&str>) -> Result<(), ReadError> {
        let config = &self.inner.config;
        let window = config.prefetch_count.max(1);

        for index in 0..session.len() {
            loop {
                if session.is_cancelled() {
                    return Ok(());
                }
                if session.is_paused() {
                    session.wait(config.pause_poll_interval).await;
                } else if session.undelivered() >= window {
                    session.wait(config.poll_interval).await;
                } else {
                    break;
                }
            }

            match self.inner.fetcher.fetch_audio(session.chunk(index), voice).await {
                Ok(audio) => {
                    if session.is_cancelled() {
                        return Ok(());
                    }
                    debug!("read {}: fetched chunk {index}", session.id());
                    session.store(index, audio);
                }
                Err(e) => {
                    warn!(
                        "read {}: fetch of chunk {index} failed: {e}; aborting run",
                        session.id()
                    );
                    session.cancel();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Deliver chunks to the sink strictly in index order.
    async fn consume(&self, session: &Session) -> Result<(), ReadError> {
        let config = &self.inner.config;

        for index in 0..session.len() {
            session.advance_to(index);

            let audio = loop {
                if session.is_cancelled() {
                    return Ok(());
                }
                if session.is_paused() {
                    session.wait(config.pause_poll_interval).await;
                    continue;
                }
                if let Some(audio) = session.take(index) {
                    break audio;
                }
                if session.producer_done() {
                    // The producer stopped early and has logged why.
                    debug!("read {}: no audio for chunk {index}", session.id());
                    session.cancel();
                    return Ok(());
                }
                session.wait(config.poll_interval).await;
            };

            let delivered = self.deliver(session, index, audio).await;
            session.finish_delivery();
            if let Err(e) = delivered {
                warn!("read {}: {e}; aborting run", session.id());
                session.cancel();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Hand one chunk to the sink, racing the acknowledgement against
    /// `chunk_timeout`. The payload is dropped when this returns.
    async fn deliver(
        &self,
        session: &Session,
        index: usize,
        audio: AudioPayload,
    ) -> Result<(), ReadError> {
        let timeout = self.inner.config.chunk_timeout;
        debug!(
            "read {}: delivering chunk {index} ({} bytes)",
            session.id(),
            audio.len()
        );

        let primary = tokio::time::timeout(
            timeout,
            self.inner.sink.send(SinkMessage::PlayAudio(audio.clone())),
        )
        .await;

        let rejected = match primary {
            Ok(Ok(())) => return Ok(()),
            Err(_) => {
                let e = ReadError::DeliveryTimeout { index, timeout };
                warn!("read {}: {e}; proceeding", session.id());
                return Ok(());
            }
            Ok(Err(e)) => e,
        };

        if session.is_cancelled() {
            debug!(
                "read {}: sink rejected chunk {index} after cancel ({rejected})",
                session.id()
            );
            return Ok(());
        }
        let Some(fallback) = &self.inner.fallback else {
            return Err(ReadError::DeliveryFailure(rejected.to_string()));
        };
        warn!(
            "read {}: sink rejected chunk {index} ({rejected}); trying fallback",
            session.id()
        );

        match tokio::time::timeout(timeout, fallback.send(SinkMessage::PlayAudio(audio))).await {
            Ok(Ok(())) => Ok(()),
            Err(_) => {
                let e = ReadError::DeliveryTimeout { index, timeout };
                warn!("read {}: fallback {e}; proceeding", session.id());
                Ok(())
            }
            Ok(Err(e)) => Err(ReadError::DeliveryFailure(format!(
                "{rejected}; fallback: {e}"
            ))),
        }
    }

    // ─── Session bookkeeping ─────────────────────────────────────────────

    fn active(&self) -> MutexGuard<'_, Option<Arc<Session>>> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> Option<Arc<Session>> {
        self.active().clone()
    }

    /// Install a fresh session, cancelling and silencing any previous one.
    async fn begin(&self, chunks: Vec<String>) -> Arc<Session> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(Session::new(id, chunks));
        let previous = self.active().replace(session.clone());
        if let Some(previous) = previous {
            previous.cancel();
            info!("read {}: superseded by read {id}", previous.id());
            self.signal(SinkMessage::StopSpeech).await;
        }
        session
    }

    /// Cancel and silence the active session without installing a new one.
    async fn supersede(&self) {
        let previous = self.active().take();
        if let Some(previous) = previous {
            previous.cancel();
            info!("read {}: superseded", previous.id());
            self.signal(SinkMessage::StopSpeech).await;
        }
    }

    /// Tear down after a run. Sends `STOP_SPEECH` only if this run cancelled
    /// itself; external cancels and supersedes have already sent theirs.
    async fn finish(&self, session: &Arc<Session>) {
        session.release();
        let was_active = {
            let mut active = self.active();
            let is_this = active.as_ref().is_some_and(|s| s.id() == session.id());
            if is_this {
                *active = None;
            }
            is_this
        };
        if was_active && session.is_cancelled() {
            self.signal(SinkMessage::StopSpeech).await;
        }
    }

    /// Send a control message to the sink (and `STOP_SPEECH` to the
    /// fallback too). Failures are logged, never returned.
    async fn signal(&self, message: SinkMessage) {
        let timeout = self.inner.config.control_timeout;
        let kind = message.kind();

        if matches!(message, SinkMessage::StopSpeech) {
            if let Some(fallback) = &self.inner.fallback {
                if let Ok(Err(e)) =
                    tokio::time::timeout(timeout, fallback.send(SinkMessage::StopSpeech)).await
                {
                    debug!("fallback sink: {kind} failed: {e}");
                }
            }
        }

        match tokio::time::timeout(timeout, self.inner.sink.send(message)).await {
            Ok(Ok(())) => debug!("sink: {kind} acknowledged"),
            Ok(Err(e)) => warn!("sink: {kind} failed: {e}"),
            Err(_) => warn!("sink: {kind} not acknowledged within {timeout:?}"),
        }
    }
}
