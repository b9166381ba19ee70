//! Session state — the one shared record of an in-flight read.
//!
//! A session is created per read, shared by the producer and consumer of its
//! run and by the control operations, and dropped when the run ends. Every
//! mutation goes through a short `std::sync::Mutex` critical section that is
//! never held across an `.await`; waiters are woken through a [`Notify`] and
//! otherwise re-check at their poll interval.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use readit_core::types::{AudioPayload, SpeechState, SpeechStatus};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Flags {
    current_index: usize,
    cancel_requested: bool,
    paused: bool,
    /// Prefetch window: fetched audio not yet handed to the sink.
    fetched: BTreeMap<usize, AudioPayload>,
    /// A payload has left the window but its hand-off has not resolved.
    delivering: bool,
    producer_done: bool,
}

#[derive(Debug)]
pub(crate) struct Session {
    id: u64,
    chunks: Vec<String>,
    flags: Mutex<Flags>,
    changed: Notify,
}

impl Session {
    pub(crate) fn new(id: u64, chunks: Vec<String>) -> Self {
        Self {
            id,
            chunks,
            flags: Mutex::new(Flags::default()),
            changed: Notify::new(),
        }
    }

    fn flags(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` under the lock and wake every waiter.
    fn update<T>(&self, f: impl FnOnce(&mut Flags) -> T) -> T {
        let out = f(&mut self.flags());
        self.changed.notify_waiters();
        out
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn chunk(&self, index: usize) -> &str {
        &self.chunks[index]
    }

    pub(crate) fn len(&self) -> usize {
        self.chunks.len()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.flags().cancel_requested
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.flags().paused
    }

    /// Request cancellation. Also clears `paused` so nothing stays parked.
    pub(crate) fn cancel(&self) {
        self.update(|f| {
            f.cancel_requested = true;
            f.paused = false;
        });
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.update(|f| f.paused = paused);
    }

    /// Move the delivery position forward. Never regresses, never passes
    /// the end of the chunk list.
    pub(crate) fn advance_to(&self, index: usize) {
        let end = self.chunks.len();
        self.update(|f| f.current_index = f.current_index.max(index).min(end));
    }

    #[cfg(test)]
    pub(crate) fn current_index(&self) -> usize {
        self.flags().current_index
    }

    /// Fetched-but-undelivered chunk count, including one mid hand-off.
    pub(crate) fn undelivered(&self) -> usize {
        let f = self.flags();
        f.fetched.len() + usize::from(f.delivering)
    }

    pub(crate) fn store(&self, index: usize, audio: AudioPayload) {
        self.update(|f| f.fetched.insert(index, audio));
    }

    /// Take chunk `index` out of the window for delivery.
    pub(crate) fn take(&self, index: usize) -> Option<AudioPayload> {
        self.update(|f| {
            let audio = f.fetched.remove(&index);
            f.delivering |= audio.is_some();
            audio
        })
    }

    pub(crate) fn finish_delivery(&self) {
        self.update(|f| f.delivering = false);
    }

    pub(crate) fn mark_producer_done(&self) {
        self.update(|f| f.producer_done = true);
    }

    pub(crate) fn producer_done(&self) -> bool {
        self.flags().producer_done
    }

    /// Drop any audio still held in the window.
    pub(crate) fn release(&self) {
        self.update(|f| f.fetched.clear());
    }

    /// Sleep until the state changes or `poll` elapses, whichever is first.
    pub(crate) async fn wait(&self, poll: Duration) {
        tokio::select! {
            () = self.changed.notified() => {}
            () = tokio::time::sleep(poll) => {}
        }
    }

    pub(crate) fn status(&self) -> SpeechStatus {
        let f = self.flags();
        let state = if f.cancel_requested {
            SpeechState::Cancelled
        } else if f.paused {
            SpeechState::Paused
        } else {
            SpeechState::Playing
        };
        SpeechStatus {
            state,
            current: (f.current_index + 1).min(self.chunks.len()),
            total: self.chunks.len(),
        }
    }
}
