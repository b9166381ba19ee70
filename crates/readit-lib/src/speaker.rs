//! Local playback surface — rodio on a dedicated OS thread.
//!
//! rodio's `OutputStream` is `!Send`, so it lives on its own thread and is
//! driven through a [`ChannelSink`]. A `PLAY_AUDIO` acknowledgement is held
//! back until the clip has drained from the rodio sink (or is stopped), which
//! is what gives the coordinator its one-clip-at-a-time pacing.

use std::io::Cursor;
use std::time::Duration;

use readit_core::types::SinkMessage;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::error::SinkError;
use crate::sink::{Ack, ChannelSink, SinkRequest};

/// How often a playing clip is checked for completion.
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Open the default audio output on a playback thread and return the sink
/// that feeds it. Fails with [`SinkError::Device`] if no output can be opened.
pub async fn spawn_local_speaker() -> Result<ChannelSink, SinkError> {
    spawn_surface("readit-playback", open_output, playback_thread).await
}

/// Start a playback surface on its own OS thread.
///
/// `open` runs on that thread, so the device it returns never has to be
/// `Send`. The call resolves once `open` has finished.
async fn spawn_surface<D: 'static>(
    name: &str,
    open: fn() -> Result<D, String>,
    run: fn(D, UnboundedReceiver<SinkRequest>),
) -> Result<ChannelSink, SinkError> {
    let (sink, rx) = ChannelSink::new();
    let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();
    std::thread::Builder::new()
        .name(name.into())
        .spawn(move || match open() {
            Ok(device) => {
                let _ = ready_tx.send(Ok(()));
                run(device, rx);
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        })?;

    match ready_rx.await {
        Ok(Ok(())) => Ok(sink),
        Ok(Err(e)) => Err(SinkError::Device(e)),
        Err(_) => Err(SinkError::Device("playback thread exited".into())),
    }
}

struct Output {
    // Dropping the stream closes the device.
    _stream: OutputStream,
    handle: OutputStreamHandle,
    sink: Sink,
}

fn open_output() -> Result<Output, String> {
    let (stream, handle) =
        OutputStream::try_default().map_err(|e| format!("failed to open audio output: {e}"))?;
    let sink = Sink::try_new(&handle).map_err(|e| format!("failed to create sink: {e}"))?;
    Ok(Output {
        _stream: stream,
        handle,
        sink,
    })
}

fn playback_thread(output: Output, mut rx: UnboundedReceiver<SinkRequest>) {
    let Output {
        _stream,
        handle,
        mut sink,
    } = output;

    // Ack for the clip currently draining.
    let mut pending: Option<oneshot::Sender<Ack>> = None;

    loop {
        if pending.is_some() && sink.empty() {
            if let Some(ack) = pending.take() {
                debug!("playback: clip finished");
                let _ = ack.send(Ok(()));
            }
        }

        let request = if pending.is_some() {
            match rx.try_recv() {
                Ok(req) => req,
                Err(TryRecvError::Empty) => {
                    std::thread::sleep(DRAIN_POLL);
                    continue;
                }
                Err(TryRecvError::Disconnected) => break,
            }
        } else {
            match rx.blocking_recv() {
                Some(req) => req,
                None => break,
            }
        };

        match request.message {
            SinkMessage::PlayAudio(audio) => {
                let source = match Decoder::new(Cursor::new(audio.bytes)) {
                    Ok(source) => source,
                    Err(e) => {
                        let _ = request
                            .ack
                            .send(Err(format!("cannot decode {}: {e}", audio.mime)));
                        continue;
                    }
                };
                // A clip whose ack already timed out upstream is superseded;
                // the new one queues behind it.
                if let Some(previous) = pending.replace(request.ack) {
                    let _ = previous.send(Ok(()));
                }
                sink.append(source);
                sink.play();
                debug!("playback: clip appended ({})", audio.mime);
            }
            SinkMessage::PauseSpeech => {
                sink.pause();
                let _ = request.ack.send(Ok(()));
            }
            SinkMessage::ResumeSpeech => {
                sink.play();
                let _ = request.ack.send(Ok(()));
            }
            SinkMessage::StopSpeech => {
                sink.stop();
                if let Some(previous) = pending.take() {
                    let _ = previous.send(Ok(()));
                }
                let _ = request.ack.send(Ok(()));
                match new_sink(&handle) {
                    Some(fresh) => sink = fresh,
                    None => break,
                }
            }
        }
    }

    sink.stop();
    debug!("playback: surface closed");
}

fn new_sink(handle: &OutputStreamHandle) -> Option<Sink> {
    match Sink::try_new(handle) {
        Ok(sink) => Some(sink),
        Err(e) => {
            error!("playback: failed to create sink: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::PlaybackSink;

    fn no_device() -> Result<(), String> {
        Err("no default output device".into())
    }

    fn fake_device() -> Result<(), String> {
        Ok(())
    }

    fn ack_all(_device: (), mut rx: UnboundedReceiver<SinkRequest>) {
        while let Some(req) = rx.blocking_recv() {
            let _ = req.ack.send(Ok(()));
        }
    }

    #[tokio::test]
    async fn missing_device_is_reported_before_returning() {
        let err = spawn_surface("test-surface", no_device, ack_all)
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Device(ref m) if m.contains("no default output")));
    }

    #[tokio::test]
    async fn opened_surface_serves_requests() {
        let sink = spawn_surface("test-surface", fake_device, ack_all)
            .await
            .unwrap();
        sink.send(SinkMessage::PauseSpeech).await.unwrap();
        sink.send(SinkMessage::StopSpeech).await.unwrap();
    }
}
