//! readit CLI — read-aloud server and its remote control.
//!
//! ```text
//! readit serve [--port 2004] [--tts-url http://localhost:8880/api/tts] [--voice af_bella]
//! readit read "some long text" [--server http://localhost:2004]
//! readit read-selection / pause / resume / cancel / status / probe [--server ...]
//! readit synth "hello" --out hello.wav
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use readit_lib::fetch::HttpFetcher;
use readit_lib::reader::ReaderEngine;
use readit_lib::readit_core::text_prep::DEFAULT_MAX_CHUNK_LEN;
use readit_lib::readit_core::types::{PipelineConfig, Settings};
use readit_lib::selection::CommandSelection;
use readit_lib::server::{DEFAULT_PORT, router};
use readit_lib::settings::{FileSettings, MemorySettings, SettingsProvider};
use readit_lib::sink::{CommandSink, PlaybackSink};
use readit_lib::speaker::spawn_local_speaker;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_SERVER: &str = "http://localhost:2004";

/// readit — chunked text-to-speech reader
#[derive(Parser)]
#[command(name = "readit", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the readit server
    Serve {
        /// Listen port
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Listen host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// TTS endpoint; a URL ending in /play speaks server-side
        #[arg(long, env = "READIT_TTS_URL")]
        tts_url: Option<String>,
        /// Default voice
        #[arg(long, env = "READIT_VOICE")]
        voice: Option<String>,
        /// Persist settings to this JSON file
        #[arg(long, env = "READIT_SETTINGS")]
        settings: Option<PathBuf>,
        /// Longest chunk sent to the TTS endpoint, in characters
        #[arg(long, default_value_t = DEFAULT_MAX_CHUNK_LEN)]
        max_chunk_len: usize,
        /// Chunks fetched ahead of playback
        #[arg(long, default_value_t = 2)]
        prefetch: usize,
        /// How long one chunk may play before moving on
        #[arg(long, env = "READIT_CHUNK_TIMEOUT_MS", default_value_t = 60_000)]
        chunk_timeout_ms: u64,
        /// External player fed audio on stdin when local playback fails, e.g. "aplay -q"
        #[arg(long)]
        fallback_player: Option<String>,
        /// Command printing the current selection
        #[arg(long, default_value = "xclip -o -selection primary")]
        selection_cmd: String,
    },
    /// Read text aloud
    Read {
        /// Text to read
        text: String,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Read the current selection aloud
    ReadSelection {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Pause reading
    Pause {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Resume reading
    Resume {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Stop reading
    Cancel {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Get reading progress
    Status {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Check the configured TTS endpoint
    Probe {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Synthesize text without playing it
    Synth {
        /// Text to synthesize
        text: String,
        /// Write the audio here
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            port,
            host,
            tts_url,
            voice,
            settings,
            max_chunk_len,
            prefetch,
            chunk_timeout_ms,
            fallback_player,
            selection_cmd,
        } => {
            let defaults = Settings {
                voice,
                tts_url,
                ..Settings::default()
            };
            let settings: Arc<dyn SettingsProvider> = match settings {
                Some(path) => Arc::new(FileSettings::new(path, defaults)),
                None => Arc::new(MemorySettings::new(defaults)),
            };
            let config = PipelineConfig {
                max_chunk_len,
                prefetch_count: prefetch,
                chunk_timeout: Duration::from_millis(chunk_timeout_ms),
                ..PipelineConfig::default()
            };

            let fallback: Option<Arc<dyn PlaybackSink>> = fallback_player
                .as_deref()
                .and_then(CommandSink::from_command_line)
                .map(|sink| Arc::new(sink) as Arc<dyn PlaybackSink>);

            let (sink, fallback) = match spawn_local_speaker().await {
                Ok(speaker) => (Arc::new(speaker) as Arc<dyn PlaybackSink>, fallback),
                Err(e) => match fallback {
                    Some(player) => {
                        warn!("{e}; playing through fallback player");
                        (player, None)
                    }
                    None => bail!("{e}; pass --fallback-player"),
                },
            };

            let fetcher = Arc::new(HttpFetcher::new(settings.clone()));
            let mut builder = ReaderEngine::builder(settings.clone(), fetcher, sink).config(config);
            if let Some(fallback) = fallback {
                builder = builder.fallback(fallback);
            }
            if let Some(selection) = CommandSelection::from_command_line(&selection_cmd) {
                builder = builder.selection(Arc::new(selection));
            }
            let engine = builder.build();

            match settings.settings().await.endpoint() {
                Some(url) => info!("tts endpoint: {url}"),
                None => warn!("no ttsUrl configured; set one with PUT /settings"),
            }

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;
            info!("readit listening on {addr}");

            axum::serve(listener, router(engine))
                .await
                .context("server error")?;
        }

        Command::Read { text, server } => {
            let resp = reqwest::Client::new()
                .post(format!("{server}/read"))
                .json(&serde_json::json!({ "text": text }))
                .send()
                .await
                .context("request failed")?;
            print_response(resp).await?;
        }

        Command::ReadSelection { server } => post_simple(&server, "read-selection").await?,
        Command::Pause { server } => post_simple(&server, "pause").await?,
        Command::Resume { server } => post_simple(&server, "resume").await?,
        Command::Cancel { server } => post_simple(&server, "cancel").await?,
        Command::Probe { server } => post_simple(&server, "probe").await?,

        Command::Status { server } => {
            let resp = reqwest::Client::new()
                .get(format!("{server}/status"))
                .send()
                .await
                .context("request failed")?;
            print_response(resp).await?;
        }

        Command::Synth { text, out, server } => {
            let resp = reqwest::Client::new()
                .post(format!("{server}/tts"))
                .json(&serde_json::json!({ "text": text }))
                .send()
                .await
                .context("request failed")?;
            let is_json = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.starts_with("application/json"));
            if !resp.status().is_success() || is_json {
                return print_response(resp).await;
            }
            let audio = resp.bytes().await.context("failed to read audio")?;
            tokio::fs::write(&out, &audio)
                .await
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("wrote {} bytes to {}", audio.len(), out.display());
        }
    }

    Ok(())
}

async fn post_simple(server: &str, endpoint: &str) -> Result<()> {
    let resp = reqwest::Client::new()
        .post(format!("{server}/{endpoint}"))
        .send()
        .await
        .context("request failed")?;
    print_response(resp).await
}

async fn print_response(resp: reqwest::Response) -> Result<()> {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        bail!("server returned {status}: {body}");
    }
    println!("{body}");
    Ok(())
}
