//! readit-lib — Read-aloud engine.
//!
//! Chunked TTS fetch, ordered playback with pause/resume/cancel, playback
//! sinks, settings stores, and the HTTP control API.
//! Depends on readit-core for pure types and text segmentation.

pub mod error;
pub mod fetch;
pub mod reader;
pub mod selection;
pub mod server;
mod session;
pub mod settings;
pub mod sink;
pub mod speaker;

// Re-export readit-core for convenience
pub use readit_core;
