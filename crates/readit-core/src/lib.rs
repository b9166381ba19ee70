//! readit-core — Pure types and text segmentation.
//!
//! No async runtime, no I/O, no platform dependencies.

pub mod text_prep;
pub mod types;
