//! # CAE Common Library
//!
//! Shared code for the CAE (Color Analysis Engine) services:
//! - Color extraction (decode, k-means, naming)
//! - Result store (images and analysis results)
//! - Work queue (durable broker shared by cae-web and cae-ml)
//! - Queue message payloads
//! - Configuration loading
//! - Event bus and SSE streams
//! - Error types and retry helpers

pub mod color;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod messages;
pub mod queue;
pub mod retry;
pub mod sse;
pub mod store;
pub mod telemetry;

pub use color::{ColorAnalysis, ColorExtractor, PixelGrid};
pub use error::{Error, Result};
pub use messages::{NewWork, WorkDone};
pub use queue::{AckMode, WorkQueue, NEW_WORK_QUEUE, WORK_DONE_QUEUE};
pub use store::{ColorResult, ImageRecord, ResultStore};
