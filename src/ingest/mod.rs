//! Camera stream ingestion.
//!
//! A `StreamSource` yields bounded `RawChunk`s from the camera endpoint. Each
//! dispatcher run opens its own source through a `SourceFactory`, so a stopped
//! run never shares a connection with the next one.
//!
//! Sources MUST NOT block the async executor: blocking I/O is moved to the
//! blocking pool. Raw bytes are never written to disk or logged.

pub mod http;

use anyhow::Result;
use async_trait::async_trait;

use crate::frame::RawChunk;

pub use http::{HttpChunkSource, HttpSourceFactory, HttpStreamConfig};

/// A stream of bytes from the camera, read one bounded chunk at a time.
#[async_trait]
pub trait StreamSource: Send {
    /// Read the next chunk from `url`.
    ///
    /// The URL is passed on every call because it may change between
    /// iterations; a source is expected to reconnect when it does.
    async fn fetch(&mut self, url: &str) -> Result<RawChunk>;

    /// Drop any open connection so the next fetch starts at the live edge of
    /// the stream. Called after a delivery, before the cool-down.
    fn reset(&mut self) {}
}

/// Opens a fresh `StreamSource` for each dispatcher run.
pub trait SourceFactory: Send + Sync {
    fn open(&self) -> Box<dyn StreamSource>;
}
