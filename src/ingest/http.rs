//! HTTP camera stream source.
//!
//! Connects to an HTTP endpoint that streams JPEG frames (MJPEG or a bare
//! concatenation of JPEGs) and reads it in bounded chunks. The response body is
//! kept open between fetches and re-established on error, end of body, when
//! the configured URL changes, or after `reset` (the dispatcher resets after
//! each delivery so frames buffered during the cool-down are skipped).

use std::io::Read;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;

use super::{SourceFactory, StreamSource};
use crate::frame::RawChunk;

/// Default upper bound on bytes read per fetch.
pub const DEFAULT_CHUNK_BYTES: usize = 45_000;

/// Configuration for `HttpChunkSource`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpStreamConfig {
    /// Upper bound on bytes returned by one fetch.
    pub chunk_bytes: usize,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
}

impl Default for HttpStreamConfig {
    fn default() -> Self {
        Self {
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            connect_timeout: Some(Duration::from_secs(10)),
            read_timeout: Some(Duration::from_secs(10)),
        }
    }
}

struct OpenStream {
    url: String,
    reader: Box<dyn Read + Send + Sync>,
}

/// `StreamSource` backed by a long-lived `ureq` response body.
pub struct HttpChunkSource {
    config: HttpStreamConfig,
    agent: ureq::Agent,
    stream: Option<OpenStream>,
}

impl HttpChunkSource {
    pub fn new(config: HttpStreamConfig) -> Self {
        let mut builder = ureq::AgentBuilder::new();
        if let Some(timeout) = config.connect_timeout {
            builder = builder.timeout_connect(timeout);
        }
        if let Some(timeout) = config.read_timeout {
            builder = builder.timeout_read(timeout);
        }
        Self {
            config,
            agent: builder.build(),
            stream: None,
        }
    }

    /// True while a response body is held open.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

#[async_trait]
impl StreamSource for HttpChunkSource {
    async fn fetch(&mut self, url: &str) -> Result<RawChunk> {
        let current = self.stream.take().filter(|open| open.url == url);
        if current.is_none() {
            log::debug!("opening camera stream {}", url);
        }
        let agent = self.agent.clone();
        let url = url.to_string();
        let limit = self.config.chunk_bytes.max(1);

        let (stream, chunk) =
            tokio::task::spawn_blocking(move || read_chunk(&agent, &url, current, limit))
                .await
                .context("camera stream reader task failed")??;
        self.stream = stream;
        Ok(chunk)
    }

    fn reset(&mut self) {
        if self.stream.take().is_some() {
            log::debug!("closing camera stream");
        }
    }
}

fn connect(agent: &ureq::Agent, url: &str) -> Result<OpenStream> {
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("connect to camera stream {}", url))?;
    Ok(OpenStream {
        url: url.to_string(),
        reader: response.into_reader(),
    })
}

// Runs on the blocking pool. Returns the stream to keep for the next fetch, or
// `None` once the body is exhausted.
fn read_chunk(
    agent: &ureq::Agent,
    url: &str,
    current: Option<OpenStream>,
    limit: usize,
) -> Result<(Option<OpenStream>, RawChunk)> {
    let fresh_connection = current.is_none();
    let mut stream = match current {
        Some(stream) => stream,
        None => connect(agent, url)?,
    };

    let mut bytes = Vec::with_capacity(limit);
    (&mut stream.reader)
        .take(limit as u64)
        .read_to_end(&mut bytes)
        .context("read camera stream chunk")?;

    if bytes.len() < limit {
        log::debug!("camera stream ended after {} bytes", bytes.len());
        return Ok((None, RawChunk::new(bytes, fresh_connection)));
    }
    Ok((Some(stream), RawChunk::new(bytes, fresh_connection)))
}

/// Opens an `HttpChunkSource` per run.
#[derive(Clone, Debug, Default)]
pub struct HttpSourceFactory {
    config: HttpStreamConfig,
}

impl HttpSourceFactory {
    pub fn new(config: HttpStreamConfig) -> Result<Self> {
        if config.chunk_bytes == 0 {
            return Err(anyhow!("stream chunk size must be greater than zero"));
        }
        Ok(Self { config })
    }
}

impl SourceFactory for HttpSourceFactory {
    fn open(&self) -> Box<dyn StreamSource> {
        Box::new(HttpChunkSource::new(self.config.clone()))
    }
}
