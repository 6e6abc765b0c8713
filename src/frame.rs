//! Frame extraction from raw camera stream bytes.
//!
//! The camera endpoint produces an unbounded byte stream in which JPEG images
//! are delimited by the SOI (`FF D8`) and EOI (`FF D9`) markers. Reads from the
//! stream are not frame aligned, so this module provides:
//!
//! - `find_frame_bounds` / `extract`: stateless location and decoding of the
//!   first complete JPEG inside one buffer.
//! - `FrameAssembler`: carries unconsumed bytes from one chunk to the next so a
//!   frame split across two reads of the same connection is not lost.
//!
//! Decoding failures are never errors: an undecodable candidate is simply "no
//! frame this time".

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};

/// JPEG start-of-image marker.
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// JPEG end-of-image marker.
pub const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Hard cap on bytes retained between chunks while waiting for an EOI.
pub const MAX_PENDING_BYTES: usize = 5 * 1024 * 1024;

/// A decoded raster frame.
pub type Frame = RgbImage;

/// Bytes obtained from one bounded read of the stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawChunk {
    pub bytes: Vec<u8>,
    /// True when this chunk is the first read of a new connection.
    pub fresh_connection: bool,
}

impl RawChunk {
    pub fn new(bytes: Vec<u8>, fresh_connection: bool) -> Self {
        Self {
            bytes,
            fresh_connection,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn find_marker(buffer: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    buffer
        .get(from..)?
        .windows(2)
        .position(|window| window == marker)
        .map(|pos| from + pos)
}

/// Locate the first complete JPEG in `buffer`.
///
/// Returns `(start, end)` where `start` is the offset of the first SOI marker and
/// `end` is one past the first EOI marker that follows it, i.e. the candidate
/// frame is `buffer[start..end]`.
pub fn find_frame_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = find_marker(buffer, JPEG_SOI, 0)?;
    let eoi = find_marker(buffer, JPEG_EOI, start + 2)?;
    Some((start, eoi + 2))
}

/// Extract and decode the first complete JPEG in `buffer`.
pub fn extract(buffer: &[u8]) -> Option<Frame> {
    let (start, end) = find_frame_bounds(buffer)?;
    decode_jpeg(&buffer[start..end])
}

/// Decode an encoded JPEG into an RGB raster. Returns `None` on any decode failure.
pub fn decode_jpeg(bytes: &[u8]) -> Option<Frame> {
    if bytes.is_empty() {
        return None;
    }
    match image::load_from_memory_with_format(bytes, ImageFormat::Jpeg) {
        Ok(image) => Some(image.into_rgb8()),
        Err(e) => {
            log::debug!("discarding undecodable frame ({} bytes): {}", bytes.len(), e);
            None
        }
    }
}

/// Encode a raster as JPEG with the given quality (1..=100).
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100))
        .encode_image(image)
        .context("encode jpeg")?;
    Ok(bytes)
}

// ----------------------------------------------------------------------------
// FrameAssembler: tail retention across chunks
// ----------------------------------------------------------------------------

/// Reassembles JPEG frames from consecutive chunks of one connection.
///
/// Bytes after the last complete frame are kept until the next push. When more
/// than one complete frame is available, only the newest is returned; the camera
/// view is live and older frames are stale by the time they would be processed.
#[derive(Debug)]
pub struct FrameAssembler {
    pending: Vec<u8>,
    max_pending: usize,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::with_limit(MAX_PENDING_BYTES)
    }

    pub fn with_limit(max_pending: usize) -> Self {
        Self {
            pending: Vec::with_capacity(64 * 1024),
            max_pending: max_pending.max(2),
        }
    }

    /// Append a chunk and return the newest complete encoded frame, if any.
    pub fn push(&mut self, chunk: &RawChunk) -> Option<Vec<u8>> {
        if chunk.fresh_connection {
            self.pending.clear();
        }
        self.pending.extend_from_slice(&chunk.bytes);

        let mut consumed = 0;
        let mut newest = None;
        while let Some((start, end)) = find_frame_bounds(&self.pending[consumed..]) {
            newest = Some((consumed + start, consumed + end));
            consumed += end;
        }
        let frame = newest.map(|(start, end)| self.pending[start..end].to_vec());
        self.pending.drain(..consumed);

        // Nothing before the next SOI can ever become part of a frame.
        match find_marker(&self.pending, JPEG_SOI, 0) {
            Some(start) => {
                self.pending.drain(..start);
            }
            None => self.keep_last_byte(),
        }

        if self.pending.len() > self.max_pending {
            log::warn!(
                "dropping {} pending stream bytes without an end-of-image marker",
                self.pending.len()
            );
            self.keep_last_byte();
        }

        frame
    }

    /// Number of bytes carried over to the next push.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }

    // A trailing 0xFF may be the first half of a marker split across reads.
    fn keep_last_byte(&mut self) {
        let keep = 1.min(self.pending.len());
        let drain_len = self.pending.len() - keep;
        self.pending.drain(..drain_len);
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}
