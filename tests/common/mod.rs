#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use image::{Rgb, RgbImage};

use camwatch::detect::{BoundingBox, Detection, DetectionResult};
use camwatch::frame::encode_jpeg;
use camwatch::{ChatId, DeliveryChannel, RawChunk, SourceFactory, StreamSource};

/// A small, valid JPEG.
pub fn jpeg() -> Vec<u8> {
    let image = RgbImage::from_pixel(16, 16, Rgb([90, 120, 200]));
    encode_jpeg(&image, 85).unwrap()
}

/// `00 <jpeg> 00`, a frame surrounded by stream noise.
pub fn framed_chunk() -> RawChunk {
    let mut bytes = vec![0x00];
    bytes.extend_from_slice(&jpeg());
    bytes.push(0x00);
    RawChunk::new(bytes, false)
}

pub fn detections(confidence: f32) -> DetectionResult {
    DetectionResult::new(vec![Detection {
        class_id: 0,
        label: "person".into(),
        confidence,
        bbox: BoundingBox::new(2.0, 2.0, 12.0, 12.0),
    }])
}

/// Source that replays a script, then repeats a fallback chunk (or blocks
/// forever when there is none).
pub struct ScriptedSource {
    script: VecDeque<Result<RawChunk, String>>,
    fallback: Option<RawChunk>,
    fetches: Arc<AtomicUsize>,
    resets: Arc<AtomicUsize>,
    urls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            fallback: None,
            fetches: Arc::new(AtomicUsize::new(0)),
            resets: Arc::new(AtomicUsize::new(0)),
            urls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn then_chunk(mut self, chunk: RawChunk) -> Self {
        self.script.push_back(Ok(chunk));
        self
    }

    pub fn then_error(mut self, message: &str) -> Self {
        self.script.push_back(Err(message.to_string()));
        self
    }

    pub fn repeating(mut self, chunk: RawChunk) -> Self {
        self.fallback = Some(chunk);
        self
    }

    pub fn fetch_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.fetches)
    }

    pub fn url_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.urls)
    }

    pub fn reset_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.resets)
    }
}

#[async_trait]
impl StreamSource for ScriptedSource {
    async fn fetch(&mut self, url: &str) -> Result<RawChunk> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        match self.script.pop_front() {
            Some(Ok(chunk)) => Ok(chunk),
            Some(Err(message)) => Err(anyhow!(message)),
            None => match &self.fallback {
                Some(chunk) => Ok(chunk.clone()),
                None => std::future::pending::<Result<RawChunk>>().await,
            },
        }
    }

    fn reset(&mut self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out numbered sources that always yield `chunk`, logging which source
/// performed each fetch.
pub struct CountingFactory {
    chunk: RawChunk,
    opened: AtomicUsize,
    fetch_log: Arc<Mutex<Vec<usize>>>,
}

impl CountingFactory {
    pub fn new(chunk: RawChunk) -> Self {
        Self {
            chunk,
            opened: AtomicUsize::new(0),
            fetch_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn fetch_log(&self) -> Vec<usize> {
        self.fetch_log.lock().unwrap().clone()
    }
}

struct NumberedSource {
    id: usize,
    chunk: RawChunk,
    fetch_log: Arc<Mutex<Vec<usize>>>,
}

#[async_trait]
impl StreamSource for NumberedSource {
    async fn fetch(&mut self, _url: &str) -> Result<RawChunk> {
        self.fetch_log.lock().unwrap().push(self.id);
        Ok(self.chunk.clone())
    }
}

impl SourceFactory for CountingFactory {
    fn open(&self) -> Box<dyn StreamSource> {
        let id = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        Box::new(NumberedSource {
            id,
            chunk: self.chunk.clone(),
            fetch_log: Arc::clone(&self.fetch_log),
        })
    }
}

#[derive(Clone, Debug)]
pub struct Sent {
    pub destination: ChatId,
    pub jpeg: Vec<u8>,
    pub at: tokio::time::Instant,
}

/// Delivery channel that records every photo.
#[derive(Default)]
pub struct RecordingDelivery {
    sent: Mutex<Vec<Sent>>,
    failing: AtomicBool,
}

impl RecordingDelivery {
    pub fn failing() -> Self {
        let delivery = Self::default();
        delivery.failing.store(true, Ordering::SeqCst);
        delivery
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryChannel for RecordingDelivery {
    async fn send_photo(&self, destination: ChatId, jpeg: Vec<u8>) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("chat unreachable"));
        }
        self.sent.lock().unwrap().push(Sent {
            destination,
            jpeg,
            at: tokio::time::Instant::now(),
        });
        Ok(())
    }
}
