//! camwatch: camera stream object detection with chat delivery
//!
//! This crate pulls a JPEG byte stream from a network camera, runs object
//! detection on the frames it finds, and sends annotated images to a
//! registered chat while a command front end starts, stops, and reconfigures
//! the process at runtime.
//!
//! # Architecture
//!
//! - **Frames** are located by JPEG markers in bounded reads of the stream and
//!   decoded in memory. Nothing is written to disk.
//! - **Settings** live in one `SharedConfig` handle. Commands write through
//!   validated setters; the dispatcher reads one snapshot per iteration.
//! - **Runs** are owned by the `Supervisor`: at most one dispatcher iterates
//!   at a time, each with its own cancellation token.
//!
//! # Module Structure
//!
//! - `frame`: JPEG framing, decoding, encoding, and cross-chunk reassembly
//! - `ingest`: stream sources (HTTP)
//! - `detect`: detector/loader traits, model registry, YOLO backend, annotation
//! - `transport`: delivery trait and the Telegram Bot API client
//! - `settings`: shared runtime settings
//! - `dispatcher`: the fetch/detect/deliver loop
//! - `supervisor`: start/stop state machine
//! - `commands`, `bot`: chat command handling and the long-poll loop
//! - `config`: process configuration (file + environment)

pub mod bot;
pub mod cancel;
pub mod commands;
pub mod config;
pub mod detect;
pub mod dispatcher;
pub mod frame;
pub mod ingest;
pub mod settings;
pub mod supervisor;
pub mod transport;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use commands::{Command, CommandHandler};
pub use config::CamwatchConfig;
pub use detect::{
    BoundingBox, Detection, DetectionResult, Detector, ModelHandle, ModelLoader, ModelRegistry,
};
pub use dispatcher::{
    DetectionDispatcher, DispatcherConfig, DispatcherStats, IterationOutcome, StatsSnapshot,
};
pub use frame::{extract, find_frame_bounds, Frame, FrameAssembler, RawChunk};
pub use ingest::{HttpSourceFactory, HttpStreamConfig, SourceFactory, StreamSource};
pub use settings::{SettingsError, SettingsSnapshot, SharedConfig};
pub use supervisor::{DispatchDeps, LifecycleError, RunState, Supervisor, SupervisorStatus};
pub use transport::{ChatId, DeliveryChannel, TelegramClient};
