//! Chat command parsing and handling.
//!
//! Commands arrive as message text (`/threshold 0.4`, `/launch@CamBot`) and are
//! answered with a plain text reply. Invalid arguments produce a usage reply and
//! leave every setting untouched.

use std::sync::Arc;

use crate::detect::ModelRegistry;
use crate::settings::SharedConfig;
use crate::supervisor::{LifecycleError, Supervisor};
use crate::transport::ChatId;

pub const URL_USAGE: &str = "Usage: /url <address>";
pub const THRESHOLD_USAGE: &str = "Usage: /threshold <number between 0 and 1>";
pub const MODEL_USAGE: &str = "Usage: /model <model name>";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Info,
    Url(String),
    Threshold(String),
    Model(String),
    Launch,
    Stop,
}

impl Command {
    /// Parse a message. Returns `None` for plain text and unknown commands.
    ///
    /// Arguments are re-joined with single spaces, so `/model  my   model.onnx`
    /// selects `my model.onnx`.
    pub fn parse(text: &str) -> Option<Command> {
        let mut words = text.split_whitespace();
        let head = words.next()?.strip_prefix('/')?;
        let name = head.split('@').next().unwrap_or(head);
        let args = words.collect::<Vec<_>>().join(" ");

        let command = match name.to_ascii_lowercase().as_str() {
            "start" => Command::Start,
            "info" => Command::Info,
            "url" => Command::Url(args),
            "threshold" => Command::Threshold(args),
            "model" => Command::Model(args),
            "launch" => Command::Launch,
            "stop" => Command::Stop,
            _ => return None,
        };
        Some(command)
    }
}

/// Applies commands to the shared settings and the supervisor.
pub struct CommandHandler {
    settings: SharedConfig,
    supervisor: Arc<Supervisor>,
    registry: Arc<ModelRegistry>,
}

impl CommandHandler {
    pub fn new(
        settings: SharedConfig,
        supervisor: Arc<Supervisor>,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        Self {
            settings,
            supervisor,
            registry,
        }
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Handle one command from `chat` and produce the reply text.
    pub async fn handle(&self, chat: ChatId, command: Command) -> String {
        match command {
            Command::Start => format!(
                "Welcome to the camera detection bot.\n{}",
                self.settings_text("The default settings are:")
            ),
            Command::Info => self.settings_text("The settings are:"),
            Command::Url(raw) => {
                if raw.is_empty() {
                    return URL_USAGE.to_string();
                }
                match self.settings.set_stream_url(&raw) {
                    Ok(url) => format!("Stream URL updated to: {}", url),
                    Err(err) => {
                        log::debug!("rejected /url from chat {}: {}", chat, err);
                        URL_USAGE.to_string()
                    }
                }
            }
            Command::Threshold(raw) => match self.settings.set_threshold_str(&raw) {
                Ok(threshold) => format!("Threshold updated to: {}", threshold),
                Err(err) => {
                    log::debug!("rejected /threshold from chat {}: {}", chat, err);
                    THRESHOLD_USAGE.to_string()
                }
            },
            Command::Model(name) => {
                if name.is_empty() {
                    return MODEL_USAGE.to_string();
                }
                match self.settings.set_model(&name, &self.registry) {
                    Ok(model) if self.supervisor.is_running() => format!(
                        "Model updated to: {} (takes effect on the next /launch)",
                        model
                    ),
                    Ok(model) => format!("Model updated to: {}", model),
                    Err(_) => MODEL_USAGE.to_string(),
                }
            }
            Command::Launch => match self.supervisor.start(chat).await {
                Ok(model) => format!(
                    "Detection started with model {}! Sending images when an object is detected.",
                    model
                ),
                Err(LifecycleError::AlreadyRunning) => "Already running!".to_string(),
                Err(err) => format!("Could not start detection: {}", err),
            },
            Command::Stop => match self.supervisor.stop() {
                Ok(()) => "Stopping detection...".to_string(),
                Err(_) => "Detection is not running.".to_string(),
            },
        }
    }

    fn settings_text(&self, heading: &str) -> String {
        let snapshot = self.settings.snapshot();
        let status = self.supervisor.status();
        let state = if self.supervisor.is_running() {
            "running"
        } else {
            "stopped"
        };
        format!(
            "{heading}\n\
             URL: {url}\n\
             Threshold: {threshold}\n\
             Selected Model: {model}\n\
             Available Models:\n\
             {models}\n\
             Detection: {state} ({deliveries} images sent in the last run)\n\
             To change the settings, use /url, /threshold and /model.\n\
             To start detecting, use /launch, to stop, use /stop.",
            heading = heading,
            url = snapshot.stream_url,
            threshold = snapshot.threshold,
            model = snapshot.model,
            models = self.registry.list().join("\n"),
            state = state,
            deliveries = status.stats.deliveries,
        )
    }
}
