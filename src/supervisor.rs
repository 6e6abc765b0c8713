//! Start/stop lifecycle of the detection dispatcher.
//!
//! The supervisor owns the run state and guarantees at most one dispatcher
//! iterates at any time: every new run awaits the task of the previous run
//! before its first iteration, and a stopped run exits at its next
//! cancellation point.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::cancel::{cancel_pair, CancelHandle};
use crate::detect::{Detector, ModelLoader, ModelRegistry};
use crate::dispatcher::{DetectionDispatcher, DispatcherConfig, DispatcherStats, StatsSnapshot};
use crate::ingest::SourceFactory;
use crate::settings::SharedConfig;
use crate::transport::{ChatId, DeliveryChannel};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
}

/// Start/stop requests that cannot be honoured. State is left unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("detection is already running")]
    AlreadyRunning,

    #[error("detection is not running")]
    NotRunning,

    #[error("failed to load model '{model}': {reason}")]
    ModelBinding { model: String, reason: String },
}

/// Collaborators handed to every run.
#[derive(Clone)]
pub struct DispatchDeps {
    pub sources: Arc<dyn SourceFactory>,
    pub models: Arc<dyn ModelLoader>,
    pub delivery: Arc<dyn DeliveryChannel>,
}

/// Read-only view of the supervisor for status replies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupervisorStatus {
    pub state: RunState,
    pub runs_started: u64,
    /// Model bound to the current (or most recent) run.
    pub model: Option<String>,
    pub stats: StatsSnapshot,
}

struct ActiveRun {
    generation: u64,
    cancel: CancelHandle,
}

struct State {
    run_state: RunState,
    generation: u64,
    runs_started: u64,
    active: Option<ActiveRun>,
    last_task: Option<JoinHandle<StatsSnapshot>>,
    last_model: Option<String>,
    stats: Arc<DispatcherStats>,
}

pub struct Supervisor {
    settings: SharedConfig,
    registry: Arc<ModelRegistry>,
    deps: DispatchDeps,
    config: DispatcherConfig,
    state: Mutex<State>,
}

impl Supervisor {
    pub fn new(
        settings: SharedConfig,
        registry: Arc<ModelRegistry>,
        deps: DispatchDeps,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            settings,
            registry,
            deps,
            config,
            state: Mutex::new(State {
                run_state: RunState::Stopped,
                generation: 0,
                runs_started: 0,
                active: None,
                last_task: None,
                last_model: None,
                stats: Arc::new(DispatcherStats::default()),
            }),
        }
    }

    pub fn state(&self) -> RunState {
        self.lock().run_state
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    pub fn status(&self) -> SupervisorStatus {
        let state = self.lock();
        SupervisorStatus {
            state: state.run_state,
            runs_started: state.runs_started,
            model: state.last_model.clone(),
            stats: state.stats.snapshot(),
        }
    }

    /// Bind the selected model, register `destination` and spawn a dispatcher.
    ///
    /// Returns the name of the bound model. Model loading runs on the blocking
    /// pool; if it fails the state reverts to `Stopped` and the destination is
    /// left as it was.
    pub async fn start(&self, destination: ChatId) -> Result<String, LifecycleError> {
        let (token, generation) = {
            let mut state = self.lock();
            if state.run_state == RunState::Running {
                return Err(LifecycleError::AlreadyRunning);
            }
            let (handle, token) = cancel_pair();
            state.run_state = RunState::Running;
            state.generation += 1;
            let generation = state.generation;
            state.active = Some(ActiveRun {
                generation,
                cancel: handle,
            });
            (token, generation)
        };

        let model = self.settings.model();
        let detector = match self.bind_model(&model).await {
            Ok(detector) => detector,
            Err(err) => {
                let mut state = self.lock();
                if state.active.as_ref().map(|run| run.generation) == Some(generation) {
                    state.active = None;
                    state.run_state = RunState::Stopped;
                }
                log::warn!("model binding failed: {:#}", err);
                return Err(LifecycleError::ModelBinding {
                    model,
                    reason: format!("{:#}", err),
                });
            }
        };

        // Only a run that will actually dispatch may redirect deliveries.
        self.settings.set_destination(destination);
        let stats = Arc::new(DispatcherStats::default());
        let dispatcher = DetectionDispatcher::new(
            self.settings.clone(),
            self.deps.sources.open(),
            detector,
            Arc::clone(&self.deps.delivery),
            self.config.clone(),
            token,
        )
        .with_stats(Arc::clone(&stats));

        let mut state = self.lock();
        let previous = state.last_task.take();
        state.last_task = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(err) = previous.await {
                    log::warn!("previous detection run ended abnormally: {}", err);
                }
            }
            dispatcher.run().await
        }));
        state.runs_started += 1;
        state.last_model = Some(model.clone());
        state.stats = stats;
        log::info!("detection run {} started with model {}", generation, model);
        Ok(model)
    }

    /// Request the running dispatcher to stop. Delivery in flight completes.
    pub fn stop(&self) -> Result<(), LifecycleError> {
        let mut state = self.lock();
        if state.run_state == RunState::Stopped {
            return Err(LifecycleError::NotRunning);
        }
        state.run_state = RunState::Stopped;
        if let Some(run) = state.active.take() {
            run.cancel.cancel();
            log::info!("detection run {} stopping", run.generation);
        }
        Ok(())
    }

    /// Stop any run and wait for the dispatcher task to finish.
    pub async fn shutdown(&self) {
        let _ = self.stop();
        let task = self.lock().last_task.take();
        if let Some(task) = task {
            match task.await {
                Ok(stats) => log::debug!("final run stats: {:?}", stats),
                Err(err) => log::warn!("detection task ended abnormally: {}", err),
            }
        }
    }

    async fn bind_model(&self, name: &str) -> Result<Box<dyn Detector>> {
        let handle = self.registry.resolve(name)?;
        let loader = Arc::clone(&self.deps.models);
        tokio::task::spawn_blocking(move || {
            let mut detector = loader.load(&handle)?;
            detector
                .warm_up()
                .with_context(|| format!("warm up model '{}'", handle.name()))?;
            Ok(detector)
        })
        .await
        .map_err(|err| anyhow!("model loader task failed: {}", err))?
    }

    // State updates are single assignments; a poisoned lock still holds a
    // usable value.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
