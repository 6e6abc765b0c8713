//! camwatchd - camera detection daemon
//!
//! This daemon:
//! 1. Scans the model directory and exits if no model is available
//! 2. Serves chat commands over the Telegram Bot API
//! 3. Runs the detection dispatcher on /launch until /stop
//! 4. Stops any running dispatcher on Ctrl-C

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use camwatch::{
    bot, CamwatchConfig, CommandHandler, DispatchDeps, HttpSourceFactory, ModelLoader,
    ModelRegistry, SharedConfig, Supervisor, TelegramClient,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Detect objects in a camera stream and send annotated frames to a chat"
)]
struct Args {
    /// Directory containing detection models.
    #[arg(long, env = "CAMWATCH_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// Optional JSON config file.
    #[arg(long, env = "CAMWATCH_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = CamwatchConfig::load_from(args.config.as_deref())?;
    if let Some(dir) = args.model_dir {
        cfg.models.dir = dir;
    }

    let registry = Arc::new(ModelRegistry::scan(&cfg.models.dir, &cfg.models.extension)?);
    let default_model = registry
        .default_model()
        .ok_or_else(|| {
            anyhow!(
                "no .{} models found in {}",
                cfg.models.extension,
                cfg.models.dir.display()
            )
        })?
        .to_string();
    log::info!(
        "found {} model(s) in {}: {}",
        registry.list().len(),
        registry.dir().display(),
        registry.list().join(", ")
    );

    let token = cfg
        .telegram
        .token
        .clone()
        .ok_or_else(|| anyhow!("TELEGRAM_BOT_TOKEN must be set"))?;
    let client = Arc::new(TelegramClient::new(
        &cfg.telegram.api_base,
        &token,
        cfg.telegram.poll_timeout,
    )?);

    let settings = SharedConfig::new(&cfg.stream.url, cfg.detection.threshold, &default_model)
        .context("initial settings")?;
    let deps = DispatchDeps {
        sources: Arc::new(HttpSourceFactory::new(cfg.http_stream_config())?),
        models: model_loader(&cfg)?,
        delivery: client.clone(),
    };
    let supervisor = Arc::new(Supervisor::new(
        settings.clone(),
        Arc::clone(&registry),
        deps,
        cfg.dispatcher_config(),
    ));
    let handler = CommandHandler::new(settings, Arc::clone(&supervisor), registry);

    log::info!(
        "camwatchd {} ready (stream {}, threshold {}, model {})",
        env!("CARGO_PKG_VERSION"),
        cfg.stream.url,
        cfg.detection.threshold,
        default_model
    );

    tokio::select! {
        _ = bot::run(&client, &handler) => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("listen for ctrl-c")?;
            log::info!("shutdown requested");
        }
    }
    supervisor.shutdown().await;
    Ok(())
}

#[cfg(feature = "backend-tract")]
fn model_loader(cfg: &CamwatchConfig) -> Result<Arc<dyn ModelLoader>> {
    Ok(Arc::new(camwatch::detect::TractLoader::new(
        cfg.models.input_size,
    )))
}

#[cfg(not(feature = "backend-tract"))]
fn model_loader(_cfg: &CamwatchConfig) -> Result<Arc<dyn ModelLoader>> {
    Err(anyhow!(
        "no inference backend compiled in; rebuild with --features backend-tract"
    ))
}
