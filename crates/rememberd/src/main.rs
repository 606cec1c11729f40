use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use rememberme_core::{FaceAnalyzer, OnnxAnalyzer};
use rememberme_store::{ConversationBuffer, EmbeddingCipher, PeopleStore};
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;
use zbus::object_server::SignalEmitter;

mod announcer;
mod config;
mod dbus_interface;
mod engine;

use config::Config;
use dbus_interface::{AssistantService, ServiceSettings, SERVICE_NAME, SERVICE_PATH};
use engine::CaptureSettings;

/// Condense the pending transcript into a bullet once no new transcript has
/// arrived for `quiet`. Every `AppendTranscript` restarts the wait.
async fn summarize_when_quiet(
    conversation: Arc<Mutex<ConversationBuffer>>,
    changed: Arc<Notify>,
    quiet: Duration,
) {
    loop {
        changed.notified().await;
        loop {
            tokio::select! {
                _ = changed.notified() => continue,
                _ = tokio::time::sleep(quiet) => break,
            }
        }

        let Ok(mut buffer) = conversation.lock() else {
            tracing::error!("conversation buffer lock poisoned; summaries stopped");
            return;
        };
        if let Some(bullet) = buffer.summarize(chrono::Local::now()) {
            tracing::debug!(bullet, "conversation summarized");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rememberd starting");

    let config = Config::load()?;

    let analyzer = OnnxAnalyzer::load(&config.detector_model_path(), &config.recognizer_model_path())
        .context("failed to load face detection model")?;
    let settings = ServiceSettings {
        recognition_available: analyzer.recognition_available(),
        model_version: analyzer.model_version().map(str::to_string),
        match_threshold: config.match_threshold,
        default_camera: config.camera_device().map(str::to_string),
    };
    tracing::info!(
        recognition = settings.recognition_available,
        model = ?settings.model_version,
        "face models loaded"
    );

    let cipher = EmbeddingCipher::load_or_create(&config.key_path)?;
    let store = PeopleStore::open(&config.db_path, cipher)?;

    let engine = engine::spawn_engine(
        analyzer,
        config.matcher(),
        CaptureSettings {
            width: config.capture_width,
            height: config.capture_height,
            frame_interval: config.frame_interval(),
        },
    )?;

    let conversation = Arc::new(Mutex::new(ConversationBuffer::new(config.summary_max_chars)));
    let transcript_changed = Arc::new(Notify::new());
    let service = AssistantService::new(
        Arc::new(Mutex::new(store)),
        engine.clone(),
        conversation.clone(),
        transcript_changed.clone(),
        settings,
    );

    let filled = service.backfill_references().await?;
    if filled > 0 {
        tracing::info!(count = filled, "reference embeddings backfilled");
    }

    let connection = zbus::connection::Builder::session()?
        .name(SERVICE_NAME)?
        .serve_at(SERVICE_PATH, service)?
        .build()
        .await
        .context("failed to register on the session bus")?;

    let emitter = SignalEmitter::new(&connection, SERVICE_PATH)?;
    tokio::spawn(announcer::run(engine.subscribe(), emitter));
    tokio::spawn(summarize_when_quiet(
        conversation,
        transcript_changed,
        config.summary_interval(),
    ));

    tracing::info!(bus = SERVICE_NAME, path = SERVICE_PATH, "rememberd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("rememberd shutting down");

    if let Err(e) = engine.stop_camera().await {
        tracing::warn!(error = %e, "failed to release camera on shutdown");
    }

    Ok(())
}
