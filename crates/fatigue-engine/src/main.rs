//! Host binary for the fatigue accrual engine.
//!
//! Reads lifecycle events as JSON lines on stdin, drives the engine on a
//! single-threaded tokio runtime, and writes level notifications for the
//! `display` consumer slot as JSON lines on stdout. Logs go to stderr.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `fatigue-config.yaml` (defaults if absent)
//! 2. Initialize structured logging (tracing)
//! 3. Open the data file and restore persisted state
//! 4. Attach a sink to every configured consumer slot
//! 5. Start the stdin feed
//! 6. Run the driver until ctrl-c or end of input
//! 7. Save state on the way out

mod error;
mod feed;

use std::path::Path;

use fatigue_core::config::LoggingConfig;
use fatigue_core::{
    EngineDriver, EngineSettings, FatigueConfig, FatigueEngine, JsonLinesSink, NotificationSink,
    SessionTable, SystemClock, TracingSink,
};
use fatigue_store::JsonFileStore;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::HostError;

/// Config file looked up relative to the working directory.
const CONFIG_FILE: &str = "fatigue-config.yaml";

/// Consumer slot whose notifications are written to stdout.
const STDOUT_SLOT: &str = "display";

/// Bound on lifecycle events queued between the feed and the engine.
const EVENT_QUEUE: usize = 1024;

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, logging, or the initial load fails,
/// or if the final save fails.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), HostError> {
    // 1. Load configuration.
    let (config, from_file) = load_config()?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging)?;
    info!("fatigue-engine starting");
    if from_file {
        info!(path = CONFIG_FILE, "Configuration loaded");
    } else {
        info!(path = CONFIG_FILE, "Config file not found, using defaults");
    }

    // 3. Open the data file and restore state.
    let store = JsonFileStore::new(&config.storage.data_file);
    info!(data_file = %store.path().display(), "Using data file");
    let settings = EngineSettings::from_config(&config);
    let slots = settings.consumers.clone();
    let mut engine = FatigueEngine::new(
        SystemClock,
        SessionTable::new(),
        Box::new(store),
        settings,
    );
    let report = engine.load_state()?;
    info!(
        restored = report.restored,
        expired = report.expired,
        rejected = report.rejected,
        "Persisted state restored"
    );

    // 4. Attach consumers.
    for slot in slots {
        let sink = sink_for(&slot);
        engine.attach_consumer(slot, sink);
    }

    // 5. Start the stdin feed. The thread is left detached: it ends with
    //    end of input or with the process.
    let (tx, rx) = mpsc::channel(EVENT_QUEUE);
    std::thread::Builder::new()
        .name("stdin-feed".to_owned())
        .spawn(move || {
            let summary = feed::forward_events(std::io::stdin().lock(), &tx);
            info!(
                accepted = summary.accepted,
                rejected = summary.rejected,
                "Lifecycle input ended"
            );
        })
        .map_err(|source| HostError::Feed { source })?;

    // 6. Run until ctrl-c or end of input; 7. the driver saves on exit.
    let mut driver = EngineDriver::new(engine, rx);
    let result = driver.run(shutdown_signal()).await;

    match result {
        Ok(summary) => {
            info!(
                events = summary.events_handled,
                saved = summary.saved,
                "fatigue-engine shutdown complete"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Final save failed");
            Err(e.into())
        }
    }
}

/// Load `fatigue-config.yaml`, falling back to defaults when absent.
///
/// The flag reports whether the file was found; logging is not up yet.
fn load_config() -> Result<(FatigueConfig, bool), HostError> {
    let config_path = Path::new(CONFIG_FILE);
    if config_path.exists() {
        Ok((FatigueConfig::from_file(config_path)?, true))
    } else {
        Ok((FatigueConfig::parse("")?, false))
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured
/// level.
fn init_tracing(logging: &LoggingConfig) -> Result<(), HostError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    let installed = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| HostError::Logging {
        message: e.to_string(),
    })
}

/// The sink attached to a consumer slot.
fn sink_for(slot: &str) -> Box<dyn NotificationSink> {
    if slot == STDOUT_SLOT {
        Box::new(JsonLinesSink::new(std::io::stdout()))
    } else {
        Box::new(TracingSink)
    }
}

/// Resolve on ctrl-c. If the handler cannot be installed, never resolve
/// and rely on end of input instead.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
