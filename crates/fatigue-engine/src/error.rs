//! Error types for the host binary.
//!
//! [`HostError`] wraps every failure that can stop the host, so `main`
//! can propagate with `?`.

/// Top-level error for the host binary.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: fatigue_core::ConfigError,
    },

    /// Loading or saving engine state failed.
    #[error("engine error: {source}")]
    Engine {
        /// The underlying engine error.
        #[from]
        source: fatigue_core::EngineError,
    },

    /// The stdin feed thread could not be started.
    #[error("failed to start lifecycle feed: {source}")]
    Feed {
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The logging subscriber could not be installed.
    #[error("logging init error: {message}")]
    Logging {
        /// Description of the failure.
        message: String,
    },
}
