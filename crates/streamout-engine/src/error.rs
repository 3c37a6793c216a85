//! Error types for the output engine.

use thiserror::Error;

use streamout_ipc::ConfigError;

/// Errors returned synchronously by the output.
#[derive(Debug, Error)]
pub enum OutputError {
    /// The configuration cannot start a session.
    #[error("Bad configuration: {0}")]
    BadConfiguration(#[from] ConfigError),

    /// A connection attempt or session is already running.
    #[error("Output is already started")]
    AlreadyStarted,

    /// A worker thread could not be created.
    #[error("Failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}
