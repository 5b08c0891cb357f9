use thiserror::Error;

/// Errors raised while spawning or talking to a transport child process.
#[derive(Debug, Error)]
pub enum TransportError {
  #[error("io: {0}")]
  Io(#[from] std::io::Error),
  #[error("failed to spawn transport command `{command}`: {source}")]
  Spawn {
    command: String,
    #[source]
    source: std::io::Error,
  },
}

/// Errors surfaced by the engine (C1-C5) to its callers.
#[derive(Debug, Error)]
pub enum EngineError {
  #[error("io failure on dispatcher `{display_name}`: {source}")]
  Io {
    display_name: String,
    #[source]
    source: std::io::Error,
  },
  #[error("write buffer for `{display_name}` exceeded the {limit}-byte ceiling")]
  BufferOverflow { display_name: String, limit: usize },
  #[error(transparent)]
  Transport(#[from] TransportError),
  #[error("abort_error triggered while `{display_name}` was still starting up")]
  AbortDuringStartup { display_name: String },
}

pub type Result<T> = std::result::Result<T, EngineError>;
