use thiserror::Error;

/// Errors surfaced out of the worker crate. Everything inside a per-task unit or
/// the heartbeat is logged and handled there; only configuration failures, which
/// are fatal at startup (§7 category 1), reach the caller of `run`.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Config(#[from] ease_core::ConfigError),
}
