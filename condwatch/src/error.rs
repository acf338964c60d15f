use thiserror::Error;

/// Failures surfaced while preparing or polling a condition.
#[derive(Error, Debug)]
pub enum WatchError {
    /// The condition query could not be compiled. Fatal to the watcher.
    #[error("Failed to prepare condition query: {0}")]
    Prepare(#[source] sqlx::Error),

    /// A poll attempt failed for a reason other than "no matching row".
    /// The watcher keeps polling after reporting it.
    #[error("Condition attempt failed: {0}")]
    Attempt(#[source] sqlx::Error),

    /// `attempt` was called on a strategy without a compiled statement.
    #[error("Condition query attempted before it was prepared")]
    NotPrepared,
}

impl WatchError {
    /// Whether the watcher stops after reporting this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Prepare(_))
    }
}

/// Configuration parsing failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An environment value could not be parsed.
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        /// Variable that held the value.
        key: &'static str,
        /// Raw value as read.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// Inline JSON did not match the configuration shape.
    #[error("Invalid watcher configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias for condition operations.
pub type Result<T> = std::result::Result<T, WatchError>;
