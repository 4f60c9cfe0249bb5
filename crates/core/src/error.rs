/// Result alias that carries the custom [`MaestroError`] type.
pub type Result<T> = std::result::Result<T, MaestroError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum MaestroError {
    /// Free-form failure reported by an engine integration or test double.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration file could not be parsed or serialized.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// Configuration values that cannot drive a room.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The engine credential is required but the environment variable is
    /// unset or empty. Raised only when a connect attempt is made.
    #[error("missing credential: environment variable `{var}` is not set")]
    MissingCredential { var: String },
    /// No live session could be obtained for the room.
    #[error("generative session unavailable: {0}")]
    SessionUnavailable(String),
    /// The room owning the session has been torn down.
    #[error("generative session stopped")]
    SessionStopped,
}

impl MaestroError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for MaestroError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for MaestroError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
