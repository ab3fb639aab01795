//! Error types for the session server.

/// Failures surfaced by the listener, persistence and command encoding.
///
/// Malformed client input never produces one of these; the wire codec
/// degrades it to "absent" instead.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding, accepting or socket setup failed
    #[error("Network error: {0}")]
    Network(String),
    /// Reading or writing a connection or a player-data file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Encoding an outbound command failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
