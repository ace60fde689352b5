use thiserror::Error;

/// Errors that can occur when working with TrackMaster treadmills
#[derive(Error, Debug)]
pub enum TreadmillError {
    /// Operation invoked while no ergometry session is active
    #[error("No active session - call start() before issuing commands")]
    SessionInactive,

    /// Serial port I/O error
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Response frame could not be parsed
    #[error("Failed to parse response frame: {0}")]
    Parse(String),

    /// The serial reader task is gone
    #[error("Device disconnected")]
    Disconnected,
}

/// Result type for treadmill operations
pub type Result<T> = std::result::Result<T, TreadmillError>;

impl TreadmillError {
    /// Check if this error indicates a transport/connection issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Disconnected)
    }
}
