use thiserror::Error;

/// Result type for soundbar operations
pub type Result<T> = std::result::Result<T, SoundbarError>;

/// Errors that can occur when talking to a soundbar
#[derive(Error, Debug)]
pub enum SoundbarError {
    /// Connecting to the device failed (refused, unreachable or timed out)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Writing to an established connection failed
    #[error("Send error: {0}")]
    Send(String),

    /// The byte stream lost frame synchronisation
    #[error("Framing error: {0}")]
    Framing(String),

    /// A single frame could not be decrypted or parsed
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// An outgoing message could not be serialized
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Configuration could not be parsed or is unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// A command parameter was out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation requires an open connection
    #[error("Not connected")]
    NotConnected,

    /// Connection was closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// Timed out waiting for the device
    #[error("Timeout")]
    Timeout,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel receive error
    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl SoundbarError {
    /// Whether this error ends the current session
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::Send(_)
                | Self::Framing(_)
                | Self::Io(_)
                | Self::ConnectionClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(SoundbarError::Framing("bad tag".into()).is_transport());
        assert!(SoundbarError::Send("broken pipe".into()).is_transport());
        assert!(!SoundbarError::Decoding("bad json".into()).is_transport());
        assert!(!SoundbarError::InvalidArgument("volume".into()).is_transport());
    }
}
