use codec::CodecError;
use std::fmt;

/// Errors reported by a transport backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Rejected by transport: {0}")]
    Rejected(String),

    #[error("Transport closed")]
    Closed,

    #[error("Backend error: {0}")]
    Backend(String),
}

impl TransportError {
    pub fn not_connected(msg: impl Into<String>) -> Self {
        TransportError::NotConnected(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        TransportError::Rejected(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        TransportError::Backend(msg.into())
    }
}

/// Channel role used in registry keys and error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Publisher,
    Listener,
    Server,
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Publisher => "publisher",
            Role::Listener => "listener",
            Role::Server => "server",
            Role::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChannelError {
    #[error("Duplicate {role} registration for data kind '{data_kind}' on transport '{transport}'")]
    DuplicateRegistration {
        role: Role,
        data_kind: String,
        transport: String,
    },

    #[error("No {role} registered for data kind '{data_kind}' on transport '{transport}'")]
    UnknownChannel {
        role: Role,
        data_kind: String,
        transport: String,
    },

    #[error("Invalid channel descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Channel '{channel}' is not established")]
    NotEstablished { channel: String },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Channel '{channel}': {slot} slot is full, newest item dropped")]
    CapacityExceeded { channel: String, slot: &'static str },

    #[error("Channel '{channel}' expects {expected}, got {actual}")]
    ShapeMismatch {
        channel: String,
        expected: String,
        actual: String,
    },

    #[error("Channel '{channel}': reply() called with no pending request")]
    NoPendingRequest { channel: String },

    #[error("Channel '{channel}': a request is still awaiting its reply")]
    RequestOutstanding { channel: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Channel '{channel}' is closed")]
    Closed { channel: String },
}

impl ChannelError {
    pub fn duplicate_registration(
        role: Role,
        data_kind: impl Into<String>,
        transport: impl Into<String>,
    ) -> Self {
        ChannelError::DuplicateRegistration {
            role,
            data_kind: data_kind.into(),
            transport: transport.into(),
        }
    }

    pub fn unknown_channel(
        role: Role,
        data_kind: impl Into<String>,
        transport: impl Into<String>,
    ) -> Self {
        ChannelError::UnknownChannel {
            role,
            data_kind: data_kind.into(),
            transport: transport.into(),
        }
    }

    pub fn invalid_descriptor(msg: impl Into<String>) -> Self {
        ChannelError::InvalidDescriptor(msg.into())
    }

    pub fn shape_mismatch(
        channel: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        ChannelError::ShapeMismatch {
            channel: channel.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn closed(channel: impl Into<String>) -> Self {
        ChannelError::Closed {
            channel: channel.into(),
        }
    }

    /// Registry and descriptor problems, raised at construction and never retried
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            ChannelError::DuplicateRegistration { .. }
                | ChannelError::UnknownChannel { .. }
                | ChannelError::InvalidDescriptor(_)
        )
    }

    /// Check if this is a connection-related error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ChannelError::NotEstablished { .. }
                | ChannelError::Transport(TransportError::NotConnected(_))
        )
    }

    /// Errors local to one message or one attempt; the channel stays usable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ChannelError::NotEstablished { .. }
                | ChannelError::Codec(_)
                | ChannelError::CapacityExceeded { .. }
                | ChannelError::ShapeMismatch { .. }
                | ChannelError::Transport(TransportError::NotConnected(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let dup = ChannelError::duplicate_registration(Role::Listener, "Image", "memory");
        assert!(dup.is_configuration_error());
        assert!(!dup.is_recoverable());

        let unknown = ChannelError::unknown_channel(Role::Client, "Image", "zeromq");
        assert!(unknown.is_configuration_error());

        let shape = ChannelError::shape_mismatch("/cam", "[240, 320, 3]", "[10, 10, 3]");
        assert!(shape.is_recoverable());
        assert!(!shape.is_configuration_error());

        let transport: ChannelError = TransportError::not_connected("no subscribers").into();
        assert!(transport.is_connection_error());
    }

    #[test]
    fn test_error_messages_name_the_pair() {
        let err = ChannelError::unknown_channel(Role::Publisher, "AudioChunk", "yarp");
        let message = err.to_string();
        assert!(message.contains("publisher"));
        assert!(message.contains("AudioChunk"));
        assert!(message.contains("yarp"));
    }
}
