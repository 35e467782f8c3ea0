use thiserror::Error;

/// Errors surfaced to callers of the message bus.
///
/// Connection-level failures are fatal to the caller. Message-level failures
/// (see [`DecodeError`], [`HandlerError`]) are contained at the listener
/// boundary and never appear here.
#[derive(Debug, Error)]
pub enum BusError {
    /// Broker unreachable or credentials rejected at connect time.
    #[error("failed to connect to message broker: {0}")]
    Connection(String),

    /// Publish or subscribe attempted while the bus is disconnected.
    #[error("message bus not connected")]
    NotConnected,

    /// Subscribe attempted for a handler id that is not registered.
    #[error("handler {0} is not registered")]
    NotRegistered(String),

    #[error("priority {0} out of range (1-10)")]
    InvalidPriority(u8),

    #[error("failed to encode envelope: {0}")]
    Encode(String),

    #[error("publish to {channel} failed: {reason}")]
    Publish { channel: String, reason: String },

    #[error("subscribe to {channel} failed: {reason}")]
    Subscribe { channel: String, reason: String },
}

/// A raw broker payload could not be parsed into an envelope.
#[derive(Debug, Error)]
#[error("malformed envelope on {channel}: {reason}")]
pub struct DecodeError {
    pub channel: String,
    pub reason: String,
}

/// A handler failed while processing an envelope.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        HandlerError::Failed(msg.into())
    }
}

/// A workflow could not be started.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The request is missing something its workflow type needs.
    #[error("invalid workflow request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Errors from loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid value for {key}: {reason}")]
    InvalidOverride { key: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_error_display() {
        assert_eq!(BusError::NotConnected.to_string(), "message bus not connected");
        assert_eq!(
            BusError::NotRegistered("h1".to_string()).to_string(),
            "handler h1 is not registered"
        );
        let err = BusError::Publish {
            channel: "broadcast".to_string(),
            reason: "broken pipe".to_string(),
        };
        assert!(err.to_string().contains("broadcast"));
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError {
            channel: "agent_x".to_string(),
            reason: "expected value".to_string(),
        };
        assert_eq!(err.to_string(), "malformed envelope on agent_x: expected value");
    }
}
