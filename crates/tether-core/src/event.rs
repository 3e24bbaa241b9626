//! Event payloads delivered to local listeners.

use crate::error_codec::RemoteError;
use serde_json::Value;
use tether_protocol::FrameError;
use thiserror::Error;

pub use tether_protocol::ERROR_EVENT;

/// Event raised by a connection for every decoded frame.
pub const MESSAGE_EVENT: &str = "message";

/// Errors carried on the reserved `error` event.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EventError {
    /// An error raised by the remote side and reconstructed locally.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A frame that could not be decoded.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// A plain value raised as an error.
    #[error("Error event raised with value: {0}")]
    Value(Value),
}

/// What a listener receives when an event fires.
#[derive(Debug, Clone, PartialEq)]
pub enum Emission {
    /// Positional arguments.
    Args(Vec<Value>),
    /// An error value.
    Error(EventError),
}

impl Emission {
    /// Positional arguments, empty for errors.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        match self {
            Emission::Args(args) => args,
            Emission::Error(_) => &[],
        }
    }

    /// The first positional argument.
    #[must_use]
    pub fn first(&self) -> Option<&Value> {
        self.args().first()
    }

    /// The carried error, if any.
    #[must_use]
    pub fn error(&self) -> Option<&EventError> {
        match self {
            Emission::Error(error) => Some(error),
            Emission::Args(_) => None,
        }
    }
}

impl From<Vec<Value>> for Emission {
    fn from(args: Vec<Value>) -> Self {
        Emission::Args(args)
    }
}

impl From<EventError> for Emission {
    fn from(error: EventError) -> Self {
        Emission::Error(error)
    }
}

impl From<RemoteError> for Emission {
    fn from(error: RemoteError) -> Self {
        Emission::Error(EventError::Remote(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_emission_accessors() {
        let args = Emission::from(vec![json!("a"), json!(2)]);
        assert_eq!(args.first(), Some(&json!("a")));
        assert!(args.error().is_none());

        let error = Emission::from(EventError::Value(json!("bad error")));
        assert!(error.args().is_empty());
        assert_eq!(error.error(), Some(&EventError::Value(json!("bad error"))));
    }
}
