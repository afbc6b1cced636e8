use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(
        "could not connect to {address}: {source}. Is the plugin instance running and its editor window open?"
    )]
    Connect {
        address: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[error("transport already open")]
    AlreadyOpen,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge is not open")]
    NotOpen,
    #[error("bridge already open")]
    AlreadyOpen,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("dangling async call with host: {method}")]
    Dangling { method: String },
    #[error("host rejected {method}: {message}")]
    Rejected { method: String, message: String },
    #[error("bridge dropped before {method} settled")]
    Closed { method: String },
    #[error("could not decode result of {method}: {source}")]
    Decode {
        method: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),
    #[error("state changes must be a json object, got: {0}")]
    StateNotAnObject(serde_json::Value),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    Call(#[from] CallError),
}

#[derive(Debug, Error)]
pub enum BridgeConfigError {
    #[error("invalid loopback url {value}: {source}")]
    InvalidUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("loopback url must use ws:// or wss://, got {0}")]
    UnsupportedScheme(String),
}

/// Failure raised by a registered handler. Its text is what the host receives
/// in the `reject` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(format!("invalid arguments: {e}"))
    }
}
