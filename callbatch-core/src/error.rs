use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Coarse classification shared by every error the batching layer raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Protocol,
    Config,
    Encode,
    Decode,
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::Protocol => "protocol",
            ErrorCode::Config => "config",
            ErrorCode::Encode => "encode",
            ErrorCode::Decode => "decode",
            ErrorCode::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// Misuse of a recording session. Recorded as the sticky session error and
/// reported when the session closes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("set_destination() and client() must only be called inside an open recording session")]
    NotRecording,
    #[error("set_destination() must only be called before each client() call")]
    DuplicateDestination,
    #[error("client() must only be called after each set_destination() call")]
    MissingDestination,
    #[error("a recording session is already open on this recorder by the current thread")]
    AlreadyOpen,
    #[error("call queue has already been handed off for execution")]
    QueueSealed,
    #[error("payload selector {0} does not match any method of interface {1}")]
    UnknownSelector(String, String),
}

/// A per-call configuration value was missing from the call context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("you must populate the interface value in the call context")]
    MissingInterface,
    #[error("you must populate the method value in the call context")]
    MissingMethod,
    #[error("you must populate the destination value in the call context")]
    MissingDestination,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("method {method} is not part of interface {interface}")]
    UnknownMethod { interface: String, method: String },
    #[error("failed to encode arguments for {method}: {reason}")]
    Arguments { method: String, reason: String },
}

/// Failure to turn one response into its destination value. Scoped to a
/// single call; never invalidates the rest of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("method {method} is not part of interface {interface}")]
    UnknownMethod { interface: String, method: String },
    #[error("malformed response for {method}: {reason}")]
    Malformed { method: String, reason: String },
    #[error("response for {method} does not fit destination of type {expected}: {reason}")]
    Type {
        method: String,
        expected: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseIdError {
    #[error("expected {expected} bytes, found {found}")]
    Length { expected: usize, found: usize },
    #[error("invalid hex: {0}")]
    Hex(String),
}

impl ProtocolError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::Protocol
    }
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::Config
    }
}

impl EncodeError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::Encode
    }
}

impl DecodeError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::Decode
    }

    pub fn method(&self) -> &str {
        match self {
            DecodeError::UnknownMethod { method, .. }
            | DecodeError::Malformed { method, .. }
            | DecodeError::Type { method, .. } => method,
        }
    }
}
