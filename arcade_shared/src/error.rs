//! Error taxonomy.
//!
//! Every error in the core belongs to one of a few classes:
//! - ECS misuse (`EcsError`), recoverable by the calling system.
//! - Malformed packets (`DecodeError`), recoverable by dropping the packet.
//! - Transport failures (`NetError`), which end the affected session.
//! - Rejected requests (`RoomError`), answered with a response payload.
//! - Illegal session transitions (`SessionError`).
//!
//! None of them are fatal to the process except [`EcsError::Corrupted`],
//! which signals a broken internal invariant.

use thiserror::Error;

use crate::ecs::Entity;

/// Errors raised by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EcsError {
    /// The handle is stale (slot reused or destroyed) or was never issued.
    #[error("entity {0} is not alive")]
    EntityInvalid(Entity),

    /// Internal store bookkeeping no longer agrees with itself.
    #[error("registry invariant violated: {0}")]
    Corrupted(&'static str),
}

impl EcsError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, EcsError::Corrupted(_))
    }
}

/// Packet decoding failures. All variants are of the `InvalidFormat` class.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("buffer too short: need {needed} bytes, have {available}")]
    TooShort { needed: usize, available: usize },

    #[error("bad magic number {0:#06x}")]
    BadMagic(u16),

    #[error("protocol version mismatch: got {got}, expected {expected}")]
    VersionMismatch { got: u8, expected: u8 },

    #[error("declared payload length {declared} does not match remaining {remaining}")]
    LengthMismatch { declared: usize, remaining: usize },

    #[error("unknown op code {0:#04x}")]
    UnknownOpCode(u8),

    #[error("payload of {0} bytes exceeds the body limit")]
    BodyTooLarge(usize),

    #[error("string of {0} bytes exceeds the limit")]
    StringTooLong(usize),

    #[error("vector of {0} elements exceeds the limit")]
    VectorTooLong(usize),

    #[error("string is not valid utf-8")]
    InvalidUtf8,

    #[error("invalid value {value} for {field}")]
    InvalidEnum { field: &'static str, value: u8 },

    #[error("{0} unread bytes after payload")]
    TrailingBytes(usize),
}

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("peer disconnected")]
    Disconnected,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("invalid format: {0}")]
    InvalidFormat(#[from] DecodeError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetError {
    /// Whether the session the error occurred on must be torn down.
    pub fn ends_session(&self) -> bool {
        !matches!(self, NetError::InvalidFormat(_))
    }
}

/// Rejections of room and lobby requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("room is at capacity")]
    RegistryFull,

    #[error("invalid request parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("room not found")]
    NotFound,

    #[error("game already started")]
    AlreadyStarted,

    #[error("session is not authenticated")]
    NotAuthenticated,

    #[error("banned from this room")]
    Banned,
}

/// Illegal session state machine transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("cannot apply {event} in state {from}")]
    InvalidTransition { from: &'static str, event: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_corruption_is_fatal() {
        assert!(EcsError::Corrupted("dense/sparse mismatch").is_fatal());
        assert!(!EcsError::EntityInvalid(Entity::from_raw_parts(3, 1)).is_fatal());
    }

    #[test]
    fn malformed_packets_keep_the_session() {
        assert!(!NetError::InvalidFormat(DecodeError::UnknownOpCode(0x77)).ends_session());
        assert!(NetError::Timeout("pong").ends_session());
        assert!(NetError::Disconnected.ends_session());
    }
}
