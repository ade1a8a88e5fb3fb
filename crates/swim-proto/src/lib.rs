//! # swim-proto
//!
//! Wire codec and event model for the SWIM membership protocol.
//!
//! This crate implements:
//! - [`event`] — one typed struct per protocol message, with
//!   build/validate, prepare-to-wire, and restore-from-wire steps
//! - [`codec`] — a self-describing CBOR batch codec for prepared events
//!
//! ## Event codes (stable, wire-compatible)
//!
//! | Code | Event |
//! |---|---|
//! | 0 | Ping |
//! | 1 | Ack |
//! | 2 | Join |
//! | 3 | Alive |
//! | 4 | Suspect |
//! | 5 | Left |
//! | 6 | Dead |
//! | 7 | Payload |
//! | 8 | AntiEntropy |
//! | 9 | Probe |
//! | 10 | ProbeAck |
//! | 13 | NewClusterSize |
//! | 14 | IndirectPing |
//! | 15 | IndirectAck |

pub mod codec;
pub mod event;
pub mod value;

/// Error types for protocol encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// An event's fields failed a build-time validation rule (e.g. a
    /// port of 0, or `attempt_number` of 0).
    #[error("validation error: {0}")]
    Validation(String),

    /// A restored event's prepared form had the wrong arity or a
    /// field of the wrong CBOR type for its event code.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// CBOR encoding of a batch failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// CBOR decoding of a batch failed entirely (the envelope itself
    /// is not valid CBOR, as opposed to a single unrecognized event
    /// code within an otherwise valid batch).
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

/// Convenience result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtoError>;

/// Event code for Ping.
pub const CODE_PING: u8 = 0;
/// Event code for Ack.
pub const CODE_ACK: u8 = 1;
/// Event code for Join.
pub const CODE_JOIN: u8 = 2;
/// Event code for Alive.
pub const CODE_ALIVE: u8 = 3;
/// Event code for Suspect.
pub const CODE_SUSPECT: u8 = 4;
/// Event code for Left.
pub const CODE_LEFT: u8 = 5;
/// Event code for Dead.
pub const CODE_DEAD: u8 = 6;
/// Event code for Payload.
pub const CODE_PAYLOAD: u8 = 7;
/// Event code for AntiEntropy.
pub const CODE_ANTI_ENTROPY: u8 = 8;
/// Event code for Probe.
pub const CODE_PROBE: u8 = 9;
/// Event code for ProbeAck.
pub const CODE_PROBE_ACK: u8 = 10;
/// Event code for NewClusterSize.
pub const CODE_NEW_CLUSTER_SIZE: u8 = 13;
/// Event code for IndirectPing.
pub const CODE_INDIRECT_PING: u8 = 14;
/// Event code for IndirectAck.
pub const CODE_INDIRECT_ACK: u8 = 15;
