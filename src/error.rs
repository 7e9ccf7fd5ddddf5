//! Error types for the RTP codec and the FEC engine.

use crate::fec::FecViolation;
use crate::rtp::{RtpViolation, SequenceNumber};
use thiserror::Error;

/// Result type alias for codec and engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding packets or driving the FEC engine.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error while writing the recovered stream or using a socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// RTP packet failed one or more header checks.
    #[error("Malformed RTP packet: {}", join(.0))]
    MalformedPacket(Vec<RtpViolation>),

    /// RTP packet is structurally valid but carries the wrong payload type.
    #[error("Unexpected payload type: expected {expected}, found {found}")]
    UnexpectedPayloadType { expected: u8, found: u8 },

    /// FEC packet or FEC stream does not conform to SMPTE 2022-1.
    #[error("FEC protocol violation: {}", join(.0))]
    FecProtocolViolation(Vec<FecViolation>),

    /// Packets handed to the FEC computation are not `snbase + i * offset`.
    #[error("Packet {index} has sequence {found}, expected {expected} (snbase + i * offset)")]
    SequenceMismatch {
        index: usize,
        expected: SequenceNumber,
        found: SequenceNumber,
    },

    /// Media sequence is not one of the packets protected by a FEC packet.
    #[error(
        "Media sequence {media_sequence} is not protected (snbase={snbase}, offset={offset}, na={na})"
    )]
    NotProtected {
        media_sequence: SequenceNumber,
        snbase: SequenceNumber,
        offset: u8,
        na: u8,
    },

    /// Media sequence was expected in the missing set of a FEC packet.
    #[error("Media sequence {0} is not registered as missing")]
    NotMissing(SequenceNumber),

    /// Cascade target has no bookkeeping entry left (internal bug).
    #[error("FEC cascade: no cross entry linked to media sequence {media_sequence}")]
    CascadeInconsistency { media_sequence: SequenceNumber },

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<FecViolation> for Error {
    fn from(violation: FecViolation) -> Self {
        Error::FecProtocolViolation(vec![violation])
    }
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
