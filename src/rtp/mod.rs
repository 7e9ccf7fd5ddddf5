//! RTP (RFC 3550) packet codec and wrapping sequence numbers.

mod packet;
mod sequence;

pub use packet::{HeaderExtension, RtpPacket, RtpViolation, HEADER_LENGTH, MAX_CSRC_COUNT, RTP_VERSION};
pub use sequence::{validity_window, SequenceNumber};
