//! SMPTE 2022-1 FEC packets and XOR parity.

mod packet;
mod xor;

pub use packet::{Algorithm, Direction, FecPacket, FecViolation, HEADER_LENGTH};
pub use xor::xor_into;
