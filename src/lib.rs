//! SMPTE 2022-1 Forward Error Correction
//!
//! An RTP (RFC 3550) packet codec paired with a SMPTE 2022-1 FEC engine for
//! MPEG2 transport streams carried over RTP.
//!
//! # Features
//!
//! - **RTP codec**: lossless decoding and encoding of RTP headers, CSRC lists,
//!   header extensions and padding, with every header violation reported
//! - **FEC codec**: SMPTE 2022-1 FEC header decoding, validation and XOR parity
//!   computation
//! - **Generator**: column and row FEC streams computed from a media stream
//! - **Receiver**: media and FEC packets in any order, cascading recovery and
//!   an ordered output stream with loss statistics
//! - **CLI Interface**: UDP generator and receiver, packet inspector and a
//!   loss simulator
//!
//! # Architecture
//!
//! ```text
//! Media (RTP/MP2T) → FecGenerator → COL/ROW FEC (RTP/PT 96)
//! Media + FEC (any order) → FecReceiver → ordered media payloads
//! ```
//!
//! # Example
//!
//! ```rust
//! use smpte2022_fec::config::{MatrixConfig, ReceiverConfig, MP2T_PT};
//! use smpte2022_fec::generator::{FecCollector, FecGenerator};
//! use smpte2022_fec::receiver::FecReceiver;
//! use smpte2022_fec::rtp::RtpPacket;
//!
//! let medias: Vec<RtpPacket> = (0..16u32)
//!     .map(|seq| RtpPacket::create(seq, u64::from(seq) * 3003, MP2T_PT, vec![seq as u8; 188]))
//!     .collect();
//!
//! // Generate the FEC streams of a 4x4 matrix
//! let mut generator = FecGenerator::new(MatrixConfig::new(4, 4), FecCollector::new()).unwrap();
//! for media in &medias {
//!     generator.put_media(media.clone()).unwrap();
//! }
//! let (cols, _rows) = generator.listener_mut().drain();
//!
//! // Lose packet 5, the column FEC packets rebuild it
//! let mut receiver = FecReceiver::new(Vec::new(), ReceiverConfig::default()).unwrap();
//! for media in medias.iter().filter(|media| media.sequence.value() != 5) {
//!     receiver.put_media(media.clone()).unwrap();
//! }
//! for col in cols {
//!     receiver.put_fec(col).unwrap();
//! }
//! receiver.flush().unwrap();
//!
//! assert_eq!(receiver.stats().media_recovered, 1);
//! assert_eq!(receiver.get_ref().len(), 16 * 188);
//! ```

pub mod config;
pub mod error;
pub mod fec;
pub mod generator;
pub mod logging;
pub mod receiver;
pub mod rtp;
pub mod transport;

pub use config::{MatrixConfig, ReceiverConfig};
pub use error::{Error, Result};
pub use fec::FecPacket;
pub use generator::{FecGenerator, FecListener};
pub use receiver::FecReceiver;
pub use rtp::{RtpPacket, SequenceNumber};
