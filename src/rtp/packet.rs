//! RFC 3550 RTP packet codec.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       sequence number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           synchronization source (SSRC) identifier            |
//! +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
//! |            contributing source (CSRC) identifiers             |
//! |                             ....                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use crate::config::{DYNAMIC_PT, MP2T_CLOCK_RATE, MP2T_PT};
use crate::error::{Error, Result};
use crate::rtp::SequenceNumber;
use std::fmt;
use thiserror::Error;

/// Length of the fixed RTP header.
pub const HEADER_LENGTH: usize = 12;

/// Maximum number of CSRC identifiers (4-bit CC field).
pub const MAX_CSRC_COUNT: usize = 15;

/// The only RTP version this codec accepts.
pub const RTP_VERSION: u8 = 2;

const V_MASK: u8 = 0xc0;
const V_SHIFT: u8 = 6;
const P_MASK: u8 = 0x20;
const X_MASK: u8 = 0x10;
const CC_MASK: u8 = 0x0f;
const M_MASK: u8 = 0x80;
const PT_MASK: u8 = 0x7f;

/// A single rule broken by an RTP packet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RtpViolation {
    #[error("RTP header: need at least 12 bytes")]
    TruncatedHeader,

    #[error("RTP header: version must be set to 2, found {0}")]
    BadVersion(u8),

    #[error("RTP header: bad padding length")]
    PaddingLength,

    #[error("RTP header: CSRC list exceeds packet length")]
    TruncatedCsrc,

    #[error("RTP header: bad extension length")]
    ExtensionLength,

    #[error("RTP header: {0} CSRC identifiers do not fit the CC field")]
    TooManyCsrc(usize),

    #[error("RTP packet must have a payload")]
    EmptyPayload,
}

/// RTP header extension (RFC 3550 §5.3.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderExtension {
    /// Profile-defined identifier.
    pub profile: u16,
    data: Vec<u8>,
}

impl HeaderExtension {
    /// Create an extension, zero-padding `data` to a whole number of 32-bit words.
    pub fn new(profile: u16, mut data: Vec<u8>) -> Self {
        let rem = data.len() % 4;
        if rem != 0 {
            data.resize(data.len() + 4 - rem, 0);
        }
        Self { profile, data }
    }

    /// Extension body (multiple of 4 bytes).
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// An RTP packet: header fields plus payload.
///
/// Decoding never fails outright; rules broken by the input are collected and
/// reported by [`RtpPacket::errors`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// RTP version (2 bits).
    pub version: u8,
    /// Marker bit.
    pub marker: bool,
    /// Payload type (7 bits).
    pub payload_type: u8,
    /// Sequence number.
    pub sequence: SequenceNumber,
    /// Media timestamp.
    pub timestamp: u32,
    /// Synchronization source.
    pub ssrc: u32,
    /// Contributing sources.
    pub csrc: Vec<u32>,
    /// Header extension, if the X bit is set.
    pub extension: Option<HeaderExtension>,
    /// Number of trailing padding octets (0 when the P bit is clear).
    pub padding: u8,
    /// Payload bytes, padding excluded.
    pub payload: Vec<u8>,
    violations: Vec<RtpViolation>,
}

impl RtpPacket {
    fn blank() -> Self {
        Self {
            version: 0,
            marker: false,
            payload_type: 0,
            sequence: SequenceNumber::default(),
            timestamp: 0,
            ssrc: 0,
            csrc: Vec::new(),
            extension: None,
            padding: 0,
            payload: Vec::new(),
            violations: Vec::new(),
        }
    }

    /// Create a valid RTP packet, masking each field into its bit range.
    ///
    /// # Example
    ///
    /// ```
    /// use smpte2022_fec::rtp::RtpPacket;
    /// use smpte2022_fec::config::MP2T_PT;
    ///
    /// let rtp = RtpPacket::create(0x1_0005, 777, MP2T_PT, b"salut".to_vec());
    /// assert_eq!(rtp.sequence.value(), 5);
    /// assert!(rtp.is_valid_mp2t());
    /// ```
    pub fn create(sequence: u32, timestamp: u64, payload_type: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            version: RTP_VERSION,
            payload_type: payload_type & PT_MASK,
            sequence: SequenceNumber::new((sequence & 0xffff) as u16),
            timestamp: (timestamp & 0xffff_ffff) as u32,
            payload: payload.into(),
            ..Self::blank()
        }
    }

    /// Decode a datagram.
    ///
    /// Decoding stops at the first structural problem (short header, bad
    /// version, inconsistent padding, CSRC or extension length); fields not
    /// reached keep their defaults.
    pub fn parse(bytes: &[u8]) -> Self {
        let mut packet = Self::blank();

        if bytes.len() < HEADER_LENGTH {
            packet.violations.push(RtpViolation::TruncatedHeader);
            return packet;
        }

        packet.version = (bytes[0] & V_MASK) >> V_SHIFT;
        if packet.version != RTP_VERSION {
            return packet;
        }

        packet.marker = bytes[1] & M_MASK != 0;
        packet.payload_type = bytes[1] & PT_MASK;
        packet.sequence = SequenceNumber::new(u16::from_be_bytes([bytes[2], bytes[3]]));
        packet.timestamp = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        packet.ssrc = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);

        let mut end = bytes.len();
        if bytes[0] & P_MASK != 0 {
            let padding = bytes[end - 1];
            if padding == 0 || usize::from(padding) > end - HEADER_LENGTH {
                packet.violations.push(RtpViolation::PaddingLength);
                return packet;
            }
            packet.padding = padding;
            end -= usize::from(padding);
        }

        let mut offset = HEADER_LENGTH;
        let cc = usize::from(bytes[0] & CC_MASK);
        for _ in 0..cc {
            if offset + 4 > end {
                packet.violations.push(RtpViolation::TruncatedCsrc);
                return packet;
            }
            packet.csrc.push(read_u32(bytes, offset));
            offset += 4;
        }

        if bytes[0] & X_MASK != 0 {
            if offset + 4 > end {
                packet.violations.push(RtpViolation::ExtensionLength);
                return packet;
            }
            let profile = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
            let words = usize::from(u16::from_be_bytes([bytes[offset + 2], bytes[offset + 3]]));
            let data_start = offset + 4;
            let data_end = data_start + words * 4;
            if data_end > end {
                packet.violations.push(RtpViolation::ExtensionLength);
                return packet;
            }
            packet.extension = Some(HeaderExtension {
                profile,
                data: bytes[data_start..data_end].to_vec(),
            });
            offset = data_end;
        }

        packet.payload = bytes[offset..end].to_vec();
        packet
    }

    /// Decode a datagram and reject it if any rule is broken.
    pub fn try_parse(bytes: &[u8]) -> Result<Self> {
        let packet = Self::parse(bytes);
        packet.validate()?;
        Ok(packet)
    }

    /// Every rule broken by this packet.
    pub fn errors(&self) -> Vec<RtpViolation> {
        let mut errors = self.violations.clone();
        if self.version != RTP_VERSION {
            errors.push(RtpViolation::BadVersion(self.version));
        }
        if self.csrc.len() > MAX_CSRC_COUNT {
            errors.push(RtpViolation::TooManyCsrc(self.csrc.len()));
        }
        if self.payload.is_empty() {
            errors.push(RtpViolation::EmptyPayload);
        }
        errors
    }

    /// Returns true if no rule is broken.
    pub fn is_valid(&self) -> bool {
        self.errors().is_empty()
    }

    /// Returns true if this is a valid RTP packet carrying MPEG2-TS.
    pub fn is_valid_mp2t(&self) -> bool {
        self.is_valid() && self.payload_type == MP2T_PT
    }

    /// Returns true if this packet carries a SMPTE 2022-1 FEC payload type.
    pub fn is_fec(&self) -> bool {
        self.payload_type == DYNAMIC_PT
    }

    /// `Ok(())` if valid, else [`Error::MalformedPacket`] listing every violation.
    pub fn validate(&self) -> Result<()> {
        let errors = self.errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::MalformedPacket(errors))
        }
    }

    /// Whether the P bit is set.
    pub fn has_padding(&self) -> bool {
        self.padding > 0
    }

    /// Whether the X bit is set.
    pub fn has_extension(&self) -> bool {
        self.extension.is_some()
    }

    /// Clock rate implied by the payload type (90 kHz for MPEG2-TS, else 1).
    pub fn clock_rate(&self) -> u32 {
        if self.payload_type == MP2T_PT {
            MP2T_CLOCK_RATE
        } else {
            1
        }
    }

    /// Timestamp converted to seconds.
    pub fn time(&self) -> f64 {
        f64::from(self.timestamp) / f64::from(self.clock_rate())
    }

    /// Size of the encoded header, CSRC list and extension included.
    pub fn header_size(&self) -> usize {
        HEADER_LENGTH
            + 4 * self.csrc.len().min(MAX_CSRC_COUNT)
            + self.extension.as_ref().map_or(0, |ext| 4 + ext.data.len())
    }

    /// Payload length in bytes.
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    /// Encode the header (fixed part, CSRC list, extension).
    pub fn header_bytes(&self) -> Vec<u8> {
        let csrc = &self.csrc[..self.csrc.len().min(MAX_CSRC_COUNT)];
        let mut header = Vec::with_capacity(self.header_size());

        let mut first = (self.version << V_SHIFT) & V_MASK;
        if self.has_padding() {
            first |= P_MASK;
        }
        if self.has_extension() {
            first |= X_MASK;
        }
        first |= (csrc.len() as u8) & CC_MASK;
        header.push(first);
        let marker = if self.marker { M_MASK } else { 0 };
        header.push(marker | (self.payload_type & PT_MASK));
        header.extend_from_slice(&self.sequence.value().to_be_bytes());
        header.extend_from_slice(&self.timestamp.to_be_bytes());
        header.extend_from_slice(&self.ssrc.to_be_bytes());
        for contributor in csrc {
            header.extend_from_slice(&contributor.to_be_bytes());
        }
        if let Some(ext) = &self.extension {
            header.extend_from_slice(&ext.profile.to_be_bytes());
            header.extend_from_slice(&((ext.data.len() / 4) as u16).to_be_bytes());
            header.extend_from_slice(&ext.data);
        }
        header
    }

    /// Encode the whole packet: header, payload, then padding.
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = self.header_bytes();
        bytes.reserve(self.payload.len() + usize::from(self.padding));
        bytes.extend_from_slice(&self.payload);
        if self.has_padding() {
            bytes.resize(bytes.len() + usize::from(self.padding) - 1, 0);
            bytes.push(self.padding);
        }
        bytes
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

impl fmt::Display for RtpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let errors: Vec<String> = self.errors().iter().map(ToString::to_string).collect();
        writeln!(f, "version      = {}", self.version)?;
        writeln!(f, "errors       = {:?}", errors)?;
        writeln!(f, "padding      = {}", self.has_padding())?;
        writeln!(f, "extension    = {}", self.has_extension())?;
        writeln!(f, "marker       = {}", self.marker)?;
        writeln!(f, "payload type = {}", self.payload_type)?;
        writeln!(f, "sequence     = {}", self.sequence)?;
        writeln!(f, "timestamp    = {}", self.timestamp)?;
        writeln!(f, "clock rate   = {}", self.clock_rate())?;
        writeln!(f, "time         = {:.0}", self.time())?;
        writeln!(f, "ssrc         = {}", self.ssrc)?;
        writeln!(f, "csrc count   = {}", self.csrc.len())?;
        write!(f, "payload size = {}", self.payload_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_header_reports_all_errors() {
        let rtp = RtpPacket::parse(&[0u8; HEADER_LENGTH - 1]);
        assert_eq!(
            rtp.errors(),
            vec![
                RtpViolation::TruncatedHeader,
                RtpViolation::BadVersion(0),
                RtpViolation::EmptyPayload
            ]
        );
    }

    #[test]
    fn test_bad_version() {
        let rtp = RtpPacket::parse(&[0u8; HEADER_LENGTH]);
        assert!(!rtp.is_valid());
        assert!(rtp.errors().contains(&RtpViolation::BadVersion(0)));
    }

    #[test]
    fn test_padding_enabled_but_not_present() {
        let mut bytes = [0u8; HEADER_LENGTH];
        bytes[0] = 0xa0;
        let rtp = RtpPacket::parse(&bytes);
        assert!(rtp.errors().contains(&RtpViolation::PaddingLength));
    }

    #[test]
    fn test_header_fields() {
        let bytes = hex::decode("80a1a425cafeb504b0605ebb1234").unwrap();
        let rtp = RtpPacket::parse(&bytes);

        assert!(rtp.is_valid());
        assert!(rtp.marker);
        assert_eq!(rtp.payload_type, MP2T_PT);
        assert_eq!(rtp.sequence.value(), 42021);
        assert_eq!(rtp.timestamp, 3_405_690_116);
        assert_eq!(rtp.clock_rate(), 90_000);
        assert_eq!(rtp.time() as u64, 37841);
        assert_eq!(rtp.ssrc, 2_959_105_723);
        assert!(rtp.csrc.is_empty());
        assert_eq!(rtp.payload, vec![0x12, 0x34]);
    }

    #[test]
    fn test_padding_extension_and_csrc() {
        let bytes = hex::decode(
            "b5a1a401cafea421b0605ebb111111112222222233333333\
             4444444455555555000000018765432112340002",
        )
        .unwrap();
        let rtp = RtpPacket::parse(&bytes);

        assert!(rtp.is_valid(), "{:?}", rtp.errors());
        assert!(rtp.has_padding() && rtp.has_extension() && rtp.marker);
        assert_eq!(rtp.payload_type, 33);
        assert_eq!(rtp.sequence.value(), 0xa401);
        assert_eq!(rtp.timestamp, 3_405_685_793);
        assert_eq!(
            rtp.csrc,
            vec![0x1111_1111, 0x2222_2222, 0x3333_3333, 0x4444_4444, 0x5555_5555]
        );
        assert_eq!(rtp.extension.as_ref().map(|e| e.profile), Some(0));
        assert_eq!(rtp.payload, vec![0x12, 0x34]);
        assert_eq!(rtp.serialize(), bytes);
    }

    #[test]
    fn test_extension_longer_than_packet() {
        let bytes = hex::decode("900100010000000000000000beef0009aabbccdd").unwrap();
        let rtp = RtpPacket::parse(&bytes);
        assert!(rtp.errors().contains(&RtpViolation::ExtensionLength));
    }

    #[test]
    fn test_header_bytes() {
        let rtp = RtpPacket::create(6, 777, MP2T_PT, vec![0, 1, 2, 3]);
        assert_eq!(hex::encode(rtp.header_bytes()), "802100060000030900000000");

        let rtp = RtpPacket::create(0xffff_ffff, 0xff_ffff_ffff, DYNAMIC_PT, vec![0u8; 1023]);
        assert_eq!(hex::encode(rtp.header_bytes()), "8060ffffffffffff00000000");
        assert_eq!(rtp.sequence.value(), 65535);
        assert_eq!(rtp.timestamp, u32::MAX);
        assert_eq!(RtpPacket::parse(&rtp.serialize()), rtp);
    }

    #[test]
    fn test_create_is_valid() {
        let p = RtpPacket::create(10, 1024, MP2T_PT, b"The payload string".to_vec());
        let q = RtpPacket::create(11, 1028, MP2T_PT, vec![0x00, 0x11, 0x22, 0x33]);
        let r = RtpPacket::create(11, 1028, DYNAMIC_PT, vec![0xcc, 0xaa, 0xff, 0xee]);
        assert!(p.is_valid_mp2t() && q.is_valid_mp2t() && r.is_valid());
        assert!(!r.is_valid_mp2t());
        assert!(r.is_fec());
    }

    #[test]
    fn test_validate_reports_malformed() {
        let rtp = RtpPacket::create(1, 1, MP2T_PT, Vec::new());
        match rtp.validate() {
            Err(Error::MalformedPacket(violations)) => {
                assert_eq!(violations, vec![RtpViolation::EmptyPayload]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_display() {
        let rtp = RtpPacket::create(6, 777, MP2T_PT, b"salut les loulous".to_vec());
        let text = rtp.to_string();
        assert!(text.contains("sequence     = 6"));
        assert!(text.contains("clock rate   = 90000"));
        assert!(text.ends_with("payload size = 17"));
    }
}
