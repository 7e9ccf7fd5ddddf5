//! SMPTE 2022-1 FEC packet codec and XOR parity computation.
//!
//! The FEC header travels as the payload of an RTP packet with the dynamic
//! payload type 96:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |       SNBase low bits         |        Length recovery        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |E| PT recovery |                    Mask                       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          TS recovery                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |N|D|type |index|    Offset     |      NA       |SNBase ext bits|
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use crate::config::{matrix_limits, DYNAMIC_PT, MP2T_PT};
use crate::error::{Error, Result};
use crate::fec::xor_into;
use crate::rtp::{RtpPacket, RtpViolation, SequenceNumber};
use std::fmt;
use thiserror::Error;

/// Length of the SMPTE 2022-1 FEC header.
pub const HEADER_LENGTH: usize = 16;

const E_MASK: u8 = 0x80;
const PT_MASK: u8 = 0x7f;
const N_MASK: u8 = 0x80;
const D_MASK: u8 = 0x40;
const T_MASK: u8 = 0x38;
const T_SHIFT: u8 = 3;
const I_MASK: u8 = 0x07;
const MASK_BITS: u32 = 0x00ff_ffff;

/// Which dimension of the matrix a FEC packet protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Every L-th packet of a matrix (`na = D`, `offset = L`).
    Col,
    /// L consecutive packets (`na = L`, `offset = 1`).
    Row,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Col => write!(f, "COL"),
            Direction::Row => write!(f, "ROW"),
        }
    }
}

/// FEC algorithm carried in the 3-bit type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Xor,
    Hamming,
    ReedSolomon,
    Reserved(u8),
}

impl Algorithm {
    /// Decode the 3-bit type field.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => Algorithm::Xor,
            1 => Algorithm::Hamming,
            2 => Algorithm::ReedSolomon,
            other => Algorithm::Reserved(other),
        }
    }

    /// Encode as the 3-bit type field.
    pub fn bits(self) -> u8 {
        match self {
            Algorithm::Xor => 0,
            Algorithm::Hamming => 1,
            Algorithm::ReedSolomon => 2,
            Algorithm::Reserved(bits) => bits & 0x07,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Xor => write!(f, "XOR"),
            Algorithm::Hamming => write!(f, "Hamming"),
            Algorithm::ReedSolomon => write!(f, "ReedSolomon"),
            Algorithm::Reserved(bits) => write!(f, "Reserved({})", bits),
        }
    }
}

/// A single SMPTE 2022-1 rule broken by a FEC packet or FEC stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FecViolation {
    #[error("{0}")]
    Rtp(RtpViolation),

    #[error("RTP header: payload type must be set to 96, found {0}")]
    PayloadType(u8),

    #[error("SMPTE 2022-1 header: need 16 bytes, found {0}")]
    TruncatedHeader(usize),

    #[error("SMPTE 2022-1 header: extended must be set to one")]
    NotExtended,

    #[error("SMPTE 2022-1 header: mask must be set to zero, found {0:#08x}")]
    NonZeroMask(u32),

    #[error("SMPTE 2022-1 header: N must be set to zero")]
    NBitSet,

    #[error("SMPTE 2022-1 header: only XOR FEC algorithm is handled, found {0}")]
    UnsupportedAlgorithm(Algorithm),

    #[error("SMPTE 2022-1 header: index must be set to zero, found {0}")]
    NonZeroIndex(u8),

    #[error("FEC packet must have a payload")]
    EmptyPayload,

    #[error("SMPTE 2022-1 header: 1 <= L <= 50 failed, L = {0}")]
    ColumnsOutOfRange(u8),

    #[error("SMPTE 2022-1 header: 4 <= D <= 50 failed, D = {0}")]
    RowsOutOfRange(u8),

    #[error("SMPTE 2022-1 header: L * D <= 256 failed, {columns} x {rows}")]
    MatrixTooLarge { columns: u8, rows: u8 },

    #[error("SMPTE 2022-1 header: row FEC offset must be 1, found {0}")]
    RowOffset(u8),

    #[error("FEC computation needs exactly {expected} packets, got {found}")]
    PacketCount { expected: usize, found: usize },

    #[error(
        "Another {direction} FEC packet (n°{registered}) already protects media packet n°{media_sequence}, refusing n°{incoming}"
    )]
    SlotOverwrite {
        direction: Direction,
        media_sequence: SequenceNumber,
        registered: SequenceNumber,
        incoming: SequenceNumber,
    },
}

/// A SMPTE 2022-1 FEC packet.
///
/// Besides the wire fields, a FEC packet held by the receiver tracks which of
/// its protected media packets are still `missing`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FecPacket {
    /// RTP sequence number of the FEC stream (independent per direction).
    pub sequence: SequenceNumber,
    pub algorithm: Algorithm,
    pub direction: Direction,
    /// Sequence number of the first protected media packet (24-bit on the wire).
    pub snbase: u32,
    /// Distance between two protected media packets.
    pub offset: u8,
    /// Number of protected media packets.
    pub na: u8,
    pub payload_type_recovery: u8,
    pub timestamp_recovery: u32,
    pub length_recovery: u16,
    pub payload_recovery: Vec<u8>,
    /// E bit, always set by this profile.
    pub extended: bool,
    /// 24-bit mask, always zero by this profile.
    pub mask: u32,
    /// N bit, always clear by this profile.
    pub n: bool,
    /// Index field, always zero by this profile.
    pub index: u8,
    missing: Vec<SequenceNumber>,
    violations: Vec<FecViolation>,
}

impl FecPacket {
    fn blank() -> Self {
        Self {
            sequence: SequenceNumber::default(),
            algorithm: Algorithm::Xor,
            direction: Direction::Col,
            snbase: 0,
            offset: 0,
            na: 0,
            payload_type_recovery: 0,
            timestamp_recovery: 0,
            length_recovery: 0,
            payload_recovery: Vec::new(),
            extended: true,
            mask: 0,
            n: false,
            index: 0,
            missing: Vec::new(),
            violations: Vec::new(),
        }
    }

    /// Decode the FEC header carried by an RTP packet.
    ///
    /// Decoding never fails outright, see [`FecPacket::errors`].
    pub fn parse(rtp: &RtpPacket) -> Self {
        let mut fec = Self::blank();
        fec.sequence = rtp.sequence;

        let rtp_errors = rtp.errors();
        if !rtp_errors.is_empty() {
            fec.violations = rtp_errors.into_iter().map(FecViolation::Rtp).collect();
            return fec;
        }
        if rtp.payload_type != DYNAMIC_PT {
            fec.violations.push(FecViolation::PayloadType(rtp.payload_type));
            return fec;
        }

        let p = &rtp.payload;
        if p.len() < HEADER_LENGTH {
            fec.violations.push(FecViolation::TruncatedHeader(p.len()));
            return fec;
        }

        fec.snbase = (u32::from(p[15]) << 16) | u32::from(u16::from_be_bytes([p[0], p[1]]));
        fec.length_recovery = u16::from_be_bytes([p[2], p[3]]);
        fec.extended = p[4] & E_MASK != 0;
        fec.payload_type_recovery = p[4] & PT_MASK;
        fec.mask = u32::from_be_bytes([0, p[5], p[6], p[7]]);
        fec.timestamp_recovery = u32::from_be_bytes([p[8], p[9], p[10], p[11]]);
        fec.n = p[12] & N_MASK != 0;
        fec.direction = if p[12] & D_MASK != 0 {
            Direction::Row
        } else {
            Direction::Col
        };
        fec.algorithm = Algorithm::from_bits((p[12] & T_MASK) >> T_SHIFT);
        fec.index = p[12] & I_MASK;
        fec.offset = p[13];
        fec.na = p[14];
        fec.payload_recovery = p[HEADER_LENGTH..].to_vec();
        fec
    }

    /// Decode a whole datagram (RTP header + FEC header + payload).
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::parse(&RtpPacket::parse(bytes))
    }

    /// Compute a FEC packet protecting `packets` by XOR-ing their fields.
    ///
    /// `packets[i]` must have sequence `snbase + i * offset` where `snbase` is
    /// the sequence of `packets[0]`, `offset` is `L` for a column and 1 for a
    /// row. Every packet must be a valid RTP packet carrying MPEG2-TS.
    ///
    /// # Example
    ///
    /// ```
    /// use smpte2022_fec::config::MP2T_PT;
    /// use smpte2022_fec::fec::{Algorithm, Direction, FecPacket};
    /// use smpte2022_fec::rtp::{RtpPacket, SequenceNumber};
    ///
    /// let packets: Vec<_> = (10..14)
    ///     .map(|seq| RtpPacket::create(seq, 100 + u64::from(seq), MP2T_PT, vec![seq as u8; 10]))
    ///     .collect();
    /// let fec = FecPacket::compute(SequenceNumber::new(12), Algorithm::Xor, Direction::Row, 4, 1, &packets)
    ///     .unwrap();
    ///
    /// assert_eq!(fec.snbase, 10);
    /// assert_eq!((fec.offset, fec.na), (1, 4));
    /// assert_eq!(fec.timestamp_recovery, 110 ^ 111 ^ 112 ^ 113);
    /// ```
    pub fn compute<'a>(
        sequence: SequenceNumber,
        algorithm: Algorithm,
        direction: Direction,
        columns: u8,
        rows: u8,
        packets: impl IntoIterator<Item = &'a RtpPacket>,
    ) -> Result<Self> {
        if algorithm != Algorithm::Xor {
            return Err(FecViolation::UnsupportedAlgorithm(algorithm).into());
        }

        let mut fec = Self::blank();
        fec.sequence = sequence;
        fec.algorithm = algorithm;
        fec.direction = direction;
        match direction {
            Direction::Col => {
                if columns == 0 {
                    return Err(FecViolation::ColumnsOutOfRange(columns).into());
                }
                fec.na = rows;
                fec.offset = columns;
            }
            Direction::Row => {
                fec.na = columns;
                fec.offset = 1;
            }
        }

        let packets: Vec<&RtpPacket> = packets.into_iter().collect();
        if fec.na == 0 || packets.len() != usize::from(fec.na) {
            return Err(FecViolation::PacketCount {
                expected: usize::from(fec.na),
                found: packets.len(),
            }
            .into());
        }

        let snbase = packets[0].sequence;
        fec.snbase = u32::from(snbase.value());

        let mut size = 0;
        for (i, packet) in packets.iter().enumerate() {
            packet.validate()?;
            if packet.payload_type != MP2T_PT {
                return Err(Error::UnexpectedPayloadType {
                    expected: MP2T_PT,
                    found: packet.payload_type,
                });
            }
            let expected = snbase.wrapping_add((i as u16).wrapping_mul(u16::from(fec.offset)));
            if packet.sequence != expected {
                return Err(Error::SequenceMismatch {
                    index: i,
                    expected,
                    found: packet.sequence,
                });
            }
            size = size.max(packet.payload_size());
        }

        fec.payload_recovery = vec![0u8; size];
        for packet in &packets {
            fec.payload_type_recovery ^= packet.payload_type;
            fec.timestamp_recovery ^= packet.timestamp;
            fec.length_recovery ^= packet.payload_size() as u16;
            xor_into(&mut fec.payload_recovery, &packet.payload);
        }
        Ok(fec)
    }

    /// Every rule broken by this packet.
    pub fn errors(&self) -> Vec<FecViolation> {
        use matrix_limits::*;

        let mut errors = self.violations.clone();
        if !self.extended {
            errors.push(FecViolation::NotExtended);
        }
        if self.mask != 0 {
            errors.push(FecViolation::NonZeroMask(self.mask));
        }
        if self.n {
            errors.push(FecViolation::NBitSet);
        }
        if self.algorithm != Algorithm::Xor {
            errors.push(FecViolation::UnsupportedAlgorithm(self.algorithm));
        }
        if self.index != 0 {
            errors.push(FecViolation::NonZeroIndex(self.index));
        }
        if self.payload_recovery.is_empty() {
            errors.push(FecViolation::EmptyPayload);
        }
        let columns = self.columns();
        if !(MIN_COLUMNS..=MAX_COLUMNS).contains(&columns) {
            errors.push(FecViolation::ColumnsOutOfRange(columns));
        }
        match self.direction {
            Direction::Col => {
                if u16::from(columns) * u16::from(self.na) > MAX_SIZE {
                    errors.push(FecViolation::MatrixTooLarge {
                        columns,
                        rows: self.na,
                    });
                }
                if !(MIN_ROWS..=MAX_ROWS).contains(&self.na) {
                    errors.push(FecViolation::RowsOutOfRange(self.na));
                }
            }
            Direction::Row => {
                if self.offset != 1 {
                    errors.push(FecViolation::RowOffset(self.offset));
                }
            }
        }
        errors
    }

    /// Returns true if no rule is broken.
    pub fn is_valid(&self) -> bool {
        self.errors().is_empty()
    }

    /// `Ok(())` if valid, else [`Error::FecProtocolViolation`].
    pub fn validate(&self) -> Result<()> {
        let errors = self.errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::FecProtocolViolation(errors))
        }
    }

    /// Horizontal size of the matrix (L).
    pub fn columns(&self) -> u8 {
        match self.direction {
            Direction::Col => self.offset,
            Direction::Row => self.na,
        }
    }

    /// Vertical size of the matrix (D); only a column FEC packet knows it.
    pub fn rows(&self) -> Option<u8> {
        match self.direction {
            Direction::Col => Some(self.na),
            Direction::Row => None,
        }
    }

    /// Low 16 bits of `snbase`, the first protected media sequence.
    pub fn snbase_sequence(&self) -> SequenceNumber {
        SequenceNumber::new((self.snbase & 0xffff) as u16)
    }

    /// Sequence numbers of the protected media packets, in protection order.
    pub fn protected(&self) -> impl Iterator<Item = SequenceNumber> {
        let base = self.snbase_sequence();
        let offset = u16::from(self.offset);
        (0..u16::from(self.na)).map(move |k| base.wrapping_add(k.wrapping_mul(offset)))
    }

    /// Protected media sequences not yet seen by the receiver.
    pub fn missing(&self) -> &[SequenceNumber] {
        &self.missing
    }

    /// Position `j` of `media_sequence` in this packet: `media = snbase + j * offset`.
    pub fn compute_j(&self, media_sequence: SequenceNumber) -> Result<usize> {
        let delta = media_sequence.distance_from(self.snbase_sequence());
        let offset = u16::from(self.offset);
        if offset == 0 || delta % offset != 0 || delta / offset >= u16::from(self.na) {
            return Err(Error::NotProtected {
                media_sequence,
                snbase: self.snbase_sequence(),
                offset: self.offset,
                na: self.na,
            });
        }
        Ok(usize::from(delta / offset))
    }

    /// Register a protected media packet as missing, returns its position `j`.
    pub fn set_missing(&mut self, media_sequence: SequenceNumber) -> Result<usize> {
        let j = self.compute_j(media_sequence)?;
        if !self.missing.contains(&media_sequence) {
            self.missing.push(media_sequence);
        }
        Ok(j)
    }

    /// Unregister a missing media packet, returns its position `j`.
    pub fn set_recovered(&mut self, media_sequence: SequenceNumber) -> Result<usize> {
        let j = self.compute_j(media_sequence)?;
        let idx = self
            .missing
            .iter()
            .position(|seq| *seq == media_sequence)
            .ok_or(Error::NotMissing(media_sequence))?;
        self.missing.remove(idx);
        Ok(j)
    }

    /// Payload recovery length in bytes.
    pub fn payload_size(&self) -> usize {
        self.payload_recovery.len()
    }

    /// Encode the 16-byte FEC header.
    pub fn header_bytes(&self) -> [u8; HEADER_LENGTH] {
        let mut header = [0u8; HEADER_LENGTH];
        header[0..2].copy_from_slice(&((self.snbase & 0xffff) as u16).to_be_bytes());
        header[2..4].copy_from_slice(&self.length_recovery.to_be_bytes());
        header[4..8].copy_from_slice(&(self.mask & MASK_BITS).to_be_bytes());
        header[4] = (self.payload_type_recovery & PT_MASK) | if self.extended { E_MASK } else { 0 };
        header[8..12].copy_from_slice(&self.timestamp_recovery.to_be_bytes());
        let mut flags = (self.algorithm.bits() << T_SHIFT) & T_MASK;
        flags |= self.index & I_MASK;
        if self.n {
            flags |= N_MASK;
        }
        if self.direction == Direction::Row {
            flags |= D_MASK;
        }
        header[12] = flags;
        header[13] = self.offset;
        header[14] = self.na;
        header[15] = ((self.snbase >> 16) & 0xff) as u8;
        header
    }

    /// Encode the FEC header followed by the payload recovery.
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LENGTH + self.payload_recovery.len());
        bytes.extend_from_slice(&self.header_bytes());
        bytes.extend_from_slice(&self.payload_recovery);
        bytes
    }

    /// Wrap this FEC packet into an RTP packet ready to be sent.
    pub fn to_rtp(&self) -> RtpPacket {
        RtpPacket::create(u32::from(self.sequence.value()), 0, DYNAMIC_PT, self.serialize())
    }
}

impl fmt::Display for FecPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let errors: Vec<String> = self.errors().iter().map(ToString::to_string).collect();
        let rows = self
            .rows()
            .map_or_else(|| "None".to_string(), |d| d.to_string());
        let missing: Vec<u16> = self.missing.iter().map(|seq| seq.value()).collect();
        writeln!(f, "errors                = {:?}", errors)?;
        writeln!(f, "sequence              = {}", self.sequence)?;
        writeln!(f, "algorithm             = {}", self.algorithm)?;
        writeln!(f, "direction             = {}", self.direction)?;
        writeln!(f, "snbase                = {}", self.snbase)?;
        writeln!(f, "offset                = {}", self.offset)?;
        writeln!(f, "na                    = {}", self.na)?;
        writeln!(f, "L x D                 = {} x {}", self.columns(), rows)?;
        writeln!(f, "payload type recovery = {}", self.payload_type_recovery)?;
        writeln!(f, "timestamp recovery    = {}", self.timestamp_recovery)?;
        writeln!(f, "length recovery       = {}", self.length_recovery)?;
        writeln!(f, "payload recovery size = {}", self.payload_size())?;
        write!(f, "missing               = {:?}", missing)
    }
}
