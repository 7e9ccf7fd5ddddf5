//! SMPTE 2022-1 FEC streams generator.
//!
//! The generator consumes an ordered stream of MPEG2-TS media packets and
//! computes one row FEC packet per `L` media packets and one column FEC packet
//! per column of an `L x D` matrix. Generated packets are handed to a
//! [`FecListener`].

mod listener;

pub use listener::{FecCollector, FecListener, LogListener};

use crate::config::MatrixConfig;
use crate::error::{Error, Result};
use crate::fec::{Algorithm, Direction, FecPacket};
use crate::rtp::{RtpPacket, SequenceNumber};
use std::fmt;
use tracing::trace;

/// Computes column and row FEC packets from incoming media packets.
#[derive(Debug)]
pub struct FecGenerator<L: FecListener = LogListener> {
    matrix: MatrixConfig,
    col_sequence: SequenceNumber,
    row_sequence: SequenceNumber,
    expected_sequence: Option<SequenceNumber>,
    medias: Vec<RtpPacket>,
    total: u64,
    invalid: u64,
    listener: L,
}

impl<L: FecListener> FecGenerator<L> {
    /// Create a generator for an `L x D` matrix.
    ///
    /// # Example
    ///
    /// ```
    /// use smpte2022_fec::config::{MatrixConfig, MP2T_PT};
    /// use smpte2022_fec::generator::{FecCollector, FecGenerator};
    /// use smpte2022_fec::rtp::RtpPacket;
    ///
    /// let mut generator = FecGenerator::new(MatrixConfig::new(4, 4), FecCollector::new()).unwrap();
    /// for seq in 0..16u32 {
    ///     generator.put_media(RtpPacket::create(seq, 0, MP2T_PT, vec![seq as u8; 188])).unwrap();
    /// }
    ///
    /// assert_eq!(generator.listener().rows.len(), 4);
    /// assert_eq!(generator.listener().cols.len(), 4);
    /// ```
    pub fn new(matrix: MatrixConfig, listener: L) -> Result<Self> {
        matrix.validate().map_err(Error::InvalidConfig)?;
        Ok(Self {
            matrix,
            col_sequence: SequenceNumber::new(1),
            row_sequence: SequenceNumber::new(1),
            expected_sequence: None,
            medias: Vec::with_capacity(matrix.size()),
            total: 0,
            invalid: 0,
            listener,
        })
    }

    /// Put an incoming media packet.
    ///
    /// Packets that are not valid MPEG2-TS RTP packets are counted and
    /// ignored. A packet that does not follow the previous one restarts the
    /// matrix.
    pub fn put_media(&mut self, media: RtpPacket) -> Result<()> {
        self.total += 1;
        if !media.is_valid_mp2t() {
            self.invalid += 1;
            trace!(sequence = %media.sequence, "Ignoring invalid media packet");
            return Ok(());
        }

        let next = media.sequence.next();
        if self.expected_sequence == Some(media.sequence) {
            self.medias.push(media);
        } else {
            self.listener.on_reset(&media, self.expected_sequence)?;
            self.medias.clear();
            self.medias.push(media);
        }
        self.expected_sequence = Some(next);

        let columns = usize::from(self.matrix.columns);
        let rows = usize::from(self.matrix.rows);
        let len = self.medias.len();

        if len % columns == 0 {
            let row = FecPacket::compute(
                self.row_sequence,
                Algorithm::Xor,
                Direction::Row,
                self.matrix.columns,
                self.matrix.rows,
                &self.medias[len - columns..],
            )?;
            self.row_sequence = self.row_sequence.next();
            self.listener.on_new_row(&row)?;
        }

        // A column is complete once its last row is reached.
        if len > columns * (rows - 1) {
            let first = len - columns * (rows - 1) - 1;
            let col = FecPacket::compute(
                self.col_sequence,
                Algorithm::Xor,
                Direction::Col,
                self.matrix.columns,
                self.matrix.rows,
                self.medias[first..].iter().step_by(columns),
            )?;
            self.col_sequence = self.col_sequence.next();
            self.listener.on_new_col(&col)?;
        }

        if len == self.matrix.size() {
            self.medias.clear();
        }
        Ok(())
    }

    /// Matrix dimensions.
    pub fn matrix(&self) -> MatrixConfig {
        self.matrix
    }

    /// Sequence number of the next column FEC packet.
    pub fn col_sequence(&self) -> SequenceNumber {
        self.col_sequence
    }

    /// Sequence number of the next row FEC packet.
    pub fn row_sequence(&self) -> SequenceNumber {
        self.row_sequence
    }

    /// Sequence number the next media packet should carry.
    pub fn expected_sequence(&self) -> Option<SequenceNumber> {
        self.expected_sequence
    }

    /// Sequence numbers of the media packets of the current matrix.
    pub fn buffered(&self) -> Vec<SequenceNumber> {
        self.medias.iter().map(|media| media.sequence).collect()
    }

    /// Number of media packets received, invalid ones included.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of invalid media packets received.
    pub fn invalid(&self) -> u64 {
        self.invalid
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    pub fn into_listener(self) -> L {
        self.listener
    }
}

impl<L: FecListener> fmt::Display for FecGenerator<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let expected = self
            .expected_sequence
            .map_or_else(|| "None".to_string(), |seq| seq.to_string());
        let buffered: Vec<u16> = self.medias.iter().map(|media| media.sequence.value()).collect();
        writeln!(
            f,
            "Matrix size L x D            = {} x {}",
            self.matrix.columns, self.matrix.rows
        )?;
        writeln!(f, "Total invalid media packets  = {}", self.invalid)?;
        writeln!(f, "Total media packets received = {}", self.total)?;
        writeln!(f, "Column sequence number       = {}", self.col_sequence)?;
        writeln!(f, "Row    sequence number       = {}", self.row_sequence)?;
        writeln!(f, "Media  sequence number       = {}", expected)?;
        write!(f, "Medias buffer (seq. numbers) = {:?}", buffered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MP2T_PT;

    fn media(seq: u32, timestamp: u64, payload: &[u8]) -> RtpPacket {
        RtpPacket::create(seq, timestamp, MP2T_PT, payload.to_vec())
    }

    fn generator(columns: u8, rows: u8) -> FecGenerator<FecCollector> {
        FecGenerator::new(MatrixConfig::new(columns, rows), FecCollector::new()).unwrap()
    }

    #[test]
    fn test_new_rejects_bad_matrix() {
        assert!(matches!(
            FecGenerator::new(MatrixConfig::new(0, 4), LogListener),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            FecGenerator::new(MatrixConfig::new(20, 20), LogListener),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_out_of_sequence_resets_matrix() {
        let mut g = generator(4, 5);
        g.put_media(media(1, 100, b"Tabby")).unwrap();
        g.put_media(media(1, 100, b"1234")).unwrap();
        g.put_media(media(4, 400, b"abcd")).unwrap();
        g.put_media(media(2, 200, b"python")).unwrap();
        g.put_media(media(2, 200, b"Kuota Kharma Evo")).unwrap();

        assert_eq!(g.listener().resets, 5);
        assert_eq!(g.total(), 5);
        assert_eq!(g.invalid(), 0);
        assert_eq!(g.col_sequence(), SequenceNumber::new(1));
        assert_eq!(g.row_sequence(), SequenceNumber::new(1));
        assert_eq!(g.expected_sequence(), Some(SequenceNumber::new(3)));
        assert_eq!(g.buffered(), vec![SequenceNumber::new(2)]);
        assert_eq!(g.medias[0].payload, b"Kuota Kharma Evo".to_vec());
    }

    #[test]
    fn test_complete_matrix() {
        let payloads: [&[u8]; 12] = [
            b"Tabby",
            b"1234",
            b"abcd",
            b"python",
            b"Kuota harma Evo",
            b"h0ffman",
            b"mutable",
            b"10061987",
            b"OSCIED",
            "5ème élément".as_bytes(),
            b"Chaos Theory",
            b"Yes, it WORKS !",
        ];
        let mut g = generator(3, 4);
        for (i, payload) in payloads.iter().enumerate() {
            let seq = i as u32 + 1;
            g.put_media(media(seq, u64::from(seq) * 100, payload)).unwrap();
            if seq == 10 {
                assert_eq!(g.col_sequence(), SequenceNumber::new(2));
                assert_eq!(g.row_sequence(), SequenceNumber::new(4));
                assert_eq!(g.buffered().len(), 10);
            }
        }

        let rows: Vec<(u16, u32, u32)> = g
            .listener()
            .rows
            .iter()
            .map(|row| (row.sequence.value(), row.snbase, row.timestamp_recovery))
            .collect();
        assert_eq!(rows, vec![(1, 1, 384), (2, 4, 572), (3, 7, 536), (4, 10, 788)]);

        let cols: Vec<(u16, u32, u32)> = g
            .listener()
            .cols
            .iter()
            .map(|col| (col.sequence.value(), col.snbase, col.timestamp_recovery))
            .collect();
        assert_eq!(cols, vec![(1, 1, 160), (2, 2, 1616), (3, 3, 1088)]);
        assert!(g.listener().cols.iter().all(|col| col.rows() == Some(4) && col.offset == 3));

        assert_eq!(g.col_sequence(), SequenceNumber::new(4));
        assert_eq!(g.row_sequence(), SequenceNumber::new(5));
        assert_eq!(g.expected_sequence(), Some(SequenceNumber::new(13)));
        assert!(g.buffered().is_empty());
    }

    #[test]
    fn test_invalid_media_is_counted() {
        let mut g = generator(4, 4);
        g.put_media(media(1, 0, b"")).unwrap();
        g.put_media(RtpPacket::create(2, 0, 14, b"mpa".to_vec())).unwrap();

        assert_eq!(g.total(), 2);
        assert_eq!(g.invalid(), 2);
        assert_eq!(g.listener().resets, 0);
        assert!(g.buffered().is_empty());
    }

    #[test]
    fn test_sequence_wraps() {
        let mut g = generator(2, 4);
        for seq in 65532u32..65540 {
            g.put_media(media(seq, 0, b"x")).unwrap();
        }
        let (cols, rows) = g.listener_mut().drain();
        assert_eq!(rows.len(), 4);
        assert_eq!(cols.len(), 2);
        assert_eq!(cols[0].snbase, 65532);
        assert_eq!(rows[3].snbase, 2);
        assert_eq!(g.listener().resets, 1);
    }

    #[test]
    fn test_display() {
        let g = FecGenerator::new(MatrixConfig::default(), LogListener).unwrap();
        let text = g.to_string();
        assert!(text.starts_with("Matrix size L x D            = 5 x 6"));
        assert!(text.contains("Media  sequence number       = None"));
        assert!(text.ends_with("Medias buffer (seq. numbers) = []"));
    }
}
