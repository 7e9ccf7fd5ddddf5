//! SMPTE 2022-1 FEC receiver.
//!
//! The receiver accepts media and FEC packets in any arrival order, rebuilds
//! missing media packets with the XOR parity of column and row FEC packets and
//! writes the media payloads, in sequence order, to an output sink.
//!
//! # Bookkeeping
//!
//! - `medias`: buffered media packets, keyed by sequence.
//! - `crosses`: for each missing media packet, the column and row FEC packets
//!   able to rebuild it.
//! - `cols` / `rows`: FEC packets waiting for all but one of their media
//!   packets.
//!
//! Once more than `delay` media packets are buffered, the oldest position is
//! emitted (or counted missing) and every bookkeeping entry tied to it is
//! released.

mod stats;

pub use stats::ReceiverStats;

use crate::config::{ReceiverConfig, MP2T_PT};
use crate::error::{Error, Result};
use crate::fec::{xor_into, Direction, FecPacket, FecViolation};
use crate::rtp::{validity_window, RtpPacket, SequenceNumber};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::Write;
use tracing::{debug, trace, warn};

const DIRECTIONS: [Direction; 2] = [Direction::Col, Direction::Row];

/// FEC packets able to rebuild one missing media packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cross {
    pub col_sequence: Option<SequenceNumber>,
    pub row_sequence: Option<SequenceNumber>,
}

impl Cross {
    /// FEC sequence registered for `direction`.
    pub fn slot(&self, direction: Direction) -> Option<SequenceNumber> {
        match direction {
            Direction::Col => self.col_sequence,
            Direction::Row => self.row_sequence,
        }
    }

    fn slot_mut(&mut self, direction: Direction) -> &mut Option<SequenceNumber> {
        match direction {
            Direction::Col => &mut self.col_sequence,
            Direction::Row => &mut self.row_sequence,
        }
    }

    fn is_empty(&self) -> bool {
        self.col_sequence.is_none() && self.row_sequence.is_none()
    }
}

/// A FEC packet used for a pending recovery, by direction and sequence.
type FecRef = (Direction, SequenceNumber);

/// Rebuilds lost media packets and outputs the media stream in order.
pub struct FecReceiver<W: Write> {
    output: W,
    config: ReceiverConfig,
    medias: HashMap<SequenceNumber, RtpPacket>,
    crosses: HashMap<SequenceNumber, Cross>,
    cols: HashMap<SequenceNumber, FecPacket>,
    rows: HashMap<SequenceNumber, FecPacket>,
    position: Option<SequenceNumber>,
    matrix_columns: u8,
    matrix_rows: u8,
    lost_run: u64,
    stats: ReceiverStats,
}

impl<W: Write> FecReceiver<W> {
    /// Create a receiver writing recovered media payloads to `output`.
    ///
    /// # Example
    ///
    /// ```
    /// use smpte2022_fec::config::{ReceiverConfig, MP2T_PT};
    /// use smpte2022_fec::receiver::FecReceiver;
    /// use smpte2022_fec::rtp::RtpPacket;
    ///
    /// let mut receiver = FecReceiver::new(Vec::new(), ReceiverConfig::with_delay(2)).unwrap();
    /// receiver.put_media(RtpPacket::create(2, 0, MP2T_PT, b"world".to_vec())).unwrap();
    /// receiver.put_media(RtpPacket::create(1, 0, MP2T_PT, b"hello ".to_vec())).unwrap();
    /// receiver.flush().unwrap();
    ///
    /// assert_eq!(receiver.get_ref(), b"hello world");
    /// ```
    pub fn new(output: W, config: ReceiverConfig) -> Result<Self> {
        config.validate().map_err(Error::InvalidConfig)?;
        Ok(Self {
            output,
            config,
            medias: HashMap::new(),
            crosses: HashMap::new(),
            cols: HashMap::new(),
            rows: HashMap::new(),
            position: None,
            matrix_columns: 0,
            matrix_rows: 0,
            lost_run: 0,
            stats: ReceiverStats::default(),
        })
    }

    /// Change the number of media packets kept buffered before output.
    pub fn set_delay(&mut self, delay: usize) -> Result<()> {
        let config = ReceiverConfig {
            delay,
            ..self.config.clone()
        };
        config.validate().map_err(Error::InvalidConfig)?;
        self.config = config;
        self.out(false)
    }

    /// Route a raw datagram to `put_fec` (payload type 96) or `put_media`.
    pub fn put_datagram(&mut self, datagram: &[u8]) -> Result<()> {
        let rtp = RtpPacket::parse(datagram);
        if rtp.is_fec() {
            self.put_fec(FecPacket::parse(&rtp))
        } else {
            self.put_media(rtp)
        }
    }

    /// Put an incoming media packet.
    pub fn put_media(&mut self, media: RtpPacket) -> Result<()> {
        media.validate()?;
        if self.config.only_mp2t && media.payload_type != MP2T_PT {
            return Err(Error::UnexpectedPayloadType {
                expected: MP2T_PT,
                found: media.payload_type,
            });
        }

        let sequence = media.sequence;
        if self.is_late(sequence) {
            self.stats.media_late += 1;
            trace!(%sequence, position = ?self.position, "Discarding late media packet");
            return Ok(());
        }

        trace!(%sequence, size = media.payload_size(), "Media packet");
        self.store_media(media);
        self.stats.media_received += 1;

        // A FEC packet was waiting for it, this may start a cascade.
        if self.crosses.contains_key(&sequence) {
            self.recover(sequence, None)?;
        }
        self.out(false)
    }

    /// Put an incoming FEC packet.
    ///
    /// 1. The FEC packet is useless if none of its media packets is missing.
    /// 2. With exactly one media packet missing, it is rebuilt now.
    /// 3. Otherwise the FEC packet is stored for a later recovery.
    pub fn put_fec(&mut self, mut fec: FecPacket) -> Result<()> {
        fec.validate()?;
        let direction = fec.direction;
        self.stats.fec_received(direction);

        self.matrix_columns = fec.columns();
        if let Some(rows) = fec.rows() {
            self.matrix_rows = rows;
        }

        let missing: Vec<SequenceNumber> = fec
            .protected()
            .filter(|sequence| !self.medias.contains_key(sequence))
            .collect();
        if missing.is_empty() {
            trace!(sequence = %fec.sequence, %direction, "FEC packet is useless");
            return Ok(());
        }

        // Members at or before the output position are gone for good.
        if let Some(position) = self.position {
            let end = position.wrapping_add(self.config.drop_window());
            if !validity_window(fec.snbase_sequence(), position.next(), end) {
                self.stats.fec_dropped(direction);
                warn!(
                    sequence = %fec.sequence,
                    snbase = fec.snbase,
                    %position,
                    "Dropping {} FEC packet outside the validity window",
                    direction
                );
                return Ok(());
            }
        }

        let mut duplicate = false;
        for sequence in &missing {
            if let Some(registered) = self.crosses.get(sequence).and_then(|c| c.slot(direction)) {
                if registered != fec.sequence {
                    return Err(FecViolation::SlotOverwrite {
                        direction,
                        media_sequence: *sequence,
                        registered,
                        incoming: fec.sequence,
                    }
                    .into());
                }
                duplicate = true;
            }
        }
        if duplicate {
            self.stats.fec_duplicate(direction);
            debug!(sequence = %fec.sequence, %direction, "Ignoring duplicate FEC packet");
            return Ok(());
        }

        // Same sequence, other media: the FEC stream wrapped.
        if self.fecs(direction).contains_key(&fec.sequence) {
            self.discard_fec(direction, fec.sequence);
        }

        for sequence in missing {
            let cross = self.crosses.entry(sequence).or_default();
            *cross.slot_mut(direction) = Some(fec.sequence);
            fec.set_missing(sequence)?;
        }
        self.stats.max_cross = self.stats.max_cross.max(self.crosses.len());

        let fec_sequence = fec.sequence;
        let armed = match fec.missing() {
            [single] => Some(*single),
            _ => None,
        };
        debug!(
            sequence = %fec_sequence,
            %direction,
            snbase = fec.snbase,
            missing = fec.missing().len(),
            "Registered FEC packet"
        );

        let fecs = self.fecs_mut(direction);
        fecs.insert(fec_sequence, fec);
        let buffered = fecs.len();
        self.stats.fec_buffered(direction, buffered);

        if let Some(media_sequence) = armed {
            self.recover(media_sequence, Some((direction, fec_sequence)))?;
            self.out(false)?;
        }
        Ok(())
    }

    /// Output every buffered media packet, regardless of the delay.
    pub fn flush(&mut self) -> Result<()> {
        self.out(true)?;
        let run = std::mem::take(&mut self.lost_run);
        self.stats.record_lost_run(run);
        self.output.flush()?;
        Ok(())
    }

    /// Remove bookkeeping of media packets outside the validity window.
    ///
    /// Returns the number of cross entries removed. Nothing is removed before
    /// the output started.
    pub fn cleanup(&mut self) -> usize {
        let Some(position) = self.position else {
            return 0;
        };
        let end = position.wrapping_add(self.config.drop_window());
        let stale: Vec<SequenceNumber> = self
            .crosses
            .keys()
            .filter(|sequence| !validity_window(**sequence, position.next(), end))
            .copied()
            .collect();
        for sequence in &stale {
            self.release_cross(*sequence);
        }
        if !stale.is_empty() {
            debug!(removed = stale.len(), %position, "Cleaned up stale cross entries");
        }
        stale.len()
    }

    /// Rebuild `media_sequence` with the FEC packet `via`, or register its
    /// arrival when `via` is `None`, then follow the cascade.
    fn recover(&mut self, media_sequence: SequenceNumber, via: Option<FecRef>) -> Result<()> {
        let mut queue = VecDeque::from([(media_sequence, via)]);

        while let Some((sequence, via)) = queue.pop_front() {
            let Some(cross) = self.crosses.get(&sequence).copied() else {
                // Already rebuilt through the other direction, or discarded as late.
                let settled = self.medias.contains_key(&sequence) || self.is_late(sequence);
                debug_assert!(settled, "no cross entry for cascade target {}", sequence);
                if settled {
                    continue;
                }
                return Err(Error::CascadeInconsistency {
                    media_sequence: sequence,
                });
            };

            if let Some((direction, fec_sequence)) = via {
                match self.rebuild(direction, fec_sequence, sequence)? {
                    Some(_) if self.is_late(sequence) => {
                        self.stats.media_late += 1;
                        debug!(%sequence, %direction, fec = %fec_sequence, "Discarding late recovered media packet");
                        self.release_cross(sequence);
                        continue;
                    }
                    Some(media) => {
                        debug!(%sequence, %direction, fec = %fec_sequence, "Recovered media packet");
                        self.stats.media_recovered += 1;
                        self.store_media(media);
                        self.fecs_mut(direction).remove(&fec_sequence);
                    }
                    None => {
                        self.stats.media_aborted_recovery += 1;
                        debug!(%sequence, %direction, fec = %fec_sequence, "Recovery aborted");
                        continue;
                    }
                }
            }

            self.crosses.remove(&sequence);
            for direction in DIRECTIONS {
                let Some(fec_sequence) = cross.slot(direction) else {
                    continue;
                };
                let Some(fec) = self.fecs_mut(direction).get_mut(&fec_sequence) else {
                    continue;
                };
                fec.set_recovered(sequence)?;
                let remaining = fec.missing().to_vec();
                match remaining.as_slice() {
                    [] => {
                        self.fecs_mut(direction).remove(&fec_sequence);
                    }
                    [next] => queue.push_back((*next, Some((direction, fec_sequence)))),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// XOR the recovery fields of a FEC packet with its other media packets.
    ///
    /// Returns `None` when one of them is missing.
    fn rebuild(
        &self,
        direction: Direction,
        fec_sequence: SequenceNumber,
        sequence: SequenceNumber,
    ) -> Result<Option<RtpPacket>> {
        let fec = self.fecs(direction).get(&fec_sequence);
        debug_assert!(fec.is_some(), "{} FEC packet {} vanished", direction, fec_sequence);
        let Some(fec) = fec else {
            return Err(Error::CascadeInconsistency {
                media_sequence: sequence,
            });
        };

        let mut payload_type = fec.payload_type_recovery;
        let mut timestamp = fec.timestamp_recovery;
        let mut length = fec.length_recovery;
        let mut payload = fec.payload_recovery.clone();
        for member in fec.protected().filter(|member| *member != sequence) {
            let Some(friend) = self.medias.get(&member) else {
                return Ok(None);
            };
            payload_type ^= friend.payload_type;
            timestamp ^= friend.timestamp;
            length ^= friend.payload_size() as u16;
            xor_into(&mut payload, &friend.payload);
        }

        let length = usize::from(length);
        if length > payload.len() {
            warn!(%sequence, length, available = payload.len(), "Recovered length exceeds payload recovery");
            return Ok(None);
        }
        payload.truncate(length);
        Ok(Some(RtpPacket::create(
            u32::from(sequence.value()),
            u64::from(timestamp),
            payload_type,
            payload,
        )))
    }

    /// Emit media packets until at most `delay` are buffered, or all of them when draining.
    fn out(&mut self, drain: bool) -> Result<()> {
        let keep = if drain { 0 } else { self.config.delay };
        while self.medias.len() > keep {
            let position = match (self.position, self.earliest_media()) {
                (Some(position), _) => position.next(),
                (None, Some(earliest)) => {
                    self.start_output(earliest);
                    earliest
                }
                (None, None) => break,
            };
            self.position = Some(position);

            match self.medias.remove(&position) {
                Some(media) => {
                    let run = std::mem::take(&mut self.lost_run);
                    self.stats.record_lost_run(run);
                    self.output.write_all(&media.payload)?;
                }
                None => {
                    self.stats.media_missing += 1;
                    self.lost_run += 1;
                }
            }

            self.release_cross(position);
        }
        Ok(())
    }

    /// Release the cross entries of media packets before the first output
    /// position, FEC packets stored before the startup may cover them.
    fn start_output(&mut self, first: SequenceNumber) {
        let stale: Vec<SequenceNumber> = self
            .crosses
            .keys()
            .filter(|sequence| sequence.is_before(first))
            .copied()
            .collect();
        for sequence in &stale {
            self.release_cross(*sequence);
        }
        if !stale.is_empty() {
            debug!(released = stale.len(), %first, "Output started, released earlier cross entries");
        }
    }

    /// Returns true if `sequence` is not after the output position.
    fn is_late(&self, sequence: SequenceNumber) -> bool {
        self.position
            .is_some_and(|position| !sequence.is_after(position))
    }

    fn earliest_media(&self) -> Option<SequenceNumber> {
        self.medias
            .keys()
            .copied()
            .min_by(|a, b| a.cmp_wrapping(*b))
    }

    fn store_media(&mut self, media: RtpPacket) {
        if self.medias.insert(media.sequence, media).is_some() {
            self.stats.media_overwritten += 1;
        }
        self.stats.max_media = self.stats.max_media.max(self.medias.len());
    }

    /// Remove the cross entry of `sequence` and the FEC packets it links.
    fn release_cross(&mut self, sequence: SequenceNumber) {
        if let Some(cross) = self.crosses.remove(&sequence) {
            for direction in DIRECTIONS {
                if let Some(fec_sequence) = cross.slot(direction) {
                    self.discard_fec(direction, fec_sequence);
                }
            }
        }
    }

    /// Remove a stored FEC packet and its slots in every cross entry.
    fn discard_fec(&mut self, direction: Direction, fec_sequence: SequenceNumber) {
        let Some(fec) = self.fecs_mut(direction).remove(&fec_sequence) else {
            return;
        };
        for sequence in fec.missing() {
            if let Some(cross) = self.crosses.get_mut(sequence) {
                if cross.slot(direction) == Some(fec_sequence) {
                    *cross.slot_mut(direction) = None;
                    if cross.is_empty() {
                        self.crosses.remove(sequence);
                    }
                }
            }
        }
    }

    fn fecs(&self, direction: Direction) -> &HashMap<SequenceNumber, FecPacket> {
        match direction {
            Direction::Col => &self.cols,
            Direction::Row => &self.rows,
        }
    }

    fn fecs_mut(&mut self, direction: Direction) -> &mut HashMap<SequenceNumber, FecPacket> {
        match direction {
            Direction::Col => &mut self.cols,
            Direction::Row => &mut self.rows,
        }
    }

    /// Last emitted media sequence, `None` until the output starts.
    pub fn position(&self) -> Option<SequenceNumber> {
        self.position
    }

    /// Matrix size (L, D) seen in the FEC streams, zero while unknown.
    pub fn matrix_size(&self) -> (u8, u8) {
        (self.matrix_columns, self.matrix_rows)
    }

    /// Number of buffered media packets.
    pub fn current_delay(&self) -> usize {
        self.medias.len()
    }

    /// Number of FEC packets stored for `direction`.
    pub fn buffered_fec(&self, direction: Direction) -> usize {
        self.fecs(direction).len()
    }

    /// Cross entry of a missing media packet.
    pub fn cross(&self, sequence: SequenceNumber) -> Option<Cross> {
        self.crosses.get(&sequence).copied()
    }

    /// Receiver settings.
    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Receiver statistics.
    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    /// Output sink.
    pub fn get_ref(&self) -> &W {
        &self.output
    }

    /// Consume the receiver, returning the output sink.
    pub fn into_output(self) -> W {
        self.output
    }
}

impl<W: Write> fmt::Display for FecReceiver<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.stats;
        let position = self
            .position
            .map_or_else(|| "None".to_string(), |p| p.to_string());
        let (l, d) = self.matrix_size();
        writeln!(f, "Name  Received Buffered Maximum Dropped Duplicate")?;
        writeln!(
            f,
            "Media {:>8}{:>9}{:>8}",
            s.media_received,
            self.medias.len(),
            s.max_media
        )?;
        writeln!(
            f,
            "Col   {:>8}{:>9}{:>8}{:>8}{:>10}",
            s.col_received,
            self.cols.len(),
            s.max_col,
            s.col_dropped,
            s.col_duplicate
        )?;
        writeln!(
            f,
            "Row   {:>8}{:>9}{:>8}{:>8}{:>10}",
            s.row_received,
            self.rows.len(),
            s.max_row,
            s.row_dropped,
            s.row_duplicate
        )?;
        writeln!(f, "Cross         {:>9}{:>8}", self.crosses.len(), s.max_cross)?;
        writeln!(f, "FEC statistics, media packets :")?;
        writeln!(f, "Recovered Aborted Overwritten Missing Late")?;
        writeln!(
            f,
            "{:>9}{:>8}{:>12}{:>8}{:>5}",
            s.media_recovered, s.media_aborted_recovery, s.media_overwritten, s.media_missing, s.media_late
        )?;
        writeln!(f, "Current position (media sequence) : {}", position)?;
        writeln!(f, "Current delay (can be set) : {} packets", self.config.delay)?;
        write!(f, "FEC matrix size (LxD) : {}x{} = {} packets", l, d, usize::from(l) * usize::from(d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fec::Algorithm;

    fn s(v: u16) -> SequenceNumber {
        SequenceNumber::new(v)
    }

    fn media(seq: u16) -> RtpPacket {
        let payload = format!("media packet {}", seq).into_bytes();
        RtpPacket::create(u32::from(seq), u64::from(seq) * 3600, MP2T_PT, payload)
    }

    fn fec(sequence: u16, direction: Direction, columns: u8, rows: u8, snbase: u16) -> FecPacket {
        let offset = match direction {
            Direction::Col => u16::from(columns),
            Direction::Row => 1,
        };
        let count = match direction {
            Direction::Col => rows,
            Direction::Row => columns,
        };
        let packets: Vec<RtpPacket> = (0..u16::from(count))
            .map(|k| media(snbase.wrapping_add(k * offset)))
            .collect();
        FecPacket::compute(s(sequence), Algorithm::Xor, direction, columns, rows, &packets).unwrap()
    }

    fn receiver(delay: usize) -> FecReceiver<Vec<u8>> {
        FecReceiver::new(Vec::new(), ReceiverConfig::with_delay(delay)).unwrap()
    }

    #[test]
    fn test_useless_fec_is_discarded() {
        let mut r = receiver(100);
        for seq in 0..4 {
            r.put_media(media(seq)).unwrap();
        }
        r.put_fec(fec(1, Direction::Row, 4, 4, 0)).unwrap();

        assert_eq!(r.stats().row_received, 1);
        assert_eq!(r.buffered_fec(Direction::Row), 0);
        assert_eq!(r.matrix_size(), (4, 0));
    }

    #[test]
    fn test_single_loss_is_recovered() {
        let mut r = receiver(100);
        for seq in [0, 1, 3] {
            r.put_media(media(seq)).unwrap();
        }
        r.put_fec(fec(1, Direction::Row, 4, 4, 0)).unwrap();

        assert_eq!(r.stats().media_recovered, 1);
        assert_eq!(r.current_delay(), 4);
        assert!(r.cross(s(2)).is_none());
        assert_eq!(r.buffered_fec(Direction::Row), 0);
        assert_eq!(r.medias[&s(2)], media(2));
    }

    #[test]
    fn test_fec_waits_for_media() {
        let mut r = receiver(100);
        r.put_media(media(0)).unwrap();
        r.put_fec(fec(7, Direction::Row, 4, 4, 0)).unwrap();

        assert_eq!(r.buffered_fec(Direction::Row), 1);
        assert_eq!(
            r.cross(s(2)),
            Some(Cross {
                col_sequence: None,
                row_sequence: Some(s(7))
            })
        );

        r.put_media(media(1)).unwrap();
        r.put_media(media(3)).unwrap();

        assert_eq!(r.stats().media_recovered, 1);
        assert_eq!(r.buffered_fec(Direction::Row), 0);
        assert!(r.crosses.is_empty());
    }

    #[test]
    fn test_recovery_before_last_arrival() {
        let mut r = receiver(100);
        r.put_media(media(0)).unwrap();
        r.put_fec(fec(7, Direction::Row, 4, 4, 0)).unwrap();
        r.put_media(media(1)).unwrap();
        r.put_media(media(2)).unwrap();

        // 3 is rebuilt as soon as it is the only one missing.
        assert_eq!(r.stats().media_recovered, 1);
        assert_eq!(r.buffered_fec(Direction::Row), 0);
        assert!(r.crosses.is_empty());

        r.put_media(media(3)).unwrap();
        assert_eq!(r.stats().media_overwritten, 1);
        assert_eq!(r.medias[&s(3)], media(3));
    }

    #[test]
    fn test_duplicate_and_conflicting_fec() {
        let mut r = receiver(100);
        r.put_media(media(0)).unwrap();
        r.put_fec(fec(7, Direction::Row, 4, 4, 0)).unwrap();
        r.put_fec(fec(7, Direction::Row, 4, 4, 0)).unwrap();
        assert_eq!(r.stats().row_duplicate, 1);
        assert_eq!(r.buffered_fec(Direction::Row), 1);

        match r.put_fec(fec(8, Direction::Row, 4, 4, 0)) {
            Err(Error::FecProtocolViolation(violations)) => assert_eq!(
                violations,
                vec![FecViolation::SlotOverwrite {
                    direction: Direction::Row,
                    media_sequence: s(1),
                    registered: s(7),
                    incoming: s(8),
                }]
            ),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(r.buffered_fec(Direction::Row), 1);
        assert_eq!(r.cross(s(1)).unwrap().row_sequence, Some(s(7)));
        assert_eq!(r.rows[&s(7)].missing(), &[s(1), s(2), s(3)]);
    }

    #[test]
    fn test_aborted_recovery_keeps_state() {
        let mut r = receiver(100);
        for seq in [0, 1, 3] {
            r.put_media(media(seq)).unwrap();
        }
        // Recovery payload too short for the recovered length.
        let mut row = fec(1, Direction::Row, 4, 4, 0);
        row.payload_recovery.truncate(1);
        r.put_fec(row).unwrap();

        assert_eq!(r.stats().media_aborted_recovery, 1);
        assert_eq!(r.stats().media_recovered, 0);
        assert!(r.cross(s(2)).is_some());
        assert_eq!(r.buffered_fec(Direction::Row), 1);
        assert!(!r.medias.contains_key(&s(2)));
    }

    #[test]
    fn test_cascade_recovers_both_packets() {
        // 3x4 matrix, 4 and 5 missing: row 3..5 lacks both, column 1, 4, 7, 10
        // lacks only 4.
        for col_first in [true, false] {
            let mut r = receiver(100);
            for seq in (0..12).filter(|seq| *seq != 4 && *seq != 5) {
                r.put_media(media(seq)).unwrap();
            }
            let row = fec(2, Direction::Row, 3, 4, 3);
            let col = fec(2, Direction::Col, 3, 4, 1);
            if col_first {
                r.put_fec(col).unwrap();
                r.put_fec(row).unwrap();
            } else {
                r.put_fec(row).unwrap();
                r.put_fec(col).unwrap();
            }

            assert_eq!(r.stats().media_recovered, 2, "col first: {}", col_first);
            assert_eq!(r.medias[&s(4)], media(4));
            assert_eq!(r.medias[&s(5)], media(5));
            assert!(r.crosses.is_empty());
            assert_eq!(r.buffered_fec(Direction::Col), 0);
            assert_eq!(r.buffered_fec(Direction::Row), 0);
        }
    }

    #[test]
    fn test_out_counts_missing_and_lost_runs() {
        let mut r = receiver(2);
        for seq in [10, 11, 14, 15, 17, 18] {
            r.put_media(media(seq)).unwrap();
        }
        r.flush().unwrap();

        assert_eq!(r.stats().media_missing, 3);
        assert_eq!(r.stats().lost_runs.get(&2), Some(&1));
        assert_eq!(r.stats().lost_runs.get(&1), Some(&1));
        assert_eq!(r.position(), Some(s(18)));
        assert_eq!(r.current_delay(), 0);

        let expected: Vec<u8> = [10, 11, 14, 15, 17, 18]
            .iter()
            .flat_map(|seq| media(*seq).payload)
            .collect();
        assert_eq!(r.get_ref(), &expected);
    }

    #[test]
    fn test_late_media_is_not_emitted_twice() {
        let mut r = receiver(1);
        for seq in [1, 2, 3] {
            r.put_media(media(seq)).unwrap();
        }
        assert_eq!(r.position(), Some(s(2)));
        r.put_media(media(1)).unwrap();
        r.put_media(media(2)).unwrap();
        r.flush().unwrap();

        assert_eq!(r.stats().media_late, 2);
        let expected: Vec<u8> = [1, 2, 3].iter().flat_map(|seq| media(*seq).payload).collect();
        assert_eq!(r.into_output(), expected);
    }

    #[test]
    fn test_fec_before_output_start_never_rebuilds_behind_position() {
        let mut r = receiver(3);
        // Column 0, 4, 8, 12 registered before any media.
        r.put_fec(fec(1, Direction::Col, 4, 4, 0)).unwrap();
        for seq in [1, 2, 3, 4] {
            r.put_media(media(seq)).unwrap();
        }
        assert_eq!(r.position(), Some(s(1)));
        assert!(r.cross(s(0)).is_none());
        assert_eq!(r.buffered_fec(Direction::Col), 0);

        for seq in [8, 12] {
            r.put_media(media(seq)).unwrap();
        }
        r.flush().unwrap();

        assert_eq!(r.stats().media_recovered, 0);
        assert_eq!(r.stats().media_missing, 6);
        assert!(r.crosses.is_empty());
        let expected: Vec<u8> = [1, 2, 3, 4, 8, 12].iter().flat_map(|seq| media(*seq).payload).collect();
        assert_eq!(r.into_output(), expected);
    }

    #[test]
    fn test_rebuilt_media_behind_position_is_late() {
        let mut r = receiver(100);
        for seq in [1, 2] {
            r.put_media(media(seq)).unwrap();
        }
        r.put_fec(fec(1, Direction::Row, 4, 4, 0)).unwrap();
        assert_eq!(r.rows[&s(1)].missing(), &[s(0), s(3)]);

        // Output moved past 0 while the row was waiting for 3.
        r.position = Some(s(2));
        r.put_media(media(3)).unwrap();

        assert_eq!(r.stats().media_recovered, 0);
        assert_eq!(r.stats().media_late, 1);
        assert!(!r.medias.contains_key(&s(0)));
        assert!(r.crosses.is_empty());
        assert_eq!(r.buffered_fec(Direction::Row), 0);
    }

    #[test]
    fn test_fec_outside_window_is_dropped() {
        let mut r = receiver(1);
        for seq in [20, 21, 22] {
            r.put_media(media(seq)).unwrap();
        }
        assert_eq!(r.position(), Some(s(21)));

        // snbase 19 was emitted (as a gap) already.
        r.put_fec(fec(1, Direction::Row, 4, 4, 19)).unwrap();
        assert_eq!(r.stats().row_dropped, 1);
        assert_eq!(r.buffered_fec(Direction::Row), 0);
        assert!(r.crosses.is_empty());
    }

    #[test]
    fn test_out_releases_bookkeeping() {
        let mut r = receiver(3);
        r.put_media(media(0)).unwrap();
        r.put_fec(fec(1, Direction::Row, 4, 4, 0)).unwrap();
        assert_eq!(r.crosses.len(), 3);
        r.put_media(media(4)).unwrap();
        r.put_media(media(5)).unwrap();

        r.flush().unwrap();
        assert_eq!(r.stats().media_missing, 3);
        assert!(r.crosses.is_empty());
        assert_eq!(r.buffered_fec(Direction::Row), 0);
    }

    #[test]
    fn test_cleanup_removes_stale_crosses() {
        let mut r = receiver(1);
        // Ahead of the output, but far past the validity window.
        r.put_fec(fec(1, Direction::Row, 4, 4, 20_000)).unwrap();
        assert_eq!(r.cleanup(), 0);

        for seq in [0, 1] {
            r.put_media(media(seq)).unwrap();
        }
        assert_eq!(r.position(), Some(s(0)));
        assert_eq!(r.cleanup(), 4);
        assert!(r.crosses.is_empty());
        assert_eq!(r.buffered_fec(Direction::Row), 0);
    }

    #[test]
    fn test_put_media_rejects_invalid_packets() {
        let mut r = FecReceiver::new(
            Vec::new(),
            ReceiverConfig {
                only_mp2t: true,
                ..ReceiverConfig::default()
            },
        )
        .unwrap();
        assert!(matches!(
            r.put_media(RtpPacket::create(1, 0, MP2T_PT, Vec::new())),
            Err(Error::MalformedPacket(_))
        ));
        assert!(matches!(
            r.put_media(RtpPacket::create(1, 0, 14, b"mpa".to_vec())),
            Err(Error::UnexpectedPayloadType { expected: 33, found: 14 })
        ));
        assert_eq!(r.stats().media_received, 0);
    }

    #[test]
    fn test_put_datagram_routes_by_payload_type() {
        let mut r = receiver(100);
        r.put_datagram(&media(0).serialize()).unwrap();
        r.put_datagram(&fec(3, Direction::Row, 4, 4, 0).to_rtp().serialize()).unwrap();

        assert_eq!(r.stats().media_received, 1);
        assert_eq!(r.stats().row_received, 1);
        assert_eq!(r.buffered_fec(Direction::Row), 1);
    }

    #[test]
    fn test_display() {
        let r = receiver(0);
        let text = r.to_string();
        assert!(text.starts_with("Name  Received Buffered Maximum Dropped Duplicate\n"));
        assert!(text.contains("Current position (media sequence) : None"));
        assert!(text.ends_with("FEC matrix size (LxD) : 0x0 = 0 packets"));
    }
}
