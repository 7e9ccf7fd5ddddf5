//! Receiver counters.

use crate::fec::Direction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Counters maintained by a [`FecReceiver`](super::FecReceiver).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverStats {
    /// Media packets accepted by `put_media`.
    pub media_received: u64,
    /// Media packets rebuilt from a FEC packet.
    pub media_recovered: u64,
    /// Recovery attempts that needed another missing packet.
    pub media_aborted_recovery: u64,
    /// Media packets replacing a buffered packet with the same sequence.
    pub media_overwritten: u64,
    /// Positions emitted as a gap.
    pub media_missing: u64,
    /// Media packets arriving after their position was emitted.
    pub media_late: u64,
    pub col_received: u64,
    pub row_received: u64,
    /// FEC packets outside the validity window.
    pub col_dropped: u64,
    pub row_dropped: u64,
    /// FEC packets already registered with the same sequence.
    pub col_duplicate: u64,
    pub row_duplicate: u64,
    pub max_media: usize,
    pub max_cross: usize,
    pub max_col: usize,
    pub max_row: usize,
    /// Length of a run of consecutive lost positions -> number of such runs.
    pub lost_runs: BTreeMap<u64, u64>,
}

impl ReceiverStats {
    pub(crate) fn fec_received(&mut self, direction: Direction) {
        match direction {
            Direction::Col => self.col_received += 1,
            Direction::Row => self.row_received += 1,
        }
    }

    pub(crate) fn fec_dropped(&mut self, direction: Direction) {
        match direction {
            Direction::Col => self.col_dropped += 1,
            Direction::Row => self.row_dropped += 1,
        }
    }

    pub(crate) fn fec_duplicate(&mut self, direction: Direction) {
        match direction {
            Direction::Col => self.col_duplicate += 1,
            Direction::Row => self.row_duplicate += 1,
        }
    }

    pub(crate) fn fec_buffered(&mut self, direction: Direction, buffered: usize) {
        let max = match direction {
            Direction::Col => &mut self.max_col,
            Direction::Row => &mut self.max_row,
        };
        *max = (*max).max(buffered);
    }

    pub(crate) fn record_lost_run(&mut self, length: u64) {
        if length > 0 {
            *self.lost_runs.entry(length).or_insert(0) += 1;
        }
    }

    /// Total number of lost positions accounted for by the histogram.
    pub fn lost_in_runs(&self) -> u64 {
        self.lost_runs.iter().map(|(length, count)| length * count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lost_runs_histogram() {
        let mut stats = ReceiverStats::default();
        stats.record_lost_run(0);
        stats.record_lost_run(1);
        stats.record_lost_run(3);
        stats.record_lost_run(1);

        assert_eq!(stats.lost_runs.get(&1), Some(&2));
        assert_eq!(stats.lost_runs.get(&3), Some(&1));
        assert!(!stats.lost_runs.contains_key(&0));
        assert_eq!(stats.lost_in_runs(), 5);
    }

    #[test]
    fn test_serializes_to_json() {
        let mut stats = ReceiverStats::default();
        stats.fec_received(Direction::Row);
        stats.fec_buffered(Direction::Col, 4);
        stats.fec_buffered(Direction::Col, 2);
        stats.record_lost_run(2);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["row_received"], 1);
        assert_eq!(json["max_col"], 4);
        assert_eq!(json["lost_runs"]["2"], 1);
    }
}
