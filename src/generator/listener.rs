//! Hooks fired by the generator when FEC packets are produced.

use crate::error::Result;
use crate::fec::FecPacket;
use crate::rtp::{RtpPacket, SequenceNumber};
use tracing::{debug, warn};

/// Receives the FEC packets computed by a [`FecGenerator`](super::FecGenerator).
///
/// Every hook has a default implementation that only logs, so a listener
/// overrides the events it cares about. An error returned by a hook is
/// propagated by `put_media`.
pub trait FecListener {
    /// A column FEC packet is available for output.
    fn on_new_col(&mut self, col: &FecPacket) -> Result<()> {
        debug!(
            sequence = %col.sequence,
            snbase = col.snbase,
            trec = col.timestamp_recovery,
            "New COL FEC packet ({}x{})",
            col.columns(),
            col.na
        );
        Ok(())
    }

    /// A row FEC packet is available for output.
    fn on_new_row(&mut self, row: &FecPacket) -> Result<()> {
        debug!(
            sequence = %row.sequence,
            snbase = row.snbase,
            trec = row.timestamp_recovery,
            "New ROW FEC packet ({}xNone)",
            row.columns()
        );
        Ok(())
    }

    /// The matrix restarted at `media`, `expected` is the sequence that was awaited.
    fn on_reset(&mut self, media: &RtpPacket, expected: Option<SequenceNumber>) -> Result<()> {
        match expected {
            Some(expected) => warn!(
                "Media seq={} is out of sequence (expected {}): FEC algorithm reset",
                media.sequence, expected
            ),
            None => debug!("FEC matrix starts at media seq={}", media.sequence),
        }
        Ok(())
    }
}

/// Listener that only logs generated packets.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogListener;

impl FecListener for LogListener {}

/// Listener that keeps every generated packet in memory.
#[derive(Debug, Default, Clone)]
pub struct FecCollector {
    /// Column FEC packets, in generation order.
    pub cols: Vec<FecPacket>,
    /// Row FEC packets, in generation order.
    pub rows: Vec<FecPacket>,
    /// Number of matrix resets, including the initial one.
    pub resets: usize,
}

impl FecCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the collected packets, leaving the collector empty.
    pub fn drain(&mut self) -> (Vec<FecPacket>, Vec<FecPacket>) {
        (std::mem::take(&mut self.cols), std::mem::take(&mut self.rows))
    }
}

impl FecListener for FecCollector {
    fn on_new_col(&mut self, col: &FecPacket) -> Result<()> {
        self.cols.push(col.clone());
        Ok(())
    }

    fn on_new_row(&mut self, row: &FecPacket) -> Result<()> {
        self.rows.push(row.clone());
        Ok(())
    }

    fn on_reset(&mut self, _media: &RtpPacket, _expected: Option<SequenceNumber>) -> Result<()> {
        self.resets += 1;
        Ok(())
    }
}
