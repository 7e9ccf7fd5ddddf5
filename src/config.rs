//! Configuration constants and types for the FEC generator and receiver.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Dynamic RTP payload type used to carry SMPTE 2022-1 FEC packets.
pub const DYNAMIC_PT: u8 = 96;

/// RTP payload type of MPEG2 transport stream (RFC 3551).
pub const MP2T_PT: u8 = 33;

/// MPEG2-TS clock rate in Hz.
pub const MP2T_CLOCK_RATE: u32 = 90_000;

/// Default number of columns (L) of the FEC matrix.
pub const DEFAULT_COLUMNS: u8 = 5;

/// Default number of rows (D) of the FEC matrix.
pub const DEFAULT_ROWS: u8 = 6;

/// Default receiver buffer depth, in media packets.
pub const DEFAULT_DELAY: usize = 100;

/// Default FEC eviction window, as a multiple of the receiver delay.
pub const DEFAULT_DROP_WINDOW_FACTOR: u16 = 10;

/// Largest datagram read from a socket.
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// SMPTE 2022-1 matrix limits.
pub mod matrix_limits {
    /// Minimum number of columns (L).
    pub const MIN_COLUMNS: u8 = 1;

    /// Maximum number of columns (L).
    pub const MAX_COLUMNS: u8 = 50;

    /// Minimum number of rows (D).
    pub const MIN_ROWS: u8 = 4;

    /// Maximum number of rows (D).
    pub const MAX_ROWS: u8 = 50;

    /// Maximum number of media packets in one matrix (L * D).
    pub const MAX_SIZE: u16 = 256;
}

/// Default UDP endpoints of the socket tools.
pub mod endpoints {
    /// Incoming media stream.
    pub const MEDIA: &str = "239.232.0.222:5004";

    /// Outgoing column FEC stream.
    pub const COL: &str = "232.232.0.222:5006";

    /// Outgoing row FEC stream.
    pub const ROW: &str = "232.232.0.222:5008";

    /// Column FEC port relative to the media port.
    pub const COL_PORT_OFFSET: u16 = 2;

    /// Row FEC port relative to the media port.
    pub const ROW_PORT_OFFSET: u16 = 4;

    /// Multicast TTL for generated FEC streams.
    pub const MULTICAST_TTL: u32 = 2;
}

/// FEC matrix dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixConfig {
    /// Horizontal size of the matrix (L), also the column FEC offset.
    pub columns: u8,

    /// Vertical size of the matrix (D).
    pub rows: u8,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            columns: DEFAULT_COLUMNS,
            rows: DEFAULT_ROWS,
        }
    }
}

impl MatrixConfig {
    /// Create a matrix configuration (L columns, D rows).
    pub fn new(columns: u8, rows: u8) -> Self {
        Self { columns, rows }
    }

    /// Number of media packets covered by one matrix.
    pub fn size(&self) -> usize {
        usize::from(self.columns) * usize::from(self.rows)
    }

    /// Validate the matrix against SMPTE 2022-1 limits.
    pub fn validate(&self) -> std::result::Result<(), String> {
        use matrix_limits::*;

        if self.columns < MIN_COLUMNS || self.columns > MAX_COLUMNS {
            return Err(format!(
                "L must be between {} and {}, got {}",
                MIN_COLUMNS, MAX_COLUMNS, self.columns
            ));
        }
        if self.rows < MIN_ROWS || self.rows > MAX_ROWS {
            return Err(format!(
                "D must be between {} and {}, got {}",
                MIN_ROWS, MAX_ROWS, self.rows
            ));
        }
        if self.size() > usize::from(MAX_SIZE) {
            return Err(format!(
                "L * D must not exceed {}, got {}x{} = {}",
                MAX_SIZE,
                self.columns,
                self.rows,
                self.size()
            ));
        }
        Ok(())
    }
}

/// Receiver settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Number of media packets kept buffered before output.
    pub delay: usize,

    /// Once the output started, FEC packets whose snbase is not within
    /// `delay * drop_window_factor` packets after the output position are
    /// dropped.
    pub drop_window_factor: u16,

    /// Only accept media packets carrying MPEG2-TS.
    pub only_mp2t: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DELAY,
            drop_window_factor: DEFAULT_DROP_WINDOW_FACTOR,
            only_mp2t: false,
        }
    }
}

impl ReceiverConfig {
    /// Create a receiver configuration with the given delay and default settings.
    pub fn with_delay(delay: usize) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Load a configuration from a JSON file; missing keys take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ReceiverConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Width of the FEC validity window, in packets.
    ///
    /// Always below half the sequence space so the window stays unambiguous.
    pub fn drop_window(&self) -> u16 {
        let window = self.delay.saturating_mul(usize::from(self.drop_window_factor));
        window.min(usize::from(u16::MAX / 2)) as u16
    }

    /// Validate the configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.drop_window_factor == 0 {
            return Err("Drop window factor must be greater than 0".to_string());
        }
        if self.delay > usize::from(u16::MAX / 2) {
            return Err(format!(
                "Delay must not exceed {} packets, got {}",
                u16::MAX / 2,
                self.delay
            ));
        }
        Ok(())
    }
}
