//! Protocol limits and engine defaults

/// Read Coils
pub const FC_READ_COILS: u8 = 0x01;
/// Read Discrete Inputs
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;
/// Read Holding Registers
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
/// Read Input Registers
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;
/// Write Single Coil
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;
/// Write Single Register
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;
/// Write Multiple Coils
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;
/// Write Multiple Registers
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// High bit set in a response function code marks an exception
pub const EXCEPTION_BIT: u8 = 0x80;

/// Highest valid slave address; 0 is broadcast and never used here
pub const MAX_UNIT_ID: u8 = 247;

/// Protocol cap on registers per read request (FC03/FC04)
pub const MAX_READ_REGISTERS: u16 = 125;
/// Protocol cap on coils per read request (FC01/FC02)
pub const MAX_READ_COILS: u16 = 2000;
/// Protocol cap on registers per write-multiple request (FC10)
pub const MAX_WRITE_REGISTERS: u16 = 123;
/// Protocol cap on coils per write-multiple request (FC0F)
pub const MAX_WRITE_COILS: u16 = 1968;

/// Read response byte counts above this are implausible
pub const MAX_RESPONSE_BYTE_COUNT: usize = 250;
/// Smallest parseable frame: unit + fc + CRC
pub const MIN_FRAME_LEN: usize = 4;
/// Largest RTU frame on the wire
pub const MAX_FRAME_LEN: usize = 256;
/// Frame payload capacity (frame minus unit, fc and CRC)
pub const MAX_PAYLOAD_LEN: usize = 252;

/// Inter-frame silence never drops below this, regardless of baud rate
pub const SILENCE_FLOOR_US: u32 = 1750;
/// RS-485 transceiver settling time around DE transitions
pub const DE_SETTLE_US: u64 = 100;

/// Default request queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;
/// Default response timeout
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 1000;
/// Default freshness window for pairing responses with observed requests
pub const DEFAULT_PAIRING_WINDOW_MS: u64 = 2000;
/// Default budget for the bounded TX arbitration loop
pub const DEFAULT_ARBITRATION_BUDGET_US: u64 = 8000;

/// Initial per-unit back-off after repeated timeouts
pub const BACKOFF_INITIAL_MS: u64 = 2000;
/// Back-off doubling cap
pub const BACKOFF_MAX_MS: u64 = 60_000;
/// Consecutive timeouts before a unit is paused
pub const BACKOFF_PAUSE_THRESHOLD: u32 = 3;

/// Frame history ring size (valid and invalid frames)
pub const FRAME_HISTORY_SIZE: usize = 20;
/// CRC error context ring size
pub const CRC_CONTEXT_SIZE: usize = 10;

/// Default statistics interval for warning checks
pub const DEFAULT_STATS_INTERVAL_MS: u64 = 60_000;
/// Throttle for per-unit timeout warnings
pub const TIMEOUT_WARN_THROTTLE_MS: u64 = 5000;

/// Pre-reserved RX buffer capacity; the buffer never reallocates
pub const RX_BUFFER_CAPACITY: usize = 256;
