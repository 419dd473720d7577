//! Half-duplex serial transport abstraction
//!
//! The engine drives the wire through [`SerialLink`]: non-blocking byte
//! reads paired with `available()`, buffered writes with an explicit TX
//! flush, and a driver-enable line for RS-485 transceivers. Character and
//! inter-frame timing are derived once from the serial settings.

use serde::{Deserialize, Serialize};

use crate::constants::SILENCE_FLOOR_US;
use crate::error::Result;

/// Character framing on the wire.
///
/// Character bits include start + data + parity + stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CharFormat {
    /// 8 data bits, no parity, 1 stop bit
    N81,
    /// 8 data bits, even parity, 1 stop bit
    E81,
    /// 8 data bits, odd parity, 1 stop bit
    O81,
    /// 8 data bits, no parity, 2 stop bits
    N82,
    /// 8 data bits, even parity, 2 stop bits
    E82,
    /// 8 data bits, odd parity, 2 stop bits
    O82,
}

impl CharFormat {
    pub fn parity_bits(self) -> u32 {
        match self {
            CharFormat::N81 | CharFormat::N82 => 0,
            _ => 1,
        }
    }

    pub fn stop_bits(self) -> u32 {
        match self {
            CharFormat::N82 | CharFormat::E82 | CharFormat::O82 => 2,
            _ => 1,
        }
    }

    pub fn bits_per_char(self) -> u32 {
        1 + 8 + self.parity_bits() + self.stop_bits()
    }
}

impl Default for CharFormat {
    fn default() -> Self {
        CharFormat::N81
    }
}

/// Serial port parameters the timing budget derives from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSettings {
    pub baud: u32,
    #[serde(default)]
    pub format: CharFormat,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud: 9600,
            format: CharFormat::N81,
        }
    }
}

/// Derived RTU timing: one character, the 1.5-character inter-character
/// gap, and the required inter-frame silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTiming {
    pub char_time_us: u32,
    pub inter_char_us: u32,
    pub silence_us: u32,
}

impl LinkTiming {
    /// Silence is `max(3.5 * charTime, 1750us)`; the fixed floor only
    /// binds above 19 200 baud.
    pub fn from_settings(settings: &SerialSettings) -> Self {
        let char_time_us = (settings.format.bits_per_char() as u64 * 1_000_000
            / settings.baud.max(1) as u64) as u32;
        Self {
            char_time_us,
            inter_char_us: char_time_us * 15 / 10,
            silence_us: (char_time_us * 35 / 10).max(SILENCE_FLOOR_US),
        }
    }
}

/// Byte-level half-duplex transport with optional driver-enable control.
///
/// `read_byte` must not block; callers pair it with `available`. Writes
/// are not complete on the wire until `flush_tx` returns.
pub trait SerialLink: Send {
    /// Bytes ready to read without blocking.
    fn available(&mut self) -> usize;

    /// Read one byte, or `None` when nothing is pending.
    fn read_byte(&mut self) -> Option<u8>;

    /// Queue bytes for transmission.
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()>;

    /// Block until every queued byte has left the UART.
    fn flush_tx(&mut self) -> Result<()>;

    /// Drive (true) or release (false) the RS-485 DE line. No-op on
    /// transports without one.
    fn set_drive_enable(&mut self, enable: bool);
}

#[cfg(feature = "serialport")]
pub use self::port::SerialPortLink;

#[cfg(feature = "serialport")]
mod port {
    use std::io::{Read, Write};
    use std::time::Duration;

    use super::{CharFormat, SerialLink, SerialSettings};
    use crate::error::{BusError, Result};

    /// [`SerialLink`] backed by the `serialport` crate.
    ///
    /// Many RS-485 adapters route DE through RTS; pass `de_via_rts` for
    /// those. Adapters with automatic direction control leave it off.
    pub struct SerialPortLink {
        port: Box<dyn serialport::SerialPort>,
        de_via_rts: bool,
    }

    impl SerialPortLink {
        pub fn open(path: &str, settings: &SerialSettings, de_via_rts: bool) -> Result<Self> {
            let parity = match settings.format {
                CharFormat::N81 | CharFormat::N82 => serialport::Parity::None,
                CharFormat::E81 | CharFormat::E82 => serialport::Parity::Even,
                CharFormat::O81 | CharFormat::O82 => serialport::Parity::Odd,
            };
            let stop_bits = match settings.format.stop_bits() {
                2 => serialport::StopBits::Two,
                _ => serialport::StopBits::One,
            };
            let port = serialport::new(path, settings.baud)
                .data_bits(serialport::DataBits::Eight)
                .parity(parity)
                .stop_bits(stop_bits)
                .timeout(Duration::from_millis(1))
                .open()
                .map_err(|e| BusError::link(format!("open {path}: {e}")))?;
            Ok(Self { port, de_via_rts })
        }
    }

    impl SerialLink for SerialPortLink {
        fn available(&mut self) -> usize {
            self.port.bytes_to_read().unwrap_or(0) as usize
        }

        fn read_byte(&mut self) -> Option<u8> {
            if self.available() == 0 {
                return None;
            }
            let mut buf = [0u8; 1];
            match self.port.read(&mut buf) {
                Ok(1) => Some(buf[0]),
                _ => None,
            }
        }

        fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
            self.port
                .write_all(bytes)
                .map_err(|e| BusError::link(format!("write: {e}")))
        }

        fn flush_tx(&mut self) -> Result<()> {
            self.port
                .flush()
                .map_err(|e| BusError::link(format!("flush: {e}")))
        }

        fn set_drive_enable(&mut self, enable: bool) {
            if self.de_via_rts {
                let _ = self.port.write_request_to_send(enable);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_per_char() {
        assert_eq!(CharFormat::N81.bits_per_char(), 10);
        assert_eq!(CharFormat::E81.bits_per_char(), 11);
        assert_eq!(CharFormat::O81.bits_per_char(), 11);
        assert_eq!(CharFormat::N82.bits_per_char(), 11);
        assert_eq!(CharFormat::E82.bits_per_char(), 12);
    }

    #[test]
    fn test_timing_9600_8n1() {
        let timing = LinkTiming::from_settings(&SerialSettings {
            baud: 9600,
            format: CharFormat::N81,
        });
        // 10 bits / 9600 baud = 1041us per character
        assert_eq!(timing.char_time_us, 1041);
        assert_eq!(timing.inter_char_us, 1561);
        // 3.5 chars = 3643us, above the floor
        assert_eq!(timing.silence_us, 3643);
    }

    #[test]
    fn test_timing_floor_above_19200() {
        let timing = LinkTiming::from_settings(&SerialSettings {
            baud: 115_200,
            format: CharFormat::N81,
        });
        // 3.5 chars would be ~303us; the 1750us floor applies
        assert_eq!(timing.silence_us, SILENCE_FLOOR_US);
    }

    #[test]
    fn test_timing_at_19200_uses_char_time() {
        let timing = LinkTiming::from_settings(&SerialSettings {
            baud: 19_200,
            format: CharFormat::N81,
        });
        // 520us per char, 3.5 chars = 1820us > floor
        assert_eq!(timing.silence_us, 1820);
    }
}
