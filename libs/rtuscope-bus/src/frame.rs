//! Parsed RTU frame value
//!
//! A [`Frame`] owns its payload in a fixed stack array so ring buffers of
//! frames never hold references into the shared RX buffer.

use serde::Serialize;

use crate::clock::Timestamp;
use crate::constants::{EXCEPTION_BIT, MAX_PAYLOAD_LEN};

/// One RTU PDU captured from the wire, request or response, valid or not.
#[derive(Clone)]
pub struct Frame {
    pub unit_id: u8,
    pub function_code: u8,
    pub(crate) payload: [u8; MAX_PAYLOAD_LEN],
    pub(crate) payload_len: u16,
    /// CRC as received on the wire (little-endian there).
    pub crc: u16,
    pub capture_uptime_us: u64,
    /// Epoch seconds at capture, 0 while wall time is unknown.
    pub capture_epoch_secs: u32,
    /// Best-effort request/response classification.
    pub is_request: bool,
    /// CRC check passed.
    pub is_valid: bool,
    pub is_exception: bool,
    pub exception_code: u8,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            unit_id: 0,
            function_code: 0,
            payload: [0; MAX_PAYLOAD_LEN],
            payload_len: 0,
            crc: 0,
            capture_uptime_us: 0,
            capture_epoch_secs: 0,
            is_request: false,
            is_valid: false,
            is_exception: false,
            exception_code: 0,
        }
    }
}

impl Frame {
    /// Payload bytes: the PDU minus unit, function code and CRC.
    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.payload_len as usize]
    }

    pub(crate) fn set_payload(&mut self, bytes: &[u8]) {
        let len = bytes.len().min(MAX_PAYLOAD_LEN);
        self.payload[..len].copy_from_slice(&bytes[..len]);
        self.payload_len = len as u16;
    }

    /// Function code with the exception bit cleared.
    pub fn base_function(&self) -> u8 {
        self.function_code & !EXCEPTION_BIT
    }

    /// For read requests: first register address (big-endian payload[0..2]).
    pub fn start_register(&self) -> u16 {
        let p = self.payload();
        if p.len() >= 2 {
            u16::from_be_bytes([p[0], p[1]])
        } else {
            0
        }
    }

    /// For read requests: register/coil quantity (big-endian payload[2..4]).
    pub fn quantity(&self) -> u16 {
        let p = self.payload();
        if p.len() >= 4 {
            u16::from_be_bytes([p[2], p[3]])
        } else {
            0
        }
    }

    /// For read responses: declared data byte count.
    pub fn byte_count(&self) -> usize {
        self.payload().first().copied().unwrap_or(0) as usize
    }

    /// For read responses: the register data after the byte count,
    /// clipped to what actually arrived.
    pub fn register_payload(&self) -> &[u8] {
        let p = self.payload();
        if p.len() <= 1 {
            return &[];
        }
        let declared = p[0] as usize;
        let end = (1 + declared).min(p.len());
        &p[1..end]
    }

    /// For read responses: the i-th big-endian register word.
    pub fn register_word(&self, index: usize) -> Option<u16> {
        let data = self.register_payload();
        let offset = index * 2;
        if offset + 1 < data.len() {
            Some(u16::from_be_bytes([data[offset], data[offset + 1]]))
        } else {
            None
        }
    }

    /// Full wire image: unit, fc, payload, CRC low byte then high byte.
    pub fn wire_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.payload_len as usize);
        out.push(self.unit_id);
        out.push(self.function_code);
        out.extend_from_slice(self.payload());
        out.extend_from_slice(&self.crc.to_le_bytes());
        out
    }

    /// Compact export value for diagnostic endpoints.
    pub fn summary(&self) -> FrameSummary {
        FrameSummary {
            unit_id: self.unit_id,
            function_code: self.function_code,
            length: 4 + self.payload_len as usize,
            is_request: self.is_request,
            crc_valid: self.is_valid,
            exception_code: self.is_exception.then_some(self.exception_code),
            hex: hex_string(&self.wire_bytes()),
            timestamp: Timestamp::new(self.capture_uptime_us / 1000, self.capture_epoch_secs),
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("unit_id", &self.unit_id)
            .field("function_code", &format_args!("0x{:02X}", self.function_code))
            .field("payload_len", &self.payload_len)
            .field("crc", &format_args!("0x{:04X}", self.crc))
            .field("is_request", &self.is_request)
            .field("is_valid", &self.is_valid)
            .field("is_exception", &self.is_exception)
            .finish()
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.unit_id == other.unit_id
            && self.function_code == other.function_code
            && self.payload() == other.payload()
            && self.crc == other.crc
    }
}

/// Frame digest exposed to diagnostic consumers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameSummary {
    pub unit_id: u8,
    pub function_code: u8,
    pub length: usize,
    pub is_request: bool,
    pub crc_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_code: Option<u8>,
    pub hex: String,
    pub timestamp: Timestamp,
}

/// Uppercase space-separated hex dump.
pub fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{b:02X}"));
    }
    out
}
