//! Raw register cache fed by own and observed traffic

use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::constants::{FC_READ_COILS, FC_READ_DISCRETE_INPUTS};

/// Register snapshot for one (unit, function code) pair.
#[derive(Debug, Clone, Default)]
pub struct RegisterEntry {
    pub registers: BTreeMap<u16, u16>,
    pub last_update_ms: u64,
    pub requests: u32,
    pub responses: u32,
    pub errors: u32,
}

/// Address -> value maps keyed by (unit, function code), created lazily
/// on first observation.
#[derive(Debug, Default)]
pub struct RegisterCache {
    entries: FxHashMap<(u8, u8), RegisterEntry>,
}

impl RegisterCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, unit_id: u8, function_code: u8) -> &mut RegisterEntry {
        self.entries.entry((unit_id, function_code)).or_default()
    }

    /// Apply a CRC-valid, non-exception read response paired with a
    /// request covering `[start, start + quantity)`. Register words are
    /// big-endian on the wire; coil bytes unpack little-endian bit first.
    pub fn apply_read_response(
        &mut self,
        unit_id: u8,
        function_code: u8,
        start: u16,
        quantity: u16,
        data: &[u8],
        now_ms: u64,
    ) {
        let entry = self.entry(unit_id, function_code);
        entry.responses += 1;
        entry.last_update_ms = now_ms;

        if function_code == FC_READ_COILS || function_code == FC_READ_DISCRETE_INPUTS {
            let count = (quantity as usize).min(data.len() * 8);
            for i in 0..count {
                let bit = (data[i / 8] >> (i % 8)) & 0x01;
                entry.registers.insert(start.wrapping_add(i as u16), u16::from(bit));
            }
        } else {
            let count = (quantity as usize).min(data.len() / 2);
            for i in 0..count {
                let value = u16::from_be_bytes([data[i * 2], data[i * 2 + 1]]);
                entry.registers.insert(start.wrapping_add(i as u16), value);
            }
        }
    }

    pub fn note_request(&mut self, unit_id: u8, function_code: u8) {
        self.entry(unit_id, function_code).requests += 1;
    }

    pub fn note_error(&mut self, unit_id: u8, function_code: u8) {
        self.entry(unit_id, function_code).errors += 1;
    }

    /// Read one cached value; `None` when never observed.
    pub fn read(&self, unit_id: u8, function_code: u8, address: u16) -> Option<u16> {
        self.entries
            .get(&(unit_id, function_code))
            .and_then(|e| e.registers.get(&address).copied())
    }

    pub fn get(&self, unit_id: u8, function_code: u8) -> Option<&RegisterEntry> {
        self.entries.get(&(unit_id, function_code))
    }

    /// Stable-ordered snapshot for diagnostic consumers.
    pub fn snapshot(&self) -> Vec<RegisterMapSummary> {
        let mut keys: Vec<&(u8, u8)> = self.entries.keys().collect();
        keys.sort();
        keys.into_iter()
            .map(|key| {
                let entry = &self.entries[key];
                RegisterMapSummary {
                    unit_id: key.0,
                    function_code: key.1,
                    register_count: entry.registers.len(),
                    last_update_ms: entry.last_update_ms,
                    requests: entry.requests,
                    responses: entry.responses,
                    errors: entry.errors,
                }
            })
            .collect()
    }
}

/// Per-(unit, fc) cache digest.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterMapSummary {
    pub unit_id: u8,
    pub function_code: u8,
    pub register_count: usize,
    pub last_update_ms: u64,
    pub requests: u32,
    pub responses: u32,
    pub errors: u32,
}
