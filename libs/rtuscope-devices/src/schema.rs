//! Declarative device schema documents
//!
//! Device types and unit mappings load from JSON documents. Missing
//! fields take documented defaults (`length=1`, `functionCode=3`,
//! `factor=1`, `offset=0`, `pollInterval=0`). A document that fails
//! validation registers nothing.

use serde::{Deserialize, Serialize};
use tracing::debug;

use rtuscope_bus::constants::{
    FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS, MAX_READ_REGISTERS,
};

use crate::error::{DeviceError, Result};
use crate::field::FieldType;

/// One named register span in a device type.
///
/// ```json
/// {
///   "name": "Voltage",
///   "address": 0,
///   "length": 2,
///   "functionCode": 4,
///   "dataType": "float32_be",
///   "factor": 1.0,
///   "offset": 0,
///   "unit": "V",
///   "pollInterval": 5000
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDef {
    pub name: String,
    pub address: u16,
    #[serde(default = "default_length")]
    pub length: u16,
    #[serde(default = "default_function_code")]
    pub function_code: u8,
    #[serde(default)]
    pub data_type: FieldType,
    #[serde(default = "default_factor", rename = "factor")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default)]
    pub unit: String,
    #[serde(default, rename = "pollInterval")]
    pub poll_interval_ms: u64,
}

fn default_length() -> u16 {
    1
}
fn default_function_code() -> u8 {
    FC_READ_HOLDING_REGISTERS
}
fn default_factor() -> f64 {
    1.0
}

impl RegisterDef {
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(DeviceError::config("register with empty name"));
        }
        if self.function_code != FC_READ_HOLDING_REGISTERS
            && self.function_code != FC_READ_INPUT_REGISTERS
        {
            return Err(DeviceError::config(format!(
                "register '{}': functionCode must be 3 or 4, got {}",
                self.name, self.function_code
            )));
        }
        if self.length == 0 || self.length > MAX_READ_REGISTERS {
            return Err(DeviceError::config(format!(
                "register '{}': length {} outside 1..={}",
                self.name, self.length, MAX_READ_REGISTERS
            )));
        }
        if u32::from(self.address) + u32::from(self.length) > 0x1_0000 {
            return Err(DeviceError::config(format!(
                "register '{}': span exceeds the address space",
                self.name
            )));
        }
        let type_len = self.data_type.register_len();
        if self.data_type != FieldType::String && self.length != type_len {
            return Err(DeviceError::config(format!(
                "register '{}': {:?} occupies {} register(s), schema says {}",
                self.name, self.data_type, type_len, self.length
            )));
        }
        if self.scale == 0.0 {
            return Err(DeviceError::config(format!(
                "register '{}': factor must not be zero",
                self.name
            )));
        }
        Ok(())
    }
}

/// A device type: name plus its ordered register list. Immutable after
/// load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceType {
    pub name: String,
    #[serde(default)]
    pub registers: Vec<RegisterDef>,
}

/// One `{unitId, type, name}` mapping entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingEntry {
    pub unit_id: u8,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub name: String,
}

/// The `{"devices": [...]}` mapping document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingDoc {
    pub devices: Vec<MappingEntry>,
}

/// Parse and validate a device type document.
pub fn parse_device_type(bytes: &[u8]) -> Result<DeviceType> {
    let doc: DeviceType = serde_json::from_slice(bytes)?;
    if doc.name.is_empty() {
        return Err(DeviceError::config("device type with empty name"));
    }
    for register in &doc.registers {
        register.validate()?;
    }
    let mut seen = std::collections::BTreeSet::new();
    for register in &doc.registers {
        if !seen.insert(register.name.as_str()) {
            return Err(DeviceError::config(format!(
                "duplicate register name '{}'",
                register.name
            )));
        }
    }
    debug!(
        device_type = %doc.name,
        registers = doc.registers.len(),
        "device type parsed"
    );
    Ok(doc)
}

/// Parse a unit mapping document.
pub fn parse_mapping(bytes: &[u8]) -> Result<MappingDoc> {
    let doc: MappingDoc = serde_json::from_slice(bytes)?;
    Ok(doc)
}
