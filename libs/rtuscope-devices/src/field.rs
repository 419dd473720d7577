//! Register field types and raw word conversions
//!
//! 32-bit variants reconstruct from two consecutive 16-bit registers in
//! the indicated word order; `_le` means word-swapped (CD AB) relative to
//! the big-endian wire order of each register.

use serde::{Deserialize, Serialize};

/// Interpretation of one named register span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Uint8,
    Int8,
    #[default]
    Uint16,
    Int16,
    Uint32Be,
    Uint32Le,
    Int32Be,
    Int32Le,
    Float32Be,
    Float32Le,
    Bool,
    String,
}

impl FieldType {
    /// Registers one value of this type occupies. `String` spans are
    /// sized by the schema's `length` field instead.
    pub fn register_len(self) -> u16 {
        match self {
            FieldType::Uint32Be
            | FieldType::Uint32Le
            | FieldType::Int32Be
            | FieldType::Int32Le
            | FieldType::Float32Be
            | FieldType::Float32Le => 2,
            _ => 1,
        }
    }

    /// Decode raw register words to an unscaled numeric value. `None`
    /// when too few words arrived or for `String`.
    pub fn decode(self, words: &[u16]) -> Option<f64> {
        let w0 = *words.first()?;
        let value = match self {
            FieldType::Uint8 => f64::from(w0 & 0x00FF),
            FieldType::Int8 => f64::from((w0 & 0x00FF) as u8 as i8),
            FieldType::Uint16 => f64::from(w0),
            FieldType::Int16 => f64::from(w0 as i16),
            FieldType::Uint32Be => f64::from(join(w0, *words.get(1)?)),
            FieldType::Uint32Le => f64::from(join(*words.get(1)?, w0)),
            FieldType::Int32Be => f64::from(join(w0, *words.get(1)?) as i32),
            FieldType::Int32Le => f64::from(join(*words.get(1)?, w0) as i32),
            FieldType::Float32Be => f64::from(f32::from_bits(join(w0, *words.get(1)?))),
            FieldType::Float32Le => f64::from(f32::from_bits(join(*words.get(1)?, w0))),
            FieldType::Bool => f64::from(u8::from(w0 != 0)),
            FieldType::String => return None,
        };
        Some(value)
    }

    /// Decode a register span as ASCII text, two characters per word,
    /// high byte first. NULs and trailing blanks are trimmed.
    pub fn decode_string(words: &[u16]) -> String {
        let mut out = String::with_capacity(words.len() * 2);
        for &word in words {
            for byte in word.to_be_bytes() {
                if byte == 0 {
                    continue;
                }
                out.push(char::from(byte));
            }
        }
        out.trim_end().to_string()
    }

    /// Encode an unscaled value back into register words, clamping to
    /// the representable range of the type. `None` for `String`.
    pub fn encode(self, raw: f64) -> Option<Vec<u16>> {
        let words = match self {
            FieldType::Uint8 => vec![clamp_round(raw, 0.0, 255.0) as u16],
            FieldType::Int8 => {
                vec![(clamp_round(raw, -128.0, 127.0) as i8 as u8) as u16]
            }
            FieldType::Uint16 => vec![clamp_round(raw, 0.0, 65_535.0) as u16],
            FieldType::Int16 => {
                vec![clamp_round(raw, -32_768.0, 32_767.0) as i16 as u16]
            }
            FieldType::Uint32Be => split(clamp_round(raw, 0.0, u32::MAX as f64) as u32, false),
            FieldType::Uint32Le => split(clamp_round(raw, 0.0, u32::MAX as f64) as u32, true),
            FieldType::Int32Be => {
                split(clamp_round(raw, i32::MIN as f64, i32::MAX as f64) as i32 as u32, false)
            }
            FieldType::Int32Le => {
                split(clamp_round(raw, i32::MIN as f64, i32::MAX as f64) as i32 as u32, true)
            }
            FieldType::Float32Be => split((raw as f32).to_bits(), false),
            FieldType::Float32Le => split((raw as f32).to_bits(), true),
            FieldType::Bool => vec![u16::from(raw >= 0.5)],
            FieldType::String => return None,
        };
        Some(words)
    }
}

fn join(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

fn split(value: u32, word_swap: bool) -> Vec<u16> {
    let high = (value >> 16) as u16;
    let low = (value & 0xFFFF) as u16;
    if word_swap {
        vec![low, high]
    } else {
        vec![high, low]
    }
}

fn clamp_round(value: f64, min: f64, max: f64) -> f64 {
    value.round().clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_names_match_schema_documents() {
        let parsed: FieldType =
            serde_json::from_str("\"float32_be\"").expect("float32_be parses");
        assert_eq!(parsed, FieldType::Float32Be);
        let parsed: FieldType = serde_json::from_str("\"uint32_le\"").expect("uint32_le parses");
        assert_eq!(parsed, FieldType::Uint32Le);
        let parsed: FieldType = serde_json::from_str("\"bool\"").expect("bool parses");
        assert_eq!(parsed, FieldType::Bool);
        let parsed: FieldType = serde_json::from_str("\"uint16\"").expect("uint16 parses");
        assert_eq!(parsed, FieldType::Uint16);
    }

    #[test]
    fn test_decode_int16_sign() {
        assert_eq!(FieldType::Int16.decode(&[0xFFFE]), Some(-2.0));
        assert_eq!(FieldType::Uint16.decode(&[0xFFFE]), Some(65_534.0));
    }

    #[test]
    fn test_decode_u8_i8_low_byte() {
        assert_eq!(FieldType::Uint8.decode(&[0x01FF]), Some(255.0));
        assert_eq!(FieldType::Int8.decode(&[0x00FF]), Some(-1.0));
    }

    #[test]
    fn test_decode_32bit_word_orders() {
        // 0x0001_0002 = 65538
        assert_eq!(FieldType::Uint32Be.decode(&[0x0001, 0x0002]), Some(65_538.0));
        assert_eq!(FieldType::Uint32Le.decode(&[0x0002, 0x0001]), Some(65_538.0));
        assert_eq!(
            FieldType::Int32Be.decode(&[0xFFFF, 0xFFFE]),
            Some(-2.0)
        );
    }

    #[test]
    fn test_decode_float32() {
        // 25.0f32 = 0x41C80000
        assert_eq!(FieldType::Float32Be.decode(&[0x41C8, 0x0000]), Some(25.0));
        assert_eq!(FieldType::Float32Le.decode(&[0x0000, 0x41C8]), Some(25.0));
    }

    #[test]
    fn test_decode_insufficient_words() {
        assert_eq!(FieldType::Float32Be.decode(&[0x41C8]), None);
        assert_eq!(FieldType::Uint16.decode(&[]), None);
    }

    #[test]
    fn test_decode_bool() {
        assert_eq!(FieldType::Bool.decode(&[0]), Some(0.0));
        assert_eq!(FieldType::Bool.decode(&[0x8000]), Some(1.0));
    }

    #[test]
    fn test_decode_string_trims() {
        // "SDM" padded with NULs
        let text = FieldType::decode_string(&[0x5344, 0x4D00]);
        assert_eq!(text, "SDM");
    }

    #[test]
    fn test_encode_round_trip_numeric() {
        for (ty, value) in [
            (FieldType::Uint16, 1234.0),
            (FieldType::Int16, -1234.0),
            (FieldType::Uint32Be, 70_000.0),
            (FieldType::Uint32Le, 70_000.0),
            (FieldType::Int32Be, -70_000.0),
            (FieldType::Float32Be, 25.5),
            (FieldType::Float32Le, -0.125),
        ] {
            let words = ty.encode(value).expect("encodes");
            assert_eq!(
                ty.decode(&words),
                Some(value),
                "round trip failed for {ty:?}"
            );
        }
    }

    #[test]
    fn test_encode_clamps_overflow() {
        assert_eq!(FieldType::Uint16.encode(70_000.0), Some(vec![65_535]));
        assert_eq!(FieldType::Uint16.encode(-5.0), Some(vec![0]));
        assert_eq!(FieldType::Int16.encode(40_000.0), Some(vec![32_767]));
    }

    #[test]
    fn test_encode_string_unsupported() {
        assert_eq!(FieldType::String.encode(1.0), None);
    }

    #[test]
    fn test_register_len() {
        assert_eq!(FieldType::Uint16.register_len(), 1);
        assert_eq!(FieldType::Bool.register_len(), 1);
        assert_eq!(FieldType::Float32Be.register_len(), 2);
        assert_eq!(FieldType::Int32Le.register_len(), 2);
    }
}
