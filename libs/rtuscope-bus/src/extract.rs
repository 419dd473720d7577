//! Spec-based RX frame extraction
//!
//! Scans an RX window and yields zero or more plausible RTU frames,
//! classifying each as request or response. Candidates are tried at
//! spec-defined fixed lengths only; the extractor never brute-forces CRCs
//! over arbitrary slices. Ambiguity between a response byte count and a
//! request address high byte is resolved by trying the fixed-size request
//! shape first.

use rustc_hash::FxHashMap;

use crate::codec;
use crate::constants::*;
use crate::frame::Frame;

/// What the engine currently has on the wire, for response gating.
#[derive(Debug, Clone, Copy)]
pub struct InflightInfo {
    pub unit_id: u8,
    pub function_code: u8,
    pub quantity: u16,
}

/// Most recent observed foreign read request per unit.
#[derive(Debug, Clone, Copy)]
pub struct RecentRequest {
    pub function_code: u8,
    pub start_register: u16,
    pub quantity: u16,
    pub seen_at_ms: u64,
}

/// Matching context handed in by the engine per invocation.
pub struct ExtractContext<'a> {
    pub inflight: Option<InflightInfo>,
    pub recent_requests: &'a FxHashMap<u8, RecentRequest>,
    pub now_ms: u64,
    pub pairing_window_ms: u64,
}

/// Result of one extractor invocation over an RX window.
#[derive(Default)]
pub struct ExtractOutcome {
    pub frames: Vec<Frame>,
    /// Any noise byte or leftover was seen; counted as one CRC error.
    pub noise: bool,
    /// First spec-sized candidate that failed its CRC, for context capture.
    pub first_invalid: Option<Frame>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    /// `fc | 0x80`, exception code: 5 bytes
    Exception,
    /// FC01-04 request: fixed 8 bytes
    ReadRequest,
    /// FC01-04 response: byte count + 5
    ReadResponse,
    /// FC05/FC06: request and response are structurally identical 8 bytes
    WriteEcho,
    /// FC0F/FC10 response: fixed 8 bytes
    WriteAck,
    /// FC0F/FC10 request: 9 + byte count
    WriteMultiRequest,
}

/// Scan `buf` and extract every plausible frame.
pub fn extract_frames(buf: &[u8], ctx: &ExtractContext) -> ExtractOutcome {
    let mut out = ExtractOutcome::default();
    let mut i = 0usize;

    while i + MIN_FRAME_LEN <= buf.len() {
        let unit = buf[i];
        if unit == 0 || unit > MAX_UNIT_ID {
            out.noise = true;
            i += 1;
            continue;
        }

        let mut failed_candidate = None;
        match try_candidates(&buf[i..], ctx, &mut failed_candidate) {
            Some((frame, consumed)) => {
                out.frames.push(frame);
                i += consumed;
            }
            None => {
                // Only a position that yields nothing surfaces its failed
                // candidate; a shorter candidate losing to a longer one at
                // the same cursor is not an error.
                if out.first_invalid.is_none() {
                    out.first_invalid = failed_candidate;
                }
                out.noise = true;
                i += 1;
            }
        }
    }

    if i < buf.len() {
        out.noise = true;
    }
    out
}

fn is_known_function(fc: u8) -> bool {
    matches!(
        fc,
        FC_READ_COILS
            | FC_READ_DISCRETE_INPUTS
            | FC_READ_HOLDING_REGISTERS
            | FC_READ_INPUT_REGISTERS
            | FC_WRITE_SINGLE_COIL
            | FC_WRITE_SINGLE_REGISTER
            | FC_WRITE_MULTIPLE_COILS
            | FC_WRITE_MULTIPLE_REGISTERS
    )
}

fn try_candidates(
    window: &[u8],
    ctx: &ExtractContext,
    failed: &mut Option<Frame>,
) -> Option<(Frame, usize)> {
    let unit = window[0];
    let fc = window[1];
    let base = fc & !EXCEPTION_BIT;

    if !is_known_function(base) {
        return None;
    }

    if fc & EXCEPTION_BIT != 0 {
        return try_shape(window, 5, Shape::Exception, ctx, failed);
    }

    match fc {
        FC_READ_COILS | FC_READ_DISCRETE_INPUTS | FC_READ_HOLDING_REGISTERS
        | FC_READ_INPUT_REGISTERS => {
            // Request shape first: device address high bytes routinely
            // coincide with plausible response byte counts.
            if let Some(hit) = try_shape(window, 8, Shape::ReadRequest, ctx, failed) {
                return Some(hit);
            }
            let byte_count = window[2] as usize;
            if plausible_byte_count(fc, byte_count) {
                return try_shape(window, byte_count + 5, Shape::ReadResponse, ctx, failed);
            }
            None
        }
        FC_WRITE_SINGLE_COIL | FC_WRITE_SINGLE_REGISTER => {
            try_shape(window, 8, Shape::WriteEcho, ctx, failed)
        }
        FC_WRITE_MULTIPLE_COILS | FC_WRITE_MULTIPLE_REGISTERS => {
            let awaiting_ack = ctx
                .inflight
                .map(|inf| inf.unit_id == unit && inf.function_code == fc)
                .unwrap_or(false);
            let long_len = window.get(6).map(|&bc| 9 + bc as usize);
            let shapes: [(usize, Shape); 2] = if awaiting_ack {
                [(8, Shape::WriteAck), (long_len.unwrap_or(0), Shape::WriteMultiRequest)]
            } else {
                [(long_len.unwrap_or(0), Shape::WriteMultiRequest), (8, Shape::WriteAck)]
            };
            for (len, shape) in shapes {
                if len < MIN_FRAME_LEN {
                    continue;
                }
                if let Some(hit) = try_shape(window, len, shape, ctx, failed) {
                    return Some(hit);
                }
            }
            None
        }
        _ => None,
    }
}

fn try_shape(
    window: &[u8],
    len: usize,
    shape: Shape,
    ctx: &ExtractContext,
    failed: &mut Option<Frame>,
) -> Option<(Frame, usize)> {
    if window.len() < len {
        return None;
    }
    let mut frame = codec::parse_frame(&window[..len])?;

    if !frame.is_valid {
        if failed.is_none() {
            *failed = Some(frame);
        }
        return None;
    }

    if !plausible(&frame, shape, ctx) {
        return None;
    }

    frame.is_request = match shape {
        Shape::ReadRequest | Shape::WriteMultiRequest => true,
        Shape::Exception | Shape::ReadResponse | Shape::WriteAck => false,
        Shape::WriteEcho => {
            // Identical on the wire both directions; only an in-flight
            // write to this unit makes it a response.
            !ctx.inflight
                .map(|inf| {
                    inf.unit_id == frame.unit_id && inf.function_code == frame.function_code
                })
                .unwrap_or(false)
        }
    };
    Some((frame, len))
}

fn plausible_byte_count(fc: u8, byte_count: usize) -> bool {
    match fc {
        FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS => {
            byte_count >= 2 && byte_count <= MAX_RESPONSE_BYTE_COUNT && byte_count % 2 == 0
        }
        FC_READ_COILS | FC_READ_DISCRETE_INPUTS => {
            byte_count >= 1 && byte_count <= MAX_RESPONSE_BYTE_COUNT
        }
        _ => false,
    }
}

fn expected_byte_count(fc: u8, quantity: u16) -> usize {
    match fc {
        FC_READ_COILS | FC_READ_DISCRETE_INPUTS => quantity.div_ceil(8) as usize,
        _ => quantity as usize * 2,
    }
}

fn plausible(frame: &Frame, shape: Shape, ctx: &ExtractContext) -> bool {
    let fc = frame.base_function();
    match shape {
        Shape::Exception => (1..=0x0B).contains(&frame.exception_code),
        Shape::ReadRequest => {
            let quantity = frame.quantity();
            let max = match fc {
                FC_READ_COILS | FC_READ_DISCRETE_INPUTS => MAX_READ_COILS,
                _ => MAX_READ_REGISTERS,
            };
            quantity >= 1
                && quantity <= max
                && frame.start_register() as u32 + quantity as u32 <= 0x1_0000
        }
        Shape::ReadResponse => byte_count_cross_check(frame, ctx),
        Shape::WriteEcho => true,
        Shape::WriteAck => {
            let quantity = frame.quantity();
            let max = match fc {
                FC_WRITE_MULTIPLE_COILS => MAX_WRITE_COILS,
                _ => MAX_WRITE_REGISTERS,
            };
            quantity >= 1 && quantity <= max
        }
        Shape::WriteMultiRequest => {
            let quantity = frame.quantity();
            let payload = frame.payload();
            if payload.len() < 5 {
                return false;
            }
            let declared = payload[4] as usize;
            let (max, expected) = match fc {
                FC_WRITE_MULTIPLE_COILS => (MAX_WRITE_COILS, quantity.div_ceil(8) as usize),
                _ => (MAX_WRITE_REGISTERS, quantity as usize * 2),
            };
            quantity >= 1 && quantity <= max && declared == expected
        }
    }
}

/// Spec step 4: a read response only passes when its byte count matches
/// the quantity of our in-flight request, or of a fresh foreign request
/// for the same unit and function code. With no pairing context at all
/// the CRC has to carry the decision alone.
fn byte_count_cross_check(frame: &Frame, ctx: &ExtractContext) -> bool {
    let fc = frame.base_function();
    let byte_count = frame.byte_count();

    if let Some(inf) = ctx.inflight {
        if inf.unit_id == frame.unit_id && inf.function_code == fc {
            return byte_count == expected_byte_count(fc, inf.quantity);
        }
    }
    if let Some(req) = ctx.recent_requests.get(&frame.unit_id) {
        if req.function_code == fc
            && ctx.now_ms.saturating_sub(req.seen_at_ms) <= ctx.pairing_window_ms
        {
            return byte_count == expected_byte_count(fc, req.quantity);
        }
    }
    true
}
