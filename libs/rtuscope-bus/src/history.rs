//! Debug rings: recent frames and CRC-error contexts
//!
//! Both rings hold owned frames with fixed payload arrays, so nothing in
//! here can grow the heap or keep the RX buffer alive.

use crate::constants::{CRC_CONTEXT_SIZE, FRAME_HISTORY_SIZE};
use crate::frame::Frame;

/// Ring of the last frames seen on the bus, valid and invalid.
#[derive(Debug, Default)]
pub struct FrameHistory {
    entries: Vec<Frame>,
    next: usize,
}

impl FrameHistory {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(FRAME_HISTORY_SIZE),
            next: 0,
        }
    }

    pub fn push(&mut self, frame: Frame) {
        if self.entries.len() < FRAME_HISTORY_SIZE {
            self.entries.push(frame);
        } else {
            self.entries[self.next] = frame;
        }
        self.next = (self.next + 1) % FRAME_HISTORY_SIZE;
    }

    /// Most recent frame recorded, if any.
    pub fn last(&self) -> Option<&Frame> {
        if self.entries.len() < FRAME_HISTORY_SIZE {
            self.entries.last()
        } else {
            self.entries
                .get((self.next + FRAME_HISTORY_SIZE - 1) % FRAME_HISTORY_SIZE)
        }
    }

    /// Frames oldest-first.
    pub fn snapshot(&self) -> Vec<Frame> {
        if self.entries.len() < FRAME_HISTORY_SIZE {
            return self.entries.clone();
        }
        let mut out = Vec::with_capacity(FRAME_HISTORY_SIZE);
        for i in 0..FRAME_HISTORY_SIZE {
            out.push(self.entries[(self.next + i) % FRAME_HISTORY_SIZE].clone());
        }
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Post-mortem context around one CRC failure: the frame before it, the
/// corrupt candidate itself, and the frame after it once one arrives.
#[derive(Debug, Clone)]
pub struct CrcErrorContext {
    pub id: u32,
    pub before: Option<Frame>,
    pub bad: Frame,
    pub after: Option<Frame>,
}

/// Ring of recent CRC-error contexts. The `after` slot of the newest
/// entry is filled by the next frame that arrives.
#[derive(Debug, Default)]
pub struct CrcContextRing {
    entries: Vec<CrcErrorContext>,
    next: usize,
    next_id: u32,
    pending_after: Option<usize>,
}

impl CrcContextRing {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(CRC_CONTEXT_SIZE),
            next: 0,
            next_id: 1,
            pending_after: None,
        }
    }

    pub fn record_bad(&mut self, bad: Frame, before: Option<Frame>) {
        let ctx = CrcErrorContext {
            id: self.next_id,
            before,
            bad,
            after: None,
        };
        self.next_id = self.next_id.wrapping_add(1).max(1);

        let idx = if self.entries.len() < CRC_CONTEXT_SIZE {
            self.entries.push(ctx);
            self.entries.len() - 1
        } else {
            self.entries[self.next] = ctx;
            self.next
        };
        self.next = (idx + 1) % CRC_CONTEXT_SIZE;
        self.pending_after = Some(idx);
    }

    /// Feed every subsequent frame; the first one after a bad frame
    /// completes that context.
    pub fn note_frame(&mut self, frame: &Frame) {
        if let Some(idx) = self.pending_after.take() {
            if let Some(ctx) = self.entries.get_mut(idx) {
                ctx.after = Some(frame.clone());
            }
        }
    }

    /// Contexts oldest-first.
    pub fn snapshot(&self) -> Vec<CrcErrorContext> {
        if self.entries.len() < CRC_CONTEXT_SIZE {
            return self.entries.clone();
        }
        let mut out = Vec::with_capacity(CRC_CONTEXT_SIZE);
        for i in 0..CRC_CONTEXT_SIZE {
            out.push(self.entries[(self.next + i) % CRC_CONTEXT_SIZE].clone());
        }
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(unit: u8) -> Frame {
        Frame {
            unit_id: unit,
            function_code: 0x03,
            is_valid: true,
            ..Frame::default()
        }
    }

    #[test]
    fn test_history_keeps_last_n() {
        let mut history = FrameHistory::new();
        for unit in 1..=25u8 {
            history.push(frame(unit));
        }
        let snap = history.snapshot();
        assert_eq!(snap.len(), FRAME_HISTORY_SIZE);
        assert_eq!(snap[0].unit_id, 6);
        assert_eq!(snap[FRAME_HISTORY_SIZE - 1].unit_id, 25);
        assert_eq!(history.last().map(|f| f.unit_id), Some(25));
    }

    #[test]
    fn test_history_partial_fill() {
        let mut history = FrameHistory::new();
        assert!(history.is_empty());
        history.push(frame(1));
        history.push(frame(2));
        assert_eq!(history.len(), 2);
        assert_eq!(history.last().map(|f| f.unit_id), Some(2));
        let snap = history.snapshot();
        assert_eq!(snap[0].unit_id, 1);
        assert_eq!(snap[1].unit_id, 2);
    }

    #[test]
    fn test_crc_context_before_and_after() {
        let mut ring = CrcContextRing::new();
        let mut bad = frame(9);
        bad.is_valid = false;

        ring.record_bad(bad, Some(frame(1)));
        ring.note_frame(&frame(2));
        ring.note_frame(&frame(3)); // only the first fills `after`

        let snap = ring.snapshot();
        assert_eq!(snap.len(), 1);
        let ctx = &snap[0];
        assert_eq!(ctx.id, 1);
        assert_eq!(ctx.before.as_ref().map(|f| f.unit_id), Some(1));
        assert_eq!(ctx.bad.unit_id, 9);
        assert_eq!(ctx.after.as_ref().map(|f| f.unit_id), Some(2));
    }

    #[test]
    fn test_crc_context_without_neighbors() {
        let mut ring = CrcContextRing::new();
        let mut bad = frame(9);
        bad.is_valid = false;
        ring.record_bad(bad, None);
        let snap = ring.snapshot();
        assert!(snap[0].before.is_none());
        assert!(snap[0].after.is_none());
    }

    #[test]
    fn test_crc_ring_wraps_and_ids_advance() {
        let mut ring = CrcContextRing::new();
        for i in 0..(CRC_CONTEXT_SIZE + 3) {
            let mut bad = frame(i as u8 + 1);
            bad.is_valid = false;
            ring.record_bad(bad, None);
        }
        let snap = ring.snapshot();
        assert_eq!(snap.len(), CRC_CONTEXT_SIZE);
        assert_eq!(snap.first().map(|c| c.id), Some(4));
        assert_eq!(snap.last().map(|c| c.id), Some((CRC_CONTEXT_SIZE + 3) as u32));
    }
}
