//! Test doubles: a settable clock and a scripted serial link
//!
//! Used by unit tests here and by downstream crates to drive the engine
//! deterministically without hardware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::error::Result;
use crate::link::SerialLink;

/// Manually driven clock.
///
/// `auto_step_us` advances time a little on every query so busy-wait
/// loops (DE settle, TX arbitration) make progress in tests.
pub struct ManualClock {
    uptime_us: AtomicU64,
    epoch_secs: AtomicU32,
    auto_step_us: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            uptime_us: AtomicU64::new(0),
            epoch_secs: AtomicU32::new(0),
            auto_step_us: AtomicU64::new(0),
        })
    }

    pub fn advance_us(&self, us: u64) {
        self.uptime_us.fetch_add(us, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance_us(ms * 1000);
    }

    pub fn set_epoch_secs(&self, secs: u32) {
        self.epoch_secs.store(secs, Ordering::SeqCst);
    }

    pub fn set_auto_step_us(&self, step: u64) {
        self.auto_step_us.store(step, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn uptime_us(&self) -> u64 {
        let step = self.auto_step_us.load(Ordering::SeqCst);
        if step > 0 {
            self.uptime_us.fetch_add(step, Ordering::SeqCst) + step
        } else {
            self.uptime_us.load(Ordering::SeqCst)
        }
    }

    fn epoch_secs(&self) -> u32 {
        self.epoch_secs.load(Ordering::SeqCst)
    }

    fn delay_us(&self, us: u64) {
        self.advance_us(us);
    }
}

struct ScriptedInner {
    /// Bytes scheduled for delivery: (due uptime us, byte), due-ordered.
    inbox: VecDeque<(u64, u8)>,
    /// Every `write_bytes` call, in order.
    tx: Vec<Vec<u8>>,
    /// DE transitions with their uptime.
    de_trace: Vec<(u64, bool)>,
    /// Scripted slave: maps a transmitted frame to (delay us, reply bytes).
    responder: Option<Box<dyn FnMut(&[u8]) -> Option<(u64, Vec<u8>)> + Send>>,
    /// Spacing applied between consecutive reply bytes.
    byte_spacing_us: u64,
    /// Echo everything we transmit back onto RX after this delay.
    echo_delay_us: Option<u64>,
}

/// Serial link with scripted RX delivery times and captured TX.
#[derive(Clone)]
pub struct ScriptedLink {
    clock: Arc<ManualClock>,
    inner: Arc<Mutex<ScriptedInner>>,
}

impl ScriptedLink {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            inner: Arc::new(Mutex::new(ScriptedInner {
                inbox: VecDeque::new(),
                tx: Vec::new(),
                de_trace: Vec::new(),
                responder: None,
                byte_spacing_us: 0,
                echo_delay_us: None,
            })),
        }
    }

    /// Schedule `bytes` to appear on RX starting at `at_us`, spaced by
    /// `spacing_us` per byte.
    pub fn feed_at(&self, at_us: u64, bytes: &[u8], spacing_us: u64) {
        let mut inner = self.inner.lock();
        for (i, &b) in bytes.iter().enumerate() {
            inner.inbox.push_back((at_us + i as u64 * spacing_us, b));
        }
        inner
            .inbox
            .make_contiguous()
            .sort_by_key(|(due, _)| *due);
    }

    /// Install a scripted slave: called with each transmitted frame,
    /// returns the reply and how long the slave takes to start it.
    pub fn set_responder(
        &self,
        byte_spacing_us: u64,
        responder: impl FnMut(&[u8]) -> Option<(u64, Vec<u8>)> + Send + 'static,
    ) {
        let mut inner = self.inner.lock();
        inner.byte_spacing_us = byte_spacing_us;
        inner.responder = Some(Box::new(responder));
    }

    /// Reflect every transmitted frame back onto RX, like a transceiver
    /// with its receiver enabled during TX.
    pub fn set_echo(&self, delay_us: u64) {
        self.inner.lock().echo_delay_us = Some(delay_us);
    }

    /// Frames transmitted so far.
    pub fn transmitted(&self) -> Vec<Vec<u8>> {
        self.inner.lock().tx.clone()
    }

    pub fn transmitted_count(&self) -> usize {
        self.inner.lock().tx.len()
    }

    pub fn de_trace(&self) -> Vec<(u64, bool)> {
        self.inner.lock().de_trace.clone()
    }

    /// Bytes still waiting for delivery.
    pub fn undelivered(&self) -> usize {
        self.inner.lock().inbox.len()
    }
}

impl SerialLink for ScriptedLink {
    fn available(&mut self) -> usize {
        let now = self.clock.uptime_us();
        self.inner
            .lock()
            .inbox
            .iter()
            .take_while(|(due, _)| *due <= now)
            .count()
    }

    fn read_byte(&mut self) -> Option<u8> {
        let now = self.clock.uptime_us();
        let mut inner = self.inner.lock();
        match inner.inbox.front() {
            Some(&(due, byte)) if due <= now => {
                inner.inbox.pop_front();
                Some(byte)
            }
            _ => None,
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let now = self.clock.uptime_us();
        let mut inner = self.inner.lock();
        inner.tx.push(bytes.to_vec());

        let mut scheduled = Vec::new();
        if let Some(delay) = inner.echo_delay_us {
            for (i, &b) in bytes.iter().enumerate() {
                scheduled.push((now + delay + i as u64, b));
            }
        }
        if let Some(responder) = inner.responder.as_mut() {
            if let Some((delay, reply)) = responder(bytes) {
                let spacing = inner.byte_spacing_us;
                for (i, &b) in reply.iter().enumerate() {
                    scheduled.push((now + delay + i as u64 * spacing, b));
                }
            }
        }
        for entry in scheduled {
            inner.inbox.push_back(entry);
        }
        inner
            .inbox
            .make_contiguous()
            .sort_by_key(|(due, _)| *due);
        Ok(())
    }

    fn flush_tx(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_drive_enable(&mut self, enable: bool) {
        let now = self.clock.uptime_us();
        self.inner.lock().de_trace.push((now, enable));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        assert_eq!(clock.uptime_us(), 0);
        clock.advance_ms(2);
        assert_eq!(clock.uptime_us(), 2000);
        assert_eq!(clock.uptime_ms(), 2);
    }

    #[test]
    fn test_manual_clock_auto_step() {
        let clock = ManualClock::new();
        clock.set_auto_step_us(10);
        let a = clock.uptime_us();
        let b = clock.uptime_us();
        assert!(b > a);
    }

    #[test]
    fn test_scripted_link_delivers_on_time() {
        let clock = ManualClock::new();
        let mut link = ScriptedLink::new(clock.clone());
        link.feed_at(1000, &[0xAA, 0xBB], 100);

        assert_eq!(link.available(), 0);
        assert_eq!(link.read_byte(), None);

        clock.advance_us(1000);
        assert_eq!(link.available(), 1);
        assert_eq!(link.read_byte(), Some(0xAA));

        clock.advance_us(100);
        assert_eq!(link.read_byte(), Some(0xBB));
        assert_eq!(link.undelivered(), 0);
    }

    #[test]
    fn test_scripted_responder_replies_to_tx() {
        let clock = ManualClock::new();
        let mut link = ScriptedLink::new(clock.clone());
        link.set_responder(10, |frame| {
            assert_eq!(frame[0], 0x01);
            Some((500, vec![0x01, 0x03]))
        });

        link.write_bytes(&[0x01, 0x03, 0x00]).expect("write ok");
        assert_eq!(link.transmitted_count(), 1);

        clock.advance_us(499);
        assert_eq!(link.available(), 0);
        clock.advance_us(1);
        assert_eq!(link.read_byte(), Some(0x01));
    }

    #[test]
    fn test_scripted_echo() {
        let clock = ManualClock::new();
        let mut link = ScriptedLink::new(clock.clone());
        link.set_echo(5);
        link.write_bytes(&[0x42]).expect("write ok");
        clock.advance_us(10);
        assert_eq!(link.read_byte(), Some(0x42));
    }
}
