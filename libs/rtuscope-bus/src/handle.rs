//! Shared engine handle
//!
//! [`BusHandle`] puts the engine behind the single per-engine lock and
//! dispatches observer callbacks and completions outside of it, so a
//! completion may enqueue a follow-up request without deadlocking.
//! Observers see frames in extraction order; a transaction's completion
//! runs after the frame that satisfied it has been published.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backoff::UnitBackoffInfo;
use crate::cache::RegisterMapSummary;
use crate::engine::{BusEngine, Completion};
use crate::frame::Frame;
use crate::history::CrcErrorContext;
use crate::stats::BusCounters;

/// Callback invoked for every extracted frame with its request/response
/// classification. Must be bounded-time and must not register further
/// observers from inside the callback.
pub type FrameObserver = Box<dyn FnMut(&Frame, bool) + Send>;

struct Shared {
    engine: Mutex<BusEngine>,
    observers: Mutex<Vec<FrameObserver>>,
}

/// Cloneable capability to one bus engine.
#[derive(Clone)]
pub struct BusHandle {
    shared: Arc<Shared>,
}

impl BusHandle {
    pub fn new(engine: BusEngine) -> Self {
        Self {
            shared: Arc::new(Shared {
                engine: Mutex::new(engine),
                observers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// One cooperative scheduling step: advance the engine under its
    /// lock, then publish frames and run completions unlocked.
    pub fn tick(&self) {
        let events = self.shared.engine.lock().tick();

        if !events.observed.is_empty() {
            let mut observers = self.shared.observers.lock();
            for (frame, is_request) in &events.observed {
                for observer in observers.iter_mut() {
                    observer(frame, *is_request);
                }
            }
        }
        for (completion, success, frame) in events.completions {
            completion(success, &frame);
        }
    }

    /// Register a passive observer for all bus traffic.
    pub fn on_frame(&self, observer: FrameObserver) {
        self.shared.observers.lock().push(observer);
    }

    pub fn enqueue_read(
        &self,
        unit_id: u8,
        function_code: u8,
        start_register: u16,
        quantity: u16,
        completion: Option<Completion>,
    ) -> bool {
        self.shared
            .engine
            .lock()
            .enqueue_read(unit_id, function_code, start_register, quantity, completion)
    }

    pub fn enqueue_write_single(
        &self,
        unit_id: u8,
        address: u16,
        value: u16,
        completion: Option<Completion>,
    ) -> bool {
        self.shared
            .engine
            .lock()
            .enqueue_write_single(unit_id, address, value, completion)
    }

    pub fn enqueue_write_multiple(
        &self,
        unit_id: u8,
        start_register: u16,
        values: &[u16],
        completion: Option<Completion>,
    ) -> bool {
        self.shared
            .engine
            .lock()
            .enqueue_write_multiple(unit_id, start_register, values, completion)
    }

    pub fn enqueue_write_coil(
        &self,
        unit_id: u8,
        address: u16,
        on: bool,
        completion: Option<Completion>,
    ) -> bool {
        self.shared
            .engine
            .lock()
            .enqueue_write_coil(unit_id, address, on, completion)
    }

    pub fn enqueue_write_coils(
        &self,
        unit_id: u8,
        start_address: u16,
        states: &[bool],
        completion: Option<Completion>,
    ) -> bool {
        self.shared
            .engine
            .lock()
            .enqueue_write_coils(unit_id, start_address, states, completion)
    }

    pub fn stats(&self) -> BusCounters {
        self.shared.engine.lock().stats()
    }

    pub fn interval_stats(&self) -> BusCounters {
        self.shared.engine.lock().interval_stats()
    }

    pub fn reset_stats(&self) {
        self.shared.engine.lock().reset_stats()
    }

    pub fn unit_backoff_snapshot(&self) -> Vec<UnitBackoffInfo> {
        self.shared.engine.lock().unit_backoff_snapshot()
    }

    pub fn is_unit_paused(&self, unit_id: u8) -> bool {
        self.shared.engine.lock().is_unit_paused(unit_id)
    }

    pub fn recent_frames(&self) -> Vec<Frame> {
        self.shared.engine.lock().recent_frames()
    }

    pub fn recent_crc_contexts(&self) -> Vec<CrcErrorContext> {
        self.shared.engine.lock().recent_crc_contexts()
    }

    pub fn cached_register(&self, unit_id: u8, function_code: u8, address: u16) -> Option<u16> {
        self.shared
            .engine
            .lock()
            .cached_register(unit_id, function_code, address)
    }

    pub fn register_map_snapshot(&self) -> Vec<RegisterMapSummary> {
        self.shared.engine.lock().register_map_snapshot()
    }

    pub fn queued_request_count(&self) -> usize {
        self.shared.engine.lock().queued_request_count()
    }

    pub fn is_waiting_for_response(&self) -> bool {
        self.shared.engine.lock().is_waiting_for_response()
    }

    pub fn has_pending_work(&self) -> bool {
        self.shared.engine.lock().has_pending_work()
    }

    pub fn response_timeout_ms(&self) -> u64 {
        self.shared.engine.lock().response_timeout_ms()
    }

    pub fn suspend(&self) {
        self.shared.engine.lock().suspend()
    }

    pub fn resume(&self) {
        self.shared.engine.lock().resume()
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.engine.lock().is_suspended()
    }
}
