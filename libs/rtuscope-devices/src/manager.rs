//! Typed device manager
//!
//! Holds device schemas and per-unit instances, turns register
//! definitions into batched poll plans, schedules polls cooperatively
//! against the bus engine, converts raw words to scaled values, and
//! enriches its cache from traffic other masters generate.
//!
//! Manager state sits behind a recursive lock: completions arrive while
//! external callers (web or MQTT handlers) may already be inside a
//! manager API, and a value observer is allowed to call back into
//! manager read paths.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use rtuscope_bus::constants::{FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS};
use rtuscope_bus::{BusHandle, Clock, Frame, Timestamp};

use crate::error::{DeviceError, Result};
use crate::field::FieldType;
use crate::plan::{build_poll_batches, PollBatch};
use crate::schema::{self, DeviceType, RegisterDef};

/// Hard cap on unrecognized register values retained per device.
/// Overflow is dropped, never evicted.
pub const MAX_UNKNOWN_REGISTERS: usize = 512;

/// Observer for decoded value changes: `(unit, register name, scaled
/// value, unit string)`. Must be bounded-time and non-blocking.
pub type ValueObserver = Box<dyn FnMut(u8, &str, f64, &str) + Send>;

/// Completion for a named read: `(success, scaled value)`.
pub type ReadCompletion = Box<dyn FnOnce(bool, f64) + Send>;
/// Completion for a named write.
pub type WriteCompletion = Box<dyn FnOnce(bool) + Send>;

/// Manager tuning knobs.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Freshness window for pairing observed responses with observed
    /// requests.
    pub pairing_window_ms: u64,
    /// Hold-off between attempts for one batch, so rejected enqueues do
    /// not churn.
    pub attempt_holdoff_ms: u64,
    /// Minimum delta for a value-change notification.
    pub change_epsilon: f64,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            pairing_window_ms: 2000,
            attempt_holdoff_ms: 250,
            change_epsilon: 1e-4,
        }
    }
}

/// One decoded register value.
#[derive(Debug, Clone, Default)]
pub struct DeviceValue {
    pub value: f64,
    pub text: Option<String>,
    pub unit: String,
    pub valid: bool,
    pub updated_uptime_ms: u64,
    pub captured_epoch_secs: u32,
}

/// A mapped device on the bus.
#[derive(Debug)]
struct DeviceInstance {
    unit_id: u8,
    name: String,
    type_name: String,
    type_def: Arc<DeviceType>,
    values: BTreeMap<String, DeviceValue>,
    unknown: BTreeMap<u16, DeviceValue>,
    batches: Vec<PollBatch>,
    success_count: u32,
    error_count: u32,
}

impl DeviceInstance {
    fn from_mapping(unit_id: u8, name: &str, type_def: Arc<DeviceType>) -> Self {
        let mut values = BTreeMap::new();
        for def in &type_def.registers {
            values.insert(
                def.name.clone(),
                DeviceValue {
                    unit: def.unit.clone(),
                    ..DeviceValue::default()
                },
            );
        }
        Self {
            unit_id,
            name: name.to_string(),
            type_name: type_def.name.clone(),
            batches: build_poll_batches(&type_def.registers),
            type_def,
            values,
            unknown: BTreeMap::new(),
            success_count: 0,
            error_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ObservedRead {
    function_code: u8,
    start_register: u16,
    quantity: u16,
    seen_at_ms: u64,
}

/// Own reads awaiting completion for one (unit, function code) pair.
/// While any is outstanding, passive pairing for that pair is off: the
/// engine publishes our own response like any other frame, and a fresh
/// foreign request to the same unit and function code would otherwise
/// claim it at the wrong start address.
#[derive(Debug, Clone, Copy, Default)]
struct OwnRead {
    outstanding: u32,
    last_enqueued_ms: u64,
}

struct ValueChange {
    unit_id: u8,
    name: String,
    value: f64,
    unit: String,
}

#[derive(Default)]
struct ManagerInner {
    types: BTreeMap<String, Arc<DeviceType>>,
    devices: BTreeMap<u8, DeviceInstance>,
    recent_requests: FxHashMap<u8, ObservedRead>,
    own_reads: FxHashMap<(u8, u8), OwnRead>,
}

impl ManagerInner {
    fn note_own_read(&mut self, unit_id: u8, function_code: u8, now_ms: u64) {
        let entry = self.own_reads.entry((unit_id, function_code)).or_default();
        entry.outstanding += 1;
        entry.last_enqueued_ms = now_ms;
    }

    fn clear_own_read(&mut self, unit_id: u8, function_code: u8) {
        let key = (unit_id, function_code);
        if let Some(mut entry) = self.own_reads.remove(&key) {
            entry.outstanding = entry.outstanding.saturating_sub(1);
            if entry.outstanding > 0 {
                self.own_reads.insert(key, entry);
            }
        }
    }

    fn has_own_read(&self, unit_id: u8, function_code: u8) -> bool {
        self.own_reads.contains_key(&(unit_id, function_code))
    }
}

/// Typed device manager over one bus engine.
pub struct DeviceManager {
    bus: BusHandle,
    clock: Arc<dyn Clock>,
    opts: ManagerOptions,
    inner: ReentrantMutex<RefCell<ManagerInner>>,
    observers: Mutex<Vec<ValueObserver>>,
}

impl DeviceManager {
    /// Build a manager and subscribe it to the engine's frame stream for
    /// passive enrichment. The manager holds only an enqueue/read
    /// capability to the bus; the bus holds only a weak reference back.
    pub fn new(bus: BusHandle, clock: Arc<dyn Clock>, opts: ManagerOptions) -> Arc<Self> {
        let manager = Arc::new(Self {
            bus: bus.clone(),
            clock,
            opts,
            inner: ReentrantMutex::new(RefCell::new(ManagerInner::default())),
            observers: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&manager);
        bus.on_frame(Box::new(move |frame, is_request| {
            if let Some(manager) = weak.upgrade() {
                manager.observe_frame(frame, is_request);
            }
        }));
        manager
    }

    // ========================================================================
    // Schema loading
    // ========================================================================

    /// Load one device type document. Instances of a reloaded type get
    /// their poll plan rebuilt.
    pub fn load_type(&self, bytes: &[u8]) -> Result<String> {
        let doc = schema::parse_device_type(bytes)?;
        let name = doc.name.clone();
        let type_def = Arc::new(doc);

        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        inner.types.insert(name.clone(), type_def.clone());
        for device in inner.devices.values_mut() {
            if device.type_name == name {
                let unit_id = device.unit_id;
                let friendly = device.name.clone();
                *device = DeviceInstance::from_mapping(unit_id, &friendly, type_def.clone());
            }
        }
        info!(
            device_type = %name,
            registers = type_def.registers.len(),
            "device type loaded"
        );
        Ok(name)
    }

    /// Load a unit mapping document. Entries referencing unknown types
    /// are skipped with a warning; returns how many devices registered.
    pub fn load_mapping(&self, bytes: &[u8]) -> Result<usize> {
        let doc = schema::parse_mapping(bytes)?;
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();

        let mut registered = 0;
        for entry in &doc.devices {
            if entry.unit_id == 0 || entry.unit_id > 247 {
                warn!(unit = entry.unit_id, "mapping entry with invalid unit skipped");
                continue;
            }
            let Some(type_def) = inner.types.get(&entry.type_name).cloned() else {
                warn!(
                    unit = entry.unit_id,
                    device_type = %entry.type_name,
                    "mapping references unknown device type"
                );
                continue;
            };
            let instance = DeviceInstance::from_mapping(entry.unit_id, &entry.name, type_def);
            info!(
                unit = entry.unit_id,
                name = %entry.name,
                device_type = %entry.type_name,
                batches = instance.batches.len(),
                "device mapped"
            );
            inner.devices.insert(entry.unit_id, instance);
            registered += 1;
        }
        Ok(registered)
    }

    pub fn device_type_names(&self) -> Vec<String> {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner.types.keys().cloned().collect()
    }

    pub fn device_units(&self) -> Vec<u8> {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner.devices.keys().copied().collect()
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// One cooperative scheduling step. Never enqueues while the engine
    /// still has pending or in-flight work; otherwise picks the globally
    /// earliest-due batch across all devices.
    pub fn tick(self: &Arc<Self>) {
        let now_ms = self.clock.uptime_ms();
        let guard = self.inner.lock();

        self.sweep_outstanding(&guard, now_ms);

        if self.bus.has_pending_work() {
            return;
        }

        let selected = {
            let inner = guard.borrow();
            let mut best: Option<(u8, usize, u64)> = None;
            for (&unit_id, device) in &inner.devices {
                for (index, batch) in device.batches.iter().enumerate() {
                    if batch.poll_interval_ms == 0 {
                        continue;
                    }
                    // Still awaiting a completion (or the sweep that
                    // declares it lost): not eligible again yet.
                    if batch.outstanding_since_ms.is_some() {
                        continue;
                    }
                    if batch.last_attempt_ms != 0
                        && now_ms.saturating_sub(batch.last_attempt_ms)
                            < self.opts.attempt_holdoff_ms
                    {
                        continue;
                    }
                    let due = if batch.last_poll_ms == 0 {
                        0
                    } else {
                        batch.last_poll_ms + batch.poll_interval_ms
                    };
                    if due > now_ms {
                        continue;
                    }
                    if best.map(|(_, _, d)| due < d).unwrap_or(true) {
                        best = Some((unit_id, index, due));
                    }
                }
            }
            best
        };

        let Some((unit_id, index, _)) = selected else {
            return;
        };

        let mut inner = guard.borrow_mut();
        let inner = &mut *inner;
        let Some(device) = inner.devices.get_mut(&unit_id) else {
            return;
        };
        let batch = &mut device.batches[index];
        batch.last_attempt_ms = now_ms;
        let (fc, start, quantity) = (batch.function_code, batch.start_address, batch.quantity);

        let weak = Arc::downgrade(self);
        let queued = self.bus.enqueue_read(
            unit_id,
            fc,
            start,
            quantity,
            Some(Box::new(move |success, frame| {
                if let Some(manager) = weak.upgrade() {
                    manager.apply_completion(unit_id, fc, start, quantity, success, frame);
                }
            })),
        );
        if queued {
            let batch = &mut device.batches[index];
            batch.last_poll_ms = now_ms;
            batch.outstanding_since_ms = Some(now_ms);
            inner.note_own_read(unit_id, fc, now_ms);
            debug!(unit = unit_id, fc, start, quantity, "poll batch enqueued");
        }
    }

    /// Timeouts never reach completions, so outstanding polls are aged
    /// against the engine's response timeout here; values a lost poll
    /// covered go invalid instead of lingering stale-as-fresh.
    fn sweep_outstanding(
        &self,
        guard: &parking_lot::ReentrantMutexGuard<'_, RefCell<ManagerInner>>,
        now_ms: u64,
    ) {
        let deadline = self.bus.response_timeout_ms() + self.opts.attempt_holdoff_ms;
        let mut inner = guard.borrow_mut();
        inner
            .own_reads
            .retain(|_, own| now_ms.saturating_sub(own.last_enqueued_ms) <= deadline);
        for device in inner.devices.values_mut() {
            for index in 0..device.batches.len() {
                let Some(since) = device.batches[index].outstanding_since_ms else {
                    continue;
                };
                if now_ms.saturating_sub(since) <= deadline {
                    continue;
                }
                let batch = &mut device.batches[index];
                batch.outstanding_since_ms = None;
                let (fc, start, quantity) =
                    (batch.function_code, batch.start_address, batch.quantity);
                device.error_count += 1;
                invalidate_covered(device, fc, start, quantity);
                debug!(
                    unit = device.unit_id,
                    fc, start, quantity, "poll went unanswered, values invalidated"
                );
            }
        }
    }

    // ========================================================================
    // Completions and passive enrichment
    // ========================================================================

    fn apply_completion(
        self: &Arc<Self>,
        unit_id: u8,
        fc: u8,
        start: u16,
        quantity: u16,
        success: bool,
        frame: &Frame,
    ) {
        let now_ms = self.clock.uptime_ms();
        let epoch = self.clock.epoch_secs();
        let guard = self.inner.lock();
        let mut notices = Vec::new();
        {
            let mut inner = guard.borrow_mut();
            inner.clear_own_read(unit_id, fc);
            let Some(device) = inner.devices.get_mut(&unit_id) else {
                return;
            };
            for batch in device.batches.iter_mut() {
                if batch.function_code == fc
                    && batch.start_address == start
                    && batch.quantity == quantity
                {
                    batch.outstanding_since_ms = None;
                }
            }

            if success && frame.is_valid && !frame.is_exception {
                let words = words_from(frame, quantity);
                apply_words(
                    device,
                    fc,
                    start,
                    &words,
                    now_ms,
                    epoch,
                    self.opts.change_epsilon,
                    &mut notices,
                );
                device.success_count += 1;
            } else {
                invalidate_covered(device, fc, start, quantity);
                device.error_count += 1;
            }
        }
        self.notify(notices);
    }

    /// Passive enrichment from the engine's frame stream: pair observed
    /// FC3/FC4 responses with the most recent observed request for the
    /// unit inside the freshness window. Responses to the manager's own
    /// outstanding reads are never passively paired.
    fn observe_frame(self: &Arc<Self>, frame: &Frame, is_request: bool) {
        if !frame.is_valid {
            return;
        }
        let fc = frame.base_function();
        if fc != FC_READ_HOLDING_REGISTERS && fc != FC_READ_INPUT_REGISTERS {
            return;
        }

        let now_ms = self.clock.uptime_ms();
        let guard = self.inner.lock();
        let mut notices = Vec::new();
        {
            let mut inner = guard.borrow_mut();

            if is_request {
                if frame.payload().len() == 4 {
                    inner.recent_requests.insert(
                        frame.unit_id,
                        ObservedRead {
                            function_code: fc,
                            start_register: frame.start_register(),
                            quantity: frame.quantity(),
                            seen_at_ms: now_ms,
                        },
                    );
                }
                return;
            }
            if frame.is_exception {
                return;
            }
            // With an own read outstanding for this unit and function
            // code, the response on the wire may be ours: the completion
            // path is authoritative for it, and pairing it with a fresh
            // foreign request would decode it at that request's start
            // address instead.
            if inner.has_own_read(frame.unit_id, fc) {
                return;
            }

            let Some(request) = inner.recent_requests.get(&frame.unit_id).copied() else {
                return;
            };
            if request.function_code != fc
                || now_ms.saturating_sub(request.seen_at_ms) > self.opts.pairing_window_ms
                || frame.byte_count() != request.quantity as usize * 2
            {
                return;
            }
            let Some(device) = inner.devices.get_mut(&frame.unit_id) else {
                return;
            };
            let words = words_from(frame, request.quantity);
            apply_words(
                device,
                fc,
                request.start_register,
                &words,
                now_ms,
                self.clock.epoch_secs(),
                self.opts.change_epsilon,
                &mut notices,
            );
        }
        self.notify(notices);
    }

    fn notify(&self, notices: Vec<ValueChange>) {
        if notices.is_empty() {
            return;
        }
        let mut observers = self.observers.lock();
        for notice in &notices {
            for observer in observers.iter_mut() {
                observer(notice.unit_id, &notice.name, notice.value, &notice.unit);
            }
        }
    }

    /// Register a value-change observer. Fires once per decoded reading
    /// whose delta exceeds the change epsilon or whose previous value
    /// was invalid.
    pub fn on_value_change(&self, observer: ValueObserver) {
        self.observers.lock().push(observer);
    }

    // ========================================================================
    // Named access
    // ========================================================================

    fn lookup(&self, unit_id: u8, register: &str) -> Result<RegisterDef> {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        let device = inner
            .devices
            .get(&unit_id)
            .ok_or(DeviceError::UnknownDevice(unit_id))?;
        device
            .type_def
            .registers
            .iter()
            .find(|d| d.name == register)
            .cloned()
            .ok_or_else(|| DeviceError::UnknownRegister(register.to_string()))
    }

    /// Queue an on-demand read of one named register. The completion
    /// receives the scaled value.
    pub fn read_named(
        self: &Arc<Self>,
        unit_id: u8,
        register: &str,
        completion: Option<ReadCompletion>,
    ) -> Result<bool> {
        let def = self.lookup(unit_id, register)?;
        let (fc, start, quantity) = (def.function_code, def.address, def.length);
        let weak = Arc::downgrade(self);
        let name = register.to_string();

        let queued = self.bus.enqueue_read(
            unit_id,
            fc,
            start,
            quantity,
            Some(Box::new(move |success, frame| {
                let mut value = 0.0;
                let mut delivered = success;
                if let Some(manager) = weak.upgrade() {
                    manager.apply_completion(unit_id, fc, start, quantity, success, frame);
                    match manager.value(unit_id, &name) {
                        Some(v) => value = v,
                        None => delivered = false,
                    }
                }
                if let Some(completion) = completion {
                    completion(delivered, value);
                }
            })),
        );
        if queued {
            let guard = self.inner.lock();
            guard
                .borrow_mut()
                .note_own_read(unit_id, fc, self.clock.uptime_ms());
        }
        Ok(queued)
    }

    /// Queue a write of one named register, converting the scaled value
    /// back through `(value - offset) / factor` into raw words.
    pub fn write_named(
        self: &Arc<Self>,
        unit_id: u8,
        register: &str,
        scaled: f64,
        completion: Option<WriteCompletion>,
    ) -> Result<bool> {
        let def = self.lookup(unit_id, register)?;
        let raw = (scaled - def.offset) / def.scale;
        let words = def.data_type.encode(raw).ok_or_else(|| {
            DeviceError::config(format!("register '{register}' is not writable"))
        })?;

        let adapter: Option<rtuscope_bus::Completion> = completion.map(|completion| {
            Box::new(move |success: bool, _frame: &Frame| completion(success))
                as rtuscope_bus::Completion
        });

        let queued = if words.len() == 1 {
            self.bus
                .enqueue_write_single(unit_id, def.address, words[0], adapter)
        } else {
            self.bus
                .enqueue_write_multiple(unit_id, def.address, &words, adapter)
        };
        Ok(queued)
    }

    /// Current valid scaled value of a named register.
    pub fn value(&self, unit_id: u8, register: &str) -> Option<f64> {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        let entry = inner.devices.get(&unit_id)?.values.get(register)?;
        entry.valid.then_some(entry.value)
    }

    /// Exported snapshot of one device.
    pub fn snapshot(&self, unit_id: u8) -> Option<DeviceSnapshot> {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        let device = inner.devices.get(&unit_id)?;
        Some(DeviceSnapshot {
            unit_id,
            name: device.name.clone(),
            device_type: device.type_name.clone(),
            success_count: device.success_count,
            error_count: device.error_count,
            values: device
                .values
                .iter()
                .map(|(name, v)| ValueSnapshot {
                    name: name.clone(),
                    value: v.value,
                    text: v.text.clone(),
                    unit: v.unit.clone(),
                    valid: v.valid,
                    timestamp: Timestamp::new(v.updated_uptime_ms, v.captured_epoch_secs),
                })
                .collect(),
            unknown: device
                .unknown
                .iter()
                .map(|(&address, v)| UnknownSnapshot {
                    name: format!("U16_{address}"),
                    address,
                    value: v.value,
                    timestamp: Timestamp::new(v.updated_uptime_ms, v.captured_epoch_secs),
                })
                .collect(),
        })
    }
}

fn words_from(frame: &Frame, quantity: u16) -> Vec<u16> {
    let data = frame.register_payload();
    let count = (quantity as usize).min(data.len() / 2);
    (0..count)
        .map(|i| u16::from_be_bytes([data[i * 2], data[i * 2 + 1]]))
        .collect()
}

/// Decode every definition fully covered by `[start, start + words)`,
/// update the device's values, and collect change notifications. Words
/// no definition claims land in the bounded unknown map.
#[allow(clippy::too_many_arguments)]
fn apply_words(
    device: &mut DeviceInstance,
    fc: u8,
    start: u16,
    words: &[u16],
    now_ms: u64,
    epoch_secs: u32,
    epsilon: f64,
    notices: &mut Vec<ValueChange>,
) {
    let span_start = u32::from(start);
    let span_end = span_start + words.len() as u32;
    let mut covered = vec![false; words.len()];

    let type_def = device.type_def.clone();
    for def in &type_def.registers {
        if def.function_code != fc {
            continue;
        }
        let def_start = u32::from(def.address);
        let def_end = def_start + u32::from(def.length);
        if def_start < span_start || def_end > span_end {
            continue;
        }
        let offset = (def_start - span_start) as usize;
        let slice = &words[offset..offset + def.length as usize];
        for flag in &mut covered[offset..offset + def.length as usize] {
            *flag = true;
        }

        let Some(entry) = device.values.get_mut(&def.name) else {
            continue;
        };
        if def.data_type == FieldType::String {
            entry.text = Some(FieldType::decode_string(slice));
            entry.valid = true;
            entry.updated_uptime_ms = now_ms;
            entry.captured_epoch_secs = epoch_secs;
            continue;
        }
        let Some(raw) = def.data_type.decode(slice) else {
            continue;
        };
        let scaled = raw * def.scale + def.offset;
        let fire = !entry.valid || (scaled - entry.value).abs() > epsilon;
        entry.value = scaled;
        entry.text = None;
        entry.valid = true;
        entry.updated_uptime_ms = now_ms;
        entry.captured_epoch_secs = epoch_secs;
        if fire {
            notices.push(ValueChange {
                unit_id: device.unit_id,
                name: def.name.clone(),
                value: scaled,
                unit: def.unit.clone(),
            });
        }
    }

    for (index, claimed) in covered.iter().enumerate() {
        if *claimed {
            continue;
        }
        let address = start.wrapping_add(index as u16);
        if device.unknown.len() >= MAX_UNKNOWN_REGISTERS && !device.unknown.contains_key(&address)
        {
            continue;
        }
        device.unknown.insert(
            address,
            DeviceValue {
                value: f64::from(words[index]),
                valid: true,
                updated_uptime_ms: now_ms,
                captured_epoch_secs: epoch_secs,
                ..DeviceValue::default()
            },
        );
    }
}

fn invalidate_covered(device: &mut DeviceInstance, fc: u8, start: u16, quantity: u16) {
    let span_start = u32::from(start);
    let span_end = span_start + u32::from(quantity);
    let type_def = device.type_def.clone();
    for def in &type_def.registers {
        if def.function_code != fc {
            continue;
        }
        let def_start = u32::from(def.address);
        let def_end = def_start + u32::from(def.length);
        if def_start >= span_start && def_end <= span_end {
            if let Some(entry) = device.values.get_mut(&def.name) {
                entry.valid = false;
            }
        }
    }
}

/// Exported device state with `{uptimeMs, epoch?, iso?}` timestamps.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub unit_id: u8,
    pub name: String,
    pub device_type: String,
    pub success_count: u32,
    pub error_count: u32,
    pub values: Vec<ValueSnapshot>,
    pub unknown: Vec<UnknownSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueSnapshot {
    pub name: String,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub unit: String,
    pub valid: bool,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnknownSnapshot {
    pub name: String,
    pub address: u16,
    pub value: f64,
    pub timestamp: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_device_type;

    fn probe_instance() -> DeviceInstance {
        let doc = parse_device_type(
            br#"{"name": "Probe", "registers": [
                {"name": "temp", "address": 0, "functionCode": 3,
                 "dataType": "int16", "factor": 0.5, "offset": -10}]}"#,
        )
        .expect("probe type parses");
        DeviceInstance::from_mapping(1, "probe", Arc::new(doc))
    }

    #[test]
    fn test_apply_words_scales_and_offsets() {
        let mut device = probe_instance();
        let mut notices = Vec::new();
        apply_words(&mut device, 3, 0, &[50], 100, 0, 1e-4, &mut notices);

        let temp = device.values.get("temp").expect("temp present");
        assert!(temp.valid);
        // 50 * 0.5 - 10
        assert_eq!(temp.value, 15.0);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].name, "temp");
    }

    #[test]
    fn test_apply_words_repeat_suppressed_below_epsilon() {
        let mut device = probe_instance();
        let mut notices = Vec::new();
        apply_words(&mut device, 3, 0, &[50], 100, 0, 1e-4, &mut notices);
        apply_words(&mut device, 3, 0, &[50], 200, 0, 1e-4, &mut notices);
        assert_eq!(notices.len(), 1);

        apply_words(&mut device, 3, 0, &[51], 300, 0, 1e-4, &mut notices);
        assert_eq!(notices.len(), 2);
    }

    #[test]
    fn test_partially_covered_definition_skipped() {
        let doc = parse_device_type(
            br#"{"name": "T", "registers": [
                {"name": "wide", "address": 4, "length": 2, "functionCode": 3,
                 "dataType": "float32_be"}]}"#,
        )
        .expect("type parses");
        let mut device = DeviceInstance::from_mapping(1, "t", Arc::new(doc));
        let mut notices = Vec::new();
        // Span [4, 5): covers only the first half of the definition
        apply_words(&mut device, 3, 4, &[0x41C8], 100, 0, 1e-4, &mut notices);
        assert!(!device.values.get("wide").expect("wide present").valid);
        assert!(notices.is_empty());
        // The half-covered word is not claimed, so it lands in unknowns
        assert_eq!(device.unknown.len(), 1);
    }

    #[test]
    fn test_unknown_cap_drops_overflow_without_eviction() {
        let mut device = probe_instance();
        let mut notices = Vec::new();
        // Five 125-word spans; address 0 is claimed by `temp`, the rest
        // feed the unknown map far past its cap
        for start in [0u16, 125, 250, 375, 500] {
            let words = vec![7u16; 125];
            apply_words(&mut device, 3, start, &words, 100, 0, 1e-4, &mut notices);
        }
        assert_eq!(device.unknown.len(), MAX_UNKNOWN_REGISTERS);
        // Lowest addresses survived: drop-on-overflow, not eviction
        assert!(device.unknown.contains_key(&1));
        assert!(!device.unknown.contains_key(&624));

        // Updating an address already tracked is always allowed
        apply_words(&mut device, 3, 1, &[9], 200, 0, 1e-4, &mut notices);
        assert_eq!(device.unknown.len(), MAX_UNKNOWN_REGISTERS);
        assert_eq!(device.unknown.get(&1).map(|v| v.value), Some(9.0));
    }

    #[test]
    fn test_invalidate_covered_respects_span() {
        let mut device = probe_instance();
        let mut notices = Vec::new();
        apply_words(&mut device, 3, 0, &[50], 100, 0, 1e-4, &mut notices);
        assert!(device.values.get("temp").expect("temp").valid);

        // A failed read elsewhere leaves it alone
        invalidate_covered(&mut device, 3, 10, 5);
        assert!(device.values.get("temp").expect("temp").valid);

        // A failed read covering it marks it invalid
        invalidate_covered(&mut device, 3, 0, 2);
        assert!(!device.values.get("temp").expect("temp").valid);
    }
}
