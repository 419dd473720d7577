//! The RTU bus engine
//!
//! Drives the wire as a master while observing every other master on the
//! same half-duplex segment. One cooperative [`BusEngine::tick`] advances
//! everything: RX draining with per-byte timestamps, frame extraction at
//! inter-character and inter-frame boundaries, response matching against
//! the single in-flight request, timeouts with per-unit back-off, and TX
//! arbitration that never cuts into another master's frame.
//!
//! Completions are invoked only for received frames, never on timeout;
//! they must be bounded-time and non-blocking.

use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::backoff::{BackoffTable, UnitBackoffInfo};
use crate::cache::{RegisterCache, RegisterMapSummary};
use crate::clock::Clock;
use crate::codec;
use crate::constants::*;
use crate::error::{BusError, Result};
use crate::extract::{self, ExtractContext, InflightInfo, RecentRequest};
use crate::frame::Frame;
use crate::history::{CrcContextRing, CrcErrorContext, FrameHistory};
use crate::link::{LinkTiming, SerialLink, SerialSettings};
use crate::stats::{BusCounters, BusStats, WarnThresholds};

/// Polling step inside the bounded arbitration loop.
const ARBITRATION_POLL_US: u64 = 50;

/// One-shot continuation for a queued request. Called exactly once, with
/// the received frame; never called on timeout.
pub type Completion = Box<dyn FnOnce(bool, &Frame) + Send>;

/// Engine configuration. Field defaults follow the protocol and the
/// values the original deployment shipped with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub serial: SerialSettings,
    #[serde(default = "default_queue_capacity")]
    pub max_queue: usize,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Freshness window for pairing responses with observed requests.
    #[serde(default = "default_pairing_window_ms")]
    pub pairing_window_ms: u64,
    #[serde(default = "default_arbitration_budget_us")]
    pub arbitration_budget_us: u64,
    #[serde(default = "default_de_settle_us")]
    pub de_settle_us: u64,
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,
    #[serde(default)]
    pub warn_thresholds: WarnThresholds,
    /// Observe only; the queue accepts requests but nothing is sent.
    #[serde(default)]
    pub listen_only: bool,
    /// Reject enqueues when the heap probe reports less free memory than
    /// this. 0 disables the check.
    #[serde(default)]
    pub min_free_heap_bytes: usize,
    #[serde(skip)]
    pub heap_probe: Option<fn() -> usize>,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}
fn default_response_timeout_ms() -> u64 {
    DEFAULT_RESPONSE_TIMEOUT_MS
}
fn default_pairing_window_ms() -> u64 {
    DEFAULT_PAIRING_WINDOW_MS
}
fn default_arbitration_budget_us() -> u64 {
    DEFAULT_ARBITRATION_BUDGET_US
}
fn default_de_settle_us() -> u64 {
    DE_SETTLE_US
}
fn default_stats_interval_ms() -> u64 {
    DEFAULT_STATS_INTERVAL_MS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            serial: SerialSettings::default(),
            max_queue: default_queue_capacity(),
            response_timeout_ms: default_response_timeout_ms(),
            pairing_window_ms: default_pairing_window_ms(),
            arbitration_budget_us: default_arbitration_budget_us(),
            de_settle_us: default_de_settle_us(),
            stats_interval_ms: default_stats_interval_ms(),
            warn_thresholds: WarnThresholds::default(),
            listen_only: false,
            min_free_heap_bytes: 0,
            heap_probe: None,
        }
    }
}

/// A queued command awaiting its turn on the wire.
pub struct PendingRequest {
    pub unit_id: u8,
    pub function_code: u8,
    pub start_register: u16,
    pub quantity: u16,
    pub write_data: Vec<u16>,
    pub completion: Option<Completion>,
    pub queued_at_ms: u64,
    pub retries: u8,
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("unit_id", &self.unit_id)
            .field("function_code", &format_args!("0x{:02X}", self.function_code))
            .field("start_register", &self.start_register)
            .field("quantity", &self.quantity)
            .field("has_completion", &self.completion.is_some())
            .finish()
    }
}

struct Inflight {
    req: PendingRequest,
    sent_at_ms: u64,
}

/// Deferred effects collected during a tick while the engine lock is
/// held; the caller dispatches them after releasing it.
#[derive(Default)]
pub struct TickEvents {
    pub observed: Vec<(Frame, bool)>,
    pub completions: Vec<(Completion, bool, Frame)>,
}

/// Single-master, many-observer RTU bus engine.
pub struct BusEngine {
    cfg: EngineConfig,
    timing: LinkTiming,
    link: Box<dyn SerialLink>,
    clock: Arc<dyn Clock>,

    rx_buf: Vec<u8>,
    last_byte_us: u64,
    rx_empty_since_us: u64,
    rx_was_empty: bool,
    last_activity_ms: u64,
    bus_silent: bool,
    suspended: bool,

    queue: VecDeque<PendingRequest>,
    inflight: Option<Inflight>,
    last_seen_requests: FxHashMap<u8, RecentRequest>,

    cache: RegisterCache,
    backoff: BackoffTable,
    stats: BusStats,
    history: FrameHistory,
    crc_contexts: CrcContextRing,
    last_timeout_warn_ms: FxHashMap<u8, u64>,
}

impl BusEngine {
    /// Build an engine over a link. Fails fatally when the CRC
    /// known-answer self-test does not pass.
    pub fn new(
        link: Box<dyn SerialLink>,
        clock: Arc<dyn Clock>,
        cfg: EngineConfig,
    ) -> Result<Self> {
        if !codec::crc16_selftest() {
            return Err(BusError::fatal("CRC16 self-test failed"));
        }

        let timing = LinkTiming::from_settings(&cfg.serial);
        let now_us = clock.uptime_us();
        info!(
            baud = cfg.serial.baud,
            char_us = timing.char_time_us,
            silence_us = timing.silence_us,
            "bus engine initialized"
        );

        Ok(Self {
            stats: BusStats::new(cfg.warn_thresholds, cfg.stats_interval_ms),
            timing,
            link,
            clock,
            rx_buf: Vec::with_capacity(RX_BUFFER_CAPACITY),
            last_byte_us: now_us,
            rx_empty_since_us: now_us,
            rx_was_empty: true,
            last_activity_ms: now_us / 1000,
            bus_silent: true,
            suspended: false,
            queue: VecDeque::with_capacity(cfg.max_queue),
            inflight: None,
            last_seen_requests: FxHashMap::default(),
            cache: RegisterCache::new(),
            backoff: BackoffTable::new(),
            history: FrameHistory::new(),
            crc_contexts: CrcContextRing::new(),
            last_timeout_warn_ms: FxHashMap::default(),
            cfg,
        })
    }

    // ========================================================================
    // Queue API
    // ========================================================================

    /// Queue a read (FC01-04). Returns false when the request was
    /// rejected (queue full, memory low, invalid parameters). A paused
    /// unit does not reject here; the pause gate applies on send, so a
    /// caller can always arm a probe.
    pub fn enqueue_read(
        &mut self,
        unit_id: u8,
        function_code: u8,
        start_register: u16,
        quantity: u16,
        completion: Option<Completion>,
    ) -> bool {
        if !matches!(
            function_code,
            FC_READ_COILS
                | FC_READ_DISCRETE_INPUTS
                | FC_READ_HOLDING_REGISTERS
                | FC_READ_INPUT_REGISTERS
        ) {
            return false;
        }
        self.enqueue(PendingRequest {
            unit_id,
            function_code,
            start_register,
            quantity,
            write_data: Vec::new(),
            completion,
            queued_at_ms: self.clock.uptime_ms(),
            retries: 0,
        })
    }

    /// Queue a write of one holding register (FC06).
    pub fn enqueue_write_single(
        &mut self,
        unit_id: u8,
        address: u16,
        value: u16,
        completion: Option<Completion>,
    ) -> bool {
        self.enqueue(PendingRequest {
            unit_id,
            function_code: FC_WRITE_SINGLE_REGISTER,
            start_register: address,
            quantity: 1,
            write_data: vec![value],
            completion,
            queued_at_ms: self.clock.uptime_ms(),
            retries: 0,
        })
    }

    /// Queue a write of consecutive holding registers (FC10).
    pub fn enqueue_write_multiple(
        &mut self,
        unit_id: u8,
        start_register: u16,
        values: &[u16],
        completion: Option<Completion>,
    ) -> bool {
        self.enqueue(PendingRequest {
            unit_id,
            function_code: FC_WRITE_MULTIPLE_REGISTERS,
            start_register,
            quantity: values.len() as u16,
            write_data: values.to_vec(),
            completion,
            queued_at_ms: self.clock.uptime_ms(),
            retries: 0,
        })
    }

    /// Queue a single coil write (FC05).
    pub fn enqueue_write_coil(
        &mut self,
        unit_id: u8,
        address: u16,
        on: bool,
        completion: Option<Completion>,
    ) -> bool {
        self.enqueue(PendingRequest {
            unit_id,
            function_code: FC_WRITE_SINGLE_COIL,
            start_register: address,
            quantity: 1,
            write_data: vec![u16::from(on)],
            completion,
            queued_at_ms: self.clock.uptime_ms(),
            retries: 0,
        })
    }

    /// Queue a multi-coil write (FC0F).
    pub fn enqueue_write_coils(
        &mut self,
        unit_id: u8,
        start_address: u16,
        states: &[bool],
        completion: Option<Completion>,
    ) -> bool {
        self.enqueue(PendingRequest {
            unit_id,
            function_code: FC_WRITE_MULTIPLE_COILS,
            start_register: start_address,
            quantity: states.len() as u16,
            write_data: states.iter().map(|&s| u16::from(s)).collect(),
            completion,
            queued_at_ms: self.clock.uptime_ms(),
            retries: 0,
        })
    }

    fn enqueue(&mut self, req: PendingRequest) -> bool {
        if req.unit_id == 0 || req.unit_id > MAX_UNIT_ID {
            self.stats.note_own_discarded(1);
            return false;
        }
        if self.queue.len() >= self.cfg.max_queue {
            self.stats.note_queue_overflow();
            self.stats.note_own_discarded(1);
            warn!(
                unit = req.unit_id,
                fc = req.function_code,
                queued = self.queue.len(),
                "request discarded: queue full"
            );
            return false;
        }
        if self.cfg.min_free_heap_bytes > 0 {
            if let Some(probe) = self.cfg.heap_probe {
                if probe() < self.cfg.min_free_heap_bytes {
                    self.stats.note_own_discarded(1);
                    warn!(unit = req.unit_id, "request discarded: memory low");
                    return false;
                }
            }
        }
        self.queue.push_back(req);
        true
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Advance the engine. Returns the frames to publish to observers and
    /// the completions to run, in order; the caller dispatches both after
    /// dropping the engine lock.
    pub fn tick(&mut self) -> TickEvents {
        let mut ev = TickEvents::default();
        let now_us = self.clock.uptime_us();
        self.stats.sample_total_time(now_us);

        if self.suspended {
            while self.link.read_byte().is_some() {}
            self.rx_buf.clear();
            return ev;
        }

        self.drain_rx(&mut ev);

        let now_us = self.clock.uptime_us();
        if !self.rx_buf.is_empty()
            && now_us.saturating_sub(self.last_byte_us) > self.timing.silence_us as u64
        {
            self.flush_rx(&mut ev);
        }

        let now_ms = self.clock.uptime_ms();
        self.update_bus_silence(now_ms);
        self.check_timeout(now_ms);
        self.stats.check_interval(now_ms);

        if self.inflight.is_none() {
            self.process_queue(&mut ev);
        }
        ev
    }

    /// Read everything the UART has buffered, timestamping each byte and
    /// flushing accumulated frames whenever an inter-character gap shows
    /// the previous frame ended.
    fn drain_rx(&mut self, ev: &mut TickEvents) {
        loop {
            if self.link.available() == 0 {
                if !self.rx_was_empty {
                    self.rx_was_empty = true;
                    self.rx_empty_since_us = self.clock.uptime_us();
                }
                break;
            }
            self.rx_was_empty = false;

            let Some(byte) = self.link.read_byte() else {
                break;
            };
            let now_us = self.clock.uptime_us();

            if !self.rx_buf.is_empty()
                && now_us.saturating_sub(self.last_byte_us) > self.timing.inter_char_us as u64
            {
                self.flush_rx(ev);
            }
            if self.rx_buf.len() >= RX_BUFFER_CAPACITY {
                self.flush_rx(ev);
            }

            self.rx_buf.push(byte);
            self.last_byte_us = now_us;
            self.rx_empty_since_us = now_us;
            self.last_activity_ms = now_us / 1000;
            self.bus_silent = false;

            if self.inflight.is_none() {
                self.stats.start_active(false, now_us);
            }
        }
    }

    /// Run the extractor over the accumulated RX bytes and process every
    /// frame it yields. Noise counts as one CRC error per invocation.
    fn flush_rx(&mut self, ev: &mut TickEvents) {
        if self.rx_buf.is_empty() {
            return;
        }
        let now_ms = self.clock.uptime_ms();
        let ctx = ExtractContext {
            inflight: self.inflight.as_ref().map(|inf| InflightInfo {
                unit_id: inf.req.unit_id,
                function_code: inf.req.function_code,
                quantity: inf.req.quantity,
            }),
            recent_requests: &self.last_seen_requests,
            now_ms,
            pairing_window_ms: self.cfg.pairing_window_ms,
        };
        let outcome = extract::extract_frames(&self.rx_buf, &ctx);
        self.rx_buf.clear();

        if outcome.noise {
            self.stats.note_crc_error();
        }
        if let Some(mut bad) = outcome.first_invalid {
            self.stamp(&mut bad);
            trace!(unit = bad.unit_id, "CRC error candidate captured");
            let before = self.history.last().cloned();
            self.history.push(bad.clone());
            self.crc_contexts.record_bad(bad, before);
        }

        for mut frame in outcome.frames {
            self.stamp(&mut frame);
            self.process_frame(frame, ev);
        }
    }

    fn stamp(&self, frame: &mut Frame) {
        frame.capture_uptime_us = self.clock.uptime_us();
        frame.capture_epoch_secs = self.clock.epoch_secs();
    }

    fn process_frame(&mut self, frame: Frame, ev: &mut TickEvents) {
        self.stats.note_frame_received();
        self.history.push(frame.clone());
        self.crc_contexts.note_frame(&frame);

        // Our own TX reflected back by the transceiver: drop it before it
        // pollutes foreign-traffic accounting.
        if self.is_own_echo(&frame) {
            trace!(unit = frame.unit_id, "own TX echo discarded");
            return;
        }

        if self.try_consume_inflight(&frame, ev) {
            ev.observed.push((frame, false));
            return;
        }

        self.observe_foreign(&frame);
        let is_request = frame.is_request;
        ev.observed.push((frame, is_request));
    }

    fn is_own_echo(&self, frame: &Frame) -> bool {
        let Some(inf) = &self.inflight else {
            return false;
        };
        frame.is_valid
            && frame.is_request
            && frame.unit_id == inf.req.unit_id
            && frame.base_function() == inf.req.function_code
            && frame.start_register() == inf.req.start_register
            && frame.quantity() == inf.req.quantity
    }

    /// Matching rules for the single in-flight request: CRC-valid,
    /// classified non-request, same unit, same or exception-of-same
    /// function code, and for reads a byte count equal to what was asked.
    fn try_consume_inflight(&mut self, frame: &Frame, ev: &mut TickEvents) -> bool {
        let Some(inf) = &self.inflight else {
            return false;
        };
        let req = &inf.req;

        if !frame.is_valid
            || frame.is_request
            || frame.unit_id != req.unit_id
            || frame.base_function() != req.function_code
        {
            return false;
        }
        if !frame.is_exception && is_read_function(req.function_code) {
            let expected = match req.function_code {
                FC_READ_COILS | FC_READ_DISCRETE_INPUTS => req.quantity.div_ceil(8) as usize,
                _ => req.quantity as usize * 2,
            };
            if frame.byte_count() != expected {
                return false;
            }
        }

        let Some(inf) = self.inflight.take() else {
            return false;
        };
        let req = inf.req;
        let now_ms = self.clock.uptime_ms();
        let now_us = self.clock.uptime_us();

        self.backoff.record_valid_response(frame.unit_id);

        let success = !frame.is_exception;
        if success {
            self.stats.note_own_success();
            if is_read_function(req.function_code) {
                self.cache.apply_read_response(
                    req.unit_id,
                    req.function_code,
                    req.start_register,
                    req.quantity,
                    frame.register_payload(),
                    now_ms,
                );
            }
        } else {
            self.stats.note_own_failed();
            self.cache.note_error(req.unit_id, req.function_code);
            warn!(
                unit = frame.unit_id,
                fc = req.function_code,
                code = frame.exception_code,
                "exception response"
            );
        }

        if let Some(completion) = req.completion {
            ev.completions.push((completion, success, frame.clone()));
        }
        self.stats.end_active(now_us);
        true
    }

    /// Frames not matching the in-flight request are observer traffic.
    fn observe_foreign(&mut self, frame: &Frame) {
        if !frame.is_valid {
            return;
        }
        let now_ms = self.clock.uptime_ms();
        let now_us = self.clock.uptime_us();
        let fc = frame.base_function();

        if frame.is_request {
            self.stats.note_other_request();
            if is_read_function(fc) && frame.payload().len() == 4 {
                self.last_seen_requests.insert(
                    frame.unit_id,
                    RecentRequest {
                        function_code: fc,
                        start_register: frame.start_register(),
                        quantity: frame.quantity(),
                        seen_at_ms: now_ms,
                    },
                );
                self.cache.note_request(frame.unit_id, fc);
            }
            self.stats.start_active(false, now_us);
            return;
        }

        let paired_request = self.fresh_request_for(frame.unit_id, fc, now_ms);
        if frame.is_exception {
            self.stats.note_other_exception(paired_request.is_some());
            if paired_request.is_some() {
                self.cache.note_error(frame.unit_id, fc);
            }
            return;
        }

        if is_read_function(fc) {
            if let Some(req) = paired_request {
                self.cache.apply_read_response(
                    frame.unit_id,
                    fc,
                    req.start_register,
                    req.quantity,
                    frame.register_payload(),
                    now_ms,
                );
                self.stats.note_other_response(true);
            } else {
                self.stats.note_other_response(false);
            }
        } else {
            self.stats.note_other_response(paired_request.is_some());
        }
    }

    fn fresh_request_for(&self, unit_id: u8, fc: u8, now_ms: u64) -> Option<RecentRequest> {
        let req = self.last_seen_requests.get(&unit_id)?;
        (req.function_code == fc
            && now_ms.saturating_sub(req.seen_at_ms) <= self.cfg.pairing_window_ms)
            .then(|| *req)
    }

    fn update_bus_silence(&mut self, now_ms: u64) {
        let silence_ms = self.timing.silence_us as u64 / 1000 + 1;
        if !self.bus_silent && now_ms.saturating_sub(self.last_activity_ms) > silence_ms {
            self.bus_silent = true;
            if self.inflight.is_none() {
                self.stats.end_active(self.clock.uptime_us());
            }
        }
    }

    /// Timeout sequence: counters, throttled warning, back-off bump,
    /// in-flight release. The completion is dropped unsent; completions
    /// are reserved for received frames. When the queue has backed up
    /// past half capacity, queued requests to the dead unit are purged so
    /// healthy units are never starved.
    fn check_timeout(&mut self, now_ms: u64) {
        let timed_out = self
            .inflight
            .as_ref()
            .map(|inf| now_ms.saturating_sub(inf.sent_at_ms) > self.cfg.response_timeout_ms)
            .unwrap_or(false);
        if !timed_out {
            return;
        }
        let Some(inf) = self.inflight.take() else {
            return;
        };
        let unit = inf.req.unit_id;

        self.stats.note_timeout();
        self.stats.note_own_failed();

        let last_warn = self.last_timeout_warn_ms.get(&unit).copied().unwrap_or(0);
        if now_ms.saturating_sub(last_warn) >= TIMEOUT_WARN_THROTTLE_MS || last_warn == 0 {
            warn!(
                unit,
                fc = inf.req.function_code,
                timeout_ms = self.cfg.response_timeout_ms,
                "response timeout"
            );
            self.last_timeout_warn_ms.insert(unit, now_ms);
        }

        if let Some(paused_until) = self.backoff.record_timeout(unit, now_ms) {
            debug!(unit, paused_until, "unit paused after repeated timeouts");
        }

        if self.queue.len() > self.cfg.max_queue / 2 {
            let before = self.queue.len();
            self.queue.retain(|r| r.unit_id != unit);
            let dropped = (before - self.queue.len()) as u32;
            if dropped > 0 {
                self.stats.note_own_discarded(dropped);
                debug!(unit, dropped, "purged queued requests for timed-out unit");
            }
        }

        self.stats.end_active(self.clock.uptime_us());
    }

    /// Pick the first queued request whose unit is not paused and put it
    /// on the wire, if arbitration finds the required silence.
    fn process_queue(&mut self, ev: &mut TickEvents) {
        if self.queue.is_empty() || self.cfg.listen_only {
            return;
        }
        let now_ms = self.clock.uptime_ms();
        let Some(idx) = self
            .queue
            .iter()
            .position(|r| !self.backoff.is_paused(r.unit_id, now_ms))
        else {
            return;
        };

        if !self.wait_for_silence(ev) {
            return;
        }

        let Some(mut req) = self.queue.remove(idx) else {
            return;
        };
        let wire = match codec::encode_request(&req) {
            Ok(wire) => wire,
            Err(err) => {
                warn!(unit = req.unit_id, %err, "request failed to encode");
                req.completion = None;
                self.stats.note_own_discarded(1);
                return;
            }
        };

        let is_write = matches!(
            req.function_code,
            FC_WRITE_SINGLE_COIL
                | FC_WRITE_SINGLE_REGISTER
                | FC_WRITE_MULTIPLE_COILS
                | FC_WRITE_MULTIPLE_REGISTERS
        );
        if let Err(err) = self.send_wire(&wire, is_write) {
            warn!(unit = req.unit_id, %err, "TX failed");
            self.stats.note_own_discarded(1);
            return;
        }

        let now_us = self.clock.uptime_us();
        self.stats.note_own_sent();
        if is_read_function(req.function_code) {
            self.cache.note_request(req.unit_id, req.function_code);
        }
        self.stats.start_active(true, now_us);
        trace!(
            unit = req.unit_id,
            fc = req.function_code,
            start = req.start_register,
            quantity = req.quantity,
            "request transmitted"
        );
        self.inflight = Some(Inflight {
            req,
            sent_at_ms: self.clock.uptime_ms(),
        });
    }

    /// Bounded arbitration: keep draining RX (each byte restarts the
    /// quiet timer) until the bus has been quiet for the required
    /// silence, or the budget runs out.
    fn wait_for_silence(&mut self, ev: &mut TickEvents) -> bool {
        let start_us = self.clock.uptime_us();
        let needed = self.timing.silence_us as u64;
        loop {
            self.drain_rx(ev);
            let now_us = self.clock.uptime_us();

            if !self.rx_buf.is_empty()
                && now_us.saturating_sub(self.last_byte_us) > needed
            {
                self.flush_rx(ev);
            }

            let quiet = self.rx_was_empty
                && self.rx_buf.is_empty()
                && now_us.saturating_sub(self.rx_empty_since_us) >= needed;
            if quiet {
                return true;
            }
            if now_us.saturating_sub(start_us) >= self.cfg.arbitration_budget_us {
                return false;
            }
            self.clock.delay_us(ARBITRATION_POLL_US);
        }
    }

    fn send_wire(&mut self, wire: &[u8], is_write: bool) -> Result<()> {
        self.link.set_drive_enable(true);
        self.clock.delay_us(self.cfg.de_settle_us);

        let result = self
            .link
            .write_bytes(wire)
            .and_then(|_| self.link.flush_tx());

        self.clock.delay_us(self.cfg.de_settle_us);
        self.link.set_drive_enable(false);
        result?;

        self.stats.note_frame_sent();
        let now_us = self.clock.uptime_us();
        self.last_activity_ms = now_us / 1000;
        self.bus_silent = false;
        self.rx_was_empty = true;
        self.rx_empty_since_us = now_us;

        // Write requests and their responses are structurally identical;
        // a transceiver echo arriving inside two character times can only
        // be our own TX, so it is drained before it can match.
        if is_write {
            self.clock.delay_us(self.timing.char_time_us as u64 * 2);
            while self.link.read_byte().is_some() {}
            self.rx_empty_since_us = self.clock.uptime_us();
        }
        Ok(())
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn stats(&self) -> BusCounters {
        self.stats.cumulative()
    }

    pub fn interval_stats(&self) -> BusCounters {
        self.stats.interval()
    }

    pub fn reset_stats(&mut self) {
        let now_ms = self.clock.uptime_ms();
        self.stats.reset(now_ms);
    }

    pub fn unit_backoff_snapshot(&self) -> Vec<UnitBackoffInfo> {
        self.backoff.snapshot(self.clock.uptime_ms())
    }

    pub fn is_unit_paused(&self, unit_id: u8) -> bool {
        self.backoff.is_paused(unit_id, self.clock.uptime_ms())
    }

    pub fn recent_frames(&self) -> Vec<Frame> {
        self.history.snapshot()
    }

    pub fn recent_crc_contexts(&self) -> Vec<CrcErrorContext> {
        self.crc_contexts.snapshot()
    }

    pub fn cached_register(&self, unit_id: u8, function_code: u8, address: u16) -> Option<u16> {
        self.cache.read(unit_id, function_code, address)
    }

    pub fn register_map_snapshot(&self) -> Vec<RegisterMapSummary> {
        self.cache.snapshot()
    }

    pub fn queued_request_count(&self) -> usize {
        self.queue.len()
    }

    pub fn is_waiting_for_response(&self) -> bool {
        self.inflight.is_some()
    }

    pub fn has_pending_work(&self) -> bool {
        !self.queue.is_empty() || self.inflight.is_some()
    }

    pub fn is_bus_silent(&self) -> bool {
        self.bus_silent
    }

    pub fn timing(&self) -> LinkTiming {
        self.timing
    }

    pub fn response_timeout_ms(&self) -> u64 {
        self.cfg.response_timeout_ms
    }

    /// Halt all dequeues and ignore incoming RX (used around OTA and
    /// similar host maintenance). The in-flight slot is released without
    /// invoking its completion.
    pub fn suspend(&mut self) {
        self.suspended = true;
        self.inflight = None;
        self.rx_buf.clear();
        info!("bus engine suspended");
    }

    pub fn resume(&mut self) {
        self.suspended = false;
        let now_us = self.clock.uptime_us();
        self.last_byte_us = now_us;
        self.rx_empty_since_us = now_us;
        self.rx_was_empty = true;
        info!("bus engine resumed");
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }
}

fn is_read_function(fc: u8) -> bool {
    matches!(
        fc,
        FC_READ_COILS | FC_READ_DISCRETE_INPUTS | FC_READ_HOLDING_REGISTERS
            | FC_READ_INPUT_REGISTERS
    )
}
