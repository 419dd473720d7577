//! Poll plan construction
//!
//! Polled register definitions merge into batched reads: strictly
//! contiguous spans sharing `(functionCode, pollIntervalMs)` fold into
//! one request, splitting at the 125-register protocol cap. The plan is
//! deterministic and stable under reordering of the input definitions.

use rtuscope_bus::constants::MAX_READ_REGISTERS;

use crate::schema::RegisterDef;

/// One batched read covering several contiguous register definitions.
#[derive(Debug, Clone, PartialEq)]
pub struct PollBatch {
    pub function_code: u8,
    pub start_address: u16,
    pub quantity: u16,
    pub poll_interval_ms: u64,
    /// 0 until the first successful enqueue.
    pub last_poll_ms: u64,
    /// Set on every attempt, successful or rejected.
    pub last_attempt_ms: u64,
    /// Uptime of the enqueue currently awaiting its completion.
    pub outstanding_since_ms: Option<u64>,
}

impl PollBatch {
    fn from_def(def: &RegisterDef) -> Self {
        Self {
            function_code: def.function_code,
            start_address: def.address,
            quantity: def.length,
            poll_interval_ms: def.poll_interval_ms,
            last_poll_ms: 0,
            last_attempt_ms: 0,
            outstanding_since_ms: None,
        }
    }

    /// End of the covered span, exclusive.
    pub fn end_address(&self) -> u32 {
        u32::from(self.start_address) + u32::from(self.quantity)
    }
}

/// Group a device's polled definitions into batches.
pub fn build_poll_batches(registers: &[RegisterDef]) -> Vec<PollBatch> {
    let mut polled: Vec<&RegisterDef> =
        registers.iter().filter(|r| r.poll_interval_ms > 0).collect();
    polled.sort_by_key(|r| (r.function_code, r.poll_interval_ms, r.address));

    let mut batches: Vec<PollBatch> = Vec::new();
    for def in polled {
        match batches.last_mut() {
            Some(batch)
                if batch.function_code == def.function_code
                    && batch.poll_interval_ms == def.poll_interval_ms
                    && batch.end_address() == u32::from(def.address)
                    && batch.quantity + def.length <= MAX_READ_REGISTERS =>
            {
                batch.quantity += def.length;
            }
            _ => batches.push(PollBatch::from_def(def)),
        }
    }
    batches
}
