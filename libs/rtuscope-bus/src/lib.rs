//! Modbus RTU bus engine
//!
//! Simultaneously a bus *master* (queueing and issuing read/write
//! transactions against slave units) and a *passive observer* (sniffing
//! foreign master/slave traffic on the same half-duplex RS-485 segment to
//! maintain register snapshots).
//!
//! # Architecture
//!
//! ```text
//! rtuscope-bus
//!     ├── SerialLink / LinkTiming   (byte transport, DE, timing budget)
//!     ├── codec / Frame             (CRC-16, parse, request encoding)
//!     ├── extract                   (spec-based RX frame extraction)
//!     ├── BusEngine                 (tick: arbitration, matching, timeouts)
//!     ├── BusHandle                 (shared locked API + callback dispatch)
//!     ├── RegisterCache             (per-(unit, fc) address -> value)
//!     └── stats / history / backoff (health, post-mortem, per-unit pause)
//! ```
//!
//! The engine advances only inside a cooperatively-called [`BusHandle::tick`];
//! external callers (web handlers, MQTT bridges) use the handle's enqueue
//! and snapshot APIs from any thread.

pub mod backoff;
pub mod cache;
pub mod clock;
pub mod codec;
pub mod constants;
pub mod engine;
pub mod error;
pub mod extract;
pub mod frame;
pub mod handle;
pub mod history;
pub mod link;
pub mod stats;
pub mod testing;

pub use backoff::UnitBackoffInfo;
pub use cache::{RegisterCache, RegisterEntry, RegisterMapSummary};
pub use clock::{Clock, SystemClock, Timestamp, EPOCH_VALID_MIN};
pub use engine::{BusEngine, Completion, EngineConfig, PendingRequest};
pub use error::{BusError, Result};
pub use frame::{Frame, FrameSummary};
pub use handle::{BusHandle, FrameObserver};
pub use history::CrcErrorContext;
pub use link::{CharFormat, LinkTiming, SerialLink, SerialSettings};
pub use stats::{BusCounters, WarnThresholds};

#[cfg(feature = "serialport")]
pub use link::SerialPortLink;
