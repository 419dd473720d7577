//! Typed Modbus device manager
//!
//! Turns declarative per-device register schemas (data type, scale, poll
//! interval) into batched poll plans, type-aware conversions and cached
//! scaled values on top of the `rtuscope-bus` engine.
//!
//! ```text
//! rtuscope-devices
//!     ├── FieldType          (raw word <-> numeric conversions)
//!     ├── schema             (JSON device type / unit mapping documents)
//!     ├── plan               (contiguous batch merging, 125-register cap)
//!     └── DeviceManager      (scheduling, decoding, passive enrichment)
//! ```

pub mod error;
pub mod field;
pub mod manager;
pub mod plan;
pub mod schema;

pub use error::{DeviceError, Result};
pub use field::FieldType;
pub use manager::{
    DeviceManager, DeviceSnapshot, DeviceValue, ManagerOptions, ReadCompletion, UnknownSnapshot,
    ValueObserver, ValueSnapshot, WriteCompletion, MAX_UNKNOWN_REGISTERS,
};
pub use plan::{build_poll_batches, PollBatch};
pub use schema::{DeviceType, MappingDoc, MappingEntry, RegisterDef};
