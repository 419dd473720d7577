//! rtuscope: Modbus RTU bus engine with a typed device manager
//!
//! The bus engine ([`rtuscope_bus`]) drives a half-duplex RS-485 segment
//! as a master while passively observing every other master on the wire.
//! The device manager ([`rtuscope_devices`]) turns declarative register
//! schemas into batched polls and typed, scaled, cached values.
//!
//! [`Core`] wires both together as one owned value constructed at boot;
//! [`BootDiagnostics`] carries the persistent boot-count and reset
//! breadcrumb state initialized before it.

pub mod boot;
pub mod core;

pub use self::boot::BootDiagnostics;
pub use self::core::{Core, CoreConfig};

pub use rtuscope_bus::{
    BusEngine, BusError, BusHandle, CharFormat, Clock, EngineConfig, Frame, SerialLink,
    SerialSettings, SystemClock, Timestamp,
};
pub use rtuscope_devices::{DeviceError, DeviceManager, FieldType, ManagerOptions};
