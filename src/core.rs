//! Core wiring: one owned value instead of singletons
//!
//! Builds the bus engine and the device manager from one configuration,
//! owning the only references that tie them together. The host calls
//! [`Core::tick`] from its main loop; everything else reaches the system
//! through the handles this value exposes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use rtuscope_bus::{BusEngine, BusHandle, Clock, EngineConfig, SerialLink};
use rtuscope_devices::{DeviceManager, ManagerOptions};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub engine: EngineConfig,
}

/// The assembled system: bus engine plus device manager.
pub struct Core {
    bus: BusHandle,
    devices: Arc<DeviceManager>,
}

impl Core {
    /// Construct the core over a serial link. Fails when the engine's
    /// CRC self-test fails; the host above decides whether to reset.
    pub fn new(
        link: Box<dyn SerialLink>,
        clock: Arc<dyn Clock>,
        config: CoreConfig,
    ) -> Result<Self, rtuscope_bus::BusError> {
        let manager_opts = ManagerOptions {
            pairing_window_ms: config.engine.pairing_window_ms,
            ..ManagerOptions::default()
        };
        let engine = BusEngine::new(link, clock.clone(), config.engine)?;
        let bus = BusHandle::new(engine);
        let devices = DeviceManager::new(bus.clone(), clock, manager_opts);
        Ok(Self { bus, devices })
    }

    /// One cooperative main-loop step: advance the engine, then let the
    /// poll scheduler claim the idle bus.
    pub fn tick(&self) {
        self.bus.tick();
        self.devices.tick();
    }

    pub fn bus(&self) -> &BusHandle {
        &self.bus
    }

    pub fn devices(&self) -> &Arc<DeviceManager> {
        &self.devices
    }

    /// Halt bus traffic entirely (OTA and similar host maintenance).
    pub fn suspend(&self) {
        self.bus.suspend();
    }

    pub fn resume(&self) {
        self.bus.resume();
    }
}
