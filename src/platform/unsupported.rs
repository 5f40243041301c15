//! Inert sources for platforms without a Windows telemetry stack

use crate::core::cpu::{CpuTimes, CpuTimesSource};
use crate::core::memory::{MemoryStatus, MemoryStatusSource};
use crate::counters::{CounterProvider, PerfCounter};
use crate::error::{Error, Result};
use crate::gpu::traits::{AdapterDescriptor, GpuInventory};
use crate::hwmon::{SensorSegment, SensorTree};
use crate::network_monitor::{InterfaceDescriptor, NetworkInventory};
use super::SystemSources;

fn unsupported(what: &str) -> Error {
    Error::UnsupportedPlatform(format!("{} requires Windows", what))
}

/// Every query fails with [`Error::UnsupportedPlatform`]
#[derive(Debug, Default, Clone, Copy)]
pub struct Unsupported;

impl CounterProvider for Unsupported {
    fn instance_names(&self, _category: &str) -> Result<Vec<String>> {
        Err(unsupported("Performance counters"))
    }

    fn open(&self, _category: &str, _counter: &str, _instance: &str) -> Result<Box<dyn PerfCounter>> {
        Err(unsupported("Performance counters"))
    }
}

impl GpuInventory for Unsupported {
    fn adapters(&self) -> Result<Vec<AdapterDescriptor>> {
        Err(unsupported("Display adapter inventory"))
    }
}

impl NetworkInventory for Unsupported {
    fn interfaces(&self) -> Result<Vec<InterfaceDescriptor>> {
        Err(unsupported("Interface table"))
    }
}

impl CpuTimesSource for Unsupported {
    fn system_times(&self) -> Result<CpuTimes> {
        Err(unsupported("System times"))
    }
}

impl MemoryStatusSource for Unsupported {
    fn memory_status(&self) -> Result<MemoryStatus> {
        Err(unsupported("Memory status"))
    }
}

pub(super) fn detect_sources() -> SystemSources {
    log::info!("No telemetry sources on this platform; all monitors report unavailable");
    SystemSources {
        counters: Box::new(Unsupported),
        gpu_inventory: Box::new(Unsupported),
        gpu_libraries: super::native_gpu_libraries(),
        network: Box::new(Unsupported),
        cpu_times: Box::new(Unsupported),
        memory: Box::new(Unsupported),
        foreground: None,
    }
}

pub(super) fn open_sensor_tree() -> Option<Box<dyn SensorTree>> {
    None
}

pub(super) fn open_sensor_segment(_name: &str) -> Option<Box<dyn SensorSegment>> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sources_fail_as_unsupported() {
        let sources = detect_sources();
        let err = sources.counters.instance_names("PhysicalDisk").unwrap_err();
        assert!(err.is_unavailable());
        assert!(sources.cpu_times.system_times().is_err());
        assert!(sources.memory.memory_status().is_err());
        assert!(sources.foreground.is_none());
        assert!(open_sensor_tree().is_none());
        assert!(open_sensor_segment("Global\\HWiNFO_SENS_SM2").is_none());
    }
}
