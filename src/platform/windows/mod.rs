//! Windows data sources
//!
//! - WMI formatted performance classes for disk, network and GPU counters
//! - WMI `Win32_VideoController` for the display adapter inventory
//! - iphlpapi `GetIfTable2` for the interface table
//! - kernel32 for system times and memory status
//! - user32 for the foreground window
//! - LibreHardwareMonitor / OpenHardwareMonitor WMI namespaces for sensors
//! - a named file mapping for the shared-memory sensor table

pub mod counters;
pub mod foreground;
pub mod gpu_inventory;
pub mod lhm;
pub mod network;
pub mod shared_memory;
pub mod system;

use super::SystemSources;
use crate::error::{Error, Result};
use crate::hwmon::{SensorSegment, SensorTree};
use wmi::{COMLibrary, WMIConnection};

pub const CIMV2_NAMESPACE: &str = "root\\CIMV2";

/// Create a WMI connection to `namespace`
///
/// COM may already be initialized on the calling thread by a UI framework, so
/// three strategies are tried in order.
pub fn wmi_connection(namespace: &str) -> Result<WMIConnection> {
    // Fresh COM initialization
    if let Ok(com) = COMLibrary::new() {
        if let Ok(conn) = WMIConnection::with_namespace_path(namespace, com) {
            return Ok(conn);
        }
    }

    // COM without security init
    if let Ok(com) = COMLibrary::without_security() {
        if let Ok(conn) = WMIConnection::with_namespace_path(namespace, com) {
            return Ok(conn);
        }
    }

    // COM already initialized by the host
    let com = unsafe { COMLibrary::assume_initialized() };
    WMIConnection::with_namespace_path(namespace, com)
        .map_err(|e| Error::Unavailable(format!("WMI namespace {}: {}", namespace, e)))
}

/// Escape a value for a single-quoted WQL string literal
pub fn wql_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

pub(super) fn detect_sources() -> SystemSources {
    let counters: Box<dyn crate::counters::CounterProvider> = match counters::WmiCounterProvider::connect() {
        Ok(provider) => Box::new(provider),
        Err(e) => {
            log::warn!("Performance counters unavailable: {}", e);
            Box::new(counters::NoCounters)
        }
    };

    SystemSources {
        counters,
        gpu_inventory: Box::new(gpu_inventory::WmiGpuInventory),
        gpu_libraries: super::native_gpu_libraries(),
        network: Box::new(network::IfTableInventory),
        cpu_times: Box::new(system::Kernel32Times),
        memory: Box::new(system::Kernel32Memory),
        foreground: Some(Box::new(foreground::User32Foreground)),
    }
}

pub(super) fn open_sensor_tree() -> Option<Box<dyn SensorTree>> {
    lhm::WmiSensorTree::connect().map(|tree| Box::new(tree) as Box<dyn SensorTree>)
}

pub(super) fn open_sensor_segment(name: &str) -> Option<Box<dyn SensorSegment>> {
    shared_memory::MappedSegment::open(name).map(|segment| Box::new(segment) as Box<dyn SensorSegment>)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wql_escape() {
        assert_eq!(wql_escape("0 C:"), "0 C:");
        assert_eq!(wql_escape("Intel[R] Wi-Fi 6 AX201 160MHz"), "Intel[R] Wi-Fi 6 AX201 160MHz");
        assert_eq!(wql_escape("it's"), "it\\'s");
        assert_eq!(wql_escape("a\\b"), "a\\\\b");
    }
}
