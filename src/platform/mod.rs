//! Platform-specific data sources
//!
//! The monitors only see traits; this module hands them the OS-backed
//! implementations. On Windows those are WMI, kernel32, iphlpapi and user32.
//! Everywhere else every source is inert and each monitor reports itself
//! unavailable.

#[cfg(windows)]
pub mod windows;

#[cfg(not(windows))]
pub mod unsupported;

use crate::core::cpu::CpuTimesSource;
use crate::core::memory::MemoryStatusSource;
use crate::counters::CounterProvider;
use crate::game_activity::ForegroundProbe;
use crate::gpu::traits::GpuInventory;
use crate::gpu::NativeLibraries;
use crate::hwmon::{SensorSegment, SensorTree};
use crate::network_monitor::NetworkInventory;

#[cfg(windows)]
use self::windows as imp;

#[cfg(not(windows))]
use self::unsupported as imp;

/// Every OS source the monitors are built from
///
/// Fields are public so callers can move single sources into the monitor that
/// needs them.
pub struct SystemSources {
    pub counters: Box<dyn CounterProvider>,
    pub gpu_inventory: Box<dyn GpuInventory>,
    pub gpu_libraries: NativeLibraries,
    pub network: Box<dyn NetworkInventory>,
    pub cpu_times: Box<dyn CpuTimesSource>,
    pub memory: Box<dyn MemoryStatusSource>,
    pub foreground: Option<Box<dyn ForegroundProbe>>,
}

impl SystemSources {
    /// Sources for the current platform
    ///
    /// Never fails; a source that cannot reach its API returns errors from its
    /// calls instead.
    pub fn detect() -> Self {
        imp::detect_sources()
    }
}

/// Vendor GPU libraries compiled into this build, not yet initialized
pub fn native_gpu_libraries() -> NativeLibraries {
    #[allow(unused_mut)]
    let mut libraries = NativeLibraries::none();

    #[cfg(feature = "nvidia")]
    {
        libraries.nvidia = Some(Box::new(crate::gpu::nvidia::NvmlLibrary::new()));
    }

    #[cfg(all(windows, feature = "amd"))]
    {
        libraries.amd = Some(Box::new(crate::gpu::amd::AdlLibrary::new()));
    }

    libraries
}

/// Connect to a running hardware sensor tree, if any
pub fn open_sensor_tree() -> Option<Box<dyn SensorTree>> {
    imp::open_sensor_tree()
}

/// Map a named shared-memory segment read-only, if it exists
pub fn open_sensor_segment(name: &str) -> Option<Box<dyn SensorSegment>> {
    imp::open_sensor_segment(name)
}
