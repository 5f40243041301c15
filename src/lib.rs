//! # Mini Monitor (minimon)
//!
//! Hardware telemetry aggregation for desktop gauge dashboards. minimon discovers
//! GPUs, physical disks and network adapters, binds each to the best data source
//! available on the machine, and turns every source into one plain number per
//! timer tick.
//!
//! ## Features
//!
//! - **Multi-Vendor GPU Support**: NVIDIA (NVML), AMD (ADL), anything else via
//!   the OS "GPU Engine" performance counters
//! - **Device Selection**: aggregate or single-device readings for disks and
//!   networks, persisted across runs
//! - **CPU Temperature**: hardware sensor tree first, shared-memory sensor table
//!   as a fallback
//! - **Game Detection**: decides when an FPS gauge is worth showing
//! - **Graceful Degradation**: a missing source reports zero or `None`, never an
//!   error to the caller
//!
//! ## Quick Start
//!
//! ```no_run
//! use minimon::{Config, MonitoringBackend};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load()?;
//! let mut backend = MonitoringBackend::new(config);
//!
//! let snapshot = backend.tick(None);
//! println!("CPU {:.0}%  GPU {:.0}% ({})",
//!     snapshot.cpu.usage,
//!     snapshot.gpu.usage,
//!     snapshot.gpu_device,
//! );
//! println!("Disk {:.1} / {:.1} Mbps", snapshot.disk.read_mbps, snapshot.disk.write_mbps);
//! if let Some(temp) = snapshot.cpu.temperature {
//!     println!("CPU temperature: {}°C", temp);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Device Selection
//!
//! ```no_run
//! use minimon::{Config, Domain, MonitoringBackend};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut backend = MonitoringBackend::new(Config::load()?);
//! for device in backend.available_devices(Domain::Disk) {
//!     println!("{}  {}", device.id(), device.display_name());
//! }
//!
//! let id = backend.available_devices(Domain::Disk)[1].id().to_string();
//! if backend.select(Domain::Disk, Some(&id)) {
//!     backend.config().save()?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Support
//!
//! | Source | Windows | Elsewhere |
//! |--------|---------|-----------|
//! | Performance counters (disk, network, GPU) | ✅ | ❌ |
//! | NVML | ✅ | ✅ |
//! | ADL | ✅ | ❌ |
//! | Sensor tree / shared memory | ✅ | ❌ |
//!
//! Elsewhere the monitors construct normally and report themselves unavailable.

pub mod backend; // Tick driver, history rings and gauge auto-scaling
pub mod config; // Configuration management with TOML persistence
pub mod core; // CPU usage and system memory
pub mod counters; // Performance counter abstraction
pub mod device; // Device identity and the selection contract
pub mod disk; // Physical disk throughput
pub mod error;
pub mod game_activity; // FPS gauge visibility from game heuristics
pub mod gpu; // Multi-vendor GPU monitor
pub mod hwmon; // CPU temperature aggregation
pub mod network_monitor; // Network interface throughput
pub mod platform;

#[cfg(test)]
mod testing;

// Re-export main types
pub use backend::{AutoScale, Domain, HistoryBuffer, MonitoringBackend, TelemetrySnapshot};
pub use config::{Config, GameConfig, GeneralConfig, SelectionConfig};
pub use core::{CpuMonitor, CpuReading, MemoryMonitor, MemoryReading};
pub use device::{DeviceInfo, DeviceSelection, DeviceType, AGGREGATE_DEVICE_ID};
pub use disk::{DiskMonitor, DiskReading};
pub use error::{Error, Result};
pub use game_activity::{GameActivityDetector, GameDisplayMode};
pub use gpu::{GpuMonitor, GpuReading, Vendor};
pub use hwmon::{HardwareMonitorService, SharedMemorySensorReader, TemperatureSource};
pub use network_monitor::{NetworkMonitor, NetworkReading};
pub use platform::SystemSources;
