//! Tick driver shared by every frontend
//!
//! [`MonitoringBackend`] owns one monitor per domain plus the game-activity
//! detector. A frontend calls [`MonitoringBackend::tick`] once per timer
//! interval and renders the returned [`TelemetrySnapshot`]; device pickers go
//! through [`MonitoringBackend::select`], which also records the choice in the
//! configuration so it can be replayed at the next start.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::core::cpu::{CpuMonitor, CpuReading};
use crate::core::memory::{MemoryMonitor, MemoryReading};
use crate::device::{DeviceInfo, DeviceSelection, AGGREGATE_DEVICE_ID};
use crate::disk::{DiskMonitor, DiskReading};
use crate::error::{Error, Result};
use crate::game_activity::GameActivityDetector;
use crate::gpu::{GpuMonitor, GpuReading};
use crate::hwmon::HardwareMonitorService;
use crate::network_monitor::{NetworkMonitor, NetworkReading};
use crate::platform::SystemSources;

/// Default history buffer size for time-series data
pub const DEFAULT_HISTORY_SIZE: usize = 60;

/// Ceilings offered to throughput gauges, in Mbps
pub const SCALE_LADDER: [f32; 10] = [
    10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
];

// ============================================================================
// HISTORY
// ============================================================================

/// Fixed-capacity ring of recent samples; the oldest value is evicted first
#[derive(Debug, Clone)]
pub struct HistoryBuffer<T: Clone> {
    data: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> HistoryBuffer<T> {
    /// Create a new history buffer with given capacity
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a new value, removing oldest if at capacity
    pub fn push(&mut self, value: T) {
        if self.data.len() >= self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(value);
    }

    /// Values from oldest to newest
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }

    /// Get the most recent value
    pub fn latest(&self) -> Option<&T> {
        self.data.back()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Every slot holds a sample
    pub fn is_full(&self) -> bool {
        self.data.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Convert to Vec
    pub fn to_vec(&self) -> Vec<T> {
        self.data.iter().cloned().collect()
    }
}

// ============================================================================
// AUTO SCALE
// ============================================================================

/// Gauge ceiling chosen from [`SCALE_LADDER`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoScale {
    ceiling: f32,
}

impl Default for AutoScale {
    fn default() -> Self {
        Self {
            ceiling: SCALE_LADDER[0],
        }
    }
}

impl AutoScale {
    pub fn new() -> Self {
        Self::default()
    }

    /// Smallest ladder step at or above `peak`
    ///
    /// Past the top step the ceiling is the next multiple of the top step.
    pub fn ceiling_for(peak: f32) -> f32 {
        if !peak.is_finite() || peak <= 0.0 {
            return SCALE_LADDER[0];
        }
        if let Some(step) = SCALE_LADDER.iter().find(|&&step| peak <= step) {
            return *step;
        }
        let top = SCALE_LADDER[SCALE_LADDER.len() - 1];
        (peak / top).ceil() * top
    }

    /// Recompute the ceiling from the peak of `values`
    pub fn update<'a>(&mut self, values: impl IntoIterator<Item = &'a f32>) -> f32 {
        let peak = values.into_iter().copied().fold(0.0_f32, f32::max);
        self.ceiling = Self::ceiling_for(peak);
        self.ceiling
    }

    pub fn ceiling(&self) -> f32 {
        self.ceiling
    }

    /// `value` as a percentage of the ceiling, clamped to 0-100
    pub fn percent(&self, value: f32) -> f32 {
        if !value.is_finite() || value <= 0.0 {
            return 0.0;
        }
        (value / self.ceiling * 100.0).min(100.0)
    }
}

// ============================================================================
// DOMAINS AND SNAPSHOTS
// ============================================================================

/// Monitor that offers a device picker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Domain {
    Gpu,
    Disk,
    Network,
}

impl Domain {
    pub const ALL: [Domain; 3] = [Domain::Gpu, Domain::Disk, Domain::Network];

    /// Key in the persisted selection map
    pub fn key(&self) -> &'static str {
        match self {
            Domain::Gpu => "GPU",
            Domain::Disk => "Disk",
            Domain::Network => "Network",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Domain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "gpu" => Ok(Domain::Gpu),
            "disk" => Ok(Domain::Disk),
            "network" | "net" => Ok(Domain::Network),
            other => Err(Error::Parse(format!("unknown domain '{}'", other))),
        }
    }
}

/// Everything sampled in one tick
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu: CpuReading,
    pub memory: MemoryReading,
    pub gpu: GpuReading,
    pub gpu_device: String,
    pub disk: DiskReading,
    pub disk_device: String,
    /// Current gauge ceiling in Mbps
    pub disk_scale: f32,
    pub network: NetworkReading,
    pub network_device: String,
    pub network_scale: f32,
    pub fps: Option<f32>,
    /// FPS gauge should be visible this tick
    pub show_fps: bool,
    pub game_score: f32,
}

// ============================================================================
// UNIFIED MONITORING BACKEND
// ============================================================================

/// Owns every monitor and drives them from one timer
pub struct MonitoringBackend {
    config: Config,

    cpu: CpuMonitor,
    memory: MemoryMonitor,
    gpu: GpuMonitor,
    disk: DiskMonitor,
    network: NetworkMonitor,
    game: GameActivityDetector,

    cpu_history: HistoryBuffer<f32>,
    memory_history: HistoryBuffer<f32>,
    gpu_history: HistoryBuffer<f32>,
    /// Per-tick max of read and write
    disk_history: HistoryBuffer<f32>,
    /// Per-tick max of download and upload
    network_history: HistoryBuffer<f32>,
    disk_scale: AutoScale,
    network_scale: AutoScale,

    last_snapshot: Option<TelemetrySnapshot>,
    shut_down: bool,
}

impl MonitoringBackend {
    /// Backend over the platform's sources
    pub fn new(config: Config) -> Self {
        Self::from_sources(SystemSources::detect(), HardwareMonitorService::system(), config)
    }

    /// Backend over explicit sources
    pub fn from_sources(
        sources: SystemSources,
        temperature: HardwareMonitorService,
        config: Config,
    ) -> Self {
        let gpu = GpuMonitor::new(
            sources.gpu_inventory.as_ref(),
            sources.counters.as_ref(),
            sources.gpu_libraries,
        );
        let disk = DiskMonitor::new(sources.counters.as_ref());
        let network = NetworkMonitor::new(sources.network.as_ref(), sources.counters.as_ref());
        let cpu = CpuMonitor::new(sources.cpu_times, temperature);
        let memory = MemoryMonitor::new(sources.memory);

        let game = GameActivityDetector::new(
            config.game.display_mode,
            config.general.update_interval_ms,
            config.game.sustained_window_ms,
            config.game.gpu_usage_threshold,
            sources.foreground,
        )
        .with_extra_games(&config.game.extra_game_processes);

        let history = config.general.history_length;
        let mut backend = Self {
            cpu,
            memory,
            gpu,
            disk,
            network,
            game,
            cpu_history: HistoryBuffer::new(history),
            memory_history: HistoryBuffer::new(history),
            gpu_history: HistoryBuffer::new(history),
            disk_history: HistoryBuffer::new(history),
            network_history: HistoryBuffer::new(history),
            disk_scale: AutoScale::new(),
            network_scale: AutoScale::new(),
            last_snapshot: None,
            shut_down: false,
            config,
        };
        backend.restore_selections();
        backend
    }

    fn restore_selections(&mut self) {
        for domain in Domain::ALL {
            let Some(id) = self.config.selection.get(domain.key()).map(str::to_string) else {
                continue;
            };
            if self.monitor_mut(domain).select_device(Some(&id)) {
                log::debug!("Restored {} selection '{}'", domain, id);
            } else {
                log::info!("Saved {} device '{}' is gone; using the default", domain, id);
            }
        }
    }

    fn monitor(&self, domain: Domain) -> &dyn DeviceSelection {
        match domain {
            Domain::Gpu => &self.gpu,
            Domain::Disk => &self.disk,
            Domain::Network => &self.network,
        }
    }

    fn monitor_mut(&mut self, domain: Domain) -> &mut dyn DeviceSelection {
        match domain {
            Domain::Gpu => &mut self.gpu,
            Domain::Disk => &mut self.disk,
            Domain::Network => &mut self.network,
        }
    }

    /// Sample every monitor once
    ///
    /// `fps` is the frame rate reported by an external overlay, if any.
    pub fn tick(&mut self, fps: Option<f32>) -> TelemetrySnapshot {
        let cpu = self.cpu.update();
        let memory = self.memory.update_memory();
        let gpu = self.gpu.update();
        let disk = self.disk.update();
        let network = self.network.update();
        let show_fps = self.game.should_show_fps(fps, gpu.usage);

        self.cpu_history.push(cpu.usage);
        self.memory_history.push(memory.percent);
        self.gpu_history.push(gpu.usage);
        self.disk_history.push(disk.read_mbps.max(disk.write_mbps));
        self.network_history
            .push(network.download_mbps.max(network.upload_mbps));
        self.disk_scale.update(self.disk_history.values());
        self.network_scale.update(self.network_history.values());

        let snapshot = TelemetrySnapshot {
            timestamp: Utc::now(),
            cpu,
            memory,
            gpu,
            gpu_device: self.gpu.current_device_display_name(),
            disk,
            disk_device: self.disk.current_device_display_name(),
            disk_scale: self.disk_scale.ceiling(),
            network,
            network_device: self.network.current_device_display_name(),
            network_scale: self.network_scale.ceiling(),
            fps,
            show_fps,
            game_score: self.game.last_score(),
        };
        self.last_snapshot = Some(snapshot.clone());
        snapshot
    }

    /// Apply a device selection and record it in the configuration
    ///
    /// `None`, `""` and `"all"` return the domain to its default device. A
    /// miss leaves both the monitor and the configuration untouched.
    pub fn select(&mut self, domain: Domain, id: Option<&str>) -> bool {
        if !self.monitor_mut(domain).select_device(id) {
            return false;
        }
        let persisted = id.filter(|id| !id.is_empty() && *id != AGGREGATE_DEVICE_ID);
        self.config.selection.set(domain.key(), persisted);
        true
    }

    pub fn available_devices(&self, domain: Domain) -> Vec<DeviceInfo> {
        self.monitor(domain).available_devices()
    }

    pub fn selected_device(&self, domain: Domain) -> Option<DeviceInfo> {
        self.monitor(domain).selected_device()
    }

    /// Advance the network selection, wrapping through the aggregate entry
    pub fn cycle_network(&mut self) -> DeviceInfo {
        let next = self.network.cycle_to_next_device();
        let persisted = Some(next.id()).filter(|_| !next.is_aggregate());
        self.config.selection.set(Domain::Network.key(), persisted);
        next
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.config.general.update_interval_ms.max(1)))
    }

    pub fn last_snapshot(&self) -> Option<&TelemetrySnapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn cpu_history(&self) -> &HistoryBuffer<f32> {
        &self.cpu_history
    }

    pub fn memory_history(&self) -> &HistoryBuffer<f32> {
        &self.memory_history
    }

    pub fn gpu_history(&self) -> &HistoryBuffer<f32> {
        &self.gpu_history
    }

    pub fn disk_history(&self) -> &HistoryBuffer<f32> {
        &self.disk_history
    }

    pub fn network_history(&self) -> &HistoryBuffer<f32> {
        &self.network_history
    }

    pub fn cpu(&mut self) -> &mut CpuMonitor {
        &mut self.cpu
    }

    pub fn memory(&mut self) -> &mut MemoryMonitor {
        &mut self.memory
    }

    pub fn gpu(&mut self) -> &mut GpuMonitor {
        &mut self.gpu
    }

    pub fn disk(&mut self) -> &mut DiskMonitor {
        &mut self.disk
    }

    pub fn network(&mut self) -> &mut NetworkMonitor {
        &mut self.network
    }

    pub fn game(&mut self) -> &mut GameActivityDetector {
        &mut self.game
    }

    /// Dispose every monitor. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.gpu.dispose();
        self.disk.dispose();
        self.network.dispose();
        self.cpu.dispose();
        self.shut_down = true;
        log::debug!("Monitoring backend shut down");
    }
}

impl Drop for MonitoringBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cpu::CpuTimes;
    use crate::core::memory::MemoryStatus;
    use crate::counters::{
        DISK_READ_BYTES, DISK_WRITE_BYTES, NETWORK_INTERFACE, NET_BYTES_RECEIVED, NET_BYTES_SENT,
        PHYSICAL_DISK,
    };
    use crate::game_activity::{ForegroundWindow, GameDisplayMode};
    use crate::gpu::{AdapterDescriptor, NativeLibraries, PciLocation, Vendor};
    use crate::network_monitor::{InterfaceDescriptor, InterfaceKind};
    use crate::testing::{
        FakeCounters, FakeForeground, FakeGpuInventory, FakeNativeLibrary, FakeNetworkInventory,
        FixedMemoryStatus, ScriptedCpuTimes,
    };

    const ETH_INSTANCE: &str = "Intel[R] Ethernet Controller I225-V";

    fn counters() -> FakeCounters {
        let counters = FakeCounters::new()
            .with_instances(PHYSICAL_DISK, &["0 C:", "1 D:", "_Total"])
            .with_instances(NETWORK_INTERFACE, &[ETH_INSTANCE]);
        counters.set(PHYSICAL_DISK, DISK_READ_BYTES, "0 C:", 2_500_000.0);
        counters.set(PHYSICAL_DISK, DISK_WRITE_BYTES, "0 C:", 125_000.0);
        counters.set(PHYSICAL_DISK, DISK_READ_BYTES, "1 D:", 500_000.0);
        counters.set(NETWORK_INTERFACE, NET_BYTES_RECEIVED, ETH_INSTANCE, 12_500_000.0);
        counters.set(NETWORK_INTERFACE, NET_BYTES_SENT, ETH_INSTANCE, 125_000.0);
        counters
    }

    fn sources(counters: &FakeCounters, foreground: Option<ForegroundWindow>) -> SystemSources {
        let nvidia = FakeNativeLibrary::new(Vendor::Nvidia).with_device(0, "NVIDIA GeForce RTX 4070", Some((1, 0)), 85.0);
        SystemSources {
            counters: Box::new(counters.clone()),
            gpu_inventory: Box::new(FakeGpuInventory::new(vec![AdapterDescriptor {
                name: "NVIDIA GeForce RTX 4070".to_string(),
                pnp_device_id: "PCI\\VEN_10DE&DEV_2786".to_string(),
                adapter_compatibility: "NVIDIA".to_string(),
                adapter_ram: 4 * 1024 * 1024 * 1024,
                pci: Some(PciLocation { bus: 1, device: 0, function: 0 }),
            }])),
            gpu_libraries: NativeLibraries {
                nvidia: Some(Box::new(nvidia)),
                amd: None,
            },
            network: Box::new(FakeNetworkInventory(vec![InterfaceDescriptor {
                name: "Ethernet".to_string(),
                description: "Intel(R) Ethernet Controller I225-V".to_string(),
                kind: InterfaceKind::Ethernet,
                is_up: true,
            }])),
            cpu_times: Box::new(ScriptedCpuTimes::new(vec![
                CpuTimes { idle: 0, kernel: 0, user: 0 },
                CpuTimes { idle: 500, kernel: 1000, user: 1000 },
            ])),
            memory: Box::new(FixedMemoryStatus(Some(MemoryStatus {
                total: 16 * 1024,
                available: 4 * 1024,
            }))),
            foreground: Some(Box::new(FakeForeground::new(foreground))),
        }
    }

    fn backend(config: Config) -> MonitoringBackend {
        MonitoringBackend::from_sources(
            sources(&counters(), None),
            HardwareMonitorService::new(None, None),
            config,
        )
    }

    #[test]
    fn test_history_buffer_evicts_oldest() {
        let mut buf = HistoryBuffer::new(3);
        assert!(buf.is_empty());
        for v in 1..=4 {
            buf.push(v);
        }
        assert!(buf.is_full());
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.capacity(), 3);
        assert_eq!(buf.to_vec(), vec![2, 3, 4]);
        assert_eq!(buf.latest(), Some(&4));
        buf.clear();
        assert!(!buf.is_full());
    }

    #[test]
    fn test_history_buffer_zero_capacity() {
        let mut buf = HistoryBuffer::new(0);
        buf.push(1.0_f32);
        assert_eq!(buf.capacity(), 1);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_auto_scale_ladder() {
        assert_eq!(AutoScale::ceiling_for(0.0), 10.0);
        assert_eq!(AutoScale::ceiling_for(10.0), 10.0);
        assert_eq!(AutoScale::ceiling_for(10.5), 25.0);
        assert_eq!(AutoScale::ceiling_for(940.0), 1000.0);
        assert_eq!(AutoScale::ceiling_for(10_000.0), 10_000.0);
        assert_eq!(AutoScale::ceiling_for(12_000.0), 20_000.0);
        assert_eq!(AutoScale::ceiling_for(f32::NAN), 10.0);
    }

    #[test]
    fn test_auto_scale_percent() {
        let mut scale = AutoScale::new();
        assert_eq!(scale.update(&[3.0, 80.0, 12.0]), 100.0);
        assert_eq!(scale.percent(50.0), 50.0);
        assert_eq!(scale.percent(250.0), 100.0);
        assert_eq!(scale.percent(-1.0), 0.0);
    }

    #[test]
    fn test_domain_parse() {
        assert_eq!("GPU".parse::<Domain>().unwrap(), Domain::Gpu);
        assert_eq!("net".parse::<Domain>().unwrap(), Domain::Network);
        assert!("fan".parse::<Domain>().is_err());
        assert_eq!(Domain::Disk.key(), "Disk");
    }

    #[test]
    fn test_tick_samples_every_monitor() {
        let mut backend = backend(Config::default());
        let first = backend.tick(None);
        // First CPU sample has no previous snapshot
        assert_eq!(first.cpu.usage, 0.0);
        assert_eq!(first.memory.percent, 75.0);
        assert_eq!(first.gpu.usage, 85.0);
        assert_eq!(first.gpu_device, "NVIDIA GeForce RTX 4070");
        assert_eq!(first.disk.read_mbps, 24.0);
        assert_eq!(first.disk.write_mbps, 1.0);
        assert_eq!(first.disk_device, crate::disk::ALL_DISKS);
        assert_eq!(first.disk_scale, 25.0);
        assert_eq!(first.network.download_mbps, 100.0);
        assert_eq!(first.network_scale, 100.0);
        assert!(!first.show_fps);

        let second = backend.tick(None);
        assert_eq!(second.cpu.usage, 75.0);
        assert_eq!(backend.cpu_history().to_vec(), vec![0.0, 75.0]);
        assert!(backend.last_snapshot().is_some());
    }

    #[test]
    fn test_select_writes_config() {
        let mut backend = backend(Config::default());
        let disk = backend.available_devices(Domain::Disk)[2].clone();

        assert!(backend.select(Domain::Disk, Some(disk.id())));
        assert_eq!(backend.config().selection.get("Disk"), Some(disk.id()));
        assert_eq!(backend.tick(None).disk.read_mbps, 4.0);

        assert!(!backend.select(Domain::Disk, Some("disk-missing")));
        assert_eq!(backend.config().selection.get("Disk"), Some(disk.id()));

        assert!(backend.select(Domain::Disk, Some(AGGREGATE_DEVICE_ID)));
        assert_eq!(backend.config().selection.get("Disk"), None);
    }

    #[test]
    fn test_persisted_selection_is_replayed() {
        let listing = backend(Config::default());
        let disk_id = listing.available_devices(Domain::Disk)[1].id().to_string();
        drop(listing);

        let mut config = Config::default();
        config.selection.set("Disk", Some(&disk_id));
        config.selection.set("Network", Some("net-stale"));
        let backend = backend(config);

        assert_eq!(backend.selected_device(Domain::Disk).map(|d| d.id().to_string()), Some(disk_id));
        assert!(backend.selected_device(Domain::Network).unwrap().is_aggregate());
    }

    #[test]
    fn test_cycle_network_persists() {
        let mut backend = backend(Config::default());
        let next = backend.cycle_network();
        assert!(!next.is_aggregate());
        assert_eq!(backend.config().selection.get("Network"), Some(next.id()));

        let back = backend.cycle_network();
        assert!(back.is_aggregate());
        assert_eq!(backend.config().selection.get("Network"), None);
    }

    #[test]
    fn test_fps_follows_display_mode() {
        let mut config = Config::default();
        config.game.display_mode = GameDisplayMode::AlwaysShow;
        let mut backend = backend(config);
        assert!(backend.tick(Some(144.0)).show_fps);

        backend.game().set_mode(GameDisplayMode::AlwaysHide);
        assert!(!backend.tick(Some(144.0)).show_fps);
    }

    #[test]
    fn test_fullscreen_known_game_shows_fps() {
        let window = ForegroundWindow {
            process_name: Some("cs2".to_string()),
            is_fullscreen: true,
        };
        let mut backend = MonitoringBackend::from_sources(
            sources(&counters(), Some(window)),
            HardwareMonitorService::new(None, None),
            Config::default(),
        );
        // Detected without an FPS value, but nothing to show yet
        let snapshot = backend.tick(None);
        assert!(!snapshot.show_fps);
        assert!(snapshot.game_score >= 0.5);
        assert!(backend.game().is_game_detected());

        assert!(backend.tick(Some(240.0)).show_fps);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut backend = backend(Config::default());
        backend.tick(None);
        backend.shutdown();
        backend.shutdown();

        let snapshot = backend.tick(None);
        assert_eq!(snapshot.disk, DiskReading::default());
        assert_eq!(snapshot.network, NetworkReading::default());
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut backend = backend(Config::default());
        let json = serde_json::to_value(backend.tick(None)).unwrap();
        assert_eq!(json["gpu"]["usage"], 85.0);
        assert!(json["timestamp"].is_string());
        assert!(json["fps"].is_null());
    }
}
