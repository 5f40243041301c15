// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2024 NervoSys

//! GPU monitor with multi-vendor dispatch
//!
//! Adapters are enumerated once from the OS inventory, classified by vendor and
//! filtered for software renderers. Each remaining GPU is then bound to the
//! richest backend available:
//!
//! 1. the vendor's native library (NVML for NVIDIA, ADL for AMD), matched by
//!    PCI location when both sides report one and by position otherwise
//! 2. the "GPU Engine" performance counter of the adapter's LUID (usage only,
//!    plus dedicated memory from "GPU Adapter Memory")
//!
//! Counters carry no adapter name, so LUID groups are paired with adapters by
//! their position in the unfiltered OS inventory. Every adapter publishes a
//! group, including natively bound GPUs and filtered software renderers.
//!
//! Every sample call dispatches on [`GpuBackend`]. Failures are logged and
//! reported as zero or `None` for that tick.
//!
//! ```no_run
//! use minimon::gpu::GpuMonitor;
//! use minimon::platform::SystemSources;
//!
//! let sources = SystemSources::detect();
//! let mut gpus = GpuMonitor::new(
//!     sources.gpu_inventory.as_ref(),
//!     sources.counters.as_ref(),
//!     sources.gpu_libraries,
//! );
//! let reading = gpus.update();
//! println!("{}: {:.0}%", gpus.device_name(), reading.usage);
//! ```
//!
//! # Platform Support
//!
//! | Backend | Windows | Elsewhere | Requirements |
//! |---------|---------|-----------|--------------|
//! | NVML    | ✅      | ✅        | nvml.dll / libnvidia-ml.so |
//! | ADL     | ✅      | ❌        | atiadlxx.dll |
//! | Counter | ✅      | ❌        | WDDM 2.x GPU performance counters |

pub mod traits;

#[cfg(feature = "nvidia")]
pub mod nvidia;

#[cfg(all(windows, feature = "amd"))]
pub mod amd;

pub use traits::{
    AdapterDescriptor, GpuInventory, GpuMemory, NativeDevice, NativeGpuLibrary, PciLocation,
    Vendor,
};

use crate::counters::{self, CounterProvider, PerfCounter};
use crate::device::{self, DeviceInfo, DeviceSelection, DeviceType, SelectionState};
use serde::{Deserialize, Serialize};

/// Adapter names containing any of these are software or remote renderers
pub const VIRTUAL_ADAPTER_MARKERS: &[&str] = &["Microsoft Basic", "Remote", "Virtual", "Software"];

/// True if the adapter name marks a virtual or software renderer
pub fn is_virtual_adapter(name: &str) -> bool {
    VIRTUAL_ADAPTER_MARKERS
        .iter()
        .any(|marker| name.contains(marker))
}

/// Extract the adapter LUID from a GPU counter instance name
///
/// `"pid_42_luid_0x00000000_0x0000D1B2_phys_0_eng_0_engtype_3D"` yields
/// `"luid_0x00000000_0x0000D1B2"`.
pub fn extract_luid(instance: &str) -> Option<String> {
    let start = instance.find("luid_")?;
    let rest = &instance[start + "luid_".len()..];
    let mut parts = rest.splitn(3, '_');
    let high = parts.next().filter(|p| p.starts_with("0x"))?;
    match parts.next().filter(|p| p.starts_with("0x")) {
        Some(low) => Some(format!("luid_{}_{}", high, low)),
        None => Some(format!("luid_{}", high)),
    }
}

/// Vendor libraries offered to the monitor
#[derive(Default)]
pub struct NativeLibraries {
    pub nvidia: Option<Box<dyn NativeGpuLibrary>>,
    pub amd: Option<Box<dyn NativeGpuLibrary>>,
}

impl NativeLibraries {
    pub fn none() -> Self {
        Self::default()
    }

    fn get(&self, vendor: Vendor) -> Option<&dyn NativeGpuLibrary> {
        match vendor {
            Vendor::Nvidia => self.nvidia.as_deref(),
            Vendor::Amd => self.amd.as_deref(),
            _ => None,
        }
    }

    fn slot_mut(&mut self, vendor: Vendor) -> Option<&mut Option<Box<dyn NativeGpuLibrary>>> {
        match vendor {
            Vendor::Nvidia => Some(&mut self.nvidia),
            Vendor::Amd => Some(&mut self.amd),
            _ => None,
        }
    }

    fn shutdown_all(&mut self) {
        for lib in [&mut self.nvidia, &mut self.amd].into_iter().flatten() {
            lib.shutdown();
        }
        self.nvidia = None;
        self.amd = None;
    }
}

/// How an OS adapter was paired with a native library device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Correlation {
    /// Both sides reported the same PCI bus and device
    PciBus,
    /// k-th adapter of the vendor paired with the library's k-th device
    Positional,
}

/// Counters bound for the fallback path
pub struct CounterBinding {
    instance: String,
    luid: Option<String>,
    usage: Box<dyn PerfCounter>,
    memory: Option<Box<dyn PerfCounter>>,
}

impl CounterBinding {
    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn luid(&self) -> Option<&str> {
        self.luid.as_deref()
    }
}

/// Acquisition backend bound to one GPU
pub enum GpuBackend {
    Nvidia { index: u32 },
    Amd { index: u32 },
    Counter(CounterBinding),
    Unavailable,
}

impl GpuBackend {
    pub fn name(&self) -> &'static str {
        match self {
            GpuBackend::Nvidia { .. } => "NVML",
            GpuBackend::Amd { .. } => "ADL",
            GpuBackend::Counter(_) => "Performance Counter",
            GpuBackend::Unavailable => "Unavailable",
        }
    }

    fn native(vendor: Vendor, index: u32) -> Self {
        match vendor {
            Vendor::Nvidia => GpuBackend::Nvidia { index },
            Vendor::Amd => GpuBackend::Amd { index },
            _ => GpuBackend::Unavailable,
        }
    }
}

/// One sample of the selected GPU
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuReading {
    /// Utilization percentage (0-100)
    pub usage: f32,
    pub memory: GpuMemory,
    /// Degrees Celsius; `None` when the backend has no sensor
    pub temperature: Option<f32>,
}

/// A GPU bound to its backend
pub struct GpuDevice {
    info: DeviceInfo,
    vendor: Vendor,
    pci: Option<PciLocation>,
    adapter_ram: u64,
    backend: GpuBackend,
    correlation: Option<Correlation>,
    pub is_usage_available: bool,
    pub is_memory_available: bool,
    pub is_temperature_available: bool,
    pub use_native_api: bool,
    last: GpuReading,
}

impl GpuDevice {
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn vendor(&self) -> Vendor {
        self.vendor
    }

    pub fn pci(&self) -> Option<PciLocation> {
        self.pci
    }

    pub fn backend(&self) -> &GpuBackend {
        &self.backend
    }

    /// How the native handle was matched; `None` when no native library is used
    pub fn correlation(&self) -> Option<Correlation> {
        self.correlation
    }

    /// Values from the most recent sample
    pub fn last_reading(&self) -> GpuReading {
        self.last
    }

    fn sample_usage(&mut self, libs: &NativeLibraries) -> f32 {
        if !self.is_usage_available {
            return 0.0;
        }

        let result = match &mut self.backend {
            GpuBackend::Nvidia { index } => native_call(libs, Vendor::Nvidia, |lib| lib.sample_usage(*index)),
            GpuBackend::Amd { index } => native_call(libs, Vendor::Amd, |lib| lib.sample_usage(*index)),
            GpuBackend::Counter(binding) => binding.usage.next_value().map(|v| v as f32),
            GpuBackend::Unavailable => return 0.0,
        };

        let usage = match result {
            Ok(value) if value.is_finite() => value.clamp(0.0, 100.0),
            Ok(_) => 0.0,
            Err(e) => {
                log::debug!("GPU usage sample failed for {}: {}", self.info.display_name(), e);
                0.0
            }
        };
        self.last.usage = usage;
        usage
    }

    fn sample_memory(&mut self, libs: &NativeLibraries) -> GpuMemory {
        if !self.is_memory_available {
            return GpuMemory::default();
        }

        let total = self.adapter_ram;
        let result = match &mut self.backend {
            GpuBackend::Nvidia { index } => native_call(libs, Vendor::Nvidia, |lib| lib.sample_memory(*index)),
            GpuBackend::Amd { index } => native_call(libs, Vendor::Amd, |lib| lib.sample_memory(*index)),
            GpuBackend::Counter(binding) => match binding.memory.as_mut() {
                Some(counter) => counter.next_value().map(|used| GpuMemory {
                    used: used.max(0.0) as u64,
                    total,
                }),
                None => return GpuMemory::default(),
            },
            GpuBackend::Unavailable => return GpuMemory::default(),
        };

        let memory = result.unwrap_or_else(|e| {
            log::debug!("GPU memory sample failed for {}: {}", self.info.display_name(), e);
            GpuMemory::default()
        });
        self.last.memory = memory;
        memory
    }

    fn sample_temperature(&mut self, libs: &NativeLibraries) -> Option<f32> {
        if !self.is_temperature_available {
            return None;
        }

        let result = match &self.backend {
            GpuBackend::Nvidia { index } => native_call(libs, Vendor::Nvidia, |lib| lib.sample_temperature(*index)),
            GpuBackend::Amd { index } => native_call(libs, Vendor::Amd, |lib| lib.sample_temperature(*index)),
            GpuBackend::Counter(_) | GpuBackend::Unavailable => return None,
        };

        let temperature = match result {
            Ok(value) if value > 0.0 && value < 150.0 => Some(value),
            Ok(_) => None,
            Err(e) => {
                log::debug!("GPU temperature sample failed for {}: {}", self.info.display_name(), e);
                None
            }
        };
        self.last.temperature = temperature;
        temperature
    }

    fn release(&mut self) {
        self.backend = GpuBackend::Unavailable;
        self.is_usage_available = false;
        self.is_memory_available = false;
        self.is_temperature_available = false;
        self.use_native_api = false;
    }
}

fn native_call<T>(
    libs: &NativeLibraries,
    vendor: Vendor,
    call: impl FnOnce(&dyn NativeGpuLibrary) -> crate::Result<T>,
) -> crate::Result<T> {
    match libs.get(vendor) {
        Some(lib) => call(lib),
        None => Err(crate::Error::Unavailable(format!("{} library released", vendor))),
    }
}

/// Adapter that survived filtering, before backend binding
struct Candidate {
    adapter: AdapterDescriptor,
    vendor: Vendor,
    /// Position among adapters of the same vendor
    vendor_position: usize,
    /// Position in the unfiltered OS adapter list
    os_position: usize,
}

/// GPU monitor
pub struct GpuMonitor {
    devices: Vec<GpuDevice>,
    libraries: NativeLibraries,
    selection: SelectionState,
    disposed: bool,
}

impl GpuMonitor {
    /// Enumerate adapters and bind each to a backend
    pub fn new(
        inventory: &dyn GpuInventory,
        counters: &dyn CounterProvider,
        mut libraries: NativeLibraries,
    ) -> Self {
        let adapters = inventory.adapters().unwrap_or_else(|e| {
            log::info!("GPU inventory unavailable: {}", e);
            Vec::new()
        });

        let candidates = filter_adapters(adapters);
        let native = init_native_libraries(&mut libraries, &candidates);
        let engine_groups = engine_instances_by_luid(counters);
        let memory_instances = counters
            .instance_names(counters::GPU_ADAPTER_MEMORY)
            .unwrap_or_default();

        let mut devices = Vec::with_capacity(candidates.len());
        for (position, candidate) in candidates.into_iter().enumerate() {
            let binding = native
                .iter()
                .find(|(pos, _, _)| *pos == position)
                .map(|(_, index, correlation)| (*index, *correlation));

            let device = match binding {
                Some((index, correlation)) => bind_native(candidate, index, correlation),
                None => {
                    let group = engine_groups.get(candidate.os_position);
                    bind_counter(candidate, group, &memory_instances, counters)
                }
            };

            log::info!(
                "GPU {}: {} ({}) via {}",
                position,
                device.info.display_name(),
                device.vendor,
                device.backend.name()
            );
            devices.push(device);
        }

        Self {
            devices,
            libraries,
            selection: SelectionState::new(),
            disposed: false,
        }
    }

    /// All bound GPUs in enumeration order
    pub fn devices(&self) -> &[GpuDevice] {
        &self.devices
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn is_available(&self) -> bool {
        !self.disposed && !self.devices.is_empty()
    }

    /// Display name of the selected GPU, or a placeholder when none exists
    pub fn device_name(&self) -> String {
        self.current_device_display_name()
    }

    fn selected_index(&self) -> Option<usize> {
        match self.selection.selected_id() {
            None => (!self.devices.is_empty()).then_some(0),
            Some(id) => self.devices.iter().position(|d| d.info.id() == id),
        }
    }

    /// Utilization of the selected GPU (0-100)
    pub fn update_usage(&mut self) -> f32 {
        match self.selected_index() {
            Some(i) => self.devices[i].sample_usage(&self.libraries),
            None => 0.0,
        }
    }

    /// Memory of the selected GPU
    pub fn update_memory(&mut self) -> GpuMemory {
        match self.selected_index() {
            Some(i) => self.devices[i].sample_memory(&self.libraries),
            None => GpuMemory::default(),
        }
    }

    /// Temperature of the selected GPU
    pub fn update_temperature(&mut self) -> Option<f32> {
        match self.selected_index() {
            Some(i) => self.devices[i].sample_temperature(&self.libraries),
            None => None,
        }
    }

    /// Sample usage, memory and temperature of the selected GPU
    pub fn update(&mut self) -> GpuReading {
        GpuReading {
            usage: self.update_usage(),
            memory: self.update_memory(),
            temperature: self.update_temperature(),
        }
    }

    /// Release native libraries and counters. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        for device in &mut self.devices {
            device.release();
        }
        self.libraries.shutdown_all();
        log::debug!("GPU monitor disposed");
    }
}

impl DeviceSelection for GpuMonitor {
    fn available_devices(&self) -> Vec<DeviceInfo> {
        self.devices.iter().map(|d| d.info.clone()).collect()
    }

    fn selected_device(&self) -> Option<DeviceInfo> {
        self.selected_index().map(|i| self.devices[i].info.clone())
    }

    fn select_device(&mut self, id: Option<&str>) -> bool {
        let devices = &self.devices;
        self.selection
            .select(id, |id| devices.iter().any(|d| d.info.id() == id))
    }

    fn current_device_display_name(&self) -> String {
        self.selected_index()
            .map(|i| self.devices[i].info.display_name().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "GPU".to_string())
    }
}

impl Drop for GpuMonitor {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn filter_adapters(adapters: Vec<AdapterDescriptor>) -> Vec<Candidate> {
    let mut per_vendor: [usize; 4] = [0; 4];
    let mut candidates = Vec::new();

    for (os_position, adapter) in adapters.into_iter().enumerate() {
        if is_virtual_adapter(&adapter.name) {
            log::debug!("Skipping virtual adapter '{}'", adapter.name);
            continue;
        }
        let vendor = Vendor::classify(&adapter.name, &adapter.pnp_device_id);
        let slot = match vendor {
            Vendor::Nvidia => 0,
            Vendor::Amd => 1,
            Vendor::Intel => 2,
            Vendor::Unknown => 3,
        };
        let vendor_position = per_vendor[slot];
        per_vendor[slot] += 1;

        candidates.push(Candidate {
            adapter,
            vendor,
            vendor_position,
            os_position,
        });
    }

    candidates
}

/// Initialise each vendor library that has adapters and pair its devices
///
/// Returns `(candidate position, native index, correlation)` triples.
fn init_native_libraries(
    libraries: &mut NativeLibraries,
    candidates: &[Candidate],
) -> Vec<(usize, u32, Correlation)> {
    let mut pairs = Vec::new();

    for vendor in [Vendor::Nvidia, Vendor::Amd] {
        let Some(slot) = libraries.slot_mut(vendor) else {
            continue;
        };

        let wanted: Vec<(usize, &Candidate)> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.vendor == vendor)
            .collect();
        if wanted.is_empty() {
            if let Some(mut lib) = slot.take() {
                lib.shutdown();
            }
            continue;
        }

        let Some(lib) = slot.as_mut() else {
            continue;
        };
        if !lib.try_init() {
            log::info!("{} native library not available, using counters", vendor);
            *slot = None;
            continue;
        }

        let native = match lib.devices() {
            Ok(devices) => devices,
            Err(e) => {
                log::info!("{} device enumeration failed: {}", vendor, e);
                lib.shutdown();
                *slot = None;
                continue;
            }
        };

        pairs.extend(correlate(&wanted, &native));
    }

    pairs
}

/// Pair OS adapters of one vendor with native devices
///
/// PCI location wins; adapters left over take the native device at their
/// vendor position if nobody claimed it.
fn correlate(
    wanted: &[(usize, &Candidate)],
    native: &[NativeDevice],
) -> Vec<(usize, u32, Correlation)> {
    let mut claimed = vec![false; native.len()];
    let mut pairs = Vec::new();
    let mut unmatched = Vec::new();

    for &(position, candidate) in wanted {
        let hit = candidate.adapter.pci.and_then(|pci| {
            native.iter().enumerate().find(|(i, dev)| {
                !claimed[*i] && dev.pci.map(|p| p.same_slot(&pci)).unwrap_or(false)
            })
        });
        match hit {
            Some((i, dev)) => {
                claimed[i] = true;
                pairs.push((position, dev.index, Correlation::PciBus));
            }
            None => unmatched.push((position, candidate)),
        }
    }

    for (position, candidate) in unmatched {
        let k = candidate.vendor_position;
        if k < native.len() && !claimed[k] {
            claimed[k] = true;
            log::debug!(
                "Pairing '{}' with native device {} by position",
                candidate.adapter.name,
                native[k].index
            );
            pairs.push((position, native[k].index, Correlation::Positional));
        }
    }

    pairs
}

fn gpu_device_info(adapter: &AdapterDescriptor, vendor: Vendor) -> DeviceInfo {
    let native_id = if adapter.pnp_device_id.is_empty() {
        &adapter.name
    } else {
        &adapter.pnp_device_id
    };
    let description = if adapter.adapter_compatibility.is_empty() {
        vendor.to_string()
    } else {
        adapter.adapter_compatibility.clone()
    };

    DeviceInfo::new(
        device::device_id("gpu", native_id),
        adapter.name.trim(),
        short_gpu_name(&adapter.name),
        description,
        DeviceType::Gpu,
        true,
    )
}

/// Drop vendor boilerplate ("NVIDIA GeForce RTX 4090" -> "RTX 4090")
fn short_gpu_name(name: &str) -> String {
    let mut short = name.trim().to_string();
    for prefix in ["NVIDIA ", "GeForce ", "AMD ", "Radeon ", "Intel(R) ", "Intel "] {
        if let Some(rest) = short.strip_prefix(prefix) {
            short = rest.to_string();
        }
    }
    short
}

fn bind_native(candidate: Candidate, index: u32, correlation: Correlation) -> GpuDevice {
    let info = gpu_device_info(&candidate.adapter, candidate.vendor);
    GpuDevice {
        info,
        vendor: candidate.vendor,
        pci: candidate.adapter.pci,
        adapter_ram: candidate.adapter.adapter_ram,
        backend: GpuBackend::native(candidate.vendor, index),
        correlation: Some(correlation),
        is_usage_available: true,
        is_memory_available: true,
        is_temperature_available: true,
        use_native_api: true,
        last: GpuReading::default(),
    }
}

fn bind_counter(
    candidate: Candidate,
    engine_group: Option<&(String, Vec<String>)>,
    memory_instances: &[String],
    counters: &dyn CounterProvider,
) -> GpuDevice {
    let info = gpu_device_info(&candidate.adapter, candidate.vendor);
    let mut device = GpuDevice {
        info,
        vendor: candidate.vendor,
        pci: candidate.adapter.pci,
        adapter_ram: candidate.adapter.adapter_ram,
        backend: GpuBackend::Unavailable,
        correlation: None,
        is_usage_available: false,
        is_memory_available: false,
        is_temperature_available: false,
        use_native_api: false,
        last: GpuReading::default(),
    };

    let Some((luid, instances)) = engine_group else {
        log::info!("No GPU engine counters for '{}'", device.info.display_name());
        return device;
    };

    let Some(instance) = instances
        .iter()
        .find(|name| name.contains("engtype_3D"))
        .or_else(|| instances.first())
    else {
        return device;
    };

    let usage = match counters.open(counters::GPU_ENGINE, counters::GPU_UTILIZATION, instance) {
        Ok(counter) => counter,
        Err(e) => {
            log::info!("GPU engine counter '{}' unavailable: {}", instance, e);
            return device;
        }
    };

    let memory = memory_instances
        .iter()
        .find(|name| name.contains(luid.as_str()))
        .and_then(|name| {
            counters
                .open(counters::GPU_ADAPTER_MEMORY, counters::GPU_DEDICATED_USAGE, name)
                .map_err(|e| log::debug!("GPU memory counter '{}' unavailable: {}", name, e))
                .ok()
        });

    device.is_usage_available = true;
    device.is_memory_available = memory.is_some();
    device.backend = GpuBackend::Counter(CounterBinding {
        instance: instance.clone(),
        luid: Some(luid.clone()),
        usage,
        memory,
    });
    device
}

/// GPU engine instances grouped by adapter LUID, in first-seen order
///
/// Group `i` belongs to adapter `i` of the unfiltered inventory.
fn engine_instances_by_luid(counters: &dyn CounterProvider) -> Vec<(String, Vec<String>)> {
    let instances = match counters.instance_names(counters::GPU_ENGINE) {
        Ok(instances) => instances,
        Err(e) => {
            log::debug!("GPU engine counters unavailable: {}", e);
            return Vec::new();
        }
    };

    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for instance in instances {
        let Some(luid) = extract_luid(&instance) else {
            continue;
        };
        match groups.iter_mut().find(|(key, _)| *key == luid) {
            Some((_, members)) => members.push(instance),
            None => groups.push((luid, vec![instance])),
        }
    }
    groups
}
