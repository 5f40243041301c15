//! In-memory stand-ins for OS sources, used by unit tests

use crate::core::cpu::{CpuTimes, CpuTimesSource};
use crate::core::memory::{MemoryStatus, MemoryStatusSource};
use crate::counters::{CounterProvider, PerfCounter};
use crate::error::{Error, Result};
use crate::game_activity::{ForegroundProbe, ForegroundWindow};
use crate::gpu::{AdapterDescriptor, GpuInventory, GpuMemory, NativeDevice, NativeGpuLibrary, PciLocation, Vendor};
use crate::hwmon::shared_memory::{HEADER_SIZE, READING_RECORD_SIZE, SENSOR_RECORD_SIZE, SIGNATURE};
use crate::hwmon::{HardwareNode, SensorNode, SensorTree};
use crate::network_monitor::{InterfaceDescriptor, NetworkInventory};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

fn counter_key(category: &str, counter: &str, instance: &str) -> String {
    format!("{}/{}/{}", category, counter, instance)
}

/// Counter provider whose values can be changed after counters are bound
#[derive(Clone, Default)]
pub struct FakeCounters {
    instances: HashMap<String, Vec<String>>,
    values: Rc<RefCell<HashMap<String, f64>>>,
    failing: Rc<RefCell<HashSet<String>>>,
}

impl FakeCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instances(mut self, category: &str, names: &[&str]) -> Self {
        self.instances.insert(
            category.to_string(),
            names.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    pub fn set(&self, category: &str, counter: &str, instance: &str, value: f64) {
        self.values
            .borrow_mut()
            .insert(counter_key(category, counter, instance), value);
    }

    pub fn fail(&self, category: &str, counter: &str, instance: &str) {
        self.failing
            .borrow_mut()
            .insert(counter_key(category, counter, instance));
    }
}

struct FakeCounter {
    key: String,
    values: Rc<RefCell<HashMap<String, f64>>>,
    failing: Rc<RefCell<HashSet<String>>>,
}

impl PerfCounter for FakeCounter {
    fn next_value(&mut self) -> Result<f64> {
        if self.failing.borrow().contains(&self.key) {
            return Err(Error::SampleFailed(self.key.clone()));
        }
        Ok(self.values.borrow().get(&self.key).copied().unwrap_or(0.0))
    }
}

impl CounterProvider for FakeCounters {
    fn instance_names(&self, category: &str) -> Result<Vec<String>> {
        self.instances
            .get(category)
            .cloned()
            .ok_or_else(|| Error::CounterNotFound(category.to_string()))
    }

    fn open(&self, category: &str, counter: &str, instance: &str) -> Result<Box<dyn PerfCounter>> {
        let known = self
            .instances
            .get(category)
            .map(|names| names.iter().any(|n| n == instance))
            .unwrap_or(false);
        if !known {
            return Err(Error::CounterNotFound(counter_key(category, counter, instance)));
        }

        Ok(Box::new(FakeCounter {
            key: counter_key(category, counter, instance),
            values: Rc::clone(&self.values),
            failing: Rc::clone(&self.failing),
        }))
    }
}

pub struct FakeGpuInventory(Vec<AdapterDescriptor>);

impl FakeGpuInventory {
    pub fn new(adapters: Vec<AdapterDescriptor>) -> Self {
        Self(adapters)
    }
}

impl GpuInventory for FakeGpuInventory {
    fn adapters(&self) -> Result<Vec<AdapterDescriptor>> {
        Ok(self.0.clone())
    }
}

/// Vendor library with fixed readings: usage as given, 60 °C, 4 of 24 GiB used
pub struct FakeNativeLibrary {
    vendor: Vendor,
    available: bool,
    initialized: bool,
    devices: Vec<(NativeDevice, f32)>,
    shutdowns: Rc<Cell<u32>>,
}

impl FakeNativeLibrary {
    pub fn new(vendor: Vendor) -> Self {
        Self {
            vendor,
            available: true,
            initialized: false,
            devices: Vec::new(),
            shutdowns: Rc::new(Cell::new(0)),
        }
    }

    pub fn with_device(mut self, index: u32, name: &str, pci: Option<(u32, u32)>, usage: f32) -> Self {
        let device = NativeDevice {
            index,
            name: name.to_string(),
            pci: pci.map(|(bus, device)| PciLocation { bus, device, function: 0 }),
        };
        self.devices.push((device, usage));
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Number of effective shutdowns, shared with the library
    pub fn shutdown_counter(&self) -> Rc<Cell<u32>> {
        Rc::clone(&self.shutdowns)
    }

    fn device(&self, index: u32) -> Result<&(NativeDevice, f32)> {
        if !self.initialized {
            return Err(Error::Unavailable("not initialized".to_string()));
        }
        self.devices
            .iter()
            .find(|(d, _)| d.index == index)
            .ok_or_else(|| Error::SampleFailed(format!("no device {}", index)))
    }
}

impl NativeGpuLibrary for FakeNativeLibrary {
    fn vendor(&self) -> Vendor {
        self.vendor
    }

    fn try_init(&mut self) -> bool {
        self.initialized = self.available;
        self.initialized
    }

    fn devices(&self) -> Result<Vec<NativeDevice>> {
        Ok(self.devices.iter().map(|(d, _)| d.clone()).collect())
    }

    fn sample_usage(&self, index: u32) -> Result<f32> {
        self.device(index).map(|(_, usage)| *usage)
    }

    fn sample_memory(&self, index: u32) -> Result<GpuMemory> {
        self.device(index).map(|_| GpuMemory {
            used: 4 * 1024 * 1024 * 1024,
            total: 24 * 1024 * 1024 * 1024,
        })
    }

    fn sample_temperature(&self, index: u32) -> Result<f32> {
        self.device(index).map(|_| 60.0)
    }

    fn shutdown(&mut self) {
        if self.initialized {
            self.initialized = false;
            self.shutdowns.set(self.shutdowns.get() + 1);
        }
    }
}

pub struct FakeNetworkInventory(pub Vec<InterfaceDescriptor>);

impl NetworkInventory for FakeNetworkInventory {
    fn interfaces(&self) -> Result<Vec<InterfaceDescriptor>> {
        Ok(self.0.clone())
    }
}

/// Sensor tree whose sensor values can be changed between reads
#[derive(Clone, Default)]
pub struct FakeSensorTree {
    hardware: Vec<HardwareNode>,
    sensors: Rc<RefCell<Vec<(String, SensorNode)>>>,
    updates: Rc<Cell<u32>>,
}

impl FakeSensorTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hardware(mut self, node: HardwareNode) -> Self {
        self.hardware.push(node);
        self
    }

    /// Attach a sensor to the hardware node `parent`
    pub fn with_sensor(self, parent: &str, sensor: SensorNode) -> Self {
        self.sensors.borrow_mut().push((parent.to_string(), sensor));
        self
    }

    pub fn set_value(&self, identifier: &str, value: Option<f32>) {
        for (_, sensor) in self.sensors.borrow_mut().iter_mut() {
            if sensor.identifier == identifier {
                sensor.value = value;
            }
        }
    }

    pub fn update_count(&self) -> u32 {
        self.updates.get()
    }
}

impl SensorTree for FakeSensorTree {
    fn update(&mut self) -> Result<()> {
        self.updates.set(self.updates.get() + 1);
        Ok(())
    }

    fn hardware(&self) -> Result<Vec<HardwareNode>> {
        Ok(self.hardware.clone())
    }

    fn sensors(&self, hardware: &HardwareNode) -> Result<Vec<SensorNode>> {
        Ok(self
            .sensors
            .borrow()
            .iter()
            .filter(|(parent, _)| *parent == hardware.identifier)
            .map(|(_, sensor)| sensor.clone())
            .collect())
    }

    fn sensor_value(&self, identifier: &str) -> Result<Option<f32>> {
        self.sensors
            .borrow()
            .iter()
            .find(|(_, sensor)| sensor.identifier == identifier)
            .map(|(_, sensor)| sensor.value)
            .ok_or_else(|| Error::SampleFailed(format!("sensor {} gone", identifier)))
    }
}

pub struct FakeForeground(Option<ForegroundWindow>);

impl FakeForeground {
    pub fn new(window: Option<ForegroundWindow>) -> Self {
        Self(window)
    }
}

impl ForegroundProbe for FakeForeground {
    fn foreground(&self) -> Option<ForegroundWindow> {
        self.0.clone()
    }
}

/// CPU times replayed from a script; the last entry repeats
pub struct ScriptedCpuTimes {
    script: Vec<CpuTimes>,
    next: Cell<usize>,
}

impl ScriptedCpuTimes {
    pub fn new(script: Vec<CpuTimes>) -> Self {
        Self {
            script,
            next: Cell::new(0),
        }
    }
}

impl CpuTimesSource for ScriptedCpuTimes {
    fn system_times(&self) -> Result<CpuTimes> {
        let i = self.next.get();
        self.next.set(i + 1);
        self.script
            .get(i)
            .or_else(|| self.script.last())
            .copied()
            .ok_or_else(|| Error::Unavailable("no cpu times".to_string()))
    }
}

pub struct FixedMemoryStatus(pub Option<MemoryStatus>);

impl MemoryStatusSource for FixedMemoryStatus {
    fn memory_status(&self) -> Result<MemoryStatus> {
        self.0
            .ok_or_else(|| Error::Unavailable("no memory status".to_string()))
    }
}

/// Builds a sensor shared-memory image with the packed little-endian layout
#[derive(Clone)]
pub struct SegmentBuilder {
    signature: u32,
    sensors: Vec<String>,
    readings: Vec<(u32, u32, String, f64)>,
}

impl SegmentBuilder {
    pub fn new() -> Self {
        Self {
            signature: SIGNATURE,
            sensors: Vec::new(),
            readings: Vec::new(),
        }
    }

    pub fn signature(mut self, signature: u32) -> Self {
        self.signature = signature;
        self
    }

    pub fn sensor(mut self, name: &str) -> Self {
        self.sensors.push(name.to_string());
        self
    }

    /// Add a reading of `reading_type` (1 = temperature) owned by sensor `sensor_index`
    pub fn reading(mut self, reading_type: u32, sensor_index: u32, label: &str, value: f64) -> Self {
        self.readings
            .push((reading_type, sensor_index, label.to_string(), value));
        self
    }

    pub fn with_value(mut self, reading: usize, value: f64) -> Self {
        if let Some(entry) = self.readings.get_mut(reading) {
            entry.3 = value;
        }
        self
    }

    pub fn build(&self) -> Vec<u8> {
        fn put_str(buf: &mut [u8], text: &str) {
            let bytes = text.as_bytes();
            let n = bytes.len().min(buf.len() - 1);
            buf[..n].copy_from_slice(&bytes[..n]);
        }

        let sensor_offset = HEADER_SIZE;
        let reading_offset = sensor_offset + self.sensors.len() * SENSOR_RECORD_SIZE;
        let total = reading_offset + self.readings.len() * READING_RECORD_SIZE;
        let mut out = vec![0u8; total];

        let header: [u32; 2] = [self.signature, 2];
        out[0..4].copy_from_slice(&header[0].to_le_bytes());
        out[4..8].copy_from_slice(&header[1].to_le_bytes());
        out[12..20].copy_from_slice(&133_000_000_000i64.to_le_bytes());
        for (offset, value) in [
            (20, sensor_offset as u32),
            (24, SENSOR_RECORD_SIZE as u32),
            (28, self.sensors.len() as u32),
            (32, reading_offset as u32),
            (36, READING_RECORD_SIZE as u32),
            (40, self.readings.len() as u32),
        ] {
            out[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }

        for (i, name) in self.sensors.iter().enumerate() {
            let base = sensor_offset + i * SENSOR_RECORD_SIZE;
            out[base..base + 4].copy_from_slice(&(0xF000_0000u32 + i as u32).to_le_bytes());
            put_str(&mut out[base + 8..base + 136], name);
        }

        for (i, (kind, sensor, label, value)) in self.readings.iter().enumerate() {
            let base = reading_offset + i * READING_RECORD_SIZE;
            out[base..base + 4].copy_from_slice(&kind.to_le_bytes());
            out[base + 4..base + 8].copy_from_slice(&sensor.to_le_bytes());
            out[base + 8..base + 12].copy_from_slice(&(i as u32).to_le_bytes());
            put_str(&mut out[base + 12..base + 140], label);
            put_str(&mut out[base + 268..base + 284], "°C");
            out[base + 284..base + 292].copy_from_slice(&value.to_le_bytes());
        }

        out
    }
}
