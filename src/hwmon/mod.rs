// CPU temperature aggregation
//
// Two sources, tried in order when the service is built:
//
// 1. An open-source hardware sensor tree (LibreHardwareMonitor or
//    OpenHardwareMonitor). The CPU node is searched first, then the
//    motherboard and its Super I/O children. Up to three sensors are kept:
//    package (or Tctl/Tdie/core average), core max, motherboard CPU.
// 2. The shared-memory sensor table, probed once when the tree yields nothing.
//
// Discovery is one-shot; a sensor reading zero at startup is skipped until
// `rediscover` is called.

pub mod shared_memory;

pub use shared_memory::{SensorSegment, SharedMemorySensorReader};

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Upper bound for CPU-node readings
const MAX_CPU_TEMP: f32 = 150.0;
/// Upper bound for core-max and motherboard readings
const MAX_BOARD_TEMP: f32 = 120.0;

/// Type of hardware node in the sensor tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HwType {
    Cpu,
    Motherboard,
    SuperIo,
    Other,
}

impl HwType {
    /// Map a sensor-tree hardware type name
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "cpu" => HwType::Cpu,
            "motherboard" | "mainboard" => HwType::Motherboard,
            "superio" => HwType::SuperIo,
            _ => HwType::Other,
        }
    }
}

/// Type of sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HwSensorType {
    Temperature,
    Load,
    Other,
}

impl HwSensorType {
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "temperature" => HwSensorType::Temperature,
            "load" => HwSensorType::Load,
            _ => HwSensorType::Other,
        }
    }
}

/// Hardware node in the sensor tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareNode {
    pub identifier: String,
    pub name: String,
    pub hardware_type: HwType,
    /// Identifier of the parent node (Super I/O chips hang off the motherboard)
    pub parent: Option<String>,
}

/// Sensor attached to a hardware node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorNode {
    pub identifier: String,
    pub name: String,
    pub sensor_type: HwSensorType,
    pub value: Option<f32>,
}

/// Hardware sensor tree
pub trait SensorTree {
    /// Refresh sensor values
    fn update(&mut self) -> Result<()>;

    fn hardware(&self) -> Result<Vec<HardwareNode>>;

    fn sensors(&self, hardware: &HardwareNode) -> Result<Vec<SensorNode>>;

    /// Live value of one sensor
    fn sensor_value(&self, identifier: &str) -> Result<Option<f32>>;
}

/// Opens the shared-memory fallback on demand
pub type FallbackOpener = Box<dyn Fn() -> Option<SharedMemorySensorReader>>;

/// Where CPU temperature currently comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureSource {
    SensorTree,
    SharedMemory,
    None,
}

/// Sensors chosen from the tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorSlots {
    pub package: Option<String>,
    pub core_max: Option<String>,
    pub motherboard: Option<String>,
}

impl SensorSlots {
    pub fn is_empty(&self) -> bool {
        self.package.is_none() && self.core_max.is_none() && self.motherboard.is_none()
    }

    fn ordered(&self) -> [(Option<&str>, f32); 3] {
        [
            (self.package.as_deref(), MAX_CPU_TEMP),
            (self.core_max.as_deref(), MAX_BOARD_TEMP),
            (self.motherboard.as_deref(), MAX_BOARD_TEMP),
        ]
    }
}

fn plausible(value: Option<f32>, max: f32) -> Option<f32> {
    value.filter(|v| *v > 0.0 && *v < max)
}

fn is_package_candidate(name: &str) -> bool {
    name.contains("tctl") || name.contains("tdie") || (name.contains("core") && name.contains("average"))
}

/// Also matches Super-I/O "CPUTIN"
fn is_motherboard_cpu_sensor(name: &str) -> bool {
    name.contains("cpu") || name.contains("core")
}

/// Walk the tree and choose sensors
///
/// A "package" sensor ends the search immediately.
pub fn discover_sensors(tree: &dyn SensorTree) -> Result<SensorSlots> {
    let hardware = tree.hardware()?;
    let mut slots = SensorSlots::default();

    for node in hardware.iter().filter(|h| h.hardware_type == HwType::Cpu) {
        for sensor in tree.sensors(node)? {
            if sensor.sensor_type != HwSensorType::Temperature {
                continue;
            }
            let name = sensor.name.to_lowercase();

            if name.contains("package") && plausible(sensor.value, MAX_CPU_TEMP).is_some() {
                log::debug!("CPU package sensor: {} ({})", sensor.name, sensor.identifier);
                slots.package = Some(sensor.identifier);
                return Ok(slots);
            }
            if is_package_candidate(&name) && plausible(sensor.value, MAX_CPU_TEMP).is_some() {
                slots.package.get_or_insert(sensor.identifier);
            } else if name.contains("core")
                && name.contains("max")
                && plausible(sensor.value, MAX_BOARD_TEMP).is_some()
            {
                slots.core_max.get_or_insert(sensor.identifier);
            }
        }
    }

    let boards: Vec<&str> = hardware
        .iter()
        .filter(|h| h.hardware_type == HwType::Motherboard)
        .map(|h| h.identifier.as_str())
        .collect();
    let board_nodes = hardware.iter().filter(|h| {
        h.hardware_type == HwType::Motherboard
            || (h.hardware_type == HwType::SuperIo
                && h.parent.as_deref().map(|p| boards.contains(&p)).unwrap_or(true))
    });

    for node in board_nodes {
        if slots.motherboard.is_some() {
            break;
        }
        for sensor in tree.sensors(node)? {
            if sensor.sensor_type != HwSensorType::Temperature {
                continue;
            }
            let name = sensor.name.to_lowercase();
            if is_motherboard_cpu_sensor(&name) && plausible(sensor.value, MAX_BOARD_TEMP).is_some() {
                log::debug!("Motherboard CPU sensor: {} ({})", sensor.name, sensor.identifier);
                slots.motherboard = Some(sensor.identifier);
                break;
            }
        }
    }

    Ok(slots)
}

/// CPU temperature service
pub struct HardwareMonitorService {
    tree: Option<Box<dyn SensorTree>>,
    slots: SensorSlots,
    fallback: Option<SharedMemorySensorReader>,
    fallback_opener: Option<FallbackOpener>,
}

impl HardwareMonitorService {
    pub fn new(tree: Option<Box<dyn SensorTree>>, fallback_opener: Option<FallbackOpener>) -> Self {
        let mut service = Self {
            tree,
            slots: SensorSlots::default(),
            fallback: None,
            fallback_opener,
        };
        service.rediscover();
        service
    }

    /// Service over the platform's sensor tree and shared-memory segment
    pub fn system() -> Self {
        let opener: FallbackOpener = Box::new(SharedMemorySensorReader::open);
        Self::new(crate::platform::open_sensor_tree(), Some(opener))
    }

    /// Rebuild the sensor choice from scratch
    pub fn rediscover(&mut self) -> TemperatureSource {
        self.slots = SensorSlots::default();
        if let Some(mut reader) = self.fallback.take() {
            reader.close();
        }

        if let Some(tree) = self.tree.as_mut() {
            if let Err(e) = tree.update() {
                log::debug!("Sensor tree update failed: {}", e);
            }
            match discover_sensors(&**tree) {
                Ok(slots) => self.slots = slots,
                Err(e) => log::info!("Sensor tree walk failed: {}", e),
            }
        }

        if !self.slots.is_empty() {
            log::info!("CPU temperature from sensor tree: {:?}", self.slots);
            return TemperatureSource::SensorTree;
        }

        let probed = self
            .fallback_opener
            .as_ref()
            .and_then(|open| open())
            .filter(|reader| reader.get_cpu_temperature().is_some());
        match probed {
            Some(reader) => {
                log::info!("CPU temperature from shared memory");
                self.fallback = Some(reader);
                TemperatureSource::SharedMemory
            }
            None => {
                log::info!("No CPU temperature source available");
                TemperatureSource::None
            }
        }
    }

    pub fn source(&self) -> TemperatureSource {
        if !self.slots.is_empty() {
            TemperatureSource::SensorTree
        } else if self.fallback.is_some() {
            TemperatureSource::SharedMemory
        } else {
            TemperatureSource::None
        }
    }

    pub fn slots(&self) -> &SensorSlots {
        &self.slots
    }

    /// CPU temperature in whole degrees Celsius
    ///
    /// `None` means no reading this tick; render it blank, not as zero.
    pub fn get_cpu_temperature(&mut self) -> Option<i32> {
        if let Some(tree) = self.tree.as_mut() {
            if !self.slots.is_empty() {
                if let Err(e) = tree.update() {
                    log::debug!("Sensor tree update failed: {}", e);
                }
                for (identifier, max) in self.slots.ordered() {
                    let Some(identifier) = identifier else {
                        continue;
                    };
                    match tree.sensor_value(identifier) {
                        Ok(value) => {
                            if let Some(v) = plausible(value, max) {
                                return Some(v.round() as i32);
                            }
                        }
                        Err(e) => log::debug!("Sensor {} read failed: {}", identifier, e),
                    }
                }
            }
        }

        self.fallback
            .as_ref()
            .and_then(SharedMemorySensorReader::get_cpu_temperature)
            .map(|v| v.round() as i32)
    }

    /// Release the sensor tree and shared-memory view. Safe to call more than once.
    pub fn dispose(&mut self) {
        self.tree = None;
        self.slots = SensorSlots::default();
        if let Some(mut reader) = self.fallback.take() {
            reader.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeSensorTree, SegmentBuilder};
    use std::cell::Cell;
    use std::rc::Rc;

    fn cpu_node() -> HardwareNode {
        HardwareNode {
            identifier: "/intelcpu/0".to_string(),
            name: "Intel Core i9-13900K".to_string(),
            hardware_type: HwType::Cpu,
            parent: None,
        }
    }

    fn board_nodes() -> Vec<HardwareNode> {
        vec![
            HardwareNode {
                identifier: "/motherboard".to_string(),
                name: "ASUS PRIME Z790".to_string(),
                hardware_type: HwType::Motherboard,
                parent: None,
            },
            HardwareNode {
                identifier: "/lpc/nct6798d".to_string(),
                name: "Nuvoton NCT6798D".to_string(),
                hardware_type: HwType::SuperIo,
                parent: Some("/motherboard".to_string()),
            },
        ]
    }

    fn temp(id: &str, name: &str, value: Option<f32>) -> SensorNode {
        SensorNode {
            identifier: id.to_string(),
            name: name.to_string(),
            sensor_type: HwSensorType::Temperature,
            value,
        }
    }

    fn shared_memory_opener(value: f64, opened: Rc<Cell<u32>>) -> FallbackOpener {
        Box::new(move || {
            opened.set(opened.get() + 1);
            let segment = SegmentBuilder::new()
                .sensor("CPU [#0]: AMD Ryzen 7 7800X3D")
                .reading(1, 0, "CPU (Tctl/Tdie)", value)
                .build();
            Some(SharedMemorySensorReader::from_segment(Box::new(segment)))
        })
    }

    #[test]
    fn test_package_wins_and_rounds() {
        let tree = FakeSensorTree::new()
            .with_hardware(cpu_node())
            .with_sensor("/intelcpu/0", temp("/intelcpu/0/temperature/1", "Core Max", Some(50.1)))
            .with_sensor("/intelcpu/0", temp("/intelcpu/0/temperature/0", "CPU Package", Some(45.3)));

        let mut service = HardwareMonitorService::new(Some(Box::new(tree)), None);
        assert_eq!(service.source(), TemperatureSource::SensorTree);
        assert_eq!(service.get_cpu_temperature(), Some(45));
    }

    #[test]
    fn test_package_found_after_candidate() {
        let tree = FakeSensorTree::new()
            .with_hardware(cpu_node())
            .with_sensor("/intelcpu/0", temp("tctl", "Core (Tctl/Tdie)", Some(70.0)))
            .with_sensor("/intelcpu/0", temp("pkg", "CPU Package", Some(65.0)));

        let service = HardwareMonitorService::new(Some(Box::new(tree)), None);
        assert_eq!(service.slots().package.as_deref(), Some("pkg"));
    }

    #[test]
    fn test_falls_through_slots_in_order() {
        let tree = FakeSensorTree::new()
            .with_hardware(cpu_node())
            .with_sensor("/intelcpu/0", temp("avg", "Core Average", Some(40.0)))
            .with_sensor("/intelcpu/0", temp("max", "Core Max", Some(52.6)));
        let handle = tree.clone();

        let mut service = HardwareMonitorService::new(Some(Box::new(tree)), None);
        assert_eq!(service.get_cpu_temperature(), Some(40));

        handle.set_value("avg", Some(0.0));
        assert_eq!(service.get_cpu_temperature(), Some(53));

        handle.set_value("max", None);
        assert_eq!(service.get_cpu_temperature(), None);
        assert!(handle.update_count() >= 4);
    }

    #[test]
    fn test_motherboard_super_io_sensor() {
        let mut tree = FakeSensorTree::new().with_hardware(cpu_node());
        for node in board_nodes() {
            tree = tree.with_hardware(node);
        }
        let tree = tree
            .with_sensor("/intelcpu/0", temp("dead", "CPU Package", Some(0.0)))
            .with_sensor("/lpc/nct6798d", temp("sys", "System", Some(33.0)))
            .with_sensor("/lpc/nct6798d", temp("cputin", "CPUTIN", Some(41.5)));

        let mut service = HardwareMonitorService::new(Some(Box::new(tree)), None);
        assert_eq!(service.slots().package, None);
        assert_eq!(service.slots().motherboard.as_deref(), Some("cputin"));
        assert_eq!(service.get_cpu_temperature(), Some(42));
    }

    #[test]
    fn test_zero_sensor_at_startup_needs_rediscovery() {
        let tree = FakeSensorTree::new()
            .with_hardware(cpu_node())
            .with_sensor("/intelcpu/0", temp("pkg", "CPU Package", Some(0.0)));
        let handle = tree.clone();

        let mut service = HardwareMonitorService::new(Some(Box::new(tree)), None);
        assert_eq!(service.source(), TemperatureSource::None);

        handle.set_value("pkg", Some(48.0));
        assert_eq!(service.get_cpu_temperature(), None);

        assert_eq!(service.rediscover(), TemperatureSource::SensorTree);
        assert_eq!(service.get_cpu_temperature(), Some(48));
    }

    #[test]
    fn test_shared_memory_fallback() {
        let opened = Rc::new(Cell::new(0));
        let mut service =
            HardwareMonitorService::new(None, Some(shared_memory_opener(57.4, Rc::clone(&opened))));

        assert_eq!(opened.get(), 1);
        assert_eq!(service.source(), TemperatureSource::SharedMemory);
        assert_eq!(service.get_cpu_temperature(), Some(57));
    }

    #[test]
    fn test_fallback_not_opened_when_tree_works() {
        let opened = Rc::new(Cell::new(0));
        let tree = FakeSensorTree::new()
            .with_hardware(cpu_node())
            .with_sensor("/intelcpu/0", temp("pkg", "CPU Package", Some(45.0)));

        let _service = HardwareMonitorService::new(
            Some(Box::new(tree)),
            Some(shared_memory_opener(57.0, Rc::clone(&opened))),
        );
        assert_eq!(opened.get(), 0);
    }

    #[test]
    fn test_fallback_without_reading_is_dropped() {
        let opened = Rc::new(Cell::new(0));
        let mut service =
            HardwareMonitorService::new(None, Some(shared_memory_opener(0.0, Rc::clone(&opened))));
        assert_eq!(service.source(), TemperatureSource::None);
        assert_eq!(service.get_cpu_temperature(), None);
    }

    #[test]
    fn test_dispose_twice() {
        let opened = Rc::new(Cell::new(0));
        let mut service =
            HardwareMonitorService::new(None, Some(shared_memory_opener(50.0, Rc::clone(&opened))));
        service.dispose();
        service.dispose();
        assert_eq!(service.source(), TemperatureSource::None);
        assert_eq!(service.get_cpu_temperature(), None);
    }

    #[test]
    fn test_type_names() {
        assert_eq!(HwType::from_name("SuperIO"), HwType::SuperIo);
        assert_eq!(HwType::from_name("Mainboard"), HwType::Motherboard);
        assert_eq!(HwSensorType::from_name("Temperature"), HwSensorType::Temperature);
    }
}
