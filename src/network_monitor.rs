//! Network throughput monitor
//!
//! Physical adapters that are up (Ethernet, Gigabit Ethernet or Wi-Fi) are
//! matched to "Network Interface" counter instances once at startup. Each tick
//! samples every adapter and reports the sum or the selected adapter in Mbps,
//! exactly like the disk monitor.
//!
//! # Example
//!
//! ```no_run
//! use minimon::network_monitor::NetworkMonitor;
//! use minimon::platform::SystemSources;
//!
//! let sources = SystemSources::detect();
//! let mut net = NetworkMonitor::new(sources.network.as_ref(), sources.counters.as_ref());
//! let reading = net.update();
//! println!("down {:.1} Mbps, up {:.1} Mbps", reading.download_mbps, reading.upload_mbps);
//! ```

use crate::counters::{self, CounterProvider, PerfCounter};
use crate::device::{self, DeviceInfo, DeviceSelection, DeviceType, SelectionState};
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Label of the aggregate entry
pub const ALL_NETWORKS: &str = "All Networks";

/// Interfaces whose name or description contains any of these are skipped
const VIRTUAL_INTERFACE_MARKERS: &[&str] = &[
    "loopback",
    "tunnel",
    "virtual",
    "vmware",
    "virtualbox",
    "hyper-v",
];

/// Interface type as reported by the OS (IANA ifType)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterfaceKind {
    Ethernet,
    GigabitEthernet,
    Wireless,
    Other(u32),
}

impl InterfaceKind {
    pub fn from_if_type(if_type: u32) -> Self {
        match if_type {
            6 => InterfaceKind::Ethernet,
            71 => InterfaceKind::Wireless,
            117 => InterfaceKind::GigabitEthernet,
            other => InterfaceKind::Other(other),
        }
    }

    /// Short tag shown on compact gauges
    pub fn tag(&self) -> &'static str {
        match self {
            InterfaceKind::Ethernet => "Ethernet",
            InterfaceKind::GigabitEthernet => "Gigabit",
            InterfaceKind::Wireless => "WiFi",
            InterfaceKind::Other(_) => "Network",
        }
    }

    fn is_monitored(&self) -> bool {
        !matches!(self, InterfaceKind::Other(_))
    }
}

/// One adapter from the OS interface table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    /// Friendly name ("Ethernet", "Wi-Fi")
    pub name: String,
    /// Driver description ("Intel(R) Ethernet Controller I225-V")
    pub description: String,
    pub kind: InterfaceKind,
    pub is_up: bool,
}

/// OS network adapter enumeration
pub trait NetworkInventory {
    fn interfaces(&self) -> Result<Vec<InterfaceDescriptor>>;
}

/// Network throughput in megabits per second
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkReading {
    pub download_mbps: f32,
    pub upload_mbps: f32,
}

fn is_virtual_interface(iface: &InterfaceDescriptor) -> bool {
    let name = iface.name.to_lowercase();
    let description = iface.description.to_lowercase();
    VIRTUAL_INTERFACE_MARKERS
        .iter()
        .any(|marker| name.contains(marker) || description.contains(marker))
}

/// Interfaces worth monitoring, in OS order
pub fn filter_interfaces(interfaces: Vec<InterfaceDescriptor>) -> Vec<InterfaceDescriptor> {
    interfaces
        .into_iter()
        .filter(|iface| iface.is_up && iface.kind.is_monitored())
        .filter(|iface| {
            let skip = is_virtual_interface(iface);
            if skip {
                log::debug!("Skipping virtual interface '{}'", iface.name);
            }
            !skip
        })
        .collect()
}

/// Apply the character substitutions performance counters use in instance names
pub fn normalize_instance_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '(' => '[',
            ')' => ']',
            '#' | '/' | '\\' => '_',
            other => other,
        })
        .collect()
}

/// Find the counter instance for an interface
///
/// Exact match on name or description wins; otherwise the first instance that
/// contains, or is contained in, either of them (case-insensitive).
pub fn resolve_instance<'a>(iface: &InterfaceDescriptor, instances: &'a [String]) -> Option<&'a str> {
    let keys: Vec<String> = [&iface.description, &iface.name]
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| normalize_instance_name(s))
        .collect();

    if let Some(hit) = instances.iter().find(|inst| keys.iter().any(|k| *inst == k)) {
        return Some(hit.as_str());
    }

    let keys: Vec<String> = keys.iter().map(|k| k.to_lowercase()).collect();
    instances
        .iter()
        .find(|inst| {
            let inst = inst.to_lowercase();
            keys.iter()
                .any(|k| inst.contains(k.as_str()) || k.contains(inst.as_str()))
        })
        .map(String::as_str)
}

struct AdapterCounters {
    info: DeviceInfo,
    received: Box<dyn PerfCounter>,
    sent: Box<dyn PerfCounter>,
    last: NetworkReading,
}

impl AdapterCounters {
    fn sample(&mut self) -> NetworkReading {
        let name = self.info.display_name();
        let down = self.received.next_value().unwrap_or_else(|e| {
            log::debug!("Network receive sample failed for {}: {}", name, e);
            0.0
        });
        let up = self.sent.next_value().unwrap_or_else(|e| {
            log::debug!("Network send sample failed for {}: {}", name, e);
            0.0
        });

        self.last = NetworkReading {
            download_mbps: counters::bytes_per_sec_to_mbps(down),
            upload_mbps: counters::bytes_per_sec_to_mbps(up),
        };
        self.last
    }
}

/// Network adapter throughput monitor
pub struct NetworkMonitor {
    aggregate: DeviceInfo,
    adapters: Vec<AdapterCounters>,
    selection: SelectionState,
    available: bool,
    total: NetworkReading,
}

impl NetworkMonitor {
    pub fn new(inventory: &dyn NetworkInventory, counters: &dyn CounterProvider) -> Self {
        let mut monitor = Self {
            aggregate: DeviceInfo::aggregate(ALL_NETWORKS, "Combined throughput of all adapters"),
            adapters: Vec::new(),
            selection: SelectionState::new(),
            available: false,
            total: NetworkReading::default(),
        };

        let interfaces = match inventory.interfaces() {
            Ok(interfaces) => filter_interfaces(interfaces),
            Err(e) => {
                log::info!("Network interface enumeration failed: {}", e);
                return monitor;
            }
        };

        let instances = match counters.instance_names(counters::NETWORK_INTERFACE) {
            Ok(instances) => instances,
            Err(e) => {
                log::info!("Network counters unavailable: {}", e);
                return monitor;
            }
        };

        for iface in interfaces {
            let Some(instance) = resolve_instance(&iface, &instances) else {
                log::debug!("No counter instance for interface '{}'", iface.name);
                continue;
            };
            if monitor
                .adapters
                .iter()
                .any(|a| a.info.description() == instance)
            {
                continue;
            }

            let received = counters.open(counters::NETWORK_INTERFACE, counters::NET_BYTES_RECEIVED, instance);
            let sent = counters.open(counters::NETWORK_INTERFACE, counters::NET_BYTES_SENT, instance);
            let (received, sent) = match (received, sent) {
                (Ok(r), Ok(s)) => (r, s),
                (Err(e), _) | (_, Err(e)) => {
                    log::debug!("Skipping interface '{}': {}", iface.name, e);
                    continue;
                }
            };

            let info = DeviceInfo::new(
                device::device_id("net", instance),
                iface.name.clone(),
                iface.kind.tag(),
                instance,
                DeviceType::NetworkAdapter,
                iface.is_up,
            );
            log::debug!("Network adapter '{}' -> counter '{}'", iface.name, instance);
            monitor.adapters.push(AdapterCounters {
                info,
                received,
                sent,
                last: NetworkReading::default(),
            });
        }

        monitor.available = !monitor.adapters.is_empty();
        if !monitor.available {
            log::info!("No monitorable network adapters found");
        }
        monitor
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Sample every adapter and return the reading for the current selection
    pub fn update(&mut self) -> NetworkReading {
        if !self.available {
            return NetworkReading::default();
        }

        let mut total = NetworkReading::default();
        for adapter in &mut self.adapters {
            let reading = adapter.sample();
            total.download_mbps += reading.download_mbps;
            total.upload_mbps += reading.upload_mbps;
        }
        self.total = total;

        match self.selection.selected_id() {
            None => total,
            Some(id) => self
                .adapters
                .iter()
                .find(|a| a.info.id() == id)
                .map(|a| a.last)
                .unwrap_or_default(),
        }
    }

    pub fn total_download_mbps(&self) -> f32 {
        self.total.download_mbps
    }

    pub fn total_upload_mbps(&self) -> f32 {
        self.total.upload_mbps
    }

    /// Advance to the next entry in device order, wrapping through the aggregate
    pub fn cycle_to_next_device(&mut self) -> DeviceInfo {
        let devices = self.available_devices();
        let current = self
            .selection
            .selected_id()
            .and_then(|id| devices.iter().position(|d| d.id() == id))
            .unwrap_or(0);
        let next = &devices[(current + 1) % devices.len()];

        let id = if next.is_aggregate() { None } else { Some(next.id()) };
        self.select_device(id);
        next.clone()
    }

    /// Release all counters. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.available {
            log::debug!("Network monitor disposed");
        }
        self.adapters.clear();
        self.available = false;
    }
}

impl DeviceSelection for NetworkMonitor {
    fn available_devices(&self) -> Vec<DeviceInfo> {
        std::iter::once(self.aggregate.clone())
            .chain(self.adapters.iter().map(|a| a.info.clone()))
            .collect()
    }

    fn selected_device(&self) -> Option<DeviceInfo> {
        match self.selection.selected_id() {
            None => Some(self.aggregate.clone()),
            Some(id) => self
                .adapters
                .iter()
                .find(|a| a.info.id() == id)
                .map(|a| a.info.clone()),
        }
    }

    fn select_device(&mut self, id: Option<&str>) -> bool {
        let adapters = &self.adapters;
        self.selection
            .select(id, |id| adapters.iter().any(|a| a.info.id() == id))
    }

    fn current_device_display_name(&self) -> String {
        self.selected_device()
            .map(|d| d.display_name().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| ALL_NETWORKS.to_string())
    }
}
