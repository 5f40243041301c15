// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2024 NervoSys

//! Traits and types shared by the GPU backends
//!
//! The OS inventory ([`GpuInventory`]) says which adapters exist; vendor
//! libraries ([`NativeGpuLibrary`]) say how to sample them. The monitor joins
//! the two.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// GPU vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Vendor {
    Nvidia,
    Amd,
    Intel,
    Unknown,
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vendor::Nvidia => write!(f, "NVIDIA"),
            Vendor::Amd => write!(f, "AMD"),
            Vendor::Intel => write!(f, "Intel"),
            Vendor::Unknown => write!(f, "Unknown"),
        }
    }
}

impl Vendor {
    /// Classify an adapter from its name and PnP device id
    ///
    /// Name markers are checked first, case-sensitively and in order
    /// (NVIDIA, AMD, Intel). The PCI vendor id in the PnP id breaks ties
    /// for adapters whose names carry no marker.
    pub fn classify(name: &str, pnp_device_id: &str) -> Vendor {
        if name.contains("NVIDIA") {
            return Vendor::Nvidia;
        }
        if name.contains("AMD") || name.contains("Radeon") || name.contains("ATI") {
            return Vendor::Amd;
        }
        if name.contains("Intel") {
            return Vendor::Intel;
        }

        let pnp = pnp_device_id.to_uppercase();
        if pnp.contains("VEN_10DE") {
            Vendor::Nvidia
        } else if pnp.contains("VEN_1002") || pnp.contains("VEN_1022") {
            Vendor::Amd
        } else if pnp.contains("VEN_8086") {
            Vendor::Intel
        } else {
            Vendor::Unknown
        }
    }
}

/// PCI location of an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PciLocation {
    pub bus: u32,
    pub device: u32,
    pub function: u32,
}

impl PciLocation {
    /// Parse a PnP driver location string ("PCI bus 1, device 0, function 0")
    pub fn parse_location(location: &str) -> Option<PciLocation> {
        let lower = location.to_lowercase();
        let field = |key: &str| -> Option<u32> {
            let start = lower.find(key)? + key.len();
            let digits: String = lower[start..]
                .trim_start()
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse().ok()
        };

        Some(PciLocation {
            bus: field("bus")?,
            device: field("device")?,
            function: field("function").unwrap_or(0),
        })
    }

    /// Bus and device agree; function numbers are not reported by every library
    pub fn same_slot(&self, other: &PciLocation) -> bool {
        self.bus == other.bus && self.device == other.device
    }
}

impl fmt::Display for PciLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{:02x}.{}", self.bus, self.device, self.function)
    }
}

/// One display adapter as reported by the OS
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterDescriptor {
    pub name: String,
    pub pnp_device_id: String,
    pub adapter_compatibility: String,
    /// Adapter memory in bytes as reported by the inventory (may be capped at 4 GiB)
    pub adapter_ram: u64,
    pub pci: Option<PciLocation>,
}

/// OS display adapter inventory
pub trait GpuInventory {
    fn adapters(&self) -> Result<Vec<AdapterDescriptor>>;
}

/// A device as the vendor library sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeDevice {
    /// Index understood by the library's sample calls
    pub index: u32,
    pub name: String,
    pub pci: Option<PciLocation>,
}

/// GPU memory in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuMemory {
    pub used: u64,
    pub total: u64,
}

impl GpuMemory {
    pub fn percent(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            (self.used as f64 / self.total as f64 * 100.0) as f32
        }
    }
}

/// A dynamically loaded vendor management library
///
/// Implementations load lazily in [`try_init`](NativeGpuLibrary::try_init)
/// and report absence as `false`, never as a panic.
pub trait NativeGpuLibrary {
    /// Vendor whose adapters this library can sample
    fn vendor(&self) -> Vendor;

    /// Load and initialise the library; `false` if it is not installed
    fn try_init(&mut self) -> bool;

    /// Devices in library order
    fn devices(&self) -> Result<Vec<NativeDevice>>;

    /// Utilization percentage (0-100)
    fn sample_usage(&self, index: u32) -> Result<f32>;

    fn sample_memory(&self, index: u32) -> Result<GpuMemory>;

    /// Temperature in degrees Celsius
    fn sample_temperature(&self, index: u32) -> Result<f32>;

    /// Release the library; must tolerate repeated calls
    fn shutdown(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_name_in_order() {
        assert_eq!(Vendor::classify("NVIDIA GeForce RTX 4090", ""), Vendor::Nvidia);
        assert_eq!(Vendor::classify("AMD Radeon RX 7900 XTX", ""), Vendor::Amd);
        assert_eq!(Vendor::classify("Radeon Pro W6800", ""), Vendor::Amd);
        assert_eq!(Vendor::classify("Intel(R) UHD Graphics 770", ""), Vendor::Intel);
        // First marker wins
        assert_eq!(Vendor::classify("NVIDIA on AMD board", ""), Vendor::Nvidia);
    }

    #[test]
    fn test_classify_is_case_sensitive_then_falls_back_to_pci_vendor() {
        assert_eq!(Vendor::classify("nvidia lowercase", ""), Vendor::Unknown);
        assert_eq!(
            Vendor::classify("Generic Display", "PCI\\VEN_10DE&DEV_2684&SUBSYS_1"),
            Vendor::Nvidia
        );
        assert_eq!(
            Vendor::classify("Generic Display", "pci\\ven_8086&dev_4680"),
            Vendor::Intel
        );
    }

    #[test]
    fn test_parse_pnp_location() {
        let loc = PciLocation::parse_location("PCI bus 1, device 0, function 0").unwrap();
        assert_eq!(loc, PciLocation { bus: 1, device: 0, function: 0 });

        let loc = PciLocation::parse_location("PCI bus 10, device 2, function 1").unwrap();
        assert_eq!(loc.bus, 10);
        assert_eq!(loc.function, 1);

        assert!(PciLocation::parse_location("Internal").is_none());
    }

    #[test]
    fn test_memory_percent() {
        let mem = GpuMemory { used: 2, total: 8 };
        assert_eq!(mem.percent(), 25.0);
        assert_eq!(GpuMemory::default().percent(), 0.0);
    }
}
