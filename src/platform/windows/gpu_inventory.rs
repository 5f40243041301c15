//! Display adapter inventory from WMI

use super::{wmi_connection, CIMV2_NAMESPACE};
use crate::error::Result;
use crate::gpu::traits::{AdapterDescriptor, GpuInventory, PciLocation};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct Win32VideoController {
    name: Option<String>,
    #[serde(rename = "PNPDeviceID")]
    pnp_device_id: Option<String>,
    adapter_compatibility: Option<String>,
    #[serde(rename = "AdapterRAM")]
    adapter_ram: Option<u32>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct Win32PnPSignedDriver {
    #[serde(rename = "DeviceID")]
    device_id: Option<String>,
    location: Option<String>,
}

/// `Win32_VideoController` joined with the driver's PCI location string
pub struct WmiGpuInventory;

impl GpuInventory for WmiGpuInventory {
    fn adapters(&self) -> Result<Vec<AdapterDescriptor>> {
        let conn = wmi_connection(CIMV2_NAMESPACE)?;

        let controllers: Vec<Win32VideoController> = conn.raw_query(
            "SELECT Name, PNPDeviceID, AdapterCompatibility, AdapterRAM FROM Win32_VideoController",
        )?;

        // "PCI bus 1, device 0, function 0"
        let locations: HashMap<String, PciLocation> = conn
            .raw_query::<Win32PnPSignedDriver>(
                "SELECT DeviceID, Location FROM Win32_PnPSignedDriver WHERE DeviceClass = 'DISPLAY'",
            )
            .unwrap_or_default()
            .into_iter()
            .filter_map(|driver| {
                let location = PciLocation::parse_location(driver.location.as_deref()?)?;
                Some((driver.device_id?.to_uppercase(), location))
            })
            .collect();

        let adapters = controllers
            .into_iter()
            .map(|c| {
                let pnp_device_id = c.pnp_device_id.unwrap_or_default();
                AdapterDescriptor {
                    pci: locations.get(&pnp_device_id.to_uppercase()).copied(),
                    name: c.name.unwrap_or_default(),
                    pnp_device_id,
                    adapter_compatibility: c.adapter_compatibility.unwrap_or_default(),
                    adapter_ram: c.adapter_ram.map(u64::from).unwrap_or(0),
                }
            })
            .collect::<Vec<_>>();

        log::debug!("WMI reported {} display adapter(s)", adapters.len());
        Ok(adapters)
    }
}
