//! NVIDIA GPU backend via NVML
//!
//! NVML is loaded lazily in [`NativeGpuLibrary::try_init`]. Only the library
//! handle is kept; devices are looked up by index on every sample, which is
//! what NVML recommends and avoids holding borrowed device handles.

use crate::error::{Error, Result};
use crate::gpu::traits::*;
use nvml_wrapper::enum_wrappers::device::TemperatureSensor;
use nvml_wrapper::Nvml;

/// NVML-backed vendor library
#[derive(Default)]
pub struct NvmlLibrary {
    nvml: Option<Nvml>,
}

impl NvmlLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    fn nvml(&self) -> Result<&Nvml> {
        self.nvml
            .as_ref()
            .ok_or_else(|| Error::Unavailable("NVML not initialized".to_string()))
    }
}

impl NativeGpuLibrary for NvmlLibrary {
    fn vendor(&self) -> Vendor {
        Vendor::Nvidia
    }

    fn try_init(&mut self) -> bool {
        if self.nvml.is_some() {
            return true;
        }
        match Nvml::init() {
            Ok(nvml) => {
                log::info!("NVML initialized");
                self.nvml = Some(nvml);
                true
            }
            Err(e) => {
                log::info!("NVML unavailable: {}", e);
                false
            }
        }
    }

    fn devices(&self) -> Result<Vec<NativeDevice>> {
        let nvml = self.nvml()?;
        let count = nvml.device_count()?;

        let mut devices = Vec::with_capacity(count as usize);
        for index in 0..count {
            let device = match nvml.device_by_index(index) {
                Ok(device) => device,
                Err(e) => {
                    log::debug!("NVML device {} unavailable: {}", index, e);
                    continue;
                }
            };
            let name = device.name().unwrap_or_else(|_| format!("NVIDIA GPU {}", index));
            let pci = device.pci_info().ok().map(|info| PciLocation {
                bus: info.bus,
                device: info.device,
                function: 0, // Not exposed in pci_info
            });
            devices.push(NativeDevice { index, name, pci });
        }
        Ok(devices)
    }

    fn sample_usage(&self, index: u32) -> Result<f32> {
        let device = self.nvml()?.device_by_index(index)?;
        Ok(device.utilization_rates()?.gpu as f32)
    }

    fn sample_memory(&self, index: u32) -> Result<GpuMemory> {
        let device = self.nvml()?.device_by_index(index)?;
        let info = device.memory_info()?;
        Ok(GpuMemory {
            used: info.used,
            total: info.total,
        })
    }

    fn sample_temperature(&self, index: u32) -> Result<f32> {
        let device = self.nvml()?.device_by_index(index)?;
        Ok(device.temperature(TemperatureSensor::Gpu)? as f32)
    }

    fn shutdown(&mut self) {
        if let Some(nvml) = self.nvml.take() {
            match nvml.shutdown() {
                Ok(()) => log::debug!("NVML shut down"),
                Err(e) => log::warn!("NVML shutdown failed: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uninitialized_library_reports_unavailable() {
        let lib = NvmlLibrary::new();
        assert_eq!(lib.vendor(), Vendor::Nvidia);
        assert!(lib.devices().unwrap_err().is_unavailable());
        assert!(lib.sample_usage(0).is_err());
    }

    #[test]
    fn test_shutdown_without_init_is_noop() {
        let mut lib = NvmlLibrary::new();
        lib.shutdown();
        lib.shutdown();
        assert!(lib.nvml.is_none());
    }
}
