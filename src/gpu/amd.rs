// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2024 NervoSys

//! AMD GPU backend via the ADL display library
//!
//! `atiadlxx.dll` ships with the Radeon driver. It is loaded at runtime and
//! driven through the context-based ADL2 entry points:
//! - `Overdrive5_CurrentActivity_Get` for engine activity
//! - `Adapter_MemoryInfo_Get` and `Adapter_DedicatedVRAMUsage_Get` for VRAM
//! - `Overdrive5_Temperature_Get` for the edge temperature
//!
//! ADL lists one adapter entry per display output, so entries are folded by
//! PCI location and the first index of each physical GPU is used.

use crate::error::{Error, Result};
use crate::gpu::traits::*;
use std::alloc::{alloc_zeroed, Layout};
use std::ffi::{c_char, c_int, c_void};
use std::mem;
use std::ptr;
use windows::core::{s, w, PCSTR};
use windows::Win32::Foundation::{FreeLibrary, HMODULE};
use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};

const ADL_OK: c_int = 0;
/// ADL reports the vendor as the decimal number 1002, not PCI 0x1002
const AMD_VENDOR_ID: c_int = 1002;

type AdlContext = *mut c_void;
type AdlMallocCallback = unsafe extern "system" fn(c_int) -> *mut c_void;

type MainControlCreate = unsafe extern "C" fn(AdlMallocCallback, c_int, *mut AdlContext) -> c_int;
type MainControlDestroy = unsafe extern "C" fn(AdlContext) -> c_int;
type NumberOfAdaptersGet = unsafe extern "C" fn(AdlContext, *mut c_int) -> c_int;
type AdapterInfoGet = unsafe extern "C" fn(AdlContext, *mut AdapterInfo, c_int) -> c_int;
type CurrentActivityGet = unsafe extern "C" fn(AdlContext, c_int, *mut PmActivity) -> c_int;
type TemperatureGet = unsafe extern "C" fn(AdlContext, c_int, c_int, *mut Temperature) -> c_int;
type MemoryInfoGet = unsafe extern "C" fn(AdlContext, c_int, *mut MemoryInfo) -> c_int;
type DedicatedVramUsageGet = unsafe extern "C" fn(AdlContext, c_int, *mut c_int) -> c_int;

#[repr(C)]
struct AdapterInfo {
    size: c_int,
    adapter_index: c_int,
    udid: [c_char; 256],
    bus_number: c_int,
    device_number: c_int,
    function_number: c_int,
    vendor_id: c_int,
    adapter_name: [c_char; 256],
    display_name: [c_char; 256],
    present: c_int,
    exist: c_int,
    driver_path: [c_char; 256],
    driver_path_ext: [c_char; 256],
    pnp_string: [c_char; 256],
    os_display_index: c_int,
}

#[repr(C)]
#[derive(Default)]
struct PmActivity {
    size: c_int,
    engine_clock: c_int,
    memory_clock: c_int,
    vddc: c_int,
    activity_percent: c_int,
    current_performance_level: c_int,
    current_bus_speed: c_int,
    current_bus_lanes: c_int,
    maximum_bus_lanes: c_int,
    reserved: c_int,
}

#[repr(C)]
#[derive(Default)]
struct Temperature {
    size: c_int,
    /// Millidegrees Celsius
    temperature: c_int,
}

#[repr(C)]
struct MemoryInfo {
    memory_size: i64,
    memory_type: [c_char; 256],
    memory_bandwidth: i64,
}

/// Allocation callback handed to ADL
///
/// Only list-returning ADL queries hand these buffers back to the caller and
/// this backend makes none of them.
unsafe extern "system" fn adl_malloc(size: c_int) -> *mut c_void {
    let Ok(layout) = Layout::from_size_align(size.max(1) as usize, mem::align_of::<usize>()) else {
        return ptr::null_mut();
    };
    alloc_zeroed(layout) as *mut c_void
}

/// Physical AMD adapter entry with a bus location
fn is_amd_adapter(info: &AdapterInfo) -> bool {
    info.vendor_id == AMD_VENDOR_ID && info.bus_number >= 0
}

fn c_string(raw: &[c_char]) -> String {
    let bytes: Vec<u8> = raw.iter().take_while(|&&c| c != 0).map(|&c| c as u8).collect();
    String::from_utf8_lossy(&bytes).trim().to_string()
}

unsafe fn symbol<T: Copy>(module: HMODULE, name: PCSTR) -> Result<T> {
    let proc = GetProcAddress(module, name).ok_or_else(|| {
        let name = name.to_string().unwrap_or_default();
        Error::Unavailable(format!("ADL entry point {} missing", name))
    })?;
    Ok(mem::transmute_copy(&proc))
}

/// Loaded library plus an open ADL2 context
struct AdlApi {
    module: HMODULE,
    context: AdlContext,
    destroy: MainControlDestroy,
    number_of_adapters: NumberOfAdaptersGet,
    adapter_info: AdapterInfoGet,
    current_activity: CurrentActivityGet,
    temperature: TemperatureGet,
    memory_info: MemoryInfoGet,
    dedicated_vram_usage: Option<DedicatedVramUsageGet>,
}

impl AdlApi {
    fn load() -> Result<Self> {
        let module = unsafe { LoadLibraryW(w!("atiadlxx.dll")) }
            .map_err(|e| Error::Unavailable(format!("atiadlxx.dll: {}", e)))?;

        match unsafe { Self::bind(module) } {
            Ok(api) => Ok(api),
            Err(e) => {
                let _ = unsafe { FreeLibrary(module) };
                Err(e)
            }
        }
    }

    unsafe fn bind(module: HMODULE) -> Result<Self> {
        let create: MainControlCreate = symbol(module, s!("ADL2_Main_Control_Create"))?;
        let destroy = symbol(module, s!("ADL2_Main_Control_Destroy"))?;
        let number_of_adapters = symbol(module, s!("ADL2_Adapter_NumberOfAdapters_Get"))?;
        let adapter_info = symbol(module, s!("ADL2_Adapter_AdapterInfo_Get"))?;
        let current_activity = symbol(module, s!("ADL2_Overdrive5_CurrentActivity_Get"))?;
        let temperature = symbol(module, s!("ADL2_Overdrive5_Temperature_Get"))?;
        let memory_info = symbol(module, s!("ADL2_Adapter_MemoryInfo_Get"))?;
        let dedicated_vram_usage = symbol(module, s!("ADL2_Adapter_DedicatedVRAMUsage_Get")).ok();

        let mut context: AdlContext = ptr::null_mut();
        let status = create(adl_malloc, 1, &mut context);
        if status != ADL_OK {
            return Err(Error::Unavailable(format!("ADL2_Main_Control_Create returned {}", status)));
        }

        Ok(Self {
            module,
            context,
            destroy,
            number_of_adapters,
            adapter_info,
            current_activity,
            temperature,
            memory_info,
            dedicated_vram_usage,
        })
    }

    fn adapters(&self) -> Result<Vec<AdapterInfo>> {
        let mut count: c_int = 0;
        let status = unsafe { (self.number_of_adapters)(self.context, &mut count) };
        if status != ADL_OK {
            return Err(Error::SampleFailed(format!("ADL adapter count returned {}", status)));
        }
        if count <= 0 {
            return Ok(Vec::new());
        }

        let mut infos: Vec<AdapterInfo> = (0..count).map(|_| unsafe { mem::zeroed() }).collect();
        for info in &mut infos {
            info.size = mem::size_of::<AdapterInfo>() as c_int;
        }
        let bytes = mem::size_of::<AdapterInfo>() as c_int * count;
        let status = unsafe { (self.adapter_info)(self.context, infos.as_mut_ptr(), bytes) };
        if status != ADL_OK {
            return Err(Error::SampleFailed(format!("ADL adapter info returned {}", status)));
        }
        Ok(infos)
    }
}

impl Drop for AdlApi {
    fn drop(&mut self) {
        unsafe {
            (self.destroy)(self.context);
            let _ = FreeLibrary(self.module);
        }
    }
}

/// ADL-backed vendor library
#[derive(Default)]
pub struct AdlLibrary {
    api: Option<AdlApi>,
}

impl AdlLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    fn api(&self) -> Result<&AdlApi> {
        self.api
            .as_ref()
            .ok_or_else(|| Error::Unavailable("ADL not initialized".to_string()))
    }
}

impl NativeGpuLibrary for AdlLibrary {
    fn vendor(&self) -> Vendor {
        Vendor::Amd
    }

    fn try_init(&mut self) -> bool {
        if self.api.is_some() {
            return true;
        }
        match AdlApi::load() {
            Ok(api) => {
                log::info!("ADL initialized");
                self.api = Some(api);
                true
            }
            Err(e) => {
                log::info!("ADL unavailable: {}", e);
                false
            }
        }
    }

    fn devices(&self) -> Result<Vec<NativeDevice>> {
        let mut devices: Vec<NativeDevice> = Vec::new();
        for info in self.api()?.adapters()? {
            if !is_amd_adapter(&info) {
                continue;
            }
            let pci = PciLocation {
                bus: info.bus_number as u32,
                device: info.device_number.max(0) as u32,
                function: info.function_number.max(0) as u32,
            };
            if devices.iter().any(|d| d.pci == Some(pci)) {
                continue;
            }
            devices.push(NativeDevice {
                index: info.adapter_index as u32,
                name: c_string(&info.adapter_name),
                pci: Some(pci),
            });
        }
        Ok(devices)
    }

    fn sample_usage(&self, index: u32) -> Result<f32> {
        let api = self.api()?;
        let mut activity = PmActivity {
            size: mem::size_of::<PmActivity>() as c_int,
            ..Default::default()
        };
        let status = unsafe { (api.current_activity)(api.context, index as c_int, &mut activity) };
        if status != ADL_OK {
            return Err(Error::SampleFailed(format!("ADL activity returned {}", status)));
        }
        Ok(activity.activity_percent.clamp(0, 100) as f32)
    }

    fn sample_memory(&self, index: u32) -> Result<GpuMemory> {
        let api = self.api()?;

        let mut info: MemoryInfo = unsafe { mem::zeroed() };
        let status = unsafe { (api.memory_info)(api.context, index as c_int, &mut info) };
        if status != ADL_OK {
            return Err(Error::SampleFailed(format!("ADL memory info returned {}", status)));
        }

        let usage = api
            .dedicated_vram_usage
            .ok_or_else(|| Error::Unavailable("ADL VRAM usage not exported".to_string()))?;
        let mut used_mb: c_int = 0;
        let status = unsafe { usage(api.context, index as c_int, &mut used_mb) };
        if status != ADL_OK {
            return Err(Error::SampleFailed(format!("ADL VRAM usage returned {}", status)));
        }

        Ok(GpuMemory {
            used: used_mb.max(0) as u64 * 1024 * 1024,
            total: info.memory_size.max(0) as u64,
        })
    }

    fn sample_temperature(&self, index: u32) -> Result<f32> {
        let api = self.api()?;
        let mut temp = Temperature {
            size: mem::size_of::<Temperature>() as c_int,
            ..Default::default()
        };
        let status = unsafe { (api.temperature)(api.context, index as c_int, 0, &mut temp) };
        if status != ADL_OK {
            return Err(Error::SampleFailed(format!("ADL temperature returned {}", status)));
        }
        Ok(temp.temperature as f32 / 1000.0)
    }

    fn shutdown(&mut self) {
        if self.api.take().is_some() {
            log::debug!("ADL context destroyed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_layouts() {
        assert_eq!(mem::size_of::<AdapterInfo>(), 1572);
        assert_eq!(mem::size_of::<PmActivity>(), 40);
        assert_eq!(mem::size_of::<MemoryInfo>(), 272);
    }

    fn adapter_info(vendor_id: c_int, bus_number: c_int) -> AdapterInfo {
        let mut info: AdapterInfo = unsafe { mem::zeroed() };
        info.vendor_id = vendor_id;
        info.bus_number = bus_number;
        info
    }

    #[test]
    fn test_amd_adapter_filter() {
        assert!(is_amd_adapter(&adapter_info(1002, 3)));
        assert!(is_amd_adapter(&adapter_info(1002, 0)));
        // Disconnected outputs report bus -1
        assert!(!is_amd_adapter(&adapter_info(1002, -1)));
        // PCI-style hex id is not what ADL returns
        assert!(!is_amd_adapter(&adapter_info(0x1002, 3)));
        assert!(!is_amd_adapter(&adapter_info(0x10DE, 1)));
    }

    #[test]
    fn test_c_string() {
        let mut raw = [0 as c_char; 16];
        for (slot, b) in raw.iter_mut().zip(b"Radeon RX 7900 ") {
            *slot = *b as c_char;
        }
        assert_eq!(c_string(&raw), "Radeon RX 7900");
    }

    #[test]
    fn test_uninitialized_library() {
        let mut lib = AdlLibrary::new();
        assert!(lib.devices().unwrap_err().is_unavailable());
        lib.shutdown();
        lib.shutdown();
    }
}
