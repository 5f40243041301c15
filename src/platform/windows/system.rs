//! kernel32 system times and memory status

use crate::core::cpu::{CpuTimes, CpuTimesSource};
use crate::core::memory::{MemoryStatus, MemoryStatusSource};
use crate::error::{Error, Result};
use std::mem;
use windows::Win32::Foundation::FILETIME;
use windows::Win32::System::SystemInformation::{GlobalMemoryStatusEx, MEMORYSTATUSEX};

// GetSystemTimes is in kernel32.dll - use raw FFI call
#[link(name = "kernel32")]
extern "system" {
    fn GetSystemTimes(
        lpIdleTime: *mut FILETIME,
        lpKernelTime: *mut FILETIME,
        lpUserTime: *mut FILETIME,
    ) -> i32;
}

fn filetime_to_u64(ft: &FILETIME) -> u64 {
    ((ft.dwHighDateTime as u64) << 32) | (ft.dwLowDateTime as u64)
}

/// System-wide idle/kernel/user times
pub struct Kernel32Times;

impl CpuTimesSource for Kernel32Times {
    fn system_times(&self) -> Result<CpuTimes> {
        let mut idle_time: FILETIME = unsafe { mem::zeroed() };
        let mut kernel_time: FILETIME = unsafe { mem::zeroed() };
        let mut user_time: FILETIME = unsafe { mem::zeroed() };

        let result = unsafe { GetSystemTimes(&mut idle_time, &mut kernel_time, &mut user_time) };
        if result == 0 {
            return Err(Error::System("GetSystemTimes failed".to_string()));
        }

        Ok(CpuTimes {
            idle: filetime_to_u64(&idle_time),
            kernel: filetime_to_u64(&kernel_time),
            user: filetime_to_u64(&user_time),
        })
    }
}

/// Physical memory status
pub struct Kernel32Memory;

impl MemoryStatusSource for Kernel32Memory {
    fn memory_status(&self) -> Result<MemoryStatus> {
        let mut mem_status: MEMORYSTATUSEX = unsafe { mem::zeroed() };
        mem_status.dwLength = mem::size_of::<MEMORYSTATUSEX>() as u32;

        unsafe {
            GlobalMemoryStatusEx(&mut mem_status)
                .map_err(|e| Error::System(format!("GlobalMemoryStatusEx failed: {}", e)))?;
        }

        Ok(MemoryStatus {
            total: mem_status.ullTotalPhys,
            available: mem_status.ullAvailPhys,
        })
    }
}
