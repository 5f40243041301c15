//! Read-only view of a named file mapping

use crate::hwmon::SensorSegment;
use std::ffi::c_void;
use std::mem;
use std::ptr;
use windows::core::HSTRING;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Memory::{
    MapViewOfFile, OpenFileMappingW, UnmapViewOfFile, VirtualQuery, FILE_MAP_READ,
    MEMORY_BASIC_INFORMATION, MEMORY_MAPPED_VIEW_ADDRESS,
};

/// A mapped view; unmapped and closed on drop
pub struct MappedSegment {
    mapping: HANDLE,
    view: MEMORY_MAPPED_VIEW_ADDRESS,
    len: usize,
}

impl MappedSegment {
    /// Open and map `name`; `None` when no publisher created it
    pub fn open(name: &str) -> Option<Self> {
        let wide = HSTRING::from(name);
        let mapping = match unsafe { OpenFileMappingW(FILE_MAP_READ.0, false, &wide) } {
            Ok(handle) => handle,
            Err(e) => {
                log::debug!("Shared memory '{}' not present: {}", name, e);
                return None;
            }
        };

        let view = unsafe { MapViewOfFile(mapping, FILE_MAP_READ, 0, 0, 0) };
        if view.Value.is_null() {
            log::debug!("MapViewOfFile failed for '{}'", name);
            let _ = unsafe { CloseHandle(mapping) };
            return None;
        }

        // The mapping size is not exposed directly; the region size of the view is
        let mut info: MEMORY_BASIC_INFORMATION = unsafe { mem::zeroed() };
        let queried = unsafe {
            VirtualQuery(
                Some(view.Value as *const c_void),
                &mut info,
                mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        if queried == 0 {
            log::debug!("VirtualQuery failed for '{}'", name);
            unsafe {
                let _ = UnmapViewOfFile(view);
                let _ = CloseHandle(mapping);
            }
            return None;
        }

        log::debug!("Mapped '{}' ({} bytes)", name, info.RegionSize);
        Some(Self {
            mapping,
            view,
            len: info.RegionSize,
        })
    }
}

impl SensorSegment for MappedSegment {
    fn len(&self) -> usize {
        self.len
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> bool {
        match offset.checked_add(buf.len()) {
            Some(end) if end <= self.len => {
                unsafe {
                    let src = (self.view.Value as *const u8).add(offset);
                    ptr::copy_nonoverlapping(src, buf.as_mut_ptr(), buf.len());
                }
                true
            }
            _ => false,
        }
    }
}

impl Drop for MappedSegment {
    fn drop(&mut self) {
        unsafe {
            let _ = UnmapViewOfFile(self.view);
            let _ = CloseHandle(self.mapping);
        }
    }
}
