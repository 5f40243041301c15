//! System memory monitoring

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Physical memory status in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStatus {
    pub total: u64,
    pub available: u64,
}

/// Source of physical memory status
pub trait MemoryStatusSource {
    fn memory_status(&self) -> Result<MemoryStatus>;
}

/// RAM usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryReading {
    /// Used bytes
    pub used: u64,
    /// Total bytes
    pub total: u64,
    /// Used percentage (0-100)
    pub percent: f32,
}

impl From<MemoryStatus> for MemoryReading {
    fn from(status: MemoryStatus) -> Self {
        let used = status.total.saturating_sub(status.available);
        let percent = if status.total == 0 {
            0.0
        } else {
            (used as f64 / status.total as f64 * 100.0) as f32
        };
        Self {
            used,
            total: status.total,
            percent,
        }
    }
}

/// System memory monitor
pub struct MemoryMonitor {
    source: Box<dyn MemoryStatusSource>,
}

impl MemoryMonitor {
    pub fn new(source: Box<dyn MemoryStatusSource>) -> Self {
        Self { source }
    }

    pub fn update_memory(&mut self) -> MemoryReading {
        match self.source.memory_status() {
            Ok(status) => status.into(),
            Err(e) => {
                log::debug!("Memory status unavailable: {}", e);
                MemoryReading::default()
            }
        }
    }
}
