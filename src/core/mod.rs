//! CPU and system memory monitors

pub mod cpu;
pub mod memory;

pub use cpu::{CpuMonitor, CpuReading, CpuTimes, CpuTimesSource};
pub use memory::{MemoryMonitor, MemoryReading, MemoryStatus, MemoryStatusSource};
