// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2024 NervoSys

//! Performance counter abstraction
//!
//! Disk, network and the GPU counter fallback all read OS performance
//! counters the same way: list the instances of a category, bind one counter
//! per (category, counter, instance) and call [`PerfCounter::next_value`] once
//! per tick. On Windows the values come from the formatted WMI performance
//! classes; tests plug in an in-memory provider.

use crate::error::Result;

/// Physical disk category (`_Total` is the rollup instance)
pub const PHYSICAL_DISK: &str = "PhysicalDisk";
/// Network interface category
pub const NETWORK_INTERFACE: &str = "Network Interface";
/// Per-engine GPU utilization category
pub const GPU_ENGINE: &str = "GPU Engine";
/// Per-adapter GPU memory category
pub const GPU_ADAPTER_MEMORY: &str = "GPU Adapter Memory";

pub const DISK_READ_BYTES: &str = "Disk Read Bytes/sec";
pub const DISK_WRITE_BYTES: &str = "Disk Write Bytes/sec";
pub const NET_BYTES_RECEIVED: &str = "Bytes Received/sec";
pub const NET_BYTES_SENT: &str = "Bytes Sent/sec";
pub const GPU_UTILIZATION: &str = "Utilization Percentage";
pub const GPU_DEDICATED_USAGE: &str = "Dedicated Usage";

/// Name of the rollup instance in multi-instance categories
pub const TOTAL_INSTANCE: &str = "_Total";

/// Bytes per second in one megabit per second
pub const BYTES_PER_MEGABIT: f64 = 125_000.0;

/// Convert a bytes/sec counter value to megabits/sec
pub fn bytes_per_sec_to_mbps(bytes_per_sec: f64) -> f32 {
    if !bytes_per_sec.is_finite() || bytes_per_sec <= 0.0 {
        return 0.0;
    }
    (bytes_per_sec / BYTES_PER_MEGABIT) as f32
}

/// One bound performance counter
pub trait PerfCounter {
    /// Sample the counter. Rate counters report per-second values.
    fn next_value(&mut self) -> Result<f64>;
}

/// Source of performance counters
pub trait CounterProvider {
    /// Instance names of a category, in the order the OS reports them
    fn instance_names(&self, category: &str) -> Result<Vec<String>>;

    /// Bind a counter to one instance
    fn open(&self, category: &str, counter: &str, instance: &str) -> Result<Box<dyn PerfCounter>>;
}
