//! CPU monitoring
//!
//! Usage comes from successive system idle/kernel/user time snapshots; the
//! temperature is delegated to [`HardwareMonitorService`].

use crate::error::Result;
use crate::hwmon::{HardwareMonitorService, TemperatureSource};
use serde::{Deserialize, Serialize};

/// Cumulative system times in 100 ns ticks
///
/// Kernel time includes idle time, as the OS reports it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub kernel: u64,
    pub user: u64,
}

/// Source of system CPU times
pub trait CpuTimesSource {
    fn system_times(&self) -> Result<CpuTimes>;
}

/// One CPU sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuReading {
    /// Usage percentage (0-100)
    pub usage: f32,
    /// Whole degrees Celsius
    pub temperature: Option<i32>,
}

/// Usage percentage between two snapshots, `None` if no time elapsed
pub fn usage_between(previous: &CpuTimes, current: &CpuTimes) -> Option<f32> {
    let idle = current.idle.saturating_sub(previous.idle);
    let kernel = current.kernel.saturating_sub(previous.kernel);
    let user = current.user.saturating_sub(previous.user);

    let total = kernel + user;
    if total == 0 {
        return None;
    }
    let busy = total.saturating_sub(idle);
    Some((busy as f64 / total as f64 * 100.0).clamp(0.0, 100.0) as f32)
}

/// CPU monitor
pub struct CpuMonitor {
    times: Box<dyn CpuTimesSource>,
    previous: Option<CpuTimes>,
    last_usage: f32,
    temperature: HardwareMonitorService,
}

impl CpuMonitor {
    pub fn new(times: Box<dyn CpuTimesSource>, temperature: HardwareMonitorService) -> Self {
        Self {
            times,
            previous: None,
            last_usage: 0.0,
            temperature,
        }
    }

    /// CPU usage since the previous call; the first call returns 0
    pub fn update_usage(&mut self) -> f32 {
        let current = match self.times.system_times() {
            Ok(times) => times,
            Err(e) => {
                log::debug!("CPU times unavailable: {}", e);
                return 0.0;
            }
        };

        let usage = match self.previous.replace(current) {
            Some(previous) => usage_between(&previous, &current).unwrap_or(self.last_usage),
            None => 0.0,
        };
        self.last_usage = usage;
        usage
    }

    pub fn update_temperature(&mut self) -> Option<i32> {
        self.temperature.get_cpu_temperature()
    }

    pub fn update(&mut self) -> CpuReading {
        CpuReading {
            usage: self.update_usage(),
            temperature: self.update_temperature(),
        }
    }

    pub fn temperature_source(&self) -> TemperatureSource {
        self.temperature.source()
    }

    pub fn temperature_service(&mut self) -> &mut HardwareMonitorService {
        &mut self.temperature
    }

    pub fn dispose(&mut self) {
        self.temperature.dispose();
    }
}
