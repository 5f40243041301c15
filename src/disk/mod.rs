// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2024 NervoSys

//! Disk throughput monitor
//!
//! Binds one read and one write bytes/sec counter per physical disk. Every
//! tick samples all disks, then reports either the sum (aggregate mode) or the
//! selected disk, in megabits per second.

use crate::counters::{self, CounterProvider, PerfCounter};
use crate::device::{self, DeviceInfo, DeviceSelection, DeviceType, SelectionState};
use serde::{Deserialize, Serialize};

/// Label of the aggregate entry
pub const ALL_DISKS: &str = "All Disks";

/// Disk throughput in megabits per second
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskReading {
    pub read_mbps: f32,
    pub write_mbps: f32,
}

/// Turn a PhysicalDisk instance name into a label
///
/// `"0 C: D:"` becomes `"Disk 0 (C:, D:)"`; an instance with no drive letters
/// becomes `"Disk 0"`.
pub fn parse_disk_label(instance: &str) -> String {
    let mut parts = instance.split_whitespace();
    let Some(index) = parts.next() else {
        return "Disk".to_string();
    };

    let letters: Vec<&str> = parts.filter(|p| p.ends_with(':')).collect();
    if letters.is_empty() {
        format!("Disk {}", index)
    } else {
        format!("Disk {} ({})", index, letters.join(", "))
    }
}

struct DiskCounters {
    info: DeviceInfo,
    read: Box<dyn PerfCounter>,
    write: Box<dyn PerfCounter>,
    last: DiskReading,
}

impl DiskCounters {
    fn sample(&mut self) -> DiskReading {
        let name = self.info.display_name();
        let read = self.read.next_value().unwrap_or_else(|e| {
            log::debug!("Disk read sample failed for {}: {}", name, e);
            0.0
        });
        let write = self.write.next_value().unwrap_or_else(|e| {
            log::debug!("Disk write sample failed for {}: {}", name, e);
            0.0
        });

        self.last = DiskReading {
            read_mbps: counters::bytes_per_sec_to_mbps(read),
            write_mbps: counters::bytes_per_sec_to_mbps(write),
        };
        self.last
    }
}

/// Physical disk throughput monitor
pub struct DiskMonitor {
    aggregate: DeviceInfo,
    disks: Vec<DiskCounters>,
    selection: SelectionState,
    available: bool,
    total: DiskReading,
    current: DiskReading,
}

impl DiskMonitor {
    pub fn new(counters: &dyn CounterProvider) -> Self {
        let aggregate = DeviceInfo::aggregate(ALL_DISKS, "Combined throughput of all physical disks");

        let instances = match counters.instance_names(counters::PHYSICAL_DISK) {
            Ok(instances) => instances,
            Err(e) => {
                log::info!("Disk counters unavailable: {}", e);
                return Self::unavailable(aggregate);
            }
        };

        let mut disks = Vec::new();
        for instance in instances.iter().filter(|i| *i != counters::TOTAL_INSTANCE) {
            let read = counters.open(counters::PHYSICAL_DISK, counters::DISK_READ_BYTES, instance);
            let write = counters.open(counters::PHYSICAL_DISK, counters::DISK_WRITE_BYTES, instance);
            let (read, write) = match (read, write) {
                (Ok(read), Ok(write)) => (read, write),
                (Err(e), _) | (_, Err(e)) => {
                    log::debug!("Skipping disk '{}': {}", instance, e);
                    continue;
                }
            };

            let label = parse_disk_label(instance);
            let info = DeviceInfo::new(
                device::device_id("disk", instance),
                label.clone(),
                label,
                instance.clone(),
                DeviceType::Disk,
                true,
            );
            disks.push(DiskCounters {
                info,
                read,
                write,
                last: DiskReading::default(),
            });
        }

        if disks.is_empty() {
            log::info!("No physical disk counters found");
            return Self::unavailable(aggregate);
        }

        log::debug!("Disk monitor bound {} disk(s)", disks.len());
        Self {
            aggregate,
            disks,
            selection: SelectionState::new(),
            available: true,
            total: DiskReading::default(),
            current: DiskReading::default(),
        }
    }

    fn unavailable(aggregate: DeviceInfo) -> Self {
        Self {
            aggregate,
            disks: Vec::new(),
            selection: SelectionState::new(),
            available: false,
            total: DiskReading::default(),
            current: DiskReading::default(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Sample every disk and return the reading for the current selection
    ///
    /// A selected id that no longer resolves reports zero.
    pub fn update(&mut self) -> DiskReading {
        if !self.available {
            return DiskReading::default();
        }

        let mut total = DiskReading::default();
        for disk in &mut self.disks {
            let reading = disk.sample();
            total.read_mbps += reading.read_mbps;
            total.write_mbps += reading.write_mbps;
        }
        self.total = total;

        self.current = match self.selection.selected_id() {
            None => total,
            Some(id) => self
                .disks
                .iter()
                .find(|d| d.info.id() == id)
                .map(|d| d.last)
                .unwrap_or_default(),
        };
        self.current
    }

    /// Sum of reads over all disks from the last update
    pub fn total_read_mbps(&self) -> f32 {
        self.total.read_mbps
    }

    /// Sum of writes over all disks from the last update
    pub fn total_write_mbps(&self) -> f32 {
        self.total.write_mbps
    }

    /// Reading of the current selection from the last update
    pub fn current(&self) -> DiskReading {
        self.current
    }

    /// Release all counters. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.available {
            log::debug!("Disk monitor disposed");
        }
        self.disks.clear();
        self.available = false;
    }
}

impl DeviceSelection for DiskMonitor {
    fn available_devices(&self) -> Vec<DeviceInfo> {
        std::iter::once(self.aggregate.clone())
            .chain(self.disks.iter().map(|d| d.info.clone()))
            .collect()
    }

    fn selected_device(&self) -> Option<DeviceInfo> {
        match self.selection.selected_id() {
            None => Some(self.aggregate.clone()),
            Some(id) => self
                .disks
                .iter()
                .find(|d| d.info.id() == id)
                .map(|d| d.info.clone()),
        }
    }

    fn select_device(&mut self, id: Option<&str>) -> bool {
        let disks = &self.disks;
        self.selection
            .select(id, |id| disks.iter().any(|d| d.info.id() == id))
    }

    fn current_device_display_name(&self) -> String {
        self.selected_device()
            .map(|d| d.display_name().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| ALL_DISKS.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::{DISK_READ_BYTES, DISK_WRITE_BYTES, PHYSICAL_DISK};
    use crate::testing::FakeCounters;

    fn two_disks() -> FakeCounters {
        let counters = FakeCounters::new().with_instances(PHYSICAL_DISK, &["0 C:", "1 D: E:", "_Total"]);
        counters.set(PHYSICAL_DISK, DISK_READ_BYTES, "0 C:", 1_000_000.0);
        counters.set(PHYSICAL_DISK, DISK_READ_BYTES, "1 D: E:", 2_000_000.0);
        counters.set(PHYSICAL_DISK, DISK_WRITE_BYTES, "0 C:", 125_000.0);
        counters.set(PHYSICAL_DISK, DISK_WRITE_BYTES, "1 D: E:", 250_000.0);
        counters.set(PHYSICAL_DISK, DISK_READ_BYTES, "_Total", 9_999_999.0);
        counters
    }

    #[test]
    fn test_parse_disk_label() {
        assert_eq!(parse_disk_label("0 C:"), "Disk 0 (C:)");
        assert_eq!(parse_disk_label("1 D: E:"), "Disk 1 (D:, E:)");
        assert_eq!(parse_disk_label("2"), "Disk 2");
        assert_eq!(parse_disk_label(""), "Disk");
    }

    #[test]
    fn test_aggregate_sums_all_disks() {
        let mut monitor = DiskMonitor::new(&two_disks());
        let reading = monitor.update();

        assert_eq!(monitor.total_read_mbps(), 24.0);
        assert_eq!(reading.read_mbps, 24.0);
        assert_eq!(reading.write_mbps, 3.0);
    }

    #[test]
    fn test_device_list_has_aggregate_first() {
        let monitor = DiskMonitor::new(&two_disks());
        let devices = monitor.available_devices();

        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].device_type(), DeviceType::Aggregate);
        assert_eq!(devices[0].display_name(), ALL_DISKS);
        assert_eq!(devices[1].display_name(), "Disk 0 (C:)");
        assert_eq!(devices[2].display_name(), "Disk 1 (D:, E:)");
        assert_eq!(devices.iter().filter(|d| d.is_aggregate()).count(), 1);
    }

    #[test]
    fn test_single_disk_still_offers_aggregate() {
        let counters = FakeCounters::new().with_instances(PHYSICAL_DISK, &["0 C:", "_Total"]);
        let monitor = DiskMonitor::new(&counters);
        assert_eq!(monitor.available_devices().len(), 2);
        assert!(monitor.has_multiple_devices());
    }

    #[test]
    fn test_selected_disk_and_totals() {
        let mut monitor = DiskMonitor::new(&two_disks());
        let disk_b = monitor.available_devices()[2].id().to_string();
        assert!(monitor.select_device(Some(&disk_b)));

        let reading = monitor.update();
        assert_eq!(reading.read_mbps, 16.0);
        assert_eq!(reading.write_mbps, 2.0);
        // Totals are still computed over every disk
        assert_eq!(monitor.total_read_mbps(), 24.0);
        assert_eq!(monitor.current_device_display_name(), "Disk 1 (D:, E:)");
    }

    #[test]
    fn test_selection_miss_keeps_state() {
        let mut monitor = DiskMonitor::new(&two_disks());
        let disk_a = monitor.available_devices()[1].clone();
        assert!(monitor.select_device(Some(disk_a.id())));

        assert!(!monitor.select_device(Some("disk-does-not-exist")));
        assert_eq!(monitor.selected_device(), Some(disk_a));

        assert!(monitor.select_device(None));
        assert!(monitor.selected_device().unwrap().is_aggregate());
    }

    #[test]
    fn test_failing_disk_does_not_block_others() {
        let counters = two_disks();
        counters.fail(PHYSICAL_DISK, DISK_READ_BYTES, "0 C:");
        let mut monitor = DiskMonitor::new(&counters);

        let reading = monitor.update();
        assert_eq!(reading.read_mbps, 16.0);
        assert_eq!(reading.write_mbps, 3.0);
    }

    #[test]
    fn test_unavailable_counters() {
        let mut monitor = DiskMonitor::new(&FakeCounters::new());
        assert!(!monitor.is_available());
        assert_eq!(monitor.update(), DiskReading::default());
        assert_eq!(monitor.available_devices().len(), 1);
        assert_eq!(monitor.current_device_display_name(), ALL_DISKS);
    }

    #[test]
    fn test_dispose_twice() {
        let mut monitor = DiskMonitor::new(&two_disks());
        monitor.dispose();
        monitor.dispose();
        assert!(!monitor.is_available());
        assert_eq!(monitor.update(), DiskReading::default());
    }
}
