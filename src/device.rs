// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2024 NervoSys

//! Device identity and selection
//!
//! Every selectable monitor (GPU, disk, network) describes its devices with
//! [`DeviceInfo`] and implements [`DeviceSelection`]. A monitor that supports
//! aggregation lists a single [`DeviceType::Aggregate`] entry first; selecting
//! nothing (or that entry) reports the sum over all devices.
//!
//! Selection never re-samples or re-enumerates. Callers persist the chosen id
//! themselves and replay [`DeviceSelection::select_device`] at startup.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Id of the aggregate entry in every aggregating monitor's device list
pub const AGGREGATE_DEVICE_ID: &str = "all";

/// Kind of selectable device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    Unknown,
    Gpu,
    Disk,
    NetworkAdapter,
    /// Pseudo-device standing for "all devices of this domain"
    Aggregate,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Unknown => write!(f, "Unknown"),
            DeviceType::Gpu => write!(f, "GPU"),
            DeviceType::Disk => write!(f, "Disk"),
            DeviceType::NetworkAdapter => write!(f, "Network Adapter"),
            DeviceType::Aggregate => write!(f, "Aggregate"),
        }
    }
}

/// A selectable hardware device
///
/// Immutable after construction. The id is derived from a hash of a native
/// identifier, so it is stable for the lifetime of the process but may change
/// after a reboot or driver reinstall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    id: String,
    display_name: String,
    short_name: String,
    description: String,
    device_type: DeviceType,
    is_active: bool,
}

impl DeviceInfo {
    /// Create a device description. An empty `short_name` falls back to `display_name`.
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        short_name: impl Into<String>,
        description: impl Into<String>,
        device_type: DeviceType,
        is_active: bool,
    ) -> Self {
        let display_name = display_name.into();
        let short_name = short_name.into();
        let short_name = if short_name.trim().is_empty() {
            display_name.clone()
        } else {
            short_name
        };

        Self {
            id: id.into(),
            display_name,
            short_name,
            description: description.into(),
            device_type,
            is_active,
        }
    }

    /// The aggregate entry ("All Disks", "All Networks", ...)
    pub fn aggregate(label: &str, description: &str) -> Self {
        Self::new(
            AGGREGATE_DEVICE_ID,
            label,
            "All",
            description,
            DeviceType::Aggregate,
            true,
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn is_aggregate(&self) -> bool {
        self.device_type == DeviceType::Aggregate
    }
}

/// Derive a process-stable device id from a native identifier
///
/// `prefix` keeps ids from different domains apart ("gpu", "disk", "net").
pub fn device_id(prefix: &str, native_id: &str) -> String {
    let mut hasher = DefaultHasher::new();
    native_id.hash(&mut hasher);
    format!("{}-{:016x}", prefix, hasher.finish())
}

/// Device-selection contract shared by the GPU, disk and network monitors
pub trait DeviceSelection {
    /// Devices in stable order: the aggregate entry first (if the domain
    /// aggregates), then devices in enumeration order
    fn available_devices(&self) -> Vec<DeviceInfo>;

    /// The device the monitor currently reports for
    fn selected_device(&self) -> Option<DeviceInfo>;

    /// True when the user has a real choice to make
    fn has_multiple_devices(&self) -> bool {
        self.available_devices().len() > 1
    }

    /// Select a device by id. `None` or an empty id selects the default
    /// (aggregate where supported). Unknown ids return `false` and leave the
    /// current selection untouched.
    fn select_device(&mut self, id: Option<&str>) -> bool;

    /// Human label for the current selection, never empty
    fn current_device_display_name(&self) -> String;
}

/// The `selected_id` field every selectable monitor carries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionState {
    selected_id: Option<String>,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently selected id; `None` means the default/aggregate device
    pub fn selected_id(&self) -> Option<&str> {
        self.selected_id.as_deref()
    }

    /// Apply a selection request
    ///
    /// `None`, `""` and [`AGGREGATE_DEVICE_ID`] clear the selection and always
    /// succeed. Any other id is accepted only if `exists(id)` holds.
    pub fn select(&mut self, id: Option<&str>, exists: impl Fn(&str) -> bool) -> bool {
        match id.map(str::trim) {
            None | Some("") | Some(AGGREGATE_DEVICE_ID) => {
                self.selected_id = None;
                true
            }
            Some(id) if exists(id) => {
                self.selected_id = Some(id.to_string());
                true
            }
            Some(id) => {
                log::debug!("Ignoring selection of unknown device '{}'", id);
                false
            }
        }
    }

    pub fn clear(&mut self) {
        self.selected_id = None;
    }
}
