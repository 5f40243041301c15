//! Performance counters over the WMI formatted-data classes
//!
//! The formatted classes already report per-second rates, so a bound counter is
//! a single-property query on one instance.

use super::{wmi_connection, wql_escape, CIMV2_NAMESPACE};
use crate::counters::{self, CounterProvider, PerfCounter};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::rc::Rc;
use wmi::{Variant, WMIConnection};

/// WMI class backing a counter category
fn class_for(category: &str) -> Option<&'static str> {
    match category {
        counters::PHYSICAL_DISK => Some("Win32_PerfFormattedData_PerfDisk_PhysicalDisk"),
        counters::NETWORK_INTERFACE => Some("Win32_PerfFormattedData_Tcpip_NetworkInterface"),
        counters::GPU_ENGINE => Some("Win32_PerfFormattedData_GPUPerformanceCounters_GPUEngine"),
        counters::GPU_ADAPTER_MEMORY => {
            Some("Win32_PerfFormattedData_GPUPerformanceCounters_GPUAdapterMemory")
        }
        _ => None,
    }
}

/// WMI property backing a counter
fn property_for(counter: &str) -> Option<&'static str> {
    match counter {
        counters::DISK_READ_BYTES => Some("DiskReadBytesPersec"),
        counters::DISK_WRITE_BYTES => Some("DiskWriteBytesPersec"),
        counters::NET_BYTES_RECEIVED => Some("BytesReceivedPersec"),
        counters::NET_BYTES_SENT => Some("BytesSentPersec"),
        counters::GPU_UTILIZATION => Some("UtilizationPercentage"),
        counters::GPU_DEDICATED_USAGE => Some("DedicatedUsage"),
        _ => None,
    }
}

/// Numeric value of a WMI property
///
/// 64-bit CIM integers arrive as strings.
pub fn variant_to_f64(value: &Variant) -> Option<f64> {
    match value {
        Variant::String(s) => s.trim().parse().ok(),
        Variant::I1(v) => Some(*v as f64),
        Variant::I2(v) => Some(*v as f64),
        Variant::I4(v) => Some(*v as f64),
        Variant::I8(v) => Some(*v as f64),
        Variant::UI1(v) => Some(*v as f64),
        Variant::UI2(v) => Some(*v as f64),
        Variant::UI4(v) => Some(*v as f64),
        Variant::UI8(v) => Some(*v as f64),
        Variant::R4(v) => Some(*v as f64),
        Variant::R8(v) => Some(*v),
        _ => None,
    }
}

/// Counter provider over a shared CIMV2 connection
pub struct WmiCounterProvider {
    conn: Rc<WMIConnection>,
}

impl WmiCounterProvider {
    pub fn connect() -> Result<Self> {
        Ok(Self {
            conn: Rc::new(wmi_connection(CIMV2_NAMESPACE)?),
        })
    }
}

impl CounterProvider for WmiCounterProvider {
    fn instance_names(&self, category: &str) -> Result<Vec<String>> {
        let class = class_for(category)
            .ok_or_else(|| Error::CounterNotFound(format!("category '{}'", category)))?;

        let rows: Vec<HashMap<String, Variant>> = self
            .conn
            .raw_query(format!("SELECT Name FROM {}", class))
            .map_err(|e| Error::CounterNotFound(format!("{}: {}", class, e)))?;

        Ok(rows
            .into_iter()
            .filter_map(|mut row| match row.remove("Name") {
                Some(Variant::String(name)) => Some(name),
                _ => None,
            })
            .collect())
    }

    fn open(&self, category: &str, counter: &str, instance: &str) -> Result<Box<dyn PerfCounter>> {
        let class = class_for(category)
            .ok_or_else(|| Error::CounterNotFound(format!("category '{}'", category)))?;
        let property = property_for(counter)
            .ok_or_else(|| Error::CounterNotFound(format!("counter '{}'", counter)))?;

        let mut bound = WmiCounter {
            conn: Rc::clone(&self.conn),
            query: format!(
                "SELECT {} FROM {} WHERE Name = '{}'",
                property,
                class,
                wql_escape(instance)
            ),
            property,
        };

        // Fail at bind time when the instance does not exist
        bound.next_value().map_err(|e| match e {
            Error::SampleFailed(msg) => Error::CounterNotFound(msg),
            other => other,
        })?;
        Ok(Box::new(bound))
    }
}

struct WmiCounter {
    conn: Rc<WMIConnection>,
    query: String,
    property: &'static str,
}

impl PerfCounter for WmiCounter {
    fn next_value(&mut self) -> Result<f64> {
        let rows: Vec<HashMap<String, Variant>> = self.conn.raw_query(&self.query)?;
        let row = rows
            .first()
            .ok_or_else(|| Error::SampleFailed(format!("no rows for: {}", self.query)))?;
        row.get(self.property)
            .and_then(variant_to_f64)
            .ok_or_else(|| Error::SampleFailed(format!("{} is not numeric", self.property)))
    }
}

/// Provider used when WMI cannot be reached at all
pub struct NoCounters;

impl CounterProvider for NoCounters {
    fn instance_names(&self, category: &str) -> Result<Vec<String>> {
        Err(Error::Unavailable(format!("no WMI connection for '{}'", category)))
    }

    fn open(&self, category: &str, _counter: &str, _instance: &str) -> Result<Box<dyn PerfCounter>> {
        Err(Error::Unavailable(format!("no WMI connection for '{}'", category)))
    }
}
