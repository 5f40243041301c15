//! Sensor tree published over WMI by LibreHardwareMonitor or OpenHardwareMonitor

use super::{wmi_connection, wql_escape};
use crate::error::Result;
use crate::hwmon::{HardwareNode, HwSensorType, HwType, SensorNode, SensorTree};
use serde::Deserialize;
use wmi::WMIConnection;

const NAMESPACES: &[&str] = &["root\\LibreHardwareMonitor", "root\\OpenHardwareMonitor"];

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct WmiHardware {
    identifier: String,
    name: String,
    hardware_type: String,
    parent: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct WmiSensor {
    identifier: String,
    name: String,
    sensor_type: String,
    value: Option<f32>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct WmiSensorValue {
    value: Option<f32>,
}

/// Sensor tree over a monitoring tool's WMI namespace
///
/// The publisher refreshes values itself; queries always see live data.
pub struct WmiSensorTree {
    conn: WMIConnection,
    namespace: &'static str,
}

impl WmiSensorTree {
    /// Connect to the first namespace that lists any hardware
    pub fn connect() -> Option<Self> {
        for namespace in NAMESPACES {
            let conn = match wmi_connection(namespace) {
                Ok(conn) => conn,
                Err(e) => {
                    log::debug!("{}", e);
                    continue;
                }
            };
            let tree = Self { conn, namespace };
            match tree.hardware() {
                Ok(hardware) if !hardware.is_empty() => {
                    log::info!("Using sensor tree from {}", namespace);
                    return Some(tree);
                }
                Ok(_) => log::debug!("{} lists no hardware", namespace),
                Err(e) => log::debug!("{} not queryable: {}", namespace, e),
            }
        }
        None
    }

    pub fn namespace(&self) -> &str {
        self.namespace
    }
}

impl SensorTree for WmiSensorTree {
    fn update(&mut self) -> Result<()> {
        Ok(())
    }

    fn hardware(&self) -> Result<Vec<HardwareNode>> {
        let rows: Vec<WmiHardware> = self
            .conn
            .raw_query("SELECT Identifier, Name, HardwareType, Parent FROM Hardware")?;

        Ok(rows
            .into_iter()
            .map(|hw| HardwareNode {
                hardware_type: HwType::from_name(&hw.hardware_type),
                parent: hw.parent.filter(|p| !p.is_empty()),
                identifier: hw.identifier,
                name: hw.name,
            })
            .collect())
    }

    fn sensors(&self, hardware: &HardwareNode) -> Result<Vec<SensorNode>> {
        let rows: Vec<WmiSensor> = self.conn.raw_query(format!(
            "SELECT Identifier, Name, SensorType, Value FROM Sensor WHERE Parent = '{}'",
            wql_escape(&hardware.identifier)
        ))?;

        Ok(rows
            .into_iter()
            .map(|s| SensorNode {
                sensor_type: HwSensorType::from_name(&s.sensor_type),
                identifier: s.identifier,
                name: s.name,
                value: s.value,
            })
            .collect())
    }

    fn sensor_value(&self, identifier: &str) -> Result<Option<f32>> {
        let rows: Vec<WmiSensorValue> = self.conn.raw_query(format!(
            "SELECT Value FROM Sensor WHERE Identifier = '{}'",
            wql_escape(identifier)
        ))?;
        Ok(rows.into_iter().next().and_then(|row| row.value))
    }
}
