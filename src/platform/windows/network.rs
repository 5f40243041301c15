//! Interface table from iphlpapi `GetIfTable2`

#![allow(non_camel_case_types)]

use crate::error::{Error, Result};
use crate::network_monitor::{InterfaceDescriptor, InterfaceKind, NetworkInventory};
use std::ptr;

// MIB_IF_ROW2 (64-bit counters)
#[repr(C)]
#[allow(dead_code)]
struct MIB_IF_ROW2 {
    interface_luid: u64,
    interface_index: u32,
    interface_guid: [u8; 16],
    alias: [u16; 257],
    description: [u16; 257],
    phys_addr_length: u32,
    phys_addr: [u8; 32],
    permanent_phys_addr: [u8; 32],
    mtu: u32,
    if_type: u32,
    tunnel_type: u32,
    media_type: u32,
    phys_medium_type: u32,
    access_type: u32,
    direction_type: u32,
    interface_and_oper_status_flags: u8,
    oper_status: u32,
    admin_status: u32,
    media_connect_state: u32,
    network_guid: [u8; 16],
    connection_type: u32,
    transmit_link_speed: u64,
    receive_link_speed: u64,
    in_octets: u64,
    in_ucast_pkts: u64,
    in_nucast_pkts: u64,
    in_discards: u64,
    in_errors: u64,
    in_unknown_protos: u64,
    in_ucast_octets: u64,
    in_mcast_octets: u64,
    in_bcast_octets: u64,
    out_octets: u64,
    out_ucast_pkts: u64,
    out_nucast_pkts: u64,
    out_discards: u64,
    out_errors: u64,
    out_ucast_octets: u64,
    out_mcast_octets: u64,
    out_bcast_octets: u64,
    out_qlen: u64,
}

#[repr(C)]
struct MIB_IF_TABLE2 {
    num_entries: u32,
    table: [MIB_IF_ROW2; 1], // Variable length array
}

const IF_OPER_STATUS_UP: u32 = 1;
const NO_ERROR: u32 = 0;

#[link(name = "iphlpapi")]
extern "system" {
    fn GetIfTable2(table: *mut *mut MIB_IF_TABLE2) -> u32;
    fn FreeMibTable(memory: *mut std::ffi::c_void);
}

fn wide_to_string(wide: &[u16]) -> String {
    let len = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
    String::from_utf16_lossy(&wide[..len])
}

/// Interface enumeration over `GetIfTable2`
pub struct IfTableInventory;

impl NetworkInventory for IfTableInventory {
    fn interfaces(&self) -> Result<Vec<InterfaceDescriptor>> {
        let mut interfaces = Vec::new();
        let mut table: *mut MIB_IF_TABLE2 = ptr::null_mut();

        unsafe {
            let result = GetIfTable2(&mut table);
            if result != NO_ERROR {
                return Err(Error::System(format!("GetIfTable2 failed: {}", result)));
            }

            if table.is_null() {
                return Ok(interfaces);
            }

            let num_entries = (*table).num_entries as usize;
            let table_ptr = &(*table).table as *const MIB_IF_ROW2;

            for i in 0..num_entries {
                let row = &*table_ptr.add(i);

                let alias = wide_to_string(&row.alias);
                let description = wide_to_string(&row.description);
                let name = if alias.is_empty() {
                    format!("Interface {}", row.interface_index)
                } else {
                    alias
                };

                interfaces.push(InterfaceDescriptor {
                    name,
                    description,
                    kind: InterfaceKind::from_if_type(row.if_type),
                    is_up: row.oper_status == IF_OPER_STATUS_UP,
                });
            }

            FreeMibTable(table as *mut std::ffi::c_void);
        }

        Ok(interfaces)
    }
}
