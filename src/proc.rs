//! Text formatting for the optional `/rtnet/*` proc files.
//!
//! Each function renders one file's contents into an owned `String`; an
//! embedding kernel is responsible for wiring these up to whatever
//! pseudo-filesystem it exposes, keeping formatting separate from
//! transport.

use alloc::format;
use alloc::string::String;

use crate::device::DeviceRegistry;
use crate::rtskb::PoolStats;

/// Renders `/rtnet/devices`: one line per registered interface.
pub fn render_devices(registry: &DeviceRegistry) -> String {
    let mut out = String::from("Ifindex\tName\t\tFlags\tMTU\n");
    for ifindex in registry.ifindexes() {
        let Ok(dev) = registry.get_by_index(ifindex) else {
            continue;
        };
        out.push_str(&format!(
            "{}\t{}\t{:#06x}\t{}\n",
            dev.ifindex(),
            dev.name(),
            dev.flags().bits(),
            dev.mtu(),
        ));
        crate::device::dereference(dev);
    }
    out
}

/// Renders `/rtnet/rtskb`: current and peak counters for one pool.
pub fn render_rtskb(name: &str, stats: &PoolStats) -> String {
    format!(
        "Pool\tFree\tOutstanding\tHigh Water\n{}\t{}\t{}\t{}\n",
        name, stats.free, stats.outstanding, stats.high_water,
    )
}

/// Renders `/rtnet/version`.
pub fn render_version() -> String {
    format!("rtnet-core {}\n", env!("CARGO_PKG_VERSION"))
}

/// Renders `/rtnet/tdma` for one device: FSM state and flags.
pub fn render_tdma_state(ifindex: u32, fsm: &str, flags: &str) -> String {
    format!("Device: {ifindex}\nState: {fsm}\nFlags: {flags}\n")
}

/// Renders `/rtnet/tdma_slots` for one device: one line per configured slot.
pub fn render_tdma_slots(ifindex: u32, slots: &[(u16, u64, u16)]) -> String {
    let mut out = format!("Device: {ifindex}\nSlot\tOffset(ns)\tMTU\n");
    for (id, offset_ns, mtu) in slots {
        out.push_str(&format!("{id}\t{offset_ns}\t{mtu}\n"));
    }
    out
}
