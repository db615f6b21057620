//! Hard real-time Ethernet networking core.
//!
//! Preallocated packet buffers ([`rtskb`]), a device registry with
//! EtherType-based dispatch ([`device`]), pluggable MAC-layer disciplines
//! ([`rtmac`]) including a cyclic TDMA scheduler ([`tdma`]), a non-real-time
//! configuration-distribution protocol ([`rtcfg`]), and the control
//! transport ([`rpc`]) and `ioctl`/`proc` surfaces an embedding kernel wires
//! up around them.
//!
//! This crate does not provide a scheduler, a clock, or a NIC driver — those
//! come from the host real-time operating system through the traits in
//! [`sync::rtos`].

#![cfg_attr(not(test), no_std)]
#![warn(rust_2018_idioms)]
#![allow(clippy::too_many_arguments)]

extern crate alloc;

pub mod device;
pub mod errno;
pub mod error;
pub mod ioctl;
pub mod proc;
pub mod rtmac;
pub mod rtskb;
pub mod sync;

#[cfg(feature = "rtcfg")]
pub mod rtcfg;
#[cfg(feature = "rpc")]
pub mod rpc;
#[cfg(feature = "tdma")]
pub mod tdma;

pub use error::{Error, Result};
