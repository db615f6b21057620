//! RTcfg: the non-real-time configuration protocol that brings a segment of
//! stations up before the real-time disciplines take over.

mod client;
mod frame;
mod server;

pub use client::{Client, ClientState};
pub use frame::{AddrType, RtcfgFrame};
pub use server::{ConnState, Server, DEFAULT_FRAME_OVERHEAD};
