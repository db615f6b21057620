//! The RTmac media-access-control framework: a pluggable discipline
//! attached per device, intercepting its transmit entry point, with a VNIC
//! tunnel for best-effort traffic.

mod discipline;
mod header;
mod manager;
mod vnic;

pub use discipline::{Discipline, DisciplineRegistry, ProcEntry};
pub use header::{HeaderFlags, RtmacHeader, HEADER_LEN, RTMAC_VERSION};
pub use manager::{Attachment, MacLayer};
pub use vnic::Vnic;

#[cfg(feature = "smoltcp")]
pub use vnic::VnicDevice;
