//! The TDMA discipline: cyclic, allocation-free slot scheduling, master/slave
//! calibration, and the control-frame wire format that carries it all over
//! RTmac.

mod discipline;
mod frame;
mod jobs;
mod slot;
mod state;

pub use discipline::{AttachConfig, TdmaDiscipline};
pub use frame::{TdmaFrame, TDMA_DISC_TYPE};
pub use jobs::{JobKind, JobSchedule};
pub use slot::{Slot, SlotConfig, DEFAULT_NRT_SLOT, DEFAULT_SLOT, SLOT_QUEUE_DEPTH};
pub use state::{FsmState, TdmaFlags, TdmaPrivate, CALIBRATION_TIMEOUT};
