//! The device registry and packet dispatcher.

mod dispatch;
mod record;
mod registry;

pub use dispatch::{PacketDispatcher, PacketHandler, StackManager};
pub use record::{dereference, DeviceFlags, DeviceHandle, DeviceRecord, RingState, TxHandler};
pub use registry::{DeviceRegistry, MAX_DEVICES};
