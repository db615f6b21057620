//! Crate-wide error type.
//!
//! Errors fall into three kinds: transient resource exhaustion, synchronous
//! configuration rejection, and protocol violations. Every variant carries
//! the POSIX errno it maps onto so callers on an ioctl-style boundary can
//! forward it unchanged.

use core::fmt;

use crate::errno;

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors raised by the buffer pool, device registry, RTmac/TDMA disciplines,
/// RTcfg protocol and RPC transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No interface matches the requested ifindex or name.
    NoSuchDevice,
    /// A discipline is already attached, or a name is already registered.
    Busy,
    /// The pool or connection table has no room left.
    OutOfMemory,
    /// A pool has no free buffer to hand out.
    OutOfBuffers,
    /// A device is administratively down.
    NetworkDown,
    /// A frame exceeds a slot's or device's MTU.
    MessageTooLong,
    /// A stage-1 payload exceeds `mtu - header` bytes.
    Stage1TooLarge,
    /// A caller-supplied buffer is too small for the data being copied out.
    NoSpace,
    /// A caller-supplied pointer or slice could not be dereferenced.
    Fault,
    /// A blocking wait was interrupted and should be retried by the caller.
    Interrupted,
    /// A request could not complete before its deadline.
    TimedOut,
    /// A caller-supplied argument was invalid for the operation.
    InvalidArgument,
}

impl Error {
    /// The POSIX errno this variant maps onto.
    pub const fn errno(self) -> i32 {
        match self {
            Error::NoSuchDevice => errno::ENODEV,
            Error::Busy => errno::EBUSY,
            Error::OutOfMemory => errno::ENOMEM,
            Error::OutOfBuffers => errno::ENOBUFS,
            Error::NetworkDown => errno::ENETDOWN,
            Error::MessageTooLong => errno::EMSGSIZE,
            Error::Stage1TooLarge => errno::ESTAGE1SIZE,
            Error::NoSpace => errno::ENOSPC,
            Error::Fault => errno::EFAULT,
            Error::Interrupted => errno::ERESTARTSYS,
            Error::TimedOut => errno::ETIMEDOUT,
            Error::InvalidArgument => errno::EINVAL,
        }
    }

    /// Whether this is a transient condition an upper layer should retry on
    /// the next cycle rather than treat as a hard failure.
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Error::OutOfBuffers | Error::Busy | Error::TimedOut | Error::Interrupted
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::NoSuchDevice => "no such device",
            Error::Busy => "device or resource busy",
            Error::OutOfMemory => "out of memory",
            Error::OutOfBuffers => "no free packet buffer",
            Error::NetworkDown => "network is down",
            Error::MessageTooLong => "message too long for slot/device MTU",
            Error::Stage1TooLarge => "stage-1 payload exceeds MTU",
            Error::NoSpace => "caller buffer too small",
            Error::Fault => "bad caller pointer",
            Error::Interrupted => "interrupted, restart the call",
            Error::TimedOut => "request timed out",
            Error::InvalidArgument => "invalid argument",
        };
        f.write_str(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_is_stable() {
        assert_eq!(Error::NoSuchDevice.errno(), errno::ENODEV);
        assert_eq!(Error::Busy.errno(), errno::EBUSY);
        assert_eq!(Error::OutOfMemory.errno(), errno::ENOMEM);
        assert_eq!(Error::OutOfBuffers.errno(), errno::ENOBUFS);
        assert_eq!(Error::NetworkDown.errno(), errno::ENETDOWN);
        assert_eq!(Error::Stage1TooLarge.errno(), errno::ESTAGE1SIZE);
        assert_eq!(Error::NoSpace.errno(), errno::ENOSPC);
        assert_eq!(Error::Fault.errno(), errno::EFAULT);
        assert_eq!(Error::Interrupted.errno(), errno::ERESTARTSYS);
    }

    #[test]
    fn transient_classification() {
        assert!(Error::OutOfBuffers.is_transient());
        assert!(!Error::Stage1TooLarge.is_transient());
    }
}
