//! The protocol layers.
//!
//! Each layer is an endpoint holding the configuration and state of one protocol. Receiving
//! peels the layer's header off a [`storage::Packet`] and records its position with a marker,
//! sending prepends the header into the headroom of the packet. No layer copies payload data.
//!
//! [`storage::Packet`]: ../storage/struct.Packet.html
pub mod eth;
pub mod ip;
pub mod tcp;

use core::fmt;

use crate::storage::BufferError;
use crate::wire;

/// Errors of the processing layers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// The packet or operation violates the protocol.
    Illegal,

    /// The buffer is too small for the operation.
    BadSize,

    /// No route or neighbor for the destination.
    Unreachable,

    /// Some resource, usually buffers, ran out.
    Exhausted,
}

/// The result type of the layers.
pub type Result<T> = core::result::Result<T, Error>;

/// Wraps a closure so that it can act as a handler of a layer.
pub struct FnHandler<F>(pub F);

impl From<wire::Error> for Error {
    fn from(_: wire::Error) -> Self {
        Error::Illegal
    }
}

impl From<BufferError> for Error {
    fn from(_: BufferError) -> Self {
        Error::Exhausted
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Illegal => write!(f, "illegal packet or operation"),
            Error::BadSize => write!(f, "buffer too small"),
            Error::Unreachable => write!(f, "destination unreachable"),
            Error::Exhausted => write!(f, "resources exhausted"),
        }
    }
}
