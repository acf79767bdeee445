//! The TCP layer.
//!
//! Relevant material for reading:
//! Main TCP rfc (skip if confident): https://tools.ietf.org/html/rfc793
//! Errata and comments: https://tools.ietf.org/html/rfc1122#section-4.2
//! TCP congestion control: https://tools.ietf.org/html/rfc5681
//! NewReno fast recovery: https://tools.ietf.org/html/rfc6582
//! Computing the retransmission timer: https://tools.ietf.org/html/rfc6298
//!
//! ## Structure
//!
//! The [`Tcp`] engine owns the demux table, mapping each [`FourTuple`] to exactly one
//! [`Connection`], and the listeners. Inbound segments validated by the IP layer are handed to
//! [`Tcp::input`] which routes them to a connection or answers a SYN on a listening port.
//! Connections queue the segments they emit, the interface collects them with [`Tcp::dequeue`].
//! Timers are driven by [`Tcp::on_tick`] from the periodic tick of the owning core.
//!
//! Application callbacks run synchronously within segment processing, on the same thread. When
//! a connection reaches `CLOSED` its table entry is removed before its close callbacks fire.
//!
//! [`Tcp`]: struct.Tcp.html
//! [`FourTuple`]: struct.FourTuple.html
//! [`Connection`]: struct.Connection.html
//! [`Tcp::input`]: struct.Tcp.html#method.input
//! [`Tcp::dequeue`]: struct.Tcp.html#method.dequeue
//! [`Tcp::on_tick`]: struct.Tcp.html#method.on_tick
use core::fmt;

mod config;
pub mod connection;
mod endpoint;
mod listener;
mod read_buffer;
mod rttm;
mod siphash;
mod state;
mod write_queue;


pub use self::config::Config;
pub use self::connection::{Connection, Disconnect};
pub use self::endpoint::{FourTuple, Stats, Tcp};
pub use self::listener::Listener;
pub use self::rttm::{Rttm, CLOCK_G};
pub use self::siphash::IsnGenerator;
pub use self::state::{Event, State};

/// Errors visible to users of connections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// The port is already bound.
    AddressInUse,

    /// The event is not legal in the state of the connection.
    InvalidTransition {
        from: State,
        event: Event,
    },

    /// The connection is not open.
    NotConnected,

    /// The connection is closing, no more data may be written.
    Closing,

    /// The remote reset the connection.
    Reset,

    /// The remote refused the connection attempt.
    Refused,

    /// The retransmission limit was reached.
    TimedOut,

    /// The connection was aborted locally.
    Aborted,

    /// No port or buffer was available.
    Exhausted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::AddressInUse => write!(f, "address in use"),
            Error::InvalidTransition { from, event } =>
                write!(f, "invalid event {} in state {}", event, from),
            Error::NotConnected => write!(f, "connection does not exist"),
            Error::Closing => write!(f, "connection closing"),
            Error::Reset => write!(f, "connection reset"),
            Error::Refused => write!(f, "connection refused"),
            Error::TimedOut => write!(f, "connection timed out"),
            Error::Aborted => write!(f, "connection aborted"),
            Error::Exhausted => write!(f, "resources exhausted"),
        }
    }
}
