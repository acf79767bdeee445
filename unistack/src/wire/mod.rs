//! Headers on the wire.
//!
//! Each protocol has a `Frame` or `Packet` view over any byte buffer, with one accessor per
//! header field, and a `Repr` holding the fields that matter after validation. Views never copy,
//! they are laid over the region of a pool buffer that starts at the protocol's layer marker, see
//! [`storage::Packet`].
//!
//! [`storage::Packet`]: ../storage/struct.Packet.html
use core::fmt;

pub(crate) mod checksum;
pub mod ethernet;
pub mod ipv4;
pub mod tcp;

pub use self::ethernet::{
    Address as EthernetAddress,
    EtherType as EthernetProtocol,
    Frame as EthernetFrame,
    Repr as EthernetRepr};

pub use self::ipv4::{
    Address as Ipv4Address,
    Packet as Ipv4Packet,
    Repr as Ipv4Repr};

pub use self::tcp::{
    Flags as TcpFlags,
    Packet as TcpPacket,
    Repr as TcpRepr,
    SeqNumber as TcpSeqNumber};

enum_with_unknown! {
    /// The protocol carried in a datagram.
    pub enum IpProtocol(u8) {
        Icmp = 1,
        Tcp  = 6,
        Udp  = 17,
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IpProtocol::Icmp => f.write_str("ICMP"),
            IpProtocol::Tcp => f.write_str("TCP"),
            IpProtocol::Udp => f.write_str("UDP"),
            IpProtocol::Unknown(other) => write!(f, "{}", other),
        }
    }
}

/// Why a header could not be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The buffer ends before the header, or before the length the header claims.
    Truncated,
    /// The checksum does not match.
    WrongChecksum,
    /// A field names something this stack does not know.
    Unrecognized,
    /// Fields contradict each other, as a TCP SYN with FIN or an IPv4 header beyond the total
    /// length.
    Malformed,
    /// Valid but not handled here, as IPv4 fragments.
    Unsupported,
}

pub type Result<T> = core::result::Result<T, Error>;

/// Whether and how a transport checksum is verified.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Checksum {
    /// Verify against the pseudo header of these addresses.
    Manual {
        src_addr: Ipv4Address,
        dst_addr: Ipv4Address,
    },
    /// Trust the device, it has already checked.
    Ignored,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Error::Truncated => "truncated",
            Error::WrongChecksum => "wrong checksum",
            Error::Unrecognized => "unrecognized",
            Error::Malformed => "malformed",
            Error::Unsupported => "unsupported",
        })
    }
}
