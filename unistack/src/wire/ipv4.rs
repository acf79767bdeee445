//! Internet Protocol version 4 headers.
//!
//! Options are skipped on receipt and never emitted. Fragments are recognized and refused.
use core::fmt;
use core::ops::Range;
use byteorder::{ByteOrder, NetworkEndian};

use super::{Error, IpProtocol, Result};
use super::checksum;

/// An IPv4 address.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Address(pub [u8; 4]);

impl Address {
    pub const BROADCAST: Address = Address([0xff; 4]);

    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Address {
        Address([a, b, c, d])
    }

    /// The address as an integer, first octet most significant.
    pub fn to_network_integer(self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    /// The limited broadcast address.
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

const VER_IHL: usize = 0;
const TOS: usize = 1;
const LENGTH: Range<usize> = 2..4;
const IDENT: Range<usize> = 4..6;
const FLAGS_OFFSET: Range<usize> = 6..8;
const TTL: usize = 8;
const PROTOCOL: usize = 9;
const CHECKSUM: Range<usize> = 10..12;
const SRC_ADDR: Range<usize> = 12..16;
const DST_ADDR: Range<usize> = 16..20;

/// Length of a header without options.
pub const HEADER_LEN: usize = DST_ADDR.end;

const DONT_FRAGMENT: u16 = 0x4000;
const MORE_FRAGMENTS: u16 = 0x2000;
const OFFSET_MASK: u16 = 0x1fff;

/// A read/write view of a datagram.
#[derive(Debug, Clone)]
pub struct Packet<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    pub fn new_unchecked(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    /// Wrap a buffer after [`check_len`](#method.check_len).
    pub fn new_checked(buffer: T) -> Result<Packet<T>> {
        let packet = Packet { buffer };
        packet.check_len()?;
        Ok(packet)
    }

    /// Ensure that no accessor will panic.
    ///
    /// The buffer may be longer than the total length, as with Ethernet padding, but never
    /// shorter. The header must fit into the total length.
    pub fn check_len(&self) -> Result<()> {
        let len = self.buffer.as_ref().len();
        if len < HEADER_LEN {
            return Err(Error::Truncated);
        }
        let header = usize::from(self.header_len());
        let total = usize::from(self.total_len());
        if header < HEADER_LEN || header > total {
            Err(Error::Malformed)
        } else if len < total {
            Err(Error::Truncated)
        } else {
            Ok(())
        }
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    fn read_u16(&self, range: Range<usize>) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[range])
    }

    fn addr(&self, range: Range<usize>) -> Address {
        let mut addr = Address::default();
        addr.0.copy_from_slice(&self.buffer.as_ref()[range]);
        addr
    }

    pub fn version(&self) -> u8 {
        self.buffer.as_ref()[VER_IHL] >> 4
    }

    /// The header length in octets, options included.
    pub fn header_len(&self) -> u8 {
        (self.buffer.as_ref()[VER_IHL] & 0xf) * 4
    }

    pub fn total_len(&self) -> u16 {
        self.read_u16(LENGTH)
    }

    pub fn ident(&self) -> u16 {
        self.read_u16(IDENT)
    }

    /// Whether this is a fragment of a larger datagram.
    pub fn is_fragment(&self) -> bool {
        self.read_u16(FLAGS_OFFSET) & (MORE_FRAGMENTS | OFFSET_MASK) != 0
    }

    pub fn hop_limit(&self) -> u8 {
        self.buffer.as_ref()[TTL]
    }

    pub fn protocol(&self) -> IpProtocol {
        self.buffer.as_ref()[PROTOCOL].into()
    }

    pub fn checksum(&self) -> u16 {
        self.read_u16(CHECKSUM)
    }

    pub fn src_addr(&self) -> Address {
        self.addr(SRC_ADDR)
    }

    pub fn dst_addr(&self) -> Address {
        self.addr(DST_ADDR)
    }

    /// Validate the header checksum. Always passes when fuzzing.
    pub fn verify_checksum(&self) -> bool {
        let header = &self.buffer.as_ref()[..usize::from(self.header_len())];
        cfg!(fuzzing) || checksum::data(header) == !0
    }

    /// The payload up to the total length, any padding cut off.
    pub fn payload_slice(&self) -> &[u8] {
        let range = usize::from(self.header_len())..usize::from(self.total_len());
        &self.buffer.as_ref()[range]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    fn write_u16(&mut self, range: Range<usize>, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[range], value)
    }

    pub fn set_ident(&mut self, value: u16) {
        self.write_u16(IDENT, value)
    }

    /// Overwrite the flags and the fragment offset in one go.
    pub fn set_flags_and_offset(&mut self, value: u16) {
        self.write_u16(FLAGS_OFFSET, value)
    }

    pub fn set_hop_limit(&mut self, value: u8) {
        self.buffer.as_mut()[TTL] = value
    }

    pub fn set_checksum(&mut self, value: u16) {
        self.write_u16(CHECKSUM, value)
    }

    /// Compute the header checksum, after every other header field is final.
    pub fn fill_checksum(&mut self) {
        self.set_checksum(0);
        let header_len = usize::from(self.header_len());
        let sum = checksum::data(&self.buffer.as_ref()[..header_len]);
        self.set_checksum(!sum)
    }

    pub fn payload_mut_slice(&mut self) -> &mut [u8] {
        let range = usize::from(self.header_len())..usize::from(self.total_len());
        &mut self.buffer.as_mut()[range]
    }
}

/// The parsed header of an unfragmented datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Repr {
    pub src_addr:    Address,
    pub dst_addr:    Address,
    pub protocol:    IpProtocol,
    pub payload_len: usize,
    pub hop_limit:   u8,
}

impl Repr {
    /// Parse and validate a datagram.
    ///
    /// Fragments are refused with `Error::Unsupported`, there is no reassembly.
    pub fn parse<T: AsRef<[u8]>>(packet: &Packet<T>) -> Result<Repr> {
        packet.check_len()?;
        if packet.version() != 4 {
            return Err(Error::Malformed);
        }
        if !packet.verify_checksum() {
            return Err(Error::WrongChecksum);
        }
        if packet.is_fragment() {
            return Err(Error::Unsupported);
        }

        Ok(Repr {
            src_addr:    packet.src_addr(),
            dst_addr:    packet.dst_addr(),
            protocol:    packet.protocol(),
            payload_len: packet.payload_slice().len(),
            hop_limit:   packet.hop_limit(),
        })
    }

    /// The length of the emitted header.
    pub fn buffer_len(&self) -> usize {
        HEADER_LEN
    }

    /// Write the header with DF set and identification zero.
    ///
    /// The checksum is left to [`fill_checksum`](struct.Packet.html#method.fill_checksum) so the
    /// caller may still set the identification.
    pub fn emit<T: AsRef<[u8]> + AsMut<[u8]>>(&self, packet: &mut Packet<T>) {
        {
            let data = packet.buffer.as_mut();
            data[VER_IHL] = 0x40 | (HEADER_LEN / 4) as u8;
            data[TOS] = 0;
            data[PROTOCOL] = self.protocol.into();
            data[SRC_ADDR].copy_from_slice(&self.src_addr.0);
            data[DST_ADDR].copy_from_slice(&self.dst_addr.0);
        }
        packet.write_u16(LENGTH, (HEADER_LEN + self.payload_len) as u16);
        packet.set_ident(0);
        packet.set_flags_and_offset(DONT_FRAGMENT);
        packet.set_hop_limit(self.hop_limit);
        packet.set_checksum(0);
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "IPv4 {}->{} proto={} len={} ttl={}",
               self.src_addr, self.dst_addr, self.protocol, self.payload_len, self.hop_limit)
    }
}
