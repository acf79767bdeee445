//! Ethernet II frames, without 802.1Q tags.
use core::fmt;
use byteorder::{ByteOrder, NetworkEndian};

use super::{Error, Result};

enum_with_unknown! {
    /// The protocol of the frame payload.
    pub enum EtherType(u16) {
        Ipv4 = 0x0800,
        Arp  = 0x0806,
        Ipv6 = 0x86DD,
    }
}

impl fmt::Display for EtherType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            EtherType::Ipv4 => f.write_str("IPv4"),
            EtherType::Arp => f.write_str("ARP"),
            EtherType::Ipv6 => f.write_str("IPv6"),
            EtherType::Unknown(other) => write!(f, "0x{:04x}", other),
        }
    }
}

/// A hardware address.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Address(pub [u8; 6]);

impl Address {
    pub const BROADCAST: Address = Address([0xff; 6]);

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// The group bit of the first octet, broadcast included.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 1 == 1
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

const DST_ADDR: core::ops::Range<usize> = 0..6;
const SRC_ADDR: core::ops::Range<usize> = 6..12;
const ETHERTYPE: core::ops::Range<usize> = 12..14;

/// Length of the header, the payload follows directly.
pub const HEADER_LEN: usize = ETHERTYPE.end;

/// A read/write view of a frame.
#[derive(Debug, Clone)]
pub struct Frame<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Frame<T> {
    pub fn new_unchecked(buffer: T) -> Frame<T> {
        Frame { buffer }
    }

    /// Wrap a buffer that holds at least a whole header.
    pub fn new_checked(buffer: T) -> Result<Frame<T>> {
        let frame = Frame { buffer };
        frame.check_len()?;
        Ok(frame)
    }

    pub fn check_len(&self) -> Result<()> {
        if self.buffer.as_ref().len() >= HEADER_LEN {
            Ok(())
        } else {
            Err(Error::Truncated)
        }
    }

    fn addr(&self, range: core::ops::Range<usize>) -> Address {
        let mut addr = Address::default();
        addr.0.copy_from_slice(&self.buffer.as_ref()[range]);
        addr
    }

    pub fn dst_addr(&self) -> Address {
        self.addr(DST_ADDR)
    }

    pub fn src_addr(&self) -> Address {
        self.addr(SRC_ADDR)
    }

    pub fn ethertype(&self) -> EtherType {
        NetworkEndian::read_u16(&self.buffer.as_ref()[ETHERTYPE]).into()
    }

    pub fn payload_slice(&self) -> &[u8] {
        &self.buffer.as_ref()[HEADER_LEN..]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Frame<T> {
    pub fn set_dst_addr(&mut self, addr: Address) {
        self.buffer.as_mut()[DST_ADDR].copy_from_slice(&addr.0)
    }

    pub fn set_src_addr(&mut self, addr: Address) {
        self.buffer.as_mut()[SRC_ADDR].copy_from_slice(&addr.0)
    }

    pub fn set_ethertype(&mut self, ethertype: EtherType) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[ETHERTYPE], ethertype.into())
    }

    pub fn payload_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[HEADER_LEN..]
    }
}

/// The parsed header of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Repr {
    pub src_addr:  Address,
    pub dst_addr:  Address,
    pub ethertype: EtherType,
}

impl Repr {
    pub fn parse<T: AsRef<[u8]>>(frame: &Frame<T>) -> Result<Repr> {
        frame.check_len()?;
        Ok(Repr {
            src_addr: frame.src_addr(),
            dst_addr: frame.dst_addr(),
            ethertype: frame.ethertype(),
        })
    }

    pub fn header_len(&self) -> usize {
        HEADER_LEN
    }

    pub fn emit<T: AsRef<[u8]> + AsMut<[u8]>>(&self, frame: &mut Frame<T>) {
        frame.set_dst_addr(self.dst_addr);
        frame.set_src_addr(self.src_addr);
        frame.set_ethertype(self.ethertype);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static FRAME_BYTES: [u8; 18] =
        [0x01, 0x02, 0x03, 0x04, 0x05, 0x06,
         0x11, 0x12, 0x13, 0x14, 0x15, 0x16,
         0x08, 0x00,
         0xaa, 0x00, 0x00, 0xff];

    #[test]
    fn deconstruct() {
        let frame = Frame::new_checked(&FRAME_BYTES[..]).unwrap();
        assert_eq!(frame.dst_addr(), Address([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]));
        assert_eq!(frame.src_addr(), Address([0x11, 0x12, 0x13, 0x14, 0x15, 0x16]));
        assert_eq!(frame.ethertype(), EtherType::Ipv4);
        assert_eq!(frame.payload_slice(), &[0xaa, 0x00, 0x00, 0xff]);
    }

    #[test]
    fn construct() {
        let mut bytes = [0xa5u8; 18];
        let repr = Repr {
            dst_addr: Address([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]),
            src_addr: Address([0x11, 0x12, 0x13, 0x14, 0x15, 0x16]),
            ethertype: EtherType::Ipv4,
        };
        let mut frame = Frame::new_unchecked(&mut bytes[..]);
        repr.emit(&mut frame);
        frame.payload_mut_slice().copy_from_slice(&[0xaa, 0x00, 0x00, 0xff]);
        assert_eq!(&bytes[..], &FRAME_BYTES[..]);
    }

    #[test]
    fn truncated() {
        assert_eq!(Frame::new_checked(&FRAME_BYTES[..13]).err(), Some(Error::Truncated));
    }

    #[test]
    fn address_kinds() {
        assert!(Address::BROADCAST.is_broadcast());
        assert!(Address([0x01, 0, 0x5e, 0, 0, 1]).is_multicast());
        assert!(!Address([0x02, 0, 0, 0, 0, 1]).is_multicast());
        assert_eq!(format!("{}", Address([0x02, 0, 0, 0, 0xab, 1])), "02:00:00:00:ab:01");
    }
}
