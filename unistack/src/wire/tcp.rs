//! Transmission Control Protocol segments.
use core::{cmp, fmt, ops};
use byteorder::{ByteOrder, NetworkEndian};

use super::{Checksum, Error, IpProtocol, Ipv4Address, Result};
use super::checksum;

/// A TCP sequence number.
///
/// Sequence numbers live in a space modulo 2<sup>32</sup>. Two of them compare by the sign of
/// their wrapping difference, so ordering is only meaningful within half the space.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
pub struct SeqNumber(pub i32);

impl SeqNumber {
    /// The later of two sequence numbers.
    pub fn max(self, rhs: Self) -> Self {
        cmp::max_by(self, rhs, |a, b| a.distance(*b).cmp(&0))
    }

    /// The earlier of two sequence numbers.
    pub fn min(self, rhs: Self) -> Self {
        cmp::min_by(self, rhs, |a, b| a.distance(*b).cmp(&0))
    }

    /// Signed distance `self - rhs`, negative when `rhs` is ahead.
    pub fn distance(self, rhs: Self) -> i32 {
        self.0.wrapping_sub(rhs.0)
    }

    fn offset(self, by: usize, negate: bool) -> SeqNumber {
        assert!(by <= i32::max_value() as usize, "sequence offset {} exceeds half the space", by);
        let by = by as i32;
        SeqNumber(if negate { self.0.wrapping_sub(by) } else { self.0.wrapping_add(by) })
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&(self.0 as u32), f)
    }
}

impl ops::Add<usize> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: usize) -> SeqNumber {
        self.offset(rhs, false)
    }
}

impl ops::Sub<usize> for SeqNumber {
    type Output = SeqNumber;

    fn sub(self, rhs: usize) -> SeqNumber {
        self.offset(rhs, true)
    }
}

impl ops::AddAssign<usize> for SeqNumber {
    fn add_assign(&mut self, rhs: usize) {
        *self = self.offset(rhs, false);
    }
}

/// The number of octets from `rhs` up to `self`, which must not be behind.
impl ops::Sub for SeqNumber {
    type Output = usize;

    fn sub(self, rhs: SeqNumber) -> usize {
        let distance = self.distance(rhs);
        assert!(distance >= 0, "sequence number {} is behind {}", self, rhs);
        distance as usize
    }
}

impl cmp::PartialOrd for SeqNumber {
    fn partial_cmp(&self, other: &SeqNumber) -> Option<cmp::Ordering> {
        Some(self.distance(*other).cmp(&0))
    }
}

/// The control bits of a segment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Flags(pub u16);

mod field {
    pub type Field = core::ops::Range<usize>;

    pub const SRC_PORT: Field = 0..2;
    pub const DST_PORT: Field = 2..4;
    pub const SEQ_NUM:  Field = 4..8;
    pub const ACK_NUM:  Field = 8..12;
    /// Data offset in the high nibble, control bits in the low nine bits.
    pub const FLAGS:    Field = 12..14;
    pub const WIN_SIZE: Field = 14..16;
    pub const CHECKSUM: Field = 16..18;
    pub const URGENT:   Field = 18..20;

    pub const OPT_END: u8 = 0;
    pub const OPT_NOP: u8 = 1;
    pub const OPT_MSS: u8 = 2;
    pub const OPT_WS:  u8 = 3;
    pub const OPT_SACKPERM: u8 = 4;
}

/// Length of a header without options.
pub const HEADER_LEN: usize = field::URGENT.end;

/// Length of the maximum segment size option.
const MSS_OPTION_LEN: usize = 4;

/// A read/write view of a segment, header and payload and nothing after it.
#[derive(Debug, PartialEq, Clone)]
pub struct Packet<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    /// Wrap a buffer without checking its length.
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
    /// The buffer must hold the fixed header and the whole header the data offset claims, which
    /// itself must be at least the fixed header.
    pub fn check_len(&self) -> Result<()> {
        let len = self.buffer.as_ref().len();
        if len < HEADER_LEN {
            return Err(Error::Truncated);
        }
        match usize::from(self.header_len()) {
            header if header < HEADER_LEN => Err(Error::Malformed),
            header if header > len => Err(Error::Truncated),
            _ => Ok(()),
        }
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    fn read_u16(&self, range: field::Field) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[range])
    }

    pub fn src_port(&self) -> u16 {
        self.read_u16(field::SRC_PORT)
    }

    pub fn dst_port(&self) -> u16 {
        self.read_u16(field::DST_PORT)
    }

    pub fn seq_number(&self) -> SeqNumber {
        SeqNumber(NetworkEndian::read_i32(&self.buffer.as_ref()[field::SEQ_NUM]))
    }

    /// The acknowledgement number field, meaningful only with the ACK flag.
    pub fn ack_number(&self) -> SeqNumber {
        SeqNumber(NetworkEndian::read_i32(&self.buffer.as_ref()[field::ACK_NUM]))
    }

    pub fn flags(&self) -> Flags {
        Flags(self.read_u16(field::FLAGS) & Flags::MASK)
    }

    /// The header length in octets, options included.
    pub fn header_len(&self) -> u8 {
        (self.read_u16(field::FLAGS) >> 12) as u8 * 4
    }

    pub fn window_len(&self) -> u16 {
        self.read_u16(field::WIN_SIZE)
    }

    pub fn checksum(&self) -> u16 {
        self.read_u16(field::CHECKSUM)
    }

    /// The length of the segment in sequence space, payload plus SYN and FIN.
    pub fn sequence_len(&self) -> usize {
        self.payload_slice().len() + self.flags().sequence_len()
    }

    /// The options between the fixed header and the payload.
    pub fn options(&self) -> &[u8] {
        &self.buffer.as_ref()[HEADER_LEN..usize::from(self.header_len())]
    }

    pub fn payload_slice(&self) -> &[u8] {
        &self.buffer.as_ref()[usize::from(self.header_len())..]
    }

    /// Sum of pseudo header and segment, all ones for a correct checksum.
    fn sum(&self, src_addr: Ipv4Address, dst_addr: Ipv4Address) -> u16 {
        let data = self.buffer.as_ref();
        checksum::combine(&[
            checksum::pseudo_header(src_addr, dst_addr, IpProtocol::Tcp, data.len() as u32),
            checksum::data(data),
        ])
    }

    /// Validate the checksum against the IPv4 pseudo header.
    ///
    /// Always passes when fuzzing.
    pub fn verify_checksum(&self, src_addr: Ipv4Address, dst_addr: Ipv4Address) -> bool {
        cfg!(fuzzing) || self.sum(src_addr, dst_addr) == !0
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    fn write_u16(&mut self, range: field::Field, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[range], value)
    }

    pub fn set_src_port(&mut self, value: u16) {
        self.write_u16(field::SRC_PORT, value)
    }

    pub fn set_dst_port(&mut self, value: u16) {
        self.write_u16(field::DST_PORT, value)
    }

    pub fn set_seq_number(&mut self, value: SeqNumber) {
        NetworkEndian::write_i32(&mut self.buffer.as_mut()[field::SEQ_NUM], value.0)
    }

    pub fn set_ack_number(&mut self, value: SeqNumber) {
        NetworkEndian::write_i32(&mut self.buffer.as_mut()[field::ACK_NUM], value.0)
    }

    /// Replace all control bits, keeping the data offset.
    pub fn set_flags(&mut self, flags: Flags) {
        let offset = self.read_u16(field::FLAGS) & 0xf000;
        self.write_u16(field::FLAGS, offset | (flags.0 & Flags::MASK))
    }

    /// Set the header length in octets, a multiple of four.
    ///
    /// Invalidates an earlier [`check_len`](#method.check_len).
    pub fn set_header_len(&mut self, value: u8) {
        let bits = self.read_u16(field::FLAGS) & 0x0fff;
        self.write_u16(field::FLAGS, bits | u16::from(value / 4) << 12)
    }

    pub fn set_window_len(&mut self, value: u16) {
        self.write_u16(field::WIN_SIZE, value)
    }

    pub fn set_checksum(&mut self, value: u16) {
        self.write_u16(field::CHECKSUM, value)
    }

    /// Compute the checksum over pseudo header, header and payload.
    pub fn fill_checksum(&mut self, src_addr: Ipv4Address, dst_addr: Ipv4Address) {
        self.set_checksum(0);
        let sum = self.sum(src_addr, dst_addr);
        self.set_checksum(!sum)
    }

    fn options_mut(&mut self) -> &mut [u8] {
        let header_len = usize::from(self.header_len());
        &mut self.buffer.as_mut()[HEADER_LEN..header_len]
    }

    pub fn payload_mut_slice(&mut self) -> &mut [u8] {
        let header_len = usize::from(self.header_len());
        &mut self.buffer.as_mut()[header_len..]
    }
}

macro_rules! flag_bits {
    ($($flag:ident, $get:ident, $set:ident = $bit:expr;)*) => {
        impl Flags {
            $(pub const $flag: Flags = Flags($bit);)*

            $(
                pub fn $get(&self) -> bool {
                    self.0 & $bit != 0
                }

                pub fn $set(&mut self, value: bool) {
                    if value { self.0 |= $bit } else { self.0 &= !$bit }
                }
            )*
        }

        impl fmt::Display for Flags {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                let mut sep = "";
                $(
                    if self.$get() {
                        write!(f, "{}{}", sep, stringify!($flag))?;
                        sep = "|";
                    }
                )*
                Ok(())
            }
        }
    }
}

flag_bits! {
    SYN, syn, set_syn = 0x002;
    ACK, ack, set_ack = 0x010;
    FIN, fin, set_fin = 0x001;
    RST, rst, set_rst = 0x004;
    PSH, psh, set_psh = 0x008;
    URG, urg, set_urg = 0x020;
}

impl Flags {
    /// The nine control bits, NS included.
    const MASK: u16 = 0x1ff;

    /// SYN and FIN each occupy one sequence number.
    pub fn sequence_len(self) -> usize {
        usize::from(self.syn()) + usize::from(self.fin())
    }
}

impl ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

/// Find the maximum segment size among the options of a header.
///
/// Window scale and selective acknowledgement permission are length checked but otherwise
/// ignored, as are unknown kinds.
fn max_seg_size(mut options: &[u8]) -> Result<Option<u16>> {
    let mut mss = None;
    while let Some(&kind) = options.first() {
        match kind {
            field::OPT_END => break,
            field::OPT_NOP => {
                options = &options[1..];
                continue;
            },
            _ => (),
        }

        let len = usize::from(*options.get(1).ok_or(Error::Truncated)?);
        if len < 2 {
            return Err(Error::Malformed);
        }
        let data = options.get(2..len).ok_or(Error::Truncated)?;
        match (kind, len) {
            (field::OPT_MSS, 4) => mss = Some(NetworkEndian::read_u16(data)),
            (field::OPT_WS, 3) | (field::OPT_SACKPERM, 2) => (),
            (field::OPT_MSS, _) | (field::OPT_WS, _) | (field::OPT_SACKPERM, _) =>
                return Err(Error::Malformed),
            _ => (),
        }
        options = &options[len..];
    }
    Ok(mss)
}

/// A high-level representation of a segment header.
///
/// Window scaling and selective acknowledgements are never negotiated, so only the maximum
/// segment size option is represented.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    pub src_port:     u16,
    pub dst_port:     u16,
    pub flags:        Flags,
    pub seq_number:   SeqNumber,
    /// Present exactly when the ACK flag is set.
    pub ack_number:   Option<SeqNumber>,
    pub window_len:   u16,
    pub max_seg_size: Option<u16>,
    pub payload_len:  u16,
}

impl Repr {
    /// Parse and validate a segment.
    ///
    /// Zero ports and SYN together with FIN are malformed. The urgent pointer is ignored, the
    /// urgent byte stays in the stream.
    pub fn parse<T: AsRef<[u8]>>(packet: &Packet<T>, checksum: Checksum) -> Result<Repr> {
        packet.check_len()?;
        if packet.src_port() == 0 || packet.dst_port() == 0 {
            return Err(Error::Malformed);
        }

        if let Checksum::Manual { src_addr, dst_addr } = checksum {
            if !packet.verify_checksum(src_addr, dst_addr) {
                return Err(Error::WrongChecksum);
            }
        }

        let flags = packet.flags();
        if flags.syn() && flags.fin() {
            return Err(Error::Malformed);
        }

        Ok(Repr {
            src_port:     packet.src_port(),
            dst_port:     packet.dst_port(),
            flags,
            seq_number:   packet.seq_number(),
            ack_number:   if flags.ack() { Some(packet.ack_number()) } else { None },
            window_len:   packet.window_len(),
            max_seg_size: max_seg_size(packet.options())?,
            payload_len:  packet.payload_slice().len() as u16,
        })
    }

    /// The length of the emitted header.
    pub fn header_len(&self) -> usize {
        HEADER_LEN + if self.max_seg_size.is_some() { MSS_OPTION_LEN } else { 0 }
    }

    /// The length of the emitted segment, header and payload.
    pub fn buffer_len(&self) -> usize {
        self.header_len() + usize::from(self.payload_len)
    }

    /// Write the header.
    ///
    /// The ACK flag follows `ack_number`. The checksum is left for
    /// [`fill_checksum`](struct.Packet.html#method.fill_checksum) once the payload is in place.
    pub fn emit<T: AsRef<[u8]> + AsMut<[u8]>>(&self, packet: &mut Packet<T>) {
        packet.set_src_port(self.src_port);
        packet.set_dst_port(self.dst_port);
        packet.set_seq_number(self.seq_number);
        packet.set_ack_number(self.ack_number.unwrap_or_default());
        packet.set_window_len(self.window_len);
        packet.set_header_len(self.header_len() as u8);
        let mut flags = self.flags;
        flags.set_ack(self.ack_number.is_some());
        packet.set_flags(flags);
        packet.write_u16(field::URGENT, 0);
        if let Some(mss) = self.max_seg_size {
            let options = packet.options_mut();
            options[0] = field::OPT_MSS;
            options[1] = MSS_OPTION_LEN as u8;
            NetworkEndian::write_u16(&mut options[2..4], mss);
        }
    }

    /// The length of the segment in sequence space.
    pub fn sequence_len(&self) -> usize {
        usize::from(self.payload_len) + self.flags.sequence_len()
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TCP {}->{} [{}] seq={}", self.src_port, self.dst_port, self.flags, self.seq_number)?;
        if let Some(ack) = self.ack_number {
            write!(f, " ack={}", ack)?;
        }
        write!(f, " win={} len={}", self.window_len, self.payload_len)?;
        if let Some(mss) = self.max_seg_size {
            write!(f, " mss={}", mss)?;
        }
        Ok(())
    }
}
