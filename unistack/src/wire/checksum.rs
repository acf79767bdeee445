//! RFC 1071 internet checksums.
use byteorder::{ByteOrder, NetworkEndian};

use super::{IpProtocol, Ipv4Address};

/// Fold the carries of a wide sum back into sixteen bits.
fn fold(mut sum: u64) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum as u16
}

/// The ones' complement sum of `data` as big endian words, without the final complement.
///
/// An odd trailing octet is padded with zero.
pub(crate) fn data(data: &[u8]) -> u16 {
    let mut words = data.chunks_exact(2);
    let mut sum: u64 = words.by_ref().map(|word| u64::from(NetworkEndian::read_u16(word))).sum();
    if let [odd] = words.remainder() {
        sum += u64::from(*odd) << 8;
    }
    fold(sum)
}

/// Add partial sums.
pub(crate) fn combine(sums: &[u16]) -> u16 {
    fold(sums.iter().map(|&sum| u64::from(sum)).sum())
}

/// The sum of the IPv4 pseudo header of a transport segment of `length` octets.
pub(crate) fn pseudo_header(
    src_addr: Ipv4Address,
    dst_addr: Ipv4Address,
    protocol: IpProtocol,
    length: u32,
) -> u16 {
    let mut proto_len = [0u8; 4];
    proto_len[1] = protocol.into();
    NetworkEndian::write_u16(&mut proto_len[2..], length as u16);
    combine(&[data(&src_addr.0), data(&dst_addr.0), data(&proto_len)])
}
