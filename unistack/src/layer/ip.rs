//! The IPv4 layer.
//!
//! Validates incoming headers and checksums, delivers local packets to the transport layer and
//! tags all others as downstream traffic. Downstream packets are forwarded with a decremented
//! time to live when forwarding is enabled, and dropped otherwise.
use crate::layer::{Error, Result};
use crate::storage::{Layer, Packet, Status};
use crate::wire::{IpProtocol, Ipv4Address, Ipv4Packet, Ipv4Repr};
use crate::wire::ipv4::HEADER_LEN;

/// The default time to live of outgoing packets.
pub const DEFAULT_HOP_LIMIT: u8 = 64;

pub struct Endpoint {
    /// Our own address.
    addr: Ipv4Address,

    /// Time to live of packets we originate.
    hop_limit: u8,

    /// Whether packets for other hosts are sent on.
    forwarding: bool,

    /// The identification of the next packet.
    ident: u16,
}

/// The outcome of accepting a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Received {
    /// The packet is addressed to us. Its layer begins at the transport header.
    Local(Ipv4Repr),

    /// The packet is downstream traffic, ready to be sent on to its destination.
    Forward(Ipv4Repr),
}

impl Endpoint {
    pub fn new(addr: Ipv4Address) -> Self {
        Endpoint {
            addr,
            hop_limit: DEFAULT_HOP_LIMIT,
            forwarding: false,
            ident: 0,
        }
    }

    pub fn addr(&self) -> Ipv4Address {
        self.addr
    }

    pub fn set_hop_limit(&mut self, hop_limit: u8) {
        self.hop_limit = hop_limit;
    }

    pub fn set_forwarding(&mut self, forwarding: bool) {
        self.forwarding = forwarding;
    }

    fn accepts(&self, dst_addr: Ipv4Address) -> bool {
        dst_addr == self.addr || dst_addr.is_broadcast()
    }

    /// Accept an incoming packet whose layer begins at the IPv4 header.
    ///
    /// Trailing link layer padding is cut off. Packets that are neither local nor forwarded are
    /// reported as `Unreachable` and should be dropped.
    pub fn receive(&self, packet: &Packet) -> Result<Received> {
        let (repr, header_len) = {
            let data = packet.data();
            let ip = Ipv4Packet::new_checked(&*data)?;
            (Ipv4Repr::parse(&ip)?, usize::from(ip.header_len()))
        };

        packet.mark(Layer::Network);
        packet.set_size(header_len + repr.payload_len);

        if self.accepts(repr.dst_addr) {
            packet.increment_layer_begin(header_len as isize);
            packet.mark(Layer::Transport);
            return Ok(Received::Local(repr));
        }

        packet.set_status(Status::Downstream);
        if !self.forwarding {
            net_trace!("ip: not forwarding packet for {}", repr.dst_addr);
            return Err(Error::Unreachable);
        }

        if repr.hop_limit <= 1 {
            net_debug!("ip: time to live exceeded for {}", repr.dst_addr);
            return Err(Error::Unreachable);
        }

        let mut data = packet.data_mut();
        let mut ip = Ipv4Packet::new_unchecked(&mut *data);
        ip.set_hop_limit(repr.hop_limit - 1);
        ip.fill_checksum();
        Ok(Received::Forward(Ipv4Repr { hop_limit: repr.hop_limit - 1, ..repr }))
    }

    /// Prepend an IPv4 header to a transport payload.
    ///
    /// The whole current layer of the packet is the payload.
    pub fn send(&mut self, packet: &Packet, dst_addr: Ipv4Address, protocol: IpProtocol)
        -> Result<()>
    {
        if packet.layer_begin() < HEADER_LEN {
            return Err(Error::BadSize);
        }

        let repr = Ipv4Repr {
            src_addr: self.addr,
            dst_addr,
            protocol,
            payload_len: packet.size(),
            hop_limit: self.hop_limit,
        };

        packet.increment_layer_begin(-(HEADER_LEN as isize));
        packet.mark(Layer::Network);
        packet.set_status(Status::Downstream);

        let ident = self.ident;
        self.ident = self.ident.wrapping_add(1);

        let mut data = packet.data_mut();
        let mut ip = Ipv4Packet::new_unchecked(&mut *data);
        repr.emit(&mut ip);
        ip.set_ident(ident);
        ip.fill_checksum();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;
    use super::*;
    use crate::storage::{BufferConfig, BufferStore};

    const HERE: Ipv4Address = Ipv4Address::new(10, 0, 0, 1);
    const THERE: Ipv4Address = Ipv4Address::new(10, 0, 0, 2);
    const ELSEWHERE: Ipv4Address = Ipv4Address::new(10, 0, 9, 9);

    fn store() -> Arc<BufferStore> {
        Arc::new(BufferStore::new(BufferConfig {
            buffer_size: 128,
            buffer_count: 4,
            ..BufferConfig::default()
        }))
    }

    fn outgoing(store: &Arc<BufferStore>, from: &mut Endpoint, to: Ipv4Address) -> Packet {
        let packet = Packet::with_headroom(store, HEADER_LEN).unwrap();
        packet.set_size(6);
        packet.data_mut().copy_from_slice(b"abcdef");
        from.send(&packet, to, IpProtocol::Tcp).unwrap();
        packet
    }

    /// Simulate the packet arriving at another host.
    fn arrive(store: &Arc<BufferStore>, packet: &Packet, padding: usize) -> Packet {
        let len = packet.size();
        let incoming = Packet::new(BufferStore::lend(store).unwrap(), len + padding, Status::Upstream);
        incoming.data_mut()[..len].copy_from_slice(&packet.data());
        incoming
    }

    #[test]
    fn local_delivery() {
        let store = store();
        let mut here = Endpoint::new(HERE);
        let there = Endpoint::new(THERE);

        let packet = outgoing(&store, &mut here, THERE);
        assert_eq!(packet.status(), Status::Downstream);
        let incoming = arrive(&store, &packet, 4);
        match there.receive(&incoming) {
            Ok(Received::Local(repr)) => {
                assert_eq!(repr.src_addr, HERE);
                assert_eq!(repr.protocol, IpProtocol::Tcp);
                assert_eq!(repr.payload_len, 6);
            },
            other => panic!("unexpected {:?}", other),
        }
        // The padding was removed.
        assert_eq!(&*incoming.data(), b"abcdef");
        assert_eq!(incoming.offset(Layer::Transport), HEADER_LEN);
    }

    #[test]
    fn identification_advances() {
        let store = store();
        let mut here = Endpoint::new(HERE);
        let first = outgoing(&store, &mut here, THERE);
        let second = outgoing(&store, &mut here, THERE);
        let ident = |packet: &Packet| Ipv4Packet::new_unchecked(&*packet.data()).ident();
        assert_eq!(ident(&second), ident(&first).wrapping_add(1));
    }

    #[test]
    fn forward_or_drop() {
        let store = store();
        let mut here = Endpoint::new(HERE);
        let mut router = Endpoint::new(THERE);

        let packet = outgoing(&store, &mut here, ELSEWHERE);
        let incoming = arrive(&store, &packet, 0);
        assert_eq!(router.receive(&incoming), Err(Error::Unreachable));
        assert_eq!(incoming.status(), Status::Downstream);
        drop(incoming);

        router.set_forwarding(true);
        let incoming = arrive(&store, &packet, 0);
        match router.receive(&incoming) {
            Ok(Received::Forward(repr)) => assert_eq!(repr.hop_limit, DEFAULT_HOP_LIMIT - 1),
            other => panic!("unexpected {:?}", other),
        }
        let data = incoming.data();
        let ip = Ipv4Packet::new_checked(&*data).unwrap();
        assert!(ip.verify_checksum());
        assert_eq!(ip.hop_limit(), DEFAULT_HOP_LIMIT - 1);
    }

    #[test]
    fn corrupt_header() {
        let store = store();
        let mut here = Endpoint::new(HERE);
        let there = Endpoint::new(THERE);
        let packet = outgoing(&store, &mut here, THERE);
        let incoming = arrive(&store, &packet, 0);
        incoming.data_mut()[8] ^= 0x01;
        assert_eq!(there.receive(&incoming), Err(Error::Illegal));
    }
}
