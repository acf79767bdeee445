//! The Ethernet layer.
//!
//! Filters incoming frames by destination and prepends headers to outgoing packets. Address
//! resolution is external to the stack, neighbors are configured statically.
use alloc::collections::BTreeMap;

use crate::layer::{Error, Result};
use crate::storage::{Layer, Packet};
use crate::wire::{EthernetAddress, EthernetFrame, EthernetProtocol, EthernetRepr, Ipv4Address};
use crate::wire::ethernet::HEADER_LEN;

pub struct Endpoint {
    /// Our own address.
    ///
    /// We ignore any packets with mismatching destination.
    addr: EthernetAddress,

    /// Hardware addresses of the directly reachable hosts.
    neighbors: BTreeMap<Ipv4Address, EthernetAddress>,
}

impl Endpoint {
    pub fn new(addr: EthernetAddress) -> Self {
        Endpoint {
            addr,
            neighbors: BTreeMap::new(),
        }
    }

    pub fn addr(&self) -> EthernetAddress {
        self.addr
    }

    /// Add or replace a static neighbor entry, returning the previous hardware address.
    pub fn add_neighbor(&mut self, ip: Ipv4Address, hw: EthernetAddress) -> Option<EthernetAddress> {
        self.neighbors.insert(ip, hw)
    }

    pub fn neighbor(&self, ip: Ipv4Address) -> Option<EthernetAddress> {
        self.neighbors.get(&ip).cloned()
    }

    fn accepts(&self, dst_addr: EthernetAddress) -> bool {
        self.addr == dst_addr || dst_addr.is_broadcast()
    }

    /// Accept an incoming frame.
    ///
    /// On success the link header has been peeled, the layer of the packet begins at the network
    /// header which is also marked.
    pub fn receive(&self, packet: &Packet) -> Result<EthernetRepr> {
        let repr = {
            let data = packet.data();
            let frame = EthernetFrame::new_checked(&*data)?;
            EthernetRepr::parse(&frame)?
        };

        if !self.accepts(repr.dst_addr) {
            net_trace!("eth: not for us, dst {}", repr.dst_addr);
            return Err(Error::Unreachable);
        }

        packet.mark(Layer::Link);
        packet.increment_layer_begin(HEADER_LEN as isize);
        packet.mark(Layer::Network);
        Ok(repr)
    }

    /// Prepend an Ethernet header addressed to the neighbor owning `dst_addr`.
    ///
    /// The layer of the packet must begin at an IPv4 header.
    pub fn send(&self, packet: &Packet, dst_addr: Ipv4Address) -> Result<()> {
        let dst_hw = match self.neighbor(dst_addr) {
            Some(hw) => hw,
            None if dst_addr.is_broadcast() => EthernetAddress::BROADCAST,
            None => {
                net_debug!("eth: no neighbor for {}", dst_addr);
                return Err(Error::Unreachable);
            },
        };

        if packet.layer_begin() < HEADER_LEN {
            return Err(Error::BadSize);
        }

        packet.increment_layer_begin(-(HEADER_LEN as isize));
        packet.mark(Layer::Link);
        let repr = EthernetRepr {
            src_addr: self.addr,
            dst_addr: dst_hw,
            ethertype: EthernetProtocol::Ipv4,
        };
        let mut data = packet.data_mut();
        repr.emit(&mut EthernetFrame::new_unchecked(&mut *data));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;
    use super::*;
    use crate::storage::{BufferConfig, BufferStore, Status};

    const MAC_A: EthernetAddress = EthernetAddress([0x02, 0, 0, 0, 0, 1]);
    const MAC_B: EthernetAddress = EthernetAddress([0x02, 0, 0, 0, 0, 2]);
    const IP_B: Ipv4Address = Ipv4Address::new(10, 0, 0, 2);

    fn store() -> Arc<BufferStore> {
        Arc::new(BufferStore::new(BufferConfig {
            buffer_size: 128,
            buffer_count: 4,
            ..BufferConfig::default()
        }))
    }

    #[test]
    fn send_then_receive() {
        let store = store();
        let mut sender = Endpoint::new(MAC_A);
        sender.add_neighbor(IP_B, MAC_B);
        let receiver = Endpoint::new(MAC_B);

        let packet = Packet::with_headroom(&store, HEADER_LEN).unwrap();
        packet.set_size(4);
        packet.data_mut().copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(sender.send(&packet, IP_B), Ok(()));
        assert_eq!(packet.size(), HEADER_LEN + 4);

        let incoming = Packet::new(BufferStore::lend(&store).unwrap(), packet.size(), Status::Upstream);
        incoming.data_mut().copy_from_slice(&packet.data());
        let repr = receiver.receive(&incoming).unwrap();
        assert_eq!(repr.src_addr, MAC_A);
        assert_eq!(repr.ethertype, EthernetProtocol::Ipv4);
        assert_eq!(&*incoming.data(), &[1, 2, 3, 4]);
        assert_eq!(incoming.offset(Layer::Network), HEADER_LEN);
    }

    #[test]
    fn foreign_destination() {
        let store = store();
        let mut sender = Endpoint::new(MAC_A);
        sender.add_neighbor(IP_B, MAC_B);
        let bystander = Endpoint::new(EthernetAddress([0x02, 0, 0, 0, 0, 3]));

        let packet = Packet::with_headroom(&store, HEADER_LEN).unwrap();
        sender.send(&packet, IP_B).unwrap();
        assert_eq!(bystander.receive(&packet), Err(Error::Unreachable));
    }

    #[test]
    fn unknown_neighbor_and_headroom() {
        let store = store();
        let endpoint = Endpoint::new(MAC_A);
        let packet = Packet::with_headroom(&store, HEADER_LEN).unwrap();
        assert_eq!(endpoint.send(&packet, IP_B), Err(Error::Unreachable));

        let mut endpoint = endpoint;
        endpoint.add_neighbor(IP_B, MAC_B);
        let cramped = Packet::with_headroom(&store, 4).unwrap();
        assert_eq!(endpoint.send(&cramped, IP_B), Err(Error::BadSize));
    }
}
