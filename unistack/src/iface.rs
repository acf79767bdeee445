//! A network interface with its protocol stack.
//!
//! One `Interface` is owned by one core. It holds the buffer store, the device and every layer
//! endpoint, so that nothing is shared with other cores except the handoff queue.
use alloc::collections::VecDeque;
use alloc::sync::Arc;

use crate::handoff::{self, Receiver, Sender};
use crate::layer::{eth, ip, FnHandler, Result};
use crate::layer::ip::Received;
use crate::layer::tcp::{Config, Tcp};
use crate::nic::Device;
use crate::storage::{BufferStore, Packet};
use crate::time::Instant;
use crate::wire::{EthernetAddress, IpProtocol, Ipv4Address};

/// Frames received or sent per device call.
const BURST: usize = 32;

/// Handed off tasks run per poll.
const HANDOFF_BURST: usize = 16;

pub struct Interface<D> {
    store: Arc<BufferStore>,
    nic: D,
    eth: eth::Endpoint,
    ip: ip::Endpoint,
    tcp: Tcp,
    /// Downstream packets waiting to be forwarded, with their destination.
    forward: VecDeque<(Ipv4Address, Packet)>,
    handoff: Option<Receiver<D>>,
}

impl<D: Device> Interface<D> {
    pub fn new(
        nic: D,
        store: Arc<BufferStore>,
        hw_addr: EthernetAddress,
        ip_addr: Ipv4Address,
        config: Config,
    ) -> Self {
        Interface {
            tcp: Tcp::new(ip_addr, config, Arc::clone(&store)),
            store,
            nic,
            eth: eth::Endpoint::new(hw_addr),
            ip: ip::Endpoint::new(ip_addr),
            forward: VecDeque::new(),
            handoff: None,
        }
    }

    pub fn store(&self) -> &Arc<BufferStore> {
        &self.store
    }

    pub fn nic(&self) -> &D {
        &self.nic
    }

    pub fn nic_mut(&mut self) -> &mut D {
        &mut self.nic
    }

    pub fn eth_mut(&mut self) -> &mut eth::Endpoint {
        &mut self.eth
    }

    pub fn ip_mut(&mut self) -> &mut ip::Endpoint {
        &mut self.ip
    }

    pub fn tcp(&self) -> &Tcp {
        &self.tcp
    }

    pub fn tcp_mut(&mut self) -> &mut Tcp {
        &mut self.tcp
    }

    /// Accept tasks from other cores through a queue of `capacity` entries.
    ///
    /// Replaces a previously created queue.
    pub fn handoff(&mut self, capacity: usize) -> Sender<D> {
        let (sender, receiver) = handoff::channel(capacity);
        self.handoff = Some(receiver);
        sender
    }

    /// Run tasks handed off by other cores.
    pub fn run_handoff(&mut self) -> usize {
        let receiver = match self.handoff.take() {
            Some(receiver) => receiver,
            None => return 0,
        };
        let count = receiver.run(self, HANDOFF_BURST);
        // A task may have installed a new queue.
        self.handoff.get_or_insert(receiver);
        count
    }

    /// One step of the event loop.
    ///
    /// Runs handed off tasks, receives frames, fires expired timers and transmits. Returns the
    /// number of frames received and sent.
    pub fn poll(&mut self, now: Instant) -> Result<usize> {
        self.run_handoff();
        let received = self.receive(now)?;
        self.tcp.on_tick(now);
        let sent = self.transmit()?;
        Ok(received + sent)
    }

    fn receive(&mut self, now: Instant) -> Result<usize> {
        let Interface { nic, eth, ip, tcp, forward, .. } = self;
        nic.rx(BURST, FnHandler(|packet: Packet| {
            if let Err(error) = eth.receive(&packet) {
                net_trace!("iface: dropped frame: {}", error);
                return;
            }
            match ip.receive(&packet) {
                Ok(Received::Local(repr)) if repr.protocol == IpProtocol::Tcp => {
                    tcp.input(&packet, &repr, now);
                },
                Ok(Received::Local(repr)) => {
                    net_trace!("iface: no handler for protocol {}", repr.protocol);
                },
                Ok(Received::Forward(repr)) => {
                    forward.push_back((repr.dst_addr, packet));
                },
                Err(error) => {
                    net_trace!("iface: dropped packet: {}", error);
                },
            }
        }))
    }

    fn transmit(&mut self) -> Result<usize> {
        let Interface { nic, eth, ip, tcp, forward, .. } = self;
        nic.tx(BURST, FnHandler(|| loop {
            if let Some((dst_addr, packet)) = forward.pop_front() {
                match eth.send(&packet, dst_addr) {
                    Ok(()) => return Some(packet),
                    Err(error) => {
                        net_debug!("iface: can not forward to {}: {}", dst_addr, error);
                        continue;
                    },
                }
            }

            let (dst_addr, packet) = tcp.dequeue()?;
            let sent = ip.send(&packet, dst_addr, IpProtocol::Tcp)
                .and_then(|()| eth.send(&packet, dst_addr));
            match sent {
                Ok(()) => return Some(packet),
                Err(error) => net_debug!("iface: can not send to {}: {}", dst_addr, error),
            }
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::nic::Pipe;
    use crate::storage::BufferConfig;
    use crate::wire::{EthernetFrame, EthernetRepr, EthernetProtocol, Ipv4Packet, Ipv4Repr};
    use crate::nic::{Recv, Send};

    pub const MAC_A: EthernetAddress = EthernetAddress([0x02, 0, 0, 0, 0, 1]);
    pub const MAC_B: EthernetAddress = EthernetAddress([0x02, 0, 0, 0, 0, 2]);
    pub const IP_A: Ipv4Address = Ipv4Address::new(10, 0, 0, 1);
    pub const IP_B: Ipv4Address = Ipv4Address::new(10, 0, 0, 2);

    pub fn store() -> Arc<BufferStore> {
        Arc::new(BufferStore::new(BufferConfig {
            buffer_size: 2048,
            buffer_count: 64,
            ..BufferConfig::default()
        }))
    }

    /// Two interfaces joined by a pipe, `A` and `B`.
    pub fn interface_pair_with(config: Config) -> (Interface<Pipe>, Interface<Pipe>) {
        let (a_store, b_store) = (store(), store());
        let (a_nic, b_nic) = Pipe::pair(Arc::clone(&a_store), Arc::clone(&b_store), 1514);
        let mut a = Interface::new(a_nic, a_store, MAC_A, IP_A, config);
        let mut b = Interface::new(b_nic, b_store, MAC_B, IP_B, config);
        a.eth_mut().add_neighbor(IP_B, MAC_B);
        b.eth_mut().add_neighbor(IP_A, MAC_A);
        (a, b)
    }

    pub fn interface_pair() -> (Interface<Pipe>, Interface<Pipe>) {
        interface_pair_with(Config::default())
    }

    /// Poll both sides until no frame moves.
    pub fn settle(a: &mut Interface<Pipe>, b: &mut Interface<Pipe>, now: Instant) {
        for _ in 0..1000 {
            let moved = a.poll(now).unwrap() + b.poll(now).unwrap();
            if moved == 0 && a.nic().pending() == 0 && b.nic().pending() == 0 {
                return;
            }
        }
        panic!("interfaces did not settle");
    }

    /// A device that records transmissions and injects frames.
    pub struct Tap {
        pub inject: VecDeque<Packet>,
        pub sent: Vec<Vec<u8>>,
    }

    impl Device for Tap {
        fn personality(&self) -> crate::nic::Personality {
            crate::nic::Personality { mtu: 1514 }
        }

        fn tx(&mut self, max: usize, mut sender: impl Send) -> Result<usize> {
            let mut count = 0;
            while count < max {
                match sender.send() {
                    Some(packet) => self.sent.push(packet.data().to_vec()),
                    None => break,
                }
                count += 1;
            }
            Ok(count)
        }

        fn rx(&mut self, max: usize, mut receptor: impl Recv) -> Result<usize> {
            let mut count = 0;
            while count < max {
                match self.inject.pop_front() {
                    Some(packet) => receptor.receive(packet),
                    None => break,
                }
                count += 1;
            }
            Ok(count)
        }
    }

    #[test]
    fn forwards_downstream() {
        let store = store();
        let tap = Tap { inject: VecDeque::new(), sent: Vec::new() };
        let mut router = Interface::new(tap, Arc::clone(&store), MAC_B, IP_B, Config::default());
        let far = Ipv4Address::new(10, 0, 1, 9);
        let far_mac = EthernetAddress([0x02, 0, 0, 0, 0, 9]);
        router.eth_mut().add_neighbor(far, far_mac);
        router.ip_mut().set_forwarding(true);

        // A packet from A to the far host, sent to the router's hardware address.
        let packet = Packet::with_headroom(&store, 0).unwrap();
        packet.set_size(14 + 20 + 4);
        {
            let mut data = packet.data_mut();
            EthernetRepr { src_addr: MAC_A, dst_addr: MAC_B, ethertype: EthernetProtocol::Ipv4 }
                .emit(&mut EthernetFrame::new_unchecked(&mut *data));
            let mut ip = Ipv4Packet::new_unchecked(&mut data[14..]);
            Ipv4Repr {
                src_addr: IP_A,
                dst_addr: far,
                protocol: IpProtocol::Udp,
                payload_len: 4,
                hop_limit: 9,
            }.emit(&mut ip);
            ip.fill_checksum();
        }
        router.nic_mut().inject.push_back(packet);

        assert_eq!(router.poll(Instant::from_millis(0)), Ok(2));
        let sent = &router.nic().sent;
        assert_eq!(sent.len(), 1);
        let frame = EthernetFrame::new_checked(&sent[0][..]).unwrap();
        assert_eq!(EthernetRepr::parse(&frame).unwrap().dst_addr, far_mac);
        let ip = Ipv4Packet::new_checked(&sent[0][14..]).unwrap();
        assert_eq!(ip.hop_limit(), 8);
        assert!(ip.verify_checksum());
    }

    #[test]
    fn foreign_frames_dropped() {
        let (mut a, mut b) = interface_pair();
        b.eth_mut().add_neighbor(IP_A, EthernetAddress([0x02, 0, 0, 0, 0, 7]));
        // B's segments now go to a hardware address A ignores.
        b.tcp_mut().connect(IP_A, 80, |_| ()).unwrap();
        settle(&mut a, &mut b, Instant::from_millis(0));
        assert_eq!(a.tcp().stats().segments_rx, 0);
        assert_eq!(a.store().available(), a.store().total_buffers());
    }
}
