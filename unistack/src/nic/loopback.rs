//! Implementation of a software loop-back device.
use alloc::collections::VecDeque;

use crate::layer::Result;
use crate::storage::{Layer, Packet, Status};
use super::{Device, Personality, Recv, Send};

/// A software loop-back device.
///
/// Transmitted packets are handed back on receive without copying, the buffer simply changes
/// its direction of travel. Holds at most `capacity` packets in flight.
pub struct Loopback {
    queue: VecDeque<Packet>,
    capacity: usize,
    mtu: usize,
}

impl Loopback {
    pub fn new(capacity: usize, mtu: usize) -> Self {
        Loopback {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            mtu,
        }
    }

    /// Packets waiting to be received.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl Device for Loopback {
    fn personality(&self) -> Personality {
        Personality { mtu: self.mtu }
    }

    fn tx(&mut self, max: usize, mut sender: impl Send) -> Result<usize> {
        let mut count = 0;
        while count < max && self.queue.len() < self.capacity {
            match sender.send() {
                Some(packet) => self.queue.push_back(packet),
                None => break,
            }
            count += 1;
        }
        Ok(count)
    }

    fn rx(&mut self, max: usize, mut receptor: impl Recv) -> Result<usize> {
        let mut count = 0;
        while count < max {
            let packet = match self.queue.pop_front() {
                Some(packet) => packet,
                None => break,
            };
            packet.set_status(Status::Upstream);
            packet.mark(Layer::Link);
            receptor.receive(packet);
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;
    use super::*;
    use crate::layer::FnHandler;
    use crate::storage::{BufferConfig, BufferStore};

    #[test]
    fn simple_loopback() {
        let store = Arc::new(BufferStore::new(BufferConfig {
            buffer_size: 64,
            buffer_count: 1,
            ..BufferConfig::default()
        }));
        let mut loopback = Loopback::new(1, 64);

        let mut outgoing = Some(Packet::with_headroom(&store, 0).unwrap());
        if let Some(packet) = &outgoing {
            packet.set_size(3);
            packet.data_mut().copy_from_slice(b"abc");
        }
        assert_eq!(loopback.tx(4, FnHandler(|| outgoing.take())), Ok(1));
        assert_eq!(store.available(), 0);

        assert_eq!(loopback.rx(4, FnHandler(|packet: Packet| {
            assert_eq!(&*packet.data(), b"abc");
            assert_eq!(packet.status(), Status::Upstream);
        })), Ok(1));
        assert_eq!(store.available(), 1);
    }
}
