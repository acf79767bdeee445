//! An in-memory wire between two interfaces.
//!
//! Each end owns a [`BufferStore`] from which it lends receive buffers, just like a real card
//! fills its receive ring. Transmitted frames are copied onto the wire, after which the packet is
//! dropped and its buffer released.
//!
//! [`BufferStore`]: ../../storage/struct.BufferStore.html
use core::cell::RefCell;

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::layer::Result;
use crate::storage::{BufferStore, Layer, Packet, Status};
use super::{Device, Loss, Personality, Recv, Send};

type Wire = Rc<RefCell<VecDeque<Vec<u8>>>>;

/// One end of a point to point link.
pub struct Pipe {
    store: Arc<BufferStore>,
    mtu: usize,
    inbox: Wire,
    outbox: Wire,
    loss: Option<Box<dyn Loss>>,
    stats: Stats,
}

/// Frame counters of one end.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub tx_frames: usize,
    pub rx_frames: usize,
    /// Frames discarded by the loss filter on transmission.
    pub lost: usize,
    /// Received frames dropped for lack of a buffer or for exceeding the buffer size.
    pub rx_dropped: usize,
}

impl Pipe {
    /// Create both ends of a link.
    pub fn pair(a: Arc<BufferStore>, b: Arc<BufferStore>, mtu: usize) -> (Pipe, Pipe) {
        let forward = Wire::default();
        let backward = Wire::default();
        let first = Pipe::end(a, mtu, backward.clone(), forward.clone());
        let second = Pipe::end(b, mtu, forward, backward);
        (first, second)
    }

    fn end(store: Arc<BufferStore>, mtu: usize, inbox: Wire, outbox: Wire) -> Pipe {
        Pipe {
            store,
            mtu,
            inbox,
            outbox,
            loss: None,
            stats: Stats::default(),
        }
    }

    /// Filter the frames transmitted from this end.
    pub fn set_loss(&mut self, loss: impl Loss + 'static) {
        self.loss = Some(Box::new(loss));
    }

    /// Stop dropping frames.
    pub fn clear_loss(&mut self) {
        self.loss = None;
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// The number of frames waiting to be received by this end.
    pub fn pending(&self) -> usize {
        self.inbox.borrow().len()
    }

    pub fn store(&self) -> &Arc<BufferStore> {
        &self.store
    }
}

impl Device for Pipe {
    fn personality(&self) -> Personality {
        Personality { mtu: self.mtu }
    }

    fn tx(&mut self, max: usize, mut sender: impl Send) -> Result<usize> {
        let mut count = 0;
        while count < max {
            let packet = match sender.send() {
                Some(packet) => packet,
                None => break,
            };
            count += 1;

            let frame = packet.data().to_vec();
            // Transmission is complete, the buffer goes home with the last view.
            drop(packet);

            if frame.len() > self.mtu {
                net_debug!("pipe: frame of {} bytes exceeds mtu {}", frame.len(), self.mtu);
                continue;
            }

            if let Some(loss) = self.loss.as_mut() {
                if loss.lose(&frame) {
                    self.stats.lost += 1;
                    continue;
                }
            }

            self.stats.tx_frames += 1;
            self.outbox.borrow_mut().push_back(frame);
        }
        Ok(count)
    }

    fn rx(&mut self, max: usize, mut receptor: impl Recv) -> Result<usize> {
        let mut count = 0;
        while count < max {
            let frame = match self.inbox.borrow_mut().pop_front() {
                Some(frame) => frame,
                None => break,
            };
            count += 1;

            let mut buffer = match BufferStore::lend(&self.store) {
                Ok(buffer) => buffer,
                Err(err) => {
                    net_debug!("pipe: dropping received frame, {}", err);
                    self.stats.rx_dropped += 1;
                    continue;
                },
            };

            if frame.len() > buffer.len() {
                self.stats.rx_dropped += 1;
                continue;
            }

            buffer[..frame.len()].copy_from_slice(&frame);
            let packet = Packet::new(buffer, frame.len(), Status::Upstream);
            packet.mark(Layer::Link);
            self.stats.rx_frames += 1;
            receptor.receive(packet);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::FnHandler;
    use crate::storage::{BufferConfig, ReleasePolicy};

    fn store(count: usize) -> Arc<BufferStore> {
        Arc::new(BufferStore::new(BufferConfig {
            buffer_size: 128,
            buffer_count: count,
            pools: 1,
            release_policy: ReleasePolicy::Panic,
        }))
    }

    fn outgoing(store: &Arc<BufferStore>, content: &[u8]) -> Packet {
        let packet = Packet::with_headroom(store, 0).unwrap();
        packet.set_size(content.len());
        packet.data_mut().copy_from_slice(content);
        packet
    }

    #[test]
    fn frames_cross_and_buffers_return() {
        let (left_store, right_store) = (store(2), store(2));
        let (mut left, mut right) = Pipe::pair(left_store.clone(), right_store.clone(), 128);

        let mut queue = vec![outgoing(&left_store, b"hello"), outgoing(&left_store, b"world")];
        queue.reverse();
        assert_eq!(left_store.available(), 0);
        assert_eq!(left.tx(10, FnHandler(|| queue.pop())), Ok(2));
        assert_eq!(left_store.available(), 2);
        assert_eq!(right.pending(), 2);

        let mut received = Vec::new();
        assert_eq!(right.rx(10, FnHandler(|packet: Packet| {
            assert_eq!(packet.status(), Status::Upstream);
            received.push(packet.data().to_vec());
        })), Ok(2));
        assert_eq!(received, vec![b"hello".to_vec(), b"world".to_vec()]);
        assert_eq!(right_store.available(), 2);
    }

    #[test]
    fn exhaustion_drops_frame() {
        let (left_store, right_store) = (store(2), store(1));
        let (mut left, mut right) = Pipe::pair(left_store.clone(), right_store, 128);

        let mut queue = vec![outgoing(&left_store, b"a"), outgoing(&left_store, b"b")];
        left.tx(10, FnHandler(|| queue.pop())).unwrap();

        let mut held = Vec::new();
        right.rx(10, FnHandler(|packet: Packet| held.push(packet))).unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(right.stats().rx_dropped, 1);
    }

    #[test]
    fn loss_filter() {
        let (left_store, right_store) = (store(4), store(4));
        let (mut left, right) = Pipe::pair(left_store.clone(), right_store, 128);
        left.set_loss(|frame: &[u8]| frame[0] == b'x');

        let mut queue = vec![outgoing(&left_store, b"x"), outgoing(&left_store, b"y")];
        left.tx(10, FnHandler(|| queue.pop())).unwrap();
        assert_eq!(left.stats().lost, 1);
        assert_eq!(left.stats().tx_frames, 1);
        assert_eq!(right.pending(), 1);
    }
}
