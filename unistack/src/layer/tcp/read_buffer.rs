//! Received data of a connection, reassembled into stream order.
use alloc::vec::Vec;

use crate::storage::Assembler;

/// Separate out of order ranges held at most.
const MAX_HOLES: usize = 8;

/// A ring buffer in front of `RCV.NXT`.
///
/// Bytes before the first hole are ready for the application. Bytes after it are stored at their
/// final position and tracked by the assembler until the hole closes.
#[derive(Debug)]
pub struct ReadBuffer {
    ring: Vec<u8>,
    start: usize,
    ready: usize,
    assembler: Assembler,
}

impl ReadBuffer {
    pub fn new(capacity: usize) -> Self {
        ReadBuffer {
            ring: vec![0; capacity],
            start: 0,
            ready: 0,
            assembler: Assembler::new(MAX_HOLES),
        }
    }

    pub fn capacity(&self) -> usize {
        self.ring.len()
    }

    /// Free space, which is the receive window to advertise.
    pub fn window(&self) -> usize {
        self.capacity() - self.ready
    }

    /// Contiguous bytes ready to be read.
    pub fn ready(&self) -> usize {
        self.ready
    }

    pub fn is_empty(&self) -> bool {
        self.ready == 0
    }

    /// Whether out of order data waits for a hole to close.
    pub fn has_holes(&self) -> bool {
        !self.assembler.is_empty()
    }

    /// Store segment text starting `offset` bytes after `RCV.NXT`.
    ///
    /// Text beyond the window is cut off. Returns the number of bytes that became contiguous, by
    /// which `RCV.NXT` advances. Text that would fragment the stream too much is dropped.
    pub fn insert(&mut self, offset: usize, data: &[u8]) -> usize {
        let window = self.window();
        if offset >= window {
            return 0;
        }
        let data = &data[..data.len().min(window - offset)];
        if data.is_empty() {
            return 0;
        }

        let contiguous = match self.assembler.add(offset as u32, data.len() as u32) {
            Ok(contiguous) => contiguous as usize,
            Err(_) => {
                net_debug!("tcp: too many holes in receive buffer, dropping {} bytes", data.len());
                return 0;
            },
        };

        let capacity = self.capacity();
        let at = (self.start + self.ready + offset) % capacity;
        let first = data.len().min(capacity - at);
        self.ring[at..at + first].copy_from_slice(&data[..first]);
        self.ring[..data.len() - first].copy_from_slice(&data[first..]);

        self.ready += contiguous;
        contiguous
    }

    /// Copy ready bytes into `buf`, releasing them.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let len = buf.len().min(self.ready);
        let capacity = self.capacity();
        let first = len.min(capacity - self.start);
        buf[..first].copy_from_slice(&self.ring[self.start..self.start + first]);
        buf[first..len].copy_from_slice(&self.ring[..len - first]);
        self.start = (self.start + len) % capacity;
        self.ready -= len;
        len
    }

    /// Take up to `max` ready bytes.
    pub fn take(&mut self, max: usize) -> Vec<u8> {
        let mut data = vec![0; max.min(self.ready)];
        self.read(&mut data);
        data
    }

    /// Drop all data, ready or not.
    pub fn reset(&mut self) {
        self.start = 0;
        self.ready = 0;
        self.assembler = Assembler::new(MAX_HOLES);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order() {
        let mut buffer = ReadBuffer::new(8);
        assert_eq!(buffer.insert(0, b"abc"), 3);
        assert_eq!(buffer.window(), 5);
        assert_eq!(buffer.take(2), b"ab");
        assert_eq!(buffer.insert(0, b"defghi"), 6);
        // Wrapped around the end of the ring.
        assert_eq!(buffer.take(100), b"cdefghi");
        assert!(buffer.is_empty());
    }

    #[test]
    fn reorders() {
        let mut buffer = ReadBuffer::new(16);
        assert_eq!(buffer.insert(4, b"efgh"), 0);
        assert!(buffer.has_holes());
        assert!(buffer.is_empty());
        assert_eq!(buffer.insert(0, b"abcd"), 8);
        assert!(!buffer.has_holes());
        assert_eq!(buffer.take(16), b"abcdefgh");
    }

    #[test]
    fn truncates_to_window() {
        let mut buffer = ReadBuffer::new(4);
        assert_eq!(buffer.insert(0, b"abcdef"), 4);
        assert_eq!(buffer.window(), 0);
        assert_eq!(buffer.insert(0, b"x"), 0);
        let mut out = [0; 2];
        assert_eq!(buffer.read(&mut out), 2);
        assert_eq!(&out, b"ab");
        assert_eq!(buffer.insert(4, b"y"), 0);
    }
}
