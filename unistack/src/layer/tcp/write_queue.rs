//! Outgoing data of a connection, kept until it is acknowledged.
//!
//! Data is queued per application write. Each write keeps counters of how much of it was sent
//! and acknowledged so that retransmission reads from the same memory as the first
//! transmission.
use alloc::collections::VecDeque;
use alloc::vec::Vec;

#[derive(Debug)]
struct WriteBuffer {
    data: Vec<u8>,
    sent: usize,
    acked: usize,
    push: bool,
}

#[derive(Debug, Default)]
pub struct WriteQueue {
    buffers: VecDeque<WriteBuffer>,
    /// Index of the first buffer with unsent data.
    current: usize,
    /// Sizes of fully acknowledged writes not yet reported.
    completed: VecDeque<usize>,
}

impl WriteBuffer {
    fn remaining(&self) -> usize {
        self.data.len() - self.sent
    }
}

impl WriteQueue {
    pub fn new() -> Self {
        WriteQueue::default()
    }

    pub fn push(&mut self, data: Vec<u8>, push: bool) {
        if data.is_empty() {
            return;
        }
        self.buffers.push_back(WriteBuffer { data, sent: 0, acked: 0, push });
    }

    /// The next unsent bytes, at most `max` and never crossing into another write.
    ///
    /// The flag tells whether the chunk ends a write that asked for a push.
    pub fn nxt(&self, max: usize) -> (&[u8], bool) {
        match self.buffers.get(self.current) {
            Some(buf) => {
                let len = buf.remaining().min(max);
                let end = buf.sent + len;
                (&buf.data[buf.sent..end], buf.push && end == buf.data.len())
            },
            None => (&[], false),
        }
    }

    /// Record that `n` bytes from `nxt` were sent.
    pub fn advance(&mut self, mut n: usize) {
        while n > 0 {
            let buf = match self.buffers.get_mut(self.current) {
                Some(buf) => buf,
                None => return,
            };
            let step = buf.remaining().min(n);
            buf.sent += step;
            n -= step;
            if buf.remaining() == 0 {
                self.current += 1;
            }
        }
    }

    /// Acknowledge `n` bytes from the front of the queue.
    ///
    /// Writes that become fully acknowledged are released and their sizes queued for
    /// `pop_completed`.
    pub fn acknowledge(&mut self, mut n: usize) {
        while n > 0 {
            let done = match self.buffers.front_mut() {
                Some(buf) => {
                    let step = (buf.sent - buf.acked).min(n);
                    buf.acked += step;
                    n -= step;
                    if step == 0 {
                        return;
                    }
                    buf.acked == buf.data.len()
                },
                None => return,
            };
            if done {
                if let Some(buf) = self.buffers.pop_front() {
                    self.completed.push_back(buf.data.len());
                }
                self.current = self.current.saturating_sub(1);
            }
        }
    }

    pub fn pop_completed(&mut self) -> Option<usize> {
        self.completed.pop_front()
    }

    /// The oldest unacknowledged bytes, at most `max`, for retransmission.
    pub fn una(&self, max: usize) -> &[u8] {
        match self.buffers.front() {
            Some(buf) => {
                let end = buf.sent.min(buf.acked + max);
                &buf.data[buf.acked..end]
            },
            None => &[],
        }
    }

    /// Bytes sent but not acknowledged.
    pub fn in_flight(&self) -> usize {
        self.buffers.iter().map(|buf| buf.sent - buf.acked).sum()
    }

    /// Bytes not yet sent.
    pub fn unsent(&self) -> usize {
        self.buffers.iter().skip(self.current).map(WriteBuffer::remaining).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Drop all data.
    pub fn reset(&mut self) {
        self.buffers.clear();
        self.completed.clear();
        self.current = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_and_acknowledge() {
        let mut queue = WriteQueue::new();
        queue.push(b"hello".to_vec(), false);
        queue.push(b"world!".to_vec(), true);
        assert_eq!(queue.unsent(), 11);

        assert_eq!(queue.nxt(3), (&b"hel"[..], false));
        queue.advance(3);
        assert_eq!(queue.nxt(100), (&b"lo"[..], false));
        queue.advance(2);
        assert_eq!(queue.nxt(100), (&b"world!"[..], true));
        queue.advance(6);
        assert_eq!(queue.nxt(100).0, &b""[..]);
        assert_eq!(queue.in_flight(), 11);

        queue.acknowledge(4);
        assert_eq!(queue.una(100), &b"o"[..]);
        assert_eq!(queue.pop_completed(), None);
        queue.acknowledge(3);
        assert_eq!(queue.pop_completed(), Some(5));
        assert_eq!(queue.una(2), &b"rl"[..]);
        queue.acknowledge(4);
        assert_eq!(queue.pop_completed(), Some(6));
        assert!(queue.is_empty());
    }

    #[test]
    fn acknowledge_only_sent() {
        let mut queue = WriteQueue::new();
        queue.push(b"abcdef".to_vec(), false);
        queue.advance(2);
        queue.acknowledge(10);
        assert_eq!(queue.in_flight(), 0);
        assert_eq!(queue.unsent(), 4);
        assert_eq!(queue.nxt(10).0, &b"cdef"[..]);
    }
}
