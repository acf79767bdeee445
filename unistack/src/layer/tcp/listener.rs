//! Passive open entries of the engine.
use core::cell::RefCell;

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::rc::Rc;

use crate::wire::Ipv4Address;
use super::{Connection, FourTuple};

pub(crate) type ListenFn = Rc<RefCell<dyn FnMut(&mut Connection)>>;
type AcceptFn = Box<dyn FnMut(Ipv4Address, u16) -> bool>;

/// A port accepting connections.
///
/// Every connection it accepts gets the listener's callback as its `on_connect`.
pub struct Listener {
    port: u16,
    on_connect: ListenFn,
    on_accept: Option<AcceptFn>,
    /// Half-open connections, oldest first.
    syn_queue: VecDeque<FourTuple>,
    backlog: usize,
}

impl Listener {
    pub(crate) fn new(port: u16, on_connect: ListenFn, backlog: usize) -> Self {
        Listener {
            port,
            on_connect,
            on_accept: None,
            syn_queue: VecDeque::new(),
            backlog,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Replace the callback of newly accepted connections.
    pub fn on_connect(&mut self, callback: impl FnMut(&mut Connection) + 'static) {
        self.on_connect = Rc::new(RefCell::new(callback));
    }

    /// Filter connection attempts by remote address and port.
    ///
    /// Refused attempts are dropped silently.
    pub fn on_accept(&mut self, filter: impl FnMut(Ipv4Address, u16) -> bool + 'static) {
        self.on_accept = Some(Box::new(filter));
    }

    /// Half-open connections waiting for the final ACK.
    pub fn syn_queue_len(&self) -> usize {
        self.syn_queue.len()
    }

    pub(crate) fn accepts(&mut self, remote: Ipv4Address, port: u16) -> bool {
        match self.on_accept.as_mut() {
            Some(filter) => filter(remote, port),
            None => true,
        }
    }

    pub(crate) fn connect_callback(&self) -> Box<dyn FnMut(&mut Connection)> {
        let callback = self.on_connect.clone();
        Box::new(move |connection: &mut Connection| (&mut *callback.borrow_mut())(connection))
    }

    /// Record a new half-open connection, returning the one to evict when the backlog is full.
    pub(crate) fn enqueue(&mut self, tuple: FourTuple) -> Option<FourTuple> {
        let evicted = if self.syn_queue.len() >= self.backlog {
            self.syn_queue.pop_front()
        } else {
            None
        };
        self.syn_queue.push_back(tuple);
        evicted
    }

    pub(crate) fn dequeue(&mut self, tuple: &FourTuple) {
        self.syn_queue.retain(|queued| queued != tuple);
    }

    pub(crate) fn take_syn_queue(&mut self) -> VecDeque<FourTuple> {
        core::mem::replace(&mut self.syn_queue, VecDeque::new())
    }

    pub(crate) fn is_queued(&self, tuple: &FourTuple) -> bool {
        self.syn_queue.contains(tuple)
    }
}
