//! A shared view onto a lent network buffer.
//!
//! Every layer works on the same memory. Receiving peels headers by moving the start of the
//! layer forward, sending prepends them by moving it backwards into the headroom reserved when
//! the packet was created. Layers record where their header starts with a marker so that upper
//! layers can look back at it without parsing again.
use core::cell::{Cell, Ref, RefCell, RefMut};
use core::fmt;

use alloc::rc::Rc;
use alloc::sync::Arc;

use super::buffer::{self, Buffer, BufferStore};

/// The direction a packet travels through the stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    /// Freshly allocated, not yet travelling.
    Available,
    /// Received from a device, travelling towards the application.
    Upstream,
    /// Travelling towards a device, either constructed locally or being forwarded.
    Downstream,
}

/// A protocol layer whose header start can be recorded in a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Layer {
    Link,
    Network,
    Transport,
}

/// A reference-counted view over a pool buffer.
///
/// Cloning shares the buffer. The buffer returns to its store exactly once, when the last clone
/// is dropped.
#[derive(Clone)]
pub struct Packet {
    inner: Rc<Inner>,
}

struct Inner {
    buffer: RefCell<Buffer>,
    layer_begin: Cell<usize>,
    data_end: Cell<usize>,
    markers: Cell<[usize; 3]>,
    status: Cell<Status>,
}

impl Packet {
    /// Wrap a buffer holding `len` bytes of data.
    ///
    /// # Panics
    /// This function panics if `len` exceeds the buffer.
    pub fn new(buffer: Buffer, len: usize, status: Status) -> Self {
        assert!(len <= buffer.len(), "Packet length exceeds its buffer");
        Packet {
            inner: Rc::new(Inner {
                buffer: RefCell::new(buffer),
                layer_begin: Cell::new(0),
                data_end: Cell::new(len),
                markers: Cell::new([0; 3]),
                status: Cell::new(status),
            }),
        }
    }

    /// Allocate an empty outgoing packet with `headroom` bytes reserved for lower headers.
    pub fn with_headroom(store: &Arc<BufferStore>, headroom: usize)
        -> Result<Self, buffer::Error>
    {
        let buffer = BufferStore::lend(store)?;
        let packet = Packet::new(buffer, headroom, Status::Available);
        packet.inner.layer_begin.set(headroom);
        Ok(packet)
    }

    /// The size of the underlying buffer.
    pub fn capacity(&self) -> usize {
        self.inner.buffer.borrow().len()
    }

    /// The number of bytes from the current layer to the end of the data.
    pub fn size(&self) -> usize {
        self.inner.data_end.get() - self.inner.layer_begin.get()
    }

    /// The offset at which the current layer starts.
    pub fn layer_begin(&self) -> usize {
        self.inner.layer_begin.get()
    }

    /// The offset one past the last byte of data.
    pub fn data_end(&self) -> usize {
        self.inner.data_end.get()
    }

    /// Bytes that may still be appended to the data.
    pub fn tailroom(&self) -> usize {
        self.capacity() - self.data_end()
    }

    /// Move the start of the current layer.
    ///
    /// Positive values peel a header off, negative values prepend room for one.
    ///
    /// # Panics
    /// This function panics when moving outside the buffer or past the end of data.
    pub fn increment_layer_begin(&self, delta: isize) {
        let begin = self.inner.layer_begin.get() as isize + delta;
        assert!(begin >= 0, "Layer begins before the buffer");
        assert!(begin as usize <= self.inner.data_end.get(), "Layer begins after the data");
        self.inner.layer_begin.set(begin as usize);
    }

    /// Set the end of data, as an offset into the buffer.
    ///
    /// # Panics
    /// This function panics when the end lies before the current layer or outside the buffer.
    pub fn set_data_end(&self, end: usize) {
        assert!(end >= self.inner.layer_begin.get(), "Data ends before the layer begins");
        assert!(end <= self.capacity(), "Data ends outside the buffer");
        self.inner.data_end.set(end);
    }

    /// Set the size of the current layer, counting from its start.
    pub fn set_size(&self, size: usize) {
        self.set_data_end(self.layer_begin() + size)
    }

    /// Record that the header of `layer` starts at the current layer begin.
    pub fn mark(&self, layer: Layer) {
        let mut markers = self.inner.markers.get();
        markers[layer as usize] = self.inner.layer_begin.get();
        self.inner.markers.set(markers);
    }

    /// The recorded start of the header of `layer`.
    pub fn offset(&self, layer: Layer) -> usize {
        self.inner.markers.get()[layer as usize]
    }

    /// The bytes of the current layer.
    pub fn data(&self) -> Ref<[u8]> {
        let range = self.layer_begin()..self.data_end();
        Ref::map(self.inner.buffer.borrow(), |buffer| &buffer[range])
    }

    /// Mutable bytes of the current layer.
    ///
    /// # Panics
    /// This function panics when another borrow of the data is alive.
    pub fn data_mut(&self) -> RefMut<[u8]> {
        let range = self.layer_begin()..self.data_end();
        RefMut::map(self.inner.buffer.borrow_mut(), |buffer| &mut buffer[range])
    }

    /// The bytes from the recorded start of `layer` to the end of data.
    pub fn layer(&self, layer: Layer) -> Ref<[u8]> {
        let range = self.offset(layer)..self.data_end();
        Ref::map(self.inner.buffer.borrow(), |buffer| &buffer[range])
    }

    /// The direction of travel.
    pub fn status(&self) -> Status {
        self.inner.status.get()
    }

    pub fn set_status(&self, status: Status) {
        self.inner.status.set(status)
    }

    /// The number of views sharing this buffer.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    /// The store the buffer returns to.
    pub fn store(&self) -> Arc<BufferStore> {
        Arc::clone(self.inner.buffer.borrow().store())
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Packet")
            .field("layer_begin", &self.layer_begin())
            .field("data_end", &self.data_end())
            .field("markers", &self.inner.markers.get())
            .field("status", &self.status())
            .field("refs", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BufferConfig, ReleasePolicy};

    fn store(count: usize) -> Arc<BufferStore> {
        Arc::new(BufferStore::new(BufferConfig {
            buffer_size: 256,
            buffer_count: count,
            pools: 1,
            release_policy: ReleasePolicy::Panic,
        }))
    }

    #[test]
    fn peel_and_prepend() {
        let store = store(1);
        let packet = Packet::with_headroom(&store, 34).unwrap();
        assert_eq!(packet.size(), 0);
        packet.set_size(4);
        packet.data_mut().copy_from_slice(&[1, 2, 3, 4]);
        packet.mark(Layer::Transport);

        packet.increment_layer_begin(-20);
        packet.mark(Layer::Network);
        packet.increment_layer_begin(-14);
        packet.mark(Layer::Link);
        assert_eq!(packet.layer_begin(), 0);
        assert_eq!(packet.size(), 38);

        packet.increment_layer_begin(34);
        assert_eq!(&*packet.data(), &[1, 2, 3, 4]);
        assert_eq!(packet.layer(Layer::Network).len(), 24);
        assert_eq!(packet.offset(Layer::Transport), 34);
    }

    #[test]
    fn last_reference_releases_once() {
        let store = store(3);
        let first = Packet::with_headroom(&store, 0).unwrap();
        let second = Packet::with_headroom(&store, 0).unwrap();
        assert_eq!(store.available(), 1);

        let shared = first.clone();
        let again = shared.clone();
        assert_eq!(first.ref_count(), 3);
        drop(first);
        drop(shared);
        assert_eq!(store.available(), 1);
        drop(again);
        assert_eq!(store.available(), 2);
        drop(second);
        assert_eq!(store.available(), 3);
    }

    #[test]
    fn status_travels_with_clones() {
        let store = store(1);
        let packet = Packet::with_headroom(&store, 0).unwrap();
        assert_eq!(packet.status(), Status::Available);
        let view = packet.clone();
        view.set_status(Status::Downstream);
        assert_eq!(packet.status(), Status::Downstream);
    }

    #[test]
    #[should_panic]
    fn layer_before_buffer() {
        let store = store(1);
        let packet = Packet::with_headroom(&store, 10).unwrap();
        packet.increment_layer_begin(-11);
    }
}
