//! Encapsulates a network interface card.
//!
//! Also permits software emulation of one. A device hands received frames upwards as
//! [`storage::Packet`]s backed by buffers of the interface's [`BufferStore`], and accepts
//! outgoing packets from the stack. Dropping an outgoing packet after transmission is the
//! completion signal, it returns the buffer to its store.
//!
//! [`storage::Packet`]: ../storage/struct.Packet.html
//! [`BufferStore`]: ../storage/struct.BufferStore.html
pub mod loopback;
pub mod loss;
pub mod pipe;

use crate::layer::{Result, FnHandler};
use crate::storage::Packet;

pub use self::loopback::Loopback;
pub use self::loss::{Loss, PrngLoss, Xoshiro256};
pub use self::pipe::{Pipe, Stats as PipeStats};

/// A general description of a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Personality {
    /// The largest frame, including the link layer header, the device transfers.
    pub mtu: usize,
}

/// A layer 2 device.
pub trait Device {
    /// A description of the device.
    fn personality(&self) -> Personality;

    /// Transmit some packets utilizing the `sender`.
    ///
    /// The device asks the sender for up to `max` packets. Each packet is transmitted and then
    /// dropped, which releases its buffer unless an upper layer still holds a view of it.
    fn tx(&mut self, max: usize, sender: impl Send) -> Result<usize>;

    /// Receive packet utilizing the `receptor`.
    ///
    /// Dequeue up to `max` received frames and provide them to the receiver callback. A frame
    /// for which no buffer can be lent is dropped by the device.
    fn rx(&mut self, max: usize, receptor: impl Recv) -> Result<usize>;
}

/// A raw network packet receiver.
pub trait Recv {
    /// Receive a single frame.
    fn receive(&mut self, packet: Packet);
}

/// A raw network packet sender.
pub trait Send {
    /// Produce the next frame to transmit, if any.
    fn send(&mut self) -> Option<Packet>;
}

impl<F> Recv for FnHandler<F>
    where F: FnMut(Packet)
{
    fn receive(&mut self, packet: Packet) {
        (self.0)(packet)
    }
}

impl<F> Send for FnHandler<F>
    where F: FnMut() -> Option<Packet>
{
    fn send(&mut self) -> Option<Packet> {
        (self.0)()
    }
}

impl<F: Recv> Recv for &'_ mut F {
    fn receive(&mut self, packet: Packet) {
        (**self).receive(packet)
    }
}

impl<F: Send> Send for &'_ mut F {
    fn send(&mut self) -> Option<Packet> {
        (**self).send()
    }
}
