//! A network stack for single address space systems.
//!
//! ## Design
//!
//! Every core runs its own [`Interface`]: one buffer store, one device, the link, network and
//! transport layer endpoints and one TCP engine. Packet processing runs to completion on that
//! core, application callbacks are invoked synchronously from within it. Other cores interact
//! with an interface only through its [handoff] queue.
//!
//! All packet memory comes from a fixed [`BufferStore`]. A received frame stays in its buffer
//! while the layers peel their headers, outgoing segments are built with headroom for the lower
//! headers so that nothing is copied on the way down. Time is never read from a clock, each
//! entry point takes the current [`Instant`].
//!
//! ## Modules
//!
//! * [`wire`]: bit exact views and representations of Ethernet, IPv4 and TCP headers.
//! * [`storage`]: the buffer store, packets and the reassembler.
//! * [`layer`]: the protocol endpoints, including the TCP engine.
//! * [`nic`]: the device interface and software devices.
//!
//! [`Interface`]: iface/struct.Interface.html
//! [handoff]: handoff/index.html
//! [`BufferStore`]: storage/struct.BufferStore.html
//! [`Instant`]: time/struct.Instant.html
//! [`wire`]: wire/index.html
//! [`storage`]: storage/index.html
//! [`layer`]: layer/index.html
//! [`nic`]: nic/index.html

// tests should be able to use `std`
#![cfg_attr(all(
    not(feature = "std"),
    not(test)),
no_std)]

#[macro_use]
extern crate alloc;

#[cfg(feature = "log")]
#[macro_use]
extern crate log;

#[macro_use]
mod macros;

pub mod handoff;
pub mod iface;
pub mod layer;
pub mod nic;
pub mod storage;
pub mod time;
pub mod wire;
