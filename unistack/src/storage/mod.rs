//! Memory management of the stack.
//!
//! The [`BufferStore`] owns all packet memory. A [`Packet`] is a reference counted view onto one
//! buffer lent from it, and the [`Assembler`] tracks which parts of a byte stream arrived.
//!
//! [`BufferStore`]: buffer/struct.BufferStore.html
//! [`Packet`]: packet/struct.Packet.html
//! [`Assembler`]: assembler/struct.Assembler.html
pub mod assembler;
pub mod buffer;
pub mod packet;

pub use self::assembler::{Assembler, Contig, TooManyHoles};

pub use self::buffer::{
    Buffer,
    BufferStore,
    Config as BufferConfig,
    Error as BufferError,
    ReleasePolicy};

pub use self::packet::{Layer, Packet, Status};
