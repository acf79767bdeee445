//! Initial sequence number generation, as recommended by rfc6528.
//!
//! Uses a keyed cryptographic hash function (SipHash-2-4) instead of appending the secret key to
//! the four tuple for hashing. Hash function SipHash-2-4 from:
//!
//! > SipHash: a fast short-input PRF, Jean-Philippe Aumasson and Daniel J. Bernstein
use super::endpoint::FourTuple;
use crate::time::Instant;
use crate::wire::TcpSeqNumber;

#[derive(Clone, Copy)]
pub struct IsnGenerator {
    keys: (u64, u64),
}

// Yes, that's the initial values.
const IV: [&[u8; 8]; 4] = [
    b"somepseu",
    b"dorandom",
    b"lygenera",
    b"tedbytes"];

/// Clock ticks per millisecond, the rfc suggests a tick of roughly four microseconds.
const TICKS_PER_MILLI: i32 = 250;

/// Stand-in key when no secret is configured and no randomness is available.
#[cfg(not(feature = "std"))]
const FIXED_KEY: [u8; 16] = *b"unistack-isn-key";

struct State {
    v0: u64,
    v1: u64,
    v2: u64,
    v3: u64,
}

impl IsnGenerator {
    /// A generator keyed with 16 secret bytes.
    pub fn from_secret_key_bytes(key: [u8; 16]) -> Self {
        let mut k0 = [0; 8];
        let mut k1 = [0; 8];
        k0.copy_from_slice(&key[..8]);
        k1.copy_from_slice(&key[8..]);
        IsnGenerator {
            keys: (u64::from_le_bytes(k0), u64::from_le_bytes(k1)),
        }
    }

    /// A generator keyed from the random state of the standard library's hash maps.
    #[cfg(feature = "std")]
    pub fn from_std_hash() -> Self {
        use std::collections::hash_map::RandomState;
        use std::hash::{BuildHasher, Hasher};

        let state = RandomState::new();
        let mut k0 = state.build_hasher();
        k0.write_u8(0);
        let mut k1 = state.build_hasher();
        k1.write_u8(1);
        IsnGenerator {
            keys: (k0.finish(), k1.finish()),
        }
    }

    /// The generator for an optional configured key.
    pub fn from_config(key: Option<[u8; 16]>) -> Self {
        match key {
            Some(key) => IsnGenerator::from_secret_key_bytes(key),
            #[cfg(feature = "std")]
            None => IsnGenerator::from_std_hash(),
            #[cfg(not(feature = "std"))]
            None => IsnGenerator::from_secret_key_bytes(FIXED_KEY),
        }
    }

    #[cfg(test)]
    fn from_key(k0: u64, k1: u64) -> Self {
        IsnGenerator { keys: (k0, k1) }
    }

    /// Get the initial sequence number for a connection.
    ///
    /// The hash of the four tuple is offset by a clock advancing every four microseconds.
    pub fn get_isn(&self, connection: FourTuple, time: Instant) -> TcpSeqNumber {
        let mut state = State::init(self.keys.0, self.keys.1);

        let m = u64::from(connection.local.to_network_integer())
            | u64::from(connection.remote.to_network_integer()) << 32;
        let p = u64::from(connection.local_port)
            | u64::from(connection.remote_port) << 16
            // Message length = 12
            | 12_u64 << 56;
        state.absorb(m);
        state.absorb(p);
        let num = state.finalize();

        let clock = (time.total_millis() as i32).wrapping_mul(TICKS_PER_MILLI);
        TcpSeqNumber((num as i32).wrapping_add(clock))
    }
}

impl State {
    const SIP_C: usize = 2;
    const SIP_D: usize = 4;

    fn init(k0: u64, k1: u64) -> Self {
        State {
            v0: u64::from_be_bytes(*IV[0]) ^ k0,
            v1: u64::from_be_bytes(*IV[1]) ^ k1,
            v2: u64::from_be_bytes(*IV[2]) ^ k0,
            v3: u64::from_be_bytes(*IV[3]) ^ k1,
        }
    }

    fn round(&mut self) {
        self.v0 = self.v0.wrapping_add(self.v1);
        self.v1 = self.v1.rotate_left(13);
        self.v1 ^= self.v0;
        self.v0 = self.v0.rotate_left(32);
        self.v2 = self.v2.wrapping_add(self.v3);
        self.v3 = self.v3.rotate_left(16);
        self.v3 ^= self.v2;
        self.v0 = self.v0.wrapping_add(self.v3);
        self.v3 = self.v3.rotate_left(21);
        self.v3 ^= self.v0;
        self.v2 = self.v2.wrapping_add(self.v1);
        self.v1 = self.v1.rotate_left(17);
        self.v1 ^= self.v2;
        self.v2 = self.v2.rotate_left(32);
    }

    /// Process a single portion of the message.
    fn absorb(&mut self, m: u64) {
        self.v3 ^= m;
        (0..Self::SIP_C).for_each(|_| self.round());
        self.v0 ^= m;
    }

    fn finalize(mut self) -> u64 {
        self.v2 ^= 0xff;
        (0..Self::SIP_D).for_each(|_| self.round());
        self.v0 ^ self.v1 ^ self.v2 ^ self.v3
    }
}
