//! Simulated packet loss.
//!
//! Software devices consult a [`Loss`] filter for every transmitted frame and silently discard
//! the frames it selects. This provokes retransmission and recovery paths in tests.
//!
//! [`Loss`]: trait.Loss.html

/// Decides the fate of transmitted frames.
pub trait Loss {
    /// Return `true` to discard the frame.
    fn lose(&mut self, frame: &[u8]) -> bool;
}

impl<F> Loss for F where F: FnMut(&[u8]) -> bool {
    fn lose(&mut self, frame: &[u8]) -> bool {
        self(frame)
    }
}

/// Reproducible loss, driven by a seeded generator or a fixed pattern.
#[derive(Clone, Debug)]
pub struct PrngLoss {
    pattern: Pattern,
    prng: Xoshiro256,
}

#[derive(Clone, Copy, Debug)]
enum Pattern {
    /// Each frame is lost when a roll falls at or below the rate, a 0.32 fixed point fraction.
    Uniform(Option<u32>),
    /// The first `lost` frames of every `period` are lost.
    Burst { lost: u32, period: u32, at: u32 },
}

impl PrngLoss {
    /// Lose frames independently at `rate`, or never with `None`.
    pub fn uniform(rate: Option<u32>, seed: u64) -> Self {
        PrngLoss {
            pattern: Pattern::Uniform(rate),
            prng: Xoshiro256::new(seed),
        }
    }

    /// Lose `lost` consecutive frames out of every `period`.
    ///
    /// # Panics
    /// When `period` is zero or shorter than `lost`.
    pub fn burst(lost: u32, period: u32) -> Self {
        assert!(period > 0 && lost <= period, "burst of {} in period {}", lost, period);
        PrngLoss {
            pattern: Pattern::Burst { lost, period, at: 0 },
            prng: Xoshiro256::new(0),
        }
    }

    /// Decide the fate of the next frame, `true` meaning it is lost.
    pub fn next(&mut self) -> bool {
        match &mut self.pattern {
            Pattern::Uniform(None) => false,
            Pattern::Uniform(Some(rate)) => (self.prng.next() >> 32) as u32 <= *rate,
            Pattern::Burst { lost, period, at } => {
                let fate = *at < *lost;
                *at = (*at + 1) % *period;
                fate
            },
        }
    }
}

impl Loss for PrngLoss {
    fn lose(&mut self, _: &[u8]) -> bool {
        self.next()
    }
}

/// The xoshiro256** generator.
#[derive(Copy, Clone, Debug, Hash)]
pub struct Xoshiro256 {
    state: [u64; 4],
}

impl Xoshiro256 {
    /// Seed the generator, spreading the seed with splitmix64 so the state is never all zero.
    pub fn new(seed: u64) -> Self {
        let mut z = seed;
        let mut state = [0; 4];
        for word in state.iter_mut() {
            z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
            let mut x = z;
            x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
            x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
            *word = x ^ (x >> 31);
        }
        Xoshiro256 { state }
    }

    pub fn next(&mut self) -> u64 {
        let [a, b, c, d] = self.state;
        let result = b.wrapping_mul(5).rotate_left(7).wrapping_mul(9);
        let c = c ^ a;
        let d = d ^ b;
        let b = b ^ c;
        let a = a ^ d;
        self.state = [a, b, c ^ (self.state[1] << 17), d.rotate_left(45)];
        result
    }
}

#[cfg(test)]
mod tests {
    use super::{Loss, PrngLoss};

    #[test]
    fn burst() {
        let mut loss = PrngLoss::burst(1, 10);
        let fates: Vec<bool> = (0..20).map(|_| loss.next()).collect();
        assert_eq!(fates.iter().filter(|&&lost| lost).count(), 2);
        assert!(fates[0] && fates[10]);

        let mut loss = PrngLoss::burst(3, 3);
        assert!((0..100).all(|_| loss.next()));
    }

    #[test]
    fn uniform_rates() {
        let mut off = PrngLoss::uniform(None, 42);
        assert!((0..100).all(|_| !off.lose(&[])));

        let mut half = PrngLoss::uniform(Some(u32::max_value() / 2), 7);
        let lost = (0..10_000).filter(|_| half.next()).count();
        assert!(lost > 4_500 && lost < 5_500, "lost {}", lost);

        let mut same = PrngLoss::uniform(Some(u32::max_value() / 2), 7);
        let mut again = PrngLoss::uniform(Some(u32::max_value() / 2), 7);
        assert!((0..100).all(|_| same.next() == again.next()));
    }

    #[test]
    fn closure_filter() {
        let mut seen = 0;
        let mut every_other = |_: &[u8]| { seen += 1; seen % 2 == 0 };
        let lost = (0..10).filter(|_| every_other.lose(&[])).count();
        assert_eq!(lost, 5);
    }
}
