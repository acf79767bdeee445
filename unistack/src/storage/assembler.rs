//! Tracking of out-of-order data for stream reassembly.
use core::fmt;

use alloc::vec::Vec;

/// A contiguous chunk of absent data, followed by a contiguous chunk of present data.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Contig {
    hole_size: u32,
    data_size: u32,
}

/// A buffer (re)assembler.
///
/// Offsets are relative to the first byte not yet assembled. Holds at most a fixed number of
/// separate data ranges so that a hostile peer can not make it grow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assembler {
    contigs: Vec<Contig>,
    capacity: usize,
}

/// Returned when a range would need more separate chunks than the assembler may hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TooManyHoles;

impl Contig {
    fn hole_and_data(hole_size: u32, data_size: u32) -> Contig {
        Contig { hole_size, data_size }
    }

    fn has_hole(&self) -> bool {
        self.hole_size != 0
    }

    fn has_data(&self) -> bool {
        self.data_size != 0
    }
}

impl fmt::Display for Contig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.has_hole() { write!(f, "({})", self.hole_size)?; }
        if self.has_hole() && self.has_data() { write!(f, " ")?; }
        if self.has_data() { write!(f, "{}",   self.data_size)?; }
        Ok(())
    }
}

impl fmt::Display for Assembler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[ ")?;
        for contig in self.contigs.iter() {
            write!(f, "{} ", contig)?;
        }
        write!(f, "]")?;
        Ok(())
    }
}

impl Assembler {
    /// Create an empty assembler holding at most `capacity` separate ranges.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "An assembler must hold at least one range");
        Assembler {
            contigs: Vec::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Return whether the assembler contains no data.
    pub fn is_empty(&self) -> bool {
        self.contigs.is_empty()
    }

    /// The offset one past the last byte of data held.
    pub fn extent(&self) -> u32 {
        self.contigs.iter().map(|c| c.hole_size + c.data_size).sum()
    }

    /// Add a new contiguous range to the assembler.
    ///
    /// Returns the number of bytes that became assembled at the front. These are removed from
    /// the assembler and all remaining offsets shift down by that amount. If the range can not be
    /// stored then the assembler is not modified at all.
    ///
    /// ## Example
    ///
    /// ```
    /// # use unistack::storage::Assembler;
    /// let mut asm = Assembler::new(2);
    ///
    /// // Add four bytes not at the start.
    /// assert_eq!(asm.add(4, 4), Ok(0));
    /// // Add missing four bytes at the start, which assembles the chunk.
    /// assert_eq!(asm.add(0, 4), Ok(8));
    /// ```
    pub fn add(&mut self, start: u32, size: u32) -> Result<u32, TooManyHoles> {
        if size == 0 {
            return Ok(0);
        }

        let end = start.saturating_add(size);
        let mut ranges: Vec<(u32, u32)> = Vec::with_capacity(self.contigs.len() + 1);
        let mut new = Some((start, end));
        for (left, right) in self.iter_data() {
            match new {
                Some((s, e)) if e < left => {
                    ranges.push((s, e));
                    ranges.push((left, right));
                    new = None;
                },
                Some((s, e)) if s <= right => {
                    // Overlapping or adjacent, absorb into the new range.
                    new = Some((s.min(left), e.max(right)));
                },
                _ => ranges.push((left, right)),
            }
        }
        if let Some(range) = new {
            ranges.push(range);
        }

        let (popped, rest) = match ranges.split_first() {
            Some((&(0, right), rest)) => (right, rest),
            _ => (0, &ranges[..]),
        };
        if rest.len() > self.capacity {
            return Err(TooManyHoles);
        }

        self.contigs.clear();
        let mut at = popped;
        for &(left, right) in rest {
            self.contigs.push(Contig::hole_and_data(left - at, right - left));
            at = right;
        }
        Ok(popped)
    }

    /// Iterate over all of the contiguous data ranges, as offsets `(start, end)`.
    ///
    /// ```text
    ///    Hole        Data        Hole        Data
    /// |--- 100 ---|--- 200 ---|--- 100 ---|--- 50 ---|
    /// ```
    ///
    /// This would return the ranges: ``(100, 300), (400, 450)``
    pub fn iter_data(&self) -> impl Iterator<Item=(u32, u32)> + '_ {
        let mut at = 0;
        self.contigs.iter().map(move |contig| {
            let left = at + contig.hole_size;
            let right = left + contig.data_size;
            at = right;
            (left, right)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contigs(asm: &Assembler) -> Vec<(u32, u32)> {
        asm.iter_data().collect()
    }

    #[test]
    fn in_order() {
        let mut asm = Assembler::new(4);
        assert_eq!(asm.add(0, 10), Ok(10));
        assert!(asm.is_empty());
    }

    #[test]
    fn out_of_order_then_fill() {
        let mut asm = Assembler::new(4);
        assert_eq!(asm.add(100, 100), Ok(0));
        assert_eq!(contigs(&asm), vec![(100, 200)]);
        assert_eq!(asm.add(0, 100), Ok(200));
        assert!(asm.is_empty());
    }

    #[test]
    fn merges_neighbours() {
        let mut asm = Assembler::new(4);
        assert_eq!(asm.add(10, 5), Ok(0));
        assert_eq!(asm.add(30, 5), Ok(0));
        assert_eq!(asm.add(15, 15), Ok(0));
        assert_eq!(contigs(&asm), vec![(10, 35)]);
        assert_eq!(format!("{}", asm), "[ (10) 25 ]");
        assert_eq!(asm.extent(), 35);
    }

    #[test]
    fn overlap_and_duplicate() {
        let mut asm = Assembler::new(4);
        assert_eq!(asm.add(10, 10), Ok(0));
        assert_eq!(asm.add(12, 4), Ok(0));
        assert_eq!(asm.add(5, 10), Ok(0));
        assert_eq!(contigs(&asm), vec![(5, 20)]);
        assert_eq!(asm.add(0, 6), Ok(20));
    }

    #[test]
    fn partial_pop_shifts_offsets() {
        let mut asm = Assembler::new(4);
        assert_eq!(asm.add(20, 10), Ok(0));
        assert_eq!(asm.add(0, 5), Ok(5));
        assert_eq!(contigs(&asm), vec![(15, 25)]);
    }

    #[test]
    fn bounded() {
        let mut asm = Assembler::new(2);
        assert_eq!(asm.add(10, 1), Ok(0));
        assert_eq!(asm.add(20, 1), Ok(0));
        assert_eq!(asm.add(30, 1), Err(TooManyHoles));
        assert_eq!(contigs(&asm), vec![(10, 11), (20, 21)]);
        // Filling a hole never needs an additional range.
        assert_eq!(asm.add(11, 9), Ok(0));
        assert_eq!(asm.add(0, 10), Ok(21));
    }
}
