use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::error::{Error, Result};

// MbLayout — per-(sequence, time) metadata of a minibatch
//
// A minibatch packs several independent sequences side by side: column
// `t * S + s` of the value buffer is time step t of sequence slot s. The
// layout records, for every (slot, step) pair, whether a sequence starts
// or ends there and whether the step is a gap (padding with no data).
//
// Ownership matters for the transforms: a node that changes the time axis
// allocates a fresh layout and re-derives it every minibatch; a node that
// leaves the time axis alone shares the producer's layout by reference.

/// Bitmask of boundary flags for one (sequence, time) position.
///
/// Flags combine: a length-1 sequence carries both `SEQUENCE_START` and
/// `SEQUENCE_END` on the same step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackingFlags(u8);

impl PackingFlags {
    pub const NONE: PackingFlags = PackingFlags(0);
    pub const SEQUENCE_START: PackingFlags = PackingFlags(1);
    pub const SEQUENCE_END: PackingFlags = PackingFlags(2);
    pub const GAP: PackingFlags = PackingFlags(4);

    /// Whether every flag in `other` is set here.
    pub fn contains(self, other: PackingFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for PackingFlags {
    type Output = PackingFlags;
    fn bitor(self, rhs: PackingFlags) -> PackingFlags {
        PackingFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for PackingFlags {
    fn bitor_assign(&mut self, rhs: PackingFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for PackingFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return write!(f, "none");
        }
        let mut first = true;
        let mut put = |f: &mut fmt::Formatter<'_>, s: &str| -> fmt::Result {
            if !first {
                write!(f, "|")?;
            }
            first = false;
            write!(f, "{}", s)
        };
        if self.contains(PackingFlags::SEQUENCE_START) {
            put(f, "start")?;
        }
        if self.contains(PackingFlags::SEQUENCE_END) {
            put(f, "end")?;
        }
        if self.contains(PackingFlags::GAP) {
            put(f, "gap")?;
        }
        Ok(())
    }
}

/// Boundary flags for every (sequence slot, time step) pair of a minibatch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MbLayout {
    num_seqs: usize,
    num_steps: usize,
    flags: Vec<PackingFlags>,
}

impl MbLayout {
    /// An empty layout; call [`MbLayout::init`] before use.
    pub fn new() -> Self {
        MbLayout::default()
    }

    /// A layout initialized to the given extent with all flags cleared.
    pub fn with_dims(num_seqs: usize, num_steps: usize) -> Self {
        let mut l = MbLayout::new();
        l.init(num_seqs, num_steps);
        l
    }

    /// Resize to the given extent and clear every flag to `NONE`.
    pub fn init(&mut self, num_seqs: usize, num_steps: usize) {
        self.num_seqs = num_seqs;
        self.num_steps = num_steps;
        self.flags.clear();
        self.flags.resize(num_seqs * num_steps, PackingFlags::NONE);
    }

    pub fn num_parallel_sequences(&self) -> usize {
        self.num_seqs
    }

    pub fn num_time_steps(&self) -> usize {
        self.num_steps
    }

    /// Number of value-buffer columns this layout describes.
    pub fn num_cols(&self) -> usize {
        self.num_seqs * self.num_steps
    }

    fn index(&self, seq: usize, time: usize) -> Result<usize> {
        if seq >= self.num_seqs || time >= self.num_steps {
            return Err(Error::LayoutIndexOutOfBounds {
                seq,
                time,
                num_seqs: self.num_seqs,
                num_steps: self.num_steps,
            });
        }
        Ok(seq * self.num_steps + time)
    }

    /// The flags at (sequence slot, time step).
    pub fn get(&self, seq: usize, time: usize) -> Result<PackingFlags> {
        Ok(self.flags[self.index(seq, time)?])
    }

    /// OR the given flags into (sequence slot, time step).
    pub fn set(&mut self, seq: usize, time: usize, flags: PackingFlags) -> Result<()> {
        let i = self.index(seq, time)?;
        self.flags[i] |= flags;
        Ok(())
    }

    /// Whether the given flag is set at (sequence slot, time step).
    pub fn is(&self, seq: usize, time: usize, flag: PackingFlags) -> Result<bool> {
        Ok(self.get(seq, time)?.contains(flag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_combine() {
        let f = PackingFlags::SEQUENCE_START | PackingFlags::SEQUENCE_END;
        assert!(f.contains(PackingFlags::SEQUENCE_START));
        assert!(f.contains(PackingFlags::SEQUENCE_END));
        assert!(!f.contains(PackingFlags::GAP));
        assert_eq!(format!("{}", f), "start|end");
    }

    #[test]
    fn test_init_clears() {
        let mut l = MbLayout::with_dims(2, 3);
        l.set(1, 2, PackingFlags::SEQUENCE_END).unwrap();
        assert!(l.is(1, 2, PackingFlags::SEQUENCE_END).unwrap());

        l.init(2, 4);
        assert_eq!(l.num_time_steps(), 4);
        assert_eq!(l.num_cols(), 8);
        assert!(l.get(1, 2).unwrap().is_none());
    }

    #[test]
    fn test_set_ors_in() {
        let mut l = MbLayout::with_dims(1, 1);
        l.set(0, 0, PackingFlags::SEQUENCE_START).unwrap();
        l.set(0, 0, PackingFlags::SEQUENCE_END).unwrap();
        let f = l.get(0, 0).unwrap();
        assert!(f.contains(PackingFlags::SEQUENCE_START | PackingFlags::SEQUENCE_END));
    }

    #[test]
    fn test_out_of_bounds() {
        let l = MbLayout::with_dims(2, 3);
        assert!(l.get(2, 0).is_err());
        assert!(l.get(0, 3).is_err());
    }
}
