//! Injectable randomness for example generation and prompt assembly.
//!
//! Every branch in the assembler is driven by coin flips and uniform picks. The
//! `DrawSource` seam lets callers pass a seeded RNG for reproducible runs, or a
//! scripted sequence when a test needs to force a specific branch.

use rand::Rng;

/// Source of the two kinds of draws the harness makes.
pub trait DrawSource {
    /// A fair coin.
    fn coin(&mut self) -> bool;
    /// A uniform index in `0..len`. `len` is always non-zero.
    fn index(&mut self, len: usize) -> usize;
}

impl<R: Rng + ?Sized> DrawSource for R {
    fn coin(&mut self) -> bool {
        self.gen_bool(0.5)
    }

    fn index(&mut self, len: usize) -> usize {
        self.gen_range(0..len)
    }
}

/// Pick one element of a non-empty slice.
pub fn pick<'a, T, D: DrawSource + ?Sized>(draws: &mut D, items: &'a [T]) -> &'a T {
    &items[draws.index(items.len())]
}
