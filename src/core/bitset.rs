use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitXor};

/// Number of bits held by a [`BitSet64`].
pub const BITS: u32 = 64;

/// A 64-bit integer used as a fixed-size bit vector.
///
/// Bit indices are always taken modulo 64, so index arithmetic in the hasher
/// can wrap instead of being rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BitSet64(pub u64);

impl BitSet64 {
    pub const EMPTY: Self = Self(0);
    pub const FULL: Self = Self(u64::MAX);

    pub fn new(bits: u64) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    /// Value of bit `k mod 64`.
    pub fn get(self, k: usize) -> bool {
        (self.0 >> (k % BITS as usize)) & 1 == 1
    }

    /// Set bit `k mod 64` to 1.
    pub fn set(&mut self, k: usize) {
        self.0 |= 1u64 << (k % BITS as usize);
    }

    /// Set bit `k mod 64` to 0.
    pub fn clear(&mut self, k: usize) {
        self.0 &= !(1u64 << (k % BITS as usize));
    }

    /// Number of 1 bits, in `0..=64`.
    pub fn popcount(self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Render the bitset as an 8x8 grid of `0`/`1`, one row of pixels per
    /// line. Bit `x + 8*y` sits at column `x` of row `y`.
    pub fn render_grid(self) -> String {
        let mut out = String::with_capacity(8 * 16);
        for y in 0..8 {
            let row: Vec<&str> = (0..8)
                .map(|x| if self.get(x + 8 * y) { "1" } else { "0" })
                .collect();
            out.push_str(&row.join(" "));
            out.push('\n');
        }
        out
    }
}

impl From<u64> for BitSet64 {
    fn from(bits: u64) -> Self {
        Self(bits)
    }
}

impl BitOr for BitSet64 {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for BitSet64 {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitXor for BitSet64 {
    type Output = Self;

    fn bitxor(self, rhs: Self) -> Self {
        Self(self.0 ^ rhs.0)
    }
}

impl fmt::Display for BitSet64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
