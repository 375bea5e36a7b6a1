use std::fmt;
use std::ops::RangeInclusive;

/// A set of initialized byte values.
#[derive(Default, Hash, Eq, PartialEq, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ByteSet([u64; 4]);

impl ByteSet {
    pub const EMPTY: Self = Self([0; 4]);
    pub const FULL: Self = Self([u64::MAX; 4]);

    pub const fn singleton(byte: u8) -> Self {
        let mut words = [0; 4];
        words[(byte / 64) as usize] = 1 << (byte % 64);
        Self(words)
    }

    /// The bytes in `start..=end`; empty if `start > end`.
    pub fn range(start: u8, end: u8) -> Self {
        (start..=end).collect()
    }

    pub const fn contains(&self, byte: u8) -> bool {
        self.0[(byte / 64) as usize] & (1 << (byte % 64)) != 0
    }

    pub fn insert(&mut self, byte: u8) {
        self.0[(byte / 64) as usize] |= 1 << (byte % 64);
    }

    pub fn union(self, other: Self) -> Self {
        Self(std::array::from_fn(|i| self.0[i] | other.0[i]))
    }

    pub fn intersection(self, other: Self) -> Self {
        Self(std::array::from_fn(|i| self.0[i] & other.0[i]))
    }

    pub fn difference(self, other: Self) -> Self {
        Self(std::array::from_fn(|i| self.0[i] & !other.0[i]))
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    pub fn is_full(&self) -> bool {
        *self == Self::FULL
    }

    pub fn is_subset(&self, other: &Self) -> bool {
        self.difference(*other).is_empty()
    }

    pub fn intersects(&self, other: &Self) -> bool {
        !self.intersection(*other).is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.iter().map(|word| word.count_ones() as usize).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..=u8::MAX).filter(move |&byte| self.contains(byte))
    }

    /// The maximal runs of consecutive members, in ascending order.
    pub fn ranges(&self) -> Vec<RangeInclusive<u8>> {
        let mut ranges: Vec<RangeInclusive<u8>> = Vec::new();
        for byte in self.iter() {
            match ranges.last_mut() {
                Some(last) if last.end().checked_add(1) == Some(byte) => {
                    *last = *last.start()..=byte;
                }
                _ => ranges.push(byte..=byte),
            }
        }
        ranges
    }
}

impl FromIterator<u8> for ByteSet {
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        let mut set = Self::EMPTY;
        iter.into_iter().for_each(|byte| set.insert(byte));
        set
    }
}

impl From<RangeInclusive<u8>> for ByteSet {
    fn from(range: RangeInclusive<u8>) -> Self {
        Self::range(*range.start(), *range.end())
    }
}

impl fmt::Debug for ByteSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for ByteSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_full() {
            return f.write_str("{any}");
        }
        f.write_str("{")?;
        for (i, range) in self.ranges().into_iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if range.start() == range.end() {
                write!(f, "{:#04x}", range.start())?;
            } else {
                write!(f, "{:#04x}..={:#04x}", range.start(), range.end())?;
            }
        }
        f.write_str("}")
    }
}
