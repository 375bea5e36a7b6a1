//! The automaton model of a type's possible byte-level representations.

use std::fmt::{self, Debug};
use std::sync::Arc;

mod byte_set;
pub use byte_set::ByteSet;

pub(crate) mod tree;
pub(crate) use tree::Tree;

pub mod nfa;
pub use nfa::{LayoutId, Layouts, State, Transition};


/// An instance of a byte is either initialized to one of a set of values, or uninitialized.
#[derive(Hash, Eq, PartialEq, Clone, Copy)]
pub enum Byte {
    /// Any bit pattern, including an indeterminate one. Never readable as data.
    Uninit,
    Init(ByteSet),
}

impl Byte {
    pub const ANY: Self = Self::Init(ByteSet::FULL);
}

impl fmt::Debug for Byte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            Self::Uninit => f.write_str("??u8"),
            Self::Init(set) => write!(f, "{}u8", set),
        }
    }
}

#[derive(Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mutability {
    Shared,
    Exclusive,
}

/// An opaque lifetime token. Outlives relations between tokens are answered by a
/// [`QueryContext`](crate::QueryContext).
#[derive(Hash, Eq, PartialEq, PartialOrd, Ord, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Lifetime(u32);

impl Lifetime {
    pub const STATIC: Self = Self(0);

    /// A named region. Distinct ids are distinct regions.
    pub const fn region(id: u32) -> Self {
        Self(id.saturating_add(1))
    }

    pub const fn is_static(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0 => f.write_str("'static"),
            id => write!(f, "'r{}", id - 1),
        }
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How many times an array element repeats.
#[derive(Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Count {
    Exact(u64),
    /// A dynamically-sized tail of at least this many elements.
    AtLeast(u64),
}

impl Count {
    /// The fewest elements a value may have.
    pub const fn min(&self) -> u64 {
        match *self {
            Self::Exact(n) | Self::AtLeast(n) => n,
        }
    }

    pub const fn is_exact(&self) -> bool {
        matches!(self, Self::Exact(..))
    }

    /// The count left after `n` elements have been consumed.
    pub(crate) const fn minus(&self, n: u64) -> Self {
        match *self {
            Self::Exact(m) => Self::Exact(m.saturating_sub(n)),
            Self::AtLeast(m) => Self::AtLeast(m.saturating_sub(n)),
        }
    }
}

/// A reference edge: a pointer-width run of bytes that refers to another layout.
#[derive(Hash, Eq, PartialEq, Clone, Copy)]
pub struct Reference {
    /// The referent, shared by identity.
    pub pointee: LayoutId,
    /// The alignment the reference guarantees for its referent.
    pub align: u64,
    pub mutability: Mutability,
    pub lifetime: Lifetime,
    /// Width of the reference itself, in bytes.
    pub size: u64,
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.mutability {
            Mutability::Shared => "&",
            Mutability::Exclusive => "&mut ",
        };
        write!(f, "{}{:?} {:?} (align {})", kind, self.lifetime, self.pointee, self.align)
    }
}

/// Marks the start of a region whose bytes are governed by a type's library safety invariants.
#[derive(Hash, Eq, PartialEq, Clone)]
pub struct Invariant {
    pub name: Arc<str>,
}

impl fmt::Debug for Invariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsafe {}", self.name)
    }
}
