//! Plain configuration records consumed by the builder and the checker.

use std::collections::BTreeMap;

use crate::{Assume, Assumption};

/// Byte order of multi-byte scalars and enum tags.
#[derive(Debug, Default, Hash, Eq, PartialEq, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// Properties of the machine the layouts describe.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Target {
    pub endian: Endian,
    /// Width in bytes of a thin reference.
    pub pointer_size: u64,
}

impl Default for Target {
    fn default() -> Self {
        Self { endian: Endian::Little, pointer_size: 8 }
    }
}

/// Bounds on the work a single check may perform.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Budget {
    /// Maximum number of distinct (source, destination) position pairs evaluated,
    /// pointee checks included.
    pub max_pairs: usize,
    /// Maximum nesting of pointee checks.
    pub max_depth: usize,
}

impl Budget {
    pub const UNLIMITED: Self = Self { max_pairs: usize::MAX, max_depth: usize::MAX };
}

impl Default for Budget {
    fn default() -> Self {
        Self { max_pairs: 1 << 20, max_depth: 128 }
    }
}

/// A set flag with no written reason.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("assuming {0} requires a justification")]
pub struct MissingJustification(pub Assumption);

/// An [`Assume`] whose every set flag must be accompanied by a written reason.
///
/// Hosts that want the "safety comment" discipline enforced hand the checker
/// `justification.validate()?` instead of a bare `Assume`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Justification {
    assume: Assume,
    reasons: BTreeMap<Assumption, String>,
}

impl Justification {
    pub fn new(assume: Assume) -> Self {
        Self { assume, reasons: BTreeMap::new() }
    }

    /// Sets `assumption` and records why the caller upholds it.
    pub fn because(mut self, assumption: Assumption, reason: impl Into<String>) -> Self {
        self.assume |= Assume::only(assumption);
        self.reasons.insert(assumption, reason.into());
        self
    }

    pub fn reason(&self, assumption: Assumption) -> Option<&str> {
        self.reasons.get(&assumption).map(String::as_str)
    }

    /// The flags, provided every set flag has a non-blank reason.
    pub fn validate(&self) -> Result<Assume, MissingJustification> {
        match self.assume.iter().find(|assumption| {
            self.reason(*assumption).map_or(true, |reason| reason.trim().is_empty())
        }) {
            Some(assumption) => Err(MissingJustification(assumption)),
            None => Ok(self.assume),
        }
    }
}
