//! Counterexamples for rejected transmutations.

use std::fmt;

use crate::layout::{ByteSet, Lifetime, Mutability};

/// Why, and where, a source value may fail to be a destination value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason} at offset {offset:#x}")]
pub struct Diagnostic {
    /// Byte offset of the first mismatch, from the start of the value being checked.
    pub offset: u64,
    pub reason: Reason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    /// The source may hold bytes the destination does not accept there.
    BitValidityMismatch { found: Constraint, expected: Constraint },
    /// A reference guarantees less alignment than the destination requires.
    AlignmentInsufficient { required: u64, available: u64 },
    /// A source reference's lifetime is not known to outlive the destination's.
    LifetimeUnbounded { src: Lifetime, dst: Lifetime },
    /// A shared reference would become an exclusive one.
    MutabilityMismatch,
    /// Bytes would be written into a type with library safety invariants.
    SafetyInvariantUnproven { name: String },
    /// The referents of two references are not compatible.
    PointeeMismatch(Box<Diagnostic>),
    /// The check gave up after exhausting its budget.
    ResourceExceeded { budget: usize },
}

/// What one side of a mismatch can produce or accepts at an offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    Bytes(ByteSet),
    Uninit,
    Reference { mutability: Mutability, align: u64 },
    /// The end of the value.
    End,
    /// The start of a region guarded by the named type's safety invariants.
    Opaque(String),
    OneOf(Vec<Constraint>),
}

/// The safety dimension a [`Reason`] belongs to.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy)]
pub enum Dimension {
    Validity,
    Alignment,
    Lifetime,
    Safety,
    Resource,
}

/// How a pair of references failed.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy)]
pub enum ReferenceFailure {
    Alignment,
    Lifetime,
    Mutability,
    Pointee,
}

impl Diagnostic {
    pub fn new(offset: u64, reason: Reason) -> Self {
        Self { offset, reason }
    }

    /// The same diagnostic, reported `by` bytes further into the value.
    pub fn shifted(self, by: u64) -> Self {
        Self { offset: self.offset.saturating_add(by), ..self }
    }

    pub fn dimension(&self) -> Dimension {
        match &self.reason {
            Reason::BitValidityMismatch { .. } | Reason::MutabilityMismatch => Dimension::Validity,
            Reason::AlignmentInsufficient { .. } => Dimension::Alignment,
            Reason::LifetimeUnbounded { .. } => Dimension::Lifetime,
            Reason::SafetyInvariantUnproven { .. } => Dimension::Safety,
            Reason::PointeeMismatch(inner) => inner.dimension(),
            Reason::ResourceExceeded { .. } => Dimension::Resource,
        }
    }

    /// For failures between two references, which part of the reference failed.
    pub fn reference_failure(&self) -> Option<ReferenceFailure> {
        match &self.reason {
            Reason::AlignmentInsufficient { .. } => Some(ReferenceFailure::Alignment),
            Reason::LifetimeUnbounded { .. } => Some(ReferenceFailure::Lifetime),
            Reason::MutabilityMismatch => Some(ReferenceFailure::Mutability),
            Reason::PointeeMismatch(..) => Some(ReferenceFailure::Pointee),
            _ => None,
        }
    }

    /// Follow pointee mismatches down to the innermost failure.
    pub fn root_cause(&self) -> &Diagnostic {
        match &self.reason {
            Reason::PointeeMismatch(inner) => inner.root_cause(),
            _ => self,
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BitValidityMismatch { found, expected } => {
                write!(f, "source may hold {} where the destination requires {}", found, expected)
            }
            Self::AlignmentInsufficient { required, available } => {
                write!(f, "reference is aligned to {} but {} is required", available, required)
            }
            Self::LifetimeUnbounded { src, dst } => {
                write!(f, "lifetime {} is not known to outlive {}", src, dst)
            }
            Self::MutabilityMismatch => f.write_str("shared reference cannot become exclusive"),
            Self::SafetyInvariantUnproven { name } => {
                write!(f, "writing into `{}` may violate its safety invariants", name)
            }
            Self::PointeeMismatch(inner) => write!(f, "referents differ ({})", inner),
            Self::ResourceExceeded { budget } => {
                write!(f, "gave up after exceeding a budget of {}", budget)
            }
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(set) => write!(f, "bytes {}", set),
            Self::Uninit => f.write_str("uninitialized bytes"),
            Self::Reference { mutability: Mutability::Shared, align } => {
                write!(f, "a shared reference (align {})", align)
            }
            Self::Reference { mutability: Mutability::Exclusive, align } => {
                write!(f, "an exclusive reference (align {})", align)
            }
            Self::End => f.write_str("the end of the value"),
            Self::Opaque(name) => write!(f, "a `{}`", name),
            Self::OneOf(options) if options.is_empty() => f.write_str("nothing"),
            Self::OneOf(options) => {
                for (index, option) in options.iter().enumerate() {
                    if index > 0 {
                        f.write_str(" or ")?;
                    }
                    write!(f, "{}", option)?;
                }
                Ok(())
            }
        }
    }
}
