//! Decide whether a value of one type layout may be reinterpreted as another.
//!
//! Layouts are modelled as automata over byte positions (see [`layout`]). A caller describes
//! both types with [`Descriptor`]s, picks the [`Assume`] flags it is prepared to discharge
//! itself, and asks whether every value of the source is also a value of the destination.
//!
//! ```
//! use layout_transmute::{check, Assume, Descriptor, Primitive};
//!
//! let bool_ = Descriptor::Primitive(Primitive::bool());
//! let u8_ = Descriptor::Primitive(Primitive::u8());
//!
//! assert!(check(&bool_, &u8_, Assume::default()).is_ok());
//! assert!(check(&u8_, &bool_, Assume::default()).is_err());
//! ```

pub(crate) use rustc_hash::{FxHashMap as Map, FxHashSet as Set};

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

pub mod build;
pub mod config;
pub mod descriptor;
pub mod diagnostic;
pub mod layout;
pub mod maybe_transmutable;

pub use build::{BuildError, Builder};
pub use config::{Budget, Endian, Justification, MissingJustification, Target};
pub use descriptor::{
    Array, Def, Definitions, Descriptor, Enum, Field, Opaque, Pointer, Primitive, Struct, Tag,
    Union, Validity, Variant,
};
pub use diagnostic::{Constraint, Diagnostic, Dimension, Reason, ReferenceFailure};
pub use layout::{ByteSet, Count, LayoutId, Layouts, Lifetime, Mutability};
pub use maybe_transmutable::query_context::{DefaultContext, Outlives, QueryContext};
pub use maybe_transmutable::{MaybeTransmutableQuery, Stats};

/// The safety dimensions a caller may promise to uphold on its own.
///
/// `Assume::default()` assumes nothing and is the strictest mode. Setting a flag never turns
/// an accepted transmutation into a rejected one.
#[derive(Default, Debug, Hash, Eq, PartialEq, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Assume {
    /// Reference edges need not meet the destination's alignment requirement.
    pub alignment: bool,
    /// Source references need not outlive destination references.
    pub lifetimes: bool,
    /// Bytes may be written into types that carry library safety invariants.
    pub safety: bool,
    /// The caller checks that the actual value lies in the destination's valid range.
    pub validity: bool,
}

/// A single [`Assume`] flag.
#[derive(Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Assumption {
    Alignment,
    Lifetimes,
    Safety,
    Validity,
}

impl Assume {
    pub const NOTHING: Self =
        Self { alignment: false, lifetimes: false, safety: false, validity: false };

    pub const EVERYTHING: Self =
        Self { alignment: true, lifetimes: true, safety: true, validity: true };

    pub const fn only(assumption: Assumption) -> Self {
        let mut assume = Self::NOTHING;
        match assumption {
            Assumption::Alignment => assume.alignment = true,
            Assumption::Lifetimes => assume.lifetimes = true,
            Assumption::Safety => assume.safety = true,
            Assumption::Validity => assume.validity = true,
        }
        assume
    }

    pub const fn union(self, other: Self) -> Self {
        Self {
            alignment: self.alignment || other.alignment,
            lifetimes: self.lifetimes || other.lifetimes,
            safety: self.safety || other.safety,
            validity: self.validity || other.validity,
        }
    }

    pub const fn is_empty(&self) -> bool {
        !(self.alignment || self.lifetimes || self.safety || self.validity)
    }

    /// Is every flag set in `other` also set in `self`?
    pub const fn contains(&self, other: Self) -> bool {
        (self.alignment || !other.alignment)
            && (self.lifetimes || !other.lifetimes)
            && (self.safety || !other.safety)
            && (self.validity || !other.validity)
    }

    pub const fn get(&self, assumption: Assumption) -> bool {
        match assumption {
            Assumption::Alignment => self.alignment,
            Assumption::Lifetimes => self.lifetimes,
            Assumption::Safety => self.safety,
            Assumption::Validity => self.validity,
        }
    }

    /// The flags that are set, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = Assumption> + '_ {
        [Assumption::Alignment, Assumption::Lifetimes, Assumption::Safety, Assumption::Validity]
            .into_iter()
            .filter(move |&assumption| self.get(assumption))
    }
}

impl From<Assumption> for Assume {
    fn from(assumption: Assumption) -> Self {
        Self::only(assumption)
    }
}

impl BitOr for Assume {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for Assume {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl fmt::Display for Assumption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Alignment => "alignment",
            Self::Lifetimes => "lifetimes",
            Self::Safety => "safety invariants",
            Self::Validity => "bit validity",
        })
    }
}

/// The type encodes answers to the question: "Are these types transmutable?"
#[derive(Debug, Eq, PartialEq, Clone)]
pub enum Answer {
    /// `Src` is transmutable into `Dst`, provided the caller upholds the enclosed assumptions.
    Yes(Assume),

    /// `Src` is NOT transmutable into `Dst`.
    No(Diagnostic),
}

impl Answer {
    pub fn is_yes(&self) -> bool {
        matches!(self, Self::Yes(..))
    }

    pub fn into_result(self) -> Result<Assume, Diagnostic> {
        match self {
            Self::Yes(exercised) => Ok(exercised),
            Self::No(diagnostic) => Err(diagnostic),
        }
    }
}

/// Everything that can go wrong when answering a query from descriptors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A descriptor could not be turned into a layout.
    #[error("malformed descriptor: {0}")]
    Malformed(#[from] BuildError),

    /// The layouts were built, and the source is not transmutable into the destination.
    #[error("not transmutable: {0}")]
    Rejected(#[from] Diagnostic),
}

impl Error {
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            Self::Rejected(diagnostic) => Some(diagnostic),
            Self::Malformed(..) => None,
        }
    }
}

/// Answers transmutability questions for descriptors drawn from one set of [`Definitions`].
pub struct TransmuteEnv<'d, C = DefaultContext> {
    definitions: &'d Definitions,
    target: Target,
    budget: Budget,
    context: C,
    src_len: Option<u64>,
    dst_len: Option<u64>,
}

impl<'d> TransmuteEnv<'d, DefaultContext> {
    pub fn new(definitions: &'d Definitions) -> Self {
        Self {
            definitions,
            target: Target::default(),
            budget: Budget::default(),
            context: DefaultContext,
            src_len: None,
            dst_len: None,
        }
    }
}

impl<'d, C> TransmuteEnv<'d, C>
where
    C: QueryContext,
{
    pub fn with_target(self, target: Target) -> Self {
        Self { target, ..self }
    }

    pub fn with_budget(self, budget: Budget) -> Self {
        Self { budget, ..self }
    }

    pub fn with_context<D: QueryContext>(self, context: D) -> TransmuteEnv<'d, D> {
        let Self { definitions, target, budget, src_len, dst_len, .. } = self;
        TransmuteEnv { definitions, target, budget, context, src_len, dst_len }
    }

    /// Resolve dynamically-sized tails against the total byte length of each value.
    pub fn with_total_len(self, src_len: Option<u64>, dst_len: Option<u64>) -> Self {
        Self { src_len, dst_len, ..self }
    }

    /// Builds both layouts into one arena and answers the query.
    #[tracing::instrument(level = "debug", skip(self, src, dst))]
    pub fn answer(&self, src: &Descriptor, dst: &Descriptor, assume: Assume) -> Result<Answer, BuildError> {
        let mut layouts = Layouts::default();
        let src = Builder::new(&mut layouts, self.definitions)
            .with_target(self.target)
            .with_total_len(self.src_len)
            .build(src)?;
        let dst = Builder::new(&mut layouts, self.definitions)
            .with_target(self.target)
            .with_total_len(self.dst_len)
            .build(dst)?;
        tracing::trace!(states = layouts.state_count(), "built layouts");

        Ok(MaybeTransmutableQuery::new(&layouts, src, dst, assume, &self.context)
            .with_budget(self.budget)
            .answer())
    }

    /// On success, returns the subset of `assume` the decision actually relied on.
    pub fn is_transmutable(
        &self,
        src: &Descriptor,
        dst: &Descriptor,
        assume: Assume,
    ) -> Result<Assume, Error> {
        Ok(self.answer(src, dst, assume)?.into_result()?)
    }
}

/// Is every value of `src` a valid value of `dst`?
///
/// Uses the default [`Target`], [`Budget`] and lifetime context, and no named definitions.
pub fn check(src: &Descriptor, dst: &Descriptor, assume: Assume) -> Result<Assume, Error> {
    let definitions = Definitions::default();
    TransmuteEnv::new(&definitions).is_transmutable(src, dst, assume)
}
