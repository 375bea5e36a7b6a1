//! Type descriptors: the import contract between a host type checker and the analyzer.
//!
//! Offsets, sizes and alignments are supplied by the host; nothing here is recomputed.

use std::ops::RangeInclusive;

use crate::build::BuildError;
use crate::layout::{Count, Lifetime, Mutability};
use crate::Map;

/// Identity of a named definition in [`Definitions`].
#[derive(Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Def(pub u32);

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Descriptor {
    Primitive(Primitive),
    Struct(Struct),
    Union(Union),
    Enum(Enum),
    Array(Array),
    Reference(Pointer),
    Opaque(Opaque),
    /// A definition looked up by identity; the only way to express a recursive type.
    Named(Def),
}

/// Which bit patterns a primitive may hold.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Validity {
    /// The integer value, read in target byte order, lies in one of these ranges.
    Ranges(Vec<RangeInclusive<u128>>),
    /// Any bit pattern, including uninitialized bytes.
    MaybeUninit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Primitive {
    pub size: u64,
    pub align: u64,
    pub valid: Validity,
}

impl Primitive {
    pub fn new(size: u64, align: u64, valid: Vec<RangeInclusive<u128>>) -> Self {
        Self { size, align, valid: Validity::Ranges(valid) }
    }

    /// An integer of `size` bytes that may hold any value.
    pub fn int(size: u64) -> Self {
        let max = match size {
            0 => 0,
            1..=15 => (1u128 << (size * 8)) - 1,
            _ => u128::MAX,
        };
        Self::new(size, size.max(1), vec![0..=max])
    }

    pub fn bool() -> Self {
        Self::new(1, 1, vec![0..=1])
    }

    pub fn u8() -> Self {
        Self::int(1)
    }

    pub fn u16() -> Self {
        Self::int(2)
    }

    pub fn u32() -> Self {
        Self::int(4)
    }

    pub fn u64() -> Self {
        Self::int(8)
    }

    pub fn u128() -> Self {
        Self::int(16)
    }

    pub fn i8() -> Self {
        Self::int(1)
    }

    pub fn i16() -> Self {
        Self::int(2)
    }

    pub fn i32() -> Self {
        Self::int(4)
    }

    pub fn i64() -> Self {
        Self::int(8)
    }

    pub fn f32() -> Self {
        Self::int(4)
    }

    pub fn f64() -> Self {
        Self::int(8)
    }

    pub fn char() -> Self {
        Self::new(4, 4, vec![0..=0xD7FF, 0xE000..=0x10FFFF])
    }

    /// An integer of `size` bytes that is never zero.
    pub fn nonzero(size: u64) -> Self {
        let mut nonzero = Self::int(size);
        if let Validity::Ranges(ranges) = &mut nonzero.valid {
            for range in ranges.iter_mut() {
                *range = 1..=*range.end();
            }
        }
        nonzero
    }

    /// `size` bytes that may be uninitialized.
    pub fn uninit(size: u64) -> Self {
        Self { size, align: 1, valid: Validity::MaybeUninit }
    }
}

/// A field placed at a byte offset of its enclosing type.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Field {
    pub offset: u64,
    pub ty: Descriptor,
}

impl Field {
    pub fn new(offset: u64, ty: Descriptor) -> Self {
        Self { offset, ty }
    }
}

/// Fields must not overlap; gaps become padding. The last field may be a
/// dynamically-sized tail.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Struct {
    pub size: u64,
    pub align: u64,
    pub fields: Vec<Field>,
}

/// Fields may overlap; a value is any one of them.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Union {
    pub size: u64,
    pub align: u64,
    pub fields: Vec<Field>,
}

/// Where an enum keeps its discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tag {
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Variant {
    /// The discriminant, truncated to the tag's size.
    pub tag: i128,
    /// Field offsets are relative to the start of the enum.
    pub fields: Vec<Field>,
}

impl Variant {
    pub fn new(tag: i128, fields: Vec<Field>) -> Self {
        Self { tag, fields }
    }

    /// A variant with no fields.
    pub fn unit(tag: i128) -> Self {
        Self::new(tag, Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Enum {
    pub size: u64,
    pub align: u64,
    pub tag: Tag,
    pub variants: Vec<Variant>,
    /// Fields of the variant every undeclared tag value selects, if any.
    pub catch_all: Option<Vec<Field>>,
}

impl Enum {
    /// A fieldless enum whose discriminant fills the whole value.
    pub fn fieldless(size: u64, tags: impl IntoIterator<Item = i128>) -> Self {
        Self {
            size,
            align: size.max(1),
            tag: Tag { offset: 0, size },
            variants: tags.into_iter().map(Variant::unit).collect(),
            catch_all: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Array {
    pub element: Box<Descriptor>,
    pub count: Count,
}

/// A reference to a value of `pointee`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Pointer {
    pub pointee: Box<Descriptor>,
    /// The alignment the reference guarantees for its pointee.
    pub align: u64,
    pub mutability: Mutability,
    pub lifetime: Lifetime,
}

/// A type whose bytes are unconstrained but which upholds library safety invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Opaque {
    pub name: String,
    pub size: u64,
    pub align: u64,
}

macro_rules! impl_from {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for Descriptor {
                fn from(inner: $ty) -> Self {
                    Self::$variant(inner)
                }
            }
        )*
    };
}

impl_from! {
    Primitive(Primitive),
    Struct(Struct),
    Union(Union),
    Enum(Enum),
    Array(Array),
    Reference(Pointer),
    Opaque(Opaque),
    Named(Def),
}

impl Descriptor {
    pub fn array(element: Descriptor, count: u64) -> Self {
        Self::Array(Array { element: Box::new(element), count: Count::Exact(count) })
    }

    /// A trailing slice of at least `min` elements.
    pub fn tail(element: Descriptor, min: u64) -> Self {
        Self::Array(Array { element: Box::new(element), count: Count::AtLeast(min) })
    }

    pub fn shared(pointee: Descriptor, align: u64, lifetime: Lifetime) -> Self {
        Self::Reference(Pointer {
            pointee: Box::new(pointee),
            align,
            mutability: Mutability::Shared,
            lifetime,
        })
    }

    pub fn exclusive(pointee: Descriptor, align: u64, lifetime: Lifetime) -> Self {
        Self::Reference(Pointer {
            pointee: Box::new(pointee),
            align,
            mutability: Mutability::Exclusive,
            lifetime,
        })
    }

    /// Either a null pointer or `reference`.
    pub fn nullable(reference: Pointer, pointer_size: u64) -> Self {
        let null = Primitive::new(pointer_size, pointer_size, vec![0..=0]);
        Self::Union(Union {
            size: pointer_size,
            align: pointer_size,
            fields: vec![
                Field::new(0, Self::Primitive(null)),
                Field::new(0, Self::Reference(reference)),
            ],
        })
    }

    /// A `repr(C)`-style struct: fields in declared order, each at the next offset
    /// aligned for it, with the total padded to the struct's alignment.
    ///
    /// `fields` are `(size, align, descriptor)` triples. Fails with [`BuildError::TooLarge`]
    /// if an offset overflows.
    pub fn repr_c(fields: impl IntoIterator<Item = (u64, u64, Descriptor)>) -> Result<Self, BuildError> {
        fn round_up(offset: u64, align: u64) -> Result<u64, BuildError> {
            offset.div_ceil(align).checked_mul(align).ok_or(BuildError::TooLarge)
        }

        let (mut offset, mut align) = (0u64, 1u64);
        let mut placed = Vec::new();
        for (size, field_align, ty) in fields {
            let field_align = field_align.max(1);
            offset = round_up(offset, field_align)?;
            align = align.max(field_align);
            placed.push(Field::new(offset, ty));
            offset = offset.checked_add(size).ok_or(BuildError::TooLarge)?;
        }
        Ok(Self::Struct(Struct { size: round_up(offset, align)?, align, fields: placed }))
    }
}

/// The named definitions a set of descriptors may refer to.
#[derive(Debug, Default, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Definitions {
    defs: Map<Def, (String, Descriptor)>,
    next: u32,
}

impl Definitions {
    /// Reserve an identity for a definition that may refer to itself.
    pub fn declare(&mut self) -> Def {
        let def = Def(self.next);
        self.next += 1;
        def
    }

    pub fn define(&mut self, def: Def, name: impl Into<String>, descriptor: Descriptor) {
        self.defs.insert(def, (name.into(), descriptor));
    }

    pub fn insert(&mut self, name: impl Into<String>, descriptor: Descriptor) -> Def {
        let def = self.declare();
        self.define(def, name, descriptor);
        def
    }

    pub fn get(&self, def: Def) -> Option<&Descriptor> {
        self.defs.get(&def).map(|(_, descriptor)| descriptor)
    }

    pub fn name(&self, def: Def) -> Option<&str> {
        self.defs.get(&def).map(|(name, _)| name.as_str())
    }
}
