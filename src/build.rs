//! Build layouts from type descriptors.

use std::ops::RangeInclusive;
use std::sync::Arc;

use crate::config::Target;
use crate::descriptor::{
    Array, Def, Definitions, Descriptor, Enum, Field, Opaque, Pointer, Primitive, Struct, Union,
    Validity,
};
use crate::layout::{Count, Invariant, LayoutId, Layouts, Reference, Tree};
use crate::{Map, Set};

type Result<T> = core::result::Result<T, BuildError>;

/// A descriptor that does not describe a well-formed layout.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("field at {offset:#x} overlaps the previous field, which ends at {previous_end:#x}")]
    OverlappingFields { offset: u64, previous_end: u64 },

    #[error("field at {offset:#x} ends at {end:#x}, past the end of its {size:#x}-byte parent")]
    FieldOutOfBounds { offset: u64, end: u64, size: u64 },

    #[error("variant with tag {tag} ends at {end:#x}, past the end of its {size:#x}-byte enum")]
    VariantOutOfBounds { tag: i128, end: u64, size: u64 },

    #[error("field at {offset:#x} is not aligned to {align}")]
    MisalignedField { offset: u64, align: u64 },

    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(u64),

    #[error("tag {tag} is declared more than once")]
    DuplicateTag { tag: i128 },

    #[error("tag {tag} does not fit in {size} bytes")]
    TagOutOfRange { tag: i128, size: u64 },

    #[error("union has no fields")]
    EmptyUnion,

    #[error("`{name}` contains itself without indirection")]
    InfiniteSize { name: String },

    #[error("`{name}` refers to itself through an unnamed pointee; name the pointee instead")]
    UnnamedRecursion { name: String },

    #[error("no definition for {0:?}")]
    UnknownDefinition(Def),

    #[error("dynamically-sized field at {offset:#x} is not the last field")]
    UnsizedNotLast { offset: u64 },

    #[error("dynamically-sized type at {offset:#x} may only be the last field of a struct")]
    UnsizedMember { offset: u64 },

    #[error("tail at {offset:#x} with {element}-byte elements cannot end at total length {len:#x}")]
    TailLength { offset: u64, element: u64, len: u64 },

    #[error("invalid scalar: {reason}")]
    InvalidScalar { reason: String },

    #[error("alternatives at {offset:#x} have different sizes")]
    MismatchedAlternatives { offset: u64 },

    #[error("layout is too large")]
    TooLarge,
}

/// A built fragment and what its enclosing type needs to know about it.
struct Built {
    tree: Tree,
    align: u64,
    /// Ends in a dynamically-sized tail (even one resolved against a total length).
    unsized_: bool,
}

impl Built {
    fn sized(tree: Tree, align: u64) -> Self {
        Self { tree, align, unsized_: false }
    }
}

/// Builds layouts into a [`Layouts`] arena.
///
/// Named definitions reached through references are built once per builder and shared by
/// identity, which is what lets self-referential types terminate.
pub struct Builder<'l, 'd> {
    layouts: &'l mut Layouts,
    definitions: &'d Definitions,
    target: Target,
    total_len: Option<u64>,
    named: Map<Def, LayoutId>,
    /// Definitions expanded in place since the last reference.
    inline: Vec<Def>,
    /// Definitions expanded since the last named referent.
    expanding: Vec<Def>,
}

impl<'l, 'd> Builder<'l, 'd> {
    pub fn new(layouts: &'l mut Layouts, definitions: &'d Definitions) -> Self {
        Self {
            layouts,
            definitions,
            target: Target::default(),
            total_len: None,
            named: Map::default(),
            inline: Vec::new(),
            expanding: Vec::new(),
        }
    }

    pub fn with_target(self, target: Target) -> Self {
        Self { target, ..self }
    }

    /// Resolve a dynamically-sized tail of the root value against its total byte length.
    pub fn with_total_len(self, total_len: Option<u64>) -> Self {
        Self { total_len, ..self }
    }

    #[tracing::instrument(level = "debug", skip_all)]
    pub fn build(&mut self, descriptor: &Descriptor) -> Result<LayoutId> {
        let built = self.extend(descriptor, 0)?;
        let id = self.layouts.reserve()?;
        self.layouts.define(id, &built.tree)?;
        tracing::trace!(?id, size = ?built.tree.size(), "built layout");
        Ok(id)
    }

    fn extend(&mut self, descriptor: &Descriptor, offset: u64) -> Result<Built> {
        match descriptor {
            Descriptor::Primitive(primitive) => self.primitive(primitive),
            Descriptor::Struct(s) => self.extend_struct(s, offset),
            Descriptor::Union(u) => self.extend_union(u, offset),
            Descriptor::Enum(e) => self.extend_enum(e, offset),
            Descriptor::Array(array) => self.extend_array(array, offset),
            Descriptor::Reference(pointer) => self.reference(pointer),
            Descriptor::Opaque(Opaque { name, size, align }) => {
                let invariant = Invariant { name: Arc::from(name.as_str()) };
                Ok(Built::sized(Tree::def(invariant).then(Tree::number(*size)), check_align(*align)?))
            }
            &Descriptor::Named(def) => {
                let definitions = self.definitions;
                let descriptor = definitions.get(def).ok_or(BuildError::UnknownDefinition(def))?;
                if self.inline.contains(&def) {
                    return Err(BuildError::InfiniteSize { name: self.name_of(def) });
                }
                if self.expanding.contains(&def) {
                    return Err(BuildError::UnnamedRecursion { name: self.name_of(def) });
                }
                self.inline.push(def);
                self.expanding.push(def);
                let built = self.extend(descriptor, offset);
                self.expanding.pop();
                self.inline.pop();
                built
            }
        }
    }

    fn name_of(&self, def: Def) -> String {
        self.definitions.name(def).map_or_else(|| format!("{:?}", def), str::to_owned)
    }

    fn primitive(&mut self, primitive: &Primitive) -> Result<Built> {
        let align = check_align(primitive.align)?;
        let ranges = match &primitive.valid {
            Validity::MaybeUninit => return Ok(Built::sized(Tree::padding(primitive.size), align)),
            Validity::Ranges(ranges) => ranges,
        };
        let invalid = |reason: String| BuildError::InvalidScalar { reason };

        if primitive.size > 16 {
            return Err(invalid(format!("{} bytes is wider than 16", primitive.size)));
        }
        let max = max_value(primitive.size);
        if let Some(range) = ranges.iter().find(|range| range.start() > range.end() || *range.end() > max) {
            return Err(invalid(format!("range {:#x}..={:#x} is empty or exceeds {:#x}", range.start(), range.end(), max)));
        }
        if primitive.size == 0 {
            let tree = if ranges.is_empty() { Tree::uninhabited() } else { Tree::unit() };
            return Ok(Built::sized(tree, align));
        }
        let tree = Tree::from_ranges(primitive.size as usize, ranges, self.target.endian);
        Ok(Built::sized(tree, align))
    }

    fn extend_struct(&mut self, s: &Struct, offset: u64) -> Result<Built> {
        let align = check_align(s.align)?;
        let mut fields: Vec<&Field> = s.fields.iter().collect();
        fields.sort_by_key(|field| field.offset);

        let mut seq = Tree::unit();
        let mut end = 0;
        let mut unsized_ = false;

        for (index, field) in fields.iter().enumerate() {
            if field.offset < end {
                return Err(BuildError::OverlappingFields { offset: field.offset, previous_end: end });
            }
            let built = self.extend(&field.ty, offset.saturating_add(field.offset))?;
            check_placement(field.offset, built.align)?;

            let size = built.tree.size();
            if built.unsized_ || size.is_none() {
                if index + 1 != fields.len() {
                    return Err(BuildError::UnsizedNotLast { offset: field.offset });
                }
                unsized_ = true;
            }
            let padding = Tree::padding(field.offset - end);
            end = field.offset.checked_add(size.unwrap_or(0)).ok_or(BuildError::TooLarge)?;
            if !unsized_ && end > s.size {
                return Err(BuildError::FieldOutOfBounds { offset: field.offset, end, size: s.size });
            }
            seq = seq.then(padding).then(built.tree);
        }

        if !unsized_ {
            seq = seq.then(Tree::padding(s.size - end));
        }
        Ok(Built { tree: seq, align, unsized_ })
    }

    fn extend_union(&mut self, u: &Union, offset: u64) -> Result<Built> {
        let align = check_align(u.align)?;
        if u.fields.is_empty() {
            return Err(BuildError::EmptyUnion);
        }

        let mut tree = Tree::uninhabited();
        for field in &u.fields {
            let built = self.extend(&field.ty, offset.saturating_add(field.offset))?;
            check_placement(field.offset, built.align)?;
            let size = match (built.unsized_, built.tree.size()) {
                (false, Some(size)) => size,
                _ => return Err(BuildError::UnsizedMember { offset: field.offset }),
            };
            let end = field.offset.checked_add(size).ok_or(BuildError::TooLarge)?;
            if end > u.size {
                return Err(BuildError::FieldOutOfBounds { offset: field.offset, end, size: u.size });
            }

            let member = Tree::padding(field.offset)
                .then(built.tree)
                .then(Tree::padding(u.size - end));
            tree = tree.or(member);
        }
        Ok(Built::sized(tree, align))
    }

    fn extend_enum(&mut self, e: &Enum, offset: u64) -> Result<Built> {
        let align = check_align(e.align)?;
        let tag = e.tag;
        if tag.size == 0 || tag.size > 16 {
            return Err(BuildError::InvalidScalar { reason: format!("tag of {} bytes", tag.size) });
        }
        let tag_end = tag.offset.checked_add(tag.size).ok_or(BuildError::TooLarge)?;
        if tag_end > e.size {
            return Err(BuildError::FieldOutOfBounds { offset: tag.offset, end: tag_end, size: e.size });
        }

        let mut declared: Set<u128> = Set::default();
        let mut tree = Tree::uninhabited();

        for variant in &e.variants {
            let bits = tag_bits(variant.tag, tag.size)?;
            if !declared.insert(bits) {
                return Err(BuildError::DuplicateTag { tag: variant.tag });
            }
            let discriminant = Tree::from_ranges(tag.size as usize, &[bits..=bits], self.target.endian);
            let member = self.extend_variant(e, discriminant, &variant.fields, offset, variant.tag)?;
            tree = tree.or(member);
        }

        if let Some(fields) = &e.catch_all {
            let undeclared = complement(&declared, max_value(tag.size));
            if !undeclared.is_empty() {
                let discriminant = Tree::from_ranges(tag.size as usize, &undeclared, self.target.endian);
                let member = self.extend_variant(e, discriminant, fields, offset, -1)?;
                tree = tree.or(member);
            }
        }

        Ok(Built::sized(tree, align))
    }

    /// The discriminant and fields of one variant, in offset order, padded to the enum's size.
    fn extend_variant(
        &mut self,
        e: &Enum,
        discriminant: Tree,
        fields: &[Field],
        offset: u64,
        tag: i128,
    ) -> Result<Tree> {
        let mut placed = vec![(e.tag.offset, e.tag.size, discriminant)];
        for field in fields {
            let built = self.extend(&field.ty, offset.saturating_add(field.offset))?;
            check_placement(field.offset, built.align)?;
            match (built.unsized_, built.tree.size()) {
                (false, Some(size)) => placed.push((field.offset, size, built.tree)),
                _ => return Err(BuildError::UnsizedMember { offset: field.offset }),
            }
        }
        placed.sort_by_key(|(offset, ..)| *offset);

        let mut seq = Tree::unit();
        let mut end = 0;
        for (offset, size, tree) in placed {
            if offset < end {
                return Err(BuildError::OverlappingFields { offset, previous_end: end });
            }
            seq = seq.then(Tree::padding(offset - end)).then(tree);
            end = offset.checked_add(size).ok_or(BuildError::TooLarge)?;
            if end > e.size {
                return Err(BuildError::VariantOutOfBounds { tag, end, size: e.size });
            }
        }
        Ok(seq.then(Tree::padding(e.size - end)))
    }

    fn extend_array(&mut self, array: &Array, offset: u64) -> Result<Built> {
        let element = self.extend(&array.element, offset)?;
        let size = match (element.unsized_, element.tree.size()) {
            (false, Some(size)) => size,
            _ => return Err(BuildError::UnsizedMember { offset }),
        };

        let count = match (array.count, self.total_len) {
            (Count::Exact(n), _) => {
                size.checked_mul(n).ok_or(BuildError::TooLarge)?;
                Count::Exact(n)
            }
            (Count::AtLeast(n), Some(len)) if size > 0 => {
                let tail_len = BuildError::TailLength { offset, element: size, len };
                let available = len.checked_sub(offset).ok_or_else(|| tail_len.clone())?;
                if available % size != 0 || available / size < n {
                    return Err(tail_len);
                }
                Count::Exact(available / size)
            }
            (count @ Count::AtLeast(..), _) => count,
        };

        Ok(Built {
            tree: Tree::repeat(element.tree, count),
            align: element.align,
            unsized_: !array.count.is_exact(),
        })
    }

    fn reference(&mut self, pointer: &Pointer) -> Result<Built> {
        let align = check_align(pointer.align)?;
        let pointee = match &*pointer.pointee {
            &Descriptor::Named(def) => self.named_layout(def)?,
            anonymous => self.anonymous_layout(anonymous)?,
        };
        let size = match self.layouts.size(pointee) {
            Some(..) => self.target.pointer_size,
            // address and length
            None => self.target.pointer_size.saturating_mul(2),
        };
        let reference = Reference {
            pointee,
            align,
            mutability: pointer.mutability,
            lifetime: pointer.lifetime,
            size,
        };
        Ok(Built::sized(Tree::Ref(reference), self.target.pointer_size))
    }

    fn named_layout(&mut self, def: Def) -> Result<LayoutId> {
        if let Some(&id) = self.named.get(&def) {
            return Ok(id);
        }
        let definitions = self.definitions;
        let descriptor = definitions.get(def).ok_or(BuildError::UnknownDefinition(def))?;
        let id = self.layouts.reserve()?;
        self.named.insert(def, id);

        let inline = std::mem::replace(&mut self.inline, vec![def]);
        let expanding = std::mem::replace(&mut self.expanding, vec![def]);
        let total_len = self.total_len.take();
        let built = self.extend(descriptor, 0);
        self.total_len = total_len;
        self.expanding = expanding;
        self.inline = inline;

        self.layouts.define(id, &built?.tree)?;
        Ok(id)
    }

    fn anonymous_layout(&mut self, descriptor: &Descriptor) -> Result<LayoutId> {
        let id = self.layouts.reserve()?;
        let inline = std::mem::take(&mut self.inline);
        let total_len = self.total_len.take();
        let built = self.extend(descriptor, 0);
        self.total_len = total_len;
        self.inline = inline;

        self.layouts.define(id, &built?.tree)?;
        Ok(id)
    }
}

fn check_align(align: u64) -> Result<u64> {
    if align.is_power_of_two() {
        Ok(align)
    } else {
        Err(BuildError::InvalidAlignment(align))
    }
}

fn check_placement(offset: u64, align: u64) -> Result<()> {
    if offset % align == 0 {
        Ok(())
    } else {
        Err(BuildError::MisalignedField { offset, align })
    }
}

fn max_value(size: u64) -> u128 {
    match size {
        0 => 0,
        1..=15 => (1u128 << (size * 8)) - 1,
        _ => u128::MAX,
    }
}

/// Truncate `tag` to `size` bytes of two's complement, refusing values that do not fit.
fn tag_bits(tag: i128, size: u64) -> Result<u128> {
    let bits = size * 8;
    if bits < 128 {
        let min = -(1i128 << (bits - 1));
        let max = (1i128 << bits) - 1;
        if tag < min || tag > max {
            return Err(BuildError::TagOutOfRange { tag, size });
        }
    }
    Ok(tag as u128 & max_value(size))
}

/// The values in `0..=max` that are not in `values`, as ranges.
fn complement(values: &Set<u128>, max: u128) -> Vec<RangeInclusive<u128>> {
    let mut sorted: Vec<u128> = values.iter().copied().collect();
    sorted.sort_unstable();

    let mut ranges = Vec::new();
    let mut next = Some(0u128);
    for value in sorted {
        match next {
            Some(start) if value > start => ranges.push(start..=value - 1),
            _ => {}
        }
        next = value.checked_add(1);
    }
    if let Some(start) = next.filter(|&start| start <= max) {
        ranges.push(start..=max);
    }
    ranges
}
