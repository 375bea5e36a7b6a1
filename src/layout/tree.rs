use std::ops::RangeInclusive;

use super::{Byte, ByteSet, Count, Invariant, Reference};
use crate::config::Endian;

/// A layout as a tree of sequences and alternatives, before it is lowered into an automaton.
#[derive(Clone, Debug)]
pub(crate) enum Tree {
    Seq(Vec<Self>),
    Alt(Vec<Self>),
    Def(Invariant),
    Ref(Reference),
    Byte(Byte),
    /// The body, repeated; the body is never zero-sized.
    Repeat(Box<Self>, Count),
}

impl Tree {
    pub(crate) fn def(invariant: Invariant) -> Self {
        Self::Def(invariant)
    }

    /// A `Tree` representing an uninhabited type.
    pub(crate) fn uninhabited() -> Self {
        Self::Alt(vec![])
    }

    /// A `Tree` representing a zero-sized type.
    pub(crate) fn unit() -> Self {
        Self::Seq(Vec::new())
    }

    /// A `Tree` containing a single, uninitialized byte.
    pub(crate) fn uninit() -> Self {
        Self::Byte(Byte::Uninit)
    }

    /// A `Tree` representing the layout of `bool`.
    #[cfg(test)]
    pub(crate) fn bool() -> Self {
        Self::from_bits(0x00).or(Self::from_bits(0x01))
    }

    pub(crate) fn u8() -> Self {
        Self::Byte(Byte::ANY)
    }

    #[cfg(test)]
    pub(crate) fn from_bits(bits: u8) -> Self {
        Self::Byte(Byte::Init(ByteSet::singleton(bits)))
    }

    pub(crate) fn number(width_in_bytes: u64) -> Self {
        Self::repeat(Self::u8(), Count::Exact(width_in_bytes))
    }

    pub(crate) fn padding(width_in_bytes: u64) -> Self {
        Self::repeat(Self::uninit(), Count::Exact(width_in_bytes))
    }

    pub(crate) fn repeat(body: Self, count: Count) -> Self {
        match (body.size(), count) {
            (_, Count::Exact(0)) => Self::unit(),
            (Some(0), _) => {
                if body.is_inhabited() || Count::min(&count) == 0 {
                    Self::unit()
                } else {
                    Self::uninhabited()
                }
            }
            (_, Count::Exact(1)) => body,
            _ => Self::Repeat(Box::new(body), count),
        }
    }

    /// The `width`-byte encodings of every integer in `ranges`.
    ///
    /// Each range splits into at most `2 * width` products of per-byte sets, computed most
    /// significant byte first and then laid out in `endian` order.
    pub(crate) fn from_ranges(width: usize, ranges: &[RangeInclusive<u128>], endian: Endian) -> Self {
        fn digits(value: u128, width: usize) -> Vec<u8> {
            value.to_be_bytes()[16 - width..].to_vec()
        }

        fn split(
            prefix: &mut Vec<ByteSet>,
            lo: &[u8],
            hi: &[u8],
            products: &mut Vec<Vec<ByteSet>>,
        ) {
            let (Some((&l, lo_rest)), Some((&h, hi_rest))) = (lo.split_first(), hi.split_first())
            else {
                products.push(prefix.clone());
                return;
            };

            if l == h {
                prefix.push(ByteSet::singleton(l));
                split(prefix, lo_rest, hi_rest, products);
                prefix.pop();
                return;
            }

            let lo_is_floor = lo_rest.iter().all(|&b| b == 0x00);
            let hi_is_ceiling = hi_rest.iter().all(|&b| b == 0xff);
            let (mut first, mut last) = (l, h);

            if !lo_is_floor {
                prefix.push(ByteSet::singleton(l));
                split(prefix, lo_rest, &vec![0xff; lo_rest.len()], products);
                prefix.pop();
                first = l + 1;
            }
            if !hi_is_ceiling {
                last = h - 1;
            }
            if first <= last {
                let mut product = prefix.clone();
                product.push(ByteSet::range(first, last));
                product.extend(std::iter::repeat(ByteSet::FULL).take(lo_rest.len()));
                products.push(product);
            }
            if !hi_is_ceiling {
                prefix.push(ByteSet::singleton(h));
                split(prefix, &vec![0x00; hi_rest.len()], hi_rest, products);
                prefix.pop();
            }
        }

        let mut products = Vec::new();
        for range in ranges {
            let (lo, hi) = (digits(*range.start(), width), digits(*range.end(), width));
            split(&mut Vec::with_capacity(width), &lo, &hi, &mut products);
        }

        products
            .into_iter()
            .map(|mut product| {
                if endian == Endian::Little {
                    product.reverse();
                }
                Self::from_byte_sets(&product)
            })
            .fold(Self::uninhabited(), Self::or)
            .simplify_alt()
    }

    /// A sequence of byte sets, with runs of equal sets collapsed into repeats.
    fn from_byte_sets(sets: &[ByteSet]) -> Self {
        let mut seq = Vec::new();
        let mut rest = sets;
        while let Some(&set) = rest.first() {
            let run = rest.iter().take_while(|&&other| other == set).count();
            seq.push(Self::repeat(Self::Byte(Byte::Init(set)), Count::Exact(run as u64)));
            rest = &rest[run..];
        }
        match seq.len() {
            1 => seq.pop().unwrap_or_else(Self::unit),
            _ => Self::Seq(seq),
        }
    }

    fn simplify_alt(self) -> Self {
        match self {
            Self::Alt(mut alts) if alts.len() == 1 => alts.pop().unwrap_or_else(Self::uninhabited),
            other => other,
        }
    }

    /// The number of bytes every value occupies, or `None` for a dynamically-sized tail.
    pub(crate) fn size(&self) -> Option<u64> {
        match self {
            Self::Byte(..) => Some(1),
            Self::Ref(reference) => Some(reference.size),
            Self::Def(..) => Some(0),
            Self::Seq(elts) => {
                elts.iter().try_fold(0u64, |size, elt| Some(size.saturating_add(elt.size()?)))
            }
            Self::Alt(alts) => {
                alts.iter().try_fold(0u64, |size, alt| Some(size.max(alt.size()?)))
            }
            Self::Repeat(body, Count::Exact(n)) => Some(body.size()?.saturating_mul(*n)),
            Self::Repeat(_, Count::AtLeast(..)) => None,
        }
    }

    pub(crate) fn is_inhabited(&self) -> bool {
        match self {
            Self::Seq(elts) => elts.iter().all(|elt| elt.is_inhabited()),
            Self::Alt(alts) => alts.iter().any(|alt| alt.is_inhabited()),
            Self::Repeat(body, count) => Count::min(&count) == 0 || body.is_inhabited(),
            Self::Byte(..) | Self::Ref(..) | Self::Def(..) => true,
        }
    }

    /// Does any value pass through a region with library safety invariants?
    pub(crate) fn has_invariants(&self) -> bool {
        match self {
            Self::Seq(elts) | Self::Alt(elts) => elts.iter().any(Self::has_invariants),
            Self::Repeat(body, _) => body.has_invariants(),
            Self::Def(..) => true,
            Self::Byte(..) | Self::Ref(..) => false,
        }
    }

    /// Is every byte of every value padding?
    pub(crate) fn is_padding(&self) -> bool {
        match self {
            Self::Byte(Byte::Uninit) => true,
            Self::Seq(elts) => elts.iter().all(Self::is_padding),
            Self::Alt(alts) => !alts.is_empty() && alts.iter().all(Self::is_padding),
            Self::Repeat(body, _) => body.is_padding(),
            Self::Byte(Byte::Init(..)) | Self::Ref(..) | Self::Def(..) => false,
        }
    }
}

impl Tree {
    pub(crate) fn then(self, other: Self) -> Self {
        match (self, other) {
            (Self::Seq(mut lhs), Self::Seq(mut rhs)) => {
                lhs.append(&mut rhs);
                Self::Seq(lhs)
            }
            (Self::Seq(mut lhs), rhs) => {
                lhs.push(rhs);
                Self::Seq(lhs)
            }
            (lhs, Self::Seq(mut rhs)) => {
                rhs.insert(0, lhs);
                Self::Seq(rhs)
            }
            (lhs, rhs) => Self::Seq(vec![lhs, rhs]),
        }
    }

    pub(crate) fn or(self, other: Self) -> Self {
        match (self, other) {
            (Self::Alt(mut lhs), Self::Alt(rhs)) => {
                lhs.extend(rhs);
                Self::Alt(lhs)
            }
            (Self::Alt(mut alts), alt) | (alt, Self::Alt(mut alts)) => {
                alts.push(alt);
                Self::Alt(alts)
            }
            (lhs, rhs) => Self::Alt(vec![lhs, rhs]),
        }
    }
}
