mod common;

use layout_transmute::{check, Assume, Descriptor, Enum, Field, Primitive, Tag, Union, Variant};
use proptest::prelude::*;

/// A descriptor with its size and alignment.
#[derive(Debug, Clone)]
struct Generated {
    descriptor: Descriptor,
    size: u64,
    align: u64,
}

fn primitive(primitive: Primitive) -> Generated {
    let (size, align) = (primitive.size, primitive.align);
    Generated { descriptor: primitive.into(), size, align }
}

fn arb_scalar() -> impl Strategy<Value = Generated> {
    prop_oneof![
        Just(primitive(Primitive::u8())),
        Just(primitive(Primitive::bool())),
        Just(primitive(Primitive::u16())),
        Just(primitive(Primitive::nonzero(2))),
        Just(primitive(Primitive::uninit(1))),
        (any::<u8>(), any::<u8>()).prop_map(|(a, b)| {
            let (lo, hi) = (a.min(b) as u128, a.max(b) as u128);
            primitive(Primitive::new(1, 1, vec![lo..=hi]))
        }),
    ]
}

fn round_up(size: u64, align: u64) -> u64 {
    size.div_ceil(align) * align
}

fn arb_layout() -> impl Strategy<Value = Generated> {
    let fields = prop::collection::vec(arb_scalar(), 1..12).prop_map(|fields| {
        let descriptor =
            Descriptor::repr_c(fields.into_iter().map(|field| (field.size, field.align, field.descriptor)))
                .unwrap();
        let Descriptor::Struct(s) = &descriptor else { unreachable!() };
        let (size, align) = (s.size, s.align);
        Generated { descriptor, size, align }
    });
    let array = (arb_scalar(), 0u64..5).prop_map(|(element, count)| Generated {
        descriptor: Descriptor::array(element.descriptor, count),
        size: element.size * count,
        align: element.align,
    });
    let union = prop::collection::vec(arb_scalar(), 1..4).prop_map(|members| {
        let align = members.iter().map(|member| member.align).max().unwrap_or(1);
        let size = round_up(members.iter().map(|member| member.size).max().unwrap_or(0), align);
        let fields = members.into_iter().map(|member| Field::new(0, member.descriptor)).collect();
        Generated { descriptor: Union { size, align, fields }.into(), size, align }
    });
    // payloads first, then a one-byte tag
    let tagged = prop::collection::vec(arb_scalar(), 1..4).prop_map(|payloads| {
        let align = payloads.iter().map(|payload| payload.align).max().unwrap_or(1);
        let offset = payloads.iter().map(|payload| payload.size).max().unwrap_or(0);
        let size = round_up(offset + 1, align);
        let variants = payloads
            .into_iter()
            .enumerate()
            .map(|(tag, payload)| Variant::new(tag as i128, vec![Field::new(0, payload.descriptor)]))
            .collect();
        let descriptor =
            Enum { size, align, tag: Tag { offset, size: 1 }, variants, catch_all: None }.into();
        Generated { descriptor, size, align }
    });
    prop_oneof![arb_scalar(), fields, array, union, tagged]
}

fn arb_assume() -> impl Strategy<Value = Assume> {
    any::<(bool, bool, bool, bool)>().prop_map(|(alignment, lifetimes, safety, validity)| Assume {
        alignment,
        lifetimes,
        safety,
        validity,
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn every_layout_is_transmutable_into_itself(layout in arb_layout()) {
        common::init();
        prop_assert_eq!(check(&layout.descriptor, &layout.descriptor, Assume::NOTHING), Ok(Assume::NOTHING));
    }

    #[test]
    fn every_layout_fits_uninitialized_bytes_of_its_size(layout in arb_layout()) {
        let bytes: Descriptor = Primitive::uninit(layout.size).into();
        prop_assert!(check(&layout.descriptor, &bytes, Assume::NOTHING).is_ok());
    }

    #[test]
    fn assuming_more_is_monotone(
        src in arb_layout(),
        dst in arb_layout(),
        weaker in arb_assume(),
        extra in arb_assume(),
    ) {
        if let Ok(exercised) = check(&src.descriptor, &dst.descriptor, weaker) {
            prop_assert!(weaker.contains(exercised));
            let stronger = weaker | extra;
            prop_assert!(check(&src.descriptor, &dst.descriptor, stronger).is_ok());
        }
    }
}
