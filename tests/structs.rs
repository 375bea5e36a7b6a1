mod common;
use common::*;

use layout_transmute::{check, Assume, BuildError, Descriptor, Error, Primitive};

#[test]
fn zero_sized() {
    assert_transmutable_all(&zst(), &zst());
    // truncation
    assert_transmutable_all(&u8_(), &zst());
    assert_not_transmutable_any(&zst(), &u8_());
}

#[test]
fn extension_into_padding() {
    // #[repr(C, align(8))] struct U8ThenPadding(u8);
    let u8_then_padding = struct_(8, 8, [(0, u8_())]);

    assert_transmutable_all(&u8_(), &u8_then_padding);
    assert_transmutable_all(&u8_then_padding, &u8_());
    assert_not_transmutable_any(&u8_then_padding, &u16_());
}

#[test]
fn same_size() {
    // #[repr(C)] struct Padded(u16, u8);
    let padded = struct_(4, 2, [(0, u16_()), (2, u8_())]);
    // #[repr(C)] struct Unpadded(u16, u16);
    let unpadded = struct_(4, 2, [(0, u16_()), (2, u16_())]);

    assert_transmutable_all(&unpadded, &padded);
    let diagnostic = assert_not_transmutable_any(&padded, &unpadded);
    assert_eq!(diagnostic.offset, 3);
}

#[test]
fn field_order_is_by_offset() {
    let declared = struct_(2, 1, [(0, bool_()), (1, u8_())]);
    let shuffled = struct_(2, 1, [(1, u8_()), (0, bool_())]);
    let swapped = struct_(2, 1, [(0, u8_()), (1, bool_())]);

    assert_transmutable_all(&declared, &shuffled);
    assert_transmutable_all(&shuffled, &declared);
    // a u8 lands on the bool
    let diagnostic = rejection(&declared, &swapped, Assume::NOTHING);
    assert_eq!(diagnostic.offset, 1);
}

#[test]
fn struct_and_its_bytes() {
    let pair = struct_(8, 4, [(0, u32_()), (4, u32_())]);
    let bytes = Descriptor::array(u8_(), 8);
    assert_transmutable_all(&pair, &bytes);
    assert_transmutable_all(&bytes, &pair);
}

#[test]
fn repr_c_places_fields() {
    let repr_c = Descriptor::repr_c([(1, 1, u8_()), (4, 4, u32_()), (2, 2, u16_())]);
    let explicit = struct_(12, 4, [(0, u8_()), (4, u32_()), (8, u16_())]);
    assert_eq!(repr_c, Ok(explicit));

    let bytes = |n| (n, 1, Descriptor::array(u8_(), n));
    assert_eq!(Descriptor::repr_c([bytes(u64::MAX - 1), (2, 2, u16_())]), Err(BuildError::TooLarge));
    // rounding the total up to the alignment overflows too
    assert_eq!(Descriptor::repr_c([(2, 2, u16_()), bytes(u64::MAX - 2)]), Err(BuildError::TooLarge));
}

#[test]
fn large_structs_of_distinct_fields() {
    // 4 KiB alternating between bool and u8
    let fields = (0..4096).map(|offset| (offset, if offset % 2 == 0 { bool_() } else { u8_() }));
    let layout = struct_(4096, 1, fields);
    assert_transmutable_all(&layout, &layout);

    let bytes = Descriptor::array(u8_(), 4096);
    assert_transmutable_all(&layout, &bytes);
    assert_eq!(rejection(&bytes, &layout, Assume::NOTHING).offset, 0);

    let bools = struct_(300, 1, (0..300).map(|offset| (offset, bool_())));
    assert_transmutable_all(&bools, &bools);
}

#[test]
fn nested_structs_flatten() {
    let inner = struct_(2, 1, [(0, bool_()), (1, bool_())]);
    let outer = struct_(4, 1, [(0, inner.clone()), (2, inner)]);
    let flat = struct_(4, 1, [(0, bool_()), (1, bool_()), (2, bool_()), (3, bool_())]);
    assert_transmutable_all(&outer, &flat);
    assert_transmutable_all(&flat, &outer);
}

fn malformed(descriptor: &Descriptor) -> BuildError {
    match check(descriptor, descriptor, Assume::NOTHING) {
        Err(Error::Malformed(error)) => error,
        other => panic!("expected a build error, got {:?}", other),
    }
}

#[test]
fn malformed_structs() {
    assert_eq!(
        malformed(&struct_(4, 2, [(0, u16_()), (1, u16_())])),
        BuildError::OverlappingFields { offset: 1, previous_end: 2 }
    );
    assert_eq!(
        malformed(&struct_(2, 2, [(0, u16_()), (2, u8_())])),
        BuildError::FieldOutOfBounds { offset: 2, end: 3, size: 2 }
    );
    assert_eq!(
        malformed(&struct_(4, 2, [(1, u16_())])),
        BuildError::MisalignedField { offset: 1, align: 2 }
    );
    assert_eq!(malformed(&struct_(4, 3, [])), BuildError::InvalidAlignment(3));
    assert!(matches!(
        malformed(&Primitive::new(1, 1, vec![0..=256]).into()),
        BuildError::InvalidScalar { .. }
    ));
}
