mod common;
use common::*;

use layout_transmute::{
    check, Assume, BuildError, Constraint, Descriptor, Error, Field, Lifetime, Mutability, Pointer,
    Primitive, Reason, Union,
};

fn union_(size: u64, align: u64, fields: impl IntoIterator<Item = (u64, Descriptor)>) -> Descriptor {
    let fields = fields.into_iter().map(|(offset, ty)| Field::new(offset, ty)).collect();
    Union { size, align, fields }.into()
}

#[test]
fn every_member_must_fit() {
    // union { a: bool, b: u8 }
    let src = union_(1, 1, [(0, bool_()), (0, u8_())]);
    assert_transmutable_all(&src, &u8_());
    assert!(check(&src, &bool_(), Assume::NOTHING).is_err());
}

#[test]
fn any_member_may_accept() {
    let zero: Descriptor = Primitive::new(1, 1, vec![0..=0]).into();
    let one: Descriptor = Primitive::new(1, 1, vec![1..=1]).into();
    let dst = union_(1, 1, [(0, zero), (0, one)]);
    assert_transmutable_all(&bool_(), &dst);
    assert_transmutable_all(&dst, &bool_());
}

#[test]
fn shorter_members_are_padded() {
    // union { a: u8, b: u16 }: the high byte may be uninitialized
    let mixed = union_(2, 2, [(0, u8_()), (0, u16_())]);
    assert_transmutable_all(&u16_(), &mixed);
    assert_transmutable_all(&mixed, &u8_());
    // no assumption makes the `u8` member's padding initialized
    let diagnostic = assert_not_transmutable_any(&mixed, &u16_());
    assert_eq!(diagnostic.offset, 1);
    assert!(matches!(diagnostic.reason, Reason::BitValidityMismatch { found: Constraint::Uninit, .. }));
}

#[test]
fn members_sharing_a_prefix() {
    let byte = |value: u128| -> Descriptor { Primitive::new(1, 1, vec![value..=value]).into() };
    // union { a: (0, 0), b: (0, 1) }
    let pair = |second| struct_(2, 1, [(0, byte(0)), (1, byte(second))]);
    let dst = union_(2, 1, [(0, pair(0)), (0, pair(1))]);
    let src = struct_(2, 1, [(0, byte(0)), (1, bool_())]);
    assert_transmutable_all(&src, &dst);
    assert_transmutable_all(&dst, &src);

    let wider = struct_(2, 1, [(0, byte(0)), (1, u8_())]);
    let diagnostic = rejection(&wider, &dst, Assume::NOTHING);
    assert_eq!(diagnostic.offset, 1);
}

#[test]
fn members_at_offsets() {
    // union { a: (u8 @ 0), b: (bool @ 1) }
    let src = union_(2, 1, [(0, u8_()), (1, bool_())]);
    let padding: Descriptor = Primitive::uninit(2).into();
    assert_transmutable_all(&src, &padding);
    assert!(check(&src, &Descriptor::array(u8_(), 2), Assume::NOTHING).is_err());
}

#[test]
fn nullable_reference_is_zero_or_a_reference() {
    let reference = Pointer {
        pointee: Box::new(u8_()),
        align: 1,
        mutability: Mutability::Shared,
        lifetime: Lifetime::STATIC,
    };
    let nullable = Descriptor::nullable(reference.clone(), 8);
    let plain = Descriptor::Reference(reference);

    assert_transmutable_all(&plain, &nullable);
    assert!(check(&nullable, &plain, Assume::NOTHING).is_err());
    assert!(check(&Primitive::u64().into(), &nullable, Assume::NOTHING).is_err());
}

#[test]
fn empty_union_is_malformed() {
    let empty = union_(4, 4, []);
    assert_eq!(
        check(&empty, &u32_(), Assume::NOTHING),
        Err(Error::Malformed(BuildError::EmptyUnion))
    );
}

#[test]
fn unsized_member_is_malformed() {
    let tail = Descriptor::tail(u8_(), 0);
    let union = union_(4, 1, [(0, tail)]);
    assert_eq!(
        check(&union, &u32_(), Assume::NOTHING),
        Err(Error::Malformed(BuildError::UnsizedMember { offset: 0 }))
    );
}
