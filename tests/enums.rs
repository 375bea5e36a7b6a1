mod common;
use common::*;

use layout_transmute::{
    check, Assume, BuildError, Constraint, Descriptor, Enum, Error, Field, Primitive, Reason, Tag,
    Variant,
};

fn fieldless(size: u64, tags: impl IntoIterator<Item = i128>) -> Descriptor {
    Enum::fieldless(size, tags).into()
}

#[test]
fn between_differently_signed_reprs() {
    // #[repr(i8)] enum I8 { V = -2 }
    let i8_ = fieldless(1, [-2]);
    // #[repr(u8)] enum U8 { V = 254 }
    let u8_ = fieldless(1, [254]);

    assert_transmutable_all(&i8_, &u8_);
    assert_transmutable_all(&u8_, &i8_);
}

#[test]
fn truncation() {
    // #[repr(i16)] enum I16 { V = 42 }, little endian
    let i16_ = fieldless(2, [42]);
    let u8_ = fieldless(1, [42]);

    assert_transmutable_all(&i16_, &u8_);
    assert_not_transmutable_any(&u8_, &i16_);
}

#[test]
fn set_expansion() {
    let src = fieldless(1, [2, 8, 32]);
    let dst = fieldless(1, [2, 4, 8, 16, 32]);

    assert_transmutable_all(&src, &dst);
    let diagnostic = rejection(&dst, &src, Assume::NOTHING);
    assert_eq!(diagnostic.offset, 0);

    // some of the destination's tags are always possible
    assert!(check(&dst, &src, Assume { validity: true, ..Assume::NOTHING }).is_ok());
}

#[test]
fn two_variants_into_three() {
    let two = fieldless(1, [0, 1]);
    let three = fieldless(1, [0, 1, 2]);
    assert_transmutable_all(&two, &three);
    assert_transmutable_all(&two, &bool_());
    assert_transmutable_all(&bool_(), &two);
    assert!(check(&three, &two, Assume::NOTHING).is_err());
}

fn option_u16() -> Descriptor {
    // enum { None = 0, Some(u16) = 1 } with a one-byte tag and the payload at offset 2
    Enum {
        size: 4,
        align: 2,
        tag: Tag { offset: 0, size: 1 },
        variants: vec![Variant::unit(0), Variant::new(1, vec![Field::new(2, u16_())])],
        catch_all: None,
    }
    .into()
}

#[test]
fn variants_with_fields() {
    let some = struct_(4, 2, [(0, Primitive::new(1, 1, vec![1..=1]).into()), (2, u16_())]);
    let none = struct_(4, 2, [(0, Primitive::new(1, 1, vec![0..=0]).into())]);

    assert_transmutable_all(&some, &option_u16());
    assert_transmutable_all(&none, &option_u16());

    let diagnostic = rejection(&option_u16(), &some, Assume::NOTHING);
    assert_eq!(diagnostic.offset, 0);
    // assuming validity admits the `None` tag, but not its uninitialized payload
    let diagnostic = rejection(&option_u16(), &some, Assume { validity: true, ..Assume::NOTHING });
    assert_eq!(diagnostic.offset, 2);
    assert!(matches!(diagnostic.reason, Reason::BitValidityMismatch { found: Constraint::Uninit, .. }));

    // the `None` variant leaves the payload uninitialized
    let as_bytes = Descriptor::array(u8_(), 4);
    let diagnostic = assert_not_transmutable_any(&option_u16(), &as_bytes);
    assert_eq!(diagnostic.offset, 1);
}

#[test]
fn tag_after_payload() {
    let tagged = Enum {
        size: 2,
        align: 1,
        tag: Tag { offset: 1, size: 1 },
        variants: vec![Variant::new(7, vec![Field::new(0, bool_())])],
        catch_all: None,
    };
    let layout = struct_(2, 1, [(0, bool_()), (1, Primitive::new(1, 1, vec![7..=7]).into())]);
    assert_transmutable_all(&tagged.into(), &layout);
}

#[test]
fn tag_decides_after_a_shared_payload() {
    // enum { A(u8) = 0, B(u8) = 1 } with the tag after the payload
    let tagged: Descriptor = Enum {
        size: 2,
        align: 1,
        tag: Tag { offset: 1, size: 1 },
        variants: vec![
            Variant::new(0, vec![Field::new(0, u8_())]),
            Variant::new(1, vec![Field::new(0, u8_())]),
        ],
        catch_all: None,
    }
    .into();
    let layout = struct_(2, 1, [(0, u8_()), (1, bool_())]);
    assert_transmutable_all(&layout, &tagged);
    assert_transmutable_all(&tagged, &layout);

    let untagged = struct_(2, 1, [(0, u8_()), (1, u8_())]);
    let diagnostic = rejection(&untagged, &tagged, Assume::NOTHING);
    assert_eq!(diagnostic.offset, 1);
}

#[test]
fn catch_all_takes_undeclared_tags() {
    let open: Descriptor = Enum {
        size: 1,
        align: 1,
        tag: Tag { offset: 0, size: 1 },
        variants: vec![Variant::unit(0)],
        catch_all: Some(Vec::new()),
    }
    .into();
    assert_transmutable_all(&u8_(), &open);
    assert_transmutable_all(&open, &u8_());
}

#[test]
fn malformed_enums() {
    let malformed = |descriptor: Descriptor| match check(&descriptor, &descriptor, Assume::NOTHING) {
        Err(Error::Malformed(error)) => error,
        other => panic!("expected a build error, got {:?}", other),
    };

    assert_eq!(malformed(fieldless(1, [3, 3])), BuildError::DuplicateTag { tag: 3 });
    // -1 and 255 are the same byte
    assert_eq!(malformed(fieldless(1, [-1, 255])), BuildError::DuplicateTag { tag: 255 });
    assert_eq!(malformed(fieldless(1, [256])), BuildError::TagOutOfRange { tag: 256, size: 1 });

    let overflowing = Enum {
        size: 2,
        align: 1,
        tag: Tag { offset: 0, size: 1 },
        variants: vec![Variant::new(0, vec![Field::new(1, u16_())])],
        catch_all: None,
    };
    assert!(matches!(
        malformed(overflowing.into()),
        BuildError::MisalignedField { .. } | BuildError::VariantOutOfBounds { .. }
    ));

    let payload_past_end = Enum {
        size: 2,
        align: 1,
        tag: Tag { offset: 0, size: 1 },
        variants: vec![Variant::new(0, vec![Field::new(1, Descriptor::array(u8_(), 2))])],
        catch_all: None,
    };
    assert_eq!(
        malformed(payload_past_end.into()),
        BuildError::VariantOutOfBounds { tag: 0, end: 3, size: 2 }
    );
}
