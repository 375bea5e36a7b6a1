#![allow(dead_code)]

use layout_transmute::{check, Assume, Descriptor, Diagnostic, Error, Primitive, Struct, Field};

pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Every combination of assumption flags.
pub fn all_assumptions() -> impl Iterator<Item = Assume> {
    (0u8..16).map(|bits| Assume {
        alignment: bits & 1 != 0,
        lifetimes: bits & 2 != 0,
        safety: bits & 4 != 0,
        validity: bits & 8 != 0,
    })
}

/// Assert that `src` is transmutable into `dst` under all combinations of assumptions.
pub fn assert_transmutable_all(src: &Descriptor, dst: &Descriptor) {
    init();
    for assume in all_assumptions() {
        if let Err(error) = check(src, dst, assume) {
            panic!("expected transmutable with {:?}: {}", assume, error);
        }
    }
}

/// Assert that `src` is not transmutable into `dst` under any combination of assumptions, and
/// return the diagnostic for the strictest one.
pub fn assert_not_transmutable_any(src: &Descriptor, dst: &Descriptor) -> Diagnostic {
    init();
    for assume in all_assumptions() {
        if let Ok(exercised) = check(src, dst, assume) {
            panic!("expected rejection with {:?}, accepted relying on {:?}", assume, exercised);
        }
    }
    rejection(src, dst, Assume::NOTHING)
}

pub fn rejection(src: &Descriptor, dst: &Descriptor, assume: Assume) -> Diagnostic {
    init();
    match check(src, dst, assume) {
        Err(Error::Rejected(diagnostic)) => diagnostic,
        Err(Error::Malformed(error)) => panic!("malformed descriptor: {}", error),
        Ok(exercised) => panic!("expected rejection, accepted relying on {:?}", exercised),
    }
}

pub fn u8_() -> Descriptor {
    Primitive::u8().into()
}

pub fn u16_() -> Descriptor {
    Primitive::u16().into()
}

pub fn u32_() -> Descriptor {
    Primitive::u32().into()
}

pub fn bool_() -> Descriptor {
    Primitive::bool().into()
}

/// A struct with explicit offsets.
pub fn struct_(size: u64, align: u64, fields: impl IntoIterator<Item = (u64, Descriptor)>) -> Descriptor {
    let fields = fields.into_iter().map(|(offset, ty)| Field::new(offset, ty)).collect();
    Struct { size, align, fields }.into()
}

pub fn zst() -> Descriptor {
    struct_(0, 1, [])
}
