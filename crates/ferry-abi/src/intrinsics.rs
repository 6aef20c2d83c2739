//! Signatures of the built-in imports every host registers.

use crate::layout::*;
use crate::signature::{AbiParam, AbiReturn, Signature};

/// `(name, signature)` of every intrinsic, registered under
/// [`IMPORT_MODULE`].
pub fn intrinsic_signatures() -> Vec<(&'static str, Signature)> {
    use AbiParam::{Bytes, Handle, OwnedHandle, Str, F64, I32};

    let predicate = || Signature::logged([Handle], AbiReturn::I32);
    vec![
        (INTRINSIC_STRING_NEW, Signature::logged([Str], AbiReturn::Handle)),
        (INTRINSIC_STRING_GET, Signature::logged([Handle], AbiReturn::Str)),
        (INTRINSIC_NUMBER_NEW, Signature::logged([F64], AbiReturn::Handle)),
        (INTRINSIC_NUMBER_GET, Signature::logged([Handle], AbiReturn::OptionalF64)),
        (INTRINSIC_BOOLEAN_GET, predicate()),
        (INTRINSIC_BYTES_NEW, Signature::logged([Bytes], AbiReturn::Handle)),
        (INTRINSIC_BYTES_GET, Signature::logged([Handle], AbiReturn::Bytes)),
        (INTRINSIC_IS_UNDEFINED, predicate()),
        (INTRINSIC_IS_NULL, predicate()),
        (INTRINSIC_IS_STRING, predicate()),
        (INTRINSIC_IS_OBJECT, predicate()),
        (INTRINSIC_IS_FUNCTION, predicate()),
        (INTRINSIC_CLONE_REF, Signature::logged([Handle], AbiReturn::Handle)),
        (INTRINSIC_DROP_REF, Signature::logged([OwnedHandle], AbiReturn::Unit)),
        (INTRINSIC_DEBUG_STRING, Signature::logged([Handle], AbiReturn::Str)),
        (INTRINSIC_THROW, Signature::logged([Str], AbiReturn::Unit)),
        (INTRINSIC_RETHROW, Signature::logged([OwnedHandle], AbiReturn::Unit)),
        (INTRINSIC_TAKE_EXCEPTION, Signature::logged([], AbiReturn::I32)),
        (
            INTRINSIC_CLOSURE_NEW,
            Signature::logged([I32, I32, I32, I32], AbiReturn::Handle),
        ),
        (INTRINSIC_CLOSURE_DROP, Signature::logged([OwnedHandle], AbiReturn::I32)),
        (INTRINSIC_LOG, Signature::logged([I32, Str], AbiReturn::Unit)),
    ]
}

/// Signature of one intrinsic by name.
pub fn intrinsic_signature(name: &str) -> Option<Signature> {
    intrinsic_signatures()
        .into_iter()
        .find(|(n, _)| *n == name)
        .map(|(_, sig)| sig)
}
