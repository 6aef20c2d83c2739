//! Shared guest/host ABI for Ferry.
//!
//! Both sides of the boundary agree on the items in this crate:
//!
//! - [`Handle`]: the opaque integer a guest holds for a host object, with the
//!   four reserved sentinel slots.
//! - [`layout`]: out-buffer offsets, status words, export and intrinsic names.
//! - [`Signature`]: an import's parameter/return encoding and its lowering to
//!   a WebAssembly function type.
//! - [`intrinsics`]: the signatures of the built-in imports.

mod handle;
pub mod intrinsics;
pub mod layout;
mod signature;

pub use handle::{Handle, RESERVED_HANDLES};
pub use intrinsics::{intrinsic_signature, intrinsic_signatures};
pub use signature::{AbiParam, AbiReturn, DispatchKind, LoweredType, Signature, WasmType};
