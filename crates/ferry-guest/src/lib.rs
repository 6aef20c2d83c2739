//! Ferry guest module emitter: assembles ABI-conforming `.wasm` modules.
//!
//! # Architecture
//!
//! [`GuestBuilder`] collects imports, defined functions, table slots,
//! exports and data, then assembles a module with `wasm-encoder` and
//! validates it with `wasmparser`. Every emitted module follows the Ferry
//! guest contract:
//!
//! ## Exports
//! - `memory`: linear memory
//! - `ferry_malloc(size, align) -> ptr`
//! - `ferry_realloc(ptr, old_size, new_size, align) -> ptr`
//! - `ferry_free(ptr, size, align)`
//! - `__indirect_function_table`: closure trampolines and destructors
//! - (optional) `ferry_start()`
//!
//! ## Memory
//!
//! See [`types`] for the scratch / data / heap layout.
//!
//! [`fixtures`] holds the canned guests the bridge test-suites run.

pub mod builder;
pub mod error;
pub mod fixtures;
pub mod runtime;
pub mod types;

pub use builder::GuestBuilder;
pub use error::{GuestError, GuestResult};
pub use runtime::RuntimeFuncs;
