//! Guest emitter error types.

use thiserror::Error;

/// Errors that can occur while assembling a guest module.
#[derive(Debug, Error)]
pub enum GuestError {
    /// Imports must all be declared before the first defined function,
    /// because defined function indices follow the imports.
    #[error("import `{module}.{name}` declared after function indices were assigned")]
    ImportAfterDefinition { module: String, name: String },

    /// A function index does not refer to an import or defined function.
    #[error("unknown function index {0}")]
    UnknownFunction(u32),

    /// A data segment would overlap the allocator heap.
    #[error("data segment at {offset} (+{len} bytes) overlaps the heap at {heap_start}")]
    DataOverlapsHeap { offset: u32, len: u32, heap_start: u32 },

    /// The same export name was used twice.
    #[error("duplicate export: {0}")]
    DuplicateExport(String),

    /// The generated WASM module failed validation.
    #[error("WASM validation failed: {0}")]
    ValidationFailed(String),
}

/// Guest emitter result type alias.
pub type GuestResult<T> = Result<T, GuestError>;
