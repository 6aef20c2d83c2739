//! Fixed names, status words and out-buffer layout.
//!
//! # Out-buffer
//!
//! Calls that return more than one value write into a caller-supplied
//! buffer (`retptr`), little-endian:
//!
//! ```text
//! pair:             retptr+0 : i32 word 0     retptr+4 : i32 word 1
//! optional number:  retptr+0 : i32 present    retptr+8 : f64 value
//! ```

// ── Module and export names ─────────────────────────────────────────────────

/// Import module the intrinsics and host APIs are registered under.
pub const IMPORT_MODULE: &str = "ferry";

/// Guest linear memory.
pub const EXPORT_MEMORY: &str = "memory";
/// `ferry_malloc(size: i32, align: i32) -> i32`
pub const EXPORT_MALLOC: &str = "ferry_malloc";
/// `ferry_realloc(ptr: i32, old_size: i32, new_size: i32, align: i32) -> i32`
pub const EXPORT_REALLOC: &str = "ferry_realloc";
/// `ferry_free(ptr: i32, size: i32, align: i32)`
pub const EXPORT_FREE: &str = "ferry_free";
/// `ferry_start()`, run once when the module enters the running state.
pub const EXPORT_START: &str = "ferry_start";
/// Function table holding closure trampolines and destructors.
pub const EXPORT_TABLE: &str = "__indirect_function_table";

// ── Status words ────────────────────────────────────────────────────────────

/// Trailing status result of a fallible import: success.
pub const STATUS_OK: i32 = 0;
/// Trailing status result of a fallible import: the failure sentinel.
/// The captured error is retrieved with [`INTRINSIC_TAKE_EXCEPTION`].
pub const STATUS_FAILED: i32 = 1;

/// Returned by [`INTRINSIC_TAKE_EXCEPTION`] when no exception is pending.
pub const NO_EXCEPTION: i32 = -1;

/// `boolean_get` result for a value that is not a boolean.
pub const NOT_A_BOOLEAN: i32 = 2;

// ── Out-buffer offsets ──────────────────────────────────────────────────────

pub const OUT_WORD0: u32 = 0;
pub const OUT_WORD1: u32 = 4;
pub const OUT_PRESENT: u32 = 0;
pub const OUT_F64: u32 = 8;
/// Bytes a guest must reserve for any out-buffer.
pub const OUT_BUFFER_SIZE: u32 = 16;

// ── Intrinsic imports ───────────────────────────────────────────────────────

pub const INTRINSIC_STRING_NEW: &str = "string_new";
pub const INTRINSIC_STRING_GET: &str = "string_get";
pub const INTRINSIC_NUMBER_NEW: &str = "number_new";
pub const INTRINSIC_NUMBER_GET: &str = "number_get";
pub const INTRINSIC_BOOLEAN_GET: &str = "boolean_get";
pub const INTRINSIC_BYTES_NEW: &str = "bytes_new";
pub const INTRINSIC_BYTES_GET: &str = "bytes_get";
pub const INTRINSIC_IS_UNDEFINED: &str = "is_undefined";
pub const INTRINSIC_IS_NULL: &str = "is_null";
pub const INTRINSIC_IS_STRING: &str = "is_string";
pub const INTRINSIC_IS_OBJECT: &str = "is_object";
pub const INTRINSIC_IS_FUNCTION: &str = "is_function";
pub const INTRINSIC_CLONE_REF: &str = "object_clone_ref";
pub const INTRINSIC_DROP_REF: &str = "object_drop_ref";
pub const INTRINSIC_DEBUG_STRING: &str = "debug_string";
pub const INTRINSIC_THROW: &str = "throw";
pub const INTRINSIC_RETHROW: &str = "rethrow";
pub const INTRINSIC_TAKE_EXCEPTION: &str = "take_exception";
pub const INTRINSIC_CLOSURE_NEW: &str = "closure_new";
pub const INTRINSIC_CLOSURE_DROP: &str = "closure_drop";
pub const INTRINSIC_LOG: &str = "log";

/// Log levels accepted by the `log` intrinsic.
pub const LOG_ERROR: i32 = 1;
pub const LOG_WARN: i32 = 2;
pub const LOG_INFO: i32 = 3;
pub const LOG_DEBUG: i32 = 4;
pub const LOG_TRACE: i32 = 5;

// ── Memory ──────────────────────────────────────────────────────────────────

/// WebAssembly page size (64 KiB).
pub const PAGE_SIZE: u32 = 65_536;
