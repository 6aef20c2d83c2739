//! Memory layout and global indices of emitted guests.
//!
//! ```text
//! 0          .. SCRATCH_END  : fixture scratch words (counters, out-buffers)
//! SCRATCH_END.. HEAP_START   : static data segments
//! HEAP_START ..              : bump-allocated heap (grows the memory on demand)
//! ```

/// Heap allocation pointer, the next free byte in linear memory.
pub const GLOBAL_HEAP_PTR: u32 = 0;

/// Initial linear memory size in pages (64 KiB each).
pub const INITIAL_MEMORY_PAGES: u64 = 1;
/// Maximum linear memory pages (16 MiB).
pub const MAX_MEMORY_PAGES: u64 = 256;

/// End of the scratch area reserved for fixture bookkeeping.
pub const SCRATCH_END: u32 = 256;
/// First byte handed out by `ferry_malloc`. Everything below is static data.
pub const HEAP_START: u32 = 4096;

/// Custom section name carrying the emitter version.
pub const CUSTOM_SECTION_NAME: &str = "ferry";
/// Emitter version embedded in the custom section.
pub const EMITTER_VERSION: &str = env!("CARGO_PKG_VERSION");
