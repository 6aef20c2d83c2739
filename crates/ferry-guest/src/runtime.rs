//! Allocator functions emitted into every guest.
//!
//! The host reaches guest memory only through these exports, so the bridge
//! can pass strings and buffers without knowing the guest's allocator. The
//! allocator is a bump allocator: `free` and `realloc` can only reclaim or
//! resize the most recent block in place; anything else is copied.

use wasm_encoder::{BlockType, Function, Instruction, ValType};

use crate::types::GLOBAL_HEAP_PTR;

// ══════════════════════════════════════════════════════════════════════════════
// Runtime function index offsets (relative to the import count)
// ══════════════════════════════════════════════════════════════════════════════

/// Grow memory so that byte `end` is addressable.
///
/// `ensure_capacity(end: i32)`
pub const RT_ENSURE_CAPACITY: u32 = 0;

/// `ferry_malloc(size: i32, align: i32) -> i32`
pub const RT_MALLOC: u32 = 1;

/// `ferry_realloc(ptr: i32, old_size: i32, new_size: i32, align: i32) -> i32`
pub const RT_REALLOC: u32 = 2;

/// `ferry_free(ptr: i32, size: i32, align: i32)`
pub const RT_FREE: u32 = 3;

/// Total number of runtime helper functions.
pub const RT_FUNC_COUNT: u32 = 4;

/// Absolute indices of the runtime helpers in one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeFuncs {
    pub ensure_capacity: u32,
    pub malloc: u32,
    pub realloc: u32,
    pub free: u32,
}

impl RuntimeFuncs {
    pub(crate) fn at(import_count: u32) -> Self {
        Self {
            ensure_capacity: import_count + RT_ENSURE_CAPACITY,
            malloc: import_count + RT_MALLOC,
            realloc: import_count + RT_REALLOC,
            free: import_count + RT_FREE,
        }
    }
}

/// `(params, results)` of each runtime helper, in index order.
pub(crate) fn runtime_types() -> [(Vec<ValType>, Vec<ValType>); RT_FUNC_COUNT as usize] {
    [
        (vec![ValType::I32], vec![]),
        (vec![ValType::I32, ValType::I32], vec![ValType::I32]),
        (vec![ValType::I32; 4], vec![ValType::I32]),
        (vec![ValType::I32; 3], vec![]),
    ]
}

// ══════════════════════════════════════════════════════════════════════════════
// Emit helpers
// ══════════════════════════════════════════════════════════════════════════════

/// Emit `ensure_capacity(end: i32)`.
///
/// ```text
/// if end > memory.size * 65536 {
///     if memory.grow(ceil((end - memory.size * 65536) / 65536)) == -1 { unreachable }
/// }
/// ```
pub fn emit_ensure_capacity() -> Function {
    let mut f = Function::new(vec![]);
    f.instruction(&Instruction::LocalGet(0));
    emit_memory_bytes(&mut f);
    f.instruction(&Instruction::I32GtU);
    f.instruction(&Instruction::If(BlockType::Empty));

    // pages = (end - bytes + 65535) >> 16
    f.instruction(&Instruction::LocalGet(0));
    emit_memory_bytes(&mut f);
    f.instruction(&Instruction::I32Sub);
    f.instruction(&Instruction::I32Const(65_535));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::I32Const(16));
    f.instruction(&Instruction::I32ShrU);
    f.instruction(&Instruction::MemoryGrow(0));
    f.instruction(&Instruction::I32Const(-1));
    f.instruction(&Instruction::I32Eq);
    f.instruction(&Instruction::If(BlockType::Empty));
    f.instruction(&Instruction::Unreachable);
    f.instruction(&Instruction::End);

    f.instruction(&Instruction::End);
    f.instruction(&Instruction::End);
    f
}

/// Emit `ferry_malloc(size: i32, align: i32) -> i32`.
///
/// Rounds the heap pointer up to `align` (0 is treated as 1), reserves
/// `size` bytes and grows memory when the block does not fit.
pub fn emit_malloc(rt: RuntimeFuncs) -> Function {
    let mut f = Function::new(vec![(1, ValType::I32)]); // local 2: ptr

    // if align == 0 { align = 1 }
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::I32Eqz);
    f.instruction(&Instruction::If(BlockType::Empty));
    f.instruction(&Instruction::I32Const(1));
    f.instruction(&Instruction::LocalSet(1));
    f.instruction(&Instruction::End);

    // ptr = (heap_ptr + align - 1) & -align
    f.instruction(&Instruction::GlobalGet(GLOBAL_HEAP_PTR));
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::I32Const(1));
    f.instruction(&Instruction::I32Sub);
    f.instruction(&Instruction::I32Const(0));
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::I32Sub);
    f.instruction(&Instruction::I32And);
    f.instruction(&Instruction::LocalSet(2));

    // ensure_capacity(ptr + size)
    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::Call(rt.ensure_capacity));

    // heap_ptr = ptr + size
    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::GlobalSet(GLOBAL_HEAP_PTR));

    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::End);
    f
}

/// Emit `ferry_realloc(ptr, old_size, new_size, align) -> i32`.
///
/// The most recent block is resized in place (growing or shrinking the heap
/// pointer). Any other block is copied into a fresh allocation of
/// `new_size` bytes; `min(old_size, new_size)` bytes are preserved.
pub fn emit_realloc(rt: RuntimeFuncs) -> Function {
    let mut f = Function::new(vec![]);

    // if ptr + old_size == heap_ptr
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::GlobalGet(GLOBAL_HEAP_PTR));
    f.instruction(&Instruction::I32Eq);
    f.instruction(&Instruction::If(BlockType::Result(ValType::I32)));

    // in place: ensure_capacity(ptr + new_size); heap_ptr = ptr + new_size
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::Call(rt.ensure_capacity));
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::GlobalSet(GLOBAL_HEAP_PTR));
    f.instruction(&Instruction::LocalGet(0));

    f.instruction(&Instruction::Else);

    // copy: new = malloc(new_size, align); memory.copy(new, ptr, min(old, new))
    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::LocalGet(3));
    f.instruction(&Instruction::Call(rt.malloc));
    f.instruction(&Instruction::LocalTee(3)); // align is no longer needed
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::I32LtU);
    f.instruction(&Instruction::Select);
    f.instruction(&Instruction::MemoryCopy {
        src_mem: 0,
        dst_mem: 0,
    });
    f.instruction(&Instruction::LocalGet(3));

    f.instruction(&Instruction::End);
    f.instruction(&Instruction::End);
    f
}

/// Emit `ferry_free(ptr, size, align)`.
///
/// Only the most recent block is reclaimed.
pub fn emit_free() -> Function {
    let mut f = Function::new(vec![]);
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::GlobalGet(GLOBAL_HEAP_PTR));
    f.instruction(&Instruction::I32Eq);
    f.instruction(&Instruction::If(BlockType::Empty));
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::GlobalSet(GLOBAL_HEAP_PTR));
    f.instruction(&Instruction::End);
    f.instruction(&Instruction::End);
    f
}

/// Push `memory.size * 65536`.
fn emit_memory_bytes(f: &mut Function) {
    f.instruction(&Instruction::MemorySize(0));
    f.instruction(&Instruction::I32Const(16));
    f.instruction(&Instruction::I32Shl);
}

pub fn memarg(offset: u64, align: u32) -> wasm_encoder::MemArg {
    wasm_encoder::MemArg {
        offset,
        align,
        memory_index: 0,
    }
}
