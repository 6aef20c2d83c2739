//! Canned guest modules.
//!
//! Each fixture exercises one side of the bridge and records what happened
//! in fixed scratch words below [`SCRATCH_END`], so a host can observe guest
//! behaviour by reading memory.

use ferry_abi::layout::*;
use ferry_abi::{intrinsic_signature, Signature};
use wasm_encoder::{BlockType, Function, Instruction, ValType};

use crate::builder::{val_type, GuestBuilder};
use crate::error::GuestResult;
use crate::runtime::memarg;
use crate::types::SCRATCH_END;

/// Incremented by the entry point of [`minimal`].
pub const ENTRY_COUNT_ADDR: u32 = 0;
/// Incremented by the closure destructor.
pub const DTOR_COUNT_ADDR: u32 = 4;
/// Environment pointer of the most recent destructor call.
pub const DTOR_ENV_ADDR: u32 = 8;
/// Context word of the most recent destructor call.
pub const DTOR_CTX_ADDR: u32 = 12;
/// Out-buffer fixtures may hand to imports.
pub const OUT_ADDR: u32 = 16;

/// Closure environments are 16 bytes:
/// `+0` call count, `+4` last argument handle, `+8` context word,
/// `+12` the guest's own handle to the closure.
pub const ENV_CALLS: u64 = 0;
pub const ENV_LAST_ARG: u64 = 4;
pub const ENV_CTX: u64 = 8;
pub const ENV_SELF: u64 = 12;

/// First environment address tests may use; envs are placed at
/// `ENV_BASE + 16 * n`.
pub const ENV_BASE: u32 = 64;

/// Context word every fixture closure is created with.
pub const CLOSURE_CTX_WORD: i32 = 0x5eed;

/// Table slots of the closure fixture.
pub const SLOT_RECORD: i32 = 0;
pub const SLOT_ECHO: i32 = 1;
pub const SLOT_SELF_DROP: i32 = 2;
pub const SLOT_THROW: i32 = 3;
pub const SLOT_DTOR: i32 = 4;

/// Message raised by the throwing trampoline.
pub const THROW_MESSAGE: &str = "callback failed";
const THROW_MESSAGE_ADDR: u32 = SCRATCH_END;

/// Look up an intrinsic signature, failing loudly on a typo.
fn intrinsic(name: &str) -> Signature {
    match intrinsic_signature(name) {
        Some(sig) => sig,
        None => panic!("unknown intrinsic `{name}`"),
    }
}

/// Emit `mem[local + offset] += 1`.
fn emit_increment(f: &mut Function, addr_local: u32, offset: u64) {
    f.instruction(&Instruction::LocalGet(addr_local));
    f.instruction(&Instruction::LocalGet(addr_local));
    f.instruction(&Instruction::I32Load(memarg(offset, 2)));
    f.instruction(&Instruction::I32Const(1));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::I32Store(memarg(offset, 2)));
}

// ══════════════════════════════════════════════════════════════════════════════
// minimal
// ══════════════════════════════════════════════════════════════════════════════

/// Allocator, an entry point counting its runs at [`ENTRY_COUNT_ADDR`], and
/// `spin()`, an infinite loop for fuel tests.
pub fn minimal() -> GuestResult<Vec<u8>> {
    let mut g = GuestBuilder::new();

    let mut entry = Function::new(vec![(1, ValType::I32)]);
    entry.instruction(&Instruction::I32Const(ENTRY_COUNT_ADDR as i32));
    entry.instruction(&Instruction::LocalSet(0));
    emit_increment(&mut entry, 0, 0);
    entry.instruction(&Instruction::End);
    let entry = g.function(&[], &[], entry);
    g.entry(entry)?;

    let mut spin = Function::new(vec![]);
    spin.instruction(&Instruction::Loop(BlockType::Empty));
    spin.instruction(&Instruction::Br(0));
    spin.instruction(&Instruction::End);
    spin.instruction(&Instruction::End);
    let spin = g.function(&[], &[], spin);
    g.export("spin", spin)?;

    g.finish()
}

/// A module whose entry point traps.
pub fn trapping_entry() -> GuestResult<Vec<u8>> {
    let mut g = GuestBuilder::new();
    let mut entry = Function::new(vec![]);
    entry.instruction(&Instruction::Unreachable);
    entry.instruction(&Instruction::End);
    let entry = g.function(&[], &[], entry);
    g.entry(entry)?;
    g.finish()
}

// ══════════════════════════════════════════════════════════════════════════════
// forwarding
// ══════════════════════════════════════════════════════════════════════════════

/// Import every `(module, name, signature)` and export a `call_<name>`
/// function with the identical lowered type that forwards to it.
///
/// This lets a host drive each import through a real guest frame.
pub fn forwarding(imports: &[(&str, &str, Signature)]) -> GuestResult<Vec<u8>> {
    let mut g = GuestBuilder::new();
    let mut declared = Vec::with_capacity(imports.len());
    for (module, name, sig) in imports {
        let index = g.import_signature(module, name, sig)?;
        declared.push((index, *name, sig.lower()));
    }

    for (import, name, lowered) in declared {
        let params: Vec<ValType> = lowered.params.iter().copied().map(val_type).collect();
        let results: Vec<ValType> = lowered.results.iter().copied().map(val_type).collect();
        let mut f = Function::new(vec![]);
        for i in 0..params.len() as u32 {
            f.instruction(&Instruction::LocalGet(i));
        }
        f.instruction(&Instruction::Call(import));
        f.instruction(&Instruction::End);
        let func = g.function(&params, &results, f);
        g.export(&format!("call_{name}"), func)?;
    }

    g.finish()
}

/// [`forwarding`] over the intrinsics named in `names`.
pub fn forwarding_intrinsics(names: &[&str]) -> GuestResult<Vec<u8>> {
    let imports: Vec<(&str, &str, Signature)> = names
        .iter()
        .map(|name| (IMPORT_MODULE, *name, intrinsic(name)))
        .collect();
    forwarding(&imports)
}

// ══════════════════════════════════════════════════════════════════════════════
// closures
// ══════════════════════════════════════════════════════════════════════════════

/// Guest that wraps callbacks for the host.
///
/// Table slots:
/// - [`SLOT_RECORD`]: `(env, ctx, arg)`, counts calls, records arg and ctx
/// - [`SLOT_ECHO`]: `(env, ctx, arg) -> handle`, returns a clone of `arg`
/// - [`SLOT_SELF_DROP`]: `(env, ctx, arg)`, releases its own closure
/// - [`SLOT_THROW`]: `(env, ctx, arg)`, raises [`THROW_MESSAGE`]
/// - [`SLOT_DTOR`]: `(env, ctx)`, the destructor
///
/// Exports:
/// - `make_closure(slot, env) -> handle`: wraps `slot` over `env`, keeps its
///   own handle at `env + 12` and returns a clone to the host
/// - `drop_closure(env) -> i32`: releases the guest's handle
pub fn closures() -> GuestResult<Vec<u8>> {
    let mut g = GuestBuilder::new();
    let closure_new = g.import_signature(
        IMPORT_MODULE,
        INTRINSIC_CLOSURE_NEW,
        &intrinsic(INTRINSIC_CLOSURE_NEW),
    )?;
    let closure_drop = g.import_signature(
        IMPORT_MODULE,
        INTRINSIC_CLOSURE_DROP,
        &intrinsic(INTRINSIC_CLOSURE_DROP),
    )?;
    let clone_ref = g.import_signature(
        IMPORT_MODULE,
        INTRINSIC_CLONE_REF,
        &intrinsic(INTRINSIC_CLONE_REF),
    )?;
    let throw = g.import_signature(IMPORT_MODULE, INTRINSIC_THROW, &intrinsic(INTRINSIC_THROW))?;

    g.data(THROW_MESSAGE_ADDR, THROW_MESSAGE.as_bytes())?;

    let tramp_params = [ValType::I32, ValType::I32, ValType::I32];

    // SLOT_RECORD
    let mut record = Function::new(vec![]);
    emit_increment(&mut record, 0, ENV_CALLS);
    record.instruction(&Instruction::LocalGet(0));
    record.instruction(&Instruction::LocalGet(2));
    record.instruction(&Instruction::I32Store(memarg(ENV_LAST_ARG, 2)));
    record.instruction(&Instruction::LocalGet(0));
    record.instruction(&Instruction::LocalGet(1));
    record.instruction(&Instruction::I32Store(memarg(ENV_CTX, 2)));
    record.instruction(&Instruction::End);
    let record = g.function(&tramp_params, &[], record);

    // SLOT_ECHO
    let mut echo = Function::new(vec![]);
    emit_increment(&mut echo, 0, ENV_CALLS);
    echo.instruction(&Instruction::LocalGet(2));
    echo.instruction(&Instruction::Call(clone_ref));
    echo.instruction(&Instruction::End);
    let echo = g.function(&tramp_params, &[ValType::I32], echo);

    // SLOT_SELF_DROP
    let mut self_drop = Function::new(vec![]);
    emit_increment(&mut self_drop, 0, ENV_CALLS);
    self_drop.instruction(&Instruction::LocalGet(0));
    self_drop.instruction(&Instruction::I32Load(memarg(ENV_SELF, 2)));
    self_drop.instruction(&Instruction::Call(closure_drop));
    self_drop.instruction(&Instruction::Drop);
    self_drop.instruction(&Instruction::End);
    let self_drop = g.function(&tramp_params, &[], self_drop);

    // SLOT_THROW
    let mut raise = Function::new(vec![]);
    raise.instruction(&Instruction::I32Const(THROW_MESSAGE_ADDR as i32));
    raise.instruction(&Instruction::I32Const(THROW_MESSAGE.len() as i32));
    raise.instruction(&Instruction::Call(throw));
    raise.instruction(&Instruction::End);
    let raise = g.function(&tramp_params, &[], raise);

    // SLOT_DTOR
    let mut dtor = Function::new(vec![(1, ValType::I32)]);
    dtor.instruction(&Instruction::I32Const(0));
    dtor.instruction(&Instruction::LocalSet(2));
    emit_increment(&mut dtor, 2, DTOR_COUNT_ADDR as u64);
    dtor.instruction(&Instruction::I32Const(DTOR_ENV_ADDR as i32));
    dtor.instruction(&Instruction::LocalGet(0));
    dtor.instruction(&Instruction::I32Store(memarg(0, 2)));
    dtor.instruction(&Instruction::I32Const(DTOR_CTX_ADDR as i32));
    dtor.instruction(&Instruction::LocalGet(1));
    dtor.instruction(&Instruction::I32Store(memarg(0, 2)));
    dtor.instruction(&Instruction::End);
    let dtor = g.function(&[ValType::I32, ValType::I32], &[], dtor);

    for (expected, func) in [
        (SLOT_RECORD, record),
        (SLOT_ECHO, echo),
        (SLOT_SELF_DROP, self_drop),
        (SLOT_THROW, raise),
        (SLOT_DTOR, dtor),
    ] {
        let slot = g.table_slot(func)?;
        debug_assert_eq!(slot as i32, expected);
    }

    // make_closure(slot, env) -> handle
    let mut make = Function::new(vec![(1, ValType::I32)]); // local 2: handle
    make.instruction(&Instruction::LocalGet(0));
    make.instruction(&Instruction::LocalGet(1));
    make.instruction(&Instruction::I32Const(CLOSURE_CTX_WORD));
    make.instruction(&Instruction::I32Const(SLOT_DTOR));
    make.instruction(&Instruction::Call(closure_new));
    make.instruction(&Instruction::LocalSet(2));
    make.instruction(&Instruction::LocalGet(1));
    make.instruction(&Instruction::LocalGet(2));
    make.instruction(&Instruction::I32Store(memarg(ENV_SELF, 2)));
    make.instruction(&Instruction::LocalGet(2));
    make.instruction(&Instruction::Call(clone_ref));
    make.instruction(&Instruction::End);
    let make = g.function(&[ValType::I32, ValType::I32], &[ValType::I32], make);
    g.export("make_closure", make)?;

    // drop_closure(env) -> i32
    let mut drop = Function::new(vec![]);
    drop.instruction(&Instruction::LocalGet(0));
    drop.instruction(&Instruction::I32Load(memarg(ENV_SELF, 2)));
    drop.instruction(&Instruction::Call(closure_drop));
    drop.instruction(&Instruction::End);
    let drop = g.function(&[ValType::I32], &[ValType::I32], drop);
    g.export("drop_closure", drop)?;

    g.finish()
}

/// Environment address for the `n`th closure of a test.
pub fn env_addr(n: u32) -> u32 {
    ENV_BASE + 16 * n
}
