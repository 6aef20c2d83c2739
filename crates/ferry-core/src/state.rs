//! Shared bridge state, stored as the data of the `wasmi::Store`.
//!
//! Every component reaches it through a store context
//! (`AsContextMut<Data = BridgeState>`), so the object table, the exception
//! register and the guest exports are only ever touched by the single owner
//! of the store.

use std::rc::Rc;

use ferry_abi::Handle;
use serde::Serialize;
use wasmi::{AsContext, AsContextMut, Table, TypedFunc, Val};

use crate::boundary::ErrorBoundary;
use crate::closure::FinalizerQueue;
use crate::config::{BridgeConfig, ExportNames};
use crate::dispatch::DispatchEntry;
use crate::error::{BridgeError, BridgeResult};
use crate::memory::{GuestMemory, MemoryCache};
use crate::table::ObjectTable;

/// Counters describing failures that crossed the bridge.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    /// Failures reported to host code.
    pub uncaught: u64,
    /// Host failures delivered to the guest as exceptions.
    pub captured: u64,
    /// Exceptions discarded because the guest never took them.
    pub stale_discarded: u64,
    /// Closures finalized without an explicit release.
    pub leaked_closures: u64,
    pub destructor_failures: u64,
    /// Report of the most recent uncaught failure.
    pub last_uncaught: Option<String>,
}

impl Diagnostics {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Guest exports the bridge depends on.
#[derive(Clone)]
pub(crate) struct GuestExports {
    pub memory: GuestMemory,
    pub malloc: TypedFunc<(i32, i32), i32>,
    pub realloc: TypedFunc<(i32, i32, i32, i32), i32>,
    pub free: TypedFunc<(i32, i32, i32), ()>,
    pub table: Table,
}

impl GuestExports {
    pub fn resolve(
        store: impl AsContext,
        instance: &wasmi::Instance,
        names: &ExportNames,
    ) -> BridgeResult<Self> {
        let missing = |name: &str| BridgeError::MissingExport(name.to_string());
        let memory = instance
            .get_memory(&store, &names.memory)
            .ok_or_else(|| missing(&names.memory))?;
        let table = instance
            .get_table(&store, &names.table)
            .ok_or_else(|| missing(&names.table))?;
        let malloc = instance
            .get_typed_func(&store, &names.malloc)
            .map_err(|_| missing(&names.malloc))?;
        let realloc = instance
            .get_typed_func(&store, &names.realloc)
            .map_err(|_| missing(&names.realloc))?;
        let free = instance
            .get_typed_func(&store, &names.free)
            .map_err(|_| missing(&names.free))?;
        Ok(Self {
            memory: GuestMemory::new(memory),
            malloc,
            realloc,
            free,
            table,
        })
    }
}

/// Data of the `wasmi::Store` owned by a [`Bridge`](crate::Bridge).
pub struct BridgeState {
    pub(crate) objects: ObjectTable,
    pub(crate) boundary: ErrorBoundary,
    pub(crate) memory: MemoryCache,
    pub(crate) exports: Option<GuestExports>,
    pub(crate) entries: Vec<Rc<DispatchEntry>>,
    pub(crate) finalizers: FinalizerQueue,
    pub(crate) fault: Option<BridgeError>,
    pub(crate) diagnostics: Diagnostics,
}

impl BridgeState {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            objects: ObjectTable::with_batch(config.table_batch),
            boundary: ErrorBoundary::default(),
            memory: MemoryCache::default(),
            exports: None,
            entries: Vec::new(),
            finalizers: FinalizerQueue::default(),
            fault: None,
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn objects(&self) -> &ObjectTable {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut ObjectTable {
        &mut self.objects
    }

    pub fn boundary(&self) -> &ErrorBoundary {
        &self.boundary
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Retrieve and clear the pending exception, if any.
    pub fn take_last_exception(&mut self) -> Option<Handle> {
        self.boundary.take_last_exception()
    }

    /// Record a fault and produce the trap that carries it out of the guest.
    pub(crate) fn raise(&mut self, err: BridgeError) -> wasmi::Error {
        let trap = wasmi::Error::new(err.to_string());
        self.fault = Some(err);
        trap
    }

    /// Translate a trap back into the fault that caused it, if one was
    /// recorded.
    pub(crate) fn take_fault(&mut self, trap: wasmi::Error) -> BridgeError {
        self.fault.take().unwrap_or(BridgeError::Trap(trap))
    }

    /// Report a failure leaving the bridge towards host code.
    pub(crate) fn report_uncaught(&mut self, err: &BridgeError) {
        crate::boundary::report_uncaught(&mut self.diagnostics, err);
    }
}

/// Run `f` against the bridge state behind any store context.
pub(crate) fn with_state<C, R>(ctx: &mut C, f: impl FnOnce(&mut BridgeState) -> R) -> R
where
    C: AsContextMut<Data = BridgeState>,
{
    let mut store = ctx.as_context_mut();
    f(store.data_mut())
}

/// The resolved guest exports, or [`BridgeError::NotRunning`].
pub(crate) fn exports<C>(ctx: &C) -> BridgeResult<GuestExports>
where
    C: AsContext<Data = BridgeState>,
{
    let store = ctx.as_context();
    store.data().exports.clone().ok_or(BridgeError::NotRunning)
}

/// Call the guest allocator.
pub(crate) fn malloc<C>(ctx: &mut C, size: u32, align: u32) -> BridgeResult<u32>
where
    C: AsContextMut<Data = BridgeState>,
{
    let exports = exports(&*ctx)?;
    match exports.malloc.call(&mut *ctx, (size as i32, align as i32)) {
        Ok(ptr) => Ok(ptr as u32),
        Err(trap) => Err(with_state(ctx, |s| s.take_fault(trap))),
    }
}

pub(crate) fn realloc<C>(ctx: &mut C, ptr: u32, old: u32, new: u32, align: u32) -> BridgeResult<u32>
where
    C: AsContextMut<Data = BridgeState>,
{
    let exports = exports(&*ctx)?;
    let params = (ptr as i32, old as i32, new as i32, align as i32);
    match exports.realloc.call(&mut *ctx, params) {
        Ok(ptr) => Ok(ptr as u32),
        Err(trap) => Err(with_state(ctx, |s| s.take_fault(trap))),
    }
}

pub(crate) fn free<C>(ctx: &mut C, ptr: u32, size: u32, align: u32) -> BridgeResult<()>
where
    C: AsContextMut<Data = BridgeState>,
{
    let exports = exports(&*ctx)?;
    match exports
        .free
        .call(&mut *ctx, (ptr as i32, size as i32, align as i32))
    {
        Ok(()) => Ok(()),
        Err(trap) => Err(with_state(ctx, |s| s.take_fault(trap))),
    }
}

/// Call the function in slot `slot` of the guest's function table.
///
/// Returns the first result, if the function has one.
pub(crate) fn call_table<C>(ctx: &mut C, slot: u32, args: &[Val]) -> BridgeResult<Option<Val>>
where
    C: AsContextMut<Data = BridgeState>,
{
    let table = exports(&*ctx)?.table;
    let func = match table.get(&*ctx, slot.into()) {
        Some(Val::FuncRef(func_ref)) => func_ref.func().copied(),
        _ => None,
    }
    .ok_or_else(|| BridgeError::MissingExport(format!("function table slot {slot}")))?;

    let mut results: Vec<Val> = func
        .ty(&*ctx)
        .results()
        .iter()
        .map(|ty| Val::default(*ty))
        .collect();
    if let Err(trap) = func.call(&mut *ctx, args, &mut results) {
        return Err(with_state(ctx, |s| s.take_fault(trap)));
    }
    Ok(results.into_iter().next())
}
