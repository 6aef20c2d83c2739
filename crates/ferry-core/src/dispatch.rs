//! Call dispatcher: host functions the guest imports.
//!
//! Each [`DispatchEntry`] pairs an import name with an ABI [`Signature`] and
//! a thunk. The lowered signature becomes the import's wasm type; a shim
//! registered with the `wasmi::Linker` does the marshaling around the thunk:
//!
//! 1. discard a stale exception (fallible entries)
//! 2. decode arguments (strings, bytes, handles)
//! 3. run the thunk
//! 4. release owned handle arguments
//! 5. encode the result (direct value or out-buffer) and the status word
//!
//! A failing fallible entry captures the failure as the pending exception
//! and returns the failure status with every other result zeroed. A failing
//! logged entry writes the failure to the log and traps the guest. Handle and
//! memory contract violations always trap.

use std::rc::Rc;

use ferry_abi::layout::{STATUS_FAILED, STATUS_OK};
use ferry_abi::{AbiParam, AbiReturn, DispatchKind, Handle, LoweredType, Signature, WasmType};
use log::{debug, error};
use serde::Serialize;
use wasmi::core::ValType;
use wasmi::{AsContext, AsContextMut, Caller, FuncType, Linker, StoreContext, StoreContextMut, Val};

use crate::closure::Closure;
use crate::codec;
use crate::error::{BridgeError, BridgeResult};
use crate::state::BridgeState;
use crate::table::ObjectTable;
use crate::value::{HostError, HostValue};

/// Host function body.
pub type Thunk = dyn Fn(&mut HostCx<'_>, Args) -> BridgeResult<Ret>;

// ══════════════════════════════════════════════════════════════════════════════
// Arguments and results
// ══════════════════════════════════════════════════════════════════════════════

/// One decoded argument.
#[derive(Debug, Clone)]
pub enum Arg {
    I32(i32),
    F64(f64),
    /// A handle argument and the value behind it.
    Value(Handle, HostValue),
    Str(String),
    Bytes(Vec<u8>),
}

/// Decoded arguments of one call.
#[derive(Debug, Clone, Default)]
pub struct Args(Vec<Arg>);

fn type_error(index: usize, expected: &str, got: Option<&Arg>) -> BridgeError {
    let got = match got {
        Some(arg) => format!("{arg:?}"),
        None => "nothing".to_string(),
    };
    BridgeError::HostOperation(HostError::capture_named(
        "TypeError",
        format!("argument {index}: expected {expected}, got {got}"),
    ))
}

impl Args {
    pub fn new(args: Vec<Arg>) -> Self {
        Self(args)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arg> {
        self.0.get(index)
    }

    pub fn i32(&self, index: usize) -> BridgeResult<i32> {
        match self.get(index) {
            Some(Arg::I32(v)) => Ok(*v),
            other => Err(type_error(index, "i32", other)),
        }
    }

    pub fn f64(&self, index: usize) -> BridgeResult<f64> {
        match self.get(index) {
            Some(Arg::F64(v)) => Ok(*v),
            other => Err(type_error(index, "f64", other)),
        }
    }

    pub fn value(&self, index: usize) -> BridgeResult<&HostValue> {
        match self.get(index) {
            Some(Arg::Value(_, v)) => Ok(v),
            other => Err(type_error(index, "handle", other)),
        }
    }

    pub fn handle(&self, index: usize) -> BridgeResult<Handle> {
        match self.get(index) {
            Some(Arg::Value(h, _)) => Ok(*h),
            other => Err(type_error(index, "handle", other)),
        }
    }

    pub fn str(&self, index: usize) -> BridgeResult<&str> {
        match self.get(index) {
            Some(Arg::Str(s)) => Ok(s),
            other => Err(type_error(index, "string", other)),
        }
    }

    pub fn bytes(&self, index: usize) -> BridgeResult<&[u8]> {
        match self.get(index) {
            Some(Arg::Bytes(b)) => Ok(b),
            other => Err(type_error(index, "bytes", other)),
        }
    }
}

/// What a thunk hands back.
#[derive(Debug, Clone)]
pub enum Ret {
    Unit,
    I32(i32),
    F64(f64),
    /// Stored in the object table; the guest receives an owned handle.
    Value(HostValue),
    Str(String),
    Bytes(Vec<u8>),
    OptF64(Option<f64>),
    /// No value for an out-buffer return: `(0, 0)` for strings and bytes,
    /// absent for optional numbers.
    Absent,
}

impl From<bool> for Ret {
    fn from(b: bool) -> Self {
        Self::I32(b as i32)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Host context
// ══════════════════════════════════════════════════════════════════════════════

/// What a thunk can reach while it runs.
pub struct HostCx<'a> {
    store: StoreContextMut<'a, BridgeState>,
}

impl<'a> HostCx<'a> {
    pub fn new(store: StoreContextMut<'a, BridgeState>) -> Self {
        Self { store }
    }

    pub fn state(&self) -> &BridgeState {
        self.store.data()
    }

    pub fn state_mut(&mut self) -> &mut BridgeState {
        self.store.data_mut()
    }

    pub fn objects(&self) -> &ObjectTable {
        &self.state().objects
    }

    pub fn objects_mut(&mut self) -> &mut ObjectTable {
        &mut self.state_mut().objects
    }

    /// Invoke a guest closure from inside a host call.
    pub fn invoke(&mut self, closure: &Closure, args: &[HostValue]) -> BridgeResult<HostValue> {
        closure.invoke(&mut self.store, args)
    }

    /// Release a host reference to a closure.
    pub fn release(&mut self, closure: &Closure) -> bool {
        closure.release(&mut self.store)
    }
}

impl AsContext for HostCx<'_> {
    type Data = BridgeState;

    fn as_context(&self) -> StoreContext<'_, BridgeState> {
        self.store.as_context()
    }
}

impl AsContextMut for HostCx<'_> {
    fn as_context_mut(&mut self) -> StoreContextMut<'_, BridgeState> {
        self.store.as_context_mut()
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Registry
// ══════════════════════════════════════════════════════════════════════════════

/// One registered host function.
pub struct DispatchEntry {
    pub module: String,
    pub name: String,
    pub signature: Signature,
    lowered: LoweredType,
    thunk: Box<Thunk>,
}

impl DispatchEntry {
    /// `module.name`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }

    fn func_type(&self) -> FuncType {
        FuncType::new(
            self.lowered.params.iter().copied().map(val_type),
            self.lowered.results.iter().copied().map(val_type),
        )
    }
}

fn val_type(ty: WasmType) -> ValType {
    match ty {
        WasmType::I32 => ValType::I32,
        WasmType::F64 => ValType::F64,
    }
}

fn zero(ty: WasmType) -> Val {
    match ty {
        WasmType::I32 => Val::I32(0),
        WasmType::F64 => Val::F64(0.0f64.into()),
    }
}

#[derive(Serialize)]
struct ManifestEntry<'a> {
    module: &'a str,
    name: &'a str,
    signature: &'a Signature,
}

/// Registry of host functions, keyed by `(module, name)`.
#[derive(Default)]
pub struct Dispatcher {
    entries: Vec<Rc<DispatchEntry>>,
}

impl Dispatcher {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the intrinsics under the default import module.
    pub fn with_intrinsics() -> Self {
        Self::with_intrinsics_in(ferry_abi::layout::IMPORT_MODULE)
    }

    /// A registry holding the intrinsics under `module`.
    pub fn with_intrinsics_in(module: &str) -> Self {
        let mut dispatcher = Self::new();
        crate::intrinsics::register(&mut dispatcher, module);
        dispatcher
    }

    /// Register (or replace) a host function.
    pub fn register<F>(
        &mut self,
        module: &str,
        name: &str,
        signature: Signature,
        thunk: F,
    ) -> &mut Self
    where
        F: Fn(&mut HostCx<'_>, Args) -> BridgeResult<Ret> + 'static,
    {
        let entry = Rc::new(DispatchEntry {
            module: module.to_string(),
            name: name.to_string(),
            lowered: signature.lower(),
            signature,
            thunk: Box::new(thunk),
        });
        match self.position(module, name) {
            Some(i) => self.entries[i] = entry,
            None => self.entries.push(entry),
        }
        self
    }

    fn position(&self, module: &str, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.module == module && e.name == name)
    }

    pub fn get(&self, module: &str, name: &str) -> Option<&DispatchEntry> {
        self.position(module, name).map(|i| &*self.entries[i])
    }

    pub fn contains(&self, module: &str, name: &str) -> bool {
        self.position(module, name).is_some()
    }

    pub fn entries(&self) -> impl Iterator<Item = &DispatchEntry> {
        self.entries.iter().map(|e| &**e)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The import surface as JSON: `[{module, name, signature}, ...]`.
    pub fn manifest_json(&self) -> serde_json::Result<String> {
        let manifest: Vec<ManifestEntry<'_>> = self
            .entries()
            .map(|e| ManifestEntry {
                module: &e.module,
                name: &e.name,
                signature: &e.signature,
            })
            .collect();
        serde_json::to_string_pretty(&manifest)
    }

    /// Define every entry in `linker`, installing the thunks in `state`.
    pub(crate) fn link(
        &self,
        linker: &mut Linker<BridgeState>,
        state: &mut BridgeState,
    ) -> BridgeResult<()> {
        state.entries = self.entries.clone();
        for (index, entry) in self.entries.iter().enumerate() {
            linker
                .func_new(
                    &entry.module,
                    &entry.name,
                    entry.func_type(),
                    move |mut caller: Caller<'_, BridgeState>, params: &[Val], results: &mut [Val]| {
                        dispatch(caller.as_context_mut(), index, params, results)
                    },
                )
                .map_err(|e| {
                    BridgeError::Instantiation(format!(
                        "cannot link `{}`: {e}",
                        entry.qualified_name()
                    ))
                })?;
        }
        Ok(())
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Shim
// ══════════════════════════════════════════════════════════════════════════════

fn val_i32(val: Option<&Val>) -> i32 {
    match val {
        Some(Val::I32(v)) => *v,
        _ => 0,
    }
}

fn val_f64(val: Option<&Val>) -> f64 {
    match val {
        Some(Val::F64(v)) => (*v).into(),
        _ => 0.0,
    }
}

fn dispatch(
    mut store: StoreContextMut<'_, BridgeState>,
    index: usize,
    params: &[Val],
    results: &mut [Val],
) -> Result<(), wasmi::Error> {
    let Some(entry) = store.data().entries.get(index).cloned() else {
        return Err(wasmi::Error::new(format!("no host function at index {index}")));
    };
    let sig = &entry.signature;

    if sig.kind == DispatchKind::Fallible {
        let state = store.data_mut();
        if state.boundary.discard_stale(&mut state.objects) {
            state.diagnostics.stale_discarded += 1;
        }
    }

    let (retptr, params) = if sig.ret.uses_out_buffer() {
        (val_i32(params.first()) as u32, params.get(1..).unwrap_or_default())
    } else {
        (0, params)
    };

    let mut owned = Vec::new();
    let outcome = match decode_args(&mut store, sig, params, &mut owned) {
        Ok(args) => {
            let mut cx = HostCx::new(store.as_context_mut());
            (entry.thunk)(&mut cx, args)
        }
        Err(err) => Err(err),
    };

    let state = store.data_mut();
    for handle in owned {
        if let Err(err) = state.objects.release(handle) {
            debug!("owned argument of `{}`: {err}", entry.qualified_name());
        }
    }

    let outcome = outcome.and_then(|ret| encode_return(&mut store, &entry, retptr, ret, results));
    match outcome {
        Ok(()) => {
            if sig.kind == DispatchKind::Fallible {
                if let Some(status) = results.last_mut() {
                    *status = Val::I32(STATUS_OK);
                }
            }
            Ok(())
        }
        Err(err) => fail(&mut store, &entry, err, results),
    }
}

fn decode_args(
    store: &mut StoreContextMut<'_, BridgeState>,
    sig: &Signature,
    params: &[Val],
    owned: &mut Vec<Handle>,
) -> BridgeResult<Args> {
    let mut vals = params.iter();
    let mut args = Vec::with_capacity(sig.params.len());
    for param in &sig.params {
        let arg = match param {
            AbiParam::I32 => Arg::I32(val_i32(vals.next())),
            AbiParam::F64 => Arg::F64(val_f64(vals.next())),
            AbiParam::Handle | AbiParam::OwnedHandle => {
                let handle = Handle::from_abi(val_i32(vals.next()));
                let value = store.data().objects.get(handle)?.clone();
                if *param == AbiParam::OwnedHandle {
                    owned.push(handle);
                }
                Arg::Value(handle, value)
            }
            AbiParam::Str => {
                let ptr = val_i32(vals.next()) as u32;
                let len = val_i32(vals.next()) as u32;
                Arg::Str(codec::decode_utf8(store, ptr, len)?)
            }
            AbiParam::Bytes => {
                let ptr = val_i32(vals.next()) as u32;
                let len = val_i32(vals.next()) as u32;
                Arg::Bytes(codec::decode_bytes(store, ptr, len)?)
            }
        };
        args.push(arg);
    }
    Ok(Args(args))
}

fn encode_return(
    store: &mut StoreContextMut<'_, BridgeState>,
    entry: &DispatchEntry,
    retptr: u32,
    ret: Ret,
    results: &mut [Val],
) -> BridgeResult<()> {
    match (entry.signature.ret, ret) {
        (AbiReturn::Unit, Ret::Unit) => {}
        (AbiReturn::I32, Ret::I32(v)) => results[0] = Val::I32(v),
        (AbiReturn::F64, Ret::F64(v)) => results[0] = Val::F64(v.into()),
        (AbiReturn::Handle, Ret::Value(value)) => {
            let handle = store.data_mut().objects.alloc(value);
            results[0] = Val::I32(handle.to_abi());
        }
        (AbiReturn::Str, Ret::Str(text)) => {
            let encoded = codec::encode_utf8(store, &text)?;
            codec::write_pair(store, retptr, encoded.ptr, encoded.len)?;
        }
        (AbiReturn::Bytes, Ret::Bytes(bytes)) => {
            let (ptr, len) = codec::encode_bytes(store, &bytes)?;
            codec::write_pair(store, retptr, ptr, len)?;
        }
        (AbiReturn::Str | AbiReturn::Bytes, Ret::Absent) => {
            codec::write_pair(store, retptr, 0, 0)?;
        }
        (AbiReturn::OptionalF64, Ret::OptF64(value)) => {
            codec::write_optional_f64(store, retptr, value)?;
        }
        (AbiReturn::OptionalF64, Ret::Absent) => {
            codec::write_optional_f64(store, retptr, None)?;
        }
        (expected, got) => {
            return Err(BridgeError::HostOperation(HostError::named(
                "TypeError",
                format!(
                    "`{}` returned {got:?} where its signature promises {expected:?}",
                    entry.qualified_name()
                ),
            )));
        }
    }
    Ok(())
}

fn fail(
    store: &mut StoreContextMut<'_, BridgeState>,
    entry: &DispatchEntry,
    err: BridgeError,
    results: &mut [Val],
) -> Result<(), wasmi::Error> {
    if let BridgeError::Trap(trap) = err {
        return Err(trap);
    }
    let recoverable = matches!(
        err,
        BridgeError::HostOperation(_) | BridgeError::Encoding(_) | BridgeError::GuestThrew(_)
    );

    match entry.signature.kind {
        DispatchKind::Fallible if recoverable => {
            let state = store.data_mut();
            state
                .boundary
                .capture(&mut state.objects, err.into_host_value());
            state.diagnostics.captured += 1;
            for (slot, ty) in results.iter_mut().zip(&entry.lowered.results) {
                *slot = zero(*ty);
            }
            if let Some(status) = results.last_mut() {
                *status = Val::I32(STATUS_FAILED);
            }
            Ok(())
        }
        DispatchKind::Logged if !matches!(err, BridgeError::GuestThrew(_)) => {
            error!("`{}` failed: {}", entry.qualified_name(), err.report());
            Err(store.data_mut().raise(err))
        }
        _ => Err(store.data_mut().raise(err)),
    }
}
