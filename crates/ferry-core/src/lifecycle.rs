//! Module lifecycle manager.
//!
//! ```text
//! Uninitialized ──load──▶ Loading ──▶ Instantiated ──entry──▶ Running
//!       ▲                    │              │
//!       └──── any failure ───┴──────────────┘
//! ```
//!
//! The [`Bridge`] owns the engine, the single `wasmi::Store` whose data is
//! the [`BridgeState`], and the dispatcher whose entries become the module's
//! imports.

use std::fmt;
use std::fs;
use std::path::PathBuf;

use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use wasmi::{Engine, Instance, Linker, Module, Store, TypedFunc, WasmParams, WasmResults};
use wasmparser::{Parser, Payload, TypeRef};

use ferry_abi::Handle;

use crate::closure::{self, Closure};
use crate::codec::{self, EncodedStr};
use crate::config::BridgeConfig;
use crate::dispatch::Dispatcher;
use crate::error::{BridgeError, BridgeResult};
use crate::memory::{self, MemoryView};
use crate::state::{self, BridgeState, Diagnostics, GuestExports};
use crate::table::ObjectTable;
use crate::value::HostValue;

/// Content type that allows streaming compilation.
pub const WASM_CONTENT_TYPE: &str = "application/wasm";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Loading,
    Instantiated,
    Running,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::Instantiated => "instantiated",
            Self::Running => "running",
        };
        f.write_str(name)
    }
}

/// Where the module comes from.
#[derive(Debug, Clone)]
pub enum ModuleSource {
    /// Pre-fetched bytes; compiled buffered without a warning.
    Bytes(Vec<u8>),
    /// A file; the content type is inferred from the extension.
    Path(PathBuf),
    /// A served artifact and its declared content type.
    Served {
        content_type: Option<String>,
        body: Vec<u8>,
    },
}

/// Fetched module bytes plus how to compile them.
struct Artifact {
    bytes: Vec<u8>,
    /// `None` for pre-fetched bytes, which never stream.
    content_type: Option<Option<String>>,
}

impl ModuleSource {
    fn fetch(self) -> BridgeResult<Artifact> {
        Ok(match self {
            Self::Bytes(bytes) => Artifact {
                bytes,
                content_type: None,
            },
            Self::Path(path) => {
                let content_type = match path.extension().and_then(|e| e.to_str()) {
                    Some(ext) if ext.eq_ignore_ascii_case("wasm") => {
                        Some(WASM_CONTENT_TYPE.to_string())
                    }
                    _ => None,
                };
                Artifact {
                    bytes: fs::read(&path)?,
                    content_type: Some(content_type),
                }
            }
            Self::Served { content_type, body } => Artifact {
                bytes: body,
                content_type: Some(content_type),
            },
        })
    }
}

/// Whether a declared content type is `application/wasm`, ignoring
/// parameters and case.
fn is_wasm_content_type(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    essence.eq_ignore_ascii_case(WASM_CONTENT_TYPE)
}

fn hex_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Owner of a guest module and everything the bridge keeps for it.
pub struct Bridge {
    config: BridgeConfig,
    engine: Engine,
    store: Store<BridgeState>,
    dispatcher: Dispatcher,
    lifecycle: LifecycleState,
    instance: Option<Instance>,
    digest: Option<String>,
    compile_fallbacks: u32,
    fallback_warned: bool,
}

impl Default for Bridge {
    fn default() -> Self {
        Self::with_config(BridgeConfig::default())
    }
}

impl Bridge {
    /// A bridge exposing `dispatcher` as the guest's imports.
    pub fn new(dispatcher: Dispatcher, config: BridgeConfig) -> Self {
        let mut engine_config = wasmi::Config::default();
        engine_config.consume_fuel(config.fuel.is_some());
        let engine = Engine::new(&engine_config);
        let store = fresh_store(&engine, &config, Diagnostics::default());
        Self {
            config,
            engine,
            store,
            dispatcher,
            lifecycle: LifecycleState::Uninitialized,
            instance: None,
            digest: None,
            compile_fallbacks: 0,
            fallback_warned: false,
        }
    }

    /// A bridge exposing only the intrinsics, under the configured module.
    pub fn with_config(config: BridgeConfig) -> Self {
        let dispatcher = Dispatcher::with_intrinsics_in(&config.import_module);
        Self::new(dispatcher, config)
    }

    // ── Loading ──────────────────────────────────────────────────────────

    /// Load, instantiate and start a module.
    ///
    /// Loading again while instantiated or running returns the existing
    /// instance. On failure the bridge returns to
    /// [`LifecycleState::Uninitialized`] with no partial state.
    pub fn load(&mut self, source: ModuleSource) -> BridgeResult<Instance> {
        if let Some(instance) = self.instance {
            debug!("load ignored: module already {}", self.lifecycle);
            return Ok(instance);
        }

        self.lifecycle = LifecycleState::Loading;
        match self.try_load(source) {
            Ok(instance) => Ok(instance),
            Err(err) => {
                self.reset();
                self.store.data_mut().report_uncaught(&err);
                Err(err)
            }
        }
    }

    fn try_load(&mut self, source: ModuleSource) -> BridgeResult<Instance> {
        let artifact = source.fetch()?;
        let digest = hex_digest(&artifact.bytes);
        let module = self.compile(&artifact)?;
        self.check_imports(&artifact.bytes)?;

        let mut linker = Linker::<BridgeState>::new(&self.engine);
        self.dispatcher.link(&mut linker, self.store.data_mut())?;
        let instance = linker
            .instantiate(&mut self.store, &module)
            .and_then(|pre| pre.start(&mut self.store))
            .map_err(|e| BridgeError::Instantiation(e.to_string()))?;

        let exports = GuestExports::resolve(&self.store, &instance, &self.config.exports)
            .map_err(|e| BridgeError::Instantiation(e.to_string()))?;
        self.store.data_mut().exports = Some(exports);
        self.instance = Some(instance);
        self.digest = Some(digest);
        self.lifecycle = LifecycleState::Instantiated;

        self.run_entry(&instance)?;
        self.lifecycle = LifecycleState::Running;
        info!(
            "guest module running ({} imports, sha256 {})",
            self.dispatcher.len(),
            self.digest.as_deref().unwrap_or_default()
        );
        Ok(instance)
    }

    fn compile(&mut self, artifact: &Artifact) -> BridgeResult<Module> {
        let compiled = match &artifact.content_type {
            Some(Some(ct)) if is_wasm_content_type(ct) => {
                Module::new_streaming(&self.engine, &artifact.bytes[..])
            }
            Some(content_type) => {
                self.compile_fallbacks += 1;
                if !self.fallback_warned {
                    self.fallback_warned = true;
                    warn!(
                        "module served as {:?} instead of `{WASM_CONTENT_TYPE}`; \
                         falling back to buffered compilation",
                        content_type.as_deref().unwrap_or("<none>")
                    );
                }
                Module::new(&self.engine, &artifact.bytes[..])
            }
            None => Module::new(&self.engine, &artifact.bytes[..]),
        };
        compiled.map_err(|e| BridgeError::Instantiation(format!("compilation failed: {e}")))
    }

    /// Every import must name a registered host function.
    fn check_imports(&self, wasm: &[u8]) -> BridgeResult<()> {
        let malformed = |e: wasmparser::BinaryReaderError| {
            BridgeError::Instantiation(format!("malformed module: {e}"))
        };
        let mut unresolved = Vec::new();
        for payload in Parser::new(0).parse_all(wasm) {
            if let Payload::ImportSection(reader) = payload.map_err(malformed)? {
                for import in reader {
                    let import = import.map_err(malformed)?;
                    let known = matches!(import.ty, TypeRef::Func(_))
                        && self.dispatcher.contains(import.module, import.name);
                    if !known {
                        unresolved.push(format!("{}.{}", import.module, import.name));
                    }
                }
            }
        }
        if unresolved.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::Instantiation(format!(
                "unresolved imports: {}",
                unresolved.join(", ")
            )))
        }
    }

    fn run_entry(&mut self, instance: &Instance) -> BridgeResult<()> {
        let Some(func) = instance.get_func(&self.store, &self.config.exports.start) else {
            debug!("module has no `{}` entry point", self.config.exports.start);
            return Ok(());
        };
        let entry: TypedFunc<(), ()> = func
            .typed(&self.store)
            .map_err(|e| BridgeError::Instantiation(format!("entry point: {e}")))?;
        entry.call(&mut self.store, ()).map_err(|trap| {
            let err = self.store.data_mut().take_fault(trap);
            BridgeError::Instantiation(format!("entry point failed: {}", err.report()))
        })
    }

    fn reset(&mut self) {
        let diagnostics = self.store.data().diagnostics.clone();
        self.store = fresh_store(&self.engine, &self.config, diagnostics);
        self.instance = None;
        self.digest = None;
        self.lifecycle = LifecycleState::Uninitialized;
    }

    // ── Calling into the guest ───────────────────────────────────────────

    fn ensure_running(&self) -> BridgeResult<()> {
        match self.lifecycle {
            LifecycleState::Running => Ok(()),
            _ => Err(BridgeError::NotRunning),
        }
    }

    /// Report a failure on its way out to host code.
    fn reported<T>(&mut self, result: BridgeResult<T>) -> BridgeResult<T> {
        if let Err(err) = &result {
            self.store.data_mut().report_uncaught(err);
        }
        result
    }

    pub fn typed_export<P, R>(&self, name: &str) -> BridgeResult<TypedFunc<P, R>>
    where
        P: WasmParams,
        R: WasmResults,
    {
        let instance = self.instance.ok_or(BridgeError::NotRunning)?;
        instance
            .get_typed_func::<P, R>(&self.store, name)
            .map_err(|_| BridgeError::MissingExport(name.to_string()))
    }

    /// Call an exported guest function.
    pub fn call<P, R>(&mut self, name: &str, params: P) -> BridgeResult<R>
    where
        P: WasmParams,
        R: WasmResults,
    {
        self.ensure_running()?;
        self.run_finalizers();
        let func = self.typed_export::<P, R>(name)?;
        let result = func
            .call(&mut self.store, params)
            .map_err(|trap| self.store.data_mut().take_fault(trap));
        self.reported(result)
    }

    /// Invoke a guest closure on behalf of host code.
    pub fn call_closure(&mut self, closure: &Closure, args: &[HostValue]) -> BridgeResult<HostValue> {
        self.ensure_running()?;
        self.run_finalizers();
        let result = closure.invoke(&mut self.store, args);
        self.reported(result)
    }

    /// Wrap guest callback state as a closure. See [`Closure::wrap`].
    pub fn wrap_closure(&self, env: i32, context: i32, destructor: u32, trampoline: u32) -> Closure {
        Closure::wrap(self.store.data(), env, context, destructor, trampoline)
    }

    /// Drop one host reference to a closure. Returns whether its destructor
    /// ran.
    pub fn release_closure(&mut self, closure: &Closure) -> bool {
        closure.release(&mut self.store)
    }

    /// Run destructors of closures dropped without being released.
    pub fn run_finalizers(&mut self) -> usize {
        if self.lifecycle != LifecycleState::Running {
            return 0;
        }
        closure::run_finalizers(&mut self.store)
    }

    // ── Values ───────────────────────────────────────────────────────────

    /// Lend `value` to the guest as a new handle.
    pub fn pass_value(&mut self, value: HostValue) -> Handle {
        self.store.data_mut().objects.alloc(value)
    }

    pub fn value(&self, handle: Handle) -> BridgeResult<HostValue> {
        self.store.data().objects.get(handle).cloned()
    }

    /// Take ownership of a handle the guest returned.
    pub fn take_value(&mut self, handle: Handle) -> BridgeResult<HostValue> {
        self.store.data_mut().objects.take(handle)
    }

    pub fn pass_string(&mut self, text: &str) -> BridgeResult<EncodedStr> {
        codec::encode_utf8(&mut self.store, text)
    }

    pub fn read_string(&mut self, ptr: u32, len: u32) -> BridgeResult<String> {
        codec::decode_utf8(&mut self.store, ptr, len)
    }

    pub fn pass_bytes(&mut self, bytes: &[u8]) -> BridgeResult<(u32, u32)> {
        codec::encode_bytes(&mut self.store, bytes)
    }

    pub fn read_bytes(&mut self, ptr: u32, len: u32) -> BridgeResult<Vec<u8>> {
        codec::decode_bytes(&mut self.store, ptr, len)
    }

    pub fn pass_handles(&mut self, values: &[HostValue]) -> BridgeResult<(u32, u32)> {
        codec::pass_handles(&mut self.store, values)
    }

    pub fn take_slice(&mut self, ptr: u32, count: u32) -> BridgeResult<Vec<HostValue>> {
        codec::take_slice(&mut self.store, ptr, count)
    }

    /// Allocate guest memory.
    pub fn malloc(&mut self, size: u32, align: u32) -> BridgeResult<u32> {
        state::malloc(&mut self.store, size, align)
    }

    pub fn free(&mut self, ptr: u32, size: u32, align: u32) -> BridgeResult<()> {
        state::free(&mut self.store, ptr, size, align)
    }

    /// A fresh view over guest memory.
    pub fn memory_view(&mut self) -> BridgeResult<MemoryView<'_>> {
        memory::view(&mut self.store)
    }

    /// Retrieve and clear the pending exception.
    pub fn take_last_exception(&mut self) -> Option<Handle> {
        self.store.data_mut().take_last_exception()
    }

    // ── Introspection ────────────────────────────────────────────────────

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle
    }

    pub fn instance(&self) -> Option<Instance> {
        self.instance
    }

    /// SHA-256 of the loaded artifact, lowercase hex.
    pub fn module_digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Register host functions here before [`load`](Self::load).
    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.store.data().diagnostics
    }

    pub fn objects(&self) -> &ObjectTable {
        &self.store.data().objects
    }

    pub fn objects_mut(&mut self) -> &mut ObjectTable {
        &mut self.store.data_mut().objects
    }

    pub fn state(&self) -> &BridgeState {
        self.store.data()
    }

    pub fn store(&self) -> &Store<BridgeState> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store<BridgeState> {
        &mut self.store
    }

    /// Remaining fuel, when metering is enabled.
    pub fn fuel(&self) -> Option<u64> {
        self.store.get_fuel().ok()
    }

    pub fn set_fuel(&mut self, fuel: u64) -> BridgeResult<()> {
        Ok(self.store.set_fuel(fuel)?)
    }

    /// Loads that fell back to buffered compilation.
    pub fn compile_fallbacks(&self) -> u32 {
        self.compile_fallbacks
    }

    /// Content-type warnings emitted (at most one per bridge).
    pub fn fallback_warnings(&self) -> u32 {
        self.fallback_warned as u32
    }
}

fn fresh_store(engine: &Engine, config: &BridgeConfig, diagnostics: Diagnostics) -> Store<BridgeState> {
    let mut state = BridgeState::new(config);
    state.diagnostics = diagnostics;
    let mut store = Store::new(engine, state);
    if let Some(fuel) = config.fuel {
        if let Err(err) = store.set_fuel(fuel) {
            warn!("cannot set fuel budget: {err}");
        }
    }
    store
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_essence() {
        assert!(is_wasm_content_type("application/wasm"));
        assert!(is_wasm_content_type("Application/WASM; charset=binary"));
        assert!(!is_wasm_content_type("application/octet-stream"));
        assert!(!is_wasm_content_type(""));
    }

    #[test]
    fn digest_is_lowercase_hex() {
        let digest = hex_digest(b"abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn fresh_bridge_is_uninitialized() {
        let bridge = Bridge::default();
        assert_eq!(bridge.lifecycle_state(), LifecycleState::Uninitialized);
        assert!(bridge.instance().is_none());
        assert!(bridge.module_digest().is_none());
        assert_eq!(bridge.dispatcher().len(), ferry_abi::intrinsic_signatures().len());
    }
}
