//! Guest module assembler.
//!
//! Orchestrates module assembly:
//! 1. Collect imports (function indices `0..imports`)
//! 2. Seal imports and emit the allocator runtime
//! 3. Collect defined functions, table slots, exports and data
//! 4. Assemble all sections into a valid module
//! 5. Validate with `wasmparser`

use std::borrow::Cow;
use std::collections::HashMap;

use ferry_abi::layout::{
    EXPORT_FREE, EXPORT_MALLOC, EXPORT_MEMORY, EXPORT_REALLOC, EXPORT_START, EXPORT_TABLE,
};
use ferry_abi::{Signature, WasmType};
use wasm_encoder::{
    CodeSection, ConstExpr, CustomSection, DataSection, ElementSection, Elements, EntityType,
    ExportKind, ExportSection, Function, FunctionSection, GlobalSection, GlobalType,
    ImportSection, MemorySection, MemoryType, Module, RefType, TableSection, TableType,
    TypeSection, ValType,
};

use crate::error::{GuestError, GuestResult};
use crate::runtime::{self, RuntimeFuncs};
use crate::types::*;

/// Map an ABI type onto the encoder's value type.
pub fn val_type(ty: WasmType) -> ValType {
    match ty {
        WasmType::I32 => ValType::I32,
        WasmType::F64 => ValType::F64,
    }
}

struct ImportDecl {
    module: String,
    name: String,
    type_index: u32,
}

struct FuncDecl {
    type_index: u32,
    body: Function,
}

/// Incrementally assembles an ABI-conforming guest module.
///
/// Every module gets a memory, the `ferry_malloc` / `ferry_realloc` /
/// `ferry_free` allocator, and an exported function table (possibly empty).
pub struct GuestBuilder {
    types: Vec<(Vec<ValType>, Vec<ValType>)>,
    type_lookup: HashMap<(Vec<ValType>, Vec<ValType>), u32>,
    imports: Vec<ImportDecl>,
    functions: Vec<FuncDecl>,
    exports: Vec<(String, ExportKind, u32)>,
    table: Vec<u32>,
    data: Vec<(u32, Vec<u8>)>,
    runtime: Option<RuntimeFuncs>,
    initial_pages: u64,
    max_pages: Option<u64>,
}

impl Default for GuestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GuestBuilder {
    pub fn new() -> Self {
        Self {
            types: Vec::new(),
            type_lookup: HashMap::new(),
            imports: Vec::new(),
            functions: Vec::new(),
            exports: Vec::new(),
            table: Vec::new(),
            data: Vec::new(),
            runtime: None,
            initial_pages: INITIAL_MEMORY_PAGES,
            max_pages: Some(MAX_MEMORY_PAGES),
        }
    }

    /// Override the memory limits (pages of 64 KiB).
    pub fn memory(&mut self, initial_pages: u64, max_pages: Option<u64>) -> &mut Self {
        self.initial_pages = initial_pages;
        self.max_pages = max_pages;
        self
    }

    fn type_index(&mut self, params: &[ValType], results: &[ValType]) -> u32 {
        let key = (params.to_vec(), results.to_vec());
        if let Some(idx) = self.type_lookup.get(&key) {
            return *idx;
        }
        let idx = self.types.len() as u32;
        self.types.push(key.clone());
        self.type_lookup.insert(key, idx);
        idx
    }

    // ── Imports ──────────────────────────────────────────────────────────

    /// Declare a function import and return its function index.
    pub fn import(
        &mut self,
        module: &str,
        name: &str,
        params: &[ValType],
        results: &[ValType],
    ) -> GuestResult<u32> {
        if self.runtime.is_some() {
            return Err(GuestError::ImportAfterDefinition {
                module: module.to_string(),
                name: name.to_string(),
            });
        }
        let type_index = self.type_index(params, results);
        self.imports.push(ImportDecl {
            module: module.to_string(),
            name: name.to_string(),
            type_index,
        });
        Ok(self.imports.len() as u32 - 1)
    }

    /// Declare an import whose type is the lowering of an ABI signature.
    pub fn import_signature(
        &mut self,
        module: &str,
        name: &str,
        signature: &Signature,
    ) -> GuestResult<u32> {
        let lowered = signature.lower();
        let params: Vec<ValType> = lowered.params.iter().copied().map(val_type).collect();
        let results: Vec<ValType> = lowered.results.iter().copied().map(val_type).collect();
        self.import(module, name, &params, &results)
    }

    // ── Defined functions ────────────────────────────────────────────────

    /// Seal the import list and emit the allocator runtime.
    ///
    /// Called implicitly by the first defined function.
    pub fn runtime(&mut self) -> RuntimeFuncs {
        if let Some(rt) = self.runtime {
            return rt;
        }
        let rt = RuntimeFuncs::at(self.imports.len() as u32);
        self.runtime = Some(rt);

        let bodies = [
            runtime::emit_ensure_capacity(),
            runtime::emit_malloc(rt),
            runtime::emit_realloc(rt),
            runtime::emit_free(),
        ];
        for ((params, results), body) in runtime::runtime_types().into_iter().zip(bodies) {
            let type_index = self.type_index(&params, &results);
            self.functions.push(FuncDecl { type_index, body });
        }

        self.exports
            .push((EXPORT_MALLOC.to_string(), ExportKind::Func, rt.malloc));
        self.exports
            .push((EXPORT_REALLOC.to_string(), ExportKind::Func, rt.realloc));
        self.exports
            .push((EXPORT_FREE.to_string(), ExportKind::Func, rt.free));
        rt
    }

    /// Index the next defined function will receive.
    pub fn next_function_index(&mut self) -> u32 {
        self.runtime();
        (self.imports.len() + self.functions.len()) as u32
    }

    /// Add a defined function and return its function index.
    pub fn function(&mut self, params: &[ValType], results: &[ValType], body: Function) -> u32 {
        let index = self.next_function_index();
        let type_index = self.type_index(params, results);
        self.functions.push(FuncDecl { type_index, body });
        index
    }

    fn function_count(&self) -> u32 {
        (self.imports.len() + self.functions.len()) as u32
    }

    /// Export a function under `name`.
    pub fn export(&mut self, name: &str, func: u32) -> GuestResult<&mut Self> {
        if func >= self.function_count() {
            return Err(GuestError::UnknownFunction(func));
        }
        if self.exports.iter().any(|(n, _, _)| n == name) {
            return Err(GuestError::DuplicateExport(name.to_string()));
        }
        self.exports.push((name.to_string(), ExportKind::Func, func));
        Ok(self)
    }

    /// Export `func` as the module entry point.
    pub fn entry(&mut self, func: u32) -> GuestResult<&mut Self> {
        self.export(EXPORT_START, func)
    }

    /// Place `func` in the exported function table and return its slot.
    pub fn table_slot(&mut self, func: u32) -> GuestResult<u32> {
        if func >= self.function_count() {
            return Err(GuestError::UnknownFunction(func));
        }
        self.table.push(func);
        Ok(self.table.len() as u32 - 1)
    }

    /// Add an active data segment below the heap.
    pub fn data(&mut self, offset: u32, bytes: &[u8]) -> GuestResult<&mut Self> {
        let len = bytes.len() as u32;
        if offset.saturating_add(len) > HEAP_START {
            return Err(GuestError::DataOverlapsHeap {
                offset,
                len,
                heap_start: HEAP_START,
            });
        }
        self.data.push((offset, bytes.to_vec()));
        Ok(self)
    }

    // ── Assembly ─────────────────────────────────────────────────────────

    /// Assemble and validate the module.
    pub fn finish(mut self) -> GuestResult<Vec<u8>> {
        self.runtime();

        let mut module = Module::new();

        // 1. Type section
        let mut types = TypeSection::new();
        for (params, results) in &self.types {
            types.ty().function(params.clone(), results.clone());
        }
        module.section(&types);

        // 2. Import section
        let mut imports = ImportSection::new();
        for import in &self.imports {
            imports.import(
                &import.module,
                &import.name,
                EntityType::Function(import.type_index),
            );
        }
        module.section(&imports);

        // 3. Function section
        let mut functions = FunctionSection::new();
        for func in &self.functions {
            functions.function(func.type_index);
        }
        module.section(&functions);

        // 4. Table section
        let slots = self.table.len() as u64;
        let mut tables = TableSection::new();
        tables.table(TableType {
            element_type: RefType::FUNCREF,
            table64: false,
            minimum: slots,
            maximum: Some(slots),
            shared: false,
        });
        module.section(&tables);

        // 5. Memory section
        let mut memory = MemorySection::new();
        memory.memory(MemoryType {
            minimum: self.initial_pages,
            maximum: self.max_pages,
            memory64: false,
            shared: false,
            page_size_log2: None,
        });
        module.section(&memory);

        // 6. Global section: GLOBAL_HEAP_PTR
        let mut globals = GlobalSection::new();
        globals.global(
            GlobalType {
                val_type: ValType::I32,
                mutable: true,
                shared: false,
            },
            &ConstExpr::i32_const(HEAP_START as i32),
        );
        module.section(&globals);

        // 7. Export section
        let mut exports = ExportSection::new();
        exports.export(EXPORT_MEMORY, ExportKind::Memory, 0);
        exports.export(EXPORT_TABLE, ExportKind::Table, 0);
        for (name, kind, index) in &self.exports {
            exports.export(name, *kind, *index);
        }
        module.section(&exports);

        // 8. Element section
        if !self.table.is_empty() {
            let mut elements = ElementSection::new();
            elements.active(
                Some(0),
                &ConstExpr::i32_const(0),
                Elements::Functions(Cow::Borrowed(&self.table)),
            );
            module.section(&elements);
        }

        // 9. Code section
        let mut code = CodeSection::new();
        for func in &self.functions {
            code.function(&func.body);
        }
        module.section(&code);

        // 10. Data section
        if !self.data.is_empty() {
            let mut data = DataSection::new();
            for (offset, bytes) in &self.data {
                data.active(0, &ConstExpr::i32_const(*offset as i32), bytes.iter().copied());
            }
            module.section(&data);
        }

        // 11. Custom section
        module.section(&CustomSection {
            name: Cow::Borrowed(CUSTOM_SECTION_NAME),
            data: Cow::Borrowed(EMITTER_VERSION.as_bytes()),
        });

        let wasm_bytes = module.finish();

        wasmparser::validate(&wasm_bytes)
            .map_err(|e| GuestError::ValidationFailed(format!("{e}")))?;

        Ok(wasm_bytes)
    }
}
