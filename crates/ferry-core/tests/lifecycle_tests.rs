//! Integration tests for the module lifecycle.
//!
//! Tests validate:
//! - State transitions and idempotent loading
//! - Module sources: bytes, files, served artifacts and content types
//! - Buffered-compilation fallback warns once per bridge
//! - Failed loads leave no partial state
//! - Fuel metering and calls outside the running state
//! - Configuration

use ferry_core::{
    Bridge, BridgeConfig, BridgeError, Dispatcher, ExportNames, LifecycleState, ModuleSource,
};
use ferry_guest::fixtures::{self, ENTRY_COUNT_ADDR};
use sha2::{Digest, Sha256};

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

fn minimal() -> Vec<u8> {
    fixtures::minimal().expect("fixture builds")
}

fn entry_count(bridge: &mut Bridge) -> i32 {
    bridge
        .memory_view()
        .unwrap()
        .read_i32(ENTRY_COUNT_ADDR)
        .unwrap()
}

fn served(content_type: Option<&str>, body: Vec<u8>) -> ModuleSource {
    ModuleSource::Served {
        content_type: content_type.map(str::to_string),
        body,
    }
}

fn temp_module(name: &str, wasm: &[u8]) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("ferry-{}-{name}", std::process::id()));
    std::fs::write(&path, wasm).expect("write temp module");
    path
}

// ══════════════════════════════════════════════════════════════════════════════
// States
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn load_runs_entry_once() {
    let mut bridge = Bridge::default();
    assert_eq!(bridge.lifecycle_state(), LifecycleState::Uninitialized);

    bridge.load(ModuleSource::Bytes(minimal())).unwrap();
    assert_eq!(bridge.lifecycle_state(), LifecycleState::Running);
    assert!(bridge.instance().is_some());
    assert_eq!(entry_count(&mut bridge), 1);

    bridge.load(ModuleSource::Bytes(minimal())).unwrap();
    assert_eq!(bridge.lifecycle_state(), LifecycleState::Running);
    assert_eq!(entry_count(&mut bridge), 1, "second load must not re-run the entry");
}

#[test]
fn digest_is_sha256_of_artifact() {
    let wasm = minimal();
    let expected = hex::encode(Sha256::digest(&wasm));

    let mut bridge = Bridge::default();
    assert!(bridge.module_digest().is_none());
    bridge.load(ModuleSource::Bytes(wasm)).unwrap();
    let digest = bridge.module_digest().unwrap();
    assert_eq!(digest.len(), 64);
    assert_eq!(digest, expected);
}

#[test]
fn failed_entry_resets_to_uninitialized() {
    let mut bridge = Bridge::default();
    let err = bridge
        .load(ModuleSource::Bytes(fixtures::trapping_entry().unwrap()))
        .unwrap_err();
    match &err {
        BridgeError::Instantiation(msg) => assert!(msg.contains("entry point failed"), "{msg}"),
        other => panic!("expected Instantiation, got {other}"),
    }
    assert_eq!(bridge.lifecycle_state(), LifecycleState::Uninitialized);
    assert!(bridge.instance().is_none());
    assert!(bridge.module_digest().is_none());
    assert!(matches!(bridge.pass_string("x"), Err(BridgeError::NotRunning)));
    assert_eq!(bridge.diagnostics().uncaught, 1);

    bridge.load(ModuleSource::Bytes(minimal())).unwrap();
    assert_eq!(bridge.lifecycle_state(), LifecycleState::Running);
    assert_eq!(entry_count(&mut bridge), 1);
    // Diagnostics survive the reset.
    assert_eq!(bridge.diagnostics().uncaught, 1);
}

#[test]
fn malformed_module_fails_compilation() {
    let mut bridge = Bridge::default();
    let err = bridge
        .load(ModuleSource::Bytes(vec![0x00, 0x61, 0x73]))
        .unwrap_err();
    match err {
        BridgeError::Instantiation(msg) => assert!(msg.contains("compilation failed"), "{msg}"),
        other => panic!("expected Instantiation, got {other}"),
    }
    assert_eq!(bridge.lifecycle_state(), LifecycleState::Uninitialized);
}

#[test]
fn missing_required_export_fails_instantiation() {
    let config = BridgeConfig {
        exports: ExportNames {
            malloc: "not_there".into(),
            ..ExportNames::default()
        },
        ..BridgeConfig::default()
    };
    let mut bridge = Bridge::with_config(config);
    let err = bridge.load(ModuleSource::Bytes(minimal())).unwrap_err();
    match err {
        BridgeError::Instantiation(msg) => assert!(msg.contains("not_there"), "{msg}"),
        other => panic!("expected Instantiation, got {other}"),
    }
    assert_eq!(bridge.lifecycle_state(), LifecycleState::Uninitialized);
}

// ══════════════════════════════════════════════════════════════════════════════
// Sources
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn wasm_file_streams_without_warning() {
    let path = temp_module("stream.wasm", &minimal());
    let mut bridge = Bridge::default();
    bridge.load(ModuleSource::Path(path.clone())).unwrap();
    assert_eq!(bridge.lifecycle_state(), LifecycleState::Running);
    assert_eq!(bridge.compile_fallbacks(), 0);
    assert_eq!(bridge.fallback_warnings(), 0);
    let _ = std::fs::remove_file(path);
}

#[test]
fn other_file_extension_falls_back() {
    let path = temp_module("buffered.bin", &minimal());
    let mut bridge = Bridge::default();
    bridge.load(ModuleSource::Path(path.clone())).unwrap();
    assert_eq!(bridge.lifecycle_state(), LifecycleState::Running);
    assert_eq!(bridge.compile_fallbacks(), 1);
    assert_eq!(bridge.fallback_warnings(), 1);
    let _ = std::fs::remove_file(path);
}

#[test]
fn missing_file_is_an_io_error() {
    let mut bridge = Bridge::default();
    let path = std::env::temp_dir().join("ferry-definitely-missing.wasm");
    let err = bridge.load(ModuleSource::Path(path)).unwrap_err();
    assert!(matches!(err, BridgeError::Io(_)));
    assert_eq!(bridge.lifecycle_state(), LifecycleState::Uninitialized);
}

#[test]
fn served_content_types() {
    let mut streamed = Bridge::default();
    streamed
        .load(served(Some("application/wasm"), minimal()))
        .unwrap();
    assert_eq!(streamed.compile_fallbacks(), 0);

    let mut buffered = Bridge::default();
    buffered
        .load(served(Some("application/octet-stream"), minimal()))
        .unwrap();
    assert_eq!(buffered.compile_fallbacks(), 1);

    let mut untyped = Bridge::default();
    untyped.load(served(None, minimal())).unwrap();
    assert_eq!(untyped.compile_fallbacks(), 1);
}

#[test]
fn fallback_warns_once_per_bridge() {
    let mut bridge = Bridge::default();
    let trapping = fixtures::trapping_entry().unwrap();
    assert!(bridge.load(served(Some("text/plain"), trapping)).is_err());
    assert_eq!(bridge.compile_fallbacks(), 1);
    assert_eq!(bridge.fallback_warnings(), 1);

    bridge.load(served(Some("text/plain"), minimal())).unwrap();
    assert_eq!(bridge.compile_fallbacks(), 2);
    assert_eq!(bridge.fallback_warnings(), 1);
}

// ══════════════════════════════════════════════════════════════════════════════
// Running
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn calls_before_load_are_rejected() {
    let mut bridge = Bridge::default();
    assert!(matches!(
        bridge.call::<(), ()>("spin", ()),
        Err(BridgeError::NotRunning)
    ));
    assert!(matches!(bridge.malloc(4, 4), Err(BridgeError::NotRunning)));
    assert_eq!(bridge.run_finalizers(), 0);
}

#[test]
fn unknown_export_is_reported() {
    let mut bridge = Bridge::default();
    bridge.load(ModuleSource::Bytes(minimal())).unwrap();
    let err = bridge.call::<(), ()>("nope", ()).unwrap_err();
    assert!(matches!(err, BridgeError::MissingExport(name) if name == "nope"));
}

#[test]
fn fuel_exhaustion_traps() {
    let mut bridge = Bridge::with_config(BridgeConfig::default().with_fuel(10_000));
    bridge.load(ModuleSource::Bytes(minimal())).unwrap();
    assert!(bridge.fuel().unwrap() > 0);

    let err = bridge.call::<(), ()>("spin", ()).unwrap_err();
    assert!(matches!(err, BridgeError::Trap(_)));
    assert_eq!(bridge.diagnostics().uncaught, 1);
    assert_eq!(bridge.lifecycle_state(), LifecycleState::Running);

    bridge.set_fuel(1_000).unwrap();
    assert_eq!(bridge.fuel(), Some(1_000));
}

#[test]
fn unmetered_bridge_has_no_fuel() {
    let bridge = Bridge::default();
    assert_eq!(bridge.fuel(), None);
}

// ══════════════════════════════════════════════════════════════════════════════
// Configuration
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn import_module_is_configurable() {
    let config = BridgeConfig::from_json(r#"{ "import_module": "bridge" }"#).unwrap();
    let mut bridge = Bridge::with_config(config);
    assert!(bridge.dispatcher().contains("bridge", "closure_new"));

    // The closures fixture imports from the default module.
    let err = bridge
        .load(ModuleSource::Bytes(fixtures::closures().unwrap()))
        .unwrap_err();
    match err {
        BridgeError::Instantiation(msg) => {
            assert!(msg.contains("unresolved imports: ferry.closure_new"), "{msg}")
        }
        other => panic!("expected Instantiation, got {other}"),
    }
}

#[test]
fn table_batch_is_configurable() {
    let config = BridgeConfig {
        table_batch: 8,
        ..BridgeConfig::default()
    };
    let bridge = Bridge::with_config(config);
    assert_eq!(bridge.objects().batch(), 8);
}

#[test]
fn custom_dispatcher_without_intrinsics() {
    let mut bridge = Bridge::new(Dispatcher::new(), BridgeConfig::default());
    // minimal imports nothing, so an empty dispatcher is enough.
    bridge.load(ModuleSource::Bytes(minimal())).unwrap();
    assert_eq!(bridge.lifecycle_state(), LifecycleState::Running);
    assert!(bridge.dispatcher().is_empty());
}

#[test]
fn diagnostics_serialize() {
    let mut bridge = Bridge::default();
    let _ = bridge.load(ModuleSource::Bytes(vec![1, 2, 3]));
    let json: serde_json::Value =
        serde_json::from_str(&bridge.diagnostics().to_json().unwrap()).unwrap();
    assert_eq!(json["uncaught"], 1);
    assert!(json["last_uncaught"].as_str().unwrap().contains("compilation failed"));
}
