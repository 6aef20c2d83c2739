//! Integration tests for memory views and the value codec.
//!
//! Tests validate:
//! - Views observe memory growth (generation bump, new region addressable)
//! - Out-of-bounds accesses are rejected
//! - UTF-8 encoding: ASCII fast path, fallback sizing, shrink to fit
//! - Strict UTF-8 decoding
//! - Out-buffer pairs and optional numbers
//! - Handle arrays passed to and taken from the guest

use ferry_abi::layout::PAGE_SIZE;
use ferry_core::codec;
use ferry_core::{Bridge, BridgeError, Handle, HostValue, ModuleSource};
use ferry_guest::fixtures::{self, OUT_ADDR};

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

fn running() -> Bridge {
    let wasm = fixtures::minimal().expect("fixture builds");
    let mut bridge = Bridge::default();
    bridge
        .load(ModuleSource::Bytes(wasm))
        .expect("minimal module loads");
    bridge
}

// ══════════════════════════════════════════════════════════════════════════════
// Memory views
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn view_tracks_memory_growth() {
    let mut bridge = running();
    let (len_before, gen_before) = {
        let view = bridge.memory_view().unwrap();
        (view.len(), view.generation())
    };

    let ptr = bridge.malloc(2 * PAGE_SIZE, 8).unwrap();

    let mut view = bridge.memory_view().unwrap();
    assert!(view.len() > len_before, "memory should have grown");
    assert!(view.generation() > gen_before);

    let last = ptr + 2 * PAGE_SIZE - 4;
    view.write_u32(last, 0xdead_beef).unwrap();
    assert_eq!(view.read_u32(last).unwrap(), 0xdead_beef);
}

#[test]
fn view_generation_is_stable_without_growth() {
    let mut bridge = running();
    let first = bridge.memory_view().unwrap().generation();
    bridge.malloc(16, 4).unwrap();
    assert_eq!(bridge.memory_view().unwrap().generation(), first);
}

#[test]
fn out_of_bounds_access_is_rejected() {
    let mut bridge = running();
    let view = bridge.memory_view().unwrap();
    let len = view.len() as u32;

    let err = view.read_u32(len - 2).unwrap_err();
    assert!(matches!(err, BridgeError::MemoryOutOfBounds { offset, len: 4 } if offset == len - 2));
    assert!(view.slice(u32::MAX, 2).is_err());
    assert!(view.slice(len, 0).is_ok());
}

#[test]
fn read_string_out_of_bounds() {
    let mut bridge = running();
    let len = bridge.memory_view().unwrap().len() as u32;
    let err = bridge.read_string(len - 1, 8).unwrap_err();
    assert!(err.is_violation());
}

// ══════════════════════════════════════════════════════════════════════════════
// Strings
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn ascii_string_takes_fast_path() {
    let mut bridge = running();
    let s = bridge.pass_string("hello").unwrap();
    assert_eq!(s.len, 5);
    assert_eq!(s.ascii_prefix, 5);
    assert!(!s.fell_back);
    assert_eq!(bridge.read_string(s.ptr, s.len).unwrap(), "hello");
}

#[test]
fn non_ascii_string_falls_back_and_shrinks() {
    let mut bridge = running();
    let s = bridge.pass_string("héllo").unwrap();
    assert_eq!(s.len, 6);
    assert_eq!(s.ascii_prefix, 1);
    assert!(s.fell_back);
    assert_eq!(bridge.read_string(s.ptr, s.len).unwrap(), "héllo");

    // The block was shrunk to its final length.
    let next = bridge.malloc(1, 1).unwrap();
    assert_eq!(next, s.ptr + 6);
}

#[test]
fn astral_characters_encode() {
    let mut bridge = running();
    let s = bridge.pass_string("a😀").unwrap();
    assert_eq!(s.len, 5);
    assert_eq!(s.ascii_prefix, 1);
    assert!(s.fell_back);
    assert_eq!(bridge.read_string(s.ptr, s.len).unwrap(), "a😀");
}

#[test]
fn empty_string() {
    let mut bridge = running();
    let s = bridge.pass_string("").unwrap();
    assert_eq!(s.len, 0);
    assert!(!s.fell_back);
    assert_eq!(bridge.read_string(s.ptr, 0).unwrap(), "");
}

#[test]
fn malformed_utf8_is_an_error() {
    let mut bridge = running();
    let ptr = bridge.malloc(2, 1).unwrap();
    bridge.memory_view().unwrap().write(ptr, &[0xff, 0xfe]).unwrap();

    let err = bridge.read_string(ptr, 2).unwrap_err();
    assert!(matches!(err, BridgeError::Encoding(_)));
    assert!(!err.is_violation());
}

#[test]
fn bytes_are_copied_verbatim() {
    let mut bridge = running();
    let (ptr, len) = bridge.pass_bytes(&[0, 1, 0xff, 7]).unwrap();
    assert_eq!(len, 4);
    assert_eq!(bridge.read_bytes(ptr, len).unwrap(), vec![0, 1, 0xff, 7]);
}

// ══════════════════════════════════════════════════════════════════════════════
// Out-buffer
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn pair_out_buffer() {
    let mut bridge = running();
    codec::write_pair(bridge.store_mut(), OUT_ADDR, 7, 9).unwrap();
    assert_eq!(codec::read_pair(bridge.store_mut(), OUT_ADDR).unwrap(), (7, 9));
}

#[test]
fn optional_number_out_buffer() {
    let mut bridge = running();
    codec::write_optional_f64(bridge.store_mut(), OUT_ADDR, Some(2.5)).unwrap();
    assert_eq!(
        codec::read_optional_f64(bridge.store_mut(), OUT_ADDR).unwrap(),
        Some(2.5)
    );

    codec::write_optional_f64(bridge.store_mut(), OUT_ADDR, None).unwrap();
    assert_eq!(codec::read_optional_f64(bridge.store_mut(), OUT_ADDR).unwrap(), None);
    let view = bridge.memory_view().unwrap();
    assert_eq!(view.read_i32(OUT_ADDR).unwrap(), 0);
    assert_eq!(view.read_f64(OUT_ADDR + 8).unwrap(), 0.0);
}

// ══════════════════════════════════════════════════════════════════════════════
// Handle arrays
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn handles_round_trip_through_guest_array() {
    let mut bridge = running();
    let values = vec![HostValue::from(1.5), HostValue::from("x"), HostValue::Null];
    let live_before = bridge.objects().live();

    let (ptr, count) = bridge.pass_handles(&values).unwrap();
    assert_eq!(count, 3);
    // `null` maps to its reserved handle and takes no slot.
    assert_eq!(bridge.objects().live(), live_before + 2);

    let back = bridge.take_slice(ptr, count).unwrap();
    assert_eq!(back, values);
    assert_eq!(bridge.objects().live(), live_before);

    // The array was returned to the allocator.
    assert_eq!(bridge.malloc(4, 4).unwrap(), ptr);
}

#[test]
fn take_slice_with_released_handle_leaves_table_untouched() {
    let mut bridge = running();
    let (ptr, count) = bridge
        .pass_handles(&[HostValue::from("a"), HostValue::from("b")])
        .unwrap();
    let handles = codec::read_handles(bridge.store_mut(), ptr, count).unwrap();
    bridge.objects_mut().release(handles[1]).unwrap();

    let err = bridge.take_slice(ptr, count).unwrap_err();
    assert!(matches!(err, BridgeError::HandleViolation { .. }));
    assert_eq!(
        bridge.value(handles[0]).unwrap(),
        HostValue::from("a"),
        "first handle must survive a failed transfer"
    );
}

#[test]
fn take_slice_with_repeated_handle_leaves_table_untouched() {
    let mut bridge = running();
    let (ptr, count) = bridge
        .pass_handles(&[HostValue::from("a"), HostValue::from("b")])
        .unwrap();
    let handles = codec::read_handles(bridge.store_mut(), ptr, count).unwrap();
    bridge
        .memory_view()
        .unwrap()
        .write_i32(ptr + 4, handles[0].to_abi())
        .unwrap();
    let live = bridge.objects().live();

    let err = bridge.take_slice(ptr, count).unwrap_err();
    assert!(matches!(err, BridgeError::HandleViolation { .. }));
    assert_eq!(bridge.objects().live(), live);
    assert_eq!(bridge.value(handles[0]).unwrap(), HostValue::from("a"));
}

#[test]
fn reserved_handles_resolve_without_allocation() {
    let mut bridge = running();
    let handle = bridge.pass_value(HostValue::Bool(true));
    assert_eq!(handle, Handle::TRUE);
    assert_eq!(bridge.value(Handle::UNDEFINED).unwrap(), HostValue::Undefined);
    assert_eq!(bridge.objects().live(), 0);
}
