//! Strings, byte buffers, handle arrays and out-buffers across the boundary.
//!
//! Text is UTF-8 on both sides. Encoding sizes its first allocation by the
//! text's UTF-16 length and writes the ASCII prefix in place; the first
//! non-ASCII character triggers one reallocation sized for the worst case
//! (three bytes per remaining UTF-16 unit), after which the block is shrunk
//! to the bytes actually written.

use ferry_abi::layout::{OUT_F64, OUT_PRESENT, OUT_WORD0, OUT_WORD1};
use ferry_abi::Handle;
use wasmi::AsContextMut;

use crate::error::BridgeResult;
use crate::memory;
use crate::state::{self, with_state, BridgeState};
use crate::value::HostValue;

/// Where an encoded string landed in guest memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedStr {
    pub ptr: u32,
    pub len: u32,
    /// Bytes written before the first non-ASCII character.
    pub ascii_prefix: u32,
    /// Whether the slow path (reallocation) ran.
    pub fell_back: bool,
}

/// Decode `len` bytes at `ptr` as UTF-8. Malformed input is an error, never
/// replaced.
pub fn decode_utf8<C>(ctx: &mut C, ptr: u32, len: u32) -> BridgeResult<String>
where
    C: AsContextMut<Data = BridgeState>,
{
    let view = memory::view(ctx)?;
    let text = std::str::from_utf8(view.slice(ptr, len)?)?;
    Ok(text.to_owned())
}

/// Copy `text` into a fresh guest allocation.
pub fn encode_utf8<C>(ctx: &mut C, text: &str) -> BridgeResult<EncodedStr>
where
    C: AsContextMut<Data = BridgeState>,
{
    let units = text.encode_utf16().count() as u32;
    let ptr = state::malloc(ctx, units, 1)?;

    let prefix = text.bytes().take_while(u8::is_ascii).count();
    memory::view(ctx)?.write(ptr, &text.as_bytes()[..prefix])?;
    let ascii_prefix = prefix as u32;
    if prefix == text.len() {
        return Ok(EncodedStr {
            ptr,
            len: ascii_prefix,
            ascii_prefix,
            fell_back: false,
        });
    }

    let rest = &text[prefix..];
    let capacity = ascii_prefix + rest.encode_utf16().count() as u32 * 3;
    let ptr = state::realloc(ctx, ptr, units, capacity, 1)?;
    memory::view(ctx)?.write(ptr + ascii_prefix, rest.as_bytes())?;

    let len = text.len() as u32;
    let ptr = state::realloc(ctx, ptr, capacity, len, 1)?;
    Ok(EncodedStr {
        ptr,
        len,
        ascii_prefix,
        fell_back: true,
    })
}

pub fn decode_bytes<C>(ctx: &mut C, ptr: u32, len: u32) -> BridgeResult<Vec<u8>>
where
    C: AsContextMut<Data = BridgeState>,
{
    let view = memory::view(ctx)?;
    Ok(view.slice(ptr, len)?.to_vec())
}

/// Copy `bytes` into a fresh guest allocation, returning `(ptr, len)`.
pub fn encode_bytes<C>(ctx: &mut C, bytes: &[u8]) -> BridgeResult<(u32, u32)>
where
    C: AsContextMut<Data = BridgeState>,
{
    let len = bytes.len() as u32;
    let ptr = state::malloc(ctx, len, 1)?;
    memory::view(ctx)?.write(ptr, bytes)?;
    Ok((ptr, len))
}

// ── Out-buffer ──────────────────────────────────────────────────────────────

pub fn write_pair<C>(ctx: &mut C, retptr: u32, word0: u32, word1: u32) -> BridgeResult<()>
where
    C: AsContextMut<Data = BridgeState>,
{
    let mut view = memory::view(ctx)?;
    view.write_u32(retptr + OUT_WORD0, word0)?;
    view.write_u32(retptr + OUT_WORD1, word1)
}

pub fn read_pair<C>(ctx: &mut C, retptr: u32) -> BridgeResult<(u32, u32)>
where
    C: AsContextMut<Data = BridgeState>,
{
    let view = memory::view(ctx)?;
    Ok((
        view.read_u32(retptr + OUT_WORD0)?,
        view.read_u32(retptr + OUT_WORD1)?,
    ))
}

/// Presence flag at `+0`, value at `+8`. An absent number zeroes both.
pub fn write_optional_f64<C>(ctx: &mut C, retptr: u32, value: Option<f64>) -> BridgeResult<()>
where
    C: AsContextMut<Data = BridgeState>,
{
    let mut view = memory::view(ctx)?;
    view.write_i32(retptr + OUT_PRESENT, value.is_some() as i32)?;
    view.write_f64(retptr + OUT_F64, value.unwrap_or(0.0))
}

pub fn read_optional_f64<C>(ctx: &mut C, retptr: u32) -> BridgeResult<Option<f64>>
where
    C: AsContextMut<Data = BridgeState>,
{
    let view = memory::view(ctx)?;
    if view.read_i32(retptr + OUT_PRESENT)? == 0 {
        return Ok(None);
    }
    view.read_f64(retptr + OUT_F64).map(Some)
}

// ── Handle arrays ───────────────────────────────────────────────────────────

/// Read `count` handles stored at `ptr`.
pub fn read_handles<C>(ctx: &mut C, ptr: u32, count: u32) -> BridgeResult<Vec<Handle>>
where
    C: AsContextMut<Data = BridgeState>,
{
    let view = memory::view(ctx)?;
    Ok(view.cells32(ptr, count)?.into_iter().map(Handle).collect())
}

/// Transfer an array of handles out of guest memory.
///
/// Every handle is taken from the object table and the array itself is
/// returned to the guest allocator.
pub fn take_slice<C>(ctx: &mut C, ptr: u32, count: u32) -> BridgeResult<Vec<HostValue>>
where
    C: AsContextMut<Data = BridgeState>,
{
    let handles = read_handles(ctx, ptr, count)?;
    let values = with_state(ctx, |s| s.objects.drop_slice(&handles))?;
    state::free(ctx, ptr, count * 4, 4)?;
    Ok(values)
}

/// Place `values` in the object table and write their handles to a fresh
/// guest array, returning `(ptr, count)`.
pub fn pass_handles<C>(ctx: &mut C, values: &[HostValue]) -> BridgeResult<(u32, u32)>
where
    C: AsContextMut<Data = BridgeState>,
{
    let count = values.len() as u32;
    let ptr = state::malloc(ctx, count * 4, 4)?;
    let handles: Vec<Handle> =
        with_state(ctx, |s| values.iter().map(|v| s.objects.alloc(v.clone())).collect());
    let mut view = memory::view(ctx)?;
    for (i, handle) in handles.iter().enumerate() {
        view.write_u32(ptr + i as u32 * 4, handle.0)?;
    }
    Ok((ptr, count))
}
