//! Linear memory view.
//!
//! Guest memory can move whenever it grows, which can happen on any call
//! into the guest (most often an allocation). A [`MemoryView`] borrows the
//! store, so it cannot outlive such a call; each derivation compares the
//! buffer size with the cached one and refreshes the cache when it changed.

use log::trace;
use wasmi::{AsContextMut, Memory};

use crate::error::{BridgeError, BridgeResult};
use crate::state::{self, BridgeState};

/// Last observed size of guest memory.
#[derive(Debug, Default)]
pub struct MemoryCache {
    len: usize,
    generation: u64,
}

impl MemoryCache {
    fn observe(&mut self, len: usize) {
        if len != self.len {
            trace!(
                "guest memory changed from {} to {} bytes, refreshing views",
                self.len,
                len
            );
            self.len = len;
            self.generation += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of times the cached buffer was refreshed.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// The guest's exported linear memory.
#[derive(Debug, Clone, Copy)]
pub struct GuestMemory(Memory);

impl GuestMemory {
    pub(crate) fn new(memory: Memory) -> Self {
        Self(memory)
    }

    pub fn raw(&self) -> Memory {
        self.0
    }
}

/// Derive a fresh view over the memory of the running module.
pub fn view<C>(ctx: &mut C) -> BridgeResult<MemoryView<'_>>
where
    C: AsContextMut<Data = BridgeState>,
{
    let memory = state::exports(&*ctx)?.memory;
    let (bytes, state) = memory.0.data_and_store_mut(ctx.as_context_mut());
    state.memory.observe(bytes.len());
    Ok(MemoryView {
        bytes,
        generation: state.memory.generation(),
    })
}

/// Typed, bounds-checked access to guest memory. All accessors are
/// little-endian.
pub struct MemoryView<'a> {
    bytes: &'a mut [u8],
    generation: u64,
}

impl<'a> MemoryView<'a> {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Refresh count of the cache this view was derived from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes
    }

    fn range(&self, offset: u32, len: u32) -> BridgeResult<std::ops::Range<usize>> {
        let start = offset as usize;
        match start.checked_add(len as usize) {
            Some(end) if end <= self.bytes.len() => Ok(start..end),
            _ => Err(BridgeError::MemoryOutOfBounds { offset, len }),
        }
    }

    pub fn slice(&self, offset: u32, len: u32) -> BridgeResult<&[u8]> {
        let range = self.range(offset, len)?;
        Ok(&self.bytes[range])
    }

    pub fn slice_mut(&mut self, offset: u32, len: u32) -> BridgeResult<&mut [u8]> {
        let range = self.range(offset, len)?;
        Ok(&mut self.bytes[range])
    }

    pub fn write(&mut self, offset: u32, data: &[u8]) -> BridgeResult<()> {
        self.slice_mut(offset, data.len() as u32)?
            .copy_from_slice(data);
        Ok(())
    }

    fn array<const N: usize>(&self, offset: u32) -> BridgeResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.slice(offset, N as u32)?);
        Ok(out)
    }

    pub fn read_u32(&self, offset: u32) -> BridgeResult<u32> {
        self.array(offset).map(u32::from_le_bytes)
    }

    pub fn read_i32(&self, offset: u32) -> BridgeResult<i32> {
        self.array(offset).map(i32::from_le_bytes)
    }

    pub fn read_f64(&self, offset: u32) -> BridgeResult<f64> {
        self.array(offset).map(f64::from_le_bytes)
    }

    pub fn write_u32(&mut self, offset: u32, value: u32) -> BridgeResult<()> {
        self.write(offset, &value.to_le_bytes())
    }

    pub fn write_i32(&mut self, offset: u32, value: i32) -> BridgeResult<()> {
        self.write(offset, &value.to_le_bytes())
    }

    pub fn write_f64(&mut self, offset: u32, value: f64) -> BridgeResult<()> {
        self.write(offset, &value.to_le_bytes())
    }

    /// `count` consecutive 32-bit cells starting at `offset`.
    pub fn cells32(&self, offset: u32, count: u32) -> BridgeResult<Vec<u32>> {
        let bytes = self.slice(offset, count.saturating_mul(4))?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// `count` consecutive f64 cells starting at `offset`.
    pub fn float_cells(&self, offset: u32, count: u32) -> BridgeResult<Vec<f64>> {
        let bytes = self.slice(offset, count.saturating_mul(8))?;
        Ok(bytes
            .chunks_exact(8)
            .map(|c| {
                let mut cell = [0u8; 8];
                cell.copy_from_slice(c);
                f64::from_le_bytes(cell)
            })
            .collect())
    }
}
