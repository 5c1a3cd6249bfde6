use std::marker::PhantomData;

use bytemuck::Pod;

use crate::error::{GlueError, Result};

/// Size of one linear-memory page.
pub const PAGE_SIZE: usize = 65_536;

/// Identity of the current linear-memory buffer.
///
/// Growth either moves the buffer or changes its length, so either field
/// changing means every cached overlay is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferId {
    pub base: usize,
    pub len: usize,
}

impl BufferId {
    pub fn of(mem: &[u8]) -> Self {
        Self {
            base: mem.as_ptr() as usize,
            len: mem.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    U8,
    I32,
    F32,
    F64,
}

impl ViewKind {
    const ALL: [ViewKind; 4] = [ViewKind::U8, ViewKind::I32, ViewKind::F32, ViewKind::F64];

    fn slot(self) -> usize {
        self as usize
    }
}

/// Element types a typed view can overlay. All little-endian, all `Pod`.
pub trait LeElement: Pod {
    const KIND: ViewKind;
}

impl LeElement for u8 {
    const KIND: ViewKind = ViewKind::U8;
}

impl LeElement for i32 {
    const KIND: ViewKind = ViewKind::I32;
}

impl LeElement for f32 {
    const KIND: ViewKind = ViewKind::F32;
}

impl LeElement for f64 {
    const KIND: ViewKind = ViewKind::F64;
}

/// Cache of the four typed overlays.
///
/// An overlay is considered valid while the buffer identity it was built for
/// matches the live buffer. Anything else rebuilds it on next access.
#[derive(Debug, Default)]
pub struct MemoryViews {
    cached: [Option<BufferId>; 4],
    rebuilds: u64,
}

impl MemoryViews {
    /// Bring the overlay of `kind` up to date with `mem`.
    /// Returns `true` when the overlay had to be rebuilt.
    pub fn refresh(&mut self, kind: ViewKind, mem: &[u8]) -> bool {
        self.refresh_id(kind, BufferId::of(mem))
    }

    pub fn refresh_id(&mut self, kind: ViewKind, id: BufferId) -> bool {
        let slot = &mut self.cached[kind.slot()];
        if *slot == Some(id) && id.len != 0 {
            return false;
        }
        if let Some(old) = slot {
            log::debug!(
                "rebuilding {kind:?} view: {} -> {} bytes",
                old.len,
                id.len
            );
        }
        *slot = Some(id);
        self.rebuilds += 1;
        true
    }

    pub fn cached(&self, kind: ViewKind) -> Option<BufferId> {
        self.cached[kind.slot()]
    }

    /// Forget every overlay.
    pub fn reset(&mut self) {
        self.cached = [None; 4];
    }

    pub fn is_stale(&self, mem: &[u8]) -> bool {
        let id = BufferId::of(mem);
        ViewKind::ALL
            .iter()
            .filter_map(|k| self.cached(*k))
            .any(|cached| cached != id)
    }

    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }
}

fn check(offset: usize, len: usize, size: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(GlueError::OutOfBounds { offset, len, size }),
    }
}

/// Read-only overlay of `T` elements over linear memory.
///
/// Indices are element indices, the same way `getInt32Memory0()[ptr / 4]`
/// addresses memory.
pub struct TypedView<'a, T> {
    bytes: &'a [u8],
    _marker: PhantomData<T>,
}

impl<'a, T: LeElement> TypedView<'a, T> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            _marker: PhantomData,
        }
    }

    /// Element count.
    pub fn len(&self) -> usize {
        self.bytes.len() / std::mem::size_of::<T>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the underlying buffer in bytes.
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn get(&self, index: usize) -> Result<T> {
        let width = std::mem::size_of::<T>();
        let offset = index.saturating_mul(width);
        check(offset, width, self.bytes.len())?;
        Ok(bytemuck::pod_read_unaligned(&self.bytes[offset..offset + width]))
    }

    /// Copy `count` elements starting at byte address `ptr`.
    pub fn read_vec(&self, ptr: u32, count: u32) -> Result<Vec<T>> {
        let width = std::mem::size_of::<T>();
        let offset = ptr as usize;
        let len = (count as usize).saturating_mul(width);
        check(offset, len, self.bytes.len())?;
        Ok(self.bytes[offset..offset + len]
            .chunks_exact(width)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }
}

impl<'a> TypedView<'a, u8> {
    pub fn slice(&self, ptr: u32, len: u32) -> Result<&'a [u8]> {
        let (offset, len) = (ptr as usize, len as usize);
        check(offset, len, self.bytes.len())?;
        Ok(&self.bytes[offset..offset + len])
    }
}

/// Writable overlay of `T` elements over linear memory.
pub struct TypedViewMut<'a, T> {
    bytes: &'a mut [u8],
    _marker: PhantomData<T>,
}

impl<'a, T: LeElement> TypedViewMut<'a, T> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self {
            bytes,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / std::mem::size_of::<T>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set(&mut self, index: usize, value: T) -> Result<()> {
        let width = std::mem::size_of::<T>();
        let offset = index.saturating_mul(width);
        check(offset, width, self.bytes.len())?;
        self.bytes[offset..offset + width].copy_from_slice(bytemuck::bytes_of(&value));
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<T> {
        TypedView::<T>::new(self.bytes).get(index)
    }
}

impl TypedViewMut<'_, u8> {
    /// Copy `src` into memory at byte address `ptr`.
    pub fn write(&mut self, ptr: u32, src: &[u8]) -> Result<()> {
        let offset = ptr as usize;
        check(offset, src.len(), self.bytes.len())?;
        self.bytes[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    pub fn slice_mut(&mut self, ptr: u32, len: u32) -> Result<&mut [u8]> {
        let (offset, len) = (ptr as usize, len as usize);
        check(offset, len, self.bytes.len())?;
        Ok(&mut self.bytes[offset..offset + len])
    }
}

/// Growable in-process linear memory.
///
/// Growth always moves the contents into a fresh allocation so that buffer
/// identity changes the same way a real engine's detached buffer does.
#[derive(Debug, Clone)]
pub struct VecMemory {
    data: Vec<u8>,
    max_pages: Option<u32>,
}

impl VecMemory {
    pub fn new(pages: u32) -> Self {
        Self {
            data: vec![0; pages as usize * PAGE_SIZE],
            max_pages: None,
        }
    }

    pub fn with_max_pages(mut self, max: u32) -> Self {
        self.max_pages = Some(max);
        self
    }

    pub fn pages(&self) -> u32 {
        (self.data.len() / PAGE_SIZE) as u32
    }

    /// Grow by `delta` pages, returning the previous page count.
    /// `None` when the maximum would be exceeded.
    pub fn grow(&mut self, delta: u32) -> Option<u32> {
        let prev = self.pages();
        let next = prev.checked_add(delta)?;
        if self.max_pages.is_some_and(|max| next > max) {
            return None;
        }
        let mut data = Vec::with_capacity(next as usize * PAGE_SIZE);
        data.extend_from_slice(&self.data);
        data.resize(next as usize * PAGE_SIZE, 0);
        self.data = data;
        Some(prev)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}
