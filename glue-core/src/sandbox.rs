//! In-process stand-in for a compiled guest.
//!
//! Implements [`Guest`] on top of a [`VecMemory`], a bump allocator and a
//! registry of Rust closures playing the part of guest closures, so the
//! marshalling layer and host adapters can be driven without compiling wasm.

use std::collections::HashMap;

use crate::abi;
use crate::closure::{Callback, Trampoline};
use crate::context::GlueContext;
use crate::error::{GlueError, Result};
use crate::guest::Guest;
use crate::memory::{TypedView, VecMemory, PAGE_SIZE};
use crate::value::HostValue;

/// Table slot the sandbox reports for every closure destructor.
pub const DESTRUCTOR_SLOT: u32 = 1;

type ClosureBody = Box<dyn FnMut(&mut Sandbox, &[u32]) -> Result<()>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrampolineCall {
    pub export: String,
    pub a: u32,
    pub b: u32,
    pub args: Vec<u32>,
}

pub struct Sandbox {
    glue: GlueContext,
    memory: VecMemory,
    top: u32,
    last_alloc: Option<(u32, u32)>,
    realloc_enabled: bool,
    malloc_calls: u32,
    realloc_calls: u32,
    exceptions: Vec<u32>,
    closures: HashMap<u32, ClosureBody>,
    next_closure: u32,
    destroyed: Vec<(u32, u32, u32)>,
    calls: Vec<TrampolineCall>,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Sandbox {
    pub fn new() -> Self {
        Self::with_memory(VecMemory::new(1))
    }

    pub fn with_memory(memory: VecMemory) -> Self {
        Self {
            glue: GlueContext::new(),
            memory,
            top: 8,
            last_alloc: None,
            realloc_enabled: true,
            malloc_calls: 0,
            realloc_calls: 0,
            exceptions: Vec::new(),
            closures: HashMap::new(),
            next_closure: 1,
            destroyed: Vec::new(),
            calls: Vec::new(),
        }
    }

    /// Pretend the guest does not export `__wbindgen_realloc`.
    pub fn without_realloc(mut self) -> Self {
        self.realloc_enabled = false;
        self
    }

    pub fn glue_ref(&self) -> &GlueContext {
        &self.glue
    }

    pub fn vec_memory(&self) -> &VecMemory {
        &self.memory
    }

    pub fn malloc_calls(&self) -> u32 {
        self.malloc_calls
    }

    pub fn realloc_calls(&self) -> u32 {
        self.realloc_calls
    }

    /// Handles passed to `__wbindgen_exn_store`, oldest first.
    pub fn exceptions(&self) -> &[u32] {
        &self.exceptions
    }

    /// Take the most recently stored exception out of this sandbox's own heap.
    pub fn take_exception(&mut self) -> Option<HostValue> {
        let idx = self.exceptions.pop()?;
        Some(self.glue.heap.take_value(idx))
    }

    /// `(dtor, a, b)` of every destructor call.
    pub fn destroyed(&self) -> &[(u32, u32, u32)] {
        &self.destroyed
    }

    pub fn trampoline_calls(&self) -> &[TrampolineCall] {
        &self.calls
    }

    /// Name of the trampoline export the sandbox answers for `arity`.
    pub fn trampoline(arity: u32) -> Trampoline {
        Trampoline::new(
            format!("{}{arity}_mut__h{:016x}", abi::TRAMPOLINE_PREFIX, 0x5a4d_b0c5u64 + arity as u64),
            arity,
        )
    }

    /// Register a closure body and return the `(a, b)` pair the guest would
    /// hand to `__wbindgen_closure_wrapper`.
    pub fn register_closure(
        &mut self,
        body: impl FnMut(&mut Sandbox, &[u32]) -> Result<()> + 'static,
    ) -> Result<(u32, u32)> {
        let a = self.malloc(8, 4)?;
        let b = self.next_closure;
        self.next_closure += 1;
        self.closures.insert(a, Box::new(body));
        Ok((a, b))
    }

    /// Register a closure body and wrap it straight away.
    ///
    /// Panics if the sandbox runs out of memory; test helper only.
    pub fn closure(
        &mut self,
        arity: u32,
        body: impl FnMut(&mut Sandbox, &[u32]) -> Result<()> + 'static,
    ) -> Callback {
        let (a, b) = self
            .register_closure(body)
            .unwrap_or_else(|e| panic!("sandbox closure allocation failed: {e}"));
        Callback::new(a, b, DESTRUCTOR_SLOT, Self::trampoline(arity))
    }

    pub fn has_closure(&self, a: u32) -> bool {
        self.closures.contains_key(&a)
    }

    /// Copy `s` into fresh guest memory, returning `(ptr, len)`.
    pub fn write_str(&mut self, s: &str) -> Result<(u32, u32)> {
        let len = s.len() as u32;
        let ptr = self.malloc(len.max(1), 1)?;
        self.uint8_mut().write(ptr, s.as_bytes())?;
        Ok((ptr, len))
    }

    pub fn write_bytes(&mut self, bytes: &[u8], align: u32) -> Result<u32> {
        let ptr = self.malloc(bytes.len().max(1) as u32, align)?;
        self.uint8_mut().write(ptr, bytes)?;
        Ok(ptr)
    }

    pub fn read_i32(&self, addr: u32) -> Result<i32> {
        TypedView::<i32>::new(self.memory.data()).get(addr as usize / 4)
    }

    pub fn read_f64(&self, addr: u32) -> Result<f64> {
        TypedView::<f64>::new(self.memory.data()).get(addr as usize / 8)
    }

    pub fn read_bytes(&self, ptr: u32, len: u32) -> Result<Vec<u8>> {
        Ok(TypedView::<u8>::new(self.memory.data()).slice(ptr, len)?.to_vec())
    }

    /// Read the `(ptr, len)` record at `retptr` and decode the string it names.
    pub fn read_string_ret(&self, retptr: u32) -> Result<Option<String>> {
        let ptr = self.read_i32(retptr)? as u32;
        let len = self.read_i32(retptr + 4)? as u32;
        if ptr == 0 {
            return Ok(None);
        }
        let bytes = self.read_bytes(ptr, len)?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| GlueError::MalformedString {
                ptr,
                len,
                source: e.utf8_error(),
            })
    }

    fn reserve(&mut self, end: u32) -> Result<()> {
        let have = self.memory.data().len();
        if end as usize <= have {
            return Ok(());
        }
        let missing = end as usize - have;
        let pages = missing.div_ceil(PAGE_SIZE) as u32;
        self.memory
            .grow(pages)
            .map(|_| ())
            .ok_or_else(|| GlueError::Guest("sandbox out of memory".into()))
    }
}

impl Guest for Sandbox {
    fn glue(&mut self) -> &mut GlueContext {
        &mut self.glue
    }

    fn memory(&self) -> &[u8] {
        self.memory.data()
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        self.memory.data_mut()
    }

    fn malloc(&mut self, size: u32, align: u32) -> Result<u32> {
        self.malloc_calls += 1;
        let align = align.max(1);
        let ptr = self.top.div_ceil(align) * align;
        let end = ptr
            .checked_add(size)
            .ok_or_else(|| GlueError::Guest("allocation overflow".into()))?;
        self.reserve(end)?;
        self.top = end;
        self.last_alloc = Some((ptr, size));
        Ok(ptr)
    }

    fn has_realloc(&self) -> bool {
        self.realloc_enabled
    }

    fn realloc(&mut self, ptr: u32, old_size: u32, new_size: u32, align: u32) -> Result<u32> {
        if !self.realloc_enabled {
            return Err(GlueError::MissingExport(abi::REALLOC.into()));
        }
        self.realloc_calls += 1;
        if self.last_alloc == Some((ptr, old_size)) {
            let end = ptr + new_size;
            self.reserve(end)?;
            self.top = end;
            self.last_alloc = Some((ptr, new_size));
            return Ok(ptr);
        }
        let copied = self.read_bytes(ptr, old_size.min(new_size))?;
        let moved = self.malloc(new_size, align)?;
        self.uint8_mut().write(moved, &copied)?;
        Ok(moved)
    }

    fn exn_store(&mut self, handle: u32) -> Result<()> {
        self.exceptions.push(handle);
        Ok(())
    }

    fn call_trampoline(
        &mut self,
        trampoline: &Trampoline,
        a: u32,
        b: u32,
        args: &[u32],
    ) -> Result<()> {
        self.calls.push(TrampolineCall {
            export: trampoline.export.to_string(),
            a,
            b,
            args: args.to_vec(),
        });
        let mut body = self
            .closures
            .remove(&a)
            .ok_or_else(|| GlueError::Guest(format!("no closure at {a:#x}")))?;
        let result = body(self, args);
        if !self.destroyed.iter().any(|&(_, da, _)| da == a) {
            self.closures.insert(a, body);
        }
        result
    }

    fn call_destructor(&mut self, dtor: u32, a: u32, b: u32) -> Result<()> {
        self.destroyed.push((dtor, a, b));
        self.closures.remove(&a);
        Ok(())
    }
}
