//! Test fixture: the in-process sandbox guest paired with a host state.

use gru_glue_core::{GlueContext, Guest, HostValue, Sandbox, Trampoline};
use wasmtime::Val;

use crate::config::HostConfig;
use crate::host::{Embedder, HostState};
use crate::imports::{self, catalogue, Args, Ret};

pub struct TestCx {
    pub sandbox: Sandbox,
    pub host: HostState,
}

impl TestCx {
    pub fn new() -> Self {
        Self::with_config(HostConfig::default())
    }

    pub fn with_config(config: HostConfig) -> Self {
        let mut host = HostState::new(config).unwrap();
        let names: Vec<String> = (0..=2)
            .map(|n| Sandbox::trampoline(n).export.to_string())
            .collect();
        host.closures.learn(names.iter().map(String::as_str));
        Self {
            sandbox: Sandbox::new(),
            host,
        }
    }

    /// Call the catalogue entry `name` directly.
    pub fn call(&mut self, name: &str, args: &[Val]) -> anyhow::Result<Ret> {
        self.call_with(name, Args::new(args))
    }

    pub fn call_with(&mut self, name: &str, args: Args<'_>) -> anyhow::Result<Ret> {
        let binding = catalogue()
            .get(name)
            .unwrap_or_else(|| panic!("no catalogue entry `{name}`"));
        imports::call(self, binding, &args)
    }

    /// Put a value in the handle table and return it as an argument.
    pub fn handle(&mut self, value: impl Into<HostValue>) -> Val {
        Val::I32(self.sandbox.heap().insert(value.into()) as i32)
    }

    /// The value behind a returned handle.
    pub fn value(&mut self, ret: Ret) -> HostValue {
        match ret {
            Ret::I32(idx) => self.sandbox.heap().value(idx as u32),
            other => panic!("expected a handle, got {other:?}"),
        }
    }

    /// Copy `s` into guest memory as a `(ptr, len)` argument pair.
    pub fn text(&mut self, s: &str) -> (Val, Val) {
        let (ptr, len) = self.sandbox.write_str(s).unwrap();
        (Val::I32(ptr as i32), Val::I32(len as i32))
    }

    /// A fresh return slot for `(ptr, len)` and `number_get` records.
    pub fn retptr(&mut self) -> Val {
        Val::I32(self.sandbox.write_bytes(&[0; 16], 8).unwrap() as i32)
    }

    pub fn window(&mut self) -> Val {
        let window = self.host.dom.window_value();
        self.handle(window)
    }

    pub fn document(&mut self) -> Val {
        let document = self.host.dom.document_value();
        self.handle(document)
    }
}

impl Guest for TestCx {
    fn glue(&mut self) -> &mut GlueContext {
        self.sandbox.glue()
    }

    fn memory(&self) -> &[u8] {
        self.sandbox.memory()
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        self.sandbox.memory_mut()
    }

    fn malloc(&mut self, size: u32, align: u32) -> gru_glue_core::Result<u32> {
        self.sandbox.malloc(size, align)
    }

    fn has_realloc(&self) -> bool {
        self.sandbox.has_realloc()
    }

    fn realloc(&mut self, ptr: u32, old_size: u32, new_size: u32, align: u32) -> gru_glue_core::Result<u32> {
        self.sandbox.realloc(ptr, old_size, new_size, align)
    }

    fn exn_store(&mut self, handle: u32) -> gru_glue_core::Result<()> {
        self.sandbox.exn_store(handle)
    }

    fn call_trampoline(
        &mut self,
        trampoline: &Trampoline,
        a: u32,
        b: u32,
        args: &[u32],
    ) -> gru_glue_core::Result<()> {
        self.sandbox.call_trampoline(trampoline, a, b, args)
    }

    fn call_destructor(&mut self, dtor: u32, a: u32, b: u32) -> gru_glue_core::Result<()> {
        self.sandbox.call_destructor(dtor, a, b)
    }
}

impl Embedder for TestCx {
    fn host(&mut self) -> &mut HostState {
        &mut self.host
    }
}
