//! Initialisation and the running instance.
//!
//! [`Glue`] owns the engine and hands out at most one [`Runtime`]; both the
//! synchronous and the asynchronous path end in the same finalize step.

use std::rc::Rc;

use anyhow::Context;
use gru_glue_core::{abi, GlueError, HostValue};
use serde::Serialize;
use wasmtime::{AsContextMut, Engine, Instance, Linker, Module, Store};

use crate::config::HostConfig;
use crate::event_loop::{self, PumpReport};
use crate::guest::{GuestExports, WasmGuest};
use crate::host::events::Event;
use crate::host::{HostState, HostStats};
use crate::imports::{self, ImportPlan};
use crate::source::ModuleSource;

/// Engine plus the instance, once there is one.
pub struct Glue {
    engine: Engine,
    config: HostConfig,
    runtime: Option<Runtime>,
}

impl Glue {
    pub fn new(config: HostConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            engine: Engine::default(),
            config,
            runtime: None,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn runtime(&mut self) -> Option<&mut Runtime> {
        self.runtime.as_mut()
    }

    pub fn into_runtime(self) -> Option<Runtime> {
        self.runtime
    }

    /// Instantiate an already compiled module. A second call returns the
    /// existing instance.
    pub fn init_sync(&mut self, module: &Module) -> anyhow::Result<&mut Runtime> {
        self.get_or_instantiate(|_| Ok(module.clone()))
    }

    /// Compile `bytes` (binary or text format) and instantiate them.
    pub fn init_sync_bytes(&mut self, bytes: &[u8]) -> anyhow::Result<&mut Runtime> {
        self.get_or_instantiate(|engine| {
            Module::new(engine, bytes).context("compiling module bytes")
        })
    }

    /// Fetch and compile `source` off the current thread, then instantiate.
    pub async fn init(&mut self, source: ModuleSource) -> anyhow::Result<&mut Runtime> {
        let module = match self.runtime {
            Some(_) => None,
            None => {
                log::info!("loading {}", source.describe());
                Some(source.compile(&self.engine).await?)
            }
        };
        self.get_or_instantiate(|_| module.context("module was not compiled"))
    }

    fn get_or_instantiate(
        &mut self,
        compile: impl FnOnce(&Engine) -> anyhow::Result<Module>,
    ) -> anyhow::Result<&mut Runtime> {
        match self.runtime {
            Some(ref mut runtime) => {
                log::debug!("already initialised");
                Ok(runtime)
            }
            None => {
                let module = compile(&self.engine)?;
                let runtime = Runtime::instantiate(&self.engine, &module, self.config.clone())?;
                Ok(self.runtime.insert(runtime))
            }
        }
    }
}

/// Counters for one instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RuntimeStats {
    #[serde(flatten)]
    pub host: HostStats,
    pub live_handles: usize,
    pub heap_capacity: usize,
    pub view_rebuilds: u64,
    pub pending_timeouts: usize,
    pub pending_frames: usize,
    pub pending_requests: usize,
    pub playing_sounds: usize,
    pub clock_ms: f64,
}

impl RuntimeStats {
    /// Nothing left that a pump could run.
    pub fn is_idle(&self) -> bool {
        self.pending_timeouts == 0
            && self.pending_frames == 0
            && self.pending_requests == 0
            && self.playing_sounds == 0
    }
}

/// One live guest instance.
pub struct Runtime {
    store: Store<HostState>,
    instance: Instance,
    exports: Rc<GuestExports>,
    plan: ImportPlan,
    started: bool,
}

impl Runtime {
    fn instantiate(engine: &Engine, module: &Module, config: HostConfig) -> anyhow::Result<Self> {
        let plan = imports::plan(module, &config.imports);
        log::info!(
            "{} of {} import(s) bound",
            plan.bound(),
            plan.imports.len()
        );
        let mut linker = Linker::new(engine);
        imports::link(&mut linker, module, &plan, config.imports.allow_unbound)?;

        let host = HostState::new(config)?;
        let mut store = Store::new(engine, host);
        let instance = linker
            .instantiate(&mut store, module)
            .context("instantiating guest module")?;
        let exports = Rc::new(GuestExports::bind(&mut store, &instance)?);
        store.data_mut().attach(Rc::clone(&exports));

        let mut runtime = Self {
            store,
            instance,
            exports,
            plan,
            started: false,
        };
        runtime.finalize()?;
        Ok(runtime)
    }

    /// Drop stale view caches and run `__wbindgen_start`, once.
    fn finalize(&mut self) -> anyhow::Result<()> {
        self.store.data_mut().glue.finalize();
        if self.started {
            return Ok(());
        }
        self.started = true;
        if let Some(start) = &self.exports.start {
            start
                .call(&mut self.store, ())
                .with_context(|| format!("running `{}`", abi::START))?;
        }
        Ok(())
    }

    fn guest(&mut self) -> WasmGuest<'_> {
        WasmGuest::new(self.store.as_context_mut(), Rc::clone(&self.exports))
    }

    pub fn plan(&self) -> &ImportPlan {
        &self.plan
    }

    pub fn instance(&self) -> Instance {
        self.instance
    }

    pub fn host(&self) -> &HostState {
        self.store.data()
    }

    pub fn host_mut(&mut self) -> &mut HostState {
        self.store.data_mut()
    }

    /// Call the guest's `run` export.
    pub fn run(&mut self) -> anyhow::Result<()> {
        let run = self
            .exports
            .run
            .as_ref()
            .ok_or_else(|| GlueError::MissingExport(abi::RUN.to_string()))?;
        run.call(&mut self.store, ())
            .with_context(|| format!("running `{}`", abi::RUN))
    }

    pub fn pump(&mut self, elapsed_ms: f64) -> PumpReport {
        event_loop::pump(&mut self.guest(), elapsed_ms)
    }

    /// Pump `frames` times, `frame_ms` apart, stopping early once nothing
    /// is pending.
    pub fn run_frames(&mut self, frames: u32, frame_ms: f64) -> PumpReport {
        let mut total = PumpReport::default();
        for _ in 0..frames {
            total.merge(self.pump(frame_ms));
            if self.stats().is_idle() {
                log::debug!("guest is idle after {} ms", self.host().timers.now());
                break;
            }
        }
        total
    }

    /// Dispatch an embedder event; `false` if the guest prevented its default.
    pub fn dispatch_event(&mut self, target: &HostValue, event: Event) -> bool {
        event_loop::dispatch_event(&mut self.guest(), target, event)
    }

    pub fn resize(&mut self, width: u32, height: u32, device_pixel_ratio: f64) {
        event_loop::resize(&mut self.guest(), width, height, device_pixel_ratio);
    }

    pub fn stats(&self) -> RuntimeStats {
        let host = self.host();
        let glue = host.glue.stats();
        RuntimeStats {
            host: host.stats,
            live_handles: glue.live_handles,
            heap_capacity: glue.heap_capacity,
            view_rebuilds: glue.view_rebuilds,
            pending_timeouts: host.timers.pending_timeouts(),
            pending_frames: host.timers.pending_frames(),
            pending_requests: host.xhr.pending(),
            playing_sounds: host.audio.playing(),
            clock_ms: host.timers.now(),
        }
    }

    /// Persist `localStorage` and report the final counters.
    pub fn shutdown(self) -> anyhow::Result<RuntimeStats> {
        let stats = self.stats();
        self.host().storage.save().context("saving localStorage")?;
        log::debug!("runtime shut down: {stats:?}");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imports::Resolution;

    /// A guest that counts `__wbindgen_start` calls, raises one host fault
    /// from `run` and schedules a 10 ms timeout that counts its firings.
    const GUEST: &str = r#"
    (module
      (import "wbg" "__wbg_self_1b7a39e3a92c949c" (func $self (result i32)))
      (import "wbg" "__wbg_eval_6a9e8d5c2f0ab112" (func $eval (param i32 i32) (result i32)))
      (import "wbg" "__wbindgen_closure_wrapper7" (func $wrap (param i32 i32 i32) (result i32)))
      (import "wbg" "__wbg_setTimeout_06458eba2b40711c" (func $set_timeout (param i32 i32 i32) (result i32)))
      (import "wbg" "__wbindgen_object_drop_ref" (func $drop (param i32)))
      (memory (export "memory") 1)
      (table (export "__wbindgen_export_2") 2 funcref)
      (elem (i32.const 1) $dtor)
      (data (i32.const 16) "1 + 1")
      (global $top (mut i32) (i32.const 1024))
      (global $exn (mut i32) (i32.const 0))
      (global $started (mut i32) (i32.const 0))
      (global $ticks (mut i32) (i32.const 0))
      (func (export "__wbindgen_malloc") (param $size i32) (param $align i32) (result i32)
        (local $ptr i32)
        (local.set $ptr
          (i32.and
            (i32.add (global.get $top) (i32.sub (local.get $align) (i32.const 1)))
            (i32.sub (i32.const 0) (local.get $align))))
        (global.set $top (i32.add (local.get $ptr) (local.get $size)))
        (local.get $ptr))
      (func (export "__wbindgen_exn_store") (param i32)
        (global.set $exn (local.get 0)))
      (func (export "__wbindgen_start")
        (global.set $started (i32.add (global.get $started) (i32.const 1))))
      (func $dtor (param i32 i32))
      (func (export "wasm_bindgen__convert__closures__invoke0_mut__h5a4db0c5deadbeef") (param i32 i32)
        (global.set $ticks (i32.add (global.get $ticks) (i32.const 1))))
      (func (export "started") (result i32) (global.get $started))
      (func (export "ticks") (result i32) (global.get $ticks))
      (func (export "exn") (result i32) (global.get $exn))
      (func (export "run")
        (local $w i32)
        (local.set $w (call $self))
        (drop (call $eval (i32.const 16) (i32.const 5)))
        (drop (call $set_timeout
          (local.get $w)
          (call $wrap (i32.const 64) (i32.const 0) (i32.const 0))
          (i32.const 10)))
        (call $drop (local.get $w)))
    )
    "#;

    fn global(runtime: &mut Runtime, name: &str) -> i32 {
        let instance = runtime.instance();
        instance
            .get_typed_func::<(), i32>(&mut runtime.store, name)
            .unwrap()
            .call(&mut runtime.store, ())
            .unwrap()
    }

    #[test]
    fn test_start_runs_once() {
        let mut glue = Glue::new(HostConfig::default()).unwrap();
        let runtime = glue.init_sync_bytes(GUEST.as_bytes()).unwrap();
        assert!(runtime.plan().is_complete());
        assert_eq!(global(runtime, "started"), 1);

        let again = glue.init_sync_bytes(b"not even wasm").unwrap();
        assert_eq!(global(again, "started"), 1);
    }

    #[test]
    fn test_run_faults_and_timeouts() {
        let mut glue = Glue::new(HostConfig::default()).unwrap();
        let runtime = glue.init_sync_bytes(GUEST.as_bytes()).unwrap();
        runtime.run().unwrap();

        let exn = global(runtime, "exn") as u32;
        assert_ne!(exn, 0);
        let fault = runtime.host_mut().glue.heap.value(exn);
        assert!(fault.debug_string().starts_with("NotSupportedError"));
        let stats = runtime.stats();
        assert_eq!(stats.host.host_faults, 1);
        assert_eq!(stats.pending_timeouts, 1);

        assert_eq!(runtime.pump(5.0).timeouts, 0);
        assert_eq!(global(runtime, "ticks"), 0);
        let report = runtime.run_frames(10, 5.0);
        assert_eq!(report.timeouts, 1);
        assert_eq!(global(runtime, "ticks"), 1);
        assert!(runtime.stats().is_idle());

        let runtime = glue.into_runtime().unwrap();
        let stats = runtime.shutdown().unwrap();
        assert_eq!(stats.host.callbacks_run, 1);
    }

    #[test]
    fn test_unbound_imports() {
        let wat = r#"(module (import "wbg" "__wbg_teleport_0123456789abcdef" (func (param i32))))"#;
        let mut glue = Glue::new(HostConfig::default()).unwrap();
        let err = glue.init_sync_bytes(wat.as_bytes()).err().unwrap();
        assert!(format!("{err:#}").contains("unknown symbol"));

        // Stubs are allowed, but the guest still needs the core exports.
        let mut config = HostConfig::default();
        config.imports.allow_unbound = true;
        let mut glue = Glue::new(config).unwrap();
        let err = glue.init_sync_bytes(wat.as_bytes()).err().unwrap();
        assert!(format!("{err:#}").contains(abi::MEMORY));
    }

    #[tokio::test]
    async fn test_async_init_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guest.wat");
        std::fs::write(&path, GUEST).unwrap();
        let mut glue = Glue::new(HostConfig::default()).unwrap();
        let runtime = glue.init(ModuleSource::Path(path)).await.unwrap();
        let planned = &runtime.plan().imports[0];
        assert!(matches!(planned.resolution, Resolution::Bound(b) if b.name == "self"));
        assert_eq!(global(runtime, "started"), 1);
    }

    /// The timeout trampoline releases its own closure while it runs, so the
    /// destructor in table slot 1 fires once the call returns.
    const SELF_DROPPING_GUEST: &str = r#"
    (module
      (import "wbg" "__wbg_self_1b7a39e3a92c949c" (func $self (result i32)))
      (import "wbg" "__wbindgen_closure_wrapper7" (func $wrap (param i32 i32 i32) (result i32)))
      (import "wbg" "__wbg_setTimeout_06458eba2b40711c" (func $set_timeout (param i32 i32 i32) (result i32)))
      (import "wbg" "__wbindgen_cb_drop" (func $cb_drop (param i32) (result i32)))
      (memory (export "memory") 1)
      (table (export "__wbindgen_export_2") 2 funcref)
      (elem (i32.const 1) $dtor)
      (global $top (mut i32) (i32.const 1024))
      (global $cb (mut i32) (i32.const 0))
      (global $dropped (mut i32) (i32.const -1))
      (global $dtors (mut i32) (i32.const 0))
      (func (export "__wbindgen_malloc") (param $size i32) (param $align i32) (result i32)
        (local $ptr i32)
        (local.set $ptr (global.get $top))
        (global.set $top (i32.add (local.get $ptr) (local.get $size)))
        (local.get $ptr))
      (func (export "__wbindgen_exn_store") (param i32))
      (func $dtor (param i32 i32)
        (global.set $dtors (i32.add (global.get $dtors) (i32.const 1))))
      (func (export "wasm_bindgen__convert__closures__invoke0_mut__h5a4db0c5deadbeef") (param i32 i32)
        (global.set $dropped (call $cb_drop (global.get $cb))))
      (func (export "dropped") (result i32) (global.get $dropped))
      (func (export "dtors") (result i32) (global.get $dtors))
      (func (export "run")
        (global.set $cb (call $wrap (i32.const 64) (i32.const 0) (i32.const 0)))
        (drop (call $set_timeout (call $self) (global.get $cb) (i32.const 0))))
    )
    "#;

    #[test]
    fn test_closure_released_during_its_call_is_destroyed_once() {
        let mut config = HostConfig::default();
        config.closures.default_destructor = 1;
        let mut glue = Glue::new(config).unwrap();
        let runtime = glue.init_sync_bytes(SELF_DROPPING_GUEST.as_bytes()).unwrap();
        runtime.run().unwrap();

        let report = runtime.pump(0.0);
        assert_eq!(report.timeouts, 1);
        assert_eq!(report.failures, 0);
        // Still referenced by the running call, so the guest must not free it.
        assert_eq!(global(runtime, "dropped"), 0);
        assert_eq!(global(runtime, "dtors"), 1);

        runtime.pump(10.0);
        assert_eq!(global(runtime, "dtors"), 1);
    }
}
