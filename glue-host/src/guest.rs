//! The wasmtime side of [`Guest`]: exports of one instance and a store
//! context to call them with.

use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::Context;
use gru_glue_core::{abi, GlueContext, GlueError, Guest, Trampoline};
use wasmtime::{Func, Instance, Memory, Store, StoreContextMut, Table, TypedFunc, Val};

use crate::host::{Embedder, HostState};

/// Exports the host calls back into.
pub struct GuestExports {
    pub memory: Memory,
    malloc: TypedFunc<(i32, i32), i32>,
    realloc: Option<TypedFunc<(i32, i32, i32, i32), i32>>,
    exn_store: Option<TypedFunc<i32, ()>>,
    pub start: Option<TypedFunc<(), ()>>,
    pub run: Option<TypedFunc<(), ()>>,
    destructors: Option<Table>,
    trampolines: BTreeMap<String, Func>,
    trampoline_names: Vec<String>,
}

fn optional_typed<P, R>(
    instance: &Instance,
    store: &mut Store<HostState>,
    name: &str,
) -> anyhow::Result<Option<TypedFunc<P, R>>>
where
    P: wasmtime::WasmParams,
    R: wasmtime::WasmResults,
{
    match instance.get_func(&mut *store, name) {
        Some(func) => func
            .typed::<P, R>(&*store)
            .map(Some)
            .with_context(|| format!("export `{name}` has an unexpected signature")),
        None => Ok(None),
    }
}

impl GuestExports {
    pub fn bind(store: &mut Store<HostState>, instance: &Instance) -> anyhow::Result<Self> {
        let memory = instance
            .get_memory(&mut *store, abi::MEMORY)
            .ok_or_else(|| GlueError::MissingExport(abi::MEMORY.to_string()))?;
        let malloc = optional_typed(instance, store, abi::MALLOC)?
            .ok_or_else(|| GlueError::MissingExport(abi::MALLOC.to_string()))?;
        let realloc = optional_typed(instance, store, abi::REALLOC)?;
        let exn_store = optional_typed(instance, store, abi::EXN_STORE)?;
        let start = optional_typed(instance, store, abi::START)?;
        let run = optional_typed(instance, store, abi::RUN)?;
        let destructors = instance.get_table(&mut *store, abi::DESTRUCTOR_TABLE);

        let trampolines: BTreeMap<String, Func> = instance
            .exports(&mut *store)
            .filter_map(|export| {
                let name = export.name().to_string();
                abi::parse_trampoline(&name)?;
                export.into_func().map(|func| (name, func))
            })
            .collect();
        let trampoline_names = trampolines.keys().cloned().collect();

        if realloc.is_none() {
            log::debug!("guest exports no `{}`; strings are encoded in one pass", abi::REALLOC);
        }
        if exn_store.is_none() {
            log::warn!("guest exports no `{}`; host faults will trap", abi::EXN_STORE);
        }
        if destructors.is_none() {
            log::warn!("guest exports no `{}`; closures cannot be destroyed", abi::DESTRUCTOR_TABLE);
        }
        log::debug!("bound guest exports, {} trampoline(s)", trampolines.len());

        Ok(Self {
            memory,
            malloc,
            realloc,
            exn_store,
            start,
            run,
            destructors,
            trampolines,
            trampoline_names,
        })
    }

    pub fn trampoline_names(&self) -> &[String] {
        &self.trampoline_names
    }
}

fn guest_error(e: anyhow::Error) -> GlueError {
    GlueError::Guest(format!("{e:#}"))
}

/// A guest instance reached through its store.
pub struct WasmGuest<'a> {
    cx: StoreContextMut<'a, HostState>,
    exports: Rc<GuestExports>,
}

impl<'a> WasmGuest<'a> {
    pub fn new(cx: StoreContextMut<'a, HostState>, exports: Rc<GuestExports>) -> Self {
        Self { cx, exports }
    }
}

impl Guest for WasmGuest<'_> {
    fn glue(&mut self) -> &mut GlueContext {
        &mut self.cx.data_mut().glue
    }

    fn memory(&self) -> &[u8] {
        self.exports.memory.data(&self.cx)
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        self.exports.memory.data_mut(&mut self.cx)
    }

    fn malloc(&mut self, size: u32, align: u32) -> gru_glue_core::Result<u32> {
        self.exports
            .malloc
            .call(&mut self.cx, (size as i32, align as i32))
            .map(|ptr| ptr as u32)
            .map_err(guest_error)
    }

    fn has_realloc(&self) -> bool {
        self.exports.realloc.is_some()
    }

    fn realloc(&mut self, ptr: u32, old_size: u32, new_size: u32, align: u32) -> gru_glue_core::Result<u32> {
        let realloc = self
            .exports
            .realloc
            .as_ref()
            .ok_or_else(|| GlueError::MissingExport(abi::REALLOC.to_string()))?;
        realloc
            .call(
                &mut self.cx,
                (ptr as i32, old_size as i32, new_size as i32, align as i32),
            )
            .map(|ptr| ptr as u32)
            .map_err(guest_error)
    }

    fn exn_store(&mut self, handle: u32) -> gru_glue_core::Result<()> {
        let exn_store = self
            .exports
            .exn_store
            .as_ref()
            .ok_or_else(|| GlueError::MissingExport(abi::EXN_STORE.to_string()))?;
        exn_store
            .call(&mut self.cx, handle as i32)
            .map_err(guest_error)
    }

    fn call_trampoline(
        &mut self,
        trampoline: &Trampoline,
        a: u32,
        b: u32,
        args: &[u32],
    ) -> gru_glue_core::Result<()> {
        let func = self
            .exports
            .trampolines
            .get(&*trampoline.export)
            .ok_or_else(|| GlueError::MissingExport(trampoline.export.to_string()))?;
        let params: Vec<Val> = [a, b]
            .iter()
            .chain(args)
            .map(|v| Val::I32(*v as i32))
            .collect();
        let ty = func.ty(&self.cx);
        if ty.params().len() != params.len() {
            return Err(GlueError::TypeMismatch {
                expected: "trampoline taking (a, b, args...)",
                found: format!(
                    "`{}` with {} parameter(s) for {} argument(s)",
                    trampoline.export,
                    ty.params().len(),
                    args.len()
                ),
            });
        }
        let mut results = vec![Val::I32(0); ty.results().len()];
        func.call(&mut self.cx, &params, &mut results)
            .map_err(guest_error)
    }

    fn call_destructor(&mut self, dtor: u32, a: u32, b: u32) -> gru_glue_core::Result<()> {
        let table = self
            .exports
            .destructors
            .ok_or_else(|| GlueError::MissingExport(abi::DESTRUCTOR_TABLE.to_string()))?;
        let func = match table.get(&mut self.cx, dtor) {
            Some(Val::FuncRef(Some(func))) => func,
            _ => {
                return Err(GlueError::Guest(format!(
                    "no destructor in `{}` slot {dtor}",
                    abi::DESTRUCTOR_TABLE
                )))
            }
        };
        let dtor = func
            .typed::<(i32, i32), ()>(&self.cx)
            .map_err(guest_error)?;
        dtor.call(&mut self.cx, (a as i32, b as i32))
            .map_err(guest_error)
    }
}

impl Embedder for WasmGuest<'_> {
    fn host(&mut self) -> &mut HostState {
        self.cx.data_mut()
    }
}
