//! The `wbg` import catalogue and the linker glue around it.
//!
//! Every host operation a guest can import is a [`Binding`]: a catalogue
//! name, the symbol it answers for, its wasm signature and an adapter.
//! Import names are matched on symbol and signature; the hash suffix the
//! bindings generator appends is ignored, so hashed variants of the same
//! operation share one adapter.

mod audio;
mod dom;
mod events;
mod gl;
mod intrinsics;
mod js;
mod net;
mod storage;
mod timers;

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::OnceLock;

use anyhow::{anyhow, bail, Context};
use gru_glue_core::abi::{self, ImportName};
use gru_glue_core::string::string_from_guest;
use gru_glue_core::value::short_type_name;
use gru_glue_core::{Callback, GlueError, HostError, HostRef, HostValue};
use wasmtime::{AsContextMut, Caller, ExternType, Linker, Module, Val, ValType};

use crate::config::ImportConfig;
use crate::guest::WasmGuest;
use crate::host::{Embedder, HostState};

// ============================================================
// Signatures and values
// ============================================================

/// A wasm value type as far as the catalogue cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Ty {
    I32,
    I64,
    F32,
    F64,
    Other,
}

impl Ty {
    pub fn of(ty: &ValType) -> Self {
        match ty {
            ValType::I32 => Ty::I32,
            ValType::I64 => Ty::I64,
            ValType::F32 => Ty::F32,
            ValType::F64 => Ty::F64,
            _ => Ty::Other,
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Ty::I32 => "i32",
            Ty::I64 => "i64",
            Ty::F32 => "f32",
            Ty::F64 => "f64",
            Ty::Other => "ref",
        })
    }
}

/// `(i32, i32) -> i32` style rendering.
pub fn signature(params: &[Ty], results: &[Ty]) -> String {
    let list = |tys: &[Ty]| tys.iter().map(Ty::to_string).collect::<Vec<_>>().join(", ");
    match results {
        [] => format!("({})", list(params)),
        [one] => format!("({}) -> {one}", list(params)),
        many => format!("({}) -> ({})", list(params), list(many)),
    }
}

fn val_kind(v: &Val) -> &'static str {
    match v {
        Val::I32(_) => "i32",
        Val::I64(_) => "i64",
        Val::F32(_) => "f32",
        Val::F64(_) => "f64",
        _ => "reference",
    }
}

/// Raw arguments of one import call.
pub struct Args<'a> {
    vals: &'a [Val],
    wrapper: Option<u32>,
}

impl<'a> Args<'a> {
    pub fn new(vals: &'a [Val]) -> Self {
        Self { vals, wrapper: None }
    }

    /// Attach the `N` of a `__wbindgen_closure_wrapper<N>` import.
    pub fn with_wrapper(mut self, wrapper: Option<u32>) -> Self {
        self.wrapper = wrapper;
        self
    }

    pub fn wrapper(&self) -> Option<u32> {
        self.wrapper
    }

    fn arg(&self, i: usize) -> anyhow::Result<&Val> {
        self.vals
            .get(i)
            .ok_or_else(|| anyhow!("missing argument {i} ({} given)", self.vals.len()))
    }

    fn mismatch(&self, expected: &'static str, i: usize) -> anyhow::Error {
        let found = self.vals.get(i).map_or("nothing", val_kind);
        GlueError::TypeMismatch {
            expected,
            found: format!("{found} as argument {i}"),
        }
        .into()
    }

    pub fn i32(&self, i: usize) -> anyhow::Result<i32> {
        self.arg(i)?.i32().ok_or_else(|| self.mismatch("i32", i))
    }

    /// An `i32` the bindings reinterpret with `>>> 0`.
    pub fn u32(&self, i: usize) -> anyhow::Result<u32> {
        Ok(self.i32(i)? as u32)
    }

    pub fn handle(&self, i: usize) -> anyhow::Result<u32> {
        self.u32(i)
    }

    pub fn bool(&self, i: usize) -> anyhow::Result<bool> {
        Ok(self.i32(i)? != 0)
    }

    pub fn f32(&self, i: usize) -> anyhow::Result<f32> {
        self.arg(i)?.f32().ok_or_else(|| self.mismatch("f32", i))
    }

    pub fn f64(&self, i: usize) -> anyhow::Result<f64> {
        self.arg(i)?.f64().ok_or_else(|| self.mismatch("f64", i))
    }
}

/// What an adapter hands back to the guest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ret {
    Unit,
    I32(i32),
    F32(f32),
    F64(f64),
}

impl Ret {
    pub fn bool(b: bool) -> Self {
        Ret::I32(b as i32)
    }

    pub fn u32(v: u32) -> Self {
        Ret::I32(v as i32)
    }

    /// Value returned after a host fault was handed to the guest.
    fn zero(results: &[Ty]) -> Self {
        match results.first() {
            None => Ret::Unit,
            Some(Ty::F32) => Ret::F32(0.0),
            Some(Ty::F64) => Ret::F64(0.0),
            Some(_) => Ret::I32(0),
        }
    }

    fn store(self, results: &mut [Val]) -> anyhow::Result<()> {
        match (self, results) {
            (Ret::Unit, []) => {}
            (Ret::I32(v), [slot]) => *slot = Val::I32(v),
            (Ret::F32(v), [slot]) => *slot = Val::F32(v.to_bits()),
            (Ret::F64(v), [slot]) => *slot = Val::F64(v.to_bits()),
            (ret, results) => bail!("adapter returned {ret:?} for {} result(s)", results.len()),
        }
        Ok(())
    }
}

// ============================================================
// Catalogue
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Namespace {
    /// `__wbg_<symbol>_<hash>`.
    Binding,
    /// `__wbindgen_<name>`.
    Intrinsic,
}

pub type Adapter = fn(&mut dyn Embedder, &Args<'_>) -> anyhow::Result<Ret>;

/// One catalogue entry.
pub struct Binding {
    /// Unique catalogue name, e.g. `Window.setTimeout`.
    pub name: &'static str,
    pub namespace: Namespace,
    pub symbol: &'static str,
    pub params: &'static [Ty],
    pub results: &'static [Ty],
    /// Host errors are handed to the guest instead of trapping.
    pub catch: bool,
    adapter: Adapter,
}

impl Binding {
    pub const fn new(
        name: &'static str,
        symbol: &'static str,
        params: &'static [Ty],
        results: &'static [Ty],
        adapter: Adapter,
    ) -> Self {
        Self {
            name,
            namespace: Namespace::Binding,
            symbol,
            params,
            results,
            catch: false,
            adapter,
        }
    }

    pub const fn intrinsic(
        symbol: &'static str,
        params: &'static [Ty],
        results: &'static [Ty],
        adapter: Adapter,
    ) -> Self {
        Self {
            name: symbol,
            namespace: Namespace::Intrinsic,
            symbol,
            params,
            results,
            catch: false,
            adapter,
        }
    }

    pub const fn catching(mut self) -> Self {
        self.catch = true;
        self
    }

    pub fn matches(&self, params: &[Ty], results: &[Ty]) -> bool {
        self.params == params && self.results == results
    }

    pub fn signature(&self) -> String {
        signature(self.params, self.results)
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("name", &self.name)
            .field("symbol", &self.symbol)
            .field("signature", &self.signature())
            .field("catch", &self.catch)
            .finish()
    }
}

pub struct Catalogue {
    by_name: BTreeMap<&'static str, &'static Binding>,
    by_symbol: BTreeMap<Namespace, BTreeMap<&'static str, Vec<&'static Binding>>>,
}

fn sections() -> [&'static [Binding]; 9] {
    [
        intrinsics::BINDINGS,
        js::BINDINGS,
        dom::BINDINGS,
        events::BINDINGS,
        gl::BINDINGS,
        audio::BINDINGS,
        net::BINDINGS,
        storage::BINDINGS,
        timers::BINDINGS,
    ]
}

impl Catalogue {
    fn build() -> Self {
        let mut by_name = BTreeMap::new();
        let mut by_symbol: BTreeMap<Namespace, BTreeMap<&'static str, Vec<&'static Binding>>> =
            BTreeMap::new();
        for binding in sections().into_iter().flatten() {
            if by_name.insert(binding.name, binding).is_some() {
                log::error!("catalogue entry `{}` is defined twice", binding.name);
            }
            by_symbol
                .entry(binding.namespace)
                .or_default()
                .entry(binding.symbol)
                .or_default()
                .push(binding);
        }
        log::debug!("import catalogue: {} entries", by_name.len());
        Self { by_name, by_symbol }
    }

    pub fn get(&self, name: &str) -> Option<&'static Binding> {
        self.by_name.get(name).copied()
    }

    pub fn candidates(&self, namespace: Namespace, symbol: &str) -> &[&'static Binding] {
        self.by_symbol
            .get(&namespace)
            .and_then(|symbols| symbols.get(symbol))
            .map_or(&[], Vec::as_slice)
    }

    /// Every entry, by name.
    pub fn iter(&self) -> impl Iterator<Item = &'static Binding> + '_ {
        self.by_name.values().copied()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

pub fn catalogue() -> &'static Catalogue {
    static CATALOGUE: OnceLock<Catalogue> = OnceLock::new();
    CATALOGUE.get_or_init(Catalogue::build)
}

// ============================================================
// Resolution
// ============================================================

/// Why an import has no adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unbound {
    /// Imported from a module other than `wbg`.
    ForeignModule,
    NotAFunction,
    UnknownSymbol,
    /// The symbol exists, with these other signatures.
    SignatureMismatch(Vec<String>),
    Ambiguous(Vec<&'static str>),
    /// An override names a catalogue entry that does not exist.
    BadOverride(String),
}

impl fmt::Display for Unbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unbound::ForeignModule => write!(f, "not a `{}` import", abi::IMPORT_MODULE),
            Unbound::NotAFunction => f.write_str("not a function import"),
            Unbound::UnknownSymbol => f.write_str("unknown symbol"),
            Unbound::SignatureMismatch(known) => {
                write!(f, "signature mismatch, catalogue has {}", known.join(" | "))
            }
            Unbound::Ambiguous(names) => {
                write!(f, "ambiguous between {}; add an override", names.join(", "))
            }
            Unbound::BadOverride(name) => write!(f, "override names unknown entry `{name}`"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Bound(&'static Binding),
    Unbound(Unbound),
}

impl Resolution {
    pub fn binding(&self) -> Option<&'static Binding> {
        match self {
            Resolution::Bound(binding) => Some(binding),
            Resolution::Unbound(_) => None,
        }
    }
}

/// Find the adapter for a `wbg` import called `name` with the given type.
pub fn resolve(name: &str, params: &[Ty], results: &[Ty], config: &ImportConfig) -> Resolution {
    let catalogue = catalogue();
    if let Some(target) = config.overrides.get(name) {
        return match catalogue.get(target) {
            Some(binding) if binding.matches(params, results) => Resolution::Bound(binding),
            Some(binding) => Resolution::Unbound(Unbound::SignatureMismatch(vec![binding.signature()])),
            None => Resolution::Unbound(Unbound::BadOverride(target.clone())),
        };
    }

    let parsed = abi::parse_import(name);
    let namespace = match parsed {
        ImportName::Binding { .. } => Namespace::Binding,
        ImportName::Intrinsic(_) | ImportName::ClosureWrapper(_) => Namespace::Intrinsic,
        ImportName::Other(_) => return Resolution::Unbound(Unbound::UnknownSymbol),
    };
    let candidates = catalogue.candidates(namespace, parsed.symbol());
    if candidates.is_empty() {
        return Resolution::Unbound(Unbound::UnknownSymbol);
    }
    let matching: Vec<&'static Binding> = candidates
        .iter()
        .copied()
        .filter(|b| b.matches(params, results))
        .collect();
    match matching.as_slice() {
        [] => Resolution::Unbound(Unbound::SignatureMismatch(
            candidates.iter().map(|b| b.signature()).collect(),
        )),
        [one] => Resolution::Bound(one),
        // An entry named after the bare symbol dispatches on its receiver.
        many => match many.iter().find(|b| b.name == b.symbol) {
            Some(dispatcher) => Resolution::Bound(dispatcher),
            None => Resolution::Unbound(Unbound::Ambiguous(many.iter().map(|b| b.name).collect())),
        },
    }
}

#[derive(Debug, Clone)]
pub struct PlannedImport {
    pub module: String,
    pub name: String,
    pub params: Vec<Ty>,
    pub results: Vec<Ty>,
    pub resolution: Resolution,
    /// `N` of a closure wrapper import.
    pub wrapper: Option<u32>,
}

impl PlannedImport {
    pub fn signature(&self) -> String {
        signature(&self.params, &self.results)
    }
}

/// Resolution of every import of one module, in import order.
#[derive(Debug, Clone, Default)]
pub struct ImportPlan {
    pub imports: Vec<PlannedImport>,
}

impl ImportPlan {
    pub fn bound(&self) -> usize {
        self.imports
            .iter()
            .filter(|i| matches!(i.resolution, Resolution::Bound(_)))
            .count()
    }

    pub fn unbound(&self) -> impl Iterator<Item = (&PlannedImport, &Unbound)> + '_ {
        self.imports.iter().filter_map(|i| match &i.resolution {
            Resolution::Unbound(why) => Some((i, why)),
            Resolution::Bound(_) => None,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.unbound().next().is_none()
    }
}

pub fn plan(module: &Module, config: &ImportConfig) -> ImportPlan {
    let imports = module
        .imports()
        .map(|import| {
            let name = import.name().to_string();
            let wrapper = match abi::parse_import(&name) {
                ImportName::ClosureWrapper(n) => Some(n),
                _ => None,
            };
            let (params, results, resolution) = match import.ty() {
                ExternType::Func(ty) => {
                    let params: Vec<Ty> = ty.params().map(|t| Ty::of(&t)).collect();
                    let results: Vec<Ty> = ty.results().map(|t| Ty::of(&t)).collect();
                    let resolution = if import.module() == abi::IMPORT_MODULE {
                        resolve(&name, &params, &results, config)
                    } else {
                        Resolution::Unbound(Unbound::ForeignModule)
                    };
                    (params, results, resolution)
                }
                _ => (Vec::new(), Vec::new(), Resolution::Unbound(Unbound::NotAFunction)),
            };
            match &resolution {
                Resolution::Bound(binding) => log::debug!("{name} -> {}", binding.name),
                Resolution::Unbound(why) => log::debug!("{name}: {why}"),
            }
            PlannedImport {
                module: import.module().to_string(),
                name,
                params,
                results,
                resolution,
                wrapper,
            }
        })
        .collect();
    ImportPlan { imports }
}

/// Define every bound import of `module` in `linker`.
///
/// Unbound imports are an error unless `allow_unbound` is set, in which case
/// they become stubs that trap when called.
pub fn link(
    linker: &mut Linker<HostState>,
    module: &Module,
    plan: &ImportPlan,
    allow_unbound: bool,
) -> anyhow::Result<()> {
    for (import, planned) in module.imports().zip(&plan.imports) {
        let Resolution::Bound(binding) = planned.resolution else {
            continue;
        };
        let ExternType::Func(ty) = import.ty() else {
            continue;
        };
        let wrapper = planned.wrapper;
        linker
            .func_new(
                import.module(),
                import.name(),
                ty,
                move |mut caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
                    let exports = caller.data().exports.clone().ok_or_else(|| {
                        anyhow!("`{}` called before the guest exports were bound", binding.name)
                    })?;
                    let mut guest = WasmGuest::new(caller.as_context_mut(), exports);
                    let args = Args::new(params).with_wrapper(wrapper);
                    call(&mut guest, binding, &args)?.store(results)
                },
            )
            .with_context(|| format!("defining import `{}`", import.name()))?;
    }

    let unbound: Vec<String> = plan
        .unbound()
        .map(|(import, why)| format!("{}::{} {}: {why}", import.module, import.name, import.signature()))
        .collect();
    if !unbound.is_empty() {
        if !allow_unbound {
            bail!("{} unbound import(s):\n  {}", unbound.len(), unbound.join("\n  "));
        }
        for line in &unbound {
            log::warn!("linking trap stub for {line}");
        }
        linker
            .define_unknown_imports_as_traps(module)
            .context("defining trap stubs")?;
    }
    Ok(())
}

// ============================================================
// Calling
// ============================================================

/// Run one adapter. Host faults of catching bindings go to the guest;
/// everything else is returned and traps.
pub fn call(cx: &mut dyn Embedder, binding: &Binding, args: &Args<'_>) -> anyhow::Result<Ret> {
    cx.host().stats.imports_called += 1;
    match (binding.adapter)(cx, args) {
        Ok(ret) => Ok(ret),
        Err(e) if binding.catch => match e.downcast::<HostError>() {
            Ok(fault) => {
                handle_error(cx, binding.name, fault)?;
                Ok(Ret::zero(binding.results))
            }
            Err(e) => Err(e.context(format!("in `{}`", binding.name))),
        },
        Err(e) => Err(e.context(format!("in `{}`", binding.name))),
    }
}

/// Store `fault` in the handle table and pass it to `__wbindgen_exn_store`.
pub fn handle_error(cx: &mut dyn Embedder, name: &str, fault: HostError) -> anyhow::Result<()> {
    log::warn!("`{name}` raised {fault}");
    cx.host().stats.host_faults += 1;
    let idx = cx.heap().insert(HostValue::from(fault));
    cx.exn_store(idx)
        .with_context(|| format!("storing the exception raised by `{name}`"))?;
    Ok(())
}

// ------------------------------------------------------------
// Helpers shared by the adapter modules
// ------------------------------------------------------------

fn value(cx: &mut dyn Embedder, handle: u32) -> HostValue {
    cx.heap().value(handle)
}

/// A mandatory host object of type `T`. Anything else traps.
fn object<T: Any>(cx: &mut dyn Embedder, handle: u32) -> anyhow::Result<Rc<T>> {
    let v = value(cx, handle);
    v.as_host_ref()
        .and_then(HostRef::downcast_rc::<T>)
        .ok_or_else(|| {
            GlueError::TypeMismatch {
                expected: short_type_name::<T>(),
                found: format!("{} at handle {handle}", v.type_name()),
            }
            .into()
        })
}

/// `null`/`undefined` or a host object of type `T`.
fn optional<T: Any>(cx: &mut dyn Embedder, handle: u32) -> anyhow::Result<Option<Rc<T>>> {
    if value(cx, handle).is_like_none() {
        return Ok(None);
    }
    object(cx, handle).map(Some)
}

fn string(cx: &mut dyn Embedder, ptr: u32, len: u32) -> anyhow::Result<String> {
    Ok(string_from_guest(cx, ptr, len)?)
}

/// Decode the `(ptr, len)` pair at arguments `i` and `i + 1`.
fn string_arg(cx: &mut dyn Embedder, args: &Args<'_>, i: usize) -> anyhow::Result<String> {
    string(cx, args.u32(i)?, args.u32(i + 1)?)
}

fn shared<T: Any>(rc: Rc<T>) -> HostValue {
    HostValue::Object(HostRef::from_rc(rc))
}

fn new_handle(cx: &mut dyn Embedder, value: impl Into<HostValue>) -> Ret {
    Ret::u32(cx.heap().insert(value.into()))
}

fn optional_handle(cx: &mut dyn Embedder, value: HostValue) -> Ret {
    Ret::u32(cx.heap().insert_optional(value))
}

/// A guest callback about to be called with `arity` arguments.
fn callback(cx: &mut dyn Embedder, handle: u32, arity: u32) -> anyhow::Result<Callback> {
    let v = value(cx, handle);
    let cb = v.as_callback().ok_or_else(|| {
        HostError::type_error(format!("{} is not a function", v.type_name()))
    })?;
    Ok(cx.host().closures.retarget(cb, arity))
}

/// Shorthands for signatures in the adapter tables.
mod sig {
    use super::Ty::{self, F32, F64, I32};

    pub const NONE: &[Ty] = &[];
    pub const I: &[Ty] = &[I32];
    pub const II: &[Ty] = &[I32, I32];
    pub const III: &[Ty] = &[I32, I32, I32];
    pub const IIII: &[Ty] = &[I32, I32, I32, I32];
    pub const IIIII: &[Ty] = &[I32, I32, I32, I32, I32];
    pub const F: &[Ty] = &[F32];
    pub const D: &[Ty] = &[F64];
    pub const ID: &[Ty] = &[I32, F64];
    pub const IFFFF: &[Ty] = &[I32, F32, F32, F32, F32];
    pub const IIIF: &[Ty] = &[I32, I32, I32, F32];
    pub const I6: &[Ty] = &[I32, I32, I32, I32, I32, I32];
    pub const I7: &[Ty] = &[I32, I32, I32, I32, I32, I32, I32];
    pub const I10: &[Ty] = &[I32, I32, I32, I32, I32, I32, I32, I32, I32, I32];
}
