//! `__wbindgen_*` intrinsics: handle table, value probes, strings, closures.

use anyhow::{anyhow, bail};
use gru_glue_core::string::{write_number_ret, write_string_ret};
use gru_glue_core::{GlueError, HostValue};

use super::sig::*;
use super::{new_handle, string_arg, value, Args, Binding, Ret};
use crate::host::typed_array::GuestMemory;
use crate::host::Embedder;

pub(super) static BINDINGS: &[Binding] = &[
    Binding::intrinsic("object_drop_ref", I, NONE, object_drop_ref),
    Binding::intrinsic("object_clone_ref", I, I, object_clone_ref),
    Binding::intrinsic("string_new", II, I, string_new),
    Binding::intrinsic("string_get", II, NONE, string_get),
    Binding::intrinsic("number_new", D, I, number_new),
    Binding::intrinsic("number_get", II, NONE, number_get),
    Binding::intrinsic("boolean_get", I, I, boolean_get),
    Binding::intrinsic("is_undefined", I, I, is_undefined),
    Binding::intrinsic("is_object", I, I, is_object),
    Binding::intrinsic("is_string", I, I, is_string),
    Binding::intrinsic("is_function", I, I, is_function),
    Binding::intrinsic("debug_string", II, NONE, debug_string),
    Binding::intrinsic("throw", II, NONE, throw),
    Binding::intrinsic("cb_drop", I, I, cb_drop),
    Binding::intrinsic("memory", NONE, I, memory),
    Binding::intrinsic("closure_wrapper", III, I, closure_wrapper),
];

fn object_drop_ref(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    cx.heap().drop_ref(args.handle(0)?);
    Ok(Ret::Unit)
}

fn object_clone_ref(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let idx = args.handle(0)?;
    let clone = cx.heap().clone_ref(idx).ok_or(GlueError::InvalidHandle(idx))?;
    Ok(Ret::u32(clone))
}

fn string_new(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let s = string_arg(cx, args, 0)?;
    Ok(new_handle(cx, s))
}

fn string_get(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let v = value(cx, args.handle(1)?);
    write_string_ret(cx, args.u32(0)?, v.as_str())?;
    Ok(Ret::Unit)
}

fn number_new(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let n = args.f64(0)?;
    Ok(new_handle(cx, n))
}

fn number_get(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let v = value(cx, args.handle(1)?);
    write_number_ret(cx, args.u32(0)?, v.as_f64())?;
    Ok(Ret::Unit)
}

/// `1`/`0` for booleans, `2` for anything else.
fn boolean_get(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(Ret::I32(match value(cx, args.handle(0)?) {
        HostValue::Bool(b) => b as i32,
        _ => 2,
    }))
}

fn is_undefined(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(Ret::bool(value(cx, args.handle(0)?).is_undefined()))
}

fn is_object(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(Ret::bool(value(cx, args.handle(0)?).is_object()))
}

fn is_string(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(Ret::bool(value(cx, args.handle(0)?).is_string()))
}

fn is_function(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(Ret::bool(value(cx, args.handle(0)?).is_function()))
}

fn debug_string(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let text = value(cx, args.handle(1)?).debug_string();
    write_string_ret(cx, args.u32(0)?, Some(&text))?;
    Ok(Ret::Unit)
}

fn throw(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let message = string_arg(cx, args, 0)?;
    bail!("guest threw: {message}")
}

/// Returns `1` when the guest must free the closure itself.
fn cb_drop(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let idx = args.handle(0)?;
    let v = cx.heap().take_value(idx);
    let cb = v.as_callback().ok_or_else(|| GlueError::TypeMismatch {
        expected: "function",
        found: format!("{} at handle {idx}", v.type_name()),
    })?;
    Ok(Ret::bool(cb.release()))
}

fn memory(cx: &mut dyn Embedder, _args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(new_handle(cx, HostValue::object(GuestMemory)))
}

fn closure_wrapper(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let wrapper = args
        .wrapper()
        .ok_or_else(|| anyhow!("closure wrapper called without a wrapper number"))?;
    let cb = cx.host().closures.wrap(wrapper, args.u32(0)?, args.u32(1)?)?;
    log::trace!("closure wrapper {wrapper}: {cb:?}");
    Ok(new_handle(cx, cb))
}
