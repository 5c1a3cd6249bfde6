//! Language builtins: globals, plain objects, `Reflect`, functions, typed
//! arrays, `crypto`, `performance` and the console.

use gru_glue_core::{HostError, HostValue};

use super::sig::*;
use super::{new_handle, object, optional_handle, string_arg, value, Args, Binding, Ret};
use crate::host::js::{self, Crypto, JsObject, NativeFunction, Performance};
use crate::host::typed_array::{self, ArrayBuffer, GuestBuffer, GuestMemory, Uint8Array};
use crate::host::Embedder;

pub(super) static BINDINGS: &[Binding] = &[
    // Globals
    Binding::new("self", "self", NONE, I, global).catching(),
    Binding::new("window", "window", NONE, I, global).catching(),
    Binding::new("globalThis", "globalThis", NONE, I, global).catching(),
    Binding::new("global", "global", NONE, I, global).catching(),
    Binding::new("eval", "eval", II, I, eval).catching(),
    Binding::new("require", "require", NONE, I, require).catching(),
    Binding::new("crypto", "crypto", I, I, crypto),
    Binding::new("msCrypto", "msCrypto", I, I, ms_crypto),
    Binding::new("process", "process", I, I, process),
    Binding::new("versions", "versions", I, I, versions),
    Binding::new("node", "node", I, I, node),
    Binding::new("performance", "performance", I, I, performance),
    // Objects and functions
    Binding::new("Object.new", "new", NONE, I, object_new),
    Binding::new("Object.is", "is", II, I, object_is),
    Binding::new("Object.get", "get", III, I, object_get),
    Binding::new("get", "get", II, I, get).catching(),
    Binding::new("Reflect.get", "get", II, I, reflect_get).catching(),
    Binding::new("Array.get", "get", II, I, array_get),
    Binding::new("Reflect.set", "set", III, I, reflect_set).catching(),
    Binding::new("Function.new", "newnoargs", II, I, function_new),
    Binding::new("Function.call0", "call", II, I, call0).catching(),
    Binding::new("Function.call1", "call", III, I, call1).catching(),
    Binding::new("length", "length", I, I, length),
    // Typed arrays
    Binding::new("Uint8Array.new", "new", I, I, uint8_array_new),
    Binding::new("Uint8Array.newWithLength", "newwithlength", I, I, uint8_array_with_length),
    Binding::new("Uint8Array.newWithByteOffset", "newwithbyteoffset", II, I, uint8_array_with_offset),
    Binding::new(
        "Uint8Array.newWithByteOffsetAndLength",
        "newwithbyteoffsetandlength",
        III,
        I,
        uint8_array_with_offset_and_length,
    ),
    Binding::new("Uint8Array.subarray", "subarray", III, I, subarray),
    Binding::new("Uint8Array.set", "set", III, NONE, uint8_array_set),
    Binding::new("buffer", "buffer", I, I, buffer),
    // crypto, performance, console
    Binding::new("Crypto.getRandomValues", "getRandomValues", II, NONE, get_random_values).catching(),
    Binding::new("Crypto.randomFillSync", "randomFillSync", II, NONE, random_fill_sync).catching(),
    Binding::new("Performance.now", "now", I, D, now),
    Binding::new("console.log", "log", II, NONE, console_log),
    Binding::new("console.error", "error", II, NONE, console_error),
];

// ------------------------------------------------------------
// Globals
// ------------------------------------------------------------

/// `self`, `window`, `globalThis` and `global` are all the window.
fn global(cx: &mut dyn Embedder, _args: &Args<'_>) -> anyhow::Result<Ret> {
    let window = cx.host().dom.window_value();
    Ok(new_handle(cx, window))
}

fn eval(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let source = string_arg(cx, args, 0)?;
    log::debug!("refusing to eval {} byte(s) of script", source.len());
    Err(HostError::not_supported("eval is not available").into())
}

fn require(_cx: &mut dyn Embedder, _args: &Args<'_>) -> anyhow::Result<Ret> {
    Err(HostError::reference("module is not defined").into())
}

/// `receiver[name]`, always handed back as a fresh handle.
fn property_of(cx: &mut dyn Embedder, args: &Args<'_>, name: &str) -> anyhow::Result<Ret> {
    let receiver = value(cx, args.handle(0)?);
    let property = js::property(&receiver, name);
    Ok(new_handle(cx, property))
}

fn crypto(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    property_of(cx, args, "crypto")
}

fn ms_crypto(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    property_of(cx, args, "msCrypto")
}

fn process(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    property_of(cx, args, "process")
}

fn versions(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    property_of(cx, args, "versions")
}

fn node(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    property_of(cx, args, "node")
}

fn performance(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let receiver = value(cx, args.handle(0)?);
    let performance = js::property(&receiver, "performance");
    Ok(optional_handle(cx, performance))
}

// ------------------------------------------------------------
// Objects and functions
// ------------------------------------------------------------

fn object_new(cx: &mut dyn Embedder, _args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(new_handle(cx, HostValue::object(JsObject::new())))
}

fn object_is(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let a = value(cx, args.handle(0)?);
    let b = value(cx, args.handle(1)?);
    Ok(Ret::bool(a.same_value(&b)))
}

/// `obj[name]` with the name passed as a string.
fn object_get(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let receiver = value(cx, args.handle(0)?);
    let name = string_arg(cx, args, 1)?;
    let property = js::property(&receiver, &name);
    Ok(optional_handle(cx, property))
}

/// Arrays are indexed by a raw number, everything else goes through
/// `Reflect.get` with a key handle.
fn get(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    match value(cx, args.handle(0)?) {
        HostValue::Array(_) => array_get(cx, args),
        _ => reflect_get(cx, args),
    }
}

fn reflect_get(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let target = value(cx, args.handle(0)?);
    let key = value(cx, args.handle(1)?);
    let got = js::reflect_get(&target, &key)?;
    Ok(new_handle(cx, got))
}

fn array_get(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let target = value(cx, args.handle(0)?);
    let index = args.u32(1)?;
    let item = js::property(&target, &index.to_string());
    Ok(new_handle(cx, item))
}

fn reflect_set(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let target = value(cx, args.handle(0)?);
    let key = value(cx, args.handle(1)?);
    let v = value(cx, args.handle(2)?);
    Ok(Ret::bool(js::reflect_set(&target, &key, v)?))
}

fn function_new(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let source = string_arg(cx, args, 0)?;
    Ok(new_handle(cx, HostValue::object(NativeFunction { source })))
}

/// `f.call(this, ...args)` for host functions and guest closures.
fn call_function(
    cx: &mut dyn Embedder,
    args: &Args<'_>,
    call_args: Vec<HostValue>,
) -> anyhow::Result<Ret> {
    let f = value(cx, args.handle(0)?);
    let this = value(cx, args.handle(1)?);
    let result = match &f {
        HostValue::Function(cb) => {
            let cb = cx.host().closures.retarget(cb, call_args.len() as u32);
            cb.invoke(cx, call_args)?;
            HostValue::Undefined
        }
        other => match other.downcast::<NativeFunction>() {
            Some(native) => {
                let window = cx.host().dom.window_value();
                native.call(&this, window)?
            }
            None => {
                return Err(HostError::type_error(format!("{} is not a function", other.type_name())).into())
            }
        },
    };
    Ok(new_handle(cx, result))
}

fn call0(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    call_function(cx, args, Vec::new())
}

fn call1(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let arg = value(cx, args.handle(2)?);
    call_function(cx, args, vec![arg])
}

/// `.length` of a typed array, array or string.
fn length(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let receiver = value(cx, args.handle(0)?);
    let len = js::property(&receiver, "length").as_f64().unwrap_or(0.0);
    Ok(Ret::u32(len as u32))
}

// ------------------------------------------------------------
// Typed arrays
// ------------------------------------------------------------

fn is_buffer(v: &HostValue) -> bool {
    v.as_host_ref()
        .is_some_and(|r| r.is::<ArrayBuffer>() || r.is::<GuestBuffer>())
}

/// `new Uint8Array(x)`: a view when `x` is a buffer, a copy otherwise.
fn uint8_array_new(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let source = value(cx, args.handle(0)?);
    let array = if is_buffer(&source) {
        let memory_len = cx.memory().len();
        Uint8Array::view(&source, 0, None, memory_len)?
    } else if let Some(len) = source.as_f64() {
        Uint8Array::with_length(len as u32)
    } else {
        Uint8Array::from_bytes(typed_array::source_bytes(cx, &source)?)
    };
    Ok(new_handle(cx, HostValue::object(array)))
}

fn uint8_array_with_length(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let array = Uint8Array::with_length(args.u32(0)?);
    Ok(new_handle(cx, HostValue::object(array)))
}

fn uint8_array_with_offset(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let buffer = value(cx, args.handle(0)?);
    let memory_len = cx.memory().len();
    let array = Uint8Array::view(&buffer, args.u32(1)?, None, memory_len)?;
    Ok(new_handle(cx, HostValue::object(array)))
}

fn uint8_array_with_offset_and_length(
    cx: &mut dyn Embedder,
    args: &Args<'_>,
) -> anyhow::Result<Ret> {
    let buffer = value(cx, args.handle(0)?);
    let memory_len = cx.memory().len();
    let array = Uint8Array::view(&buffer, args.u32(1)?, Some(args.u32(2)?), memory_len)?;
    Ok(new_handle(cx, HostValue::object(array)))
}

fn subarray(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let array = object::<Uint8Array>(cx, args.handle(0)?)?;
    let sub = array.subarray(args.u32(1)?, args.u32(2)?);
    Ok(new_handle(cx, HostValue::object(sub)))
}

/// `target.set(source, offset)`.
fn uint8_array_set(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let target = object::<Uint8Array>(cx, args.handle(0)?)?;
    let source = value(cx, args.handle(1)?);
    let bytes = typed_array::source_bytes(cx, &source)?;
    target.write(cx, args.u32(2)?, &bytes)?;
    Ok(Ret::Unit)
}

/// `.buffer` of `WebAssembly.Memory` or of a typed array.
fn buffer(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let receiver = value(cx, args.handle(0)?);
    let buffer = if receiver.downcast::<GuestMemory>().is_some() {
        HostValue::object(GuestBuffer)
    } else if let Some(array) = receiver.downcast::<Uint8Array>() {
        array.buffer()
    } else {
        HostValue::Undefined
    };
    Ok(new_handle(cx, buffer))
}

// ------------------------------------------------------------
// crypto, performance, console
// ------------------------------------------------------------

fn get_random_values(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    object::<Crypto>(cx, args.handle(0)?)?;
    let array = object::<Uint8Array>(cx, args.handle(1)?)?;
    typed_array::fill_random(cx, &array)?;
    Ok(Ret::Unit)
}

/// Node's `crypto.randomFillSync`, which takes ownership of the array.
fn random_fill_sync(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let array = cx.heap().take_value(args.handle(1)?);
    let array = array.downcast::<Uint8Array>().ok_or_else(|| {
        HostError::type_error(format!("{} is not a Uint8Array", array.type_name()))
    })?;
    typed_array::fill_random(cx, array)?;
    Ok(Ret::Unit)
}

fn now(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    object::<Performance>(cx, args.handle(0)?)?;
    Ok(Ret::F64(cx.host().timers.now()))
}

fn console_log(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let message = string_arg(cx, args, 0)?;
    log::info!(target: "guest", "{message}");
    Ok(Ret::Unit)
}

fn console_error(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let first = value(cx, args.handle(0)?);
    let second = value(cx, args.handle(1)?);
    log::error!(target: "guest", "{} {}", js::display(&first), js::display(&second));
    Ok(Ret::Unit)
}
