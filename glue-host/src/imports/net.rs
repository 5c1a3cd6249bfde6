//! `XMLHttpRequest`.
//!
//! `send` only queues the request. Responses and their `load`/`error` and
//! `loadend` events are delivered by the event loop.

use gru_glue_core::HostValue;

use super::sig::*;
use super::{new_handle, object, string_arg, Args, Binding, Ret};
use crate::host::xhr::XmlHttpRequest;
use crate::host::Embedder;

pub(super) static BINDINGS: &[Binding] = &[
    Binding::new("XMLHttpRequest.new", "new", NONE, I, new).catching(),
    Binding::new("XMLHttpRequest.open", "open", I6, NONE, open).catching(),
    Binding::new("XMLHttpRequest.setresponseType", "setresponseType", II, NONE, set_response_type),
    Binding::new("XMLHttpRequest.send", "send", I, NONE, send).catching(),
    Binding::new("XMLHttpRequest.readyState", "readyState", I, I, ready_state),
    Binding::new("XMLHttpRequest.status", "status", I, I, status).catching(),
    Binding::new("XMLHttpRequest.response", "response", I, I, response).catching(),
];

fn new(cx: &mut dyn Embedder, _args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(new_handle(cx, HostValue::object(XmlHttpRequest::new())))
}

/// `(xhr, method_ptr, method_len, url_ptr, url_len, async)`.
fn open(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let xhr = object::<XmlHttpRequest>(cx, args.handle(0)?)?;
    let method = string_arg(cx, args, 1)?;
    let url = string_arg(cx, args, 3)?;
    xhr.open(&method, &url, args.bool(5)?)?;
    log::debug!("XMLHttpRequest opened: {} {url}", xhr.method());
    Ok(Ret::Unit)
}

/// The response type arrives as an owned string handle.
fn set_response_type(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let xhr = object::<XmlHttpRequest>(cx, args.handle(0)?)?;
    let ty = cx.heap().take_value(args.handle(1)?);
    xhr.set_response_type(ty.as_str().unwrap_or_default())?;
    Ok(Ret::Unit)
}

fn send(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let xhr = object::<XmlHttpRequest>(cx, args.handle(0)?)?;
    cx.host().xhr.send(xhr)?;
    Ok(Ret::Unit)
}

fn ready_state(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let xhr = object::<XmlHttpRequest>(cx, args.handle(0)?)?;
    Ok(Ret::I32(xhr.ready_state().into()))
}

fn status(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let xhr = object::<XmlHttpRequest>(cx, args.handle(0)?)?;
    Ok(Ret::I32(xhr.status().into()))
}

fn response(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let xhr = object::<XmlHttpRequest>(cx, args.handle(0)?)?;
    let body = xhr.response();
    Ok(new_handle(cx, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::host::typed_array::ArrayBuffer;
    use crate::host::xhr::{Outcome, DONE, OPENED};
    use crate::testing::TestCx;
    use wasmtime::Val;

    fn request(cx: &mut TestCx, method: &str, url: &str) -> Val {
        let Ret::I32(h) = cx.call("XMLHttpRequest.new", &[]).unwrap() else { panic!() };
        let xhr = Val::I32(h);
        let (mp, ml) = cx.text(method);
        let (up, ul) = cx.text(url);
        cx.call("XMLHttpRequest.open", &[xhr.clone(), mp, ml, up, ul, Val::I32(1)])
            .unwrap();
        xhr
    }

    #[test]
    fn test_file_request_resolves_on_pump() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("level.bin"), [1u8, 2, 3]).unwrap();
        let mut config = HostConfig::default();
        config.fetch.base_dir = dir.path().to_path_buf();
        let mut cx = TestCx::with_config(config);

        let xhr = request(&mut cx, "get", "/level.bin?v=2");
        assert_eq!(cx.call("XMLHttpRequest.readyState", &[xhr.clone()]).unwrap(), Ret::I32(OPENED.into()));
        let ty = cx.handle("arraybuffer");
        cx.call("XMLHttpRequest.setresponseType", &[xhr.clone(), ty]).unwrap();
        cx.call("XMLHttpRequest.send", &[xhr.clone()]).unwrap();
        assert_eq!(cx.host.xhr.pending(), 1);
        assert_eq!(cx.call("XMLHttpRequest.status", &[xhr.clone()]).unwrap(), Ret::I32(0));

        let done = cx.host.xhr.resolve_all();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].1, Outcome::Loaded { status: 200, body: vec![1, 2, 3] });
        assert_eq!(cx.call("XMLHttpRequest.readyState", &[xhr.clone()]).unwrap(), Ret::I32(DONE.into()));
        assert_eq!(cx.call("XMLHttpRequest.status", &[xhr.clone()]).unwrap(), Ret::I32(200));
        let body = cx.call("XMLHttpRequest.response", &[xhr]).unwrap();
        let body = cx.value(body);
        assert_eq!(body.downcast::<ArrayBuffer>().unwrap().to_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn test_forbidden_method_and_unopened_send_are_caught() {
        let mut cx = TestCx::new();
        let Ret::I32(h) = cx.call("XMLHttpRequest.new", &[]).unwrap() else { panic!() };
        let xhr = Val::I32(h);
        let (mp, ml) = cx.text("TRACE");
        let (up, ul) = cx.text("/x");
        assert_eq!(
            cx.call("XMLHttpRequest.open", &[xhr.clone(), mp, ml, up, ul, Val::I32(1)])
                .unwrap(),
            Ret::Unit
        );
        let err = cx.sandbox.take_exception().unwrap();
        assert!(err.debug_string().starts_with("SecurityError"), "{}", err.debug_string());

        // Not opened yet.
        cx.call("XMLHttpRequest.send", &[xhr]).unwrap();
        assert!(cx.sandbox.take_exception().unwrap().debug_string().starts_with("InvalidStateError"));
        assert_eq!(cx.host.xhr.pending(), 0);
    }
}
