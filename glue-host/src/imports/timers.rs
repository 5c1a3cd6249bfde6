//! `setTimeout` and `requestAnimationFrame` on the window.

use super::sig::*;
use super::{callback, object, Args, Binding, Ret};
use crate::host::dom::Window;
use crate::host::Embedder;

pub(super) static BINDINGS: &[Binding] = &[
    Binding::new("Window.setTimeout", "setTimeout", III, I, set_timeout).catching(),
    Binding::new("Window.clearTimeout", "clearTimeout", II, NONE, clear_timeout),
    Binding::new("Window.requestAnimationFrame", "requestAnimationFrame", II, I, request_animation_frame)
        .catching(),
    Binding::new("Window.cancelAnimationFrame", "cancelAnimationFrame", II, NONE, cancel_animation_frame)
        .catching(),
];

/// `(window, handler, delay)`; the handler is called without arguments.
fn set_timeout(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    object::<Window>(cx, args.handle(0)?)?;
    let cb = callback(cx, args.handle(1)?, 0)?;
    let delay = args.i32(2)?;
    let id = cx.host().timers.set_timeout(cb, delay);
    log::trace!("setTimeout #{id} in {delay} ms");
    Ok(Ret::u32(id))
}

fn clear_timeout(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    object::<Window>(cx, args.handle(0)?)?;
    cx.host().timers.clear_timeout(args.u32(1)?);
    Ok(Ret::Unit)
}

/// The frame callback receives the frame timestamp.
fn request_animation_frame(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    object::<Window>(cx, args.handle(0)?)?;
    let cb = callback(cx, args.handle(1)?, 1)?;
    Ok(Ret::u32(cx.host().timers.request_frame(cb)))
}

fn cancel_animation_frame(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    object::<Window>(cx, args.handle(0)?)?;
    cx.host().timers.cancel_frame(args.u32(1)?);
    Ok(Ret::Unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestCx;
    use wasmtime::Val;

    #[test]
    fn test_timeouts_register_and_clear() {
        let mut cx = TestCx::new();
        let window = cx.window();
        let cb = cx.sandbox.closure(0, |_, _| Ok(()));
        let h = cx.handle(cb);
        let Ret::I32(first) = cx.call("Window.setTimeout", &[window.clone(), h.clone(), Val::I32(100)]).unwrap() else {
            panic!()
        };
        let Ret::I32(second) = cx.call("Window.setTimeout", &[window.clone(), h, Val::I32(-5)]).unwrap() else {
            panic!()
        };
        assert_ne!(first, second);
        assert_eq!(cx.host.timers.due_timeouts(), vec![second as u32]);
        assert_eq!(cx.host.timers.next_due_in(), Some(0.0));

        cx.call("Window.clearTimeout", &[window.clone(), Val::I32(second)]).unwrap();
        // Clearing twice is harmless.
        cx.call("Window.clearTimeout", &[window, Val::I32(second)]).unwrap();
        assert_eq!(cx.host.timers.pending_timeouts(), 1);
        assert_eq!(cx.host.timers.next_due_in(), Some(100.0));
    }

    #[test]
    fn test_non_function_handler_is_a_type_error() {
        let mut cx = TestCx::new();
        let window = cx.window();
        let not_fn = cx.handle(3.0);
        assert_eq!(
            cx.call("Window.requestAnimationFrame", &[window, not_fn]).unwrap(),
            Ret::I32(0)
        );
        let err = cx.sandbox.take_exception().unwrap();
        assert_eq!(err.debug_string(), "TypeError: number is not a function");
        assert_eq!(cx.host.timers.pending_frames(), 0);
    }

    #[test]
    fn test_frames() {
        let mut cx = TestCx::new();
        let window = cx.window();
        let cb = cx.sandbox.closure(1, |_, _| Ok(()));
        let h = cx.handle(cb);
        let Ret::I32(id) = cx.call("Window.requestAnimationFrame", &[window.clone(), h]).unwrap() else {
            panic!()
        };
        assert_eq!(cx.host.timers.frame_ids(), vec![id as u32]);
        cx.call("Window.cancelAnimationFrame", &[window, Val::I32(id)]).unwrap();
        assert_eq!(cx.host.timers.pending_frames(), 0);
    }
}
