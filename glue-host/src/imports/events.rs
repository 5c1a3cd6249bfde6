//! Event targets and the event objects handed to listeners.

use std::rc::Rc;

use gru_glue_core::string::write_string_ret;
use gru_glue_core::HostError;

use super::sig::*;
use super::{callback, object, optional_handle, string_arg, value, Args, Binding, Ret};
use crate::host::events::{listeners_of, once_option, Event, MouseDetail};
use crate::host::Embedder;

pub(super) static BINDINGS: &[Binding] = &[
    Binding::new(
        "EventTarget.addEventListenerWithOptions",
        "addEventListener",
        IIIII,
        NONE,
        add_event_listener_with_options,
    )
    .catching(),
    Binding::new("EventTarget.addEventListener", "addEventListener", IIII, NONE, add_event_listener)
        .catching(),
    Binding::new(
        "EventTarget.removeEventListener",
        "removeEventListener",
        IIII,
        NONE,
        remove_event_listener,
    )
    .catching(),
    // Event
    Binding::new("Event.preventDefault", "preventDefault", I, NONE, prevent_default),
    Binding::new("Event.stopPropagation", "stopPropagation", I, NONE, stop_propagation),
    Binding::new("Event.cancelBubble", "cancelBubble", I, I, cancel_bubble),
    Binding::new("Event.target", "target", I, I, target),
    // KeyboardEvent
    Binding::new("KeyboardEvent.key", "key", II, NONE, key),
    Binding::new("KeyboardEvent.code", "code", II, NONE, code),
    Binding::new("KeyboardEvent.keyCode", "keyCode", I, I, key_code),
    Binding::new("KeyboardEvent.charCode", "charCode", I, I, char_code),
    Binding::new("KeyboardEvent.getModifierState", "getModifierState", III, I, modifier_state),
    Binding::new("shiftKey", "shiftKey", I, I, shift_key),
    Binding::new("ctrlKey", "ctrlKey", I, I, ctrl_key),
    Binding::new("altKey", "altKey", I, I, alt_key),
    Binding::new("metaKey", "metaKey", I, I, meta_key),
    // MouseEvent, PointerEvent, WheelEvent
    Binding::new("MouseEvent.clientX", "clientX", I, I, client_x),
    Binding::new("MouseEvent.clientY", "clientY", I, I, client_y),
    Binding::new("MouseEvent.offsetX", "offsetX", I, I, offset_x),
    Binding::new("MouseEvent.offsetY", "offsetY", I, I, offset_y),
    Binding::new("MouseEvent.movementX", "movementX", I, I, movement_x),
    Binding::new("MouseEvent.movementY", "movementY", I, I, movement_y),
    Binding::new("MouseEvent.button", "button", I, I, button),
    Binding::new("MouseEvent.buttons", "buttons", I, I, buttons),
    Binding::new("PointerEvent.pointerId", "pointerId", I, I, pointer_id),
    Binding::new("WheelEvent.deltaX", "deltaX", I, D, delta_x),
    Binding::new("WheelEvent.deltaY", "deltaY", I, D, delta_y),
    Binding::new("WheelEvent.deltaMode", "deltaMode", I, I, delta_mode),
];

// ------------------------------------------------------------
// Listeners
// ------------------------------------------------------------

fn listen(
    cx: &mut dyn Embedder,
    args: &Args<'_>,
    once: bool,
) -> anyhow::Result<Ret> {
    let target = value(cx, args.handle(0)?);
    let kind = string_arg(cx, args, 1)?;
    let cb = callback(cx, args.handle(3)?, 1)?;
    let listeners = listeners_of(&target).ok_or_else(|| {
        HostError::type_error(format!("{} is not an event target", target.type_name()))
    })?;
    if listeners.add(&kind, cb, once) {
        log::debug!("listening for `{kind}` on {}", target.type_name());
    }
    Ok(Ret::Unit)
}

fn add_event_listener(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    listen(cx, args, false)
}

fn add_event_listener_with_options(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let options = value(cx, args.handle(4)?);
    listen(cx, args, once_option(&options))
}

fn remove_event_listener(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let target = value(cx, args.handle(0)?);
    let kind = string_arg(cx, args, 1)?;
    let cb = callback(cx, args.handle(3)?, 1)?;
    let listeners = listeners_of(&target).ok_or_else(|| {
        HostError::type_error(format!("{} is not an event target", target.type_name()))
    })?;
    listeners.remove(&kind, &cb);
    Ok(Ret::Unit)
}

// ------------------------------------------------------------
// Event
// ------------------------------------------------------------

fn event(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Rc<Event>> {
    object::<Event>(cx, args.handle(0)?)
}

fn prevent_default(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    event(cx, args)?.prevent_default();
    Ok(Ret::Unit)
}

fn stop_propagation(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    event(cx, args)?.stop_propagation();
    Ok(Ret::Unit)
}

fn cancel_bubble(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(Ret::bool(event(cx, args)?.propagation_stopped()))
}

fn target(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let target = event(cx, args)?.target();
    Ok(optional_handle(cx, target))
}

// ------------------------------------------------------------
// KeyboardEvent
// ------------------------------------------------------------

fn key(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ev = object::<Event>(cx, args.handle(1)?)?;
    let key = ev.keyboard_detail().map(|k| k.key.clone()).unwrap_or_default();
    write_string_ret(cx, args.u32(0)?, Some(&key))?;
    Ok(Ret::Unit)
}

fn code(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ev = object::<Event>(cx, args.handle(1)?)?;
    let code = ev.keyboard_detail().map(|k| k.code.clone()).unwrap_or_default();
    write_string_ret(cx, args.u32(0)?, Some(&code))?;
    Ok(Ret::Unit)
}

fn key_code(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ev = event(cx, args)?;
    Ok(Ret::u32(ev.keyboard_detail().map_or(0, |k| k.key_code)))
}

fn char_code(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ev = event(cx, args)?;
    Ok(Ret::u32(ev.keyboard_detail().map_or(0, |k| k.char_code)))
}

fn modifier_state(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ev = event(cx, args)?;
    let key = string_arg(cx, args, 1)?;
    Ok(Ret::bool(ev.modifiers().state(&key)))
}

// The modifier flags are imported once for keyboard and once for mouse
// events with the same signature; one entry answers both.

fn shift_key(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(Ret::bool(event(cx, args)?.modifiers().shift))
}

fn ctrl_key(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(Ret::bool(event(cx, args)?.modifiers().ctrl))
}

fn alt_key(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(Ret::bool(event(cx, args)?.modifiers().alt))
}

fn meta_key(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(Ret::bool(event(cx, args)?.modifiers().meta))
}

// ------------------------------------------------------------
// Mouse, pointer and wheel
// ------------------------------------------------------------

fn mouse(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<MouseDetail> {
    Ok(event(cx, args)?.mouse_detail().copied().unwrap_or_default())
}

fn client_x(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(Ret::I32(mouse(cx, args)?.client_x))
}

fn client_y(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(Ret::I32(mouse(cx, args)?.client_y))
}

fn offset_x(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(Ret::I32(mouse(cx, args)?.offset_x))
}

fn offset_y(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(Ret::I32(mouse(cx, args)?.offset_y))
}

fn movement_x(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(Ret::I32(mouse(cx, args)?.movement_x))
}

fn movement_y(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(Ret::I32(mouse(cx, args)?.movement_y))
}

fn button(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(Ret::I32(mouse(cx, args)?.button as i32))
}

fn buttons(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(Ret::I32(mouse(cx, args)?.buttons as i32))
}

fn pointer_id(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(Ret::I32(mouse(cx, args)?.pointer_id))
}

fn delta_x(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ev = event(cx, args)?;
    Ok(Ret::F64(ev.wheel_detail().map_or(0.0, |w| w.delta_x)))
}

fn delta_y(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ev = event(cx, args)?;
    Ok(Ret::F64(ev.wheel_detail().map_or(0.0, |w| w.delta_y)))
}

fn delta_mode(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ev = event(cx, args)?;
    Ok(Ret::u32(ev.wheel_detail().map_or(0, |w| w.delta_mode)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::events::{KeyboardDetail, Modifiers, WheelDetail};
    use crate::testing::TestCx;
    use gru_glue_core::HostValue;
    use wasmtime::Val;

    #[test]
    fn test_add_and_remove_listeners() {
        let mut cx = TestCx::new();
        let document = cx.document();
        let cb = cx.sandbox.closure(1, |_, _| Ok(()));
        let h = cx.handle(cb);
        let (ptr, len) = cx.text("keydown");
        cx.call(
            "EventTarget.addEventListener",
            &[document.clone(), ptr.clone(), len.clone(), h.clone()],
        )
        .unwrap();
        // Registering twice is a no-op.
        cx.call(
            "EventTarget.addEventListener",
            &[document.clone(), ptr.clone(), len.clone(), h.clone()],
        )
        .unwrap();
        let doc = cx.host.dom.document.clone();
        assert_eq!(doc.listeners.count("keydown"), 1);

        cx.call("EventTarget.removeEventListener", &[document, ptr, len, h])
            .unwrap();
        assert!(doc.listeners.is_empty());
    }

    #[test]
    fn test_once_option() {
        let mut cx = TestCx::new();
        let window = cx.window();
        let cb = cx.sandbox.closure(1, |_, _| Ok(()));
        let h = cx.handle(cb);
        let options = crate::host::js::JsObject::new();
        options.set("once", HostValue::from(true));
        let options = cx.handle(HostValue::object(options));
        let (ptr, len) = cx.text("resize");
        cx.call(
            "EventTarget.addEventListenerWithOptions",
            &[window, ptr, len, h, options],
        )
        .unwrap();
        let win = cx.host.dom.window.clone();
        assert_eq!(win.listeners.take_matching("resize").len(), 1);
        assert!(win.listeners.is_empty());
    }

    #[test]
    fn test_listening_on_a_number_is_a_type_error() {
        let mut cx = TestCx::new();
        let target = cx.handle(3.0);
        let cb = cx.sandbox.closure(1, |_, _| Ok(()));
        let h = cx.handle(cb);
        let (ptr, len) = cx.text("click");
        cx.call("EventTarget.addEventListener", &[target, ptr, len, h])
            .unwrap();
        let err = cx.sandbox.take_exception().unwrap();
        assert!(err.debug_string().starts_with("TypeError"));
    }

    #[test]
    fn test_keyboard_accessors() {
        let mut cx = TestCx::new();
        let ev = Event::keyboard(
            "keydown",
            KeyboardDetail {
                key: "a".into(),
                code: "KeyA".into(),
                key_code: 65,
                char_code: 0,
                modifiers: Modifiers {
                    shift: true,
                    ..Modifiers::default()
                },
            },
        );
        let h = cx.handle(HostValue::object(ev));
        let slot = cx.retptr();
        cx.call("KeyboardEvent.code", &[slot.clone(), h.clone()]).unwrap();
        let addr = slot.i32().unwrap() as u32;
        assert_eq!(cx.sandbox.read_string_ret(addr).unwrap().as_deref(), Some("KeyA"));
        assert_eq!(cx.call("KeyboardEvent.keyCode", &[h.clone()]).unwrap(), Ret::I32(65));
        assert_eq!(cx.call("shiftKey", &[h.clone()]).unwrap(), Ret::I32(1));
        assert_eq!(cx.call("ctrlKey", &[h.clone()]).unwrap(), Ret::I32(0));
        let (ptr, len) = cx.text("Shift");
        assert_eq!(
            cx.call("KeyboardEvent.getModifierState", &[h.clone(), ptr, len]).unwrap(),
            Ret::I32(1)
        );
        // Mouse fields on a keyboard event read as zero.
        assert_eq!(cx.call("MouseEvent.clientX", &[h.clone()]).unwrap(), Ret::I32(0));

        cx.call("Event.preventDefault", &[h.clone()]).unwrap();
        assert_eq!(cx.call("Event.cancelBubble", &[h.clone()]).unwrap(), Ret::I32(0));
        cx.call("Event.stopPropagation", &[h.clone()]).unwrap();
        assert_eq!(cx.call("Event.cancelBubble", &[h.clone()]).unwrap(), Ret::I32(1));
        assert_eq!(cx.call("Event.target", &[h]).unwrap(), Ret::I32(0));
    }

    #[test]
    fn test_wheel_accessors() {
        let mut cx = TestCx::new();
        let ev = Event::wheel(WheelDetail {
            mouse: MouseDetail {
                client_x: 10,
                button: -1,
                ..MouseDetail::default()
            },
            delta_x: 0.0,
            delta_y: -120.0,
            delta_mode: 0,
        });
        let h = cx.handle(HostValue::object(ev));
        assert_eq!(cx.call("WheelEvent.deltaY", &[h.clone()]).unwrap(), Ret::F64(-120.0));
        assert_eq!(cx.call("MouseEvent.clientX", &[h.clone()]).unwrap(), Ret::I32(10));
        assert_eq!(cx.call("MouseEvent.button", &[h.clone()]).unwrap(), Ret::I32(-1));
        assert!(cx.call("WheelEvent.deltaY", &[Val::I32(gru_glue_core::heap::NULL as i32)]).is_err());
    }
}
