//! Window, document, elements and media queries.

use std::rc::Rc;

use gru_glue_core::{HostError, HostValue};

use super::sig::*;
use super::{
    callback, new_handle, object, optional_handle, shared, string_arg, value, Args, Binding, Ret,
};
use crate::host::dom::{Document, DomRect, Element, MediaQueryList, Style, Window};
use crate::host::gl::{GlContext, GlVersion};
use crate::host::Embedder;

pub(super) static BINDINGS: &[Binding] = &[
    Binding::new("Window.document", "document", I, I, document),
    Binding::new("Window.innerWidth", "innerWidth", I, I, inner_width).catching(),
    Binding::new("Window.innerHeight", "innerHeight", I, I, inner_height).catching(),
    Binding::new("Window.devicePixelRatio", "devicePixelRatio", I, D, device_pixel_ratio),
    Binding::new("Window.matchMedia", "matchMedia", III, I, match_media).catching(),
    Binding::new("matches", "matches", I, I, matches),
    Binding::new("MediaQueryList.addListener", "addListener", II, NONE, add_listener).catching(),
    Binding::new("MediaQueryList.removeListener", "removeListener", II, NONE, remove_listener)
        .catching(),
    Binding::new("Document.getElementById", "getElementById", III, I, get_element_by_id),
    Binding::new("Document.createElement", "createElement", III, I, create_element).catching(),
    Binding::new("Document.fullscreenElement", "fullscreenElement", I, I, fullscreen_element),
    Binding::new("Document.exitFullscreen", "exitFullscreen", I, NONE, exit_fullscreen),
    Binding::new("Element.setAttribute", "setAttribute", IIIII, NONE, set_attribute).catching(),
    Binding::new("Element.requestFullscreen", "requestFullscreen", I, NONE, request_fullscreen)
        .catching(),
    Binding::new("Element.setPointerCapture", "setPointerCapture", II, NONE, set_pointer_capture)
        .catching(),
    Binding::new("Element.getBoundingClientRect", "getBoundingClientRect", I, I, bounding_rect),
    Binding::new("HtmlElement.style", "style", I, I, style),
    Binding::new("CssStyleDeclaration.setProperty", "setProperty", IIIII, NONE, set_property)
        .catching(),
    Binding::new("DomRect.x", "x", I, D, rect_x),
    Binding::new("DomRect.y", "y", I, D, rect_y),
    Binding::new("HtmlCanvasElement.width", "width", I, I, canvas_width),
    Binding::new("HtmlCanvasElement.height", "height", I, I, canvas_height),
    Binding::new("HtmlCanvasElement.setWidth", "setwidth", II, NONE, set_canvas_width),
    Binding::new("HtmlCanvasElement.setHeight", "setheight", II, NONE, set_canvas_height),
    Binding::new("HtmlCanvasElement.getContext", "getContext", IIII, I, get_context).catching(),
    Binding::new("instanceof_HtmlCanvasElement", "instanceof_HtmlCanvasElement", I, I, is_canvas),
    Binding::new(
        "instanceof_WebGlRenderingContext",
        "instanceof_WebGlRenderingContext",
        I,
        I,
        is_webgl1,
    ),
    Binding::new("instanceof_Window", "instanceof_Window", I, I, is_window),
];

// ------------------------------------------------------------
// Window
// ------------------------------------------------------------

fn document(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let window = object::<Window>(cx, args.handle(0)?)?;
    Ok(optional_handle(cx, shared(window.document())))
}

/// `innerWidth`/`innerHeight` come back boxed as `Number` handles.
fn inner_width(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let window = object::<Window>(cx, args.handle(0)?)?;
    Ok(new_handle(cx, window.inner_width.get() as f64))
}

fn inner_height(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let window = object::<Window>(cx, args.handle(0)?)?;
    Ok(new_handle(cx, window.inner_height.get() as f64))
}

fn device_pixel_ratio(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let window = object::<Window>(cx, args.handle(0)?)?;
    Ok(Ret::F64(window.device_pixel_ratio.get()))
}

fn match_media(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    object::<Window>(cx, args.handle(0)?)?;
    let query = string_arg(cx, args, 1)?;
    let list = cx.host().dom.match_media(&query);
    log::debug!("matchMedia({query:?}) = {}", list.matches.get());
    Ok(optional_handle(cx, shared(list)))
}

/// `.matches` of a media query list, or of the change event delivered for
/// one.
fn matches(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let v = value(cx, args.handle(0)?);
    let matches = match v.downcast::<MediaQueryList>() {
        Some(list) => list.matches.get(),
        None => crate::host::js::property(&v, "matches")
            .as_bool()
            .unwrap_or(false),
    };
    Ok(Ret::bool(matches))
}

fn add_listener(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let list = object::<MediaQueryList>(cx, args.handle(0)?)?;
    let cb = callback(cx, args.handle(1)?, 1)?;
    list.listeners.add("change", cb, false);
    Ok(Ret::Unit)
}

fn remove_listener(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let list = object::<MediaQueryList>(cx, args.handle(0)?)?;
    let cb = callback(cx, args.handle(1)?, 1)?;
    list.listeners.remove("change", &cb);
    Ok(Ret::Unit)
}

// ------------------------------------------------------------
// Document
// ------------------------------------------------------------

fn get_element_by_id(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let document = object::<Document>(cx, args.handle(0)?)?;
    let id = string_arg(cx, args, 1)?;
    let found = document.element_by_id(&id).map(shared);
    if found.is_none() {
        log::debug!("no element with id `{id}`");
    }
    Ok(optional_handle(cx, HostValue::from(found)))
}

fn create_element(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let document = object::<Document>(cx, args.handle(0)?)?;
    let tag = string_arg(cx, args, 1)?;
    let element = document.create_element(&tag)?;
    Ok(new_handle(cx, HostValue::object(element)))
}

fn fullscreen_element(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let document = object::<Document>(cx, args.handle(0)?)?;
    let element = document.fullscreen_element().map(shared);
    Ok(optional_handle(cx, HostValue::from(element)))
}

fn exit_fullscreen(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    object::<Document>(cx, args.handle(0)?)?.exit_fullscreen();
    Ok(Ret::Unit)
}

// ------------------------------------------------------------
// Elements
// ------------------------------------------------------------

/// Attributes set on a detached element with an `id` attach it to the
/// document, so `getElementById` finds canvases the guest creates.
fn set_attribute(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let element = object::<Element>(cx, args.handle(0)?)?;
    let name = string_arg(cx, args, 1)?;
    let v = string_arg(cx, args, 3)?;
    element.set_attribute(&name, &v)?;
    if name.eq_ignore_ascii_case("id") && !element.is_connected() {
        let document = cx.host().dom.document.clone();
        document.adopt(element);
    }
    Ok(Ret::Unit)
}

fn request_fullscreen(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let element = object::<Element>(cx, args.handle(0)?)?;
    let document = Rc::clone(&cx.host().dom.document);
    document.request_fullscreen(element)?;
    Ok(Ret::Unit)
}

fn set_pointer_capture(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let element = object::<Element>(cx, args.handle(0)?)?;
    let pointer_id = args.i32(1)?;
    if !element.is_connected() {
        return Err(HostError::invalid_state("element is not connected").into());
    }
    element.set_pointer_capture(pointer_id);
    Ok(Ret::Unit)
}

fn bounding_rect(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let rect = object::<Element>(cx, args.handle(0)?)?.bounding_rect();
    Ok(new_handle(cx, HostValue::object(rect)))
}

fn style(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let element = object::<Element>(cx, args.handle(0)?)?;
    Ok(new_handle(cx, shared(Rc::clone(&element.style))))
}

fn set_property(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let style = object::<Style>(cx, args.handle(0)?)?;
    let name = string_arg(cx, args, 1)?;
    let v = string_arg(cx, args, 3)?;
    style.set_property(&name, &v)?;
    Ok(Ret::Unit)
}

fn rect_x(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(Ret::F64(object::<DomRect>(cx, args.handle(0)?)?.x))
}

fn rect_y(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(Ret::F64(object::<DomRect>(cx, args.handle(0)?)?.y))
}

fn canvas_width(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(Ret::u32(object::<Element>(cx, args.handle(0)?)?.width.get()))
}

fn canvas_height(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(Ret::u32(object::<Element>(cx, args.handle(0)?)?.height.get()))
}

fn set_canvas_width(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let element = object::<Element>(cx, args.handle(0)?)?;
    element.width.set(args.u32(1)?);
    Ok(Ret::Unit)
}

fn set_canvas_height(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let element = object::<Element>(cx, args.handle(0)?)?;
    element.height.set(args.u32(1)?);
    Ok(Ret::Unit)
}

/// `canvas.getContext(kind, options)`; the options are ignored.
fn get_context(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let element = object::<Element>(cx, args.handle(0)?)?;
    let kind = string_arg(cx, args, 1)?;
    let max_version = cx.host().dom.max_webgl();
    let context = element.get_context(&kind, max_version)?;
    if let Some(ctx) = &context {
        log::info!("created {:?} context on a {}x{} canvas", ctx.version, element.width.get(), element.height.get());
    }
    Ok(optional_handle(cx, HostValue::from(context.map(shared))))
}

// ------------------------------------------------------------
// instanceof
// ------------------------------------------------------------

fn is_canvas(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let v = value(cx, args.handle(0)?);
    Ok(Ret::bool(v.downcast::<Element>().is_some_and(Element::is_canvas)))
}

/// WebGL 2 contexts are not `WebGLRenderingContext` instances.
fn is_webgl1(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let v = value(cx, args.handle(0)?);
    Ok(Ret::bool(
        v.downcast::<GlContext>()
            .is_some_and(|ctx| ctx.version == GlVersion::WebGl1),
    ))
}

fn is_window(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let v = value(cx, args.handle(0)?);
    Ok(Ret::bool(v.downcast::<Window>().is_some()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::testing::TestCx;
    use gru_glue_core::Guest;
    use wasmtime::Val;

    fn canvas(cx: &mut TestCx) -> Val {
        let document = cx.document();
        let (ptr, len) = cx.text("canvas");
        let ret = cx.call("Document.getElementById", &[document, ptr, len]).unwrap();
        let Ret::I32(h) = ret else { panic!() };
        assert_ne!(h, 0);
        Val::I32(h)
    }

    fn context(cx: &mut TestCx, canvas: &Val, kind: &str) -> Ret {
        let (ptr, len) = cx.text(kind);
        let options = cx.handle(HostValue::Undefined);
        cx.call("HtmlCanvasElement.getContext", &[canvas.clone(), ptr, len, options])
            .unwrap()
    }

    #[test]
    fn test_document_lookup() {
        let mut cx = TestCx::new();
        let window = cx.window();
        let doc = cx.call("Window.document", &[window.clone()]).unwrap();
        assert_eq!(cx.value(doc).type_name(), "Document");
        assert_eq!(cx.call("instanceof_Window", &[window]).unwrap(), Ret::I32(1));

        let document = cx.document();
        let (ptr, len) = cx.text("missing");
        assert_eq!(
            cx.call("Document.getElementById", &[document, ptr, len]).unwrap(),
            Ret::I32(0)
        );
        let canvas = canvas(&mut cx);
        assert_eq!(cx.call("instanceof_HtmlCanvasElement", &[canvas.clone()]).unwrap(), Ret::I32(1));
        assert_eq!(cx.call("HtmlCanvasElement.width", &[canvas]).unwrap(), Ret::I32(300));
    }

    #[test]
    fn test_webgl2_refused_when_capped() {
        let mut config = HostConfig::default();
        config.webgl.max_version = 1;
        let mut cx = TestCx::with_config(config);
        let canvas = canvas(&mut cx);
        assert_eq!(context(&mut cx, &canvas, "webgl2"), Ret::I32(0));

        let gl = context(&mut cx, &canvas, "webgl");
        let Ret::I32(gl) = gl else { panic!() };
        assert_ne!(gl, 0);
        assert_eq!(
            cx.call("instanceof_WebGlRenderingContext", &[Val::I32(gl)]).unwrap(),
            Ret::I32(1)
        );
    }

    #[test]
    fn test_webgl2_is_not_a_webgl1_instance() {
        let mut cx = TestCx::new();
        let canvas = canvas(&mut cx);
        let Ret::I32(gl) = context(&mut cx, &canvas, "webgl2") else { panic!() };
        assert_eq!(
            cx.call("instanceof_WebGlRenderingContext", &[Val::I32(gl)]).unwrap(),
            Ret::I32(0)
        );
    }

    #[test]
    fn test_created_canvas_attaches_by_id() {
        let mut cx = TestCx::new();
        let document = cx.document();
        let (ptr, len) = cx.text("canvas");
        let Ret::I32(el) = cx
            .call("Document.createElement", &[document.clone(), ptr, len])
            .unwrap()
        else {
            panic!()
        };
        // Not attached yet: fullscreen is refused.
        cx.call("Element.requestFullscreen", &[Val::I32(el)]).unwrap();
        let err = cx.sandbox.take_exception().unwrap();
        assert!(err.debug_string().starts_with("TypeError"));

        let (n, nl) = cx.text("id");
        let (v, vl) = cx.text("game");
        cx.call("Element.setAttribute", &[Val::I32(el), n, nl, v, vl]).unwrap();
        let (ptr, len) = cx.text("game");
        assert_ne!(
            cx.call("Document.getElementById", &[document.clone(), ptr, len]).unwrap(),
            Ret::I32(0)
        );
        cx.call("Element.requestFullscreen", &[Val::I32(el)]).unwrap();
        assert!(cx.sandbox.exceptions().is_empty());
        let full = cx.call("Document.fullscreenElement", &[document.clone()]).unwrap();
        assert_ne!(full, Ret::I32(0));
        cx.call("Document.exitFullscreen", &[document.clone()]).unwrap();
        assert_eq!(cx.call("Document.fullscreenElement", &[document]).unwrap(), Ret::I32(0));
    }

    #[test]
    fn test_invalid_tag_is_guest_visible() {
        let mut cx = TestCx::new();
        let document = cx.document();
        let (ptr, len) = cx.text("not a tag");
        assert_eq!(
            cx.call("Document.createElement", &[document, ptr, len]).unwrap(),
            Ret::I32(0)
        );
        let err = cx.sandbox.take_exception().unwrap();
        assert!(err.debug_string().starts_with("InvalidCharacterError"));
    }

    #[test]
    fn test_style_drives_bounding_rect() {
        let mut cx = TestCx::new();
        let canvas = canvas(&mut cx);
        let Ret::I32(style) = cx.call("HtmlElement.style", &[canvas.clone()]).unwrap() else {
            panic!()
        };
        let (n, nl) = cx.text("width");
        let (v, vl) = cx.text("640px");
        cx.call("CssStyleDeclaration.setProperty", &[Val::I32(style), n, nl, v, vl])
            .unwrap();
        let rect = cx.call("Element.getBoundingClientRect", &[canvas]).unwrap();
        let rect = cx.value(rect);
        assert_eq!(rect.downcast::<DomRect>().unwrap().width, 640.0);
    }

    #[test]
    fn test_match_media_and_listeners() {
        let mut cx = TestCx::new();
        let window = cx.window();
        let (ptr, len) = cx.text("(min-width: 1000px)");
        let Ret::I32(list) = cx
            .call("Window.matchMedia", &[window.clone(), ptr, len])
            .unwrap()
        else {
            panic!()
        };
        assert_eq!(cx.call("matches", &[Val::I32(list)]).unwrap(), Ret::I32(1));

        let cb = cx.sandbox.closure(1, |_, _| Ok(()));
        let h = cx.handle(cb);
        cx.call("MediaQueryList.addListener", &[Val::I32(list), h.clone()])
            .unwrap();
        let mql = cx.sandbox.heap().value(list as u32);
        assert_eq!(mql.downcast::<MediaQueryList>().unwrap().listeners.count("change"), 1);
        cx.call("MediaQueryList.removeListener", &[Val::I32(list), h])
            .unwrap();
        assert!(mql.downcast::<MediaQueryList>().unwrap().listeners.is_empty());

        assert_eq!(cx.call("Window.devicePixelRatio", &[window.clone()]).unwrap(), Ret::F64(1.0));
        let width = cx.call("Window.innerWidth", &[window]).unwrap();
        assert_eq!(cx.value(width).as_f64(), Some(1280.0));
    }
}
