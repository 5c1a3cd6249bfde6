//! Web Audio: contexts, buffers and one-shot buffer sources.

use std::rc::Rc;

use gru_glue_core::string::f32_array_from_guest;
use gru_glue_core::{HostError, HostValue};

use super::sig::*;
use super::{callback, new_handle, object, optional, shared, value, Args, Binding, Ret};
use crate::host::audio::{AudioBuffer, AudioBufferSourceNode, AudioContext, AudioDestination};
use crate::host::Embedder;

pub(super) static BINDINGS: &[Binding] = &[
    Binding::new(
        "AudioContext.newWithContextOptions",
        "newwithcontextoptions",
        I,
        I,
        new_with_context_options,
    )
    .catching(),
    Binding::new("AudioContext.currentTime", "currentTime", I, D, current_time),
    Binding::new("AudioContext.destination", "destination", I, I, destination),
    Binding::new("AudioContext.resume", "resume", I, I, resume).catching(),
    Binding::new("AudioContext.close", "close", I, I, close).catching(),
    Binding::new("AudioContext.createBuffer", "createBuffer", IIIF, I, create_buffer).catching(),
    Binding::new("AudioContext.createBufferSource", "createBufferSource", I, I, create_buffer_source)
        .catching(),
    Binding::new("AudioDestinationNode.maxChannelCount", "maxChannelCount", I, I, max_channel_count),
    Binding::new("AudioNode.setchannelCount", "setchannelCount", II, NONE, set_channel_count),
    Binding::new("AudioNode.connect", "connect", II, I, connect).catching(),
    Binding::new("AudioBuffer.copyToChannel", "copyToChannel", IIII, NONE, copy_to_channel).catching(),
    Binding::new("AudioBufferSourceNode.setbuffer", "setbuffer", II, NONE, set_buffer),
    Binding::new("AudioBufferSourceNode.setonended", "setonended", II, NONE, set_onended),
    Binding::new("AudioScheduledSourceNode.start", "start", ID, NONE, start).catching(),
];

fn new_with_context_options(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let options = value(cx, args.handle(0)?);
    let ctx = cx.host().audio.create_context(&options)?;
    Ok(new_handle(cx, shared(ctx)))
}

fn current_time(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = object::<AudioContext>(cx, args.handle(0)?)?;
    Ok(Ret::F64(ctx.current_time()))
}

fn destination(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = object::<AudioContext>(cx, args.handle(0)?)?;
    Ok(new_handle(cx, shared(ctx.destination())))
}

fn resume(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let promise = object::<AudioContext>(cx, args.handle(0)?)?.resume()?;
    Ok(new_handle(cx, HostValue::object(promise)))
}

fn close(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let promise = object::<AudioContext>(cx, args.handle(0)?)?.close()?;
    log::debug!("audio context closed");
    Ok(new_handle(cx, HostValue::object(promise)))
}

/// `(ctx, channels, length, sampleRate)`.
fn create_buffer(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = object::<AudioContext>(cx, args.handle(0)?)?;
    let buffer = ctx.create_buffer(args.u32(1)?, args.u32(2)?, args.f32(3)?)?;
    Ok(new_handle(cx, HostValue::object(buffer)))
}

fn create_buffer_source(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = object::<AudioContext>(cx, args.handle(0)?)?;
    Ok(new_handle(cx, HostValue::object(AudioBufferSourceNode::new(&ctx))))
}

fn max_channel_count(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let dest = object::<AudioDestination>(cx, args.handle(0)?)?;
    Ok(Ret::u32(dest.max_channel_count))
}

/// Not a catching import: an out-of-range count aborts the guest.
fn set_channel_count(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let dest = object::<AudioDestination>(cx, args.handle(0)?)?;
    dest.set_channel_count(args.u32(1)?)?;
    Ok(Ret::Unit)
}

/// Only sources connect, and only to a destination; returns the
/// destination the way `AudioNode.connect` returns its argument.
fn connect(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let source = object::<AudioBufferSourceNode>(cx, args.handle(0)?)?;
    let target = value(cx, args.handle(1)?);
    if target.downcast::<AudioDestination>().is_none() {
        return Err(HostError::not_supported(format!(
            "cannot connect to {}",
            target.type_name()
        ))
        .into());
    }
    source.connect();
    Ok(new_handle(cx, target))
}

/// `(buffer, ptr, len, channel)`.
fn copy_to_channel(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let buffer = object::<AudioBuffer>(cx, args.handle(0)?)?;
    let samples = f32_array_from_guest(cx, args.u32(1)?, args.u32(2)?)?;
    buffer.copy_to_channel(&samples, args.i32(3)?)?;
    Ok(Ret::Unit)
}

fn set_buffer(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let source = object::<AudioBufferSourceNode>(cx, args.handle(0)?)?;
    let buffer = optional::<AudioBuffer>(cx, args.handle(1)?)?;
    cx.heap().drop_ref(args.handle(1)?);
    source.set_buffer(buffer);
    Ok(Ret::Unit)
}

/// `onended` receives the `ended` event.
fn set_onended(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let source = object::<AudioBufferSourceNode>(cx, args.handle(0)?)?;
    let handler = value(cx, args.handle(1)?);
    let handler = if handler.is_like_none() {
        None
    } else {
        Some(callback(cx, args.handle(1)?, 1)?)
    };
    cx.heap().drop_ref(args.handle(1)?);
    source.set_onended(handler);
    Ok(Ret::Unit)
}

fn start(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let source = object::<AudioBufferSourceNode>(cx, args.handle(0)?)?;
    let ctx: Rc<AudioContext> = source
        .context()
        .ok_or_else(|| HostError::invalid_state("the source's AudioContext is gone"))?;
    let when = args.f64(1)?;
    cx.host().audio.start(ctx, source, when)?;
    log::trace!("audio source started at {when}");
    Ok(Ret::Unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestCx;
    use gru_glue_core::heap::NULL;
    use gru_glue_core::Guest;
    use wasmtime::Val;

    fn handle(ret: Ret) -> Val {
        let Ret::I32(h) = ret else { panic!("{ret:?}") };
        assert_ne!(h, 0);
        Val::I32(h)
    }

    fn context(cx: &mut TestCx) -> Val {
        let options = crate::host::js::JsObject::new();
        options.set("sampleRate", HostValue::from(48_000.0));
        let options = cx.handle(HostValue::object(options));
        handle(cx.call("AudioContext.newWithContextOptions", &[options]).unwrap())
    }

    #[test]
    fn test_context_options_and_destination() {
        let mut cx = TestCx::new();
        let ctx = context(&mut cx);
        let stored = cx.sandbox.heap().value(ctx.i32().unwrap() as u32);
        assert_eq!(stored.downcast::<AudioContext>().unwrap().sample_rate, 48_000.0);
        assert_eq!(cx.call("AudioContext.currentTime", &[ctx.clone()]).unwrap(), Ret::F64(0.0));

        let dest = handle(cx.call("AudioContext.destination", &[ctx]).unwrap());
        assert_eq!(cx.call("AudioDestinationNode.maxChannelCount", &[dest.clone()]).unwrap(), Ret::I32(2));
        cx.call("AudioNode.setchannelCount", &[dest.clone(), Val::I32(1)]).unwrap();
        // Not catching: the error surfaces as a trap.
        assert!(cx.call("AudioNode.setchannelCount", &[dest, Val::I32(8)]).is_err());
        assert!(cx.sandbox.exceptions().is_empty());
    }

    #[test]
    fn test_bad_sample_rate_is_caught() {
        let mut cx = TestCx::new();
        let ctx = context(&mut cx);
        let args = [ctx, Val::I32(1), Val::I32(128), Val::F32(10.0f32.to_bits())];
        assert_eq!(cx.call("AudioContext.createBuffer", &args).unwrap(), Ret::I32(0));
        let err = cx.sandbox.take_exception().unwrap();
        assert!(err.debug_string().starts_with("NotSupportedError"));
    }

    #[test]
    fn test_buffer_source_plays_and_ends() {
        let mut cx = TestCx::new();
        let ctx = context(&mut cx);
        let args = [ctx.clone(), Val::I32(1), Val::I32(4_800), Val::F32(48_000.0f32.to_bits())];
        let buffer = handle(cx.call("AudioContext.createBuffer", &args).unwrap());

        let samples: Vec<u8> = [0.5f32, -0.5].iter().flat_map(|s| s.to_le_bytes()).collect();
        let ptr = cx.sandbox.write_bytes(&samples, 4).unwrap();
        cx.call(
            "AudioBuffer.copyToChannel",
            &[buffer.clone(), Val::I32(ptr as i32), Val::I32(2), Val::I32(0)],
        )
        .unwrap();
        let stored = cx.sandbox.heap().value(buffer.i32().unwrap() as u32);
        let data = stored.downcast::<AudioBuffer>().unwrap().channel_data(0).unwrap();
        assert_eq!(&data[..3], &[0.5, -0.5, 0.0]);

        let source = handle(cx.call("AudioContext.createBufferSource", &[ctx.clone()]).unwrap());
        cx.call("AudioBufferSourceNode.setbuffer", &[source.clone(), buffer]).unwrap();
        let ended = cx.sandbox.closure(1, |_, _| Ok(()));
        let ended = cx.handle(ended);
        cx.call("AudioBufferSourceNode.setonended", &[source.clone(), ended]).unwrap();
        let dest = handle(cx.call("AudioContext.destination", &[ctx]).unwrap());
        handle(cx.call("AudioNode.connect", &[source.clone(), dest]).unwrap());

        cx.call("AudioScheduledSourceNode.start", &[source.clone(), Val::F64(0f64.to_bits())]).unwrap();
        assert_eq!(cx.host.audio.playing(), 1);
        // A second start is an InvalidStateError.
        cx.call("AudioScheduledSourceNode.start", &[source.clone(), Val::F64(0f64.to_bits())]).unwrap();
        assert!(cx.sandbox.take_exception().unwrap().debug_string().starts_with("InvalidStateError"));

        cx.host.audio.advance(0.05);
        assert!(cx.host.audio.take_ended().is_empty());
        cx.host.audio.advance(0.06);
        let done = cx.host.audio.take_ended();
        assert_eq!(done.len(), 1);
        assert!(done[0].onended().is_some());
        assert!(done[0].is_connected());
    }

    #[test]
    fn test_connect_to_non_destination_is_caught() {
        let mut cx = TestCx::new();
        let ctx = context(&mut cx);
        let source = handle(cx.call("AudioContext.createBufferSource", &[ctx]).unwrap());
        let window = cx.window();
        assert_eq!(cx.call("AudioNode.connect", &[source.clone(), window]).unwrap(), Ret::I32(0));
        assert!(cx.sandbox.take_exception().is_some());
        cx.call("AudioBufferSourceNode.setbuffer", &[source, Val::I32(NULL as i32)]).unwrap();
    }

    #[test]
    fn test_close_twice() {
        let mut cx = TestCx::new();
        let ctx = context(&mut cx);
        handle(cx.call("AudioContext.close", &[ctx.clone()]).unwrap());
        assert_eq!(cx.call("AudioContext.close", &[ctx.clone()]).unwrap(), Ret::I32(0));
        assert_eq!(cx.call("AudioContext.resume", &[ctx]).unwrap(), Ret::I32(0));
        assert_eq!(cx.sandbox.exceptions().len(), 2);
    }
}
