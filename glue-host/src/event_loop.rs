//! Host-initiated callbacks: timers, finished requests, audio `ended`,
//! animation frames and embedder-injected DOM events.
//!
//! Each callback runs to completion before the next one starts. A callback
//! that fails is logged and counted; the rest of the pump still runs.

use std::rc::Rc;

use gru_glue_core::{Callback, HostRef, HostValue};
use serde::Serialize;

use crate::host::events::{listeners_of, Event, Listeners};
use crate::host::Embedder;

/// What one [`pump`] ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PumpReport {
    pub timeouts: u32,
    pub requests: u32,
    pub sounds_ended: u32,
    pub frames: u32,
    pub failures: u32,
}

impl PumpReport {
    pub fn callbacks(&self) -> u32 {
        self.timeouts + self.requests + self.sounds_ended + self.frames
    }

    /// Accumulate `other` into `self`.
    pub fn merge(&mut self, other: PumpReport) {
        self.timeouts += other.timeouts;
        self.requests += other.requests;
        self.sounds_ended += other.sounds_ended;
        self.frames += other.frames;
        self.failures += other.failures;
    }
}

/// Run `cb` with `args`. Returns `false` when it failed.
fn run_callback(cx: &mut dyn Embedder, cb: &Callback, args: Vec<HostValue>, what: &str) -> bool {
    cx.host().stats.callbacks_run += 1;
    match cb.invoke(cx, args) {
        Ok(()) => true,
        Err(e) => {
            cx.host().stats.callback_failures += 1;
            log::warn!("{what} callback failed: {e}");
            false
        }
    }
}

/// Run the `kind` listeners registered when this is called, in order. One
/// removed by an earlier listener meanwhile is skipped. Returns the number
/// of failed callbacks.
fn run_listeners(cx: &mut dyn Embedder, listeners: &Listeners, kind: &str, arg: &HostValue) -> u32 {
    let mut failures = 0;
    for id in listeners.matching(kind) {
        let Some(cb) = listeners.take_for_call(id) else {
            continue;
        };
        if !run_callback(cx, &cb, vec![arg.clone()], kind) {
            failures += 1;
        }
    }
    failures
}

fn event_value(event: &Rc<Event>) -> HostValue {
    HostValue::Object(HostRef::from_rc(Rc::clone(event)))
}

/// Advance the virtual clock by `elapsed_ms` and run everything that became
/// due.
///
/// Order: timeouts (by due time, then id), finished requests, ended audio
/// sources, then the animation frames that were registered before the pump
/// started.
pub fn pump(cx: &mut dyn Embedder, elapsed_ms: f64) -> PumpReport {
    let mut report = PumpReport::default();
    let frames = cx.host().timers.frame_ids();

    cx.host().timers.advance(elapsed_ms);
    cx.host().audio.advance(elapsed_ms / 1000.0);

    // ------------------------------------------------------------
    // Timeouts
    // ------------------------------------------------------------
    let due = cx.host().timers.due_timeouts();
    for id in due {
        // An earlier callback may have cleared it.
        let Some(cb) = cx.host().timers.take_timeout(id) else {
            continue;
        };
        report.timeouts += 1;
        if !run_callback(cx, &cb, Vec::new(), "setTimeout") {
            report.failures += 1;
        }
    }

    // ------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------
    let finished = cx.host().xhr.resolve_all();
    for (xhr, outcome) in finished {
        report.requests += 1;
        let target = HostValue::Object(HostRef::from_rc(xhr));
        for kind in [outcome.event(), "loadend"] {
            let event = Rc::new(Event::new(kind));
            event.set_target(target.clone());
            if let Some(listeners) = listeners_of(&target) {
                report.failures += run_listeners(cx, listeners, kind, &event_value(&event));
            }
        }
    }

    // ------------------------------------------------------------
    // Audio
    // ------------------------------------------------------------
    let ended = cx.host().audio.take_ended();
    for source in ended {
        report.sounds_ended += 1;
        let Some(cb) = source.onended() else {
            continue;
        };
        let event = Rc::new(Event::new("ended"));
        event.set_target(HostValue::Object(HostRef::from_rc(source)));
        if !run_callback(cx, &cb, vec![event_value(&event)], "onended") {
            report.failures += 1;
        }
    }

    // ------------------------------------------------------------
    // Animation frames
    // ------------------------------------------------------------
    let now = cx.host().timers.now();
    for id in frames {
        let Some(cb) = cx.host().timers.take_frame(id) else {
            continue;
        };
        report.frames += 1;
        if !run_callback(cx, &cb, vec![HostValue::from(now)], "requestAnimationFrame") {
            report.failures += 1;
        }
    }

    if report.callbacks() > 0 {
        log::trace!("pump at {now:.1} ms: {report:?}");
    }
    report
}

/// Dispatch `event` at `target` and bubble it to the document and window.
///
/// Returns `false` if a listener called `preventDefault`.
pub fn dispatch_event(cx: &mut dyn Embedder, target: &HostValue, event: Event) -> bool {
    let event = Rc::new(event);
    event.set_target(target.clone());
    let path = cx.host().dom.event_path(target);
    for node in path {
        if let Some(listeners) = listeners_of(&node) {
            run_listeners(cx, listeners, &event.kind, &event_value(&event));
        }
        if event.propagation_stopped() {
            break;
        }
    }
    !event.default_prevented()
}

/// Apply a new viewport: a `resize` event on the window, then `change` on
/// every media query list whose result flipped.
///
/// Media listeners receive the list itself, which carries `matches`.
pub fn resize(cx: &mut dyn Embedder, width: u32, height: u32, device_pixel_ratio: f64) {
    let changed = cx.host().dom.resize(width, height, device_pixel_ratio);
    log::debug!("viewport {width}x{height} @{device_pixel_ratio}x, {} media change(s)", changed.len());
    let window = cx.host().dom.window_value();
    dispatch_event(cx, &window, Event::new("resize"));
    for list in changed {
        let value = HostValue::Object(HostRef::from_rc(Rc::clone(&list)));
        run_listeners(cx, &list.listeners, "change", &value);
    }
}
