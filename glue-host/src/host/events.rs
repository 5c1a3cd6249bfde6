use std::cell::{Cell, RefCell};

use gru_glue_core::{Callback, HostValue};

use crate::handle::HandleStore;
use crate::host::dom::{Document, Element, MediaQueryList, Window};
use crate::host::xhr::XmlHttpRequest;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
}

impl Modifiers {
    /// `getModifierState` key names.
    pub fn state(&self, key: &str) -> bool {
        match key {
            "Shift" => self.shift,
            "Control" => self.ctrl,
            "Alt" => self.alt,
            "Meta" => self.meta,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyboardDetail {
    pub key: String,
    pub code: String,
    pub key_code: u32,
    pub char_code: u32,
    pub modifiers: Modifiers,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MouseDetail {
    pub client_x: i32,
    pub client_y: i32,
    pub offset_x: i32,
    pub offset_y: i32,
    pub movement_x: i32,
    pub movement_y: i32,
    pub button: i16,
    pub buttons: u16,
    pub pointer_id: i32,
    pub modifiers: Modifiers,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WheelDetail {
    pub mouse: MouseDetail,
    pub delta_x: f64,
    pub delta_y: f64,
    pub delta_mode: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum EventDetail {
    #[default]
    Plain,
    Keyboard(KeyboardDetail),
    Mouse(MouseDetail),
    Wheel(WheelDetail),
}

/// A DOM event as the guest sees it.
///
/// Accessors for a detail the event does not carry read as zero/empty, the
/// way a `MouseEvent` property reads on a plain `Event` after an unchecked
/// cast.
#[derive(Debug)]
pub struct Event {
    pub kind: String,
    pub detail: EventDetail,
    target: RefCell<HostValue>,
    default_prevented: Cell<bool>,
    propagation_stopped: Cell<bool>,
}

impl Event {
    pub fn new(kind: impl Into<String>) -> Self {
        Self::with_detail(kind, EventDetail::Plain)
    }

    pub fn with_detail(kind: impl Into<String>, detail: EventDetail) -> Self {
        Self {
            kind: kind.into(),
            detail,
            target: RefCell::new(HostValue::Null),
            default_prevented: Cell::new(false),
            propagation_stopped: Cell::new(false),
        }
    }

    pub fn keyboard(kind: impl Into<String>, detail: KeyboardDetail) -> Self {
        Self::with_detail(kind, EventDetail::Keyboard(detail))
    }

    pub fn mouse(kind: impl Into<String>, detail: MouseDetail) -> Self {
        Self::with_detail(kind, EventDetail::Mouse(detail))
    }

    pub fn wheel(detail: WheelDetail) -> Self {
        Self::with_detail("wheel", EventDetail::Wheel(detail))
    }

    pub fn target(&self) -> HostValue {
        self.target.borrow().clone()
    }

    pub fn set_target(&self, target: HostValue) {
        *self.target.borrow_mut() = target;
    }

    pub fn prevent_default(&self) {
        self.default_prevented.set(true);
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented.get()
    }

    pub fn stop_propagation(&self) {
        self.propagation_stopped.set(true);
    }

    pub fn propagation_stopped(&self) -> bool {
        self.propagation_stopped.get()
    }

    pub fn keyboard_detail(&self) -> Option<&KeyboardDetail> {
        match &self.detail {
            EventDetail::Keyboard(k) => Some(k),
            _ => None,
        }
    }

    pub fn mouse_detail(&self) -> Option<&MouseDetail> {
        match &self.detail {
            EventDetail::Mouse(m) => Some(m),
            EventDetail::Wheel(w) => Some(&w.mouse),
            _ => None,
        }
    }

    pub fn wheel_detail(&self) -> Option<&WheelDetail> {
        match &self.detail {
            EventDetail::Wheel(w) => Some(w),
            _ => None,
        }
    }

    pub fn modifiers(&self) -> Modifiers {
        match &self.detail {
            EventDetail::Keyboard(k) => k.modifiers,
            EventDetail::Mouse(m) => m.modifiers,
            EventDetail::Wheel(w) => w.mouse.modifiers,
            EventDetail::Plain => Modifiers::default(),
        }
    }
}

pub struct Listener {
    pub kind: String,
    pub callback: Callback,
    pub once: bool,
}

/// Listener registry of one event target.
#[derive(Default)]
pub struct Listeners {
    store: RefCell<HandleStore<Listener>>,
}

impl Listeners {
    /// Register `callback` for `kind`. Registering the same pair twice is a
    /// no-op and returns `false`.
    pub fn add(&self, kind: &str, callback: Callback, once: bool) -> bool {
        let mut store = self.store.borrow_mut();
        if store
            .iter()
            .any(|(_, l)| l.kind == kind && l.callback.ptr_eq(&callback))
        {
            return false;
        }
        store.insert(Listener {
            kind: kind.to_string(),
            callback,
            once,
        });
        true
    }

    pub fn remove(&self, kind: &str, callback: &Callback) -> bool {
        self.store
            .borrow_mut()
            .remove_where(|l| l.kind == kind && l.callback.ptr_eq(callback))
            > 0
    }

    /// Ids of the listeners for `kind`, in registration order.
    pub fn matching(&self, kind: &str) -> Vec<u32> {
        self.store
            .borrow()
            .iter()
            .filter(|(_, l)| l.kind == kind)
            .map(|(id, _)| id)
            .collect()
    }

    /// The callback of listener `id` if it is still registered. `once`
    /// listeners are unregistered as they are handed out.
    pub fn take_for_call(&self, id: u32) -> Option<Callback> {
        let mut store = self.store.borrow_mut();
        let listener = store.get(id)?;
        let callback = listener.callback.clone();
        if listener.once {
            store.remove(id);
        }
        Some(callback)
    }

    /// Every listener for `kind` at once, in registration order.
    pub fn take_matching(&self, kind: &str) -> Vec<Callback> {
        self.matching(kind)
            .into_iter()
            .filter_map(|id| self.take_for_call(id))
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.store
            .borrow()
            .iter()
            .filter(|(_, l)| l.kind == kind)
            .count()
    }

    pub fn len(&self) -> usize {
        self.store.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.borrow().is_empty()
    }
}

/// The listener registry behind an event target, if `value` is one.
pub fn listeners_of(value: &HostValue) -> Option<&Listeners> {
    let target = value.as_host_ref()?;
    if let Some(window) = target.downcast::<Window>() {
        return Some(&window.listeners);
    }
    if let Some(document) = target.downcast::<Document>() {
        return Some(&document.listeners);
    }
    if let Some(element) = target.downcast::<Element>() {
        return Some(&element.listeners);
    }
    if let Some(list) = target.downcast::<MediaQueryList>() {
        return Some(&list.listeners);
    }
    target.downcast::<XmlHttpRequest>().map(|xhr| &xhr.listeners)
}

/// `addEventListener`'s third argument: a boolean capture flag or an
/// options object. Only `once` changes behaviour here.
pub fn once_option(options: &HostValue) -> bool {
    crate::host::js::property(options, "once")
        .as_bool()
        .unwrap_or(false)
}
