use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::{Rc, Weak};

use gru_glue_core::{HostError, HostRef, HostValue};

use crate::config::HostConfig;
use crate::host::events::Listeners;
use crate::host::gl::{GlContext, GlVersion};
use crate::host::js::{Crypto, Performance};
use crate::host::storage::LocalStorage;

pub struct Window {
    pub inner_width: Cell<u32>,
    pub inner_height: Cell<u32>,
    pub device_pixel_ratio: Cell<f64>,
    pub listeners: Listeners,
    document: Rc<Document>,
    crypto: HostRef,
    performance: HostRef,
    local_storage: HostRef,
}

impl Window {
    pub fn document(&self) -> Rc<Document> {
        Rc::clone(&self.document)
    }

    /// Global property lookup (`window[name]`).
    pub fn global(&self, name: &str) -> HostValue {
        match name {
            "document" => HostValue::Object(HostRef::from_rc(self.document())),
            "crypto" => HostValue::Object(self.crypto.clone()),
            "performance" => HostValue::Object(self.performance.clone()),
            "localStorage" => HostValue::Object(self.local_storage.clone()),
            "innerWidth" => HostValue::from(self.inner_width.get() as f64),
            "innerHeight" => HostValue::from(self.inner_height.get() as f64),
            "devicePixelRatio" => HostValue::from(self.device_pixel_ratio.get()),
            // Node and legacy IE probes all come back empty.
            _ => HostValue::Undefined,
        }
    }

    pub fn media_env(&self) -> MediaEnv {
        MediaEnv {
            width: self.inner_width.get() as f64,
            height: self.inner_height.get() as f64,
            dppx: self.device_pixel_ratio.get(),
        }
    }
}

#[derive(Default)]
pub struct Document {
    pub listeners: Listeners,
    elements: RefCell<BTreeMap<String, Rc<Element>>>,
    fullscreen: RefCell<Option<Rc<Element>>>,
}

impl Document {
    pub fn element_by_id(&self, id: &str) -> Option<Rc<Element>> {
        self.elements.borrow().get(id).cloned()
    }

    /// Attach `element` under its current id.
    pub fn adopt(&self, element: Rc<Element>) {
        let id = element.id();
        if id.is_empty() {
            return;
        }
        element.connected.set(true);
        self.elements.borrow_mut().insert(id, element);
    }

    pub fn create_element(&self, tag: &str) -> Result<Element, HostError> {
        if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(HostError::invalid_character(format!(
                "`{tag}` is not a valid element name"
            )));
        }
        Ok(Element::new(&tag.to_ascii_lowercase(), 300, 150))
    }

    pub fn request_fullscreen(&self, element: Rc<Element>) -> Result<(), HostError> {
        if !element.connected.get() {
            return Err(HostError::type_error("element is not connected"));
        }
        *self.fullscreen.borrow_mut() = Some(element);
        Ok(())
    }

    pub fn exit_fullscreen(&self) {
        self.fullscreen.borrow_mut().take();
    }

    pub fn fullscreen_element(&self) -> Option<Rc<Element>> {
        self.fullscreen.borrow().clone()
    }
}

#[derive(Debug, Default)]
pub struct Style {
    props: RefCell<BTreeMap<String, String>>,
}

impl Style {
    pub fn set_property(&self, name: &str, value: &str) -> Result<(), HostError> {
        if name.is_empty() {
            return Err(HostError::syntax("empty property name"));
        }
        let mut props = self.props.borrow_mut();
        if value.is_empty() {
            props.remove(name);
        } else {
            props.insert(name.to_string(), value.to_string());
        }
        Ok(())
    }

    pub fn property(&self, name: &str) -> Option<String> {
        self.props.borrow().get(name).cloned()
    }
}

pub struct Element {
    pub tag: String,
    pub width: Cell<u32>,
    pub height: Cell<u32>,
    pub listeners: Listeners,
    pub style: Rc<Style>,
    connected: Cell<bool>,
    attributes: RefCell<BTreeMap<String, String>>,
    context: RefCell<Option<Rc<GlContext>>>,
    pointer_captures: RefCell<BTreeSet<i32>>,
}

impl Element {
    pub fn new(tag: &str, width: u32, height: u32) -> Self {
        Self {
            tag: tag.to_string(),
            width: Cell::new(width),
            height: Cell::new(height),
            listeners: Listeners::default(),
            style: Rc::new(Style::default()),
            connected: Cell::new(false),
            attributes: RefCell::new(BTreeMap::new()),
            context: RefCell::new(None),
            pointer_captures: RefCell::new(BTreeSet::new()),
        }
    }

    pub fn is_canvas(&self) -> bool {
        self.tag == "canvas"
    }

    pub fn is_connected(&self) -> bool {
        self.connected.get()
    }

    pub fn id(&self) -> String {
        self.attribute("id").unwrap_or_default()
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        self.attributes.borrow().get(name).cloned()
    }

    /// `setAttribute`. `width`/`height` on a canvas also resize it.
    pub fn set_attribute(&self, name: &str, value: &str) -> Result<(), HostError> {
        if name.is_empty() || name.chars().any(|c| c.is_whitespace() || "\"'<>/=".contains(c)) {
            return Err(HostError::invalid_character(format!(
                "`{name}` is not a valid attribute name"
            )));
        }
        let name = name.to_ascii_lowercase();
        if self.is_canvas() {
            let size = value.trim().parse::<u32>().ok();
            match name.as_str() {
                "width" => self.width.set(size.unwrap_or(300)),
                "height" => self.height.set(size.unwrap_or(150)),
                _ => {}
            }
        }
        self.attributes
            .borrow_mut()
            .insert(name, value.to_string());
        Ok(())
    }

    pub fn bounding_rect(&self) -> DomRect {
        let css = |prop: &str, fallback: u32| {
            self.style
                .property(prop)
                .and_then(|v| v.trim().strip_suffix("px").and_then(|n| n.trim().parse().ok()))
                .unwrap_or(fallback as f64)
        };
        DomRect {
            x: 0.0,
            y: 0.0,
            width: css("width", self.width.get()),
            height: css("height", self.height.get()),
        }
    }

    pub fn set_pointer_capture(&self, pointer_id: i32) {
        self.pointer_captures.borrow_mut().insert(pointer_id);
    }

    pub fn has_pointer_capture(&self, pointer_id: i32) -> bool {
        self.pointer_captures.borrow().contains(&pointer_id)
    }

    pub fn context(&self) -> Option<Rc<GlContext>> {
        self.context.borrow().clone()
    }

    /// `canvas.getContext(kind)`.
    ///
    /// WebGL 2 is handed out only up to `max_version`; a canvas keeps the
    /// first context it created and answers `null` for any other kind.
    pub fn get_context(&self, kind: &str, max_version: u8) -> Result<Option<Rc<GlContext>>, HostError> {
        if !self.is_canvas() {
            return Err(HostError::type_error(format!(
                "getContext is not a function on <{}>",
                self.tag
            )));
        }
        let version = match kind {
            "webgl" | "experimental-webgl" => GlVersion::WebGl1,
            "webgl2" if max_version >= 2 => GlVersion::WebGl2,
            "webgl2" => {
                log::debug!("webgl2 requested but limited to WebGL {max_version}");
                return Ok(None);
            }
            other => {
                log::debug!("unsupported context kind `{other}`");
                return Ok(None);
            }
        };
        let mut slot = self.context.borrow_mut();
        match slot.as_ref() {
            Some(existing) if existing.version == version => Ok(Some(Rc::clone(existing))),
            Some(_) => Ok(None),
            None => {
                let ctx = Rc::new(GlContext::new(version, self.width.get(), self.height.get()));
                *slot = Some(Rc::clone(&ctx));
                Ok(Some(ctx))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DomRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Viewport facts media queries are evaluated against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaEnv {
    pub width: f64,
    pub height: f64,
    pub dppx: f64,
}

pub struct MediaQueryList {
    pub media: String,
    pub matches: Cell<bool>,
    pub listeners: Listeners,
}

/// Evaluate a media query list (`a, b` matches when either does).
///
/// Understands media types, `not`/`only`, `orientation`, `prefers-color-scheme`
/// and `width`/`height`/`resolution` with their `min-`/`max-` forms.
pub fn evaluate_media(query: &str, env: &MediaEnv) -> bool {
    query
        .split(',')
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .any(|q| evaluate_one(q, env))
}

fn evaluate_one(query: &str, env: &MediaEnv) -> bool {
    let lower = query.to_ascii_lowercase();
    let (negated, rest) = match lower.strip_prefix("not ") {
        Some(rest) => (true, rest.trim()),
        None => (false, lower.strip_prefix("only ").unwrap_or(lower.as_str()).trim()),
    };
    let matched = rest.split(" and ").map(str::trim).all(|part| {
        match part.strip_prefix('(').and_then(|p| p.strip_suffix(')')) {
            Some(feature) => evaluate_feature(feature, env),
            None => matches!(part, "all" | "screen"),
        }
    });
    matched != negated
}

fn evaluate_feature(feature: &str, env: &MediaEnv) -> bool {
    let Some((name, value)) = feature.split_once(':') else {
        // Boolean context: `(color)`, `(hover)` and friends.
        return matches!(feature.trim(), "color" | "hover" | "pointer");
    };
    let name = name.trim();
    let value = value.trim();
    let (bound, base) = if let Some(base) = name.strip_prefix("min-") {
        (Some(std::cmp::Ordering::Greater), base)
    } else if let Some(base) = name.strip_prefix("max-") {
        (Some(std::cmp::Ordering::Less), base)
    } else {
        (None, name)
    };
    let actual = match base {
        "width" => env.width,
        "height" => env.height,
        "resolution" => env.dppx,
        "orientation" => {
            let landscape = env.width >= env.height;
            return value == if landscape { "landscape" } else { "portrait" };
        }
        "prefers-color-scheme" => return value == "light",
        "prefers-reduced-motion" => return value == "no-preference",
        _ => return false,
    };
    let Some(wanted) = parse_length(value) else {
        return false;
    };
    match bound {
        None => (actual - wanted).abs() < 1e-6,
        Some(std::cmp::Ordering::Greater) => actual >= wanted,
        Some(_) => actual <= wanted,
    }
}

/// `600px`, `2dppx`, `2x`, `192dpi`. Resolutions normalise to dppx.
fn parse_length(value: &str) -> Option<f64> {
    let units = [("dppx", 1.0), ("dpi", 1.0 / 96.0), ("px", 1.0), ("x", 1.0)];
    for (suffix, scale) in units {
        if let Some(num) = value.strip_suffix(suffix) {
            return num.trim().parse::<f64>().ok().map(|n| n * scale);
        }
    }
    value.parse().ok()
}

/// The document tree and window the guest sees.
pub struct Dom {
    pub window: Rc<Window>,
    pub document: Rc<Document>,
    media: Vec<Weak<MediaQueryList>>,
    max_webgl: u8,
}

impl Dom {
    pub fn new(config: &HostConfig) -> Self {
        let document = Rc::new(Document::default());
        for canvas in &config.canvases {
            let element = Rc::new(Element::new("canvas", canvas.width, canvas.height));
            element
                .attributes
                .borrow_mut()
                .insert("id".to_string(), canvas.id.clone());
            document.adopt(element);
        }
        let window = Rc::new(Window {
            inner_width: Cell::new(config.window.inner_width),
            inner_height: Cell::new(config.window.inner_height),
            device_pixel_ratio: Cell::new(config.window.device_pixel_ratio),
            listeners: Listeners::default(),
            document: Rc::clone(&document),
            crypto: HostRef::new(Crypto),
            performance: HostRef::new(Performance),
            local_storage: HostRef::new(LocalStorage),
        });
        Self {
            window,
            document,
            media: Vec::new(),
            max_webgl: config.webgl.max_version,
        }
    }

    pub fn window_value(&self) -> HostValue {
        HostValue::Object(HostRef::from_rc(Rc::clone(&self.window)))
    }

    pub fn document_value(&self) -> HostValue {
        HostValue::Object(HostRef::from_rc(Rc::clone(&self.document)))
    }

    pub fn max_webgl(&self) -> u8 {
        self.max_webgl
    }

    pub fn match_media(&mut self, query: &str) -> Rc<MediaQueryList> {
        let list = Rc::new(MediaQueryList {
            media: query.to_string(),
            matches: Cell::new(evaluate_media(query, &self.window.media_env())),
            listeners: Listeners::default(),
        });
        self.media.retain(|w| w.strong_count() > 0);
        self.media.push(Rc::downgrade(&list));
        list
    }

    /// Apply a new viewport and return the media lists whose result flipped.
    pub fn resize(&mut self, width: u32, height: u32, dppx: f64) -> Vec<Rc<MediaQueryList>> {
        self.window.inner_width.set(width);
        self.window.inner_height.set(height);
        self.window.device_pixel_ratio.set(dppx);
        let env = self.window.media_env();
        self.media.retain(|w| w.strong_count() > 0);
        self.media
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|list| {
                let now = evaluate_media(&list.media, &env);
                now != list.matches.replace(now)
            })
            .collect()
    }

    /// Event path for `target`: the element, then document and window when
    /// it is attached.
    pub fn event_path(&self, target: &HostValue) -> Vec<HostValue> {
        let Some(obj) = target.as_host_ref() else {
            return vec![target.clone()];
        };
        if let Some(element) = obj.downcast::<Element>() {
            if element.is_connected() {
                return vec![target.clone(), self.document_value(), self.window_value()];
            }
        } else if obj.is::<Document>() {
            return vec![target.clone(), self.window_value()];
        }
        vec![target.clone()]
    }
}
