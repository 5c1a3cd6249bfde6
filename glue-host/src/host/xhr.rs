use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::Read;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Context;
use gru_glue_core::{HostError, HostValue};

use crate::config::FetchConfig;
use crate::host::events::Listeners;
use crate::host::js;
use crate::host::typed_array::ArrayBuffer;

pub const UNSENT: u16 = 0;
pub const OPENED: u16 = 1;
pub const DONE: u16 = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseType {
    #[default]
    Text,
    ArrayBuffer,
    Json,
}

impl ResponseType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "" | "text" => Some(ResponseType::Text),
            "arraybuffer" => Some(ResponseType::ArrayBuffer),
            "json" => Some(ResponseType::Json),
            _ => None,
        }
    }

    fn decode(self, body: Vec<u8>) -> HostValue {
        match self {
            ResponseType::Text => HostValue::from(String::from_utf8_lossy(&body).into_owned()),
            ResponseType::ArrayBuffer => HostValue::object(ArrayBuffer::new(body)),
            ResponseType::Json => match serde_json::from_slice(&body) {
                Ok(value) => js::from_json(value),
                Err(e) => {
                    log::debug!("response is not valid JSON: {e}");
                    HostValue::Null
                }
            },
        }
    }
}

struct XhrState {
    ready_state: u16,
    method: String,
    url: String,
    asynchronous: bool,
    response_type: ResponseType,
    sent: bool,
    status: u16,
    response: HostValue,
}

/// `XMLHttpRequest`. Requests are resolved by the event loop, never while
/// the guest is running.
pub struct XmlHttpRequest {
    pub listeners: Listeners,
    state: RefCell<XhrState>,
}

impl Default for XmlHttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl XmlHttpRequest {
    pub fn new() -> Self {
        Self {
            listeners: Listeners::default(),
            state: RefCell::new(XhrState {
                ready_state: UNSENT,
                method: String::new(),
                url: String::new(),
                asynchronous: true,
                response_type: ResponseType::Text,
                sent: false,
                status: 0,
                response: HostValue::Null,
            }),
        }
    }

    pub fn open(&self, method: &str, url: &str, asynchronous: bool) -> Result<(), HostError> {
        if method.is_empty() || !method.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
            return Err(HostError::syntax(format!("`{method}` is not a valid HTTP method")));
        }
        let method = method.to_ascii_uppercase();
        if matches!(method.as_str(), "CONNECT" | "TRACE" | "TRACK") {
            return Err(HostError::security(format!("`{method}` is a forbidden method")));
        }
        let mut state = self.state.borrow_mut();
        state.ready_state = OPENED;
        state.method = method;
        state.url = url.to_string();
        state.asynchronous = asynchronous;
        state.sent = false;
        state.status = 0;
        state.response = HostValue::Null;
        Ok(())
    }

    pub fn set_response_type(&self, value: &str) -> Result<(), HostError> {
        let mut state = self.state.borrow_mut();
        if state.sent {
            return Err(HostError::invalid_state(
                "responseType cannot change once the request is sent",
            ));
        }
        match ResponseType::parse(value) {
            Some(ty) => state.response_type = ty,
            None => log::warn!("ignoring unsupported responseType `{value}`"),
        }
        Ok(())
    }

    pub fn response_type(&self) -> ResponseType {
        self.state.borrow().response_type
    }

    pub fn ready_state(&self) -> u16 {
        self.state.borrow().ready_state
    }

    pub fn status(&self) -> u16 {
        self.state.borrow().status
    }

    /// `null` until the request is done.
    pub fn response(&self) -> HostValue {
        let state = self.state.borrow();
        if state.ready_state != DONE {
            return match state.response_type {
                ResponseType::Text => HostValue::from(""),
                _ => HostValue::Null,
            };
        }
        state.response.clone()
    }

    pub fn url(&self) -> String {
        self.state.borrow().url.clone()
    }

    pub fn method(&self) -> String {
        self.state.borrow().method.clone()
    }

    fn mark_sent(&self) -> Result<(), HostError> {
        let mut state = self.state.borrow_mut();
        if state.ready_state != OPENED || state.sent {
            return Err(HostError::invalid_state("the object's state must be OPENED"));
        }
        state.sent = true;
        Ok(())
    }

    fn complete(&self, outcome: &Outcome) {
        let mut state = self.state.borrow_mut();
        state.ready_state = DONE;
        match outcome {
            Outcome::Loaded { status, body } => {
                state.status = *status;
                state.response = state.response_type.decode(body.clone());
            }
            Outcome::Failed(_) => {
                state.status = 0;
                state.response = match state.response_type {
                    ResponseType::Text => HostValue::from(""),
                    _ => HostValue::Null,
                };
            }
        }
    }
}

/// How a request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Loaded { status: u16, body: Vec<u8> },
    Failed(String),
}

impl Outcome {
    /// Event fired before `loadend`.
    pub fn event(&self) -> &'static str {
        match self {
            Outcome::Loaded { .. } => "load",
            Outcome::Failed(_) => "error",
        }
    }
}

/// Requests sent by the guest, waiting for the event loop.
pub struct FetchQueue {
    config: FetchConfig,
    pending: VecDeque<Rc<XmlHttpRequest>>,
    finished: Vec<(Rc<XmlHttpRequest>, Outcome)>,
}

impl FetchQueue {
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            config: config.clone(),
            pending: VecDeque::new(),
            finished: Vec::new(),
        }
    }

    /// `xhr.send()`. Synchronous requests are fetched right away; their
    /// events still go out with the next pump.
    pub fn send(&mut self, xhr: Rc<XmlHttpRequest>) -> Result<(), HostError> {
        xhr.mark_sent()?;
        if xhr.state.borrow().asynchronous {
            self.pending.push_back(xhr);
        } else {
            let outcome = fetch(&self.config, &xhr.url());
            xhr.complete(&outcome);
            self.finished.push((xhr, outcome));
        }
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.pending.len() + self.finished.len()
    }

    /// Resolve every queued request, in send order.
    pub fn resolve_all(&mut self) -> Vec<(Rc<XmlHttpRequest>, Outcome)> {
        let mut done = std::mem::take(&mut self.finished);
        while let Some(xhr) = self.pending.pop_front() {
            let outcome = fetch(&self.config, &xhr.url());
            xhr.complete(&outcome);
            done.push((xhr, outcome));
        }
        done
    }
}

enum Target {
    File(PathBuf),
    Http(String),
}

fn locate(config: &FetchConfig, raw: &str) -> anyhow::Result<Target> {
    match url::Url::parse(raw) {
        Ok(url) => match url.scheme() {
            "file" => url
                .to_file_path()
                .map(Target::File)
                .map_err(|()| anyhow::anyhow!("`{raw}` is not a usable file URL")),
            "http" | "https" => Ok(Target::Http(url.to_string())),
            other => anyhow::bail!("unsupported URL scheme `{other}`"),
        },
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let path = raw.split(['?', '#']).next().unwrap_or_default();
            Ok(Target::File(config.base_dir.join(path.trim_start_matches('/'))))
        }
        Err(e) => Err(e).with_context(|| format!("invalid URL `{raw}`")),
    }
}

/// Resolve `raw` against the fetch configuration.
///
/// A missing file answers 404 and an unreadable one 403, the way a static
/// file server would; everything else is a network error.
pub fn fetch(config: &FetchConfig, raw: &str) -> Outcome {
    let result = locate(config, raw).and_then(|target| match target {
        Target::File(path) => match std::fs::read(&path) {
            Ok(body) => Ok(Outcome::Loaded { status: 200, body }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Outcome::Loaded {
                status: 404,
                body: Vec::new(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => Ok(Outcome::Loaded {
                status: 403,
                body: Vec::new(),
            }),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        },
        Target::Http(url) if config.allow_network => http_get(&url),
        Target::Http(url) => anyhow::bail!("network access is disabled (requested {url})"),
    });
    match result {
        Ok(outcome) => {
            log::debug!("fetched {raw}: {}", outcome.event());
            outcome
        }
        Err(e) => {
            log::warn!("request for {raw} failed: {e:#}");
            Outcome::Failed(format!("{e:#}"))
        }
    }
}

fn http_get(url: &str) -> anyhow::Result<Outcome> {
    let resp = ureq::get(url)
        .config()
        .http_status_as_error(false)
        .build()
        .call()
        .with_context(|| format!("GET {url}"))?;
    let status: u16 = resp.status().into();
    let mut body = Vec::new();
    resp.into_body()
        .into_reader()
        .read_to_end(&mut body)
        .context("reading response body")?;
    Ok(Outcome::Loaded { status, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> FetchConfig {
        FetchConfig {
            base_dir: dir.to_path_buf(),
            allow_network: false,
        }
    }

    #[test]
    fn test_relative_and_file_urls() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("level.json"), br#"{"tiles": [1, 2]}"#).unwrap();
        let config = config(dir.path());

        assert_eq!(
            fetch(&config, "level.json?v=3"),
            Outcome::Loaded {
                status: 200,
                body: br#"{"tiles": [1, 2]}"#.to_vec()
            }
        );
        let url = url::Url::from_file_path(dir.path().join("level.json")).unwrap();
        assert!(matches!(fetch(&config, url.as_str()), Outcome::Loaded { status: 200, .. }));
        assert!(matches!(fetch(&config, "missing.bin"), Outcome::Loaded { status: 404, .. }));
    }

    #[test]
    fn test_network_disabled_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = fetch(&config(dir.path()), "https://example.com/asset.bin");
        assert_eq!(outcome.event(), "error");
        assert!(matches!(fetch(&config(dir.path()), "ftp://host/x"), Outcome::Failed(_)));
    }

    #[test]
    fn test_request_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.json"), br#"{"ok": true}"#).unwrap();
        let mut queue = FetchQueue::new(&config(dir.path()));

        let xhr = Rc::new(XmlHttpRequest::new());
        assert_eq!(queue.send(Rc::clone(&xhr)).unwrap_err().name, "InvalidStateError");
        xhr.open("get", "data.json", true).unwrap();
        xhr.set_response_type("json").unwrap();
        queue.send(Rc::clone(&xhr)).unwrap();
        assert_eq!(xhr.set_response_type("text").unwrap_err().name, "InvalidStateError");
        assert_eq!(xhr.ready_state(), OPENED);
        assert!(xhr.response().is_like_none());

        let done = queue.resolve_all();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].1.event(), "load");
        assert_eq!(xhr.ready_state(), DONE);
        assert_eq!(xhr.status(), 200);
        assert_eq!(js::property(&xhr.response(), "ok").as_bool(), Some(true));
        assert_eq!(xhr.method(), "GET");
    }

    #[test]
    fn test_forbidden_and_malformed_methods() {
        let xhr = XmlHttpRequest::new();
        assert_eq!(xhr.open("TRACE", "/", true).unwrap_err().name, "SecurityError");
        assert_eq!(xhr.open("GE T", "/", true).unwrap_err().name, "SyntaxError");
    }

    #[test]
    fn test_synchronous_send_completes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let mut queue = FetchQueue::new(&config(dir.path()));
        let xhr = Rc::new(XmlHttpRequest::new());
        xhr.open("GET", "a.txt", false).unwrap();
        queue.send(Rc::clone(&xhr)).unwrap();
        assert_eq!(xhr.response().as_str(), Some("hello"));
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.resolve_all().len(), 1);
        assert_eq!(queue.pending(), 0);
    }
}
