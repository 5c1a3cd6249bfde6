//! Headless host capabilities and the per-instance state that owns them.

pub mod audio;
pub mod dom;
pub mod events;
pub mod gl;
pub mod js;
pub mod storage;
pub mod timers;
pub mod typed_array;
pub mod xhr;

use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::Context;
use gru_glue_core::abi;
use gru_glue_core::{Callback, GlueContext, GlueError, Guest, Trampoline};
use serde::Serialize;

use crate::config::{ClosureConfig, HostConfig};
use crate::guest::GuestExports;

use self::audio::Mixer;
use self::dom::Dom;
use self::storage::Storage;
use self::timers::Timers;
use self::xhr::FetchQueue;

/// Counters reported by `gruglue run`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HostStats {
    pub imports_called: u64,
    /// Host errors handed to the guest through `__wbindgen_exn_store`.
    pub host_faults: u64,
    pub callbacks_run: u64,
    pub callback_failures: u64,
}

/// Everything one guest instance can reach. Lives in the wasmtime store.
pub struct HostState {
    pub glue: GlueContext,
    pub config: HostConfig,
    pub dom: Dom,
    pub timers: Timers,
    pub xhr: FetchQueue,
    pub storage: Storage,
    pub audio: Mixer,
    pub closures: ClosureRegistry,
    pub exports: Option<Rc<GuestExports>>,
    pub stats: HostStats,
}

impl HostState {
    pub fn new(config: HostConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let storage = Storage::open(&config.storage).context("opening localStorage")?;
        Ok(Self {
            glue: GlueContext::new(),
            dom: Dom::new(&config),
            timers: Timers::new(),
            xhr: FetchQueue::new(&config.fetch),
            storage,
            audio: Mixer::new(&config.audio),
            closures: ClosureRegistry::new(&config.closures),
            exports: None,
            stats: HostStats::default(),
            config,
        })
    }

    /// Bind the instance's exports once it exists.
    pub fn attach(&mut self, exports: Rc<GuestExports>) {
        self.closures
            .learn(exports.trampoline_names().iter().map(String::as_str));
        self.exports = Some(exports);
    }
}

/// A [`Guest`] that can also reach the host state. Every import adapter is
/// written against this.
pub trait Embedder: Guest {
    fn host(&mut self) -> &mut HostState;
}

/// Builds [`Callback`]s for `__wbindgen_closure_wrapper<N>`.
///
/// The destructor slot and trampoline come from the closure manifest; for
/// wrappers without an entry the trampoline is picked by arity and may be
/// swapped later, once the callback's use shows how many arguments it takes.
pub struct ClosureRegistry {
    config: ClosureConfig,
    by_arity: BTreeMap<u32, Vec<Rc<str>>>,
}

impl ClosureRegistry {
    pub fn new(config: &ClosureConfig) -> Self {
        Self {
            config: config.clone(),
            by_arity: BTreeMap::new(),
        }
    }

    /// Record the trampoline exports of the instance.
    pub fn learn<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        for name in names {
            if let Some(parsed) = abi::parse_trampoline(name) {
                self.by_arity
                    .entry(parsed.arity)
                    .or_default()
                    .push(Rc::from(name));
            }
        }
        for (arity, names) in &self.by_arity {
            log::debug!("{} trampoline(s) of arity {arity}", names.len());
        }
    }

    pub fn trampolines(&self) -> usize {
        self.by_arity.values().map(Vec::len).sum()
    }

    fn first_of_arity(&self, arity: u32) -> Option<&Rc<str>> {
        self.by_arity.get(&arity).and_then(|names| names.first())
    }

    pub fn wrap(&self, wrapper: u32, a: u32, b: u32) -> anyhow::Result<Callback> {
        if let Some(entry) = self.config.wrapper(wrapper) {
            let parsed = abi::parse_trampoline(&entry.invoke).with_context(|| {
                format!(
                    "closure wrapper {wrapper}: `{}` is not a trampoline export",
                    entry.invoke
                )
            })?;
            let dtor = entry.dtor.unwrap_or(self.config.default_destructor);
            let trampoline = Trampoline::new(entry.invoke.as_str(), parsed.arity);
            return Ok(Callback::new(a, b, dtor, trampoline));
        }

        let candidates = self.by_arity.get(&1).map_or(0, Vec::len);
        let (arity, name) = match self.first_of_arity(1) {
            Some(name) => (1, name),
            None => self
                .by_arity
                .iter()
                .find_map(|(arity, names)| names.first().map(|n| (*arity, n)))
                .ok_or_else(|| GlueError::MissingExport(format!("{}*", abi::TRAMPOLINE_PREFIX)))?,
        };
        if candidates > 1 {
            log::warn!(
                "closure wrapper {wrapper} has no manifest entry; guessing `{name}` out of {candidates} candidates"
            );
        }
        Ok(Callback::new(
            a,
            b,
            self.config.default_destructor,
            Trampoline::new(Rc::clone(name), arity).inferred(),
        ))
    }

    /// The callback to use where the caller knows it passes `arity`
    /// arguments. Only guessed trampolines are swapped.
    pub fn retarget(&self, callback: &Callback, arity: u32) -> Callback {
        let current = callback.trampoline();
        if !current.inferred || current.arity == arity {
            return callback.clone();
        }
        match self.first_of_arity(arity) {
            Some(name) => callback.with_trampoline(Trampoline::new(Rc::clone(name), arity).inferred()),
            None => {
                log::debug!("no trampoline of arity {arity}; keeping `{}`", current.export);
                callback.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WrapperConfig;
    use gru_glue_core::Sandbox;

    fn registry(config: ClosureConfig) -> ClosureRegistry {
        let mut registry = ClosureRegistry::new(&config);
        let names: Vec<String> = (0..=2).map(|n| Sandbox::trampoline(n).export.to_string()).collect();
        registry.learn(names.iter().map(String::as_str).chain(["run", "memory"]));
        registry
    }

    #[test]
    fn test_manifest_entry_wins() {
        let mut config = ClosureConfig::default();
        let invoke = Sandbox::trampoline(0).export.to_string();
        config.wrappers.insert(
            "290".into(),
            WrapperConfig {
                dtor: Some(12),
                invoke: invoke.clone(),
            },
        );
        let registry = registry(config);
        assert_eq!(registry.trampolines(), 3);

        let cb = registry.wrap(290, 64, 1).unwrap();
        assert_eq!(&*cb.trampoline().export, invoke.as_str());
        assert!(!cb.trampoline().inferred);
        assert!(format!("{cb:?}").contains("dtor: 12"));
        // Explicit trampolines are never swapped.
        assert!(registry.retarget(&cb, 1).trampoline().arity == 0);
    }

    #[test]
    fn test_guess_then_retarget() {
        let registry = registry(ClosureConfig::default());
        let cb = registry.wrap(1001, 64, 1).unwrap();
        assert!(cb.trampoline().inferred);
        assert_eq!(cb.trampoline().arity, 1);
        assert!(format!("{cb:?}").contains("dtor: 47"));

        let timer = registry.retarget(&cb, 0);
        assert_eq!(timer.trampoline().arity, 0);
        assert!(timer.ptr_eq(&cb));
    }

    #[test]
    fn test_bad_manifest_and_no_trampolines() {
        let mut config = ClosureConfig::default();
        config.wrappers.insert(
            "7".into(),
            WrapperConfig {
                dtor: None,
                invoke: "not_a_trampoline".into(),
            },
        );
        let registry = ClosureRegistry::new(&config);
        assert!(registry.wrap(7, 1, 1).is_err());
        assert!(registry.wrap(8, 1, 1).is_err());
    }
}
