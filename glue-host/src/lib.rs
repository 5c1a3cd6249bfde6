//! Headless host for wasm-bindgen guests.
//!
//! The guest's `wbg` imports are resolved against a static catalogue of
//! adapters ([`imports`]), each running against emulated browser state
//! ([`host`]). A [`Glue`] compiles and instantiates the module; the resulting
//! [`Runtime`] is driven by pumping its event loop.

pub mod config;
pub mod event_loop;
pub mod guest;
pub mod handle;
pub mod host;
pub mod imports;
pub mod runtime;
pub mod source;

#[cfg(test)]
mod testing;

pub use config::{HostConfig, CONFIG_FILE};
pub use event_loop::PumpReport;
pub use host::{HostState, HostStats};
pub use imports::{catalogue, ImportPlan, Resolution};
pub use runtime::{Glue, Runtime, RuntimeStats};
pub use source::ModuleSource;
