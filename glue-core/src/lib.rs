//! Marshalling core shared by the gru glue host and its tests.
//!
//! Holds the pieces that do not depend on any particular wasm engine: the
//! handle table, the host value model, typed memory views, the string codec
//! and the closure adapter. The `sandbox` feature adds an in-process guest
//! for tests.

pub mod abi;
pub mod closure;
pub mod context;
pub mod error;
pub mod guest;
pub mod heap;
pub mod memory;
#[cfg(any(test, feature = "sandbox"))]
pub mod sandbox;
pub mod string;
pub mod value;

pub use closure::{Callback, Trampoline};
pub use context::{GlueContext, GlueStats};
pub use error::{GlueError, Result};
pub use guest::Guest;
pub use heap::HandleTable;
#[cfg(any(test, feature = "sandbox"))]
pub use sandbox::Sandbox;
pub use value::{HostError, HostRef, HostValue};
