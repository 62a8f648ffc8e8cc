//! A request-handling JavaScript runtime for wasm guests.
//!
//! Guest programs define a global handler function. The runtime lifts each
//! flattened request into a JS request object, calls the handler, drives
//! any returned promise to settlement, drains the job queue and lowers the
//! handler's response back into the flat convention. The embedded engine
//! ships a small set of builtins (console, UTF-8 text codecs) and tracks
//! promise rejections that no one ever handles.

mod bridge;
mod builtins;
mod diagnostics;
mod driver;
mod error;
mod scope;
#[cfg(target_arch = "wasm32")]
mod wasm;

pub use driver::{FatalPolicy, RuntimeConfig, RuntimeHandle, SessionMode};
pub use error::{Error, Result};
pub use scope::Scope;
