//! Guest engine assembly.
//!
//! A [`JsEngine`] is one Boa context with the native `__hostjs` bindings, the
//! resolver-backed module loader, the guest job queue, globals and polyfills
//! installed. It is built on and confined to the scheduler's thread.

pub mod context;
pub mod conversions;

mod bindings;
mod job_executor;
mod loader;


pub use bindings::{BINDINGS_GLOBAL, GUEST_LOG_TARGET};
pub use context::{ContextBuilderHook, ContextHook, EngineSetup, JsEngine, INLINE_ORIGIN};
pub use conversions::{js_value_to_json, json_to_js_value};
pub use job_executor::GuestJobQueue;
