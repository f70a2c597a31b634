//! HostJS Runtime
//!
//! Hosts guest JavaScript (and TypeScript, through an external compiler) in a
//! Boa engine confined to a single thread.
//!
//! - [`runner`] - the [`CodeRunner`] façade and its builder
//! - [`scheduler`] - the confined thread and the background pool
//! - [`modules`] - the resolver chain: core, host interop, downloadable, local
//! - [`cache`] - the on-disk dependency cache
//! - [`typescript`] - the TypeScript preprocessor
//! - [`polyfills`] and [`globals`] - what every fresh context starts with
//! - [`runtime`] - engine assembly and value conversion

pub mod cache;
pub mod globals;
pub mod modules;
pub mod polyfills;
pub mod runner;
pub mod runtime;
pub mod scheduler;
pub mod typescript;

pub use cache::DependencyCache;
pub use globals::{ExecutionContextMap, GlobalBinding};
pub use modules::{HostPackage, HostRegistry, ModuleResolver, ResolvedModule, ResolverChain};
pub use polyfills::Polyfill;
pub use runner::{CodeRunner, CodeRunnerBuilder};
pub use runtime::JsEngine;
pub use scheduler::{BackgroundPool, SchedulerPhase, TaskScheduler};
pub use typescript::TypeScriptPreprocessor;
