//! HostJS Common Types
//!
//! This crate holds what every HostJS component agrees on:
//!
//! - [`error`] - the failure taxonomy (resolution, compilation, scheduling,
//!   caching, guest execution)
//! - [`config`] - runner, scheduler and TypeScript configuration
//! - [`cache_key`] - the stable locator encoding used by the dependency cache
//!
//! # Example
//!
//! ```
//! use hostjs_common::{cache_key, RunnerConfig};
//!
//! let config = RunnerConfig::new("/srv/project", "/var/cache/hostjs");
//! assert!(config.validate().is_ok());
//!
//! let key = cache_key::encode_locator("https://example.test/lib.js");
//! assert_eq!(cache_key::decode_key(&key).unwrap(), "https://example.test/lib.js");
//! ```

pub mod cache_key;
pub mod config;
pub mod error;

pub use config::{ModuleType, RunnerConfig, SchedulerConfig, TypeScriptConfig, TYPESCRIPT_SOURCES};
pub use error::{
    CacheError, CompilationError, HostjsError, ResolutionError, Result, SchedulerError,
};
