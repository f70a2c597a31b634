//! Error taxonomy shared by every HostJS crate.
//!
//! Each failure class of the runtime has its own enum so callers can match on
//! the stage that failed:
//!
//! - [`ResolutionError`] - no resolver claimed a specifier, or the claiming
//!   resolver could not fetch/generate/locate the module
//! - [`CompilationError`] - the external TypeScript compiler failed
//! - [`SchedulerError`] - the confined executor or background pool refused work
//! - [`CacheError`] - the dependency cache could not be written
//!
//! [`HostjsError`] wraps all of them together with guest execution faults and is
//! what the code runner returns.

use std::path::PathBuf;
use thiserror::Error;

/// A module specifier could not be turned into module source.
///
/// Every variant carries the specifier (or URL) that triggered it so a failed
/// run can be diagnosed without re-running with extra logging.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("Cannot resolve module '{specifier}': no resolver claims it")]
    Unresolvable { specifier: String },

    #[error("Malformed module specifier '{specifier}': {reason}")]
    MalformedSpecifier { specifier: String, reason: String },

    #[error("Cannot resolve module '{specifier}': host package '{package}' is not registered")]
    UnknownHostPackage { specifier: String, package: String },

    #[error("Cannot resolve module '{specifier}': {} does not exist", .path.display())]
    NotFound { specifier: String, path: PathBuf },

    #[error("Failed to download module '{url}': {reason}")]
    Fetch { url: String, reason: String },

    #[error("Failed to download module '{url}': server answered with status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to cache module '{locator}': {reason}")]
    Cache { locator: String, reason: String },

    #[error("Cannot load module '{specifier}': {reason}")]
    Unreadable { specifier: String, reason: String },

    #[error("Cannot require ES module '{specifier}', use import instead")]
    RequireOfEsModule { specifier: String },
}

impl ResolutionError {
    /// The specifier or URL the failure is about.
    pub fn specifier(&self) -> &str {
        match self {
            ResolutionError::Unresolvable { specifier }
            | ResolutionError::MalformedSpecifier { specifier, .. }
            | ResolutionError::UnknownHostPackage { specifier, .. }
            | ResolutionError::NotFound { specifier, .. }
            | ResolutionError::Unreadable { specifier, .. }
            | ResolutionError::RequireOfEsModule { specifier } => specifier,
            ResolutionError::Fetch { url, .. } | ResolutionError::HttpStatus { url, .. } => url,
            ResolutionError::Cache { locator, .. } => locator,
        }
    }
}

/// The external TypeScript compiler could not produce output for a project.
#[derive(Error, Debug)]
pub enum CompilationError {
    #[error("Failed to launch TypeScript compiler '{compiler}' for {}: {source}", .project.display())]
    Launch {
        project: PathBuf,
        compiler: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TypeScript compilation of {} failed ({}):\n{diagnostics}", .project.display(), describe_status(.status))]
    Failed {
        project: PathBuf,
        status: Option<i32>,
        diagnostics: String,
    },
}

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

/// The task scheduler refused or lost a unit of work.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("Scheduler has shut down and no longer accepts tasks")]
    Terminated,

    #[error("The confined thread cannot block waiting on itself")]
    BlockingOnConfinedThread,

    #[error("Background pool has shut down")]
    PoolClosed,

    #[error("Confined thread dropped the task before replying")]
    Disconnected,

    #[error("Failed to start scheduler: {0}")]
    Init(String),
}

/// The dependency cache could not be prepared or written.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to create cache directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write cache entry '{key}': {source}")]
    Write {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level error returned by the code runner.
#[derive(Error, Debug)]
pub enum HostjsError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Compilation(#[from] CompilationError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("JavaScript execution error in {origin}: {message}")]
    Execution { origin: String, message: String },

    #[error("Value conversion error: {0}")]
    Conversion(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

impl HostjsError {
    pub fn execution(origin: impl Into<String>, message: impl Into<String>) -> Self {
        HostjsError::Execution {
            origin: origin.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HostjsError>;
