//! The code runner façade.
//!
//! A [`CodeRunner`] owns one confined engine thread and its background pool.
//! It is assembled by [`CodeRunnerBuilder`] from an explicit, ordered set of
//! polyfills, globals and resolvers:
//!
//! ```text
//! core -> custom resolvers -> @host/ interop -> downloadable (URLs) -> local
//! ```
//!
//! Every public operation blocks the calling thread until the confined thread
//! has produced its result, so none of them may be called from guest code.
//!
//! # Example
//!
//! ```no_run
//! use hostjs_common::RunnerConfig;
//! use hostjs_runtime::CodeRunner;
//!
//! let runner = CodeRunner::builder(RunnerConfig::new("/srv/project", "/var/cache/hostjs"))
//!     .build()?;
//! let value = runner.run("main.js")?;
//! println!("{}", value);
//! runner.close()?;
//! # Ok::<(), hostjs_common::HostjsError>(())
//! ```

use crate::cache::DependencyCache;
use crate::globals::{self, ExecutionContextMap, GlobalBinding};
use crate::modules::{
    CoreModuleResolver, DownloadableModuleResolver, Fetcher, FileSystemRegistry, HostInteropModuleResolver,
    HostPackage, HostRegistry, LocalModuleResolver, ModuleResolver, RegistryPathResolver, ReqwestFetcher,
    ResolverChain,
};
use crate::polyfills::{self, Polyfill};
use crate::runtime::{ContextBuilderHook, ContextHook, EngineSetup, JsEngine, INLINE_ORIGIN};
use crate::scheduler::{BackgroundPool, TaskScheduler};
use crate::typescript::TypeScriptPreprocessor;
use boa_engine::{context::ContextBuilder, Context};
use hostjs_common::{
    CompilationError, HostjsError, ModuleType, Result, RunnerConfig, SchedulerError,
};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

/// Name of the runner's confined thread (suffixed with `-confined`).
const THREAD_NAME: &str = "hostjs";

/// Collects everything a [`CodeRunner`] is built from.
pub struct CodeRunnerBuilder {
    config: RunnerConfig,
    execution_context: ExecutionContextMap,
    polyfills: Vec<Polyfill>,
    globals: Vec<GlobalBinding>,
    resolvers: Vec<Arc<dyn ModuleResolver>>,
    hosts: HostRegistry,
    core: CoreModuleResolver,
    fetcher: Option<Arc<dyn Fetcher>>,
    registry: Option<Arc<dyn RegistryPathResolver>>,
    builder_hooks: Vec<ContextBuilderHook>,
    hooks: Vec<ContextHook>,
}

impl CodeRunnerBuilder {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            execution_context: ExecutionContextMap::new(),
            polyfills: polyfills::defaults(),
            globals: Vec::new(),
            resolvers: Vec::new(),
            hosts: HostRegistry::new(),
            core: CoreModuleResolver::new(),
            fetcher: None,
            registry: None,
            builder_hooks: Vec::new(),
            hooks: Vec::new(),
        }
    }

    /// Request/tenant state exposed as `__context` and through `sdk/core/context`.
    pub fn with_execution_context(mut self, values: ExecutionContextMap) -> Self {
        self.execution_context = values;
        self
    }

    /// Appends a polyfill; it runs after the default ones.
    pub fn add_polyfill(mut self, polyfill: Polyfill) -> Self {
        self.polyfills.push(polyfill);
        self
    }

    /// Appends a global; a later global with the same name wins.
    pub fn add_global(mut self, binding: GlobalBinding) -> Self {
        self.globals.push(binding);
        self
    }

    /// Adds a resolver between the core resolver and the built-in ones.
    pub fn add_module_resolver(mut self, resolver: Arc<dyn ModuleResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    pub fn with_host_registry(mut self, hosts: HostRegistry) -> Self {
        self.hosts = hosts;
        self
    }

    pub fn add_host_package(mut self, package: HostPackage) -> Self {
        self.hosts.register(package);
        self
    }

    /// Adds (or replaces) a built-in module served by the core resolver.
    pub fn with_core_module(mut self, name: impl Into<String>, source: impl AsRef<str>) -> Self {
        self.core = self.core.with_module(name, source);
        self
    }

    /// Replaces the HTTP fetcher used for URL modules and `sdk/http/client`.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Replaces the registry the local resolver reads from (the working
    /// directory by default).
    pub fn with_registry(mut self, registry: Arc<dyn RegistryPathResolver>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Adjusts the Boa context builder before the context is created.
    ///
    /// Hooks run in registration order. The module loader and job executor
    /// are installed afterwards and always belong to the runner.
    pub fn on_before_context_created<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(ContextBuilder) -> ContextBuilder + Send + 'static,
    {
        self.builder_hooks.push(Box::new(hook));
        self
    }

    /// Runs `hook` on the fresh context, before globals and polyfills.
    pub fn on_context_created<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&mut Context) -> Result<()> + Send + 'static,
    {
        self.hooks.push(Box::new(hook));
        self
    }

    /// Creates the cache directories, the background pool and the confined
    /// engine thread.
    ///
    /// # Errors
    ///
    /// Returns `HostjsError::Config` for an invalid configuration, a cache error
    /// if a cache directory cannot be created, and a scheduler error if the
    /// engine cannot be initialized (a failing polyfill or hook included).
    pub fn build(self) -> Result<CodeRunner> {
        let Self {
            config,
            execution_context,
            polyfills,
            globals: extra_globals,
            resolvers,
            hosts,
            core,
            fetcher,
            registry,
            builder_hooks,
            hooks,
        } = self;

        config.validate().map_err(HostjsError::Config)?;

        let dependencies = DependencyCache::open(config.dependencies_cache_dir())?;
        let proxies = DependencyCache::open(config.host_modules_cache_dir())?;
        let pool = BackgroundPool::new(&config.scheduler)?;

        let hosts = Arc::new(hosts);
        let fetcher =
            fetcher.unwrap_or_else(|| Arc::new(ReqwestFetcher::new()) as Arc<dyn Fetcher>);
        let registry = registry.unwrap_or_else(|| {
            Arc::new(FileSystemRegistry::new(&config.working_dir)) as Arc<dyn RegistryPathResolver>
        });

        let mut chain = ResolverChain::new().with(Arc::new(core));
        for resolver in resolvers {
            chain.push(resolver);
        }
        chain.push(Arc::new(HostInteropModuleResolver::new(Arc::clone(&hosts), proxies)));
        chain.push(Arc::new(DownloadableModuleResolver::new(
            dependencies,
            Arc::clone(&fetcher),
            pool.clone(),
        )));
        chain.push(Arc::new(LocalModuleResolver::new(registry, &config.working_dir)));
        tracing::debug!(resolvers = ?chain.names(), "Resolver chain assembled");

        let mut all_globals = globals::defaults(execution_context);
        all_globals.extend(extra_globals);

        let setup = EngineSetup {
            chain: Arc::new(chain),
            hosts,
            fetcher,
            pool: pool.clone(),
            polyfills,
            globals: all_globals,
            builder_hooks,
            hooks,
        };
        let scheduler = TaskScheduler::start(THREAD_NAME, pool, move || JsEngine::new(setup))?;

        tracing::info!(working_dir = %config.working_dir.display(), "Code runner started");
        Ok(CodeRunner {
            typescript: TypeScriptPreprocessor::new(config.typescript.clone()),
            config,
            scheduler,
            closed: AtomicBool::new(false),
        })
    }
}

/// Runs scripts in one confined engine context.
pub struct CodeRunner {
    config: RunnerConfig,
    typescript: TypeScriptPreprocessor,
    scheduler: TaskScheduler<JsEngine>,
    closed: AtomicBool,
}

impl CodeRunner {
    pub fn builder(config: RunnerConfig) -> CodeRunnerBuilder {
        CodeRunnerBuilder::new(config)
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// The scheduler owning the engine, for callers that submit their own work.
    pub fn scheduler(&self) -> &TaskScheduler<JsEngine> {
        &self.scheduler
    }

    /// Runs the entry point at `path` (relative to the working directory).
    ///
    /// A `.ts` entry point first goes through the TypeScript preprocessor on the
    /// background pool; the compiled `.js` output is then run on the confined
    /// thread.
    ///
    /// # Errors
    ///
    /// - `HostjsError::Resolution` when a `require` or `import` cannot be resolved
    /// - `HostjsError::Execution` when the guest throws or a promise rejects
    /// - `HostjsError::Compilation` when a TypeScript entry point fails to compile
    /// - `HostjsError::Conversion` when the result cannot be represented as JSON
    /// - `HostjsError::Scheduler` after [`CodeRunner::close`] or when called from
    ///   the confined thread
    pub fn run(&self, path: impl AsRef<Path>) -> Result<JsonValue> {
        let entry = self.config.working_dir.join(path.as_ref());
        if TypeScriptPreprocessor::is_typescript(&entry) {
            return self.run_typescript(entry);
        }

        let es_module = self.config.module_type.is_es_module(&entry);
        tracing::debug!(entry = %entry.display(), es_module, "Running entry point");
        self.scheduler
            .call(move |engine| engine.run_file(&entry, es_module))?
    }

    /// Runs inline source. It is an ES module only under `ModuleType::EsModule`.
    ///
    /// # Errors
    ///
    /// Same as [`CodeRunner::run`], with failures reported under `<inline>`.
    pub fn run_source(&self, source: impl Into<String>) -> Result<JsonValue> {
        self.run_named_source(source, INLINE_ORIGIN)
    }

    /// Like [`CodeRunner::run_source`], reporting failures under `name`.
    pub fn run_named_source(&self, source: impl Into<String>, name: impl Into<String>) -> Result<JsonValue> {
        let source = source.into();
        let name = name.into();
        let es_module = self.config.module_type == ModuleType::EsModule;
        self.scheduler
            .call(move |engine| engine.run_source(&source, &name, es_module))?
    }

    /// Parses the entry point at `path` without running it.
    ///
    /// # Errors
    ///
    /// Returns `HostjsError::Execution`, with the file as origin, for syntax
    /// errors and for files that cannot be read.
    pub fn check(&self, path: impl AsRef<Path>) -> Result<()> {
        let entry = self.config.working_dir.join(path.as_ref());
        let es_module = self.config.module_type.is_es_module(&entry);
        self.scheduler
            .call(move |engine| engine.check_file(&entry, es_module))?
    }

    /// Parses inline source without running it.
    pub fn check_source(&self, source: impl Into<String>) -> Result<()> {
        let source = source.into();
        let es_module = self.config.module_type == ModuleType::EsModule;
        self.scheduler
            .call(move |engine| engine.check_source(&source, INLINE_ORIGIN, es_module))?
    }

    /// Defines a global on the live context.
    ///
    /// # Errors
    ///
    /// Returns `HostjsError::Scheduler` once the runner is closed.
    pub fn add_global(&self, binding: GlobalBinding) -> Result<()> {
        self.scheduler.call(move |engine| engine.set_global(binding))?
    }

    fn run_typescript(&self, entry: PathBuf) -> Result<JsonValue> {
        if self.scheduler.is_confined_thread() {
            return Err(SchedulerError::BlockingOnConfinedThread.into());
        }

        let project = self.config.working_dir.clone();
        let preprocessor = self.typescript.clone();
        // Compiled TypeScript is ESM unless CommonJS output was asked for.
        let es_module = self.config.module_type != ModuleType::CommonJs;

        let (tx, rx) = mpsc::channel::<Result<JsonValue>>();
        let failed = tx.clone();
        self.scheduler.submit_async(
            move || preprocessor.prepare(&project, &entry),
            move |engine: &mut JsEngine, compiled: PathBuf| {
                tracing::debug!(entry = %compiled.display(), "Running compiled TypeScript");
                let _ = tx.send(engine.run_file(&compiled, es_module));
            },
            move |_engine: &mut JsEngine, error: CompilationError| {
                let _ = failed.send(Err(error.into()));
            },
        )?;

        rx.recv().map_err(|_| SchedulerError::Disconnected)?
    }

    /// Waits for queued work, stops the engine thread and the background pool.
    ///
    /// Only the first call does anything; later calls return `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::BlockingOnConfinedThread` when called from guest
    /// code. Exceeding the close timeout is logged, not returned.
    pub fn close(&self) -> Result<()> {
        if self.scheduler.is_confined_thread() {
            return Err(SchedulerError::BlockingOnConfinedThread.into());
        }
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let timeout = self.config.scheduler.close_timeout;
        if !self.scheduler.await_termination(timeout)? {
            tracing::warn!(?timeout, "Code runner did not drain before the close timeout");
        }
        self.scheduler.pool().shutdown();
        tracing::info!("Code runner closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for CodeRunner {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "Failed to close code runner");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn runner(project: &TempDir, caches: &TempDir) -> CodeRunner {
        CodeRunner::builder(RunnerConfig::new(project.path(), caches.path()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_creates_cache_dirs() {
        let project = TempDir::new().unwrap();
        let caches = TempDir::new().unwrap();
        let runner = runner(&project, &caches);
        assert!(runner.config().dependencies_cache_dir().is_dir());
        assert!(runner.config().host_modules_cache_dir().is_dir());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let caches = TempDir::new().unwrap();
        let config = RunnerConfig::new("", caches.path());
        assert!(matches!(
            CodeRunner::builder(config).build(),
            Err(HostjsError::Config(_))
        ));
    }

    #[test]
    fn test_run_relative_to_working_dir() {
        let project = TempDir::new().unwrap();
        let caches = TempDir::new().unwrap();
        std::fs::write(project.path().join("main.js"), "6 * 7").unwrap();
        assert_eq!(runner(&project, &caches).run("main.js").unwrap(), json!(42));
    }

    #[test]
    fn test_state_persists_between_runs() {
        let project = TempDir::new().unwrap();
        let caches = TempDir::new().unwrap();
        let runner = runner(&project, &caches);
        runner.run_source("globalThis.visits = 1;").unwrap();
        runner.run_source("visits += 1;").unwrap();
        assert_eq!(runner.run_source("visits").unwrap(), json!(2));
    }

    #[test]
    fn test_close_is_idempotent_and_rejects_later_runs() {
        let project = TempDir::new().unwrap();
        let caches = TempDir::new().unwrap();
        let runner = runner(&project, &caches);
        runner.close().unwrap();
        runner.close().unwrap();
        assert!(runner.is_closed());
        assert!(matches!(
            runner.run_source("1"),
            Err(HostjsError::Scheduler(SchedulerError::Terminated))
        ));
    }

    #[test]
    fn test_builder_hook_applies_before_context_hook() {
        let project = TempDir::new().unwrap();
        let caches = TempDir::new().unwrap();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (before, after) = (Arc::clone(&order), Arc::clone(&order));

        let runner = CodeRunner::builder(RunnerConfig::new(project.path(), caches.path()))
            .on_before_context_created(move |builder| {
                before.lock().unwrap().push("before");
                builder.can_block(false)
            })
            .on_context_created(move |_context| {
                after.lock().unwrap().push("created");
                Ok(())
            })
            .build()
            .unwrap();

        assert_eq!(runner.run_source("'ready'").unwrap(), json!("ready"));
        assert_eq!(*order.lock().unwrap(), vec!["before", "created"]);
    }

    #[test]
    fn test_cyclic_result_is_an_error_not_a_crash() {
        let project = TempDir::new().unwrap();
        let caches = TempDir::new().unwrap();
        let runner = runner(&project, &caches);
        assert!(matches!(
            runner.run_source("const a = {}; a.self = a; a"),
            Err(HostjsError::Conversion(_))
        ));
        assert_eq!(runner.run_source("'still alive'").unwrap(), json!("still alive"));
    }
}
