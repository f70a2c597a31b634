//! Runner configuration.
//!
//! All configuration is plain data with defaults and `with_*` builder methods.
//! Loading it from files or the environment is left to the embedder; the CLI
//! applies `HOSTJS_*` environment overrides on top of these defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory below the caches root that holds downloaded dependencies.
pub const DEPENDENCIES_CACHE_DIR: &str = "dependencies-cache";

/// Directory below the caches root that holds generated host proxy modules.
pub const HOST_MODULES_CACHE_DIR: &str = "host-modules";

/// How an entry point is handed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleType {
    /// `.mjs` files are ES modules, everything else is a script with `require`.
    #[default]
    BasedOnFileExtension,
    /// Always evaluate entry points as ES modules.
    EsModule,
    /// Always evaluate entry points as scripts with CommonJS `require`.
    CommonJs,
}

impl ModuleType {
    /// Whether the entry point at `path` should be evaluated as an ES module.
    pub fn is_es_module(&self, path: &Path) -> bool {
        match self {
            ModuleType::EsModule => true,
            ModuleType::CommonJs => false,
            ModuleType::BasedOnFileExtension => {
                path.extension().and_then(|e| e.to_str()) == Some("mjs")
            }
        }
    }
}

impl std::str::FromStr for ModuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" | "based-on-file-extension" => Ok(ModuleType::BasedOnFileExtension),
            "esm" | "es-module" => Ok(ModuleType::EsModule),
            "cjs" | "commonjs" | "common-js" => Ok(ModuleType::CommonJs),
            other => Err(format!(
                "unknown module type '{}' (expected auto, esm or cjs)",
                other
            )),
        }
    }
}

/// Sizing of the confined executor's companion background pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Worker threads for async background work (downloads).
    pub background_threads: usize,
    /// Upper bound on threads used for blocking background work (compiler runs, file I/O).
    pub max_blocking_threads: usize,
    /// How long `close()` waits for queued work before giving up.
    pub close_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            background_threads: 4,
            max_blocking_threads: 16,
            close_timeout: Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_background_threads(mut self, threads: usize) -> Self {
        self.background_threads = threads;
        self
    }

    pub fn with_max_blocking_threads(mut self, threads: usize) -> Self {
        self.max_blocking_threads = threads;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Validates the scheduler configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if either thread count is zero or the close timeout is zero.
    pub fn validate(&self) -> Result<(), String> {
        if self.background_threads == 0 {
            return Err("background_threads must be greater than zero".to_string());
        }
        if self.max_blocking_threads == 0 {
            return Err("max_blocking_threads must be greater than zero".to_string());
        }
        if self.close_timeout.is_zero() {
            return Err("close_timeout must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Files below the project root handed to the TypeScript compiler. The walk
/// skips `node_modules`, `.git` and declaration files.
pub const TYPESCRIPT_SOURCES: &str = "**/*.ts";

/// External TypeScript compiler invocation.
///
/// The flag set is fixed; only the compiler executable and the language levels
/// are configurable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeScriptConfig {
    /// Compiler executable, looked up on `PATH` when not absolute.
    pub compiler: String,
    pub target: String,
    pub module: String,
    pub strict: bool,
    pub skip_lib_check: bool,
}

impl Default for TypeScriptConfig {
    fn default() -> Self {
        Self {
            compiler: "tsc".to_string(),
            target: "es2022".to_string(),
            module: "esnext".to_string(),
            strict: true,
            skip_lib_check: true,
        }
    }
}

impl TypeScriptConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compiler(mut self, compiler: impl Into<String>) -> Self {
        self.compiler = compiler.into();
        self
    }

    /// Command-line arguments for one compiler run over `files`.
    pub fn compiler_args<I, P>(&self, files: I) -> Vec<String>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut args = vec![
            "--target".to_string(),
            self.target.clone(),
            "--module".to_string(),
            self.module.clone(),
            "--strict".to_string(),
            self.strict.to_string(),
            "--skipLibCheck".to_string(),
            self.skip_lib_check.to_string(),
        ];
        args.extend(files.into_iter().map(|f| f.as_ref().display().to_string()));
        args
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.compiler.trim().is_empty() {
            return Err("TypeScript compiler command must not be empty".to_string());
        }
        Ok(())
    }
}

/// Everything a code runner needs to be built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Project root; relative entry paths and specifiers resolve against it.
    pub working_dir: PathBuf,
    /// Root of the on-disk caches.
    pub caches_dir: PathBuf,
    #[serde(default)]
    pub module_type: ModuleType,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub typescript: TypeScriptConfig,
}

impl RunnerConfig {
    pub fn new(working_dir: impl Into<PathBuf>, caches_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            caches_dir: caches_dir.into(),
            module_type: ModuleType::default(),
            scheduler: SchedulerConfig::default(),
            typescript: TypeScriptConfig::default(),
        }
    }

    pub fn with_module_type(mut self, module_type: ModuleType) -> Self {
        self.module_type = module_type;
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_typescript(mut self, typescript: TypeScriptConfig) -> Self {
        self.typescript = typescript;
        self
    }

    pub fn dependencies_cache_dir(&self) -> PathBuf {
        self.caches_dir.join(DEPENDENCIES_CACHE_DIR)
    }

    pub fn host_modules_cache_dir(&self) -> PathBuf {
        self.caches_dir.join(HOST_MODULES_CACHE_DIR)
    }

    /// Validates the whole configuration tree.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory path is empty or a nested section is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.working_dir.as_os_str().is_empty() {
            return Err("working_dir must be provided".to_string());
        }
        if self.caches_dir.as_os_str().is_empty() {
            return Err("caches_dir must be provided".to_string());
        }
        self.scheduler.validate()?;
        self.typescript.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_type_by_extension() {
        let auto = ModuleType::BasedOnFileExtension;
        assert!(auto.is_es_module(Path::new("app/main.mjs")));
        assert!(!auto.is_es_module(Path::new("app/main.js")));
        assert!(!auto.is_es_module(Path::new("app/main")));
        assert!(ModuleType::EsModule.is_es_module(Path::new("main.js")));
        assert!(!ModuleType::CommonJs.is_es_module(Path::new("main.mjs")));
    }

    #[test]
    fn test_module_type_parse() {
        assert_eq!("esm".parse::<ModuleType>(), Ok(ModuleType::EsModule));
        assert_eq!("cjs".parse::<ModuleType>(), Ok(ModuleType::CommonJs));
        assert_eq!("auto".parse::<ModuleType>(), Ok(ModuleType::BasedOnFileExtension));
        assert!("amd".parse::<ModuleType>().is_err());
    }

    #[test]
    fn test_scheduler_defaults_validate() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.close_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_scheduler_rejects_zero_values() {
        assert!(SchedulerConfig::new().with_background_threads(0).validate().is_err());
        assert!(SchedulerConfig::new().with_max_blocking_threads(0).validate().is_err());
        assert!(SchedulerConfig::new()
            .with_close_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_compiler_args_are_fixed() {
        let args = TypeScriptConfig::default().compiler_args(["a.ts", "lib/b.ts"]);
        assert_eq!(
            args,
            vec![
                "--target", "es2022", "--module", "esnext", "--strict", "true",
                "--skipLibCheck", "true", "a.ts", "lib/b.ts",
            ]
        );
    }

    #[test]
    fn test_runner_config_cache_dirs() {
        let config = RunnerConfig::new("/work", "/caches");
        assert_eq!(
            config.dependencies_cache_dir(),
            PathBuf::from("/caches/dependencies-cache")
        );
        assert_eq!(config.host_modules_cache_dir(), PathBuf::from("/caches/host-modules"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_runner_config_requires_paths() {
        let config = RunnerConfig::new("", "/caches");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_typescript_config_has_no_source_setting() {
        let value = serde_json::to_value(TypeScriptConfig::default()).unwrap();
        assert!(value.get("include_pattern").is_none());
        assert_eq!(TYPESCRIPT_SOURCES, "**/*.ts");
        assert!(TypeScriptConfig::new().with_compiler("  ").validate().is_err());
    }

    #[test]
    fn test_runner_config_deserializes_with_defaults() {
        let config: RunnerConfig =
            serde_json::from_str(r#"{"working_dir": "/w", "caches_dir": "/c", "module_type": "es-module"}"#)
                .unwrap();
        assert_eq!(config.module_type, ModuleType::EsModule);
        assert_eq!(config.scheduler, SchedulerConfig::default());
    }
}
