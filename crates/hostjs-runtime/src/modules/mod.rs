//! Module resolution.
//!
//! A [`ResolverChain`] is an ordered list of [`ModuleResolver`]s. For every
//! specifier the guest imports or requires, the first resolver whose
//! [`ModuleResolver::is_resolvable`] returns `true` resolves it; later
//! resolvers are never consulted for that specifier, even if the winner fails.
//!
//! The default chain built by the code runner is:
//!
//! 1. [`CoreModuleResolver`] - built-in `sdk/...` modules
//! 2. any resolvers added by the embedder
//! 3. [`HostInteropModuleResolver`] - `@host/<package>` proxies
//! 4. [`DownloadableModuleResolver`] - `http://` and `https://` URLs
//! 5. [`LocalModuleResolver`] - project files

pub mod builtin;
pub mod downloadable;
pub mod host;
pub mod local;

pub use builtin::CoreModuleResolver;
pub use downloadable::{DownloadableModuleResolver, Fetcher, ReqwestFetcher};
pub use host::{HostFunction, HostInteropModuleResolver, HostPackage, HostRegistry};
pub use local::{FileSystemRegistry, LocalModuleResolver, RegistryPathResolver};

use hostjs_common::ResolutionError;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// How a module's source has to be evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleFormat {
    /// Wrapped in a `function (exports, require, module, __filename, __dirname)`.
    CommonJs,
    /// Evaluated by the engine's module loader.
    EsModule,
    /// Decided by the importer: CommonJS under `require`, sniffed under `import`.
    Auto,
}

impl ModuleFormat {
    /// Format implied by a file extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("mjs") => ModuleFormat::EsModule,
            Some("cjs") => ModuleFormat::CommonJs,
            _ => ModuleFormat::Auto,
        }
    }
}

/// Where a resolved module's source lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    File(PathBuf),
    Builtin(Arc<str>),
}

/// The concrete source a specifier resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModule {
    /// Stable identity used for module caches: the file path, or the builtin name.
    pub id: String,
    pub source: ModuleSource,
    pub format: ModuleFormat,
}

impl ResolvedModule {
    pub fn file(path: PathBuf, format: ModuleFormat) -> Self {
        Self {
            id: path.display().to_string(),
            source: ModuleSource::File(path),
            format,
        }
    }

    pub fn builtin(name: impl Into<String>, source: Arc<str>) -> Self {
        Self {
            id: name.into(),
            source: ModuleSource::Builtin(source),
            format: ModuleFormat::CommonJs,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            ModuleSource::File(path) => Some(path),
            ModuleSource::Builtin(_) => None,
        }
    }

    /// Reads the module source.
    pub fn read_source(&self) -> Result<String, ResolutionError> {
        match &self.source {
            ModuleSource::File(path) => {
                std::fs::read_to_string(path).map_err(|e| ResolutionError::Unreadable {
                    specifier: self.id.clone(),
                    reason: e.to_string(),
                })
            }
            ModuleSource::Builtin(source) => Ok(source.to_string()),
        }
    }
}

/// One strategy for turning specifiers into module source.
pub trait ModuleResolver: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether this resolver claims `specifier`. Must be cheap and side-effect free.
    fn is_resolvable(&self, specifier: &str) -> bool;

    /// Resolves a claimed specifier. `referrer` is the file that imports it, if any.
    fn resolve(
        &self,
        specifier: &str,
        referrer: Option<&Path>,
    ) -> Result<ResolvedModule, ResolutionError>;
}

/// First-match-wins list of resolvers.
#[derive(Clone, Default)]
pub struct ResolverChain {
    resolvers: Vec<Arc<dyn ModuleResolver>>,
}

impl ResolverChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, resolver: Arc<dyn ModuleResolver>) -> Self {
        self.push(resolver);
        self
    }

    pub fn push(&mut self, resolver: Arc<dyn ModuleResolver>) {
        self.resolvers.push(resolver);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    pub fn resolve(
        &self,
        specifier: &str,
        referrer: Option<&Path>,
    ) -> Result<ResolvedModule, ResolutionError> {
        let resolver = self
            .resolvers
            .iter()
            .find(|r| r.is_resolvable(specifier))
            .ok_or_else(|| ResolutionError::Unresolvable {
                specifier: specifier.to_string(),
            })?;

        tracing::debug!(specifier, resolver = resolver.name(), "Resolving module");
        resolver.resolve(specifier, referrer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct PrefixResolver {
        prefix: &'static str,
        name: &'static str,
        calls: AtomicUsize,
    }

    impl PrefixResolver {
        fn new(name: &'static str, prefix: &'static str) -> Arc<Self> {
            Arc::new(Self {
                prefix,
                name,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl ModuleResolver for PrefixResolver {
        fn name(&self) -> &'static str {
            self.name
        }

        fn is_resolvable(&self, specifier: &str) -> bool {
            specifier.starts_with(self.prefix)
        }

        fn resolve(
            &self,
            specifier: &str,
            _referrer: Option<&Path>,
        ) -> Result<ResolvedModule, ResolutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ResolvedModule::builtin(
                format!("{}:{}", self.name, specifier),
                Arc::from(""),
            ))
        }
    }

    #[test]
    fn test_first_claiming_resolver_wins() {
        let first = PrefixResolver::new("first", "lib/");
        let second = PrefixResolver::new("second", "lib/");
        let chain = ResolverChain::new()
            .with(first.clone())
            .with(second.clone());

        let resolved = chain.resolve("lib/util", None).unwrap();
        assert_eq!(resolved.id, "first:lib/util");
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unclaimed_specifier_is_unresolvable() {
        let chain = ResolverChain::new().with(PrefixResolver::new("only", "lib/"));
        let err = chain.resolve("left-pad", None).unwrap_err();
        assert_eq!(
            err,
            ResolutionError::Unresolvable {
                specifier: "left-pad".to_string()
            }
        );
    }

    #[test]
    fn test_chain_keeps_registration_order() {
        let chain = ResolverChain::new()
            .with(PrefixResolver::new("a", "x"))
            .with(PrefixResolver::new("b", "y"));
        assert_eq!(chain.names(), vec!["a", "b"]);
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ModuleFormat::from_path(Path::new("a.mjs")), ModuleFormat::EsModule);
        assert_eq!(ModuleFormat::from_path(Path::new("a.cjs")), ModuleFormat::CommonJs);
        assert_eq!(ModuleFormat::from_path(Path::new("a.js")), ModuleFormat::Auto);
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let module = ResolvedModule::file(PathBuf::from("/nonexistent/hostjs/a.js"), ModuleFormat::Auto);
        assert!(matches!(
            module.read_source(),
            Err(ResolutionError::Unreadable { .. })
        ));
    }
}
