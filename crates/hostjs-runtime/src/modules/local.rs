//! Project-local modules.
//!
//! Relative specifiers (`./x`, `../x`) resolve against the importing file,
//! project-absolute ones (`/app/x`) and bare ones (`app/x`) against the
//! registry. Bare specifiers are only claimed when something exists at the
//! registry path, so unknown package names fall through to `Unresolvable`.
//! Nothing is cached: the registry storage is the source of truth.

use super::{ModuleFormat, ModuleResolver, ResolvedModule};
use hostjs_common::ResolutionError;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Maps a logical registry path to a file system path.
pub trait RegistryPathResolver: Send + Sync {
    fn resolve_registry_path(&self, logical_path: &str) -> PathBuf;
}

/// Registry laid out as a plain directory tree.
#[derive(Debug, Clone)]
pub struct FileSystemRegistry {
    root: PathBuf,
}

impl FileSystemRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl RegistryPathResolver for FileSystemRegistry {
    fn resolve_registry_path(&self, logical_path: &str) -> PathBuf {
        normalize(&self.root.join(logical_path.trim_start_matches('/')))
    }
}

/// Resolves relative, project-absolute and bare specifiers to files.
pub struct LocalModuleResolver {
    registry: Arc<dyn RegistryPathResolver>,
    working_dir: PathBuf,
}

impl LocalModuleResolver {
    pub fn new(registry: Arc<dyn RegistryPathResolver>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            working_dir: working_dir.into(),
        }
    }

    fn base_path(&self, specifier: &str, referrer: Option<&Path>) -> PathBuf {
        if is_relative(specifier) {
            let dir = referrer
                .and_then(Path::parent)
                .unwrap_or(self.working_dir.as_path());
            normalize(&dir.join(specifier))
        } else {
            self.registry.resolve_registry_path(specifier)
        }
    }
}

impl ModuleResolver for LocalModuleResolver {
    fn name(&self) -> &'static str {
        "local"
    }

    fn is_resolvable(&self, specifier: &str) -> bool {
        if specifier.is_empty() {
            return false;
        }
        if is_relative(specifier) || specifier.starts_with('/') {
            return true;
        }
        // Bare names must not shadow URLs or scoped specifiers of other resolvers.
        if specifier.contains(':') || specifier.starts_with('@') {
            return false;
        }
        find_module_file(&self.registry.resolve_registry_path(specifier)).is_some()
    }

    fn resolve(
        &self,
        specifier: &str,
        referrer: Option<&Path>,
    ) -> Result<ResolvedModule, ResolutionError> {
        let base = self.base_path(specifier, referrer);
        let path = find_module_file(&base).ok_or_else(|| ResolutionError::NotFound {
            specifier: specifier.to_string(),
            path: base.clone(),
        })?;
        let format = ModuleFormat::from_path(&path);
        Ok(ResolvedModule::file(path, format))
    }
}

fn is_relative(specifier: &str) -> bool {
    specifier == "." || specifier == ".." || specifier.starts_with("./") || specifier.starts_with("../")
}

/// Tries `base`, then `base` with a JavaScript extension, then `base/index.js`.
///
/// A `.ts` specifier maps to its compiled `.js` sibling.
fn find_module_file(base: &Path) -> Option<PathBuf> {
    let base = match base.extension().and_then(|e| e.to_str()) {
        Some("ts") => base.with_extension("js"),
        Some("mts") => base.with_extension("mjs"),
        Some("cts") => base.with_extension("cjs"),
        _ => base.to_path_buf(),
    };

    if base.is_file() {
        return Some(base);
    }
    let file_name = base.file_name()?.to_str()?;
    for extension in ["js", "mjs", "cjs"] {
        let candidate = base.with_file_name(format!("{}.{}", file_name, extension));
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    let index = base.join("index.js");
    index.is_file().then_some(index)
}

/// Lexically removes `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}
