//! Built-in platform modules.
//!
//! Sources are compiled into the binary; resolving one never touches the disk,
//! the network or the dependency cache.

use super::{ModuleResolver, ResolvedModule};
use hostjs_common::ResolutionError;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

const CONTEXT_MODULE: &str = include_str!("builtin/context.js");
const ENGINE_MODULE: &str = include_str!("builtin/engine.js");
const HTTP_CLIENT_MODULE: &str = include_str!("builtin/http_client.js");

/// Resolves exact names of built-in CommonJS modules.
pub struct CoreModuleResolver {
    modules: BTreeMap<String, Arc<str>>,
}

impl CoreModuleResolver {
    /// The platform modules every runner ships with.
    pub fn new() -> Self {
        Self {
            modules: BTreeMap::new(),
        }
        .with_module("sdk/core/context", CONTEXT_MODULE)
        .with_module("sdk/core/engine", ENGINE_MODULE)
        .with_module("sdk/http/client", HTTP_CLIENT_MODULE)
    }

    /// Adds (or replaces) a built-in module.
    pub fn with_module(mut self, name: impl Into<String>, source: impl AsRef<str>) -> Self {
        self.modules.insert(name.into(), Arc::from(source.as_ref()));
        self
    }

    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }
}

impl Default for CoreModuleResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleResolver for CoreModuleResolver {
    fn name(&self) -> &'static str {
        "core"
    }

    fn is_resolvable(&self, specifier: &str) -> bool {
        self.modules.contains_key(specifier)
    }

    fn resolve(
        &self,
        specifier: &str,
        _referrer: Option<&Path>,
    ) -> Result<ResolvedModule, ResolutionError> {
        self.modules
            .get(specifier)
            .map(|source| ResolvedModule::builtin(specifier, Arc::clone(source)))
            .ok_or_else(|| ResolutionError::Unresolvable {
                specifier: specifier.to_string(),
            })
    }
}
