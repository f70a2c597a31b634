//! Host interop: Rust functions exposed to guest code as importable packages.
//!
//! A [`HostPackage`] is a named set of native members. Guest code reaches it
//! either with `require("@host/<package>")` / `import pkg from "@host/<package>"`,
//! which loads a generated proxy module, or with `Host.package("<package>")`.
//!
//! The proxy is plain CommonJS that forwards each member to the native
//! `__hostjs.invokeHost` binding. It is generated on first use, written to the
//! host-modules cache as `<package>.js` and reused from there afterwards.

use super::{ModuleFormat, ModuleResolver, ResolvedModule};
use crate::cache::DependencyCache;
use hostjs_common::ResolutionError;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Specifier prefix claimed by [`HostInteropModuleResolver`].
pub const HOST_PREFIX: &str = "@host/";

/// A native member callable from guest code.
pub type HostFunction =
    Arc<dyn Fn(&[JsonValue]) -> std::result::Result<JsonValue, String> + Send + Sync>;

/// A named group of host members.
#[derive(Clone)]
pub struct HostPackage {
    name: String,
    members: BTreeMap<String, HostFunction>,
}

impl HostPackage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: BTreeMap::new(),
        }
    }

    pub fn with_member<F>(mut self, name: impl Into<String>, member: F) -> Self
    where
        F: Fn(&[JsonValue]) -> std::result::Result<JsonValue, String> + Send + Sync + 'static,
    {
        self.members.insert(name.into(), Arc::new(member));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    pub fn invoke(&self, member: &str, args: &[JsonValue]) -> std::result::Result<JsonValue, String> {
        let function = self
            .members
            .get(member)
            .ok_or_else(|| format!("host package '{}' has no member '{}'", self.name, member))?;
        function(args)
    }

    /// CommonJS source of the proxy module for this package.
    pub fn proxy_source(&self) -> String {
        let package = json_string(&self.name);
        let mut source = format!(
            "// Generated proxy for host package {}\n\"use strict\";\nmodule.exports = Object.freeze({{\n",
            self.name
        );
        for member in self.members.keys() {
            let member = json_string(member);
            source.push_str(&format!(
                "    {member}: function () {{ return __hostjs.invokeHost({package}, {member}, Array.prototype.slice.call(arguments)); }},\n"
            ));
        }
        source.push_str("});\n");
        source
    }
}

impl fmt::Debug for HostPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostPackage")
            .field("name", &self.name)
            .field("members", &self.members.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn json_string(value: &str) -> String {
    JsonValue::String(value.to_string()).to_string()
}

/// Every host package known to a runner.
#[derive(Debug, Clone, Default)]
pub struct HostRegistry {
    packages: BTreeMap<String, Arc<HostPackage>>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package(mut self, package: HostPackage) -> Self {
        self.register(package);
        self
    }

    pub fn register(&mut self, package: HostPackage) {
        self.packages
            .insert(package.name.clone(), Arc::new(package));
    }

    pub fn get(&self, name: &str) -> Option<Arc<HostPackage>> {
        self.packages.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

/// Resolves `@host/<package>` to a generated, cached proxy module.
pub struct HostInteropModuleResolver {
    registry: Arc<HostRegistry>,
    cache: DependencyCache,
}

impl HostInteropModuleResolver {
    pub fn new(registry: Arc<HostRegistry>, cache: DependencyCache) -> Self {
        Self { registry, cache }
    }

    /// Extracts and validates the package name of a `@host/...` specifier.
    fn package_name<'a>(&self, specifier: &'a str) -> Result<&'a str, ResolutionError> {
        let malformed = |reason: &str| ResolutionError::MalformedSpecifier {
            specifier: specifier.to_string(),
            reason: reason.to_string(),
        };

        let name = specifier
            .strip_prefix(HOST_PREFIX)
            .ok_or_else(|| malformed("expected @host/<package>"))?;
        if name.is_empty() {
            return Err(malformed("package name is empty"));
        }
        let valid = name.split('.').all(|segment| {
            let mut chars = segment.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        });
        if !valid {
            return Err(malformed(
                "package name must be dot-separated identifiers, e.g. @host/java.util.List",
            ));
        }
        Ok(name)
    }
}

impl ModuleResolver for HostInteropModuleResolver {
    fn name(&self) -> &'static str {
        "host-interop"
    }

    fn is_resolvable(&self, specifier: &str) -> bool {
        specifier.starts_with(HOST_PREFIX)
    }

    fn resolve(
        &self,
        specifier: &str,
        _referrer: Option<&Path>,
    ) -> Result<ResolvedModule, ResolutionError> {
        let name = self.package_name(specifier)?;
        let package = self
            .registry
            .get(name)
            .ok_or_else(|| ResolutionError::UnknownHostPackage {
                specifier: specifier.to_string(),
                package: name.to_string(),
            })?;

        let key = format!("{}.js", name);
        let path = match self.cache.get(&key) {
            Some(path) => path,
            None => {
                tracing::debug!(package = name, "Generating host proxy module");
                self.cache
                    .put(&key, package.proxy_source().as_bytes())
                    .map_err(|e| ResolutionError::Cache {
                        locator: specifier.to_string(),
                        reason: e.to_string(),
                    })?
            }
        };

        Ok(ResolvedModule::file(path, ModuleFormat::CommonJs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn list_package() -> HostPackage {
        HostPackage::new("java.util.List")
            .with_member("of", |args: &[JsonValue]| Ok(JsonValue::Array(args.to_vec())))
            .with_member("size", |args: &[JsonValue]| {
                let len = args.first().and_then(JsonValue::as_array).map_or(0, Vec::len);
                Ok(json!(len))
            })
    }

    fn resolver(dir: &TempDir) -> HostInteropModuleResolver {
        let registry = Arc::new(HostRegistry::new().with_package(list_package()));
        let cache = DependencyCache::open(dir.path().join("host-modules")).unwrap();
        HostInteropModuleResolver::new(registry, cache)
    }

    #[test]
    fn test_invoke_member() {
        let package = list_package();
        assert_eq!(package.invoke("of", &[json!(1), json!(2)]).unwrap(), json!([1, 2]));
        assert_eq!(package.invoke("size", &[json!([1, 2, 3])]).unwrap(), json!(3));
        assert!(package.invoke("clear", &[]).unwrap_err().contains("clear"));
    }

    #[test]
    fn test_proxy_forwards_every_member() {
        let source = list_package().proxy_source();
        assert!(source.contains(r#""of": function"#));
        assert!(source.contains(r#"__hostjs.invokeHost("java.util.List", "size""#));
    }

    #[test]
    fn test_proxy_is_generated_once() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(&dir);

        let first = resolver.resolve("@host/java.util.List", None).unwrap();
        let path = first.path().unwrap().to_path_buf();
        assert_eq!(path, dir.path().join("host-modules").join("java.util.List.js"));
        assert_eq!(first.format, ModuleFormat::CommonJs);

        // A rewrite would replace this marker.
        std::fs::write(&path, "// marker").unwrap();
        let second = resolver.resolve("@host/java.util.List", None).unwrap();
        assert_eq!(second.path(), Some(path.as_path()));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "// marker");
    }

    #[test]
    fn test_malformed_specifier_fails_fast() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(&dir);
        for specifier in ["@host/", "@host/java..util", "@host/java/util", "@host/1java"] {
            match resolver.resolve(specifier, None) {
                Err(ResolutionError::MalformedSpecifier { specifier: s, .. }) => {
                    assert_eq!(s, specifier)
                }
                other => panic!("expected malformed error for {}, got {:?}", specifier, other),
            }
        }
    }

    #[test]
    fn test_unknown_package() {
        let dir = TempDir::new().unwrap();
        let err = resolver(&dir).resolve("@host/java.util.Map", None).unwrap_err();
        assert_eq!(
            err,
            ResolutionError::UnknownHostPackage {
                specifier: "@host/java.util.Map".to_string(),
                package: "java.util.Map".to_string(),
            }
        );
    }
}
