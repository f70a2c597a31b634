//! ES module loader backed by the resolver chain.
//!
//! `import` specifiers go through the same chain as `require`. ES modules are
//! parsed with their path so nested relative imports resolve against them;
//! CommonJS modules are evaluated through the `require` polyfill and exposed
//! with `module.exports` as the default export, sharing one instance with
//! every `require` of the same module.

use crate::modules::{ModuleFormat, ResolvedModule};
use crate::runtime::bindings::{resolution_error, HostState};
use boa_engine::{
    module::{Module, ModuleLoader, Referrer},
    Context, JsResult, JsString, Source,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

pub(crate) struct HostModuleLoader {
    state: Rc<HostState>,
    modules: RefCell<HashMap<String, Module>>,
}

impl HostModuleLoader {
    pub(crate) fn new(state: Rc<HostState>) -> Self {
        Self {
            state,
            modules: RefCell::default(),
        }
    }

    fn load(&self, referrer: Option<&Path>, specifier: &str, context: &mut Context) -> JsResult<Module> {
        let resolved = self
            .state
            .resolve(specifier, referrer)
            .map_err(|e| resolution_error(&e))?;

        if let Some(module) = self.modules.borrow().get(&resolved.id) {
            return Ok(module.clone());
        }

        let module = self.parse(&resolved, context)?;
        self.modules
            .borrow_mut()
            .insert(resolved.id.clone(), module.clone());
        Ok(module)
    }

    fn parse(&self, resolved: &ResolvedModule, context: &mut Context) -> JsResult<Module> {
        let source = resolved
            .read_source()
            .map_err(|e| resolution_error(&self.state.record(e)))?;

        let es_module = match resolved.format {
            ModuleFormat::EsModule => true,
            ModuleFormat::CommonJs => false,
            ModuleFormat::Auto => !looks_like_commonjs(&source),
        };

        if es_module {
            let parsed = Source::from_bytes(source.as_bytes());
            return match resolved.path() {
                Some(path) => Module::parse(parsed.with_path(path), None, context),
                None => Module::parse(parsed, None, context),
            };
        }

        let facade = commonjs_facade(&resolved.id);
        Module::parse(Source::from_bytes(facade.as_bytes()), None, context)
    }
}

impl ModuleLoader for HostModuleLoader {
    fn load_imported_module(
        self: Rc<Self>,
        referrer: Referrer,
        specifier: JsString,
        context: &RefCell<&mut Context>,
    ) -> impl std::future::Future<Output = JsResult<Module>> {
        let specifier = specifier.to_std_string_escaped();
        async move {
            let referrer_path = referrer.path().map(Path::to_path_buf);
            let mut ctx = context.borrow_mut();
            self.load(referrer_path.as_deref(), &specifier, &mut ctx)
        }
    }
}

/// ES module source re-exporting a CommonJS module's `module.exports` as default.
fn commonjs_facade(id: &str) -> String {
    let id = serde_json::Value::String(id.to_string());
    format!("export default globalThis.__requireResolved({});\n", id)
}

/// Whether source without an explicit format reads as CommonJS.
///
/// The first non-comment line that uses `module.exports`, `exports.` or a bare
/// `require(` decides for CommonJS; a leading `import`/`export` decides for ESM.
fn looks_like_commonjs(source: &str) -> bool {
    for line in source.lines() {
        let line = line.trim();
        if line.starts_with("//") || line.starts_with("/*") || line.starts_with('*') {
            continue;
        }
        if line.starts_with("import ") || line.starts_with("export ") {
            return false;
        }
        if line.contains("module.exports")
            || line.contains("exports.")
            || (line.contains("require(") && !line.contains("import"))
        {
            return true;
        }
    }
    false
}
