use boa_engine::{
    builtins::promise::PromiseState, context::ContextBuilder, js_string, module::Module,
    object::builtins::JsPromise, parser::source::ReadChar, script::Script, value::JsValue, Context,
    JsError, Source,
};
use hostjs_common::{HostjsError, Result};
use serde_json::Value as JsonValue;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

use crate::globals::GlobalBinding;
use crate::modules::{Fetcher, HostRegistry, ResolverChain};
use crate::polyfills::Polyfill;
use crate::runtime::{
    bindings::{install_host_bindings, HostState},
    conversions::{js_value_to_json, json_to_js_value},
    job_executor::GuestJobQueue,
    loader::HostModuleLoader,
};
use crate::scheduler::BackgroundPool;

/// Origin reported for inline sources that were not given a name.
pub const INLINE_ORIGIN: &str = "<inline>";

/// Callback that adjusts the context builder before the context exists.
///
/// The module loader and job executor are installed after these hooks run and
/// cannot be replaced.
pub type ContextBuilderHook = Box<dyn FnOnce(ContextBuilder) -> ContextBuilder + Send + 'static>;

/// Callback run on a freshly created context, before globals and polyfills.
pub type ContextHook = Box<dyn FnOnce(&mut Context) -> Result<()> + Send + 'static>;

/// Everything needed to assemble a [`JsEngine`].
///
/// This is `Send` so it can be moved onto the confined thread, where the
/// engine itself is built.
pub struct EngineSetup {
    pub chain: Arc<ResolverChain>,
    pub hosts: Arc<HostRegistry>,
    pub fetcher: Arc<dyn Fetcher>,
    pub pool: BackgroundPool,
    pub polyfills: Vec<Polyfill>,
    pub globals: Vec<GlobalBinding>,
    pub builder_hooks: Vec<ContextBuilderHook>,
    pub hooks: Vec<ContextHook>,
}

/// Boa context with the host bindings, module loader and polyfills installed.
///
/// `Context` is neither `Send` nor `Sync`; a `JsEngine` is created on the
/// confined thread and stays there.
pub struct JsEngine {
    context: Context,
    state: Rc<HostState>,
}

impl JsEngine {
    /// Assemble a context: builder hooks, native bindings, then hooks, then
    /// globals, then polyfills.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a hook, a global conversion or a
    /// polyfill. A throwing polyfill is reported with its name as the origin.
    pub fn new(setup: EngineSetup) -> Result<Self> {
        let EngineSetup {
            chain,
            hosts,
            fetcher,
            pool,
            polyfills,
            globals,
            builder_hooks,
            hooks,
        } = setup;

        let state = Rc::new(HostState::new(chain, hosts, fetcher, pool));
        let mut builder = Context::builder();
        for hook in builder_hooks {
            builder = hook(builder);
        }
        let mut context = builder
            .module_loader(Rc::new(HostModuleLoader::new(Rc::clone(&state))))
            .job_executor(Rc::new(GuestJobQueue::new()))
            .build()
            .map_err(|e| HostjsError::execution("context", e.to_string()))?;

        install_host_bindings(&mut context, &state)?;
        for hook in hooks {
            hook(&mut context)?;
        }

        let mut engine = Self { context, state };
        for binding in globals {
            engine.set_global(binding)?;
        }
        for polyfill in polyfills {
            tracing::debug!(polyfill = %polyfill.name, "Installing polyfill");
            let source = Source::from_bytes(polyfill.source.as_bytes());
            if let Err(e) = engine.context.eval(source) {
                return Err(engine.guest_error(&polyfill.name, e));
            }
        }
        Ok(engine)
    }

    /// Define (or overwrite) a global property.
    pub fn set_global(&mut self, binding: GlobalBinding) -> Result<()> {
        let value = json_to_js_value(binding.value, &mut self.context)?;
        self.context
            .global_object()
            .set(js_string!(binding.name.as_str()), value, false, &mut self.context)
            .map_err(|e| HostjsError::execution(binding.name.as_str(), e.to_string()))?;
        Ok(())
    }

    /// Run the file at `path`, either as an ES module or as a script.
    ///
    /// ES modules produce their default export; scripts produce their
    /// completion value. Promises are settled before returning.
    pub fn run_file(&mut self, path: &Path, es_module: bool) -> Result<JsonValue> {
        let origin = path.display().to_string();
        let source = std::fs::read_to_string(path)
            .map_err(|e| HostjsError::execution(&origin, format!("cannot read script: {}", e)))?;
        let source = Source::from_bytes(&source).with_path(path);

        self.state.take_failures();
        if es_module {
            self.evaluate_module(source, &origin)
        } else {
            self.bind_require(Some(&origin))?;
            self.evaluate_script(source, &origin)
        }
    }

    /// Run inline source. Relative imports resolve against the working directory.
    pub fn run_source(&mut self, source: &str, name: &str, es_module: bool) -> Result<JsonValue> {
        let source = Source::from_bytes(source);

        self.state.take_failures();
        if es_module {
            self.evaluate_module(source, name)
        } else {
            self.bind_require(None)?;
            self.evaluate_script(source, name)
        }
    }

    /// Parse the file at `path` without running it.
    pub fn check_file(&mut self, path: &Path, es_module: bool) -> Result<()> {
        let origin = path.display().to_string();
        let source = std::fs::read_to_string(path)
            .map_err(|e| HostjsError::execution(&origin, format!("cannot read script: {}", e)))?;
        self.check_source(&source, &origin, es_module)
    }

    /// Parse `source` without running it.
    pub fn check_source(&mut self, source: &str, name: &str, es_module: bool) -> Result<()> {
        let parsed = Source::from_bytes(source);
        let outcome = if es_module {
            Module::parse(parsed, None, &mut self.context).map(drop)
        } else {
            Script::parse(parsed, None, &mut self.context).map(drop)
        };
        outcome.map_err(|e| HostjsError::execution(name, e.to_string()))
    }

    /// The underlying Boa context.
    pub fn context(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Point `require` at the entry being run so relative requires resolve against it.
    fn bind_require(&mut self, entry: Option<&str>) -> Result<()> {
        let parent = match entry {
            Some(id) => JsonValue::String(id.to_string()).to_string(),
            None => "null".to_string(),
        };
        let rebind = format!(
            "if (typeof globalThis.__createRequire === \"function\") {{ globalThis.require = globalThis.__createRequire({}); }}",
            parent
        );
        self.context
            .eval(Source::from_bytes(&rebind))
            .map(drop)
            .map_err(|e| HostjsError::execution("require", e.to_string()))
    }

    fn evaluate_script<R: ReadChar>(&mut self, source: Source<'_, R>, origin: &str) -> Result<JsonValue> {
        let value = match self.context.eval(source) {
            Ok(value) => value,
            Err(e) => return Err(self.guest_error(origin, e)),
        };
        self.settle(value, origin)
    }

    fn evaluate_module<R: ReadChar>(&mut self, source: Source<'_, R>, origin: &str) -> Result<JsonValue> {
        let module = match Module::parse(source, None, &mut self.context) {
            Ok(module) => module,
            Err(e) => return Err(self.guest_error(origin, e)),
        };

        let evaluation = module.load_link_evaluate(&mut self.context);
        if let Err(e) = self.context.run_jobs() {
            return Err(self.guest_error(origin, e));
        }
        match evaluation.state() {
            PromiseState::Fulfilled(_) => {}
            PromiseState::Rejected(reason) => {
                return Err(self.guest_error(origin, JsError::from_opaque(reason)))
            }
            PromiseState::Pending => {
                return Err(HostjsError::execution(origin, "module evaluation did not settle"))
            }
        }

        let default = match module
            .namespace(&mut self.context)
            .get(js_string!("default"), &mut self.context)
        {
            Ok(value) => value,
            Err(e) => return Err(self.guest_error(origin, e)),
        };
        js_value_to_json(default, &mut self.context)
    }

    /// Run pending jobs and unwrap `value` if it is a promise.
    fn settle(&mut self, value: JsValue, origin: &str) -> Result<JsonValue> {
        if let Err(e) = self.context.run_jobs() {
            return Err(self.guest_error(origin, e));
        }

        let promise = value
            .as_object()
            .and_then(|object| JsPromise::from_object(object.clone()).ok());
        let value = match promise.map(|p| p.state()) {
            None => value,
            Some(PromiseState::Fulfilled(value)) => value,
            Some(PromiseState::Rejected(reason)) => {
                return Err(self.guest_error(origin, JsError::from_opaque(reason)))
            }
            Some(PromiseState::Pending) => {
                return Err(HostjsError::execution(origin, "promise did not settle"))
            }
        };
        js_value_to_json(value, &mut self.context)
    }

    /// Map a guest error to the caller-facing error.
    ///
    /// A failure that is the re-thrown form of a recorded resolution error is
    /// reported as that typed error.
    fn guest_error(&mut self, origin: &str, error: JsError) -> HostjsError {
        let message = match error.try_native(&mut self.context) {
            Ok(native) => native.to_string(),
            Err(_) => error.to_string(),
        };

        let failures = self.state.take_failures();
        match failures
            .into_iter()
            .rev()
            .find(|failure| message.contains(&failure.to_string()))
        {
            Some(failure) => HostjsError::Resolution(failure),
            None => HostjsError::execution(origin, message),
        }
    }
}
