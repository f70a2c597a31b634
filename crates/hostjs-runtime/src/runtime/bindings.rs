//! Native bindings for guest code
//!
//! Everything the polyfills and generated modules need from the host is
//! exposed on one global object, `__hostjs`:
//!
//! - `__hostjs.resolveModule(specifier, parentId)` - run the resolver chain, return the module id
//! - `__hostjs.readModule(id)` - `{ id, source, filename, dirname }` of a resolved module
//! - `__hostjs.hostMembers(package)` - member names of a host package
//! - `__hostjs.invokeHost(package, member, args)` - call a host member
//! - `__hostjs.httpGet(url)` - blocking GET on the background pool, returns the body text
//! - `__hostjs.log(level, message)` - guest logging
//!
//! The shared [`HostState`] is captured by each native function; it never
//! leaves the confined thread.

use crate::modules::{Fetcher, HostRegistry, ModuleFormat, ResolvedModule, ResolverChain};
use crate::runtime::conversions::{js_value_to_json, json_to_js_value};
use crate::scheduler::BackgroundPool;
use boa_engine::{
    js_string,
    native_function::NativeFunction,
    object::{builtins::JsArray, FunctionObjectBuilder, JsObject},
    property::Attribute,
    value::JsValue,
    Context, JsError, JsNativeError, JsResult,
};
use boa_gc::{Finalize, Trace};
use hostjs_common::{HostjsError, ResolutionError, Result};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

/// Name of the native binding object.
pub const BINDINGS_GLOBAL: &str = "__hostjs";

/// Guest log target.
pub const GUEST_LOG_TARGET: &str = "hostjs::guest";

/// Host-side state shared by the native bindings and the module loader.
pub(crate) struct HostState {
    chain: Arc<ResolverChain>,
    hosts: Arc<HostRegistry>,
    fetcher: Arc<dyn Fetcher>,
    pool: BackgroundPool,
    /// Every module resolved in this context, by id.
    modules: RefCell<HashMap<String, ResolvedModule>>,
    /// Resolution failures since the last `take_failures`.
    failures: RefCell<Vec<ResolutionError>>,
}

impl HostState {
    pub(crate) fn new(
        chain: Arc<ResolverChain>,
        hosts: Arc<HostRegistry>,
        fetcher: Arc<dyn Fetcher>,
        pool: BackgroundPool,
    ) -> Self {
        Self {
            chain,
            hosts,
            fetcher,
            pool,
            modules: RefCell::default(),
            failures: RefCell::default(),
        }
    }

    /// Resolves `specifier` imported from the file `referrer`, remembering the result.
    pub(crate) fn resolve(
        &self,
        specifier: &str,
        referrer: Option<&Path>,
    ) -> std::result::Result<ResolvedModule, ResolutionError> {
        match self.chain.resolve(specifier, referrer) {
            Ok(module) => {
                self.modules
                    .borrow_mut()
                    .insert(module.id.clone(), module.clone());
                Ok(module)
            }
            Err(e) => Err(self.record(e)),
        }
    }

    /// Like [`HostState::resolve`], with the referrer given as a module id.
    fn resolve_from_id(
        &self,
        specifier: &str,
        parent_id: Option<&str>,
    ) -> std::result::Result<ResolvedModule, ResolutionError> {
        let referrer = parent_id.and_then(|id| self.referrer_path(id));
        self.resolve(specifier, referrer.as_deref())
    }

    /// File path behind a module id. Ids that were never resolved (entry
    /// scripts) are taken as paths when absolute.
    fn referrer_path(&self, id: &str) -> Option<PathBuf> {
        if let Some(module) = self.modules.borrow().get(id) {
            return module.path().map(Path::to_path_buf);
        }
        let path = Path::new(id);
        path.is_absolute().then(|| path.to_path_buf())
    }

    pub(crate) fn module(&self, id: &str) -> Option<ResolvedModule> {
        self.modules.borrow().get(id).cloned()
    }

    pub(crate) fn record(&self, error: ResolutionError) -> ResolutionError {
        tracing::debug!(specifier = error.specifier(), error = %error, "Module resolution failed");
        self.failures.borrow_mut().push(error.clone());
        error
    }

    pub(crate) fn take_failures(&self) -> Vec<ResolutionError> {
        std::mem::take(&mut *self.failures.borrow_mut())
    }
}

/// Captures handed to every native function.
#[derive(Trace, Finalize)]
struct HostCapture {
    #[unsafe_ignore_trace]
    state: Rc<HostState>,
}

type NativeBody = fn(&[JsValue], &HostState, &mut Context) -> JsResult<JsValue>;

fn type_error(message: impl Into<String>) -> JsError {
    JsNativeError::typ().with_message(message.into()).into()
}

pub(crate) fn resolution_error(error: &ResolutionError) -> JsError {
    JsNativeError::error().with_message(error.to_string()).into()
}

fn host_error(error: HostjsError) -> JsError {
    JsNativeError::typ().with_message(error.to_string()).into()
}

fn string_arg(args: &[JsValue], index: usize, what: &str) -> JsResult<String> {
    args.get(index)
        .and_then(|v| v.as_string())
        .ok_or_else(|| type_error(format!("{} must be a string", what)))?
        .to_std_string()
        .map_err(|e| type_error(format!("Invalid {}: {:?}", what, e)))
}

fn optional_string_arg(args: &[JsValue], index: usize, what: &str) -> JsResult<Option<String>> {
    match args.get(index) {
        None => Ok(None),
        Some(v) if v.is_null_or_undefined() => Ok(None),
        Some(_) => string_arg(args, index, what).map(Some),
    }
}

fn resolve_module(args: &[JsValue], state: &HostState, _ctx: &mut Context) -> JsResult<JsValue> {
    let specifier = string_arg(args, 0, "Module specifier")?;
    let parent_id = optional_string_arg(args, 1, "Parent module id")?;

    let module = state
        .resolve_from_id(&specifier, parent_id.as_deref())
        .map_err(|e| resolution_error(&e))?;
    if module.format == ModuleFormat::EsModule {
        let error = state.record(ResolutionError::RequireOfEsModule { specifier });
        return Err(resolution_error(&error));
    }
    Ok(JsValue::new(js_string!(module.id.as_str())))
}

fn read_module(args: &[JsValue], state: &HostState, ctx: &mut Context) -> JsResult<JsValue> {
    let id = string_arg(args, 0, "Module id")?;
    let module = state
        .module(&id)
        .ok_or_else(|| type_error(format!("Module '{}' has not been resolved", id)))?;
    let source = module.read_source().map_err(|e| resolution_error(&state.record(e)))?;

    let (filename, dirname) = match module.path() {
        Some(path) => (
            path.display().to_string(),
            path.parent().map(|p| p.display().to_string()).unwrap_or_default(),
        ),
        None => (module.id.clone(), String::new()),
    };

    let record = JsObject::with_object_proto(ctx.intrinsics());
    for (key, value) in [
        ("id", module.id.as_str()),
        ("source", source.as_str()),
        ("filename", filename.as_str()),
        ("dirname", dirname.as_str()),
    ] {
        record.create_data_property_or_throw(js_string!(key), js_string!(value), ctx)?;
    }
    Ok(record.into())
}

fn host_members(args: &[JsValue], state: &HostState, ctx: &mut Context) -> JsResult<JsValue> {
    let name = string_arg(args, 0, "Host package name")?;
    let package = state
        .hosts
        .get(&name)
        .ok_or_else(|| type_error(format!("Host package '{}' is not registered", name)))?;

    let members = JsArray::new(ctx);
    for member in package.member_names() {
        members.push(js_string!(member), ctx)?;
    }
    Ok(members.into())
}

fn invoke_host(args: &[JsValue], state: &HostState, ctx: &mut Context) -> JsResult<JsValue> {
    let name = string_arg(args, 0, "Host package name")?;
    let member = string_arg(args, 1, "Host member name")?;
    let package = state
        .hosts
        .get(&name)
        .ok_or_else(|| type_error(format!("Host package '{}' is not registered", name)))?;

    let call_args = match args.get(2) {
        Some(value) if !value.is_null_or_undefined() => {
            match js_value_to_json(value.clone(), ctx).map_err(host_error)? {
                serde_json::Value::Array(values) => values,
                other => vec![other],
            }
        }
        _ => Vec::new(),
    };

    let result = package.invoke(&member, &call_args).map_err(|message| {
        JsError::from(JsNativeError::error().with_message(format!("{}.{}: {}", name, member, message)))
    })?;
    json_to_js_value(result, ctx).map_err(host_error)
}

fn http_get(args: &[JsValue], state: &HostState, _ctx: &mut Context) -> JsResult<JsValue> {
    let url = string_arg(args, 0, "URL")?;
    let body = state
        .pool
        .block_on(state.fetcher.fetch(&url))
        .map_err(|e| type_error(e.to_string()))?
        .map_err(|e| JsError::from(JsNativeError::error().with_message(e.to_string())))?;
    let text = String::from_utf8_lossy(&body);
    Ok(JsValue::new(js_string!(&*text)))
}

fn log(args: &[JsValue], _state: &HostState, _ctx: &mut Context) -> JsResult<JsValue> {
    let level = string_arg(args, 0, "Log level")?;
    let message = string_arg(args, 1, "Log message")?;
    match level.as_str() {
        "error" => tracing::error!(target: GUEST_LOG_TARGET, "{}", message),
        "warn" => tracing::warn!(target: GUEST_LOG_TARGET, "{}", message),
        "debug" => tracing::debug!(target: GUEST_LOG_TARGET, "{}", message),
        "trace" => tracing::trace!(target: GUEST_LOG_TARGET, "{}", message),
        _ => tracing::info!(target: GUEST_LOG_TARGET, "{}", message),
    }
    Ok(JsValue::undefined())
}

/// Install the `__hostjs` binding object into the Boa context.
///
/// # Errors
///
/// Returns an error if defining a property or registering the global fails.
pub(crate) fn install_host_bindings(ctx: &mut Context, state: &Rc<HostState>) -> Result<()> {
    let bindings = JsObject::with_object_proto(ctx.intrinsics());
    let natives: [(&str, usize, NativeBody); 6] = [
        ("resolveModule", 2, resolve_module),
        ("readModule", 1, read_module),
        ("hostMembers", 1, host_members),
        ("invokeHost", 3, invoke_host),
        ("httpGet", 1, http_get),
        ("log", 2, log),
    ];

    for (name, length, body) in natives {
        let function = FunctionObjectBuilder::new(
            ctx.realm(),
            NativeFunction::from_copy_closure_with_captures(
                move |_this, args: &[JsValue], capture: &HostCapture, context| {
                    body(args, &capture.state, context)
                },
                HostCapture {
                    state: Rc::clone(state),
                },
            ),
        )
        .name(js_string!(name))
        .length(length)
        .build();

        bindings
            .set(js_string!(name), function, false, ctx)
            .map_err(|e| HostjsError::execution(BINDINGS_GLOBAL, e.to_string()))?;
    }

    ctx.register_global_property(js_string!(BINDINGS_GLOBAL), bindings, Attribute::empty())
        .map_err(|e| HostjsError::execution(BINDINGS_GLOBAL, e.to_string()))?;

    Ok(())
}
