//! Named values installed on the global object of every fresh context.
//!
//! Bindings are applied in order after the native bindings and before the
//! polyfills; a later binding with the same name overwrites an earlier one.

use serde_json::{Map, Value as JsonValue};

/// Name of the execution-context map global.
pub const CONTEXT_GLOBAL: &str = "__context";

/// Name of the engine identity global.
pub const ENGINE_GLOBAL: &str = "__engine";

/// Engine identity reported to guest code.
pub const ENGINE_NAME: &str = "boa";

/// Request/tenant scoped key-value state handed to a run.
pub type ExecutionContextMap = Map<String, JsonValue>;

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalBinding {
    pub name: String,
    pub value: JsonValue,
}

impl GlobalBinding {
    pub fn new(name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// `__context` holding the given map.
pub fn execution_context(values: ExecutionContextMap) -> GlobalBinding {
    GlobalBinding::new(CONTEXT_GLOBAL, JsonValue::Object(values))
}

/// `__engine` naming the engine.
pub fn engine_identity() -> GlobalBinding {
    GlobalBinding::new(ENGINE_GLOBAL, ENGINE_NAME)
}

/// The bindings every runner starts with.
pub fn defaults(context: ExecutionContextMap) -> Vec<GlobalBinding> {
    vec![execution_context(context), engine_identity()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let mut context = ExecutionContextMap::new();
        context.insert("tenant".to_string(), json!("acme"));
        let bindings = defaults(context);
        assert_eq!(bindings[0], GlobalBinding::new("__context", json!({"tenant": "acme"})));
        assert_eq!(bindings[1], GlobalBinding::new("__engine", "boa"));
    }
}
