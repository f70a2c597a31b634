//! JSON <-> JavaScript value conversions
//!
//! Guest values never leave the confined thread as `JsValue`; everything that
//! crosses to the host (run results, host-function arguments, globals) goes
//! through `serde_json::Value`.
//!
//! # Type Mapping
//!
//! | JSON Type | JavaScript Type |
//! |-----------|-----------------|
//! | null | null / undefined |
//! | boolean | Boolean |
//! | number | Number |
//! | string | String |
//! | array | Array |
//! | object | Object |
//!
//! # Limitations
//!
//! - Symbol keys in JavaScript objects are skipped
//! - Symbols and functions are converted to JSON null
//! - NaN and infinities cannot be represented and cause errors
//! - Cyclic values and nesting deeper than [`MAX_DEPTH`] cause errors

use boa_engine::{
    js_string,
    object::{builtins::JsArray, JsObject},
    property::PropertyKey,
    value::JsValue,
    Context,
};
use hostjs_common::{HostjsError, Result};
use serde_json::Value as JsonValue;

/// Deepest object/array nesting accepted when converting to JSON.
pub const MAX_DEPTH: usize = 128;

fn conversion(message: impl Into<String>) -> HostjsError {
    HostjsError::Conversion(message.into())
}

/// Convert serde_json::Value to Boa JsValue.
///
/// # Errors
///
/// Returns `HostjsError::Conversion` if a number is out of range or a property
/// cannot be defined on the created object.
pub fn json_to_js_value(json: JsonValue, ctx: &mut Context) -> Result<JsValue> {
    match json {
        JsonValue::Null => Ok(JsValue::null()),
        JsonValue::Bool(b) => Ok(JsValue::new(b)),
        JsonValue::Number(n) => n
            .as_f64()
            .map(JsValue::new)
            .ok_or_else(|| conversion("Number out of range")),
        JsonValue::String(s) => Ok(JsValue::new(js_string!(s))),
        JsonValue::Array(arr) => {
            let js_array = JsArray::new(ctx);
            for (i, v) in arr.into_iter().enumerate() {
                let js_value = json_to_js_value(v, ctx)?;
                js_array
                    .push(js_value, ctx)
                    .map_err(|e| conversion(format!("Failed to push array element {}: {}", i, e)))?;
            }
            Ok(js_array.into())
        }
        JsonValue::Object(obj) => {
            let js_obj = JsObject::with_object_proto(ctx.intrinsics());
            for (key, value) in obj {
                let js_value = json_to_js_value(value, ctx)?;
                js_obj
                    .create_data_property_or_throw(js_string!(key.as_str()), js_value, ctx)
                    .map_err(|e| conversion(format!("Failed to set property '{}': {}", key, e)))?;
            }
            Ok(js_obj.into())
        }
    }
}

/// Convert Boa JsValue to serde_json::Value.
///
/// Integral numbers are emitted as JSON integers so `42` stays `42` rather than `42.0`.
///
/// # Errors
///
/// Returns `HostjsError::Conversion` for non-finite numbers, strings that are
/// not valid UTF-16, property accesses that throw, cyclic values and values
/// nested deeper than [`MAX_DEPTH`]. An object reachable twice without a cycle
/// is converted twice.
pub fn js_value_to_json(value: JsValue, ctx: &mut Context) -> Result<JsonValue> {
    let mut ancestors = Vec::new();
    to_json(value, ctx, &mut ancestors)
}

fn to_json(value: JsValue, ctx: &mut Context, ancestors: &mut Vec<JsObject>) -> Result<JsonValue> {
    if value.is_undefined() || value.is_null() || value.is_symbol() {
        return Ok(JsonValue::Null);
    }

    if let Some(b) = value.as_boolean() {
        return Ok(JsonValue::Bool(b));
    }

    if let Some(i) = value.as_i32() {
        return Ok(JsonValue::Number(i.into()));
    }

    if let Some(n) = value.as_number() {
        if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
            return Ok(JsonValue::Number((n as i64).into()));
        }
        return serde_json::Number::from_f64(n)
            .map(JsonValue::Number)
            .ok_or_else(|| conversion(format!("Cannot represent {} as JSON", n)));
    }

    if let Some(s) = value.as_string() {
        return s
            .to_std_string()
            .map(JsonValue::String)
            .map_err(|e| conversion(format!("String conversion error: {:?}", e)));
    }

    let Some(obj) = value.as_object() else {
        return Ok(JsonValue::Null);
    };

    if obj.is_callable() {
        return Ok(JsonValue::Null);
    }

    if ancestors.iter().any(|seen| JsObject::equals(seen, &obj)) {
        return Err(conversion("Cannot convert cyclic value to JSON"));
    }
    if ancestors.len() >= MAX_DEPTH {
        return Err(conversion(format!("Value nested deeper than {} levels", MAX_DEPTH)));
    }

    ancestors.push(obj.clone());
    let result = object_to_json(&obj, ctx, ancestors);
    ancestors.pop();
    result
}

fn object_to_json(obj: &JsObject, ctx: &mut Context, ancestors: &mut Vec<JsObject>) -> Result<JsonValue> {

    if obj.is_array() {
        let array = JsArray::from_object(obj.clone())
            .map_err(|e| conversion(format!("Object is not a valid array: {}", e)))?;
        let length: usize = array
            .length(ctx)
            .map_err(|e| conversion(format!("Failed to get array length: {}", e)))?
            .try_into()
            .map_err(|_| conversion("Array length overflow"))?;

        let mut result = Vec::with_capacity(length);
        for i in 0..length {
            let elem = array
                .get(i, ctx)
                .map_err(|e| conversion(format!("Failed to get array element {}: {}", i, e)))?;
            result.push(to_json(elem, ctx, ancestors)?);
        }
        return Ok(JsonValue::Array(result));
    }

    let keys = obj
        .own_property_keys(ctx)
        .map_err(|e| conversion(format!("Failed to get object keys: {}", e)))?;

    let mut result = serde_json::Map::new();
    for key in keys {
        let key_str = match &key {
            PropertyKey::String(s) => s
                .to_std_string()
                .map_err(|e| conversion(format!("String conversion error: {:?}", e)))?,
            PropertyKey::Index(i) => i.get().to_string(),
            PropertyKey::Symbol(_) => continue,
        };

        let prop_value = obj
            .get(key.clone(), ctx)
            .map_err(|e| conversion(format!("Failed to get property '{}': {}", key_str, e)))?;
        result.insert(key_str, to_json(prop_value, ctx, ancestors)?);
    }

    Ok(JsonValue::Object(result))
}
