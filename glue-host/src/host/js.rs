use std::cell::RefCell;
use std::collections::BTreeMap;

use gru_glue_core::value::format_number;
use gru_glue_core::{HostError, HostValue};

use crate::host::dom::Window;
use crate::host::typed_array::Uint8Array;

/// A plain `{}`.
#[derive(Debug, Default)]
pub struct JsObject {
    props: RefCell<BTreeMap<String, HostValue>>,
}

impl JsObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> HostValue {
        self.props.borrow().get(key).cloned().unwrap_or_default()
    }

    pub fn set(&self, key: &str, value: HostValue) {
        self.props.borrow_mut().insert(key.to_string(), value);
    }

    pub fn keys(&self) -> Vec<String> {
        self.props.borrow().keys().cloned().collect()
    }
}

/// `new Function(body)`.
///
/// Only `return this` is understood; it is what the bindings use to find
/// the global object.
#[derive(Debug)]
pub struct NativeFunction {
    pub source: String,
}

impl NativeFunction {
    pub fn call(&self, this: &HostValue, window: HostValue) -> Result<HostValue, HostError> {
        match self.source.trim().trim_end_matches(';').trim() {
            "return this" if this.is_like_none() => Ok(window),
            "return this" => Ok(this.clone()),
            other => Err(HostError::not_supported(format!(
                "cannot evaluate function body `{other}`"
            ))),
        }
    }
}

/// An already-settled promise.
#[derive(Debug)]
pub struct Promise {
    pub value: HostValue,
}

#[derive(Debug, Default)]
pub struct Crypto;

#[derive(Debug, Default)]
pub struct Performance;

/// Property key as `Reflect.get` would coerce it.
pub fn property_key(key: &HostValue) -> String {
    match key {
        HostValue::String(s) => s.to_string(),
        HostValue::Number(n) => format_number(*n),
        other => other.debug_string(),
    }
}

/// `value[name]` for the objects the host models.
///
/// Unknown properties read as `undefined`.
pub fn property(value: &HostValue, name: &str) -> HostValue {
    match value {
        HostValue::Object(obj) => {
            if let Some(o) = obj.downcast::<JsObject>() {
                return o.get(name);
            }
            if let Some(w) = obj.downcast::<Window>() {
                return w.global(name);
            }
            if let Some(a) = obj.downcast::<Uint8Array>() {
                if name == "length" || name == "byteLength" {
                    return HostValue::from(a.len() as f64);
                }
            }
            HostValue::Undefined
        }
        HostValue::Array(items) => {
            let items = items.borrow();
            if name == "length" {
                return HostValue::from(items.len() as f64);
            }
            name.parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or_default()
        }
        HostValue::String(s) if name == "length" => {
            HostValue::from(s.encode_utf16().count() as f64)
        }
        HostValue::Error(e) => match name {
            "name" => HostValue::from(e.name.as_str()),
            "message" => HostValue::from(e.message.as_str()),
            _ => HostValue::Undefined,
        },
        _ => HostValue::Undefined,
    }
}

/// `Reflect.get(target, key)`.
pub fn reflect_get(target: &HostValue, key: &HostValue) -> Result<HostValue, HostError> {
    if !target.is_object() && !target.is_function() {
        return Err(HostError::type_error(format!(
            "Reflect.get called on non-object {}",
            target.type_name()
        )));
    }
    Ok(property(target, &property_key(key)))
}

/// `Reflect.set(target, key, value)`.
pub fn reflect_set(target: &HostValue, key: &HostValue, value: HostValue) -> Result<bool, HostError> {
    match target {
        HostValue::Object(obj) => match obj.downcast::<JsObject>() {
            Some(o) => {
                o.set(&property_key(key), value);
                Ok(true)
            }
            None => Ok(false),
        },
        HostValue::Array(items) => {
            let Some(index) = property_key(key).parse::<usize>().ok() else {
                return Ok(false);
            };
            let mut items = items.borrow_mut();
            if index >= items.len() {
                items.resize(index + 1, HostValue::Undefined);
            }
            items[index] = value;
            Ok(true)
        }
        HostValue::Function(_) | HostValue::Error(_) => Ok(false),
        other => Err(HostError::type_error(format!(
            "Reflect.set called on non-object {}",
            other.type_name()
        ))),
    }
}

/// Convert parsed JSON into host values (`responseType = "json"`).
pub fn from_json(value: serde_json::Value) -> HostValue {
    match value {
        serde_json::Value::Null => HostValue::Null,
        serde_json::Value::Bool(b) => HostValue::from(b),
        serde_json::Value::Number(n) => HostValue::from(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => HostValue::from(s),
        serde_json::Value::Array(items) => {
            HostValue::array(items.into_iter().map(from_json).collect())
        }
        serde_json::Value::Object(map) => {
            let obj = JsObject::new();
            for (k, v) in map {
                obj.set(&k, from_json(v));
            }
            HostValue::object(obj)
        }
    }
}

/// Text of a value as `console.log` would print it.
pub fn display(value: &HostValue) -> String {
    match value {
        HostValue::String(s) => s.to_string(),
        other => other.debug_string(),
    }
}
