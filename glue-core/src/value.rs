use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::closure::Callback;

/// Shared reference to a concrete host object (window, canvas, GL shader, ...).
///
/// Identity is the allocation: two `HostRef`s are the same object when they
/// point at the same `Rc`.
#[derive(Clone)]
pub struct HostRef {
    inner: Rc<dyn Any>,
    class: &'static str,
}

impl HostRef {
    pub fn new<T: Any>(value: T) -> Self {
        Self::from_rc(Rc::new(value))
    }

    pub fn from_rc<T: Any>(rc: Rc<T>) -> Self {
        Self {
            inner: rc,
            class: short_type_name::<T>(),
        }
    }

    /// Unqualified Rust type name of the wrapped object.
    pub fn class(&self) -> &'static str {
        self.class
    }

    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    pub fn downcast<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    pub fn downcast_rc<T: Any>(&self) -> Option<Rc<T>> {
        Rc::clone(&self.inner).downcast::<T>().ok()
    }

    pub fn ptr_eq(&self, other: &HostRef) -> bool {
        std::ptr::eq(
            Rc::as_ptr(&self.inner) as *const (),
            Rc::as_ptr(&other.inner) as *const (),
        )
    }
}

impl fmt::Debug for HostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostRef({})", self.class)
    }
}

/// Unqualified name of `T`, generics stripped.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// A host-side exception value, stored for the guest by `handle_error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError {
    pub name: String,
    pub message: String,
}

impl HostError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn security(message: impl Into<String>) -> Self {
        Self::new("SecurityError", message)
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new("NotSupportedError", message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new("InvalidStateError", message)
    }

    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::new("QuotaExceededError", message)
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new("SyntaxError", message)
    }

    pub fn range(message: impl Into<String>) -> Self {
        Self::new("RangeError", message)
    }

    pub fn reference(message: impl Into<String>) -> Self {
        Self::new("ReferenceError", message)
    }

    pub fn index_size(message: impl Into<String>) -> Self {
        Self::new("IndexSizeError", message)
    }

    pub fn invalid_character(message: impl Into<String>) -> Self {
        Self::new("InvalidCharacterError", message)
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for HostError {}

/// Everything that can live in a handle-table slot.
#[derive(Clone, Default)]
pub enum HostValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(Rc<RefCell<Vec<HostValue>>>),
    Object(HostRef),
    Function(Callback),
    Error(Rc<HostError>),
}

impl HostValue {
    pub fn object<T: Any>(value: T) -> Self {
        HostValue::Object(HostRef::new(value))
    }

    pub fn array(items: Vec<HostValue>) -> Self {
        HostValue::Array(Rc::new(RefCell::new(items)))
    }

    /// `undefined` or `null`.
    pub fn is_like_none(&self) -> bool {
        matches!(self, HostValue::Undefined | HostValue::Null)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, HostValue::Undefined)
    }

    /// Non-null value whose `typeof` is `"object"`.
    pub fn is_object(&self) -> bool {
        matches!(
            self,
            HostValue::Array(_) | HostValue::Object(_) | HostValue::Error(_)
        )
    }

    pub fn is_string(&self) -> bool {
        matches!(self, HostValue::String(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, HostValue::Function(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_host_ref(&self) -> Option<&HostRef> {
        match self {
            HostValue::Object(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_callback(&self) -> Option<&Callback> {
        match self {
            HostValue::Function(cb) => Some(cb),
            _ => None,
        }
    }

    /// Borrow the concrete host object behind an `Object` value.
    pub fn downcast<T: Any>(&self) -> Option<&T> {
        self.as_host_ref().and_then(|r| r.downcast::<T>())
    }

    /// Short description used in type-mismatch errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::Undefined => "undefined",
            HostValue::Null => "null",
            HostValue::Bool(_) => "boolean",
            HostValue::Number(_) => "number",
            HostValue::String(_) => "string",
            HostValue::Array(_) => "Array",
            HostValue::Object(r) => r.class(),
            HostValue::Function(_) => "function",
            HostValue::Error(_) => "Error",
        }
    }

    /// `Object.is` semantics.
    pub fn same_value(&self, other: &HostValue) -> bool {
        match (self, other) {
            (HostValue::Undefined, HostValue::Undefined) => true,
            (HostValue::Null, HostValue::Null) => true,
            (HostValue::Bool(a), HostValue::Bool(b)) => a == b,
            (HostValue::Number(a), HostValue::Number(b)) => {
                (a.is_nan() && b.is_nan()) || a.to_bits() == b.to_bits()
            }
            (HostValue::String(a), HostValue::String(b)) => a == b,
            (HostValue::Array(a), HostValue::Array(b)) => Rc::ptr_eq(a, b),
            (HostValue::Object(a), HostValue::Object(b)) => a.ptr_eq(b),
            (HostValue::Function(a), HostValue::Function(b)) => a.ptr_eq(b),
            (HostValue::Error(a), HostValue::Error(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Human readable rendering handed to the guest by `__wbindgen_debug_string`.
    pub fn debug_string(&self) -> String {
        match self {
            HostValue::Undefined => "undefined".to_string(),
            HostValue::Null => "null".to_string(),
            HostValue::Bool(b) => b.to_string(),
            HostValue::Number(n) => format_number(*n),
            HostValue::String(s) => format!("\"{s}\""),
            HostValue::Function(_) => "Function".to_string(),
            HostValue::Array(items) => {
                let items = items.borrow();
                let parts: Vec<String> = items.iter().map(HostValue::debug_string).collect();
                format!("[{}]", parts.join(", "))
            }
            HostValue::Object(r) => r.class().to_string(),
            HostValue::Error(e) => format!("{}: {}", e.name, e.message),
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.debug_string())
    }
}

/// Number-to-string conversion close enough to JavaScript's for debug output.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == n.trunc() && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        HostValue::Number(n)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::String(Rc::from(s))
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::String(Rc::from(s))
    }
}

impl From<HostRef> for HostValue {
    fn from(r: HostRef) -> Self {
        HostValue::Object(r)
    }
}

impl From<Callback> for HostValue {
    fn from(cb: Callback) -> Self {
        HostValue::Function(cb)
    }
}

impl From<HostError> for HostValue {
    fn from(e: HostError) -> Self {
        HostValue::Error(Rc::new(e))
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(HostValue::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canvas;

    #[test]
    fn test_same_value_numbers() {
        assert!(HostValue::from(f64::NAN).same_value(&HostValue::from(f64::NAN)));
        assert!(!HostValue::from(0.0).same_value(&HostValue::from(-0.0)));
        assert!(HostValue::from(1.5).same_value(&HostValue::from(1.5)));
    }

    #[test]
    fn test_same_value_objects_by_identity() {
        let a = HostRef::new(Canvas);
        let b = HostRef::new(Canvas);
        assert!(HostValue::from(a.clone()).same_value(&HostValue::from(a.clone())));
        assert!(!HostValue::from(a).same_value(&HostValue::from(b)));
    }

    #[test]
    fn test_downcast() {
        let v = HostValue::object(Canvas);
        assert!(v.downcast::<Canvas>().is_some());
        assert!(v.downcast::<String>().is_none());
        assert_eq!(v.type_name(), "Canvas");
    }

    #[test]
    fn test_debug_string() {
        assert_eq!(HostValue::Undefined.debug_string(), "undefined");
        assert_eq!(HostValue::from(3.0).debug_string(), "3");
        assert_eq!(HostValue::from(0.5).debug_string(), "0.5");
        assert_eq!(HostValue::from("hi").debug_string(), "\"hi\"");
        let arr = HostValue::array(vec![HostValue::from(1.0), HostValue::Null]);
        assert_eq!(arr.debug_string(), "[1, null]");
        let err = HostValue::from(HostError::security("denied"));
        assert_eq!(err.debug_string(), "SecurityError: denied");
    }

    #[test]
    fn test_typeof_predicates() {
        assert!(!HostValue::Null.is_object());
        assert!(HostValue::array(vec![]).is_object());
        assert!(HostValue::Null.is_like_none());
        assert!(!HostValue::from(false).is_like_none());
        assert!(HostValue::from("x").is_string());
    }
}
