//! Host-side value model.
//!
//! Everything a guest can hold a [`Handle`](ferry_abi::Handle) to is a
//! [`HostValue`]. Values are cheap to clone: aggregates and objects are
//! reference counted, so the object table and host code can share them.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::closure::Closure;

/// A failure raised by a host operation.
///
/// This is the host's "exception": it crosses into the guest as a handle
/// and is what the guest rethrows.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{name}: {message}")]
pub struct HostError {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
}

impl HostError {
    /// A plain `Error` without a stack.
    pub fn new(message: impl Into<String>) -> Self {
        Self::named("Error", message)
    }

    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// A plain `Error` with the current backtrace attached when backtraces
    /// are enabled (`RUST_BACKTRACE`).
    pub fn capture(message: impl Into<String>) -> Self {
        Self::capture_named("Error", message)
    }

    pub fn capture_named(name: impl Into<String>, message: impl Into<String>) -> Self {
        let bt = Backtrace::capture();
        let stack = match bt.status() {
            BacktraceStatus::Captured => Some(bt.to_string()),
            _ => None,
        };
        Self {
            stack,
            ..Self::named(name, message)
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Message followed by the stack, the form written to diagnostics.
    pub fn report(&self) -> String {
        match &self.stack {
            Some(stack) => format!("{self}\n\nStack:\n{stack}"),
            None => self.to_string(),
        }
    }
}

/// An opaque host object the guest can only pass around.
#[derive(Clone)]
pub struct HostObject {
    class: Rc<str>,
    inner: Rc<dyn Any>,
}

impl HostObject {
    pub fn new<T: Any>(class: &str, value: T) -> Self {
        Self {
            class: Rc::from(class),
            inner: Rc::new(value),
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostObject")
            .field("class", &self.class)
            .finish_non_exhaustive()
    }
}

/// A value living on the host side of the boundary.
#[derive(Clone, Debug)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Bytes(Rc<[u8]>),
    Array(Rc<[HostValue]>),
    Error(Rc<HostError>),
    Function(Closure),
    Object(HostObject),
}

impl HostValue {
    /// The `typeof` of this value.
    pub fn type_of(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Function(_) => "function",
            Self::Null | Self::Bytes(_) | Self::Array(_) | Self::Error(_) | Self::Object(_) => {
                "object"
            }
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// `undefined` or `null`.
    pub fn is_like_none(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// An object that is not `null`.
    pub fn is_object(&self) -> bool {
        self.type_of() == "object" && !self.is_null()
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Self::Function(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[HostValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&HostError> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&Closure> {
        match self {
            Self::Function(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HostObject> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Human-readable rendering used by the `debug_string` intrinsic.
    ///
    /// Strings are quoted, arrays render their elements, errors include the
    /// stack, and objects render their class name.
    pub fn debug_string(&self) -> String {
        match self {
            Self::Undefined => "undefined".to_string(),
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::String(s) => format!("\"{s}\""),
            Self::Bytes(_) => "Uint8Array".to_string(),
            Self::Array(items) => {
                let parts: Vec<String> = items.iter().map(HostValue::debug_string).collect();
                format!("[{}]", parts.join(", "))
            }
            Self::Error(e) => match &e.stack {
                Some(stack) => format!("{}: {}\n{}", e.name, e.message, stack),
                None => format!("{}: {}", e.name, e.message),
            },
            Self::Function(_) => "Function".to_string(),
            Self::Object(o) => o.class().to_string(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        n.to_string()
    }
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Error(a), Self::Error(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.debug_string())
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        Self::String(Rc::from(s))
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        Self::String(Rc::from(s))
    }
}

impl From<Vec<u8>> for HostValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Rc::from(bytes))
    }
}

impl From<Vec<HostValue>> for HostValue {
    fn from(items: Vec<HostValue>) -> Self {
        Self::Array(Rc::from(items))
    }
}

impl From<HostError> for HostValue {
    fn from(e: HostError) -> Self {
        Self::Error(Rc::new(e))
    }
}

impl From<Closure> for HostValue {
    fn from(c: Closure) -> Self {
        Self::Function(c)
    }
}

impl From<HostObject> for HostValue {
    fn from(o: HostObject) -> Self {
        Self::Object(o)
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Undefined, Into::into)
    }
}
