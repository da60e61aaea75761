//! Values crossing the evaluation boundary.
//!
//! [`JsArg`] is what callers pass into a remote function, [`JsValue`] is what a by-value
//! evaluation hands back. Both keep the numbers the JSON wire model cannot carry (`NaN`,
//! `±Infinity`, `-0`, big integers) distinct from ordinary values.

use std::collections::BTreeMap;
use std::str::FromStr;

use cdp_adapter::RemoteObject;
use num_bigint::BigInt;
use serde_json::{Number, Value};

use crate::handle::{ElementHandle, JsHandle, RemoteHandle};

/// Positional argument of a remote function call.
#[derive(Clone, Debug)]
pub enum JsArg {
    Null,
    Number(f64),
    BigInt(BigInt),
    Json(Value),
    Handle {
        handle: JsHandle,
        type_name: &'static str,
    },
}

impl JsArg {
    /// Literal the protocol expects in `unserializableValue`, if the number needs one.
    pub(crate) fn unserializable_number(number: f64) -> Option<&'static str> {
        if number.is_nan() {
            Some("NaN")
        } else if number == f64::INFINITY {
            Some("Infinity")
        } else if number == f64::NEG_INFINITY {
            Some("-Infinity")
        } else if number == 0.0 && number.is_sign_negative() {
            Some("-0")
        } else {
            None
        }
    }
}

impl From<f64> for JsArg {
    fn from(value: f64) -> Self {
        JsArg::Number(value)
    }
}

impl From<i64> for JsArg {
    fn from(value: i64) -> Self {
        JsArg::Json(Value::from(value))
    }
}

impl From<i32> for JsArg {
    fn from(value: i32) -> Self {
        JsArg::Json(Value::from(value))
    }
}

impl From<u64> for JsArg {
    fn from(value: u64) -> Self {
        JsArg::Json(Value::from(value))
    }
}

impl From<bool> for JsArg {
    fn from(value: bool) -> Self {
        JsArg::Json(Value::Bool(value))
    }
}

impl From<&str> for JsArg {
    fn from(value: &str) -> Self {
        JsArg::Json(Value::String(value.to_string()))
    }
}

impl From<String> for JsArg {
    fn from(value: String) -> Self {
        JsArg::Json(Value::String(value))
    }
}

impl From<Value> for JsArg {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => JsArg::Null,
            other => JsArg::Json(other),
        }
    }
}

impl From<BigInt> for JsArg {
    fn from(value: BigInt) -> Self {
        JsArg::BigInt(value)
    }
}

impl<T: Into<JsArg>> From<Option<T>> for JsArg {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(JsArg::Null)
    }
}

impl From<&JsHandle> for JsArg {
    fn from(handle: &JsHandle) -> Self {
        JsArg::Handle {
            handle: handle.clone(),
            type_name: handle.type_name(),
        }
    }
}

impl From<&ElementHandle> for JsArg {
    fn from(element: &ElementHandle) -> Self {
        JsArg::Handle {
            handle: element.js_handle().clone(),
            type_name: element.type_name(),
        }
    }
}

/// Result of a by-value evaluation.
#[derive(Clone, Debug, PartialEq)]
pub enum JsValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    BigInt(BigInt),
    String(String),
    Array(Vec<JsValue>),
    Object(BTreeMap<String, JsValue>),
    /// The browser could not serialise the result (cyclic graph, host object). Carries the
    /// browser's reason.
    Unreturnable(String),
}

impl JsValue {
    pub fn from_remote(remote: &RemoteObject) -> JsValue {
        if let Some(literal) = remote.unserializable_value.as_deref() {
            return Self::from_literal(literal);
        }
        if remote.kind == "undefined" {
            return JsValue::Undefined;
        }
        if remote.is_null() {
            return JsValue::Null;
        }
        match &remote.value {
            Some(value) => Self::from_json(value.clone()),
            None => JsValue::Undefined,
        }
    }

    fn from_literal(literal: &str) -> JsValue {
        match literal {
            "NaN" => JsValue::Number(f64::NAN),
            "Infinity" => JsValue::Number(f64::INFINITY),
            "-Infinity" => JsValue::Number(f64::NEG_INFINITY),
            "-0" => JsValue::Number(-0.0),
            other => match other
                .strip_suffix('n')
                .and_then(|digits| BigInt::from_str(digits).ok())
            {
                Some(big) => JsValue::BigInt(big),
                None => JsValue::String(other.to_string()),
            },
        }
    }

    pub fn from_json(value: Value) -> JsValue {
        match value {
            Value::Null => JsValue::Null,
            Value::Bool(flag) => JsValue::Bool(flag),
            Value::Number(number) => JsValue::Number(number.as_f64().unwrap_or(f64::NAN)),
            Value::String(text) => JsValue::String(text),
            Value::Array(items) => JsValue::Array(items.into_iter().map(Self::from_json).collect()),
            Value::Object(map) => JsValue::Object(
                map.into_iter()
                    .map(|(key, value)| (key, Self::from_json(value)))
                    .collect(),
            ),
        }
    }

    /// Lossy JSON view. Values JSON cannot hold become `null`; whole numbers and big integers
    /// become integers when they fit in 64 bits, big integers become strings otherwise.
    pub fn into_json(self) -> Value {
        match self {
            JsValue::Undefined | JsValue::Null | JsValue::Unreturnable(_) => Value::Null,
            JsValue::Bool(flag) => Value::Bool(flag),
            JsValue::Number(number) if is_integral(number) => Value::from(number as i64),
            JsValue::Number(number) => Number::from_f64(number)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            JsValue::BigInt(big) => match i64::try_from(&big) {
                Ok(small) => Value::from(small),
                Err(_) => Value::String(big.to_string()),
            },
            JsValue::String(text) => Value::String(text),
            JsValue::Array(items) => Value::Array(items.into_iter().map(Self::into_json).collect()),
            JsValue::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, value)| (key, value.into_json()))
                    .collect(),
            ),
        }
    }

    /// JavaScript truthiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            JsValue::Undefined | JsValue::Null | JsValue::Unreturnable(_) => false,
            JsValue::Bool(flag) => *flag,
            JsValue::Number(number) => !(number.is_nan() || *number == 0.0),
            JsValue::BigInt(big) => big != &BigInt::from(0),
            JsValue::String(text) => !text.is_empty(),
            JsValue::Array(_) | JsValue::Object(_) => true,
        }
    }

    pub fn is_unreturnable(&self) -> bool {
        matches!(self, JsValue::Unreturnable(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            JsValue::String(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            JsValue::Number(number) => Some(*number),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            JsValue::Bool(flag) => Some(*flag),
            _ => None,
        }
    }
}

/// Whole and inside the `i64` range, so integer decoding targets accept it.
fn is_integral(number: f64) -> bool {
    number.is_finite()
        && number.fract() == 0.0
        && number >= i64::MIN as f64
        && number < i64::MAX as f64
}
