//! Action descriptors and parameter validation
//!
//! Each connection declares its actions with an ordered parameter list. Task
//! parameters are checked and coerced against that list before dispatch.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use super::Params;

/// Declared type of an action parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        }
    }

    /// Coerce a JSON value into this type, if it can be done losslessly.
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (Self::Any, v) => Some(v.clone()),

            (Self::String, Value::String(_)) => Some(value.clone()),
            (Self::String, Value::Number(n)) => Some(Value::String(n.to_string())),
            (Self::String, Value::Bool(b)) => Some(Value::String(b.to_string())),

            (Self::Integer, Value::Number(n)) => {
                if n.is_i64() || n.is_u64() {
                    Some(value.clone())
                } else {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                        .map(|f| Value::Number(Number::from(f as i64)))
                }
            }
            (Self::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(|i| Value::Number(i.into())),

            (Self::Number, Value::Number(_)) => Some(value.clone()),
            (Self::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number),

            (Self::Boolean, Value::Bool(_)) => Some(value.clone()),
            (Self::Boolean, Value::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" => Some(Value::Bool(true)),
                "false" | "no" | "0" => Some(Value::Bool(false)),
                _ => None,
            },

            (Self::Array, Value::Array(_)) => Some(value.clone()),
            (Self::Object, Value::Object(_)) => Some(value.clone()),

            _ => None,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parameter of an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionParameter {
    pub name: String,
    pub required: bool,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub description: String,
}

impl ActionParameter {
    pub fn required(name: impl Into<String>, param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            param_type,
            description: description.into(),
        }
    }

    pub fn optional(name: impl Into<String>, param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            param_type,
            description: description.into(),
        }
    }
}

/// An action exposed by a connection. Immutable after registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ActionParameter>,
}

impl ActionDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    /// Append a parameter
    pub fn with_param(mut self, param: ActionParameter) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn param(&self, name: &str) -> Option<&ActionParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Validate `params` against this descriptor.
    ///
    /// Returns the coerced parameter map, or every problem found. Null values
    /// count as absent. Parameters the action does not declare are rejected.
    pub fn validate(&self, params: &Params) -> std::result::Result<Params, Vec<String>> {
        let mut errors = Vec::new();
        let mut coerced = Params::new();

        for param in &self.parameters {
            match params.get(&param.name).filter(|v| !v.is_null()) {
                None if param.required => {
                    errors.push(format!("missing required parameter '{}'", param.name));
                }
                None => {}
                Some(value) => match param.param_type.coerce(value) {
                    Some(v) => {
                        coerced.insert(param.name.clone(), v);
                    }
                    None => errors.push(format!(
                        "parameter '{}' expected {}, got {}",
                        param.name,
                        param.param_type,
                        json_type_name(value)
                    )),
                },
            }
        }

        for key in params.keys() {
            if self.param(key).is_none() {
                errors.push(format!("unexpected parameter '{}'", key));
            }
        }

        if errors.is_empty() { Ok(coerced) } else { Err(errors) }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
