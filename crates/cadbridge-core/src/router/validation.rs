//! Request validation keyed by path pattern.
//!
//! A schema is a list of parameter rules attached to a path pattern and,
//! optionally, a method set. The router runs the first schema matching the
//! request before dispatch; requests without a schema pass through untouched.

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use super::RoutePattern;
use crate::domain::{HttpMethod, RequestData};
use crate::error::BridgeError;
use crate::fault::{ErrorCategory, ErrorHandler, ErrorSeverity, ErrorSite};

pub const VALIDATOR_MODULE: &str = "validator";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParamKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Number => value.is_number(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
        }
    }

    /// Query-string values arrive as strings; lift them to the declared kind.
    fn coerce(self, value: Value) -> Value {
        let Value::String(s) = &value else {
            return value;
        };
        let lifted = match self {
            ParamKind::Integer => s.trim().parse::<i64>().ok().map(Value::from),
            ParamKind::Number => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(|f| serde_json::Number::from_f64(f).map(Value::Number)),
            ParamKind::Boolean => match s.as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        };
        lifted.unwrap_or(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamRule {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<Value>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub allowed: Vec<Value>,
}

impl ParamRule {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
            min: None,
            max: None,
            allowed: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn one_of<I: IntoIterator<Item = Value>>(mut self, values: I) -> Self {
        self.allowed = values.into_iter().collect();
        self
    }

    /// Problems with the rule itself, checked once at registration.
    fn check_definition(&self) -> Result<(), String> {
        if let (Some(min), Some(max)) = (self.min, self.max)
            && min > max
        {
            return Err(format!("'{}': min {min} is greater than max {max}", self.name));
        }
        if (self.min.is_some() || self.max.is_some())
            && !matches!(self.kind, ParamKind::Number | ParamKind::Integer)
        {
            return Err(format!("'{}': min/max only apply to numeric parameters", self.name));
        }
        if self.required && self.default.is_some() {
            return Err(format!("'{}': a required parameter cannot have a default", self.name));
        }
        if let Some(default) = &self.default {
            self.check_value(default)
                .map_err(|reason| format!("'{}': default {default} is invalid: {reason}", self.name))?;
        }
        for value in &self.allowed {
            if !self.kind.matches(value) {
                return Err(format!("'{}': allowed value {value} is not {:?}", self.name, self.kind));
            }
        }
        Ok(())
    }

    fn check_value(&self, value: &Value) -> Result<(), String> {
        if !self.kind.matches(value) {
            return Err(format!("expected {:?}, got {value}", self.kind).to_lowercase());
        }
        if let Some(n) = value.as_f64() {
            if let Some(min) = self.min
                && n < min
            {
                return Err(format!("must be >= {min}"));
            }
            if let Some(max) = self.max
                && n > max
            {
                return Err(format!("must be <= {max}"));
            }
        }
        if !self.allowed.is_empty() && !self.allowed.contains(value) {
            let allowed: Vec<String> = self.allowed.iter().map(Value::to_string).collect();
            return Err(format!("must be one of [{}]", allowed.join(", ")));
        }
        Ok(())
    }

    fn apply(&self, data: &mut RequestData) -> Result<(), BridgeError> {
        match data.remove(&self.name) {
            None | Some(Value::Null) => {
                if self.required {
                    return Err(BridgeError::validation(&self.name, "is required"));
                }
                if let Some(default) = &self.default {
                    data.insert(self.name.clone(), default.clone());
                }
                Ok(())
            }
            Some(value) => {
                let value = self.kind.coerce(value);
                self.check_value(&value)
                    .map_err(|reason| BridgeError::validation(&self.name, reason))?;
                data.insert(self.name.clone(), value);
                Ok(())
            }
        }
    }
}

struct Schema {
    pattern: RoutePattern,
    /// `None` applies to every method.
    methods: Option<BTreeSet<HttpMethod>>,
    rules: Vec<ParamRule>,
}

impl Schema {
    fn applies(&self, path: &str, method: HttpMethod) -> bool {
        self.methods.as_ref().is_none_or(|m| m.contains(&method)) && self.pattern.is_match(path)
    }
}

pub struct RequestValidator {
    schemas: RwLock<Vec<Schema>>,
    errors: Arc<ErrorHandler>,
}

impl RequestValidator {
    /// Rejected schemas are recorded in `errors` as configuration failures.
    pub fn new(errors: Arc<ErrorHandler>) -> Self {
        Self {
            schemas: RwLock::new(Vec::new()),
            errors,
        }
    }

    /// Attach `rules` to `pattern` for every method, replacing any schema
    /// already registered for the same pattern and methods. Bad patterns or
    /// rules are rejected and nothing is registered.
    pub fn register_schema(&self, pattern: &str, rules: Vec<ParamRule>) -> Result<(), BridgeError> {
        self.insert(pattern, None, rules)
    }

    /// Like `register_schema`, limited to `methods`.
    pub fn register_method_schema(
        &self,
        pattern: &str,
        methods: &[HttpMethod],
        rules: Vec<ParamRule>,
    ) -> Result<(), BridgeError> {
        self.insert(pattern, Some(methods.iter().copied().collect()), rules)
    }

    fn insert(
        &self,
        pattern: &str,
        methods: Option<BTreeSet<HttpMethod>>,
        rules: Vec<ParamRule>,
    ) -> Result<(), BridgeError> {
        let compiled = match Self::check(pattern, &rules) {
            Ok(compiled) => compiled,
            Err(err) => {
                let site = ErrorSite::new(VALIDATOR_MODULE, "register_schema", ErrorCategory::Configuration)
                    .severity(ErrorSeverity::High);
                self.errors
                    .record_config_error(&err, &site, Some(json!({ "pattern": pattern })));
                return Err(err);
            }
        };

        let mut schemas = self.schemas.write();
        let schema = Schema {
            pattern: compiled,
            methods,
            rules,
        };
        if let Some(existing) = schemas
            .iter_mut()
            .find(|s| s.pattern.as_str() == pattern && s.methods == schema.methods)
        {
            warn!(pattern, "validation schema replaced");
            *existing = schema;
        } else {
            debug!(pattern, "validation schema registered");
            schemas.push(schema);
        }
        Ok(())
    }

    fn check(pattern: &str, rules: &[ParamRule]) -> Result<RoutePattern, BridgeError> {
        let compiled = RoutePattern::compile(pattern)?;
        for rule in rules {
            rule.check_definition().map_err(|reason| BridgeError::InvalidRule {
                pattern: pattern.to_string(),
                reason,
            })?;
        }
        Ok(compiled)
    }

    /// Check `data` against the first schema matching `path` and `method`,
    /// filling in defaults. Stops at the first violated rule.
    pub fn validate(
        &self,
        path: &str,
        method: HttpMethod,
        mut data: RequestData,
    ) -> Result<RequestData, BridgeError> {
        let schemas = self.schemas.read();
        let Some(schema) = schemas.iter().find(|s| s.applies(path, method)) else {
            return Ok(data);
        };
        for rule in &schema.rules {
            rule.apply(&mut data)?;
        }
        Ok(data)
    }

    pub fn has_schema(&self, path: &str, method: HttpMethod) -> bool {
        self.schemas.read().iter().any(|s| s.applies(path, method))
    }

    pub fn schema_count(&self) -> usize {
        self.schemas.read().len()
    }
}
