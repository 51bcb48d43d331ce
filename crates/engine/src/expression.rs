//! Edge-condition evaluation.
//!
//! Conditions are evaluated in a sandbox that only sees a copy of the
//! global data; nothing an expression does can reach engine state.
//! [`RhaiEvaluator`] is the default backend. Anything implementing
//! [`ExpressionEvaluator`] can replace it through the flow builder.

use async_trait::async_trait;
use rhai::{Dynamic, Engine, Scope};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("expression failed: {0}")]
    Script(String),
}

/// Evaluates a condition string against a data scope.
///
/// Callers treat any `Err` as a condition that did not hold.
#[async_trait]
pub trait ExpressionEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        expression: &str,
        scope: &Map<String, Value>,
    ) -> Result<Value, EvalError>;
}

/// Truthiness of an evaluation result.
///
/// `null`, `false`, `0`, `""` are false; arrays and objects are true.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Rhai-backed evaluator.
///
/// Every top-level key of the scope becomes a constant of the same name,
/// so `x > 5 && region == "eu"` reads global data directly. Only
/// expressions are accepted (no statements, no assignments), and the
/// operation count and nesting depth are capped.
pub struct RhaiEvaluator {
    engine: Engine,
}

impl Default for RhaiEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl RhaiEvaluator {
    pub const MAX_OPERATIONS: u64 = 10_000;

    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine.set_max_operations(Self::MAX_OPERATIONS);
        engine.set_max_expr_depths(64, 32);
        engine.on_print(|msg| debug!(target: "rhai", "{}", msg));
        engine.on_debug(|msg, _, _| debug!(target: "rhai", "{}", msg));
        Self { engine }
    }

    fn eval(&self, expression: &str, data: &Map<String, Value>) -> Result<Value, EvalError> {
        let mut scope = Scope::new();
        for (key, value) in data {
            scope.push_constant_dynamic(key.as_str(), json_to_dynamic(value));
        }
        let result = self
            .engine
            .eval_expression_with_scope::<Dynamic>(&mut scope, expression)
            .map_err(|e| EvalError::Script(e.to_string()))?;
        Ok(dynamic_to_json(&result))
    }
}

#[async_trait]
impl ExpressionEvaluator for RhaiEvaluator {
    async fn evaluate(
        &self,
        expression: &str,
        scope: &Map<String, Value>,
    ) -> Result<Value, EvalError> {
        self.eval(expression, scope)
    }
}

fn json_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::UNIT
            }
        }
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Array(arr) => {
            let array: rhai::Array = arr.iter().map(json_to_dynamic).collect();
            Dynamic::from(array)
        }
        Value::Object(obj) => {
            let mut map = rhai::Map::new();
            for (k, v) in obj {
                map.insert(k.as_str().into(), json_to_dynamic(v));
            }
            Dynamic::from(map)
        }
    }
}

fn dynamic_to_json(value: &Dynamic) -> Value {
    if value.is_unit() {
        Value::Null
    } else if let Ok(b) = value.as_bool() {
        Value::Bool(b)
    } else if let Ok(i) = value.as_int() {
        Value::Number(i.into())
    } else if let Ok(f) = value.as_float() {
        serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    } else if value.is_string() {
        Value::String(value.to_string())
    } else if value.is_array() {
        let arr = value.clone().into_array().unwrap_or_default();
        Value::Array(arr.iter().map(dynamic_to_json).collect())
    } else if let Some(map) = value.clone().try_cast::<rhai::Map>() {
        Value::Object(
            map.into_iter()
                .map(|(k, v)| (k.to_string(), dynamic_to_json(&v)))
                .collect(),
        )
    } else {
        Value::String(value.to_string())
    }
}
