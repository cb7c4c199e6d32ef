use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

pub const DEFAULT_MAX_NEW_TOKENS: usize = 50;
pub const MIN_NEW_TOKENS: i64 = 1;
pub const MAX_NEW_TOKENS: i64 = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub prompt: String,
    pub max_new_tokens: usize,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub generated_text: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

// ---------------------------------------------------------
// Validation
// ---------------------------------------------------------

/// One failed constraint, reported as `{"loc", "msg", "type"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub loc: Vec<String>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl Violation {
    fn new(field: Option<&str>, kind: &'static str, msg: impl Into<String>) -> Self {
        let mut loc = vec!["body".to_string()];
        loc.extend(field.map(str::to_string));
        Self {
            loc,
            msg: msg.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<Violation>);

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|v| format!("{}: {}", v.loc.join("."), v.msg))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

impl GenerateRequest {
    pub fn from_slice(body: &[u8]) -> Result<Self, ValidationErrors> {
        let value: Value = serde_json::from_slice(body).map_err(|e| {
            ValidationErrors(vec![Violation::new(
                None,
                "json_invalid",
                format!("JSON decode error: {e}"),
            )])
        })?;
        Self::from_value(&value)
    }

    /// Checks every field and reports all violations at once.
    pub fn from_value(value: &Value) -> Result<Self, ValidationErrors> {
        let Some(obj) = value.as_object() else {
            return Err(ValidationErrors(vec![Violation::new(
                None,
                "model_attributes_type",
                "Input should be a valid dictionary or object to extract fields from",
            )]));
        };

        let mut violations = Vec::new();
        let prompt = validate_prompt(obj).map_err(|v| violations.push(v)).ok();
        let max_new_tokens = validate_max_new_tokens(obj)
            .map_err(|v| violations.push(v))
            .ok();

        match (prompt, max_new_tokens) {
            (Some(prompt), Some(max_new_tokens)) if violations.is_empty() => Ok(Self {
                prompt,
                max_new_tokens,
            }),
            _ => Err(ValidationErrors(violations)),
        }
    }
}

fn validate_prompt(obj: &Map<String, Value>) -> Result<String, Violation> {
    match obj.get("prompt") {
        None => Err(Violation::new(Some("prompt"), "missing", "Field required")),
        Some(Value::String(s)) if s.is_empty() => Err(Violation::new(
            Some("prompt"),
            "string_too_short",
            "String should have at least 1 character",
        )),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(Violation::new(
            Some("prompt"),
            "string_type",
            "Input should be a valid string",
        )),
    }
}

fn validate_max_new_tokens(obj: &Map<String, Value>) -> Result<usize, Violation> {
    let Some(raw) = obj.get("max_new_tokens") else {
        return Ok(DEFAULT_MAX_NEW_TOKENS);
    };

    let n = as_integer(raw).ok_or_else(|| {
        Violation::new(
            Some("max_new_tokens"),
            "int_type",
            "Input should be a valid integer",
        )
    })?;

    if n < MIN_NEW_TOKENS {
        return Err(Violation::new(
            Some("max_new_tokens"),
            "greater_than_equal",
            format!("Input should be greater than or equal to {MIN_NEW_TOKENS}"),
        ));
    }
    if n > MAX_NEW_TOKENS {
        return Err(Violation::new(
            Some("max_new_tokens"),
            "less_than_equal",
            format!("Input should be less than or equal to {MAX_NEW_TOKENS}"),
        ));
    }
    Ok(n as usize)
}

/// Lax integer coercion: JSON integers, integral floats (`10.0`), bools
/// (`true` is 1) and numeric strings (`" 5 "`, `"5.0"`).
fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(i);
            }
            if n.as_u64().is_some() {
                // larger than i64::MAX, certainly out of range
                return Some(i64::MAX);
            }
            n.as_f64().and_then(integral)
        }
        Value::Bool(b) => Some(i64::from(*b)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
        }
        _ => None,
    }
}

fn integral(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0).then(|| f.clamp(i64::MIN as f64, i64::MAX as f64) as i64)
}
