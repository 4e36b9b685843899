//! Parameter coercion at intake: strings
//! (as received from a caller) or already-structured JSON are coerced to the
//! declared [`ParamType`]. One `coerce` match reused at workflow-param intake
//! and at `call`-stage `with:` argument binding.

use flowcore_core::{ParamError, ParamSpec, ParamType};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Coerce `raw` to `spec.ty`, validating `choice` against `spec.options`.
pub fn coerce(name: &str, raw: &Value, spec: &ParamSpec) -> Result<Value, ParamError> {
    coerce_ty(name, raw, &spec.ty, &spec.options)
}

fn coerce_ty(name: &str, raw: &Value, ty: &ParamType, options: &[Value]) -> Result<Value, ParamError> {
    match ty {
        ParamType::String => coerce_string(name, raw),
        ParamType::Int => coerce_int(name, raw),
        ParamType::Float => coerce_float(name, raw),
        ParamType::Decimal => coerce_decimal(name, raw),
        ParamType::Bool => coerce_bool(name, raw),
        ParamType::Date => coerce_date(name, raw),
        ParamType::DateTime => coerce_datetime(name, raw),
        ParamType::Array => coerce_array(name, raw),
        ParamType::Map => coerce_map(name, raw),
        ParamType::Choice => coerce_choice(name, raw, options),
        ParamType::ArrayOf(inner) => coerce_array_of(name, raw, inner, options),
        ParamType::MapOf(inner) => coerce_map_of(name, raw, inner, options),
    }
}

fn err(name: &str, message: impl Into<String>) -> ParamError {
    ParamError::new(name, message)
}

fn coerce_string(name: &str, raw: &Value) -> Result<Value, ParamError> {
    match raw {
        Value::String(s) => Ok(Value::String(s.clone())),
        Value::Null => Err(err(name, "expected a string, got null")),
        other => Ok(Value::String(crate::filters::display_value(other))),
    }
}

/// Strip `_` digit-group separators (`1_000_000`) the way Rust integer
/// literals do.
fn strip_separators(s: &str) -> String {
    s.chars().filter(|c| *c != '_').collect()
}

fn coerce_int(name: &str, raw: &Value) -> Result<Value, ParamError> {
    match raw {
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(raw.clone()),
        Value::Number(n) => Err(err(name, format!("'{n}' is not an integer"))),
        Value::String(s) => {
            let cleaned = strip_separators(s.trim());
            cleaned
                .parse::<i64>()
                .map(|v| Value::Number(v.into()))
                .map_err(|_| err(name, format!("'{s}' is not a valid integer")))
        }
        other => Err(err(name, format!("cannot coerce {other} to int"))),
    }
}

fn coerce_float(name: &str, raw: &Value) -> Result<Value, ParamError> {
    let as_f64 = match raw {
        Value::Number(n) => n.as_f64().ok_or_else(|| err(name, "not a finite number"))?,
        Value::String(s) => {
            let cleaned = strip_separators(s.trim());
            cleaned
                .parse::<f64>()
                .map_err(|_| err(name, format!("'{s}' is not a valid float")))?
        }
        other => return Err(err(name, format!("cannot coerce {other} to float"))),
    };
    if as_f64.is_nan() || as_f64.is_infinite() {
        return Err(err(name, "NaN/Inf are not accepted"));
    }
    serde_json::Number::from_f64(as_f64)
        .map(Value::Number)
        .ok_or_else(|| err(name, "not representable as JSON number"))
}

fn coerce_decimal(name: &str, raw: &Value) -> Result<Value, ParamError> {
    let text = match raw {
        Value::String(s) => strip_separators(s.trim()),
        Value::Number(n) => n.to_string(),
        other => return Err(err(name, format!("cannot coerce {other} to decimal"))),
    };
    Decimal::from_str(&text)
        .map(|d| Value::String(d.to_string()))
        .map_err(|_| err(name, format!("'{text}' is not a valid decimal")))
}

fn coerce_bool(name: &str, raw: &Value) -> Result<Value, ParamError> {
    match raw {
        Value::Bool(b) => Ok(Value::Bool(*b)),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "0" => Ok(Value::Bool(false)),
            _ => Err(err(name, format!("'{s}' is not a valid bool"))),
        },
        other => Err(err(name, format!("cannot coerce {other} to bool"))),
    }
}

fn coerce_date(name: &str, raw: &Value) -> Result<Value, ParamError> {
    let s = raw.as_str().ok_or_else(|| err(name, "expected an ISO date string"))?;
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
        .map_err(|_| err(name, format!("'{s}' is not a valid YYYY-MM-DD date")))
}

fn coerce_datetime(name: &str, raw: &Value) -> Result<Value, ParamError> {
    let s = raw.as_str().ok_or_else(|| err(name, "expected an ISO datetime string"))?;
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Ok(Value::String(dt.to_rfc3339()));
    }
    // No explicit timezone: assume UTC.
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .map(|naive| Value::String(naive.and_utc().to_rfc3339()))
        .map_err(|_| err(name, format!("'{s}' is not a valid ISO datetime")))
}

fn coerce_array(name: &str, raw: &Value) -> Result<Value, ParamError> {
    match raw {
        Value::Array(_) => Ok(raw.clone()),
        Value::String(s) => serde_json::from_str::<Value>(s)
            .ok()
            .filter(Value::is_array)
            .ok_or_else(|| err(name, format!("'{s}' is not a JSON array"))),
        other => Err(err(name, format!("cannot coerce {other} to array"))),
    }
}

fn coerce_map(name: &str, raw: &Value) -> Result<Value, ParamError> {
    match raw {
        Value::Object(_) => Ok(raw.clone()),
        Value::String(s) => serde_json::from_str::<Value>(s)
            .ok()
            .filter(Value::is_object)
            .ok_or_else(|| err(name, format!("'{s}' is not a JSON object"))),
        other => Err(err(name, format!("cannot coerce {other} to map"))),
    }
}

fn coerce_choice(name: &str, raw: &Value, options: &[Value]) -> Result<Value, ParamError> {
    if options.is_empty() {
        return Err(err(name, "choice parameter has no options declared"));
    }
    if options.contains(raw) {
        return Ok(raw.clone());
    }
    Err(err(name, format!("{raw} is not one of the declared options")))
}

fn coerce_array_of(name: &str, raw: &Value, inner: &ParamType, options: &[Value]) -> Result<Value, ParamError> {
    let array = coerce_array(name, raw)?;
    let Value::Array(items) = array else { unreachable!() };
    let coerced: Result<Vec<Value>, ParamError> =
        items.iter().map(|item| coerce_ty(name, item, inner, options)).collect();
    Ok(Value::Array(coerced?))
}

fn coerce_map_of(name: &str, raw: &Value, inner: &ParamType, options: &[Value]) -> Result<Value, ParamError> {
    let map = coerce_map(name, raw)?;
    let Value::Object(entries) = map else { unreachable!() };
    let mut out = serde_json::Map::with_capacity(entries.len());
    for (k, v) in entries {
        out.insert(k, coerce_ty(name, &v, inner, options)?);
    }
    Ok(Value::Object(out))
}
