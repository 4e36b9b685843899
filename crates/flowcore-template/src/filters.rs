//! Built-in filters: `upper`, `lower`, `default(value)`, `len`,
//! `keys`, `values`, `coalesce(a,b,...)`, `abspath`, `fmt(pattern)`, `tojson`.

use crate::error::TemplateError;
use serde_json::Value;

/// Apply a named built-in filter. `input` is the pipeline value flowing in
/// from the left; `args` are already-resolved (path args looked up against
/// the context before this call).
pub fn apply(name: &str, input: Value, args: &[Value]) -> Result<Value, TemplateError> {
    match name {
        "upper" => Ok(Value::String(as_str(&input, name)?.to_uppercase())),
        "lower" => Ok(Value::String(as_str(&input, name)?.to_lowercase())),
        "default" => {
            let fallback = args.first().ok_or_else(|| bad_args(name, "expected one argument"))?;
            Ok(if input.is_null() { fallback.clone() } else { input })
        }
        "len" => Ok(Value::Number(length_of(&input, name)?.into())),
        "keys" => match input {
            Value::Object(map) => Ok(Value::Array(map.keys().map(|k| Value::String(k.clone())).collect())),
            _ => Err(bad_args(name, "expected a map")),
        },
        "values" => match input {
            Value::Object(map) => Ok(Value::Array(map.into_values().collect())),
            _ => Err(bad_args(name, "expected a map")),
        },
        "coalesce" => {
            if !input.is_null() {
                return Ok(input);
            }
            Ok(args.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null))
        }
        "abspath" => {
            let raw = as_str(&input, name)?;
            let path = std::path::Path::new(raw);
            let abs = if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir().unwrap_or_default().join(path)
            };
            Ok(Value::String(abs.to_string_lossy().into_owned()))
        }
        "fmt" => {
            let pattern = args
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| bad_args(name, "expected a format-string argument"))?;
            Ok(Value::String(format_value(&input, pattern)))
        }
        "tojson" => Ok(Value::String(
            serde_json::to_string(&input).map_err(|e| bad_args(name, e.to_string()))?,
        )),
        other => Err(TemplateError::UnknownFilter(other.to_string())),
    }
}

fn as_str<'a>(v: &'a Value, filter: &str) -> Result<&'a str, TemplateError> {
    v.as_str().ok_or_else(|| bad_args(filter, "expected a string"))
}

fn length_of(v: &Value, filter: &str) -> Result<u64, TemplateError> {
    match v {
        Value::String(s) => Ok(s.chars().count() as u64),
        Value::Array(a) => Ok(a.len() as u64),
        Value::Object(m) => Ok(m.len() as u64),
        _ => Err(bad_args(filter, "expected a string, array, or map")),
    }
}

/// `fmt(pattern)`: `strftime`-style pattern applied to date/datetime-shaped
/// strings; otherwise falls back to `Display`.
fn format_value(v: &Value, pattern: &str) -> String {
    if let Some(s) = v.as_str() {
        if let Ok(date) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return date.format(pattern).to_string();
        }
        if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
            return dt.format(pattern).to_string();
        }
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
            return dt.format(pattern).to_string();
        }
    }
    display_value(v)
}

fn bad_args(filter: &str, reason: impl Into<String>) -> TemplateError {
    TemplateError::BadFilterArgs {
        filter: filter.to_string(),
        reason: reason.into(),
    }
}

pub fn display_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upper_and_lower() {
        assert_eq!(apply("upper", json!("abc"), &[]).unwrap(), json!("ABC"));
        assert_eq!(apply("lower", json!("ABC"), &[]).unwrap(), json!("abc"));
    }

    #[test]
    fn default_substitutes_only_when_null() {
        assert_eq!(apply("default", Value::Null, &[json!(5)]).unwrap(), json!(5));
        assert_eq!(apply("default", json!(1), &[json!(5)]).unwrap(), json!(1));
    }

    #[test]
    fn len_of_array_and_string() {
        assert_eq!(apply("len", json!([1, 2, 3]), &[]).unwrap(), json!(3));
        assert_eq!(apply("len", json!("hello"), &[]).unwrap(), json!(5));
    }

    #[test]
    fn coalesce_picks_first_non_null() {
        assert_eq!(apply("coalesce", Value::Null, &[Value::Null, json!("x")]).unwrap(), json!("x"));
    }

    #[test]
    fn fmt_applies_strftime_pattern_to_a_date() {
        let result = apply("fmt", json!("2024-07-15"), &[json!("%Y/%m")]).unwrap();
        assert_eq!(result, json!("2024/07"));
    }

    #[test]
    fn tojson_serializes_structured_values() {
        let result = apply("tojson", json!({"a": 1}), &[]).unwrap();
        assert_eq!(result, json!(r#"{"a":1}"#));
    }
}
