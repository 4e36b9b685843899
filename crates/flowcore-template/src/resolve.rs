//! Ties the scanner, parser, filter table, and [`Registry`] together:
//! resolve every `${{ ... }}` occurrence in a string against a context.

use crate::ast::{Arg, Expr, Root};
use crate::error::TemplateError;
use crate::filters;
use crate::parser::parse_expr;
use crate::scanner;
use async_recursion::async_recursion;
use flowcore_core::registry::{CallRef, Registry};
use serde_json::Value;
use std::collections::HashMap;

/// Resolve every `${{ ... }}` template embedded anywhere inside `input`,
/// recursing through array items and mapping values.
#[async_recursion]
pub async fn resolve_value(
    input: &Value,
    ctx: &Value,
    registry: Option<&(dyn Registry)>,
    with_args: Option<&HashMap<String, Value>>,
) -> Result<Value, TemplateError> {
    match input {
        Value::String(s) => resolve_str(s, ctx, registry, with_args).await,
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_value(item, ctx, registry, with_args).await?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(v, ctx, registry, with_args).await?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Resolve every `${{ expr }}` in `input` against `ctx`.
///
/// If `input` contains no template, it is returned unchanged. If `input` *is* a single template occupying the whole
/// string, the raw typed value is returned (preserving non-string types);
/// otherwise each occurrence is rendered to its display form and spliced
/// back into the surrounding text.
///
/// `with_args` is the containing stage's `with:` mapping, merged into a
/// caller-style post-filter's (`@tag`) invocation alongside the piped value.
pub async fn resolve_str(
    input: &str,
    ctx: &Value,
    registry: Option<&(dyn Registry)>,
    with_args: Option<&HashMap<String, Value>>,
) -> Result<Value, TemplateError> {
    let matches = scanner::scan(input);
    if matches.is_empty() {
        return Ok(Value::String(input.to_string()));
    }

    if matches.len() == 1 && matches[0].range == (0..input.len()) {
        let expr = parse_expr(&matches[0].inner)?;
        return eval_expr(&expr, ctx, registry, with_args).await;
    }

    let mut out = String::with_capacity(input.len());
    let mut cursor = 0;
    for m in &matches {
        out.push_str(&input[cursor..m.range.start]);
        let expr = parse_expr(&m.inner)?;
        let value = eval_expr(&expr, ctx, registry, with_args).await?;
        out.push_str(&filters::display_value(&value));
        cursor = m.range.end;
    }
    out.push_str(&input[cursor..]);
    Ok(Value::String(out))
}

async fn eval_expr(
    expr: &Expr,
    ctx: &Value,
    registry: Option<&(dyn Registry)>,
    with_args: Option<&HashMap<String, Value>>,
) -> Result<Value, TemplateError> {
    let mut value = match &expr.root {
        Root::Literal(v) => v.clone(),
        Root::Path(path) => match lookup_path(ctx, path) {
            Some(v) => v,
            None if expr.optional => Value::Null,
            None => return Err(TemplateError::Unresolved { path: path.join(".") }),
        },
    };

    for filter in &expr.filters {
        let mut resolved_args = Vec::with_capacity(filter.args.len());
        for arg in &filter.args {
            resolved_args.push(resolve_arg(arg, ctx)?);
        }
        value = filters::apply(&filter.name, value, &resolved_args)?;
    }

    if let Some(tag) = &expr.caller {
        let registry = registry.ok_or_else(|| TemplateError::NoRegistry { tag: tag.clone() })?;
        let call_ref = CallRef {
            namespace: "caller".to_string(),
            name: tag.clone(),
            tag: "latest".to_string(),
        };
        let sig = registry.resolve(&call_ref).await?;
        let mut args = with_args.cloned().unwrap_or_default();
        args.insert("value".to_string(), value);
        value = registry.call(&sig, args).await?;
    }

    Ok(value)
}

fn resolve_arg(arg: &Arg, ctx: &Value) -> Result<Value, TemplateError> {
    match arg {
        Arg::Literal(v) => Ok(v.clone()),
        Arg::Path(path) => lookup_path(ctx, path)
            .ok_or_else(|| TemplateError::Unresolved { path: path.join(".") }),
    }
}

fn lookup_path(ctx: &Value, path: &[String]) -> Option<Value> {
    flowcore_core::context::get_path_in(ctx, &path.join("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Value {
        json!({
            "params": {"run_date": "2024-07-15", "missing_ok": null},
            "matrix": {"n": 3},
        })
    }

    #[tokio::test]
    async fn returns_unchanged_string_without_templates() {
        let v = resolve_str("no templates here", &ctx(), None, None).await.unwrap();
        assert_eq!(v, json!("no templates here"));
    }

    #[tokio::test]
    async fn whole_string_template_preserves_type() {
        let v = resolve_str("${{ matrix.n }}", &ctx(), None, None).await.unwrap();
        assert_eq!(v, json!(3));
    }

    #[tokio::test]
    async fn partial_template_is_spliced_as_string() {
        let v = resolve_str("n=${{ matrix.n }}!", &ctx(), None, None).await.unwrap();
        assert_eq!(v, json!("n=3!"));
    }

    #[tokio::test]
    async fn fmt_filter_on_a_param() {
        let v = resolve_str("${{ params.run_date | fmt('%Y/%m') }}", &ctx(), None, None)
            .await
            .unwrap();
        assert_eq!(v, json!("2024/07"));
    }

    #[tokio::test]
    async fn unresolved_variable_without_question_mark_errors() {
        let err = resolve_str("${{ params.nope }}", &ctx(), None, None).await.unwrap_err();
        assert!(matches!(err, TemplateError::Unresolved { .. }));
    }

    #[tokio::test]
    async fn optional_suffix_resolves_missing_to_empty() {
        let v = resolve_str("${{ params.nope? }}", &ctx(), None, None).await.unwrap();
        assert_eq!(v, Value::Null);
    }

    #[tokio::test]
    async fn resolve_value_recurses_into_mapping_values_and_sequence_items() {
        let input = json!({
            "a": "${{ matrix.n }}",
            "b": ["x", "${{ params.run_date }}"],
            "c": 5,
        });
        let v = resolve_value(&input, &ctx(), None, None).await.unwrap();
        assert_eq!(v["a"], json!(3));
        assert_eq!(v["b"][1], json!("2024-07-15"));
        assert_eq!(v["c"], json!(5));
    }
}
