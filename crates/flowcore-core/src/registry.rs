//! External dispatch seams: the `call` stage's function registry,
//! the `py` stage's pluggable script runner, and the shared cancellation
//! signal threaded workflow -> job -> stage -> nested stage.
//!
//! These are traits, not implementations, on purpose — concrete registries
//! (a plugin loader, a gRPC-backed function catalog, ...) and concrete
//! script runners (an embedded interpreter) are external collaborators kept
//! out of this crate, reachable only through the trait object.

use crate::error::CoreError;
use crate::param::ParamType;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// A parsed `call` stage target: `<namespace>/<name>@<tag>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallRef {
    pub namespace: String,
    pub name: String,
    pub tag: String,
}

impl CallRef {
    /// Parse `uses: "<namespace>/<name>@<tag>"`.
    pub fn parse(uses: &str) -> Result<Self, CoreError> {
        let (namespace_and_name, tag) = uses
            .split_once('@')
            .ok_or_else(|| CoreError::Registry(format!("'{uses}' is missing a '@<tag>' suffix")))?;
        let (namespace, name) = namespace_and_name
            .split_once('/')
            .ok_or_else(|| CoreError::Registry(format!("'{uses}' is missing a '<namespace>/' prefix")))?;
        if namespace.is_empty() || name.is_empty() || tag.is_empty() {
            return Err(CoreError::Registry(format!("'{uses}' has an empty component")));
        }
        Ok(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            tag: tag.to_string(),
        })
    }
}

impl std::fmt::Display for CallRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.namespace, self.name, self.tag)
    }
}

/// A declared argument of a registered function, used to coerce `with:`
/// (and caller-style post-filter arguments) the same way workflow params are
/// coerced.
#[derive(Debug, Clone)]
pub struct CallArg {
    pub name: String,
    pub ty: ParamType,
    pub required: bool,
}

/// The typed signature of a registered function, returned by
/// [`Registry::resolve`] and used by the engine to coerce `with:` arguments
/// before [`Registry::call`].
#[derive(Debug, Clone, Default)]
pub struct CallSignature {
    pub args: Vec<CallArg>,
    pub is_async: bool,
}

impl CallSignature {
    pub fn arg(&self, name: &str) -> Option<&CallArg> {
        self.args.iter().find(|a| a.name == name)
    }
}

/// Resolves `call` stage targets and caller-style post-filters (`@tag`) to
/// registered functions, and invokes them. A single implementation backs
/// both `uses:` lookups and `@tag` post-filter resolution.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn resolve(&self, uses: &CallRef) -> Result<CallSignature, CoreError>;
    async fn call(&self, sig: &CallSignature, args: HashMap<String, Value>) -> Result<Value, CoreError>;
}

/// Pluggable code-execution contract for `py` stages: the core
/// does not embed or prescribe a language, only the boundary — source plus
/// a locals snapshot in, a JSON value of bindings out.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(&self, source: &str, locals: Value) -> Result<Value, CoreError>;
}

/// A no-op [`ScriptRunner`] used where no interpreter is configured (tests,
/// or a deployment that never uses `py` stages).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScriptRunner;

#[async_trait]
impl ScriptRunner for NoopScriptRunner {
    async fn run(&self, _source: &str, _locals: Value) -> Result<Value, CoreError> {
        Ok(Value::Object(serde_json::Map::new()))
    }
}

/// A source of the shared cancellation signal: `set()` maps to
/// `CancellationToken::cancel()`, `wait(timeout)` to `tokio::select!` over
/// `cancelled()` and a timer at each call site.
pub trait CancellationSource {
    fn token(&self) -> tokio_util::sync::CancellationToken;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_call_ref() {
        let r = CallRef::parse("builtin/http@v1").unwrap();
        assert_eq!(r.namespace, "builtin");
        assert_eq!(r.name, "http");
        assert_eq!(r.tag, "v1");
        assert_eq!(r.to_string(), "builtin/http@v1");
    }

    #[test]
    fn rejects_missing_tag() {
        assert!(CallRef::parse("builtin/http").is_err());
    }

    #[test]
    fn rejects_missing_namespace() {
        assert!(CallRef::parse("http@v1").is_err());
    }
}
