//! Parameter specifications (the declared shape of `Workflow::params`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared type of a workflow parameter. Coercion of raw intake values
/// against this type is implemented in `flowcore-template`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ParamType {
    String,
    Int,
    Float,
    Decimal,
    Bool,
    Date,
    #[serde(rename = "datetime")]
    DateTime,
    Array,
    Map,
    Choice,
    #[serde(rename = "array-of")]
    ArrayOf(Box<ParamType>),
    #[serde(rename = "map-of")]
    MapOf(Box<ParamType>),
}

/// A declared workflow parameter: type, default, description, and (for
/// `choice`) the ordered, non-empty, unique set of allowed options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(flatten)]
    pub ty: ParamType,
    pub default: Option<Value>,
    pub desc: Option<String>,
    /// Non-empty, unique, order-preserved. Only meaningful when `ty` is `Choice`.
    #[serde(default)]
    pub options: Vec<Value>,
}

impl ParamSpec {
    pub fn new(ty: ParamType) -> Self {
        Self {
            ty,
            default: None,
            desc: None,
            options: Vec::new(),
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_options(mut self, options: Vec<Value>) -> Self {
        self.options = options;
        self
    }
}
