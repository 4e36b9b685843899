//! The expression AST resolved inside `${{ ... }}`.

use serde_json::Value;

/// A dotted variable path, e.g. `params.run_date` or `stages.step1.outputs.count`.
pub type Path = Vec<String>;

/// One argument to a filter or caller: either a literal or a variable path,
/// resolved against the context at evaluation time.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Literal(Value),
    Path(Path),
}

/// One stage of a `| filter(args)` pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCall {
    pub name: String,
    pub args: Vec<Arg>,
}

/// The root of an expression: either a dotted variable path, or a bare
/// literal (`true`, `false`, a quoted string, or a number) — e.g. `${{ false
/// }}` as an `if`/`until` condition, or `${{ 'z' }}` as a `case` scrutinee.
#[derive(Debug, Clone, PartialEq)]
pub enum Root {
    Path(Path),
    Literal(Value),
}

/// A fully parsed `${{ ... }}` expression: a root (path or literal), an
/// optional filter pipeline, an optional caller-style post-filter (`@tag`),
/// and the `?` optional-suffix flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub root: Root,
    pub filters: Vec<FilterCall>,
    pub caller: Option<String>,
    pub optional: bool,
}
