//! Template expression language and parameter coercion.
//!
//! `${{ expr }}` is recognized anywhere inside a string ([`scanner`]),
//! parsed into a small AST ([`parser`], [`ast`]), and resolved against a
//! JSON context ([`resolve::resolve_str`]), applying the built-in filter
//! table ([`filters`]) and, for caller-style post-filters, a
//! [`flowcore_core::Registry`]. [`coerce`] implements the parameter-intake
//! coercion table shared with `call`-stage argument binding.

pub mod ast;
pub mod coerce;
pub mod error;
pub mod filters;
pub mod parser;
pub mod resolve;
pub mod scanner;

pub use coerce::coerce;
pub use error::{Result, TemplateError};
pub use resolve::{resolve_str, resolve_value};
