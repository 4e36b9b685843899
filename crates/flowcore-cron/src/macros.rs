//! `@macro` shorthand expansion.

/// Expand a leading `@macro` token to its five-field equivalent, or `None`
/// if `expr` is not a recognized macro.
pub fn expand(expr: &str) -> Option<&'static str> {
    match expr {
        "@yearly" | "@annually" => Some("0 0 1 1 *"),
        "@monthly" => Some("0 0 1 * *"),
        "@weekly" => Some("0 0 * * 0"),
        "@daily" | "@midnight" => Some("0 0 * * *"),
        "@hourly" => Some("0 * * * *"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_known_macros() {
        assert_eq!(expand("@hourly"), Some("0 * * * *"));
        assert_eq!(expand("@annually"), expand("@yearly"));
        assert_eq!(expand("@midnight"), expand("@daily"));
    }

    #[test]
    fn unknown_macro_is_none() {
        assert_eq!(expand("@fortnightly"), None);
    }
}
