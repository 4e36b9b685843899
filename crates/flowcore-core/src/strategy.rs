//! Matrix/strategy expansion: the Cartesian product of `matrix` dimensions
//! overlaid with `include` and `exclude`, deterministic for identical
//! inputs.

use crate::error::DefinitionError;
use serde_json::{Map, Value};

/// A job's execution matrix.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Strategy {
    /// Ordered dimension name -> ordered sequence of values.
    pub matrix: Vec<(String, Vec<Value>)>,
    pub include: Vec<Map<String, Value>>,
    pub exclude: Vec<Map<String, Value>>,
    pub max_parallel: Option<usize>,
    #[serde(default = "default_fail_fast")]
    pub fail_fast: bool,
}

fn default_fail_fast() -> bool {
    true
}

impl Strategy {
    pub fn validate(&self) -> Result<(), DefinitionError> {
        for (name, values) in &self.matrix {
            if values.is_empty() {
                return Err(DefinitionError::EmptyMatrixDimension(name.clone()));
            }
        }
        Ok(())
    }
}

/// One expanded matrix item: its stable id and its dimension -> value mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixItem {
    pub item_id: String,
    pub values: Map<String, Value>,
}

/// Expand `matrix`/`include`/`exclude` into the deterministic, ordered item
/// list: identical inputs always produce the same item list, in the same
/// order.
///
/// The empty strategy (no `matrix` dimensions, no `include` entries) yields
/// exactly one item with an empty mapping.
pub fn expand(strategy: &Strategy) -> Vec<MatrixItem> {
    let mut items: Vec<Map<String, Value>> = cartesian_product(&strategy.matrix);

    if items.is_empty() && strategy.include.is_empty() {
        items.push(Map::new());
    }

    for candidate in &strategy.include {
        let already_present = items.iter().any(|existing| maps_equal(existing, candidate));
        if !already_present {
            items.push(candidate.clone());
        }
    }

    for exclusion in &strategy.exclude {
        items.retain(|item| !matches_exclusion(item, exclusion));
    }

    let dim_order: Vec<&str> = strategy.matrix.iter().map(|(name, _)| name.as_str()).collect();
    items
        .into_iter()
        .map(|values| MatrixItem {
            item_id: stable_item_id(&values, &dim_order),
            values,
        })
        .collect()
}

fn cartesian_product(matrix: &[(String, Vec<Value>)]) -> Vec<Map<String, Value>> {
    let mut combos: Vec<Map<String, Value>> = vec![Map::new()];
    for (dim, values) in matrix {
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for value in values {
                let mut extended = combo.clone();
                extended.insert(dim.clone(), value.clone());
                next.push(extended);
            }
        }
        combos = next;
    }
    if matrix.is_empty() { Vec::new() } else { combos }
}

fn maps_equal(a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
    a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
}

fn matches_exclusion(item: &Map<String, Value>, exclusion: &Map<String, Value>) -> bool {
    exclusion.iter().all(|(k, v)| item.get(k) == Some(v))
}

fn stable_item_id(values: &Map<String, Value>, dim_order: &[&str]) -> String {
    let mut parts = Vec::new();
    for dim in dim_order {
        if let Some(v) = values.get(*dim) {
            parts.push(format!("{}={}", dim, value_to_id_fragment(v)));
        }
    }
    let mut extra: Vec<&String> = values.keys().filter(|k| !dim_order.contains(&k.as_str())).collect();
    extra.sort();
    for key in extra {
        parts.push(format!("{}={}", key, value_to_id_fragment(&values[key])));
    }
    if parts.is_empty() {
        "default".to_string()
    } else {
        parts.join(",")
    }
}

fn value_to_id_fragment(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_strategy_yields_one_item() {
        let strategy = Strategy::default();
        let items = expand(&strategy);
        assert_eq!(items.len(), 1);
        assert!(items[0].values.is_empty());
    }

    #[test]
    fn cartesian_expansion_is_deterministic() {
        let strategy = Strategy {
            matrix: vec![
                ("os".to_string(), vec![json!("linux"), json!("macos")]),
                ("n".to_string(), vec![json!(1), json!(2)]),
            ],
            ..Default::default()
        };
        let a = expand(&strategy);
        let b = expand(&strategy);
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
        assert_eq!(a[0].values["os"], json!("linux"));
        assert_eq!(a[0].values["n"], json!(1));
        assert_eq!(a[3].values["os"], json!("macos"));
        assert_eq!(a[3].values["n"], json!(2));
    }

    #[test]
    fn include_adds_missing_combination() {
        let mut include_entry = Map::new();
        include_entry.insert("os".to_string(), json!("windows"));
        include_entry.insert("n".to_string(), json!(9));

        let strategy = Strategy {
            matrix: vec![("os".to_string(), vec![json!("linux")]), ("n".to_string(), vec![json!(1)])],
            include: vec![include_entry],
            ..Default::default()
        };
        let items = expand(&strategy);
        assert_eq!(items.len(), 2);
        assert!(items.iter().any(|i| i.values["os"] == json!("windows")));
    }

    #[test]
    fn include_does_not_duplicate_existing_combination() {
        let mut include_entry = Map::new();
        include_entry.insert("os".to_string(), json!("linux"));
        include_entry.insert("n".to_string(), json!(1));

        let strategy = Strategy {
            matrix: vec![("os".to_string(), vec![json!("linux")]), ("n".to_string(), vec![json!(1)])],
            include: vec![include_entry],
            ..Default::default()
        };
        let items = expand(&strategy);
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn exclude_removes_matching_combination() {
        let mut exclusion = Map::new();
        exclusion.insert("os".to_string(), json!("macos"));

        let strategy = Strategy {
            matrix: vec![
                ("os".to_string(), vec![json!("linux"), json!("macos")]),
                ("n".to_string(), vec![json!(1), json!(2)]),
            ],
            exclude: vec![exclusion],
            ..Default::default()
        };
        let items = expand(&strategy);
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.values["os"] != json!("macos")));
    }

    #[test]
    fn item_ids_are_stable_and_unique() {
        let strategy = Strategy {
            matrix: vec![("n".to_string(), vec![json!(1), json!(2), json!(3)])],
            ..Default::default()
        };
        let items = expand(&strategy);
        let ids: Vec<&str> = items.iter().map(|i| i.item_id.as_str()).collect();
        assert_eq!(ids, vec!["n=1", "n=2", "n=3"]);
    }
}
