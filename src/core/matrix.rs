//! Build matrix expansion

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

/// One combination of matrix values
///
/// Keys keep the order in which the matrix declared them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixCell {
    pub values: Vec<(String, String)>,
}

impl MatrixCell {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn set(&mut self, key: &str, value: String) {
        match self.values.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.values.push((key.to_string(), value)),
        }
    }

    /// Does every entry of `partial` equal the value in this cell?
    fn matches(&self, partial: &[(String, String)]) -> bool {
        partial.iter().all(|(k, v)| self.get(k) == Some(v.as_str()))
    }

    /// Display label, e.g. `(ubuntu-latest, 3.9)`
    pub fn label(&self) -> String {
        if self.values.is_empty() {
            return String::new();
        }
        let parts: Vec<&str> = self.values.iter().map(|(_, v)| v.as_str()).collect();
        format!("({})", parts.join(", "))
    }
}

/// Parsed `strategy.matrix`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Matrix {
    /// Axis name and its values, in declaration order
    pub axes: Vec<(String, Vec<String>)>,

    /// Extra combinations or extra keys for matching combinations
    pub include: Vec<Vec<(String, String)>>,

    /// Partial combinations to remove
    pub exclude: Vec<Vec<(String, String)>>,
}

impl Matrix {
    /// Parse a matrix mapping as written in YAML
    pub fn from_mapping(mapping: &Mapping) -> Result<Self> {
        let mut matrix = Matrix::default();

        for (key, value) in mapping {
            let key = key
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("Matrix keys must be strings"))?;
            match key {
                "include" => matrix.include = parse_combinations(key, value)?,
                "exclude" => matrix.exclude = parse_combinations(key, value)?,
                axis => {
                    let values = value
                        .as_sequence()
                        .ok_or_else(|| anyhow::anyhow!("Matrix axis '{}' must be a list", axis))?
                        .iter()
                        .map(scalar_to_string)
                        .collect::<Result<Vec<_>>>()?;
                    if values.is_empty() {
                        anyhow::bail!("Matrix axis '{}' has no values", axis);
                    }
                    matrix.axes.push((axis.to_string(), values));
                }
            }
        }

        Ok(matrix)
    }

    /// Expand into concrete cells
    ///
    /// The product is taken in declaration order with the first axis
    /// varying slowest. Excludes apply to the product only; includes are
    /// applied afterwards and are never excluded.
    pub fn expand(&self) -> Vec<MatrixCell> {
        let mut cells = vec![MatrixCell::default()];

        for (axis, values) in &self.axes {
            let mut next = Vec::with_capacity(cells.len() * values.len());
            for cell in &cells {
                for value in values {
                    let mut cell = cell.clone();
                    cell.values.push((axis.clone(), value.clone()));
                    next.push(cell);
                }
            }
            cells = next;
        }

        if self.axes.is_empty() {
            cells.clear();
        } else {
            cells.retain(|cell| !self.exclude.iter().any(|ex| cell.matches(ex)));
        }

        let product_len = cells.len();
        let is_axis = |key: &str| self.axes.iter().any(|(axis, _)| axis == key);
        for include in &self.include {
            let (axis_keys, added): (Vec<&(String, String)>, Vec<&(String, String)>) =
                include.iter().partition(|(k, _)| is_axis(k));

            // Axis values are fixed; keys added by an earlier include may be overwritten
            let mut extended = false;
            for cell in cells.iter_mut().take(product_len) {
                let fits = axis_keys
                    .iter()
                    .all(|(k, v)| cell.get(k) == Some(v.as_str()));
                if fits {
                    for (k, v) in &added {
                        cell.set(k, v.clone());
                    }
                    extended = true;
                }
            }

            if !extended {
                let mut cell = MatrixCell::default();
                for (k, v) in include {
                    cell.set(k, v.clone());
                }
                cells.push(cell);
            }
        }

        if cells.is_empty() && self.axes.is_empty() && self.include.is_empty() {
            cells.push(MatrixCell::default());
        }

        cells
    }
}

fn parse_combinations(key: &str, value: &Value) -> Result<Vec<Vec<(String, String)>>> {
    let entries = value
        .as_sequence()
        .ok_or_else(|| anyhow::anyhow!("Matrix '{}' must be a list of mappings", key))?;

    entries
        .iter()
        .map(|entry| {
            let map = entry
                .as_mapping()
                .ok_or_else(|| anyhow::anyhow!("Matrix '{}' entries must be mappings", key))?;
            map.iter()
                .map(|(k, v)| {
                    let k = k
                        .as_str()
                        .ok_or_else(|| anyhow::anyhow!("Matrix '{}' keys must be strings", key))?;
                    Ok((k.to_string(), scalar_to_string(v)?))
                })
                .collect()
        })
        .collect()
}

/// Matrix values are compared and substituted as strings
///
/// Unquoted YAML numbers go through the float parser, so `3.10` arrives as
/// `3.1`; workflows quote their interpreter versions for that reason.
pub fn scalar_to_string(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        _ => anyhow::bail!("Matrix values must be scalars"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn matrix(yaml: &str) -> Matrix {
        let mapping: Mapping = serde_yaml::from_str(yaml).unwrap();
        Matrix::from_mapping(&mapping).unwrap()
    }

    #[test]
    fn test_product_order() {
        let m = matrix(
            r#"
os: [ubuntu-latest]
python-version: ["3.7", "3.8", "3.9", "3.10", "3.11", "pypy-3.7", "pypy-3.8"]
"#,
        );
        let cells = m.expand();
        assert_eq!(cells.len(), 7);
        assert_eq!(cells[0].label(), "(ubuntu-latest, 3.7)");
        assert_eq!(cells[3].get("python-version"), Some("3.10"));
        assert_eq!(cells[6].get("python-version"), Some("pypy-3.8"));
        assert!(cells.iter().all(|c| c.get("os") == Some("ubuntu-latest")));
    }

    #[test]
    fn test_first_axis_varies_slowest() {
        let m = matrix("a: [1, 2]\nb: [x, y]\n");
        let labels: Vec<String> = m.expand().iter().map(|c| c.label()).collect();
        assert_eq!(labels, vec!["(1, x)", "(1, y)", "(2, x)", "(2, y)"]);
    }

    #[test]
    fn test_exclude() {
        let m = matrix(
            r#"
os: [ubuntu-latest, windows-latest]
python: ["3.8", "pypy-3.8"]
exclude:
  - os: windows-latest
    python: pypy-3.8
"#,
        );
        let cells = m.expand();
        assert_eq!(cells.len(), 3);
        assert!(!cells
            .iter()
            .any(|c| c.get("os") == Some("windows-latest") && c.get("python") == Some("pypy-3.8")));
    }

    #[test]
    fn test_include_extends_and_adds() {
        let m = matrix(
            r#"
python: ["3.8", "3.9"]
include:
  - python: "3.9"
    experimental: "true"
  - python: "3.12"
"#,
        );
        let cells = m.expand();
        assert_eq!(cells.len(), 3);
        assert_eq!(cells[0].get("experimental"), None);
        assert_eq!(cells[1].get("experimental"), Some("true"));
        assert_eq!(cells[2].get("python"), Some("3.12"));
    }

    #[test]
    fn test_later_include_overwrites_added_keys() {
        let m = matrix(
            r#"
fruit: [apple, pear]
animal: [cat, dog]
include:
  - color: green
  - color: pink
    animal: cat
  - fruit: apple
    shape: circle
  - fruit: banana
  - fruit: banana
    animal: cat
"#,
        );
        let cells = m.expand();
        let maps: Vec<BTreeMap<String, String>> = cells
            .iter()
            .map(|cell| cell.values.iter().cloned().collect())
            .collect();
        let expected = |pairs: &[(&str, &str)]| -> BTreeMap<String, String> {
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
        };

        assert_eq!(
            maps,
            vec![
                expected(&[
                    ("fruit", "apple"),
                    ("animal", "cat"),
                    ("color", "pink"),
                    ("shape", "circle"),
                ]),
                expected(&[
                    ("fruit", "apple"),
                    ("animal", "dog"),
                    ("color", "green"),
                    ("shape", "circle"),
                ]),
                expected(&[("fruit", "pear"), ("animal", "cat"), ("color", "pink")]),
                expected(&[("fruit", "pear"), ("animal", "dog"), ("color", "green")]),
                expected(&[("fruit", "banana")]),
                expected(&[("fruit", "banana"), ("animal", "cat")]),
            ]
        );
    }

    #[test]
    fn test_include_cannot_change_axis_values() {
        let m = matrix("python: ['3.8']
include:
  - python: '3.8'
    tox: py38
");
        let cells = m.expand();
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].get("tox"), Some("py38"));
        assert_eq!(cells[0].get("python"), Some("3.8"));
    }

    #[test]
    fn test_include_only() {
        let m = matrix("include:\n  - python: '3.9'\n  - python: '3.10'\n");
        let cells = m.expand();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[1].get("python"), Some("3.10"));
    }

    #[test]
    fn test_empty_matrix_yields_one_cell() {
        let cells = Matrix::default().expand();
        assert_eq!(cells.len(), 1);
        assert!(cells[0].is_empty());
        assert_eq!(cells[0].label(), "");
    }

    #[test]
    fn test_empty_axis_rejected() {
        let mapping: Mapping = serde_yaml::from_str("python: []").unwrap();
        assert!(Matrix::from_mapping(&mapping).is_err());
    }

    #[test]
    fn test_unquoted_number_loses_trailing_zero() {
        let m = matrix("python: [3.10]");
        assert_eq!(m.expand()[0].get("python"), Some("3.1"));
    }
}
