//!
//! parameter assignments and constraint sets
//!
//! `Params` is the flat `name -> value` mapping exchanged with parameter
//! files; `Constraints` declares how those names are partitioned into
//! normalized groups, free probabilities, and positive rates.
//!
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

///
/// Named scalar parameter assignment.
///
/// Ordered map so that parameter iteration (and therefore M-step update
/// order and serialized output) is deterministic.
///
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params {
    pub defs: BTreeMap<String, f64>,
}

impl Params {
    pub fn new() -> Params {
        Params::default()
    }
    pub fn get(&self, name: &str) -> Result<f64> {
        self.defs
            .get(name)
            .copied()
            .ok_or_else(|| Error::UndefinedParameter(name.to_string()))
    }
    pub fn set(&mut self, name: &str, value: f64) {
        self.defs.insert(name.to_string(), value);
    }
    pub fn contains(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }
    pub fn len(&self) -> usize {
        self.defs.len()
    }
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.defs.iter()
    }
    ///
    /// Right-biased merge: values in `other` override values in `self`.
    ///
    pub fn combine(&self, other: &Params) -> Params {
        let mut defs = self.defs.clone();
        for (name, value) in &other.defs {
            defs.insert(name.clone(), *value);
        }
        Params { defs }
    }
}

impl std::fmt::Display for Params {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for (name, value) in &self.defs {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

///
/// Constraint sets partition parameters into three kinds:
///
/// * `norm`: groups of sibling parameters whose values must sum to 1
/// * `prob`: free probabilities in `[0, 1]`
/// * `rate`: positive reals
///
/// All three arrays are optional in the JSON form.
///
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default)]
    pub norm: Vec<Vec<String>>,
    #[serde(default)]
    pub prob: Vec<String>,
    #[serde(default)]
    pub rate: Vec<String>,
}

impl Constraints {
    ///
    /// Default assignment: each member of a normalized group gets
    /// `1/groupSize`, each free probability `0.5`, each rate `1`.
    ///
    pub fn default_params(&self) -> Params {
        let mut params = Params::new();
        for group in &self.norm {
            for name in group {
                params.set(name, 1.0 / group.len() as f64);
            }
        }
        for name in &self.prob {
            params.set(name, 0.5);
        }
        for name in &self.rate {
            params.set(name, 1.0);
        }
        params
    }

    /// Check name-uniqueness within each normalized group.
    pub fn validate(&self) -> Result<()> {
        for group in &self.norm {
            let mut seen = std::collections::BTreeSet::new();
            for name in group {
                if !seen.insert(name) {
                    return Err(Error::InvalidPriorConfiguration(format!(
                        "duplicate parameter {} in normalized group",
                        name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_scenario() {
        // Constraints{norm:[["a","b","c"]], prob:["p"], rate:["r"]}
        let cons = Constraints {
            norm: vec![vec!["a".to_string(), "b".to_string(), "c".to_string()]],
            prob: vec!["p".to_string()],
            rate: vec!["r".to_string()],
        };
        let params = cons.default_params();
        assert_abs_diff_eq!(params.get("a").unwrap(), 1.0 / 3.0);
        assert_abs_diff_eq!(params.get("b").unwrap(), 1.0 / 3.0);
        assert_abs_diff_eq!(params.get("c").unwrap(), 1.0 / 3.0);
        assert_abs_diff_eq!(params.get("p").unwrap(), 0.5);
        assert_abs_diff_eq!(params.get("r").unwrap(), 1.0);
    }
    #[test]
    fn constraints_json_optional_fields() {
        let cons: Constraints = serde_json::from_str(r#"{"norm":[["a","b"]]}"#).unwrap();
        assert_eq!(cons.norm.len(), 1);
        assert!(cons.prob.is_empty());
        assert!(cons.rate.is_empty());
        assert!(cons.validate().is_ok());
    }
    #[test]
    fn constraints_duplicate_in_group() {
        let cons: Constraints =
            serde_json::from_str(r#"{"norm":[["a","a"]]}"#).unwrap();
        assert!(cons.validate().is_err());
    }
    #[test]
    fn params_json_roundtrip() {
        let mut params = Params::new();
        params.set("p1", 0.25);
        params.set("p2", 0.75);
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(json, r#"{"p1":0.25,"p2":0.75}"#);
        let back: Params = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }
    #[test]
    fn params_combine_right_biased() {
        let mut a = Params::new();
        a.set("x", 1.0);
        a.set("y", 2.0);
        let mut b = Params::new();
        b.set("y", 5.0);
        let c = a.combine(&b);
        assert_eq!(c.get("x").unwrap(), 1.0);
        assert_eq!(c.get("y").unwrap(), 5.0);
    }
}
