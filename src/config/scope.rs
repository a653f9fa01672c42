//! Ignored-scope specification.
//!
//! An exclusion list of graph operations to exempt from a given transform,
//! by exact friendly name, by operation type, or by name pattern.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CuantizarError, Result};
use crate::graph::OpKind;

/// Operations to exclude from a transform.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IgnoredScope {
    /// Exact friendly names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
    /// Operation type names (e.g. "Convolution").
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
    /// Regular-expression patterns over friendly names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,
}

impl IgnoredScope {
    /// Create an empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if nothing is excluded.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.types.is_empty() && self.patterns.is_empty()
    }

    /// Return a new scope with `names` appended.
    pub fn with_added_names(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.names.extend(names);
        self
    }

    /// Return a new scope with a type exclusion appended.
    pub fn with_added_type(mut self, type_name: impl Into<String>) -> Self {
        self.types.push(type_name.into());
        self
    }

    /// Return a new scope with a pattern appended.
    pub fn with_added_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    /// Compile the scope into a matcher.
    ///
    /// Pattern compilation errors surface as configuration errors here, not
    /// at match time.
    pub fn matcher(&self) -> Result<ScopeMatcher> {
        let compiled = self
            .patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| CuantizarError::ConfigValue {
                    field: "ignored_scope.patterns".into(),
                    message: format!("invalid pattern '{p}': {e}"),
                    suggestion: "Use a valid regular expression".into(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ScopeMatcher { scope: self.clone(), compiled })
    }
}

/// Compiled form of an [`IgnoredScope`].
#[derive(Clone, Debug)]
pub struct ScopeMatcher {
    scope: IgnoredScope,
    compiled: Vec<Regex>,
}

impl ScopeMatcher {
    /// Check whether an operation is excluded by this scope.
    pub fn matches(&self, name: &str, kind: OpKind) -> bool {
        if self.scope.names.iter().any(|n| n == name) {
            return true;
        }
        if self.scope.types.iter().any(|t| t == kind.name()) {
            return true;
        }
        self.compiled.iter().any(|re| re.is_match(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_scope_matches_nothing() {
        let m = IgnoredScope::new().matcher().unwrap();
        assert!(!m.matches("anything", OpKind::MatMul));
    }

    #[test]
    fn test_name_match_is_exact() {
        let m = IgnoredScope::new()
            .with_added_names(["lm_head".to_string()])
            .matcher()
            .unwrap();
        assert!(m.matches("lm_head", OpKind::MatMul));
        assert!(!m.matches("lm_head.weight", OpKind::MatMul));
    }

    #[test]
    fn test_type_match() {
        let m = IgnoredScope::new().with_added_type("Convolution").matcher().unwrap();
        assert!(m.matches("any_name", OpKind::Convolution));
        assert!(!m.matches("any_name", OpKind::MatMul));
    }

    #[test]
    fn test_pattern_match() {
        let m = IgnoredScope::new().with_added_pattern(r"^block\.\d+\.attn").matcher().unwrap();
        assert!(m.matches("block.7.attn.qkv", OpKind::MatMul));
        assert!(!m.matches("block.attn.qkv", OpKind::MatMul));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = IgnoredScope::new().with_added_pattern("(unclosed").matcher();
        assert!(matches!(err, Err(CuantizarError::ConfigValue { .. })));
    }

    #[test]
    fn test_with_overrides_leave_original_untouched() {
        let base = IgnoredScope::new().with_added_names(["a".to_string()]);
        let derived = base.clone().with_added_type("Convolution");
        assert!(base.types.is_empty(), "override must produce a new value, not alias");
        assert_eq!(derived.types, vec!["Convolution"]);
        assert_eq!(derived.names, vec!["a"]);
    }

    #[test]
    fn test_serde_skips_empty_fields() {
        let json = serde_json::to_string(&IgnoredScope::new()).unwrap();
        assert_eq!(json, "{}");
        let scope: IgnoredScope = serde_json::from_str(r#"{"types":["Convolution"]}"#).unwrap();
        assert_eq!(scope.types, vec!["Convolution"]);
    }
}
