//! Deterministic attribute similarity used for disambiguation.
//!
//! Two attribute sets are compared only on the keys they share: an element
//! described as `{color: blue}` and a mention carrying `{mood: sleepy}` say
//! nothing contradictory, while `{color: blue}` and `{color: brown}` do.
//! On the shared keys the score is the Jaccard index of the `key=value`
//! pairs. Values are compared after trimming and lowercasing.

use super::element::AttributeMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Normalized attribute fingerprint of an element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(BTreeMap<String, String>);

impl Signature {
    /// Build a signature from raw attributes.
    pub fn from_attributes(attributes: &AttributeMap) -> Self {
        Self(
            attributes
                .iter()
                .map(|(k, v)| (normalize(k), normalize(v)))
                .filter(|(k, v)| !k.is_empty() && !v.is_empty())
                .collect(),
        )
    }

    /// Whether the signature carries no attributes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Similarity in `[0, 1]` against another signature.
    ///
    /// Returns `1.0` when the two share no attribute keys.
    pub fn similarity(&self, other: &Signature) -> f64 {
        let mut shared = 0usize;
        let mut equal = 0usize;
        for (key, value) in &self.0 {
            if let Some(other_value) = other.0.get(key) {
                shared += 1;
                if value == other_value {
                    equal += 1;
                }
            }
        }
        if shared == 0 {
            return 1.0;
        }
        // Pairs on shared keys: |A ∩ B| = equal, |A ∪ B| = 2 * shared - equal.
        equal as f64 / (2 * shared - equal) as f64
    }
}

/// Similarity between two raw attribute maps.
pub fn attribute_similarity(a: &AttributeMap, b: &AttributeMap) -> f64 {
    Signature::from_attributes(a).similarity(&Signature::from_attributes(b))
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> AttributeMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_disjoint_keys_are_compatible() {
        let a = attrs(&[("color", "blue")]);
        let b = attrs(&[("mood", "sleepy")]);
        assert_eq!(attribute_similarity(&a, &b), 1.0);
    }

    #[test]
    fn test_conflicting_value_scores_zero() {
        let a = attrs(&[("color", "blue")]);
        let b = attrs(&[("color", "brown")]);
        assert_eq!(attribute_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_partial_overlap() {
        let a = attrs(&[("color", "blue"), ("size", "small"), ("collar", "red")]);
        let b = attrs(&[("color", "Blue "), ("size", "large")]);
        // shared keys: color (equal), size (different) -> 1 / 3
        let score = attribute_similarity(&a, &b);
        assert!((score - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_values_ignored() {
        let signature = Signature::from_attributes(&attrs(&[("color", "  ")]));
        assert!(signature.is_empty());
    }
}
