//! Narrative element types.

use super::similarity::Signature;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Attribute name to attribute value.
///
/// Ordered so that prompt rendering and signatures are deterministic.
pub type AttributeMap = BTreeMap<String, String>;

/// Unique identifier for a narrative element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(Uuid);

impl ElementId {
    /// Create a new unique element ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ElementId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kinds of narrative elements tracked for visual consistency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    /// A person or creature.
    Character,
    /// A prop, item or artifact.
    Object,
    /// A place or environment.
    Setting,
}

impl ElementKind {
    /// Get the display name for this kind.
    pub fn name(&self) -> &'static str {
        match self {
            ElementKind::Character => "character",
            ElementKind::Object => "object",
            ElementKind::Setting => "setting",
        }
    }
}

/// A reference to a narrative element as it appears in a parsed sentence.
///
/// `attributes` carries the identifying details the parser saw alongside the
/// name ("the *blue* dog"); they drive disambiguation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementRef {
    pub name: String,
    pub kind: ElementKind,
    #[serde(default)]
    pub attributes: AttributeMap,
    /// Known identity, when the parser already resolved it.
    #[serde(default)]
    pub id: Option<ElementId>,
}

impl ElementRef {
    /// Create a reference by name and kind.
    pub fn new(kind: ElementKind, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            attributes: AttributeMap::new(),
            id: None,
        }
    }

    /// Add an identifying attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Pin this reference to a known element.
    pub fn with_id(mut self, id: ElementId) -> Self {
        self.id = Some(id);
        self
    }
}

/// An element tracked by the narrative context provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeElement {
    pub id: ElementId,
    pub kind: ElementKind,
    pub name: String,
    pub attributes: AttributeMap,
    pub signature: Signature,
    /// Sequence number of the sentence that last updated this element.
    pub last_seen: Option<u64>,
}

impl NarrativeElement {
    /// Create a new element with the given attributes.
    pub fn new(kind: ElementKind, name: impl Into<String>, attributes: AttributeMap) -> Self {
        let signature = Signature::from_attributes(&attributes);
        Self {
            id: ElementId::new(),
            kind,
            name: name.into(),
            attributes,
            signature,
            last_seen: None,
        }
    }

    /// A minimal element carrying only a name and kind.
    pub fn minimal(kind: ElementKind, name: impl Into<String>) -> Self {
        Self::new(kind, name, AttributeMap::new())
    }

    /// Merge attributes, overwriting only the supplied keys.
    pub fn merge(&mut self, delta: &AttributeMap) {
        for (key, value) in delta {
            self.attributes.insert(key.clone(), value.clone());
        }
        self.signature = Signature::from_attributes(&self.attributes);
    }

    /// Check if a name matches this element (case-insensitive).
    pub fn matches_name(&self, query: &str) -> bool {
        self.name.trim().eq_ignore_ascii_case(query.trim())
    }

    /// Render as a short prompt phrase, e.g. `dog (color: blue, size: small)`.
    pub fn describe(&self) -> String {
        if self.attributes.is_empty() {
            return self.name.clone();
        }
        let attrs: Vec<String> = self
            .attributes
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect();
        format!("{} ({})", self.name, attrs.join(", "))
    }
}
