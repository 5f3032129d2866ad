//! Node class templates referenced by requests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::meta::ObjectMeta;

/// A provisioning template (an `EC2NodeClass`). Only its identity and labels
/// matter to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeClass {
    pub metadata: ObjectMeta,
}

impl NodeClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// True when every selector entry is present in the labels. An empty
    /// selector matches nothing.
    pub fn matches(&self, selector: &BTreeMap<String, String>) -> bool {
        !selector.is_empty()
            && selector
                .iter()
                .all(|(k, v)| self.metadata.labels.get(k) == Some(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_match() {
        let class = NodeClass::new("gpu").with_label("team", "ml").with_label("tier", "spot");

        let mut selector = BTreeMap::new();
        assert!(!class.matches(&selector));

        selector.insert("team".to_string(), "ml".to_string());
        assert!(class.matches(&selector));

        selector.insert("tier".to_string(), "on-demand".to_string());
        assert!(!class.matches(&selector));
    }
}
