//! Node class resolution.

use std::collections::BTreeMap;

use leftover_api::{LeftoverNodePoolSpec, TemplateRef};
use thiserror::Error;
use tracing::warn;

use crate::store::{ResourceStore, StoreError};

/// Why a request's node class could not be resolved.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("either nodeClassName or nodeClassSelector must be set")]
    Missing,

    #[error("node class {0} not found")]
    NotFound(String),

    #[error("no node class matches selector {0}")]
    NoMatch(String),

    #[error("selector {selector} matches {} node classes: {}", .names.len(), .names.join(", "))]
    Ambiguous { selector: String, names: Vec<String> },

    #[error("reading node classes")]
    Store(#[from] StoreError),
}

/// Resolve the node class a request points at.
///
/// An explicit name wins over a selector; when both are set the selector is
/// ignored with a warning. A selector must match exactly one node class.
pub async fn resolve_node_class(
    store: &dyn ResourceStore,
    spec: &LeftoverNodePoolSpec,
) -> Result<String, TemplateError> {
    if spec.has_ambiguous_template_ref() {
        warn!(
            node_class_name = spec.node_class_name.as_deref().unwrap_or_default(),
            selector = %format_selector(&spec.node_class_selector),
            "Both nodeClassName and nodeClassSelector are set; using nodeClassName"
        );
    }

    match spec.template_ref() {
        None => Err(TemplateError::Missing),
        Some(TemplateRef::Named(name)) => match store.get_node_class(name).await? {
            Some(class) => Ok(class.name().to_string()),
            None => Err(TemplateError::NotFound(name.to_string())),
        },
        Some(TemplateRef::Selector(selector)) => {
            let mut names: Vec<String> = store
                .list_node_classes()
                .await?
                .into_iter()
                .filter(|c| c.matches(selector))
                .map(|c| c.name().to_string())
                .collect();
            match names.len() {
                0 => Err(TemplateError::NoMatch(format_selector(selector))),
                1 => Ok(names.remove(0)),
                _ => {
                    names.sort();
                    Err(TemplateError::Ambiguous {
                        selector: format_selector(selector),
                        names,
                    })
                }
            }
        }
    }
}

fn format_selector(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
