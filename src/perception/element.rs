//! Flattened, indexed view of an optimized UI tree.
//!
//! Elements are re-identified across hierarchy captures by a content-based
//! fingerprint plus an occurrence index, never by a retained reference: a
//! fresh capture produces a fresh list, and "the same element" means "the
//! n-th element with this fingerprint in the new list".
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::perception::tree::{Rect, UiNode};

/// Stable address of a logical element.
///
/// The fingerprint is built from sorted, non-volatile attributes only; bounds,
/// focus, and selection change as the UI moves and are deliberately excluded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementIdentifier {
    pub fingerprint: String,
    /// Positional index among elements sharing the same fingerprint.
    pub occurrence: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    pub identifier: ElementIdentifier,
    pub bounds: Rect,
    pub focused: bool,
    pub text: String,
    pub label: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElementList {
    elements: Vec<Element>,
}

impl ElementList {
    /// Flattens an optimized tree into an indexed element list, assigning
    /// each node its occurrence index in depth-first order.
    pub fn from_tree(root: &UiNode) -> Self {
        let mut elements = Vec::new();
        let mut seen: BTreeMap<String, usize> = BTreeMap::new();
        collect(root, &mut elements, &mut seen);
        Self { elements }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Finds the element matching `identifier` in this capture, i.e. the
    /// node with the same fingerprint at the same occurrence position.
    pub fn find(&self, identifier: &ElementIdentifier) -> Option<&Element> {
        self.elements.iter().find(|e| e.identifier == *identifier)
    }

    pub fn focused(&self) -> Option<&Element> {
        self.elements.iter().find(|e| e.focused)
    }
}

fn collect(node: &UiNode, out: &mut Vec<Element>, seen: &mut BTreeMap<String, usize>) {
    let fingerprint = fingerprint(node);
    let occurrence = {
        let counter = seen.entry(fingerprint.clone()).or_insert(0);
        let current = *counter;
        *counter += 1;
        current
    };
    out.push(Element {
        identifier: ElementIdentifier {
            fingerprint,
            occurrence,
        },
        bounds: node.bounds,
        focused: node.focused,
        text: node.text.clone(),
        label: node.label.clone(),
    });
    for child in &node.children {
        collect(child, out, seen);
    }
}

/// Sorted `key=value` fingerprint over the stable attributes.
fn fingerprint(node: &UiNode) -> String {
    let mut attrs: BTreeMap<&str, String> = BTreeMap::new();
    if !node.class_name.is_empty() {
        attrs.insert("class", node.class_name.clone());
    }
    if !node.resource_id.is_empty() {
        attrs.insert("id", node.resource_id.clone());
    }
    if !node.text.trim().is_empty() {
        attrs.insert("text", node.text.clone());
    }
    if !node.label.trim().is_empty() {
        attrs.insert("label", node.label.clone());
    }
    if !node.hint.trim().is_empty() {
        attrs.insert("hint", node.hint.clone());
    }
    if node.clickable {
        attrs.insert("clickable", "true".into());
    }
    if node.checked {
        attrs.insert("checked", "true".into());
    }
    if node.focusable {
        attrs.insert("focusable", "true".into());
    }
    attrs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(";")
}
