//! UI hierarchy compaction.
//!
//! Shrinks a raw accessibility tree into the compact form shown to the model:
//! off-screen and system-chrome nodes are pruned, contentless wrappers are
//! collapsed, and sibling lists are flattened. The output of one pass is a
//! fixed point of the algorithm.
use regex::Regex;

use crate::perception::tree::{Rect, UiNode};

/// Resource-id patterns for system chrome that never belongs in model input
/// (status/navigation bars and the like).
const DEFAULT_DENYLIST: &[&str] = &[
    r"^com\.android\.systemui:id/.*",
    r"^android:id/(statusBarBackground|navigationBarBackground)$",
];

pub struct CompactionOptions {
    pub device_bounds: Rect,
    pub denylist: Vec<Regex>,
}

impl CompactionOptions {
    pub fn new(device_bounds: Rect) -> Self {
        let denylist = DEFAULT_DENYLIST
            .iter()
            .map(|p| Regex::new(p).expect("builtin denylist pattern"))
            .collect();
        Self {
            device_bounds,
            denylist,
        }
    }

    pub fn with_denylist(mut self, patterns: Vec<Regex>) -> Self {
        self.denylist = patterns;
        self
    }

    fn denied(&self, node: &UiNode) -> bool {
        !node.resource_id.is_empty() && self.denylist.iter().any(|re| re.is_match(&node.resource_id))
    }

    fn out_of_bounds(&self, node: &UiNode) -> bool {
        node.bounds.is_empty() || !node.bounds.intersects(&self.device_bounds)
    }
}

/// Compacts `root` into the optimized tree. The root node itself is always
/// kept, with its children compacted.
pub fn optimize_tree(root: &UiNode, opts: &CompactionOptions) -> UiNode {
    let mut optimized = root.clone();
    optimized.children = compact_children(&root.children, opts);
    optimized
}

fn compact_children(children: &[UiNode], opts: &CompactionOptions) -> Vec<UiNode> {
    let mut kept = Vec::new();
    for child in children {
        if opts.out_of_bounds(child) || opts.denied(child) {
            continue;
        }
        let grand = compact_children(&child.children, opts);
        if child.has_content() {
            let mut node = child.clone();
            node.children = grand;
            kept.push(node);
        } else {
            // Contentless wrapper: zero survivors drop it, one survivor takes
            // its place, several survivors are promoted to this level.
            kept.extend(grand);
        }
    }
    kept
}

/// Renders the optimized tree as the indented text block used both as model
/// input and as the tree component of the decision cache key.
pub fn format_tree(root: &UiNode) -> String {
    let mut out = String::new();
    format_node(root, 0, &mut out);
    out
}

fn format_node(node: &UiNode, depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
    out.push_str(node.class_name.rsplit('.').next().unwrap_or("node"));
    if !node.resource_id.is_empty() {
        out.push_str(&format!(" id={}", node.resource_id));
    }
    if !node.text.trim().is_empty() {
        out.push_str(&format!(" text={:?}", node.text));
    }
    if !node.label.trim().is_empty() {
        out.push_str(&format!(" label={:?}", node.label));
    }
    if !node.hint.trim().is_empty() {
        out.push_str(&format!(" hint={:?}", node.hint));
    }
    for (flag, name) in [
        (node.clickable, "clickable"),
        (node.checked, "checked"),
        (node.selected, "selected"),
        (node.focusable, "focusable"),
        (node.focused, "focused"),
    ] {
        if flag {
            out.push(' ');
            out.push_str(name);
        }
    }
    out.push('\n');
    for child in &node.children {
        format_node(child, depth + 1, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::tree::Rect;

    fn device_opts() -> CompactionOptions {
        CompactionOptions::new(Rect::new(0, 0, 1080, 1920))
    }

    fn leaf(text: &str, bounds: Rect) -> UiNode {
        UiNode {
            class_name: "android.widget.TextView".into(),
            text: text.into(),
            bounds,
            ..Default::default()
        }
    }

    fn wrapper(children: Vec<UiNode>) -> UiNode {
        UiNode {
            class_name: "android.widget.FrameLayout".into(),
            bounds: Rect::new(0, 0, 1080, 1920),
            children,
            ..Default::default()
        }
    }

    #[test]
    fn drops_out_of_bounds_and_chrome() {
        let mut bar = leaf("", Rect::new(0, 0, 1080, 60));
        bar.resource_id = "com.android.systemui:id/status_bar".into();
        bar.clickable = true;
        let offscreen = leaf("hidden", Rect::new(0, 2000, 1080, 2100));
        let visible = leaf("hello", Rect::new(0, 100, 1080, 200));
        let root = wrapper(vec![bar, offscreen, visible]);

        let optimized = optimize_tree(&root, &device_opts());
        assert_eq!(optimized.children.len(), 1);
        assert_eq!(optimized.children[0].text, "hello");
    }

    #[test]
    fn collapses_single_child_chains() {
        let inner = leaf("deep", Rect::new(0, 0, 100, 100));
        let chain = wrapper(vec![wrapper(vec![wrapper(vec![inner])])]);
        let root = wrapper(vec![chain]);

        let optimized = optimize_tree(&root, &device_opts());
        assert_eq!(optimized.children.len(), 1);
        assert_eq!(optimized.children[0].text, "deep");
        assert!(optimized.children[0].children.is_empty());
    }

    #[test]
    fn flattens_contentless_parents() {
        let a = leaf("a", Rect::new(0, 0, 100, 100));
        let b = leaf("b", Rect::new(0, 100, 100, 200));
        let root = wrapper(vec![wrapper(vec![a, b])]);

        let optimized = optimize_tree(&root, &device_opts());
        let texts: Vec<_> = optimized.children.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn keeps_content_nodes_with_children() {
        let child = leaf("inner", Rect::new(0, 0, 100, 100));
        let mut button = wrapper(vec![child]);
        button.clickable = true;
        let root = wrapper(vec![button]);

        let optimized = optimize_tree(&root, &device_opts());
        assert_eq!(optimized.children.len(), 1);
        assert!(optimized.children[0].clickable);
        assert_eq!(optimized.children[0].children.len(), 1);
    }

    #[test]
    fn compaction_is_idempotent() {
        let root = wrapper(vec![
            wrapper(vec![
                leaf("a", Rect::new(0, 0, 100, 100)),
                leaf("b", Rect::new(0, 100, 100, 200)),
            ]),
            {
                let mut btn = leaf("ok", Rect::new(0, 300, 100, 400));
                btn.clickable = true;
                btn
            },
        ]);
        let opts = device_opts();
        let once = optimize_tree(&root, &opts);
        let twice = optimize_tree(&once, &opts);
        assert_eq!(once, twice);
    }

    #[test]
    fn contentless_root_survives() {
        let root = wrapper(vec![]);
        let optimized = optimize_tree(&root, &device_opts());
        assert_eq!(optimized.class_name, "android.widget.FrameLayout");
    }
}
