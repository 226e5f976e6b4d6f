use serde::{Deserialize, Serialize};

/// Pixel-coordinate rectangle, `right`/`bottom` exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        (self.right - self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.bottom - self.top).max(0)
    }

    pub fn center_x(&self) -> i32 {
        self.left + self.width() / 2
    }

    pub fn center_y(&self) -> i32 {
        self.top + self.height() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// True when the two rectangles share any horizontal span.
    pub fn overlaps_horizontally(&self, other: &Rect) -> bool {
        self.left < other.right && other.left < self.right
    }

    /// True when the two rectangles share any vertical span.
    pub fn overlaps_vertically(&self, other: &Rect) -> bool {
        self.top < other.bottom && other.top < self.bottom
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.overlaps_horizontally(other) && self.overlaps_vertically(other)
    }
}

/// One node of a raw accessibility/UI tree as delivered by the device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiNode {
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub resource_id: String,
    #[serde(default)]
    pub text: String,
    /// Accessibility label / content description.
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub hint: String,
    #[serde(default)]
    pub bounds: Rect,
    #[serde(default)]
    pub clickable: bool,
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub focusable: bool,
    #[serde(default)]
    pub focused: bool,
    #[serde(default)]
    pub children: Vec<UiNode>,
}

impl UiNode {
    /// A node is worth keeping on its own when it carries visible content or
    /// an interaction flag.
    pub fn has_content(&self) -> bool {
        !self.text.trim().is_empty()
            || !self.label.trim().is_empty()
            || !self.hint.trim().is_empty()
            || self.clickable
            || self.checked
            || self.selected
            || self.focusable
    }
}

/// One capture of the device UI tree: the raw node tree, the raw string the
/// device produced (kept for logging), and the visible device bounds used to
/// prune off-screen nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchySnapshot {
    pub root: UiNode,
    pub raw: String,
    pub device_bounds: Rect,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_detection() {
        let a = Rect::new(0, 0, 100, 50);
        let b = Rect::new(50, 100, 150, 150);
        assert!(a.overlaps_horizontally(&b));
        assert!(!a.overlaps_vertically(&b));
        assert!(!a.intersects(&b));

        let c = Rect::new(80, 40, 120, 80);
        assert!(a.intersects(&c));
    }

    #[test]
    fn content_flags() {
        let mut node = UiNode::default();
        assert!(!node.has_content());
        node.text = "  ".into();
        assert!(!node.has_content());
        node.clickable = true;
        assert!(node.has_content());
    }
}
