pub mod focus;
pub mod reconnect;

use async_trait::async_trait;

use crate::agent::actions::AgentAction;
use crate::errors::PilotResult;
use crate::perception::compact::{optimize_tree, CompactionOptions};
use crate::perception::element::ElementList;
use crate::perception::tree::HierarchySnapshot;

/// Capability boundary to the device (or browser) under test.
///
/// The engine only ever speaks to this trait; concrete automation protocols
/// live behind it. All methods are failure-prone I/O and report through
/// `PilotError::Device` so the reconnect wrapper can recognize them.
#[async_trait]
pub trait Device: Send + Sync {
    /// Captures the current screen as PNG bytes.
    async fn screenshot(&self) -> PilotResult<Vec<u8>>;

    /// Captures the full UI hierarchy.
    async fn capture_hierarchy(&self) -> PilotResult<HierarchySnapshot>;

    /// Captures the subtree rooted at the currently focused node. Only
    /// meaningful on focus-driven (TV) form factors.
    async fn focused_hierarchy(&self) -> PilotResult<HierarchySnapshot>;

    /// Executes device-level actions in order. Sentinel actions are never
    /// passed here.
    async fn execute_actions(&self, actions: &[AgentAction]) -> PilotResult<()>;

    /// Blocks until the UI has settled after an action.
    async fn wait_for_settle(&self) -> PilotResult<()>;

    /// Indexed element view of the current optimized hierarchy.
    async fn element_list(&self) -> PilotResult<ElementList> {
        let snapshot = self.capture_hierarchy().await?;
        let optimized = optimize_tree(
            &snapshot.root,
            &CompactionOptions::new(snapshot.device_bounds),
        );
        Ok(ElementList::from_tree(&optimized))
    }

    async fn close(&self) -> PilotResult<()>;

    fn is_closed(&self) -> bool;
}
