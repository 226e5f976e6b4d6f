use std::sync::Arc;
use std::time::Duration;

use std::future::Future;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::agent::actions::AgentAction;
use crate::device::Device;
use crate::errors::{PilotError, PilotResult};
use crate::perception::element::ElementList;
use crate::perception::tree::HierarchySnapshot;

const MAX_RECONNECT_ATTEMPTS: u32 = 6;
const MAX_BACKOFF_SECS: u64 = 60;

/// Opens device sessions. Implemented by the concrete automation adapter.
#[async_trait]
pub trait DeviceFactory: Send + Sync {
    async fn connect(&self) -> PilotResult<Arc<dyn Device>>;
}

/// Device wrapper that transparently re-establishes the underlying session.
///
/// On a device error the wrapper reconnects (bounded attempts, exponential
/// backoff), swaps the session, closes the stale one best-effort, and retries
/// the original command once. A lock serializes concurrent reconnects.
pub struct ReconnectingDevice {
    factory: Arc<dyn DeviceFactory>,
    session: RwLock<Arc<dyn Device>>,
    reconnect_guard: Mutex<()>,
}

impl ReconnectingDevice {
    pub async fn connect(factory: Arc<dyn DeviceFactory>) -> PilotResult<Self> {
        let session = factory.connect().await?;
        Ok(Self {
            factory,
            session: RwLock::new(session),
            reconnect_guard: Mutex::new(()),
        })
    }

    fn current(&self) -> Arc<dyn Device> {
        self.session.read().clone()
    }

    async fn run<T, F, Fut>(&self, op: F) -> PilotResult<T>
    where
        F: Fn(Arc<dyn Device>) -> Fut,
        Fut: Future<Output = PilotResult<T>>,
    {
        match op(self.current()).await {
            Ok(value) => Ok(value),
            Err(err) if err.is_device_error() => {
                tracing::warn!(error = %err, "device command failed, reconnecting");
                self.reconnect(err).await?;
                op(self.current()).await
            }
            Err(err) => Err(err),
        }
    }

    async fn reconnect(&self, original: PilotError) -> PilotResult<()> {
        let _guard = self.reconnect_guard.lock().await;
        let mut last_error = original;
        for attempt in 0..MAX_RECONNECT_ATTEMPTS {
            if attempt > 0 {
                let wait = (1u64 << attempt).min(MAX_BACKOFF_SECS);
                tracing::info!(attempt, wait_secs = wait, "waiting before reconnect attempt");
                tokio::time::sleep(Duration::from_secs(wait)).await;
            }
            match self.factory.connect().await {
                Ok(fresh) => {
                    let stale = {
                        let mut session = self.session.write();
                        std::mem::replace(&mut *session, fresh)
                    };
                    if let Err(e) = stale.close().await {
                        tracing::debug!(error = %e, "closing stale session failed");
                    }
                    tracing::info!(attempt, "device session re-established");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "reconnect attempt failed");
                    last_error = e;
                }
            }
        }
        tracing::error!(error = %last_error, "device reconnection exhausted");
        Err(last_error)
    }
}

#[async_trait]
impl Device for ReconnectingDevice {
    async fn screenshot(&self) -> PilotResult<Vec<u8>> {
        self.run(|d| async move { d.screenshot().await }).await
    }

    async fn capture_hierarchy(&self) -> PilotResult<HierarchySnapshot> {
        self.run(|d| async move { d.capture_hierarchy().await })
            .await
    }

    async fn focused_hierarchy(&self) -> PilotResult<HierarchySnapshot> {
        self.run(|d| async move { d.focused_hierarchy().await })
            .await
    }

    async fn execute_actions(&self, actions: &[AgentAction]) -> PilotResult<()> {
        let actions = actions.to_vec();
        self.run(move |d| {
            let actions = actions.clone();
            async move { d.execute_actions(&actions).await }
        })
        .await
    }

    async fn wait_for_settle(&self) -> PilotResult<()> {
        self.run(|d| async move { d.wait_for_settle().await }).await
    }

    async fn element_list(&self) -> PilotResult<ElementList> {
        self.run(|d| async move { d.element_list().await }).await
    }

    async fn close(&self) -> PilotResult<()> {
        self.current().close().await
    }

    fn is_closed(&self) -> bool {
        self.current().is_closed()
    }
}
