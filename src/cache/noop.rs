use async_trait::async_trait;

use crate::cache::{CachedDecision, DecisionCache};
use crate::errors::PilotResult;

/// Cache backend that stores nothing; every lookup is a miss.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

#[async_trait]
impl DecisionCache for NoopCache {
    async fn get(&self, _key: &str) -> PilotResult<Option<CachedDecision>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: CachedDecision) -> PilotResult<()> {
        Ok(())
    }

    async fn remove(&self, _key: &str) -> PilotResult<()> {
        Ok(())
    }
}
