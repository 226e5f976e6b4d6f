pub mod disk;
pub mod memory;
pub mod noop;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::agent::actions::AgentAction;
use crate::agent::context::Step;
use crate::errors::PilotResult;

/// A previously computed decision, safe to replay whenever the cache key
/// matches: identical key means identical model input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedDecision {
    pub actions: Vec<AgentAction>,
    pub step: Step,
}

/// Shared decision store. Backends must be safe under concurrent access
/// from multiple agents.
#[async_trait]
pub trait DecisionCache: Send + Sync {
    async fn get(&self, key: &str) -> PilotResult<Option<CachedDecision>>;

    async fn set(&self, key: &str, value: CachedDecision) -> PilotResult<()>;

    async fn remove(&self, key: &str) -> PilotResult<()>;
}

/// Builds the content-addressed key for one decision point.
pub fn decision_cache_key(
    build_version: &str,
    optimized_tree: &str,
    formatted_context: &str,
) -> String {
    format!(
        "{build_version}-uitree-{}-context-{}",
        sha256_hex(optimized_tree),
        sha256_hex(formatted_context)
    )
}

pub(crate) fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
