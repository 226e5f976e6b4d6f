use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::actions::ActionKind;
use crate::cache::disk::{DiskCache, DEFAULT_MAX_BYTES};
use crate::cache::memory::MemoryCache;
use crate::cache::noop::NoopCache;
use crate::cache::DecisionCache;
use crate::errors::{PilotError, PilotResult};
use crate::perception::screenshot::ScreenshotFormat;
use crate::scenario::model::FormFactor;

/// Project-wide settings every scenario falls back to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Version string baked into every cache key so decisions never replay
    /// across builds of the app under test.
    #[serde(default = "default_build_version")]
    pub build_version: String,
    #[serde(default)]
    pub default_form_factor: FormFactor,
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
    #[serde(default = "default_max_step_count")]
    pub max_step_count: usize,
    /// Action kinds allowed in addition to the form-factor defaults, merged
    /// with each scenario's own additions.
    #[serde(default)]
    pub additional_action_kinds: Vec<ActionKind>,
    /// Tool name to enabled flag; scenarios override per tool.
    #[serde(default)]
    pub tool_defaults: HashMap<String, bool>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub screenshot_format: ScreenshotFormat,
    /// Where screenshots and exchange logs land; platform data dir when
    /// absent.
    #[serde(default)]
    pub artifact_dir: Option<PathBuf>,
    /// Extra instructions appended to every decision prompt.
    #[serde(default)]
    pub instructions: Option<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            build_version: default_build_version(),
            default_form_factor: FormFactor::Unspecified,
            max_retry: default_max_retry(),
            max_step_count: default_max_step_count(),
            additional_action_kinds: Vec::new(),
            tool_defaults: HashMap::new(),
            cache: CacheConfig::default(),
            screenshot_format: ScreenshotFormat::Png,
            artifact_dir: None,
            instructions: None,
        }
    }
}

fn default_build_version() -> String {
    "dev".to_string()
}

fn default_max_retry() -> u32 {
    1
}

fn default_max_step_count() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    #[serde(default = "default_disk_max_bytes")]
    pub disk_max_bytes: u64,
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
    #[serde(default = "default_memory_ttl_hours")]
    pub memory_ttl_hours: u64,
    /// Project-level switch that skips cache reads everywhere.
    #[serde(default)]
    pub force_disable_reads: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Disk,
            disk_max_bytes: default_disk_max_bytes(),
            memory_capacity: default_memory_capacity(),
            memory_ttl_hours: default_memory_ttl_hours(),
            force_disable_reads: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    #[default]
    Disk,
    Memory,
    Disabled,
}

fn default_disk_max_bytes() -> u64 {
    DEFAULT_MAX_BYTES
}

fn default_memory_capacity() -> usize {
    100
}

fn default_memory_ttl_hours() -> u64 {
    24
}

impl CacheConfig {
    /// Instantiates the configured cache backend. The disk store lives under
    /// the platform cache directory.
    pub async fn build(&self) -> PilotResult<Arc<dyn DecisionCache>> {
        match self.backend {
            CacheBackend::Disk => {
                let dir = dirs::cache_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("uipilot")
                    .join("decisions");
                Ok(Arc::new(DiskCache::open(dir, self.disk_max_bytes).await?))
            }
            CacheBackend::Memory => Ok(Arc::new(MemoryCache::new(
                self.memory_capacity,
                Duration::from_secs(self.memory_ttl_hours * 60 * 60),
            ))),
            CacheBackend::Disabled => Ok(Arc::new(NoopCache)),
        }
    }
}

impl ProjectConfig {
    /// Artifact directory, defaulting to the platform data dir and falling
    /// back to the working directory.
    pub fn resolve_artifact_dir(&self) -> PathBuf {
        if let Some(dir) = &self.artifact_dir {
            return dir.clone();
        }
        dirs::data_dir()
            .map(|d| d.join("uipilot").join("artifacts"))
            .unwrap_or_else(|| {
                std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
            })
    }
}

fn resolve_config_path() -> PilotResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("uipilot.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("uipilot.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(PilotError::Config(
        "uipilot.toml not found next to executable or in working directory".into(),
    ))
}

pub fn load_config() -> PilotResult<ProjectConfig> {
    let path = resolve_config_path()?;
    let content = std::fs::read_to_string(&path)?;
    let config: ProjectConfig = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), build = %config.build_version, "project config loaded");
    Ok(config)
}

pub fn save_config(config: &ProjectConfig) -> PilotResult<()> {
    let path = resolve_config_path()?;
    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content)?;
    tracing::info!(path = %path.display(), "project config saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: ProjectConfig = toml::from_str("").unwrap();
        assert_eq!(config.build_version, "dev");
        assert_eq!(config.max_retry, 1);
        assert_eq!(config.max_step_count, 10);
        assert_eq!(config.cache.backend, CacheBackend::Disk);
        assert_eq!(config.cache.disk_max_bytes, 500 * 1024 * 1024);
        assert_eq!(config.cache.memory_capacity, 100);
        assert_eq!(config.cache.memory_ttl_hours, 24);
    }

    #[test]
    fn cache_backend_parses_from_toml() {
        let config: ProjectConfig = toml::from_str(
            "[cache]\nbackend = \"memory\"\nmemory_capacity = 5\n",
        )
        .unwrap();
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.cache.memory_capacity, 5);
    }

    #[tokio::test]
    async fn disabled_backend_builds_noop() {
        let config = CacheConfig {
            backend: CacheBackend::Disabled,
            ..CacheConfig::default()
        };
        let cache = config.build().await.unwrap();
        assert!(cache.get("anything").await.unwrap().is_none());
    }
}
