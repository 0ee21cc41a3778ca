use crate::shard::TagPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default number of worker partitions.
pub const DEFAULT_PARTITIONS: usize = 4;

/// Contents of `.gitengine.toml`. Every section and key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<ReferencesConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub partitions: Option<usize>,
    pub has_header: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencesConfig {
    pub tag_policy: Option<TagPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Parent directory of temporary archive mounts.
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` level for the gitengine target, e.g. `debug`.
    pub level: Option<String>,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.source.as_ref().and_then(|s| s.partitions) == Some(0) {
            return Err("source.partitions must be positive".into());
        }
        Ok(())
    }

    pub fn partitions(&self) -> usize {
        self.source
            .as_ref()
            .and_then(|s| s.partitions)
            .unwrap_or(DEFAULT_PARTITIONS)
    }

    pub fn has_header(&self) -> bool {
        self.source.as_ref().and_then(|s| s.has_header).unwrap_or(true)
    }

    pub fn tag_policy(&self) -> TagPolicy {
        self.references
            .as_ref()
            .and_then(|r| r.tag_policy)
            .unwrap_or_default()
    }

    pub fn scratch_dir(&self) -> Option<PathBuf> {
        self.archive.as_ref().and_then(|a| a.scratch_dir.clone())
    }

    pub fn log_level(&self) -> Option<&str> {
        self.logging.as_ref().and_then(|l| l.level.as_deref())
    }
}
