use crate::error::{Result, TagTreeError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level explorer configuration parsed from a YAML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExplorerConfig {
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub watch: WatchSettings,
}

/// Defaults applied to new search sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Seconds between progress callbacks
    #[serde(default = "default_progress_rate")]
    pub progress_rate: f32,
    #[serde(default)]
    pub case_sensitive: bool,
}

impl Default for SearchSettings {
    fn default() -> Self {
        SearchSettings {
            progress_rate: default_progress_rate(),
            case_sensitive: false,
        }
    }
}

/// Which file extensions the filesystem storage opens, and as what
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_data_extensions")]
    pub data_extensions: Vec<String>,
    #[serde(default = "default_archive_extensions")]
    pub archive_extensions: Vec<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            data_extensions: default_data_extensions(),
            archive_extensions: default_archive_extensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSettings {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        WatchSettings {
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_progress_rate() -> f32 {
    0.5
}

fn default_data_extensions() -> Vec<String> {
    vec!["json".into(), "yaml".into(), "yml".into()]
}

fn default_archive_extensions() -> Vec<String> {
    vec!["jsonl".into()]
}

fn default_debounce_ms() -> u64 {
    100
}

/// Parse a config YAML file into an ExplorerConfig
pub fn parse_config(path: &Path) -> Result<ExplorerConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse a config YAML string into an ExplorerConfig
pub fn parse_config_str(content: &str) -> Result<ExplorerConfig> {
    if content.trim().is_empty() {
        return Ok(ExplorerConfig::default());
    }
    let config: ExplorerConfig = serde_yaml::from_str(content)?;
    config.check()?;
    Ok(config)
}

impl ExplorerConfig {
    fn check(&self) -> Result<()> {
        if !self.search.progress_rate.is_finite() || self.search.progress_rate < 0.0 {
            return Err(TagTreeError::Config(format!(
                "search.progress_rate must be a non-negative number, got {}",
                self.search.progress_rate
            )));
        }
        for ext in &self.storage.archive_extensions {
            if self.storage.data_extensions.contains(ext) {
                return Err(TagTreeError::Config(format!(
                    "extension '{ext}' is listed as both data and archive"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config_str("").unwrap();
        assert_eq!(config.search.progress_rate, 0.5);
        assert!(!config.search.case_sensitive);
        assert_eq!(config.storage.archive_extensions, vec!["jsonl".to_string()]);
        assert_eq!(config.watch.debounce_ms, 100);
    }

    #[test]
    fn test_partial_config_overrides() {
        let config = parse_config_str(
            r#"
search:
  case_sensitive: true
storage:
  data_extensions: [dat]
"#,
        )
        .unwrap();
        assert!(config.search.case_sensitive);
        assert_eq!(config.search.progress_rate, 0.5);
        assert_eq!(config.storage.data_extensions, vec!["dat".to_string()]);
    }

    #[test]
    fn test_rejects_negative_progress_rate() {
        let result = parse_config_str("search:\n  progress_rate: -1.0\n");
        assert!(matches!(result, Err(TagTreeError::Config(_))));
    }

    #[test]
    fn test_rejects_overlapping_extensions() {
        let result = parse_config_str("storage:\n  data_extensions: [jsonl]\n");
        assert!(result.is_err());
    }
}
