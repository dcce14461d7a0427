// ⚙️ Configuration - TOML file + environment overrides
//
//   database_path = "tool_catalog.db"
//   diff_excluded_fields = ["modified_date"]
//   log_filter = "info"
//
//   [[legacy_prefixes]]
//   from = "toolforge."
//   to = "toolforge-"

use crate::normalizer::{default_legacy_prefixes, LegacyPrefix, Normalizer};
use crate::patch::PatchEngine;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Overrides `database_path`
pub const DATABASE_ENV: &str = "TOOL_CATALOG_DB";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogConfig {
    pub database_path: PathBuf,
    pub legacy_prefixes: Vec<LegacyPrefix>,
    pub diff_excluded_fields: Vec<String>,
    pub log_filter: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        CatalogConfig {
            database_path: PathBuf::from("tool_catalog.db"),
            legacy_prefixes: default_legacy_prefixes(),
            diff_excluded_fields: vec!["modified_date".to_string()],
            log_filter: "info".to_string(),
        }
    }
}

impl CatalogConfig {
    /// Defaults, or the given file, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(std::env::var(DATABASE_ENV).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    fn apply_env_overrides(&mut self, database: Option<String>) {
        if let Some(path) = database.filter(|p| !p.trim().is_empty()) {
            self.database_path = PathBuf::from(path);
        }
    }

    pub fn normalizer(&self) -> Normalizer {
        Normalizer::with_prefixes(self.legacy_prefixes.clone())
    }

    pub fn patch_engine(&self) -> PatchEngine {
        PatchEngine::with_excluded_fields(self.diff_excluded_fields.clone())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CatalogConfig::default();

        assert_eq!(config.database_path, PathBuf::from("tool_catalog.db"));
        assert_eq!(config.legacy_prefixes, vec![LegacyPrefix::new("toolforge.", "toolforge-")]);
        assert_eq!(config.diff_excluded_fields, vec!["modified_date".to_string()]);
    }

    #[test]
    fn test_parse_partial_file() {
        let config = CatalogConfig::parse(
            r#"
            database_path = "/var/lib/catalog.db"

            [[legacy_prefixes]]
            from = "tools."
            to = "tools-"
            "#,
        )
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/var/lib/catalog.db"));
        assert_eq!(config.legacy_prefixes, vec![LegacyPrefix::new("tools.", "tools-")]);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(CatalogConfig::parse("databse_path = \"typo.db\"").is_err());
    }

    #[test]
    fn test_env_override() {
        let mut config = CatalogConfig::default();

        config.apply_env_overrides(Some("  ".to_string()));
        assert_eq!(config.database_path, PathBuf::from("tool_catalog.db"));

        config.apply_env_overrides(Some("/tmp/other.db".to_string()));
        assert_eq!(config.database_path, PathBuf::from("/tmp/other.db"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.toml");
        fs::write(&path, "log_filter = \"debug\"\ndiff_excluded_fields = []\n").unwrap();

        let config = CatalogConfig::from_file(&path).unwrap();
        assert_eq!(config.log_filter, "debug");
        assert!(config.diff_excluded_fields.is_empty());

        assert!(CatalogConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
