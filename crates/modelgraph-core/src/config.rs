use std::path::Path;

use anyhow::{bail, Context, Result};
use config as cfg;
use schemars::JsonSchema;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Neo4jConfig {
    /// Base URL of the HTTP endpoint (e.g., "http://localhost:7474")
    #[serde(default = "Neo4jConfig::default_url")]
    pub url: String,
    /// Database name used in the transactional endpoint path
    #[serde(default = "Neo4jConfig::default_database")]
    pub database: String,
    /// Optional username for basic authentication
    #[serde(default)]
    pub username: Option<String>,
    /// Optional password for basic authentication
    #[serde(default, skip_serializing)]
    #[schemars(skip)]
    pub password: Option<SecretString>,
    /// Upper bound for a single statement round-trip
    #[serde(default = "Neo4jConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Neo4jConfig {
    fn default_url() -> String {
        "http://localhost:7474".to_string()
    }

    fn default_database() -> String {
        "neo4j".to_string()
    }

    fn default_timeout_secs() -> u64 {
        30
    }
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
            database: Self::default_database(),
            username: None,
            password: None,
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ModelGraphConfig {
    /// Object property carrying the database node identifier
    #[serde(default = "ModelGraphConfig::default_id_field")]
    pub id_field: String,
    /// Number of composition levels a read expands when the caller gives no depth
    #[serde(default = "ModelGraphConfig::default_read_depth")]
    pub default_read_depth: usize,
    #[serde(default)]
    pub neo4j: Neo4jConfig,
}

impl ModelGraphConfig {
    fn default_id_field() -> String {
        "id".to_string()
    }

    fn default_read_depth() -> usize {
        5
    }

    /// Loads `modelgraph.toml`, then `modelgraph.{env}.toml`, then `MODELGRAPH__*` variables.
    pub fn load(config_dir: &Path, env_name: &str) -> Result<Self> {
        let settings: Self = cfg::Config::builder()
            .add_source(cfg::File::from(config_dir.join("modelgraph.toml")).required(false))
            .add_source(
                cfg::File::from(config_dir.join(format!("modelgraph.{}.toml", env_name)))
                    .required(false),
            )
            .add_source(cfg::Environment::with_prefix("MODELGRAPH").separator("__"))
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")?;

        settings.validate()?;
        info!(
            "Loaded modelgraph configuration from {:?} (env: {})",
            config_dir, env_name
        );
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id_field.trim().is_empty() {
            bail!("id_field must not be empty");
        }
        if self.default_read_depth == 0 {
            bail!("default_read_depth must be at least 1");
        }
        if self.neo4j.timeout_secs == 0 {
            bail!("neo4j.timeout_secs must be at least 1");
        }
        Ok(())
    }
}

impl Default for ModelGraphConfig {
    fn default() -> Self {
        Self {
            id_field: Self::default_id_field(),
            default_read_depth: Self::default_read_depth(),
            neo4j: Neo4jConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn missing_files_fall_back_to_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = ModelGraphConfig::load(tmp.path(), "test").unwrap();
        assert_eq!(config.id_field, "id");
        assert_eq!(config.default_read_depth, 5);
        assert_eq!(config.neo4j.database, "neo4j");
    }

    #[test]
    fn environment_file_overrides_base_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("modelgraph.toml"),
            "id_field = \"_id\"\ndefault_read_depth = 3\n[neo4j]\nurl = \"http://db:7474\"\n",
        )
        .unwrap();
        fs::write(
            tmp.path().join("modelgraph.staging.toml"),
            "default_read_depth = 2\n",
        )
        .unwrap();

        let config = ModelGraphConfig::load(tmp.path(), "staging").unwrap();
        assert_eq!(config.id_field, "_id");
        assert_eq!(config.default_read_depth, 2);
        assert_eq!(config.neo4j.url, "http://db:7474");
        assert_eq!(config.neo4j.timeout_secs, 30);
    }

    #[test]
    fn zero_depth_is_rejected() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("modelgraph.toml"), "default_read_depth = 0\n").unwrap();
        assert!(ModelGraphConfig::load(tmp.path(), "test").is_err());
    }
}
