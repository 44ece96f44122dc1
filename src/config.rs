use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::protocol::WorkerConfig;
use crate::worker::{WorkerCommand, WorkerSettings};

/// Default config file name, looked up in the current directory
pub const DEFAULT_CONFIG_FILE: &str = ".wand-bridge.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Log filter used when `WAND_BRIDGE_LOG` is unset (e.g. "info", "wand_bridge=debug")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(default)]
    pub worker: WorkerSettings,
    /// Provider settings sent to the worker by CLI commands
    #[serde(default)]
    pub provider: WorkerConfig,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config at {:?}", path))
    }

    /// Load the file if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Resolve the worker command line for this configuration
    pub fn worker_command(&self) -> anyhow::Result<WorkerCommand> {
        self.worker
            .command()
            .context("Failed to resolve worker entry point")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::Layout;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.worker.interpreter, "python");
        assert!(config.worker.layout.is_none());
        assert_eq!(config.provider, WorkerConfig::default());
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_worker_table_loads_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
log_level = "debug"

[worker]
interpreter = "python3"
args = ["-u"]
layout = "development"
project_root = "/work/wand"

[provider]
apiKey = "sk-test"
baseUrl = "http://localhost:1234/v1"
highSpeedTextModel = "small"
"#
        )
        .unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.worker.interpreter, "python3");
        assert_eq!(config.worker.args, vec!["-u"]);
        assert_eq!(config.worker.layout, Some(Layout::Development));
        assert_eq!(config.provider.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.provider.high_speed_text_model.as_deref(), Some("small"));

        let command = config.worker_command().unwrap();
        assert_eq!(command.to_string(), "python3 -u /work/wand/src/backend/cli.py");
    }

    #[test]
    fn test_invalid_layout_is_rejected() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "[worker]\nlayout = \"staging\"").unwrap();

        let err = Config::from_file(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.worker.interpreter, "python");
    }

    #[test]
    fn test_save_and_reload() {
        let mut config = Config::default();
        config.worker.layout = Some(Layout::Packaged);
        config.worker.resources_dir = Some(PathBuf::from("/opt/wand/resources"));
        config.provider.model = Some("gpt-4o".to_string());

        let temp_file = NamedTempFile::new().unwrap();
        config.save(temp_file.path()).unwrap();

        let loaded = Config::from_file(temp_file.path()).unwrap();
        assert_eq!(loaded.worker, config.worker);
        assert_eq!(loaded.provider, config.provider);
    }
}
