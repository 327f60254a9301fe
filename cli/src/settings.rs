use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub database: Option<PathBuf>,
    pub prompt: String,
    pub auto_flush: bool,
    pub log_level: String,
}

impl Settings {
    /// Defaults, then the TOML file at `path` if it exists, then `MINIDB_*`
    /// environment variables.
    pub fn load(path: &Path) -> Result<Self> {
        Self::builder(path)
            .and_then(|b| {
                b.add_source(Environment::with_prefix("MINIDB").try_parsing(true))
                    .build()
            })
            .and_then(Config::try_deserialize)
            .with_context(|| format!("failed to load settings from {}", path.display()))
    }

    fn builder(path: &Path) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Ok(Config::builder()
            .set_default("prompt", "minidb> ")?
            .set_default("auto_flush", true)?
            .set_default("log_level", "warn")?
            .add_source(File::from(path).required(false)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn load_file_only(path: &Path) -> Settings {
        Settings::builder(path)
            .and_then(|b| b.build())
            .and_then(Config::try_deserialize)
            .unwrap()
    }

    #[test]
    fn test_defaults_without_file() {
        let dir = tempdir().unwrap();
        let settings = load_file_only(&dir.path().join("absent.toml"));
        assert_eq!(settings.prompt, "minidb> ");
        assert!(settings.auto_flush);
        assert_eq!(settings.log_level, "warn");
        assert!(settings.database.is_none());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("minidb.toml");
        fs::write(
            &path,
            "database = \"data.db\"\nauto_flush = false\nprompt = \"> \"\n",
        )
        .unwrap();

        let settings = load_file_only(&path);
        assert_eq!(settings.database, Some(PathBuf::from("data.db")));
        assert!(!settings.auto_flush);
        assert_eq!(settings.prompt, "> ");
        assert_eq!(settings.log_level, "warn");
    }
}
