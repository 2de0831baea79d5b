//! Configuration for tally.
//!
//! Looks for `.config/tally.toml` in the start directory or any parent
//! directory. Database URLs may also come from the environment (or a `.env`
//! file next to `.config/`).

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Path of the config file, relative to the project root.
pub const CONFIG_FILE: &str = ".config/tally.toml";

/// Environment variables consulted for the database URL, in order.
pub const DATABASE_URL_VARS: [&str; 2] = ["TALLY_DATABASE_URL", "DATABASE_URL"];

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: DatabaseConfig,
    pub migrations: MigrationsConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Postgres connection string.
    pub url: Option<String>,
}

impl DatabaseConfig {
    /// The connection string, which must be configured somewhere.
    pub fn require_url(&self) -> Result<&str, ConfigError> {
        self.url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or(ConfigError::MissingDatabaseUrl)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationsConfig {
    /// Namespace the migration units target.
    pub namespace: String,
    /// Directory holding `<version>_<label>.up.sql` files.
    pub directory: Utf8PathBuf,
    /// Namespace of the tracking table.
    pub tracking_namespace: String,
    pub tracking_table: String,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            namespace: "public".to_string(),
            directory: Utf8PathBuf::from("migrations"),
            tracking_namespace: "public".to_string(),
            tracking_table: "_tally_migrations".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// `tracing-subscriber` filter directive; `RUST_LOG` takes precedence.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no .config/tally.toml found in current directory or any parent")]
    NotFound,

    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("no database URL: set database.url or TALLY_DATABASE_URL")]
    MissingDatabaseUrl,

    #[error("failed to load .env: {0}")]
    Env(String),

    #[error("path is not valid UTF-8: {0}")]
    NonUtf8Path(String),
}

impl Config {
    /// Parse a config document. `path` is only used in error messages.
    pub fn from_toml_str(text: &str, path: &str) -> Result<Config, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    /// Override values from the environment. The first variable of
    /// [`DATABASE_URL_VARS`] that is set wins over the file.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = DATABASE_URL_VARS
            .iter()
            .find_map(|var| lookup(var).filter(|v| !v.is_empty()))
        {
            self.database.url = Some(url);
        }
    }

    /// Make a relative migrations directory absolute against `root`.
    pub fn resolve_paths(&mut self, root: &Utf8Path) {
        if self.migrations.directory.is_relative() {
            self.migrations.directory = root.join(&self.migrations.directory);
        }
    }
}

/// Load configuration from `.config/tally.toml`, searching up the directory tree.
pub fn load() -> Result<(Config, PathBuf), ConfigError> {
    let cwd = std::env::current_dir().map_err(|e| ConfigError::Io {
        path: ".".to_string(),
        message: e.to_string(),
    })?;
    load_from(&cwd)
}

/// Load configuration starting from a specific directory.
///
/// Returns the config and the path of the file it came from.
pub fn load_from(start: &Path) -> Result<(Config, PathBuf), ConfigError> {
    let config_path = find_config_file(start)?;
    let display = config_path.display().to_string();
    let content = std::fs::read_to_string(&config_path).map_err(|e| ConfigError::Io {
        path: display.clone(),
        message: e.to_string(),
    })?;
    let mut config = Config::from_toml_str(&content, &display)?;

    // <root>/.config/tally.toml
    let root = config_path
        .parent()
        .and_then(Path::parent)
        .unwrap_or(start)
        .to_path_buf();

    match dotenvy::from_path(root.join(".env")) {
        Ok(()) => {}
        Err(e) if e.not_found() => {}
        Err(e) => return Err(ConfigError::Env(e.to_string())),
    }
    config.apply_env(|var| std::env::var(var).ok());

    let root = Utf8PathBuf::from_path_buf(root)
        .map_err(|p| ConfigError::NonUtf8Path(p.display().to_string()))?;
    config.resolve_paths(&root);

    Ok((config, config_path))
}

/// Find `.config/tally.toml` by searching up the directory tree.
fn find_config_file(start: &Path) -> Result<PathBuf, ConfigError> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE);
        if config_path.exists() {
            return Ok(config_path);
        }

        if !current.pop() {
            return Err(ConfigError::NotFound);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = Config::from_toml_str(
            r#"
[database]
url = "postgres://localhost/app"
"#,
            "tally.toml",
        )
        .unwrap();
        assert_eq!(config.database.url.as_deref(), Some("postgres://localhost/app"));
        assert_eq!(config.migrations.namespace, "public");
        assert_eq!(config.migrations.tracking_table, "_tally_migrations");
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let err = Config::from_toml_str("[migrations]\nnamespcae = \"x\"\n", "tally.toml")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_env_overrides_file_in_order() {
        let mut config = Config::default();
        config.database.url = Some("postgres://file".into());

        config.apply_env(|var| match var {
            "DATABASE_URL" => Some("postgres://generic".into()),
            _ => None,
        });
        assert_eq!(config.database.url.as_deref(), Some("postgres://generic"));

        config.apply_env(|var| match var {
            "TALLY_DATABASE_URL" => Some("postgres://tally".into()),
            "DATABASE_URL" => Some("postgres://generic".into()),
            _ => None,
        });
        assert_eq!(config.database.url.as_deref(), Some("postgres://tally"));

        config.apply_env(|_| Some(String::new()));
        assert_eq!(config.database.url.as_deref(), Some("postgres://tally"));
    }

    #[test]
    fn test_database_url_is_required() {
        let mut config = Config::default();
        assert!(matches!(
            config.database.require_url(),
            Err(ConfigError::MissingDatabaseUrl)
        ));

        config.apply_env(|var| (var == "TALLY_DATABASE_URL").then(|| "postgres://env".into()));
        assert_eq!(config.database.require_url().unwrap(), "postgres://env");
    }

    #[test]
    fn test_load_from_searches_parents() {
        let root = std::env::temp_dir().join(format!("tally-config-{}", std::process::id()));
        let nested = root.join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir_all(root.join(".config")).unwrap();
        std::fs::write(
            root.join(CONFIG_FILE),
            "[migrations]\nnamespace = \"billing\"\ndirectory = \"db/migrations\"\n",
        )
        .unwrap();

        let (config, path) = load_from(&nested).unwrap();
        assert_eq!(path, root.join(CONFIG_FILE));
        assert_eq!(config.migrations.namespace, "billing");
        assert!(config.migrations.directory.is_absolute());
        assert!(config.migrations.directory.ends_with("db/migrations"));

        std::fs::remove_dir_all(&root).unwrap();
    }
}
