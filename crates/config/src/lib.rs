//! Layered configuration for lss.
//!
//! Values are resolved from, in increasing order of precedence:
//! 1. built-in defaults,
//! 2. a TOML file (the platform config directory's `config.toml`, or an
//!    explicitly given path),
//! 3. environment variables prefixed with `LSS_` (e.g. `LSS_BASE_URL`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const ENV_PREFIX: &str = "LSS_";
const DATABASE_FILE: &str = "shared-api-storage.sqlite3";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file the API mirror is kept in.
    pub database: PathBuf,
    /// Origin of the game API, e.g. `https://www.leitstellenspiel.de`.
    pub base_url: String,
    /// Sent as `X-SCRIPT-NAME` with every request.
    pub script_name: String,
    /// Sent as `X-SCRIPT-VERSION` with every request.
    pub script_version: String,
    /// Seconds frequently changing resources stay fresh.
    pub fast_threshold_secs: u64,
    /// Seconds rarely changing reference data stays fresh.
    pub slow_threshold_secs: u64,
    pub vehicle_base_limit: u64,
    pub vehicle_divisor: u64,
    pub max_connections: u32,
    /// Schema version to open the database at. Defaults to the newest.
    pub schema_version: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: project_dirs()
                .map(|dirs| dirs.data_dir().join(DATABASE_FILE))
                .unwrap_or_else(|| PathBuf::from(DATABASE_FILE)),
            base_url: "https://www.leitstellenspiel.de".to_string(),
            script_name: "lss".to_string(),
            script_version: env!("CARGO_PKG_VERSION").to_string(),
            fast_threshold_secs: 5 * 60,
            slow_threshold_secs: 60 * 60,
            vehicle_base_limit: 10_000,
            vehicle_divisor: 50_000,
            max_connections: 5,
            schema_version: None,
        }
    }
}

impl Config {
    /// Load from defaults, the config file and the environment.
    ///
    /// An explicitly given `file` must exist; the default config file is
    /// optional.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        if let Some(path) = file
            && !path.is_file()
        {
            exn::bail!(ErrorKind::Invalid("configuration file does not exist"));
        }
        let file = file.map(Path::to_path_buf).or_else(default_file);
        debug!(file = ?file, "loading configuration");
        Self::from_figment(Self::figment(file.as_deref()).merge(Env::prefixed(ENV_PREFIX)))
    }

    /// Defaults merged with `file`, if any. Exposed so callers (and tests)
    /// can layer further providers on top.
    pub fn figment(file: Option<&Path>) -> Figment {
        let figment = Figment::from(Serialized::defaults(Config::default()));
        match file {
            Some(path) => figment.merge(Toml::file(path)),
            None => figment,
        }
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            exn::bail!(ErrorKind::Invalid("base_url must be an http(s) URL"));
        }
        if self.vehicle_base_limit == 0 || self.vehicle_divisor == 0 {
            exn::bail!(ErrorKind::Invalid("vehicle page sizing must be positive"));
        }
        if self.max_connections == 0 {
            exn::bail!(ErrorKind::Invalid("max_connections must be positive"));
        }
        Ok(())
    }

    pub fn fast_threshold(&self) -> Duration {
        Duration::from_secs(self.fast_threshold_secs)
    }

    pub fn slow_threshold(&self) -> Duration {
        Duration::from_secs(self.slow_threshold_secs)
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("de", "lss", "lss")
}

/// `config.toml` in the platform's config directory.
pub fn default_file() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn toml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::from_figment(Config::figment(None)).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.fast_threshold(), Duration::from_secs(300));
        assert_eq!(config.slow_threshold(), Duration::from_secs(3600));
        assert!(config.database.ends_with(DATABASE_FILE));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = toml(
            r#"
            base_url = "http://localhost:8080"
            fast_threshold_secs = 60
            schema_version = 3
            "#,
        );
        let config = Config::from_figment(Config::figment(Some(file.path()))).unwrap();
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.fast_threshold_secs, 60);
        assert_eq!(config.schema_version, Some(3));
        assert_eq!(config.slow_threshold_secs, 3600);
    }

    #[test]
    fn test_later_providers_win() {
        let file = toml(r#"script_name = "from file""#);
        let figment =
            Config::figment(Some(file.path())).merge(Serialized::default("script_name", "from environment"));
        assert_eq!(Config::from_figment(figment).unwrap().script_name, "from environment");
    }

    #[rstest]
    #[case(r#"base_url = "ftp://example.com""#)]
    #[case("vehicle_divisor = 0")]
    #[case("vehicle_base_limit = 0")]
    #[case("max_connections = 0")]
    fn test_invalid_values(#[case] content: &str) {
        let file = toml(content);
        let err = Config::from_figment(Config::figment(Some(file.path()))).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }

    #[test]
    fn test_malformed_file() {
        let file = toml("max_connections = \"many\"");
        let err = Config::from_figment(Config::figment(Some(file.path()))).unwrap_err();
        assert_eq!(*err, ErrorKind::Load);
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = Config::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }
}
