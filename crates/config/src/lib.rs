//! Layered configuration for the `cachemeter` binary.
//!
//! Sources, later ones winning:
//!
//! 1. Built-in defaults ([`Config::default`]).
//! 2. A configuration file: either the one given explicitly, or any of
//!    `cachemeter.toml`, `cachemeter.yaml` and `cachemeter.json` found in the
//!    platform configuration directory.
//! 3. Environment variables prefixed with `CACHEMETER_`, where `__` separates
//!    nested keys (`CACHEMETER_RECORDS__BUSY_TIMEOUT_MS=3000`).

pub mod error;

use crate::error::{ErrorKind, Result};
use cachemeter_quota::ClientOptions;
use cachemeter_records::ConnectOptions;
use derive_more::Display;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub const ENV_PREFIX: &str = "CACHEMETER_";
pub const ENV_SEPARATOR: &str = "__";
const FILE_STEM: &str = "cachemeter";
const APPLICATION: &str = "cachemeter";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding `<persistence>/<origin>/cache` trees. Falls back to
    /// the platform data directory when unset.
    pub storage_root: Option<PathBuf>,
    pub records: RecordsConfig,
    pub usage: UsageConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordsConfig {
    pub busy_timeout_ms: u64,
    pub max_connections: u32,
}
impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 1500,
            max_connections: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageConfig {
    /// Count body blobs as database usage instead of file usage.
    pub body_usage_as_database_usage: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter, a level (`info`) or `EnvFilter` directives
    /// (`cachemeter_quota=debug,warn`); `RUST_LOG` takes precedence when set.
    pub level: String,
    pub format: LogFormat,
}
impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    #[display("text")]
    Text,
    #[display("json")]
    Json,
}

impl Config {
    /// Load and validate configuration from every source.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::from_figment(Self::figment(file)?)
    }

    /// The layered sources, without extracting them.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        match file {
            Some(path) => figment = merge_file(figment, path, true)?,
            None => {
                for path in default_files() {
                    figment = merge_file(figment, &path, false)?;
                }
            },
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split(ENV_SEPARATOR)))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = match figment.extract() {
            Ok(config) => config,
            Err(e) => {
                let kind = classify(&e);
                return Err(e).or_raise(|| kind);
            },
        };
        config.validate()?;
        tracing::debug!(config = ?config, "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.records.max_connections == 0 {
            exn::bail!(ErrorKind::Invalid("records.max_connections must be at least 1".to_string()));
        }
        if EnvFilter::try_new(&self.log.level).is_err() {
            exn::bail!(ErrorKind::Invalid(format!("invalid log filter {:?}", self.log.level)));
        }
        if let Some(root) = &self.storage_root
            && root.as_os_str().is_empty()
        {
            exn::bail!(ErrorKind::Invalid("storage_root must not be empty".to_string()));
        }
        Ok(())
    }

    /// The configured storage root, or the platform data directory.
    pub fn storage_root(&self) -> Result<PathBuf> {
        if let Some(root) = &self.storage_root {
            return Ok(root.clone());
        }
        directories::ProjectDirs::from("", "", APPLICATION)
            .map(|dirs| dirs.data_dir().join("storage"))
            .ok_or_else(|| exn::Exn::from(ErrorKind::NoStorageRoot))
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            busy_timeout: Duration::from_millis(self.records.busy_timeout_ms),
            max_connections: self.records.max_connections,
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            records: self.connect_options(),
            body_usage_as_database_usage: self.usage.body_usage_as_database_usage,
        }
    }
}

fn default_files() -> Vec<PathBuf> {
    let Some(dirs) = directories::ProjectDirs::from("", "", APPLICATION) else {
        tracing::debug!("No platform configuration directory");
        return Vec::new();
    };
    ["toml", "yaml", "json"]
        .iter()
        .map(|extension| dirs.config_dir().join(format!("{FILE_STEM}.{extension}")))
        .collect()
}

fn merge_file(figment: Figment, path: &Path, required: bool) -> Result<Figment> {
    let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
    if !matches!(extension.as_deref(), Some("toml" | "yaml" | "yml" | "json")) {
        exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf()));
    }
    // Figment reads a missing file as an empty one.
    if required && !path.is_file() {
        exn::bail!(ErrorKind::Missing(path.to_path_buf()));
    }
    let figment = match extension.as_deref() {
        Some("toml") => figment.merge(Toml::file(path)),
        Some("json") => figment.merge(Json::file(path)),
        _ => figment.merge(Yaml::file(path)),
    };
    Ok(figment)
}

/// Values that parsed but don't fit their field are the user's to fix;
/// everything else is a problem reading the sources.
fn classify(e: &figment::Error) -> ErrorKind {
    use figment::error::Kind;
    match &e.kind {
        Kind::InvalidType(..) | Kind::InvalidValue(..) | Kind::InvalidLength(..) | Kind::UnknownVariant(..) => {
            ErrorKind::Invalid(e.to_string())
        },
        _ => ErrorKind::Load,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.records.busy_timeout_ms, 1500);
        assert_eq!(config.records.max_connections, 1);
        assert!(!config.usage.body_usage_as_database_usage);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, LogFormat::Text);
        assert_eq!(config.connect_options(), ConnectOptions::default());
        config.validate().unwrap();
    }

    #[test]
    fn test_explicit_toml_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "custom.toml",
                r#"
                storage_root = "/var/lib/cachemeter"

                [records]
                busy_timeout_ms = 3000

                [log]
                format = "json"
                "#,
            )?;
            let config = Config::load(Some(Path::new("custom.toml"))).unwrap();
            assert_eq!(config.storage_root, Some(PathBuf::from("/var/lib/cachemeter")));
            assert_eq!(config.records.busy_timeout_ms, 3000);
            assert_eq!(config.records.max_connections, 1);
            assert_eq!(config.log.format, LogFormat::Json);
            assert_eq!(config.connect_options().busy_timeout, Duration::from_secs(3));
            Ok(())
        });
    }

    #[test]
    fn test_explicit_yaml_file() {
        Jail::expect_with(|jail| {
            jail.create_file("cachemeter.yml", "usage:\n  body_usage_as_database_usage: true\n")?;
            let config = Config::load(Some(Path::new("cachemeter.yml"))).unwrap();
            assert!(config.usage.body_usage_as_database_usage);
            assert!(config.client_options().body_usage_as_database_usage);
            Ok(())
        });
    }

    #[test]
    fn test_environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("cachemeter.json", r#"{"records": {"max_connections": 2}, "log": {"level": "warn"}}"#)?;
            jail.set_env("CACHEMETER_RECORDS__MAX_CONNECTIONS", "4");
            jail.set_env("CACHEMETER_STORAGE_ROOT", "/srv/caches");
            let config = Config::load(Some(Path::new("cachemeter.json"))).unwrap();
            assert_eq!(config.records.max_connections, 4);
            assert_eq!(config.log.level, "warn");
            assert_eq!(config.storage_root().unwrap(), PathBuf::from("/srv/caches"));
            Ok(())
        });
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_platform_config_directory() {
        Jail::expect_with(|jail| {
            let config_home = jail.directory().join("config");
            std::fs::create_dir_all(config_home.join(APPLICATION)).map_err(|e| e.to_string())?;
            jail.set_env("XDG_CONFIG_HOME", config_home.display());
            jail.create_file("config/cachemeter/cachemeter.toml", "[log]\nlevel = \"debug\"\n")?;
            let config = Config::load(None).unwrap();
            assert_eq!(config.log.level, "debug");
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file() {
        Jail::expect_with(|_| {
            let err = Config::load(Some(Path::new("missing.toml"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Missing(path) if path == Path::new("missing.toml")));

            // A directory is not a configuration file either.
            std::fs::create_dir("settings.json").map_err(|e| e.to_string())?;
            let err = Config::load(Some(Path::new("settings.json"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Missing(_)));
            Ok(())
        });
    }

    #[rstest]
    #[case::ini("cachemeter.ini")]
    #[case::none("cachemeter")]
    fn test_unsupported_file_format(#[case] name: &str) {
        let err = Config::figment(Some(Path::new(name))).unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnsupportedFormat(_)));
    }

    #[test]
    fn test_unknown_log_format() {
        Jail::expect_with(|jail| {
            jail.set_env("CACHEMETER_LOG__FORMAT", "xml");
            jail.create_file("present.toml", "")?;
            let err = Config::load(Some(Path::new("present.toml"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Invalid(_)));
            Ok(())
        });
    }

    #[rstest]
    #[case::level("debug")]
    #[case::directives("cachemeter_quota=debug,warn")]
    fn test_log_filter_directives_are_valid(#[case] level: &str) {
        let mut config = Config::default();
        config.log.level = level.to_string();
        config.validate().unwrap();
    }

    #[rstest]
    #[case::no_connections(|c: &mut Config| c.records.max_connections = 0)]
    #[case::bad_level(|c: &mut Config| c.log.level = "cachemeter=loud".to_string())]
    #[case::empty_root(|c: &mut Config| c.storage_root = Some(PathBuf::new()))]
    fn test_validation(#[case] change: fn(&mut Config)) {
        let mut config = Config::default();
        change(&mut config);
        let err = config.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }
}
