//! Remote endpoint and credential resolution.
//!
//! Values come from the platform defaults, then an optional JSON config file,
//! then `STOCKSYNC_*` environment variables; later sources win.

use std::env;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

pub const DEFAULT_DATABASE: &str = "offlinefirstdb";
pub const DEFAULT_USERNAME: &str = "admin";
pub const DEFAULT_PASSWORD: &str = "admin";

const ENV_REMOTE_URL: &str = "STOCKSYNC_REMOTE_URL";
const ENV_DATABASE: &str = "STOCKSYNC_DATABASE";
const ENV_USERNAME: &str = "STOCKSYNC_USERNAME";
const ENV_PASSWORD: &str = "STOCKSYNC_PASSWORD";
const ENV_PLATFORM: &str = "STOCKSYNC_PLATFORM";
const ENV_REQUEST_TIMEOUT_SECS: &str = "STOCKSYNC_REQUEST_TIMEOUT_SECS";

/// Runtime platform class; decides the default remote URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
    Other,
}

impl Platform {
    /// Platform of the compile target.
    pub const fn current() -> Self {
        if cfg!(target_os = "android") {
            Self::Android
        } else if cfg!(target_os = "ios") {
            Self::Ios
        } else {
            Self::Other
        }
    }

    /// The Android emulator reaches the host loopback through `10.0.2.2`.
    pub const fn default_url(self) -> &'static str {
        match self {
            Self::Android => "http://10.0.2.2:5984",
            Self::Ios | Self::Other => "http://localhost:5984",
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Android => "android",
            Self::Ios => "ios",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "android" => Ok(Self::Android),
            "ios" => Ok(Self::Ios),
            "other" | "desktop" => Ok(Self::Other),
            other => Err(Error::Config(format!(
                "unknown platform '{other}' (expected android, ios or other)"
            ))),
        }
    }
}

/// Connection settings for the remote document database.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Server base URL, e.g. `http://localhost:5984`
    pub url: String,
    /// Prefix of the per-collection database names
    pub database: String,
    pub username: String,
    pub password: String,
    /// Per-request timeout; `None` leaves the transport default
    pub request_timeout_secs: Option<u64>,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RemoteConfig")
            .field("url", &self.url)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl RemoteConfig {
    /// Built-in defaults for `platform`.
    pub fn for_platform(platform: Platform) -> Self {
        Self {
            url: platform.default_url().to_string(),
            database: DEFAULT_DATABASE.to_string(),
            username: DEFAULT_USERNAME.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            request_timeout_secs: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !is_http_url(&self.url) {
            return Err(Error::Config(format!(
                "remote URL must include http:// or https://, got '{}'",
                self.url
            )));
        }
        if self.database.trim().is_empty() {
            return Err(Error::Config("database name must not be empty".into()));
        }
        if self.username.trim().is_empty() {
            return Err(Error::Config("username must not be empty".into()));
        }
        if self.request_timeout_secs == Some(0) {
            return Err(Error::Config("request timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Optional values layered over the platform defaults.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl std::fmt::Debug for ConfigOverrides {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ConfigOverrides")
            .field("platform", &self.platform)
            .field("url", &self.url)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl ConfigOverrides {
    /// Read overrides from a JSON file.
    ///
    /// A missing, unreadable or malformed file yields no overrides; the
    /// problem is logged.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Self>(&content) {
                Ok(overrides) => overrides.normalized(),
                Err(error) => {
                    tracing::warn!("Failed to parse config at {}: {}", path.display(), error);
                    Self::default()
                }
            },
            Err(error) => {
                tracing::warn!("Failed to read config at {}: {}", path.display(), error);
                Self::default()
            }
        }
    }

    /// Write overrides as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.clone().normalized())?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overrides from `STOCKSYNC_*` variables, read through `lookup`.
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let read = |key: &str| normalize_text_option(lookup(key));

        let platform = read(ENV_PLATFORM)
            .map(|raw| raw.parse::<Platform>())
            .transpose()?;
        let request_timeout_secs = read(ENV_REQUEST_TIMEOUT_SECS)
            .map(|raw| {
                raw.parse::<u64>().map_err(|_| {
                    Error::Config(format!(
                        "{ENV_REQUEST_TIMEOUT_SECS} must be a whole number of seconds, got '{raw}'"
                    ))
                })
            })
            .transpose()?;

        Ok(Self {
            platform,
            url: read(ENV_REMOTE_URL),
            database: read(ENV_DATABASE),
            username: read(ENV_USERNAME),
            password: read(ENV_PASSWORD),
            request_timeout_secs,
        })
    }

    /// Combine with `higher`, whose values win.
    #[must_use]
    pub fn merge(self, higher: Self) -> Self {
        Self {
            platform: higher.platform.or(self.platform),
            url: higher.url.or(self.url),
            database: higher.database.or(self.database),
            username: higher.username.or(self.username),
            password: higher.password.or(self.password),
            request_timeout_secs: higher.request_timeout_secs.or(self.request_timeout_secs),
        }
    }

    fn normalized(self) -> Self {
        Self {
            platform: self.platform,
            url: normalize_text_option(self.url),
            database: normalize_text_option(self.database),
            username: normalize_text_option(self.username),
            password: self.password.filter(|password| !password.is_empty()),
            request_timeout_secs: self.request_timeout_secs,
        }
    }

    fn apply(self, mut config: RemoteConfig) -> RemoteConfig {
        if let Some(url) = self.url {
            config.url = url.trim_end_matches('/').to_string();
        }
        if let Some(database) = self.database {
            config.database = database;
        }
        if let Some(username) = self.username {
            config.username = username;
        }
        if let Some(password) = self.password {
            config.password = password;
        }
        if self.request_timeout_secs.is_some() {
            config.request_timeout_secs = self.request_timeout_secs;
        }
        config
    }
}

/// Resolve the remote configuration from the process environment.
///
/// `platform` forces the platform class; otherwise it comes from the
/// environment, then the config file, then the compile target.
pub fn resolve_remote_config(
    config_file: Option<&Path>,
    platform: Option<Platform>,
) -> Result<RemoteConfig> {
    resolve_remote_config_with(config_file, platform, |key| env::var(key).ok())
}

pub fn resolve_remote_config_with(
    config_file: Option<&Path>,
    platform: Option<Platform>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<RemoteConfig> {
    let file = config_file.map(ConfigOverrides::load).unwrap_or_default();
    let overrides = file.merge(ConfigOverrides::from_env_with(lookup)?);

    let platform = platform
        .or(overrides.platform)
        .unwrap_or_else(Platform::current);
    let config = overrides.apply(RemoteConfig::for_platform(platform));
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn platform_defaults() {
        assert_eq!(
            RemoteConfig::for_platform(Platform::Android).url,
            "http://10.0.2.2:5984"
        );
        assert_eq!(
            RemoteConfig::for_platform(Platform::Ios).url,
            "http://localhost:5984"
        );
        let other = RemoteConfig::for_platform(Platform::Other);
        assert_eq!(other.url, "http://localhost:5984");
        assert_eq!(other.database, "offlinefirstdb");
        assert_eq!(other.username, "admin");
        assert_eq!(other.request_timeout_secs, None);
    }

    #[test]
    fn platform_parses_names() {
        assert_eq!("Android".parse::<Platform>().unwrap(), Platform::Android);
        assert_eq!(" ios ".parse::<Platform>().unwrap(), Platform::Ios);
        assert!("windows-phone".parse::<Platform>().is_err());
    }

    #[test]
    fn debug_redacts_password() {
        let mut config = RemoteConfig::for_platform(Platform::Other);
        config.password = "hunter2".to_string();
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));

        let overrides = ConfigOverrides {
            password: Some("hunter2".to_string()),
            ..Default::default()
        };
        assert!(!format!("{overrides:?}").contains("hunter2"));
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = resolve_remote_config_with(
            None,
            None,
            env_from(&[
                ("STOCKSYNC_PLATFORM", "android"),
                ("STOCKSYNC_DATABASE", "shopdb"),
                ("STOCKSYNC_PASSWORD", "s3cret"),
                ("STOCKSYNC_REQUEST_TIMEOUT_SECS", "15"),
            ]),
        )
        .unwrap();

        assert_eq!(config.url, "http://10.0.2.2:5984");
        assert_eq!(config.database, "shopdb");
        assert_eq!(config.username, "admin");
        assert_eq!(config.password, "s3cret");
        assert_eq!(config.request_timeout_secs, Some(15));
    }

    #[test]
    fn explicit_platform_wins_over_environment() {
        let config = resolve_remote_config_with(
            None,
            Some(Platform::Ios),
            env_from(&[("STOCKSYNC_PLATFORM", "android")]),
        )
        .unwrap();
        assert_eq!(config.url, "http://localhost:5984");
    }

    #[test]
    fn file_is_layered_under_environment() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"url": "https://couch.example.com/", "database": "filedb", "username": "clerk"}"#,
        )
        .unwrap();

        let config = resolve_remote_config_with(
            Some(&path),
            None,
            env_from(&[("STOCKSYNC_DATABASE", "envdb")]),
        )
        .unwrap();
        assert_eq!(config.url, "https://couch.example.com");
        assert_eq!(config.database, "envdb");
        assert_eq!(config.username, "clerk");
    }

    #[test]
    fn malformed_file_is_ignored() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"url": 42, "colour": "blue"}"#).unwrap();

        assert_eq!(ConfigOverrides::load(&path), ConfigOverrides::default());
        assert_eq!(
            ConfigOverrides::load(&tmp.path().join("missing.json")),
            ConfigOverrides::default()
        );
    }

    #[test]
    fn saved_overrides_load_back() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.json");
        let overrides = ConfigOverrides {
            url: Some(" http://couch.local:5984 ".to_string()),
            request_timeout_secs: Some(30),
            ..Default::default()
        };
        overrides.save(&path).unwrap();

        let loaded = ConfigOverrides::load(&path);
        assert_eq!(loaded.url.as_deref(), Some("http://couch.local:5984"));
        assert_eq!(loaded.request_timeout_secs, Some(30));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let bad_url =
            resolve_remote_config_with(None, None, env_from(&[("STOCKSYNC_REMOTE_URL", "couch")]));
        assert!(matches!(bad_url, Err(Error::Config(_))));

        let bad_timeout = resolve_remote_config_with(
            None,
            None,
            env_from(&[("STOCKSYNC_REQUEST_TIMEOUT_SECS", "soon")]),
        );
        assert!(matches!(bad_timeout, Err(Error::Config(_))));

        let bad_platform =
            resolve_remote_config_with(None, None, env_from(&[("STOCKSYNC_PLATFORM", "palm")]));
        assert!(bad_platform.is_err());
    }
}
