use rollcall_ledger::{KeyScheme, DEFAULT_LATE_AFTER_MINUTES};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Path to the SQLite ledger.
    pub db_path: PathBuf,
    /// Minimum blended similarity for a positive match.
    pub similarity_threshold: f32,
    /// Attendance key scheme for a new ledger; must match an existing one.
    pub key_scheme: KeyScheme,
    /// Minutes after session start that still count as on time.
    pub late_after_minutes: i64,
    /// Reuse the loaded gallery until an enrollment changes it.
    pub gallery_cache: bool,
}

/// Optional overrides read from the TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    similarity_threshold: Option<f32>,
    key_scheme: Option<KeyScheme>,
    late_after_minutes: Option<i64>,
    gallery_cache: Option<bool>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        Self {
            db_path: data_dir.join("rollcall.db"),
            similarity_threshold: 0.7,
            key_scheme: KeyScheme::GroupDate,
            late_after_minutes: DEFAULT_LATE_AFTER_MINUTES,
            gallery_cache: true,
        }
    }
}

impl Config {
    /// Defaults, then the TOML file named by `ROLLCALL_CONFIG` (if set), then
    /// `ROLLCALL_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var_os("ROLLCALL_CONFIG") {
            Some(path) => Some(read_file(Path::new(&path))?),
            None => None,
        };
        Ok(Self::from_sources(file, |key| std::env::var(key).ok()))
    }

    fn from_sources(file: Option<FileConfig>, env: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(file) = file {
            if let Some(v) = file.db_path {
                config.db_path = v;
            }
            if let Some(v) = file.similarity_threshold {
                config.similarity_threshold = v;
            }
            if let Some(v) = file.key_scheme {
                config.key_scheme = v;
            }
            if let Some(v) = file.late_after_minutes {
                config.late_after_minutes = v;
            }
            if let Some(v) = file.gallery_cache {
                config.gallery_cache = v;
            }
        }

        if let Some(v) = env("ROLLCALL_DB_PATH") {
            config.db_path = PathBuf::from(v);
        }
        config.similarity_threshold = env_parse(&env, "ROLLCALL_SIMILARITY_THRESHOLD", config.similarity_threshold);
        config.key_scheme = env_parse(&env, "ROLLCALL_KEY_SCHEME", config.key_scheme);
        config.late_after_minutes = env_parse(&env, "ROLLCALL_LATE_AFTER_MINUTES", config.late_after_minutes);
        if let Some(v) = env("ROLLCALL_GALLERY_CACHE") {
            config.gallery_cache = v != "0";
        }

        config
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse an environment value, keeping `default` when unset or malformed.
fn env_parse<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match env(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring malformed environment value");
                default
            }
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(None, env_of(&[]));
        assert_eq!(config.similarity_threshold, 0.7);
        assert_eq!(config.key_scheme, KeyScheme::GroupDate);
        assert_eq!(config.late_after_minutes, 15);
        assert!(config.gallery_cache);
        assert!(config.db_path.ends_with("rollcall/rollcall.db"));
    }

    #[test]
    fn test_file_then_env_precedence() {
        let file: FileConfig = toml::from_str(
            r#"
            db_path = "/srv/rollcall/ledger.db"
            similarity_threshold = 0.8
            key_scheme = "session"
            gallery_cache = false
            "#,
        )
        .unwrap();
        let config = Config::from_sources(
            Some(file),
            env_of(&[("ROLLCALL_SIMILARITY_THRESHOLD", "0.65"), ("ROLLCALL_LATE_AFTER_MINUTES", "10")]),
        );
        assert_eq!(config.db_path, PathBuf::from("/srv/rollcall/ledger.db"));
        assert_eq!(config.similarity_threshold, 0.65);
        assert_eq!(config.key_scheme, KeyScheme::Session);
        assert_eq!(config.late_after_minutes, 10);
        assert!(!config.gallery_cache);
    }

    #[test]
    fn test_malformed_env_keeps_previous() {
        let config = Config::from_sources(
            None,
            env_of(&[
                ("ROLLCALL_SIMILARITY_THRESHOLD", "high"),
                ("ROLLCALL_KEY_SCHEME", "weekly"),
                ("ROLLCALL_GALLERY_CACHE", "0"),
                ("ROLLCALL_DB_PATH", "/tmp/x.db"),
            ]),
        );
        assert_eq!(config.similarity_threshold, 0.7);
        assert_eq!(config.key_scheme, KeyScheme::GroupDate);
        assert!(!config.gallery_cache);
        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        assert!(toml::from_str::<FileConfig>("threshold = 0.5").is_err());
    }
}
