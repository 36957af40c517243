use presence_core::{DebounceConfig, MissPolicy, SessionConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_THRESHOLD: f32 = presence_core::DEFAULT_MATCH_THRESHOLD;
const DEFAULT_REQUIRED_HITS: u32 = presence_core::debounce::DEFAULT_REQUIRED_HITS;
const DEFAULT_COOLDOWN_MS: u64 = 10_000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Settings as written in the optional TOML file. Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    roster_path: Option<PathBuf>,
    similarity_threshold: Option<f32>,
    required_hits: Option<u32>,
    cooldown_ms: Option<u64>,
    miss_policy: Option<MissPolicy>,
    auto_mark: Option<bool>,
}

/// Runtime configuration: TOML file, then `PRESENCE_*` environment
/// overrides, then built-in defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory holding daily files, ledgers and enrolled vectors.
    pub data_dir: PathBuf,
    /// JSON roster file (default: `<data_dir>/roster.json`).
    pub roster_path: PathBuf,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    /// Consecutive matching frames before attendance is marked.
    pub required_hits: u32,
    /// Cooldown after a mark during which the identity is ignored.
    pub cooldown_ms: u64,
    pub miss_policy: MissPolicy,
    /// Mark automatically on confirmation (off: report matches only).
    pub auto_mark: bool,
}

impl Config {
    /// Load from `path`, or from `$PRESENCE_CONFIG` when no path is given.
    /// No file at all is fine; every setting has a default.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("PRESENCE_CONFIG").map(PathBuf::from));
        let file = match path {
            Some(path) => read_file(&path)?,
            None => FileConfig::default(),
        };
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    fn resolve(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let data_dir = env("PRESENCE_DATA_DIR")
            .map(PathBuf::from)
            .or(file.data_dir)
            .unwrap_or_else(|| default_data_dir(&env));

        let roster_path = env("PRESENCE_ROSTER")
            .map(PathBuf::from)
            .or(file.roster_path)
            .unwrap_or_else(|| data_dir.join("roster.json"));

        let miss_policy: MissPolicy = match env("PRESENCE_MISS_POLICY") {
            Some(v) => v.parse().map_err(|reason| ConfigError::Invalid {
                key: "PRESENCE_MISS_POLICY",
                reason,
            })?,
            None => file.miss_policy.unwrap_or_default(),
        };

        let config = Self {
            similarity_threshold: env_f32(
                &env,
                "PRESENCE_SIMILARITY_THRESHOLD",
                file.similarity_threshold.unwrap_or(DEFAULT_THRESHOLD),
            ),
            required_hits: env_u32(
                &env,
                "PRESENCE_REQUIRED_HITS",
                file.required_hits.unwrap_or(DEFAULT_REQUIRED_HITS),
            ),
            cooldown_ms: env_u64(
                &env,
                "PRESENCE_COOLDOWN_MS",
                file.cooldown_ms.unwrap_or(DEFAULT_COOLDOWN_MS),
            ),
            auto_mark: env("PRESENCE_AUTO_MARK")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .or(file.auto_mark)
                .unwrap_or(true),
            data_dir,
            roster_path,
            miss_policy,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.required_hits == 0 {
            return Err(ConfigError::Invalid {
                key: "required_hits",
                reason: "must be at least 1".into(),
            });
        }
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::Invalid {
                key: "similarity_threshold",
                reason: format!("{} is outside [-1, 1]", self.similarity_threshold),
            });
        }
        if i64::try_from(self.cooldown_ms).is_err() {
            return Err(ConfigError::Invalid {
                key: "cooldown_ms",
                reason: "too large".into(),
            });
        }
        Ok(())
    }

    /// Matching and debounce settings for a recognition session.
    pub fn session_config(&self) -> SessionConfig {
        let cooldown_ms = i64::try_from(self.cooldown_ms).unwrap_or(i64::MAX);
        SessionConfig {
            similarity_threshold: self.similarity_threshold,
            debounce: DebounceConfig {
                required_hits: self.required_hits,
                cooldown: chrono::Duration::milliseconds(cooldown_ms),
                miss_policy: self.miss_policy,
            },
            auto_mark: self.auto_mark,
        }
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn default_data_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("presence")
}

fn env_f32(env: &impl Fn(&str) -> Option<String>, key: &str, default: f32) -> f32 {
    env_parse(env, key).unwrap_or(default)
}

fn env_u32(env: &impl Fn(&str) -> Option<String>, key: &str, default: u32) -> u32 {
    env_parse(env, key).unwrap_or(default)
}

fn env_u64(env: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> u64 {
    env_parse(env, key).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config =
            Config::resolve(FileConfig::default(), env_of(&[("HOME", "/home/ana")])).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/home/ana/.local/share/presence"));
        assert_eq!(
            config.roster_path,
            PathBuf::from("/home/ana/.local/share/presence/roster.json")
        );
        assert_eq!(config.similarity_threshold, 0.75);
        assert_eq!(config.required_hits, 3);
        assert_eq!(config.cooldown_ms, 10_000);
        assert_eq!(config.miss_policy, MissPolicy::Keep);
        assert!(config.auto_mark);
    }

    #[test]
    fn test_xdg_data_home() {
        let config =
            Config::resolve(FileConfig::default(), env_of(&[("XDG_DATA_HOME", "/data")])).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/data/presence"));
    }

    #[test]
    fn test_file_then_env_precedence() {
        let file: FileConfig = toml::from_str(
            r#"
            data_dir = "/srv/presence"
            similarity_threshold = 0.6
            required_hits = 5
            miss_policy = "reset-on-miss"
            auto_mark = false
            "#,
        )
        .unwrap();
        let config = Config::resolve(
            file,
            env_of(&[
                ("PRESENCE_REQUIRED_HITS", "2"),
                ("PRESENCE_COOLDOWN_MS", "500"),
            ]),
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/srv/presence"));
        assert_eq!(config.roster_path, PathBuf::from("/srv/presence/roster.json"));
        assert_eq!(config.similarity_threshold, 0.6);
        assert_eq!(config.required_hits, 2);
        assert_eq!(config.cooldown_ms, 500);
        assert_eq!(config.miss_policy, MissPolicy::ResetOnMiss);
        assert!(!config.auto_mark);
    }

    #[test]
    fn test_unparseable_number_falls_back() {
        let config = Config::resolve(
            FileConfig::default(),
            env_of(&[("HOME", "/h"), ("PRESENCE_SIMILARITY_THRESHOLD", "high")]),
        )
        .unwrap();
        assert_eq!(config.similarity_threshold, 0.75);
    }

    #[test]
    fn test_invalid_values_are_errors() {
        let err = Config::resolve(
            FileConfig::default(),
            env_of(&[("HOME", "/h"), ("PRESENCE_MISS_POLICY", "sometimes")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PRESENCE_MISS_POLICY", .. }));

        let err = Config::resolve(
            FileConfig::default(),
            env_of(&[("HOME", "/h"), ("PRESENCE_REQUIRED_HITS", "0")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "required_hits", .. }));
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("presence.toml");
        std::fs::write(&path, "threshold = 0.5\n").unwrap();
        assert!(matches!(read_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_session_config() {
        let config = Config::resolve(
            FileConfig::default(),
            env_of(&[("HOME", "/h"), ("PRESENCE_AUTO_MARK", "0")]),
        )
        .unwrap();
        let session = config.session_config();
        assert_eq!(session.debounce.required_hits, 3);
        assert_eq!(session.debounce.cooldown, chrono::Duration::milliseconds(10_000));
        assert!(!session.auto_mark);
    }
}
