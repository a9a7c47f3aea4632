use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{GoalListError, Result};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub sqlite_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Server-side lifetime of a session opened without "remember me".
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: i64,
    /// Lifetime of a remembered session; two weeks unless configured.
    #[serde(default = "default_remember_ttl")]
    pub remember_ttl_secs: i64,
    #[serde(default)]
    pub cookie_secure: bool,
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProfileImageConfig {
    pub template_path: PathBuf,
    pub font_path: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub session: SessionConfig,
    pub profile_image: ProfileImageConfig,
}

fn default_cookie_name() -> String {
    "goallist_session".to_string()
}

fn default_session_ttl() -> i64 {
    86_400
}

fn default_remember_ttl() -> i64 {
    1_209_600
}

fn default_purge_interval() -> u64 {
    3_600
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            ttl_secs: default_session_ttl(),
            remember_ttl_secs: default_remember_ttl(),
            cookie_secure: false,
            purge_interval_secs: default_purge_interval(),
        }
    }
}

impl Config {
    pub fn convention_defaults(db_path: &str) -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            database: DatabaseConfig {
                sqlite_path: db_path.to_string(),
            },
            session: SessionConfig::default(),
            profile_image: ProfileImageConfig {
                template_path: crate::runtime_paths::default_template_path(),
                font_path: crate::runtime_paths::default_font_path(),
                output_dir: crate::runtime_paths::default_output_dir(),
            },
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            GoalListError::Config(format!("cannot read {}: {e}", path.to_string_lossy()))
        })?;
        let config: Config =
            serde_json::from_str(&raw).map_err(|e| GoalListError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when given, otherwise the convention defaults, then applies
    /// `GOALLIST_*` environment overrides. An explicit `db_path` wins over both.
    pub fn load(path: Option<&Path>, db_path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::convention_defaults(&crate::runtime_paths::default_db_path()),
        }
        .apply_env_overrides();
        if let Some(db_path) = db_path {
            config.database.sqlite_path = db_path.to_string();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(mut self) -> Self {
        if let Some(value) = env_value("GOALLIST_DB") {
            self.database.sqlite_path = value;
        }
        if let Some(value) = env_value("GOALLIST_TEMPLATE") {
            self.profile_image.template_path = PathBuf::from(value);
        }
        if let Some(value) = env_value("GOALLIST_FONT") {
            self.profile_image.font_path = PathBuf::from(value);
        }
        if let Some(value) = env_value("GOALLIST_OUTPUT_DIR") {
            self.profile_image.output_dir = PathBuf::from(value);
        }
        if let Some(value) = env_value("GOALLIST_COOKIE_SECURE") {
            self.session.cookie_secure = matches!(value.as_str(), "1" | "true" | "TRUE");
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.sqlite_path.trim().is_empty() {
            return Err(GoalListError::Config(
                "database.sqlite_path must not be empty".to_string(),
            ));
        }
        if self.session.cookie_name.trim().is_empty() {
            return Err(GoalListError::Config(
                "session.cookie_name must not be empty".to_string(),
            ));
        }
        if self.session.ttl_secs <= 0 || self.session.remember_ttl_secs <= 0 {
            return Err(GoalListError::Config(
                "session lifetimes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convention_defaults_remember_sessions_for_two_weeks() {
        let config = Config::convention_defaults("/tmp/goallist.db");
        assert_eq!(config.database.sqlite_path, "/tmp/goallist.db");
        assert_eq!(config.session.remember_ttl_secs, 1_209_600);
        assert_eq!(config.session.cookie_name, "goallist_session");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn from_file_fills_session_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "server": {"host": "0.0.0.0", "port": 9000},
                "database": {"sqlite_path": "app.db"},
                "profile_image": {
                    "template_path": "static/test.png",
                    "font_path": "fonts/ud.ttc",
                    "output_dir": "static/out"
                }
            })
            .to_string(),
        )
        .expect("write config");

        let config = Config::from_file(&path).expect("config");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.session.ttl_secs, 86_400);
        assert_eq!(
            config.profile_image.font_path,
            PathBuf::from("fonts/ud.ttc")
        );
    }

    #[test]
    fn explicit_db_path_overrides_config_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.json");
        let config = Config::convention_defaults("app.db");
        std::fs::write(&path, serde_json::to_string(&config).expect("encode")).expect("write");

        let from_file = Config::load(Some(&path), None).expect("load");
        let overridden = Config::load(Some(&path), Some("other.db")).expect("load");
        if std::env::var_os("GOALLIST_DB").is_none() {
            assert_eq!(from_file.database.sqlite_path, "app.db");
        }
        assert_eq!(overridden.database.sqlite_path, "other.db");
        assert_eq!(overridden.server.port, from_file.server.port);
    }

    #[test]
    fn empty_database_path_is_rejected() {
        let mut config = Config::convention_defaults("x.db");
        config.database.sqlite_path = "  ".to_string();
        assert!(matches!(config.validate(), Err(GoalListError::Config(_))));
    }
}
