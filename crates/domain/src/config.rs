//! Engine configuration: data-dir layout, listener address, collaborator
//! endpoints. Values resolve in three layers: built-in defaults, an
//! optional `quoroom.toml` in the data dir, then environment variables.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variables recognized by the engine.
pub const ENV_DB_PATH: &str = "QUOROOM_DB_PATH";
pub const ENV_DATA_DIR: &str = "QUOROOM_DATA_DIR";
pub const ENV_RESULTS_DIR: &str = "QUOROOM_RESULTS_DIR";
pub const ENV_CLOUD_API: &str = "QUOROOM_CLOUD_API";
pub const ENV_UPDATE_SOURCE_URL: &str = "QUOROOM_UPDATE_SOURCE_URL";
pub const ENV_UPDATE_SOURCE_TOKEN: &str = "QUOROOM_UPDATE_SOURCE_TOKEN";
pub const ENV_SOURCE: &str = "QUOROOM_SOURCE";

fn default_listen_addr() -> String {
    "127.0.0.1:7333".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root of all persisted state. Defaults to `~/.quoroom`.
    pub data_dir: PathBuf,
    /// SQLite database file. Defaults to `<data_dir>/quoroom.db`.
    pub db_path: PathBuf,
    /// Run artifact directory. Defaults to `<data_dir>/results`.
    pub results_dir: PathBuf,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Cloud relay base URL; `None` disables the cloud shim.
    #[serde(default)]
    pub cloud_api: Option<String>,
    #[serde(default)]
    pub update_source_url: Option<String>,
    #[serde(default)]
    pub update_source_token: Option<String>,
    /// Free-text tag propagated into task trigger config.
    #[serde(default)]
    pub source_tag: Option<String>,
}

/// Subset of fields accepted from `quoroom.toml`. Paths in the file are
/// relative to the data dir when not absolute.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    listen_addr: Option<String>,
    cloud_api: Option<String>,
    update_source_url: Option<String>,
    update_source_token: Option<String>,
    source_tag: Option<String>,
}

impl EngineConfig {
    /// Defaults rooted at the given data dir.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        let db_path = data_dir.join("quoroom.db");
        let results_dir = data_dir.join("results");
        Self {
            data_dir,
            db_path,
            results_dir,
            listen_addr: default_listen_addr(),
            cloud_api: None,
            update_source_url: None,
            update_source_token: None,
            source_tag: None,
        }
    }

    /// Full resolution: defaults, then `quoroom.toml`, then environment.
    pub fn load(home: Option<&Path>) -> Result<Self> {
        let data_dir = match std::env::var(ENV_DATA_DIR) {
            Ok(v) if !v.is_empty() => PathBuf::from(v),
            _ => home
                .map(|h| h.join(".quoroom"))
                .ok_or_else(|| Error::internal("cannot resolve home directory for data dir"))?,
        };
        let mut config = Self::with_data_dir(data_dir);

        let file = config.data_dir.join("quoroom.toml");
        if let Ok(raw) = std::fs::read_to_string(&file) {
            let fc: FileConfig = toml::from_str(&raw)
                .map_err(|e| Error::invalid_input(format!("quoroom.toml: {e}")))?;
            if let Some(v) = fc.listen_addr {
                config.listen_addr = v;
            }
            config.cloud_api = fc.cloud_api.or(config.cloud_api);
            config.update_source_url = fc.update_source_url.or(config.update_source_url);
            config.update_source_token = fc.update_source_token.or(config.update_source_token);
            config.source_tag = fc.source_tag.or(config.source_tag);
        }

        config.apply_env();
        Ok(config)
    }

    /// Environment overrides, applied last.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var(ENV_DB_PATH) {
            if !v.is_empty() {
                self.db_path = PathBuf::from(v);
            }
        }
        if let Ok(v) = std::env::var(ENV_RESULTS_DIR) {
            if !v.is_empty() {
                self.results_dir = PathBuf::from(v);
            }
        }
        for (env, slot) in [
            (ENV_CLOUD_API, &mut self.cloud_api),
            (ENV_UPDATE_SOURCE_URL, &mut self.update_source_url),
            (ENV_UPDATE_SOURCE_TOKEN, &mut self.update_source_token),
            (ENV_SOURCE, &mut self.source_tag),
        ] {
            if let Ok(v) = std::env::var(env) {
                if !v.is_empty() {
                    *slot = Some(v);
                }
            }
        }
    }

    /// Fatal-at-startup checks. Returns the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(Error::invalid_input(format!(
                "listen_addr {:?} is not host:port",
                self.listen_addr
            )));
        }
        if self.db_path.as_os_str().is_empty() {
            return Err(Error::invalid_input("db_path is empty"));
        }
        Ok(())
    }

    /// Sidecar file the HTTP listener writes its bound port into.
    pub fn api_port_file(&self) -> PathBuf {
        self.data_dir.join("api.port")
    }

    /// Sidecar file carrying the local API token.
    pub fn api_token_file(&self) -> PathBuf {
        self.data_dir.join("api.token")
    }

    /// Sidecar maintained by the cloud shim.
    pub fn cloud_tokens_file(&self) -> PathBuf {
        self.data_dir.join("cloud-room-tokens.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_rooted_at_data_dir() {
        let c = EngineConfig::with_data_dir(PathBuf::from("/tmp/qr"));
        assert_eq!(c.db_path, PathBuf::from("/tmp/qr/quoroom.db"));
        assert_eq!(c.results_dir, PathBuf::from("/tmp/qr/results"));
        assert_eq!(c.api_port_file(), PathBuf::from("/tmp/qr/api.port"));
        assert_eq!(c.cloud_tokens_file(), PathBuf::from("/tmp/qr/cloud-room-tokens.json"));
    }

    #[test]
    fn validate_accepts_defaults() {
        let c = EngineConfig::with_data_dir(PathBuf::from("/tmp/qr"));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_listen_addr() {
        let mut c = EngineConfig::with_data_dir(PathBuf::from("/tmp/qr"));
        c.listen_addr = "not an addr".into();
        assert!(c.validate().is_err());
    }

    #[test]
    fn file_config_parses() {
        let raw = r#"
            listen_addr = "0.0.0.0:9000"
            cloud_api = "https://cloud.example"
        "#;
        let fc: FileConfig = toml::from_str(raw).unwrap();
        assert_eq!(fc.listen_addr.as_deref(), Some("0.0.0.0:9000"));
        assert_eq!(fc.cloud_api.as_deref(), Some("https://cloud.example"));
        assert!(fc.source_tag.is_none());
    }
}
