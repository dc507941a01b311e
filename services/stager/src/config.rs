use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::compilers::CompilerMapping;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {var}: {message}")]
    Invalid { var: &'static str, message: String },

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub compilers: CompilerMapping,
    /// Address to register as a file server from this process (dev only).
    pub dev_file_server_url: Option<String>,
    pub presence_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let listen_addr = lookup("STAGER_LISTEN_ADDR")
            .unwrap_or_else(|| "127.0.0.1:8888".to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                var: "STAGER_LISTEN_ADDR",
                message: e.to_string(),
            })?;

        let log_level = lookup("STAGER_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let compilers = match (lookup("STAGER_COMPILERS"), lookup("STAGER_COMPILERS_FILE")) {
            (Some(json), _) => parse_compilers("STAGER_COMPILERS", &json)?,
            (None, Some(path)) => {
                let json = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::Read { path, source })?;
                parse_compilers("STAGER_COMPILERS_FILE", &json)?
            }
            (None, None) => CompilerMapping::default(),
        };

        let dev_file_server_url = lookup("STAGER_DEV_FILE_SERVER_URL").filter(|v| !v.is_empty());

        let presence_ttl_secs = match lookup("STAGER_PRESENCE_TTL_SECS") {
            Some(v) => v.parse::<u64>().ok().filter(|secs| *secs > 0).ok_or_else(|| {
                ConfigError::Invalid {
                    var: "STAGER_PRESENCE_TTL_SECS",
                    message: format!("expected a positive number of seconds, got {v:?}"),
                }
            })?,
            None => 10,
        };

        Ok(Self {
            listen_addr,
            log_level,
            compilers,
            dev_file_server_url,
            presence_ttl: Duration::from_secs(presence_ttl_secs),
        })
    }
}

fn parse_compilers(var: &'static str, json: &str) -> Result<CompilerMapping, ConfigError> {
    CompilerMapping::from_json(json).map_err(|e| ConfigError::Invalid {
        var,
        message: e.to_string(),
    })
}
