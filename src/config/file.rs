use serde::Deserialize;
use std::{
    net::IpAddr,
    path::{Path, PathBuf},
};
use tokio::fs;

use crate::errors::ConfigError;

use super::types::{LogLevel, ReconnectMode};

// -----------------------------------------------------------------------------
// ----- FileConfig ------------------------------------------------------------

/// On-disk TOML format. Every key is optional.
///
/// ```toml
/// host = "0.0.0.0"
/// port = 8000
/// messaging_uri = "redis://127.0.0.1:6379"
/// bus_password = "secret"
/// log = "info"
/// reconnect = "backoff"
/// reconnect_initial = "500ms"
/// reconnect_max = "30s"
/// instance_id = "gw-1"
/// tls_cert = "/etc/siorelay/cert.pem"
/// tls_key = "/etc/siorelay/key.pem"
/// ```
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub host: Option<IpAddr>,
    pub port: Option<u16>,
    pub messaging_uri: Option<String>,
    pub bus_password: Option<String>,

    #[serde(rename = "log")]
    pub log_level: Option<LogLevel>,

    pub reconnect: Option<ReconnectMode>,

    // humantime strings, parsed during resolve
    pub reconnect_initial: Option<String>,
    pub reconnect_max: Option<String>,

    pub instance_id: Option<String>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

// -----------------------------------------------------------------------------
// ----- FileConfig: Static ----------------------------------------------------

impl FileConfig {
    pub async fn load(path: &Path) -> Result<FileConfig, ConfigError> {
        let raw = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<FileConfig, ConfigError> {
        toml::from_str(raw).map_err(|source| ConfigError::Toml { source })
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn loads_full_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
host = "127.0.0.1"
port = 8100
messaging_uri = "redis://bus.internal:6380"
bus_password = "hunter2"
log = "debug"
reconnect = "never"
reconnect_initial = "1s"
reconnect_max = "10s"
instance_id = "gw-a"
"#
        )
        .unwrap();

        let cfg = FileConfig::load(file.path()).await.unwrap();
        assert_eq!(cfg.host, Some("127.0.0.1".parse().unwrap()));
        assert_eq!(cfg.port, Some(8100));
        assert_eq!(cfg.messaging_uri.as_deref(), Some("redis://bus.internal:6380"));
        assert_eq!(cfg.bus_password.as_deref(), Some("hunter2"));
        assert_eq!(cfg.log_level, Some(LogLevel::Debug));
        assert_eq!(cfg.reconnect, Some(ReconnectMode::Never));
        assert_eq!(cfg.reconnect_initial.as_deref(), Some("1s"));
        assert_eq!(cfg.instance_id.as_deref(), Some("gw-a"));
        assert_eq!(cfg.tls_cert, None);
    }

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(FileConfig::parse("").unwrap(), FileConfig::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = FileConfig::parse("hots = \"0.0.0.0\"").unwrap_err();
        assert!(matches!(err, ConfigError::Toml { .. }));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let err = FileConfig::load(Path::new("/nonexistent/siorelay.toml"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
