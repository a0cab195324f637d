//! Configuration loading
//!
//! Reads the INI configuration file: upstream node endpoints under
//! [network] and database credentials under [db].

use anyhow::{Context, Result};
use ini::Ini;
use std::path::Path;

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// host:port of the upstream JSON-RPC endpoint
    pub rpc_host: String,
    /// host:port of the upstream WebSocket endpoint
    pub websocket_host: String,

    pub db_host: String,
    pub db_protocol: String,
    pub db_name: String,
    pub db_user: String,
    pub db_pass: String,
}

impl Config {
    /// Full URL of the JSON-RPC endpoint.
    pub fn rpc_url(&self) -> String {
        format!("http://{}", self.rpc_host)
    }

    /// Full URL of the WebSocket endpoint.
    pub fn websocket_url(&self) -> String {
        format!("ws://{}/", self.websocket_host)
    }
}

/// Load the configuration from an INI file.
pub fn load(path: &Path) -> Result<Config> {
    let ini = Ini::load_from_file(path)
        .with_context(|| format!("Failed to read configuration file: {:?}", path))?;

    let get = |section: &str, key: &str| {
        ini.get_from(Some(section), key)
            .unwrap_or_default()
            .to_string()
    };

    Ok(Config {
        rpc_host: get("network", "rpc_host"),
        websocket_host: get("network", "websocket_host"),
        db_host: get("db", "host"),
        db_protocol: get("db", "protocol"),
        db_name: get("db", "name"),
        db_user: get("db", "user"),
        db_pass: get("db", "pass"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[network]").unwrap();
        writeln!(file, "rpc_host = 127.0.0.1:8545").unwrap();
        writeln!(file, "websocket_host = 127.0.0.1:8546").unwrap();
        writeln!(file, "[db]").unwrap();
        writeln!(file, "host = 127.0.0.1:3306").unwrap();
        writeln!(file, "protocol = tcp").unwrap();
        writeln!(file, "name = chainwatch").unwrap();
        writeln!(file, "user = watcher").unwrap();
        writeln!(file, "pass = secret").unwrap();
        file.flush().unwrap();

        let config = load(file.path()).unwrap();
        assert_eq!(config.rpc_url(), "http://127.0.0.1:8545");
        assert_eq!(config.websocket_url(), "ws://127.0.0.1:8546/");
        assert_eq!(config.db_name, "chainwatch");
        assert_eq!(config.db_protocol, "tcp");
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load(Path::new("/nonexistent/config.ini"));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_keys_default_empty() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[network]").unwrap();
        writeln!(file, "rpc_host = node:8545").unwrap();
        file.flush().unwrap();

        let config = load(file.path()).unwrap();
        assert_eq!(config.rpc_host, "node:8545");
        assert_eq!(config.db_user, "");
    }
}
