use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StratumError};

/// Stratum server options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    /// Address the miner-facing listener binds to.
    pub listen_addr: SocketAddr,
    /// API key file, one key per line. `None` disables access control.
    pub api_keys_file: Option<PathBuf>,
    /// TLS certificate chain (PEM). TLS is enabled only when both this
    /// and `priv_key_file` are set.
    pub cert_file: Option<PathBuf>,
    /// TLS private key (PEM).
    pub priv_key_file: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3333".parse().unwrap(),
            api_keys_file: None,
            cert_file: None,
            priv_key_file: None,
        }
    }
}

impl Options {
    pub fn tls_enabled(&self) -> bool {
        self.cert_file.is_some() && self.priv_key_file.is_some()
    }

    /// Load options from a TOML file.
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Options> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| StratumError::Malformed(format!("failed to parse config: {}", e)))
    }
}
