//! Config loading and TLS material.

use std::path::{Path, PathBuf};

use robocc_certgen::{CERT_FILE, KEY_FILE};
use tracing::info;

use crate::config::Config;
use crate::error::NodeError;

/// Load configuration from the given path, or the default location.
pub fn load_config(path: Option<&str>) -> Result<Config, NodeError> {
    let config_path = match path {
        Some(p) => PathBuf::from(p),
        None => default_config_path(),
    };

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| NodeError::Config(format!("failed to read config: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| NodeError::Config(format!("failed to parse config: {e}")))?;
        info!(path = %config_path.display(), "loaded config");
        Ok(config)
    } else if path.is_some() {
        Err(NodeError::Config(format!(
            "config file not found: {}",
            config_path.display()
        )))
    } else {
        info!("no config file found, using defaults");
        Ok(Config::default())
    }
}

/// Load TLS cert and key from the config directory, or generate if missing.
pub fn load_or_generate_certs(config_dir: &Path) -> Result<(String, String), NodeError> {
    let cert_path = config_dir.join(CERT_FILE);
    let key_path = config_dir.join(KEY_FILE);

    if cert_path.exists() && key_path.exists() {
        let cert_pem = std::fs::read_to_string(&cert_path)
            .map_err(|e| NodeError::Config(format!("failed to read cert: {e}")))?;
        let key_pem = std::fs::read_to_string(&key_path)
            .map_err(|e| NodeError::Config(format!("failed to read key: {e}")))?;
        info!(path = %cert_path.display(), "loaded existing TLS cert");
        return Ok((cert_pem, key_pem));
    }

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "robocc".to_string());

    let cert = robocc_certgen::generate_certificate(&hostname)?;
    cert.write_to(config_dir)?;

    info!(fingerprint = %cert.fingerprint, "generated new TLS cert");
    Ok((cert.cert_pem, cert.key_pem))
}

/// Get the default config directory path.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("robocc")
}

/// Get the default config file path.
fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}
