//! Configuration loading and validation.
//!
//! The configuration is a JSON object naming the controller endpoint and
//! the services to balance. It is immutable after load.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Most backend instances one service may balance over.
pub const MAX_BACKENDS_PER_SERVICE: usize = 60;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
    /// Controller endpoint, `host:port`.
    pub address: String,
    /// Controller password; empty tries null authentication.
    pub control_port_password: String,
    /// Extra log file; empty logs to standard output only.
    pub log_file_path: String,
    /// The master services to run.
    pub services: Vec<Service>,
}

/// One master service and the backends it balances.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Service {
    /// PEM encoded PKCS#1 RSA private key of the master identity.
    pub private_key_path: String,
    /// v2 onion addresses of the backend instances.
    pub backend_addresses: Vec<String>,
}

impl Config {
    /// Verifies the values in the config.
    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            bail!("missing address");
        }

        for service in &self.services {
            if service.private_key_path.is_empty() {
                bail!("missing private key path");
            }

            if service.backend_addresses.len() > MAX_BACKENDS_PER_SERVICE {
                bail!(
                    "only a maximum of {MAX_BACKENDS_PER_SERVICE} backend instances is allowed"
                );
            }
        }

        Ok(())
    }
}

/// Loads and validates a configuration file.
pub fn load(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;

    let config: Config = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;

    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config: Config = serde_json::from_str(
            r#"{
                "Address": "127.0.0.1:9051",
                "ControlPortPassword": "hunter2",
                "LogFilePath": "/var/log/onionmux.log",
                "Services": [
                    {
                        "PrivateKeyPath": "/etc/onionmux/master.pem",
                        "BackendAddresses": ["backend1", "backend2"]
                    }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.address, "127.0.0.1:9051");
        assert_eq!(config.control_port_password, "hunter2");
        assert_eq!(config.log_file_path, "/var/log/onionmux.log");
        assert_eq!(config.services.len(), 1);
        assert_eq!(
            config.services[0].private_key_path,
            "/etc/onionmux/master.pem"
        );
        assert_eq!(
            config.services[0].backend_addresses,
            vec!["backend1", "backend2"]
        );

        config.validate().unwrap();
    }

    #[test]
    fn rejects_missing_address() {
        let config: Config = serde_json::from_str(r#"{"Services": []}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_missing_private_key_path() {
        let config: Config = serde_json::from_str(
            r#"{"Address": "127.0.0.1:9051", "Services": [{"BackendAddresses": []}]}"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_too_many_backends() {
        let backends: Vec<String> = (0..61).map(|i| format!("backend{i}")).collect();
        let config = Config {
            address: "127.0.0.1:9051".to_string(),
            services: vec![Service {
                private_key_path: "/key".to_string(),
                backend_addresses: backends,
            }],
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
