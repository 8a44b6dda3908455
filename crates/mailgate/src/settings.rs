//! Server settings loaded from an optional JSON file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use mailgate_smtp::{Config, TlsUpgrader};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Environment variable naming the settings file.
pub const CONFIG_ENV: &str = "MAILGATE_CONFIG";

/// Certificate and key used for STARTTLS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsSettings {
    /// PEM certificate chain.
    pub certificate: PathBuf,
    /// PEM private key.
    pub private_key: PathBuf,
}

/// Server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Address the listener binds to.
    pub listen: SocketAddr,
    /// Hostname announced to clients.
    pub hostname: String,
    /// Greeting banner; the engine default when absent.
    pub banner: Option<String>,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
    /// Maximum accepted recipients per message.
    pub max_recipients: usize,
    /// Domains mail is accepted for. Empty accepts every domain.
    pub local_domains: Vec<String>,
    /// Directory delivered messages are written to.
    pub spool_dir: PathBuf,
    /// STARTTLS certificate; STARTTLS is not offered without it.
    pub tls: Option<TlsSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        let engine = Config::default();
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 2525)),
            hostname: engine.hostname,
            banner: None,
            max_message_size: engine.max_message_size,
            max_recipients: engine.max_recipients,
            local_domains: Vec::new(),
            spool_dir: PathBuf::from("spool"),
            tls: None,
        }
    }
}

impl Settings {
    /// Returns the settings path from the first argument or [`CONFIG_ENV`].
    pub fn locate() -> Option<PathBuf> {
        std::env::args_os()
            .nth(1)
            .map(PathBuf::from)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
    }

    /// Loads settings from `path`. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            info!("No settings file given, using defaults");
            return Ok(Self::default());
        };
        if !path.exists() {
            warn!(path = %path.display(), "Settings file not found, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        let settings = serde_json::from_str(&text)
            .with_context(|| format!("parsing settings from {}", path.display()))?;
        info!(path = %path.display(), "Settings loaded");
        Ok(settings)
    }

    /// Builds the engine configuration.
    pub fn engine_config(&self) -> anyhow::Result<Config> {
        let mut builder = Config::builder(self.hostname.clone())
            .max_message_size(self.max_message_size)
            .max_recipients(self.max_recipients);
        if let Some(banner) = &self.banner {
            builder = builder.banner(banner.clone());
        }
        builder.build().context("invalid engine configuration")
    }

    /// Builds the STARTTLS upgrader when a certificate is configured.
    pub fn upgrader(&self) -> anyhow::Result<Option<TlsUpgrader>> {
        self.tls
            .as_ref()
            .map(|tls| {
                TlsUpgrader::from_pem_files(&tls.certificate, &tls.private_key)
                    .with_context(|| format!("loading certificate {}", tls.certificate.display()))
            })
            .transpose()
    }
}
