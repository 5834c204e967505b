use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use url::Url;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Settings for [`HttpTransport`](super::HttpTransport), read from `config.toml`.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Hosts guests may reach. `None` allows everything, an empty list denies everything.
    /// Entries of the form `*.example.com` match the domain and its subdomains.
    #[serde(default)]
    pub allowed_hosts: Option<Vec<String>>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub max_body_bytes: Option<u64>,
    #[serde(default)]
    pub max_redirects: Option<usize>,
}

impl BridgeConfig {
    /// Load from `path`, or from the default location when `path` is `None`. A missing default
    /// file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::from_file(p)?,
            None => match default_config_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };
        if let Some(ms) = std::env::var("JSFETCH_TIMEOUT_MS").ok().and_then(|s| s.parse().ok()) {
            cfg.timeout_ms = Some(ms);
        }
        Ok(cfg.normalized())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let cfg: Self = toml::from_str(&text)
            .with_context(|| format!("invalid config: {}", path.display()))?;
        Ok(cfg.normalized())
    }

    fn normalized(mut self) -> Self {
        self.allowed_hosts = self.allowed_hosts.map(|v|
            v.iter().map(|h| h.trim().to_ascii_lowercase()).filter(|h| !h.is_empty()).collect()
        );
        self
    }

    pub fn timeout(&self) -> Duration { Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)) }

    pub fn user_agent(&self) -> String {
        self.user_agent.clone().unwrap_or_else(|| concat!("jsfetch/", env!("CARGO_PKG_VERSION")).to_string())
    }

    pub fn max_redirects(&self) -> usize { self.max_redirects.unwrap_or(DEFAULT_MAX_REDIRECTS) }

    pub fn url_allowed(&self, url: &Url) -> bool {
        match &self.allowed_hosts {
            None => true,
            Some(list) => {
                if list.is_empty() { return false; }
                match url.scheme() { "http" | "https" => {}, _ => return false }
                let Some(host) = url.host_str() else { return false; };
                let host = host.to_ascii_lowercase();
                list.iter().any(|allowed| {
                    let a = allowed.as_str();
                    if let Some(stripped) = a.strip_prefix("*.") {
                        host == stripped || host.ends_with(&format!(".{}", stripped))
                    } else { host == a }
                })
            }
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "jsfetch").map(|d| d.config_dir().join("config.toml"))
}
