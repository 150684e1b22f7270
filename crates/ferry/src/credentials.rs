//! Registry credentials from the docker client configuration.
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

use ferry_registry::Credentials;

const DOCKER_HUB_HOSTS: &[&str] = &["docker.io", "registry-1.docker.io", "index.docker.io"];

#[derive(Default, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

#[derive(Default, Deserialize)]
struct AuthEntry {
    auth: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

impl AuthEntry {
    fn credentials(&self) -> Option<Credentials> {
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            return Some(Credentials::new(username, password));
        }
        let decoded = STANDARD.decode(self.auth.as_deref()?.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':')?;
        Some(Credentials::new(username, password))
    }
}

/// The `auths` section of a docker `config.json`, keyed by registry host.
#[derive(Default)]
pub struct DockerCredentials {
    auths: HashMap<String, AuthEntry>,
}

impl DockerCredentials {
    /// Load `$DOCKER_CONFIG/config.json`, falling back to `~/.docker/config.json`.
    ///
    /// A missing or unreadable file yields an empty store.
    pub fn load() -> Self {
        let Some(path) = default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::from_path(&path) {
            Ok(credentials) => credentials,
            Err(e) => {
                tracing::warn!("couldn't read docker config {}: {e:#}", path.display());
                Self::default()
            }
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let mut s = String::new();
        File::open(path)?.read_to_string(&mut s)?;
        Self::parse(&s).with_context(|| format!("invalid docker config {}", path.display()))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let config: DockerConfig = serde_json::from_str(s)?;
        let auths = config
            .auths
            .into_iter()
            .map(|(key, entry)| (registry_host(&key), entry))
            .collect();
        Ok(Self { auths })
    }

    /// Credentials stored for the registry at `url`, if any.
    pub fn lookup(&self, url: &str) -> Option<Credentials> {
        let host = registry_host(url);
        if let Some(credentials) = self.auths.get(&host).and_then(AuthEntry::credentials) {
            return Some(credentials);
        }
        if DOCKER_HUB_HOSTS.contains(&host.as_str()) {
            return DOCKER_HUB_HOSTS
                .iter()
                .filter_map(|h| self.auths.get(*h))
                .find_map(AuthEntry::credentials);
        }
        None
    }
}

fn default_path() -> Option<PathBuf> {
    match std::env::var_os("DOCKER_CONFIG") {
        Some(dir) => Some(PathBuf::from(dir).join("config.json")),
        None => home::home_dir().map(|h| h.join(".docker").join("config.json")),
    }
}

/// `https://registry.example:5000/v1/` becomes `registry.example:5000`.
fn registry_host(url: &str) -> String {
    let url = url.trim();
    let url = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    url.split('/').next().unwrap_or(url).to_ascii_lowercase()
}
