use std::time::Duration;

use serde::Deserialize;

use super::auth::Credentials;
use super::client::HttpRegistry;
use super::errors::{Error, Result};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection settings for one registry endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct RegistryConfig {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Allow plain `http://` registries. TLS certificates are verified regardless.
    #[serde(default)]
    pub insecure: bool,
    /// Seconds to wait for response headers on each request.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl RegistryConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            insecure: false,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials::new(username, password)),
            (Some(username), None) => Some(Credentials::new(username, "")),
            _ => None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Registry base url with a scheme, defaulting to `https://`.
    pub fn base_url(&self) -> Result<String> {
        let url = self.url.trim().trim_end_matches('/');
        let url = if url.contains("://") {
            url.to_string()
        } else {
            format!("https://{url}")
        };

        let uri: http::Uri = url.parse()?;
        match uri.scheme_str() {
            Some("https") => {}
            Some("http") if self.insecure => {}
            Some("http") => return Err(Error::InsecureUrl(url)),
            _ => return Err(Error::RelativeUrl(url)),
        }
        if uri.authority().is_none() {
            return Err(Error::RelativeUrl(url));
        }
        Ok(url)
    }

    pub fn new_client(&self) -> Result<HttpRegistry> {
        HttpRegistry::new(self)
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::bare_host("registry.example:5000", false, "https://registry.example:5000")]
    #[case::trailing_slash("https://registry.example/", false, "https://registry.example")]
    #[case::insecure_http("http://localhost:5000", true, "http://localhost:5000")]
    fn base_url(#[case] url: &str, #[case] insecure: bool, #[case] expected: &str) {
        let config = RegistryConfig {
            insecure,
            ..RegistryConfig::new(url)
        };
        assert_eq!(config.base_url().expect("url should be accepted"), expected);
    }

    #[test]
    fn plain_http_requires_insecure() {
        let config = RegistryConfig::new("http://localhost:5000");
        assert!(matches!(config.base_url(), Err(Error::InsecureUrl(_))));
    }

    #[test]
    fn deserialize_with_defaults() {
        let config: RegistryConfig =
            serde_json::from_str(r#"{"url":"registry.example","username":"me"}"#)
                .expect("valid config");
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert!(!config.insecure);
        assert_eq!(config.credentials(), Some(Credentials::new("me", "")));
    }
}
