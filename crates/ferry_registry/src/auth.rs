//! Registry authentication.
//!
//! Requests carry basic credentials until the registry answers with a `Bearer` challenge, after
//! which a token is requested from the challenge's realm and cached per scope.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use super::errors::{Error, Result};

#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Value of an `Authorization` header using these credentials.
    pub fn basic(&self) -> String {
        let encoded = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {encoded}")
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Parsed `WWW-Authenticate` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Challenge {
    Basic {
        realm: Option<String>,
    },
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
}

impl TryFrom<&str> for Challenge {
    type Error = Error;

    fn try_from(header: &str) -> Result<Self> {
        static PARAM: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r#"([A-Za-z_]+)\s*=\s*(?:"([^"]*)"|([^\s,]+))"#)
                .expect("challenge parameter regex must compile")
        });

        let header = header.trim();
        let (scheme, rest) = header.split_once(' ').unwrap_or((header, ""));
        let params = PARAM
            .captures_iter(rest)
            .filter_map(|c| {
                let key = c.get(1)?.as_str().to_ascii_lowercase();
                let value = c.get(2).or_else(|| c.get(3))?.as_str().to_string();
                Some((key, value))
            })
            .collect::<HashMap<String, String>>();

        match scheme.to_ascii_lowercase().as_str() {
            "basic" => Ok(Challenge::Basic {
                realm: params.get("realm").cloned(),
            }),
            "bearer" => Ok(Challenge::Bearer {
                realm: params
                    .get("realm")
                    .cloned()
                    .ok_or_else(|| Error::InvalidChallenge(header.to_string()))?,
                service: params.get("service").cloned(),
                scope: params.get("scope").cloned(),
            }),
            _ => Err(Error::InvalidChallenge(header.to_string())),
        }
    }
}

/// Body of a token endpoint response. Older token servers use `access_token`.
#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

impl TokenResponse {
    pub(crate) fn into_token(self) -> Option<String> {
        self.token.or(self.access_token).filter(|t| !t.is_empty())
    }
}

/// The access a request needs, used as the token cache key.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum Scope {
    Registry,
    Catalog,
    Pull(String),
    Push(String),
}

impl Scope {
    /// Scope string as understood by a distribution token server.
    pub fn as_token_scope(&self) -> Option<String> {
        match self {
            Scope::Registry => None,
            Scope::Catalog => Some("registry:catalog:*".to_string()),
            Scope::Pull(repository) => Some(format!("repository:{repository}:pull")),
            Scope::Push(repository) => Some(format!("repository:{repository}:pull,push")),
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct TokenCache {
    tokens: Arc<Mutex<HashMap<Scope, String>>>,
}

impl TokenCache {
    pub(crate) fn get(&self, scope: &Scope) -> Option<String> {
        self.tokens.lock().ok()?.get(scope).cloned()
    }

    pub(crate) fn insert(&self, scope: Scope, token: String) {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.insert(scope, token);
        }
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::docker_hub(
        r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/alpine:pull""#,
        Challenge::Bearer {
            realm: "https://auth.docker.io/token".to_string(),
            service: Some("registry.docker.io".to_string()),
            scope: Some("repository:library/alpine:pull".to_string()),
        }
    )]
    #[case::comma_inside_scope(
        r#"Bearer realm="https://r.example/token", scope="repository:a/b:pull,push""#,
        Challenge::Bearer {
            realm: "https://r.example/token".to_string(),
            service: None,
            scope: Some("repository:a/b:pull,push".to_string()),
        }
    )]
    #[case::unquoted(
        "bearer realm=https://r.example/token,service=r.example",
        Challenge::Bearer {
            realm: "https://r.example/token".to_string(),
            service: Some("r.example".to_string()),
            scope: None,
        }
    )]
    #[case::basic(r#"Basic realm="Registry Realm""#, Challenge::Basic { realm: Some("Registry Realm".to_string()) })]
    #[case::basic_without_realm("Basic", Challenge::Basic { realm: None })]
    fn parse_challenge(#[case] header: &str, #[case] expected: Challenge) {
        let challenge = Challenge::try_from(header).expect("challenge should parse");
        assert_eq!(challenge, expected);
    }

    #[rstest]
    #[case::unknown_scheme(r#"Negotiate realm="x""#)]
    #[case::bearer_without_realm(r#"Bearer service="x""#)]
    fn reject_challenge(#[case] header: &str) {
        assert!(matches!(
            Challenge::try_from(header),
            Err(Error::InvalidChallenge(_))
        ));
    }

    #[test]
    fn basic_header() {
        let credentials = Credentials::new("aladdin", "opensesame");
        assert_eq!(credentials.basic(), "Basic YWxhZGRpbjpvcGVuc2VzYW1l");
        assert!(!format!("{credentials:?}").contains("opensesame"));
    }

    #[test]
    fn token_response_variants() {
        let r: TokenResponse = serde_json::from_str(r#"{"token":"abc"}"#).expect("valid json");
        assert_eq!(r.into_token().as_deref(), Some("abc"));
        let r: TokenResponse =
            serde_json::from_str(r#"{"access_token":"def","expires_in":300}"#).expect("valid json");
        assert_eq!(r.into_token().as_deref(), Some("def"));
        let r: TokenResponse = serde_json::from_str(r#"{"token":""}"#).expect("valid json");
        assert_eq!(r.into_token(), None);
    }

    #[test]
    fn token_cache_is_keyed_by_scope() {
        let cache = TokenCache::default();
        cache.insert(Scope::Pull("a".to_string()), "pull-token".to_string());
        assert_eq!(cache.get(&Scope::Pull("a".to_string())).as_deref(), Some("pull-token"));
        assert_eq!(cache.get(&Scope::Push("a".to_string())), None);
        assert_eq!(cache.get(&Scope::Pull("b".to_string())), None);
    }
}
