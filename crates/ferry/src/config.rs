use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use ferry_core::{CopyRequest, TransferConfig};
use ferry_registry::{RegistryConfig, DEFAULT_TIMEOUT_SECS};

use crate::credentials::DockerCredentials;
use crate::Cli;

#[derive(Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: EndpointConfig,
    #[serde(default)]
    pub destination: EndpointConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
}

/// One side of a copy as written in the config file. Command line flags take precedence.
#[derive(Clone, Default, Deserialize)]
pub struct EndpointConfig {
    pub url: Option<String>,
    pub repository: Option<String>,
    pub tag: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub insecure: Option<bool>,
    pub timeout_secs: Option<u64>,
}

/// Values given on the command line for one side of a copy.
struct EndpointFlags<'a> {
    name: &'static str,
    url: &'a Option<String>,
    repository: &'a Option<String>,
    tag: &'a Option<String>,
    username: &'a Option<String>,
    password: &'a Option<String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let mut s = String::new();
        File::open(path)
            .with_context(|| format!("failed to open config file {}", path.display()))?
            .read_to_string(&mut s)?;
        serde_yaml::from_str(&s)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn source_registry(&self, cli: &Cli, docker: &DockerCredentials) -> Result<RegistryConfig> {
        registry(&self.source, &source_flags(cli), cli, docker)
    }

    pub fn destination_registry(
        &self,
        cli: &Cli,
        docker: &DockerCredentials,
    ) -> Result<RegistryConfig> {
        registry(&self.destination, &destination_flags(cli), cli, docker)
    }

    pub fn transfer(&self, cli: &Cli) -> TransferConfig {
        let mut transfer = self.transfer.clone();
        if let Some(max_concurrent) = cli.max_concurrent {
            transfer.max_concurrent_transfers = max_concurrent;
        }
        transfer.max_concurrent_transfers = transfer.max_concurrent_transfers.max(1);
        transfer
    }

    /// The single image to copy. Per-side values win over `--repo` and `--tag`.
    pub fn copy_request(&self, cli: &Cli) -> Result<CopyRequest> {
        let (source_repository, source_tag) = image(&self.source, &source_flags(cli), cli)?;
        let (destination_repository, destination_tag) =
            image(&self.destination, &destination_flags(cli), cli)?;
        Ok(CopyRequest {
            source_repository,
            source_tag,
            destination_repository,
            destination_tag,
        })
    }
}

fn source_flags(cli: &Cli) -> EndpointFlags<'_> {
    EndpointFlags {
        name: "source",
        url: &cli.src_url,
        repository: &cli.src_repo,
        tag: &cli.src_tag,
        username: &cli.src_username,
        password: &cli.src_password,
    }
}

fn destination_flags(cli: &Cli) -> EndpointFlags<'_> {
    EndpointFlags {
        name: "destination",
        url: &cli.dest_url,
        repository: &cli.dest_repo,
        tag: &cli.dest_tag,
        username: &cli.dest_username,
        password: &cli.dest_password,
    }
}

fn registry(
    file: &EndpointConfig,
    flags: &EndpointFlags<'_>,
    cli: &Cli,
    docker: &DockerCredentials,
) -> Result<RegistryConfig> {
    let url = flags
        .url
        .clone()
        .or_else(|| file.url.clone())
        .with_context(|| format!("a {} registry url is required", flags.name))?;

    let mut config = RegistryConfig {
        insecure: cli.insecure || file.insecure.unwrap_or(false),
        timeout_secs: cli
            .timeout
            .or(file.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS),
        ..RegistryConfig::new(url)
    };

    match (flags.username.clone(), file.username.clone()) {
        (Some(username), _) => {
            config.username = Some(username);
            config.password = flags.password.clone();
        }
        (None, Some(username)) => {
            config.username = Some(username);
            config.password = flags.password.clone().or_else(|| file.password.clone());
        }
        (None, None) => {
            if let Some(credentials) = docker.lookup(&config.url) {
                tracing::debug!("using docker credentials for {} registry", flags.name);
                config.username = Some(credentials.username);
                config.password = Some(credentials.password);
            }
        }
    }
    Ok(config)
}

fn image(file: &EndpointConfig, flags: &EndpointFlags<'_>, cli: &Cli) -> Result<(String, String)> {
    let repository = flags
        .repository
        .clone()
        .or_else(|| file.repository.clone())
        .or_else(|| cli.repo.clone())
        .with_context(|| format!("a {} repository is required (or --repo)", flags.name))?;
    let tag = flags
        .tag
        .clone()
        .or_else(|| file.tag.clone())
        .unwrap_or_else(|| cli.tag.clone());
    Ok((repository, tag))
}

#[cfg(test)]
mod test {
    use clap::Parser;

    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("ferry").chain(args.iter().copied()))
    }

    const FILE: &str = r#"
source:
  url: https://source.example
  repository: team/app
  username: reader
  password: hunter2
destination:
  url: http://localhost:5000
  insecure: true
  timeout_secs: 5
transfer:
  max_concurrent_transfers: 8
"#;

    #[test]
    fn repo_and_tag_are_shared_fallbacks() -> Result<()> {
        let cli = cli(&[
            "--src-url",
            "registry.example",
            "--dest-url",
            "mirror.example",
            "--repo",
            "library/alpine",
            "--dest-tag",
            "stable",
        ]);
        let request = Config::default().copy_request(&cli)?;
        assert_eq!(
            request,
            CopyRequest {
                source_repository: "library/alpine".to_string(),
                source_tag: "latest".to_string(),
                destination_repository: "library/alpine".to_string(),
                destination_tag: "stable".to_string(),
            }
        );
        Ok(())
    }

    #[test]
    fn missing_repository_is_an_error() {
        let cli = cli(&["--src-url", "a.example", "--dest-url", "b.example"]);
        assert!(Config::default().copy_request(&cli).is_err());
    }

    #[test]
    fn file_values_fill_in_missing_flags() -> Result<()> {
        let config: Config = serde_yaml::from_str(FILE)?;
        let cli = cli(&["--dest-repo", "mirror/app"]);
        let docker = DockerCredentials::default();

        let source = config.source_registry(&cli, &docker)?;
        assert_eq!(source.url, "https://source.example");
        assert_eq!(source.username.as_deref(), Some("reader"));
        assert_eq!(source.password.as_deref(), Some("hunter2"));
        assert!(!source.insecure);
        assert_eq!(source.timeout_secs, DEFAULT_TIMEOUT_SECS);

        let destination = config.destination_registry(&cli, &docker)?;
        assert!(destination.insecure);
        assert_eq!(destination.timeout_secs, 5);
        assert_eq!(destination.username, None);

        let request = config.copy_request(&cli)?;
        assert_eq!(request.source_repository, "team/app");
        assert_eq!(request.destination_repository, "mirror/app");

        assert_eq!(config.transfer(&cli).max_concurrent_transfers, 8);
        Ok(())
    }

    #[test]
    fn flags_override_file() -> Result<()> {
        let config: Config = serde_yaml::from_str(FILE)?;
        let cli = cli(&[
            "--src-url",
            "https://other.example",
            "--src-username",
            "writer",
            "--timeout",
            "60",
            "--max-concurrent",
            "0",
        ]);
        let docker = DockerCredentials::default();

        let source = config.source_registry(&cli, &docker)?;
        assert_eq!(source.url, "https://other.example");
        assert_eq!(source.username.as_deref(), Some("writer"));
        assert_eq!(source.password, None);
        assert_eq!(source.timeout_secs, 60);
        assert_eq!(config.transfer(&cli).max_concurrent_transfers, 1);
        Ok(())
    }

    #[test]
    fn docker_credentials_are_the_last_resort() -> Result<()> {
        let docker = DockerCredentials::parse(
            r#"{"auths":{"mirror.example":{"username":"docker","password":"pw"}}}"#,
        )?;
        let cli = cli(&["--src-url", "a.example", "--dest-url", "https://mirror.example"]);

        let destination = Config::default().destination_registry(&cli, &docker)?;
        assert_eq!(destination.username.as_deref(), Some("docker"));
        assert_eq!(destination.password.as_deref(), Some("pw"));

        let source = Config::default().source_registry(&cli, &docker)?;
        assert_eq!(source.username, None);
        Ok(())
    }
}
