use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ferry_core::{CopyRequest, ImageCopier};
use ferry_registry::{HttpRegistry, RegistryConfig};

mod config;
use crate::config::Config;

mod credentials;
use crate::credentials::DockerCredentials;

/// Copy container images between registries.
///
/// Blobs already present at the destination are skipped and the manifest is published only after
/// every blob it references has been verified, so an interrupted copy can simply be run again.
#[derive(Parser)]
#[command(name = "ferry", version)]
pub(crate) struct Cli {
    /// YAML file with `source`, `destination` and `transfer` sections.
    #[arg(short, long)]
    config_file: Option<PathBuf>,

    /// URL of the source registry.
    #[arg(long)]
    src_url: Option<String>,
    /// Name of the source repository.
    #[arg(long)]
    src_repo: Option<String>,
    /// Name of the source tag.
    #[arg(long)]
    src_tag: Option<String>,
    #[arg(long)]
    src_username: Option<String>,
    #[arg(long, env = "FERRY_SRC_PASSWORD", hide_env_values = true)]
    src_password: Option<String>,

    /// URL of the destination registry.
    #[arg(long)]
    dest_url: Option<String>,
    /// Name of the destination repository.
    #[arg(long)]
    dest_repo: Option<String>,
    /// Name of the destination tag.
    #[arg(long)]
    dest_tag: Option<String>,
    #[arg(long)]
    dest_username: Option<String>,
    #[arg(long, env = "FERRY_DEST_PASSWORD", hide_env_values = true)]
    dest_password: Option<String>,

    /// Repository in both source and destination, unless overridden by --src-repo or --dest-repo.
    #[arg(long)]
    repo: Option<String>,
    /// Tag in both source and destination, unless overridden by --src-tag or --dest-tag.
    #[arg(long, default_value = "latest")]
    tag: String,

    /// Allow registries served over plain http.
    #[arg(long)]
    insecure: bool,
    /// Seconds to wait for each registry response.
    #[arg(long)]
    timeout: Option<u64>,
    /// Blob transfers in flight at once for each image.
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Copy every tag of every repository in the source catalog.
    #[arg(long)]
    all: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("ferry=debug,ferry_core=debug,ferry_registry=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .init();

    // load configuration
    let config = match &cli.config_file {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let docker = DockerCredentials::load();

    let source = connect("source", &config.source_registry(&cli, &docker)?).await?;
    let destination = connect("destination", &config.destination_registry(&cli, &docker)?).await?;
    let copier = ImageCopier::new(source.clone(), destination, &config.transfer(&cli));

    if cli.all {
        copy_catalog(&source, &copier).await
    } else {
        copy_image(&copier, &config.copy_request(&cli)?).await
    }
}

async fn connect(side: &str, config: &RegistryConfig) -> Result<HttpRegistry> {
    let registry = config
        .new_client()
        .with_context(|| format!("failed to create a client for the {side} registry {}", config.url))?;
    registry
        .ping()
        .await
        .with_context(|| format!("failed to ping the {side} registry {}", registry.url()))?;
    tracing::debug!("connected to {side} registry {}", registry.url());
    Ok(registry)
}

async fn copy_image(
    copier: &ImageCopier<HttpRegistry, HttpRegistry>,
    request: &CopyRequest,
) -> Result<()> {
    let report = copier.copy(request).await.with_context(|| {
        format!(
            "failed to copy {}:{}",
            request.source_repository, request.source_tag
        )
    })?;
    tracing::info!(
        "{}:{} is at {}:{} as {} ({} blobs already present)",
        request.source_repository,
        request.source_tag,
        request.destination_repository,
        request.destination_tag,
        report.manifest_digest,
        report.blobs.already_present.len(),
    );
    Ok(())
}

/// Copies every tag of every source repository to the same name, continuing past failures.
async fn copy_catalog(
    source: &HttpRegistry,
    copier: &ImageCopier<HttpRegistry, HttpRegistry>,
) -> Result<()> {
    let repositories = source
        .list_repositories()
        .await
        .context("failed to list source repositories")?;

    let mut attempted = 0;
    let mut failed = 0;
    for repository in repositories {
        let tags = match source.list_tags(&repository).await {
            Ok(tags) => tags,
            Err(e) => {
                tracing::error!("failed to list tags for {repository}: {e}");
                failed += 1;
                continue;
            }
        };

        for tag in tags {
            attempted += 1;
            let request = CopyRequest::same_name(&repository, &tag);
            if let Err(e) = copy_image(copier, &request).await {
                tracing::error!("{e:#}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} failures copying {attempted} images");
    }
    tracing::info!("copied {attempted} images");
    Ok(())
}
