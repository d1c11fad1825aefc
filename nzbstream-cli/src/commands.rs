//! CLI command implementations

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Subcommand;
use nzbstream_core::acquisition::TracingHealthReporter;
use nzbstream_core::store::open_store;
use nzbstream_core::webdav::FileResolver;
use nzbstream_core::{
    AcquisitionService, NzbStreamConfig, RequestHash, RequestedEpisode, SabnzbdClient,
    WebDavClient,
};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the streaming server
    Serve {
        /// Address to bind to (overrides NZBSTREAM_BIND)
        #[arg(long)]
        bind: Option<SocketAddr>,
        /// Base URL clients use to reach this server
        #[arg(long)]
        public_url: Option<String>,
    },
    /// Forget a stream so the next request acquires it again
    Invalidate {
        /// Stream key (request hash)
        key: String,
    },
    /// Show what the shared store knows about a stream
    Inspect {
        /// Stream key (request hash)
        key: String,
    },
    /// Resolve the playable file inside a completed job folder
    FindFile {
        /// Backend category, e.g. movies or tv
        category: String,
        /// Job folder name
        job_name: String,
        #[arg(long, requires = "episode")]
        season: Option<u32>,
        #[arg(long, requires = "season")]
        episode: Option<u32>,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns the first error from configuration, the store or the remote service
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    let mut config = NzbStreamConfig::from_env();

    match command {
        Commands::Serve { bind, public_url } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(public_url) = public_url {
                config.server.public_url = public_url;
            }
            serve(config).await
        }
        Commands::Invalidate { key } => invalidate(&config, &key).await,
        Commands::Inspect { key } => inspect(&config, &key).await,
        Commands::FindFile {
            category,
            job_name,
            season,
            episode,
        } => {
            let requested = RequestedEpisode::from_parts(season, episode);
            find_file(&config, &category, &job_name, requested).await
        }
    }
}

/// Run the server until Ctrl-C
///
/// # Errors
/// - Configuration is invalid or the listener cannot bind
pub async fn serve(config: NzbStreamConfig) -> anyhow::Result<()> {
    nzbstream_web::run_server(config)
        .await
        .map_err(|e| anyhow::anyhow!("server failed: {e}"))
}

/// Delete the metadata and acquisition record behind `key`
///
/// # Errors
/// - Shared store is unreachable
pub async fn invalidate(config: &NzbStreamConfig, key: &str) -> anyhow::Result<()> {
    let service = acquisition_service(config).await?;
    let request_hash = RequestHash::new(key);

    match service.invalidate(&request_hash).await? {
        Some(content_hash) => {
            println!("Invalidated {request_hash} (content {content_hash})");
        }
        None => println!("No metadata for {request_hash}; nothing else to invalidate"),
    }
    Ok(())
}

/// Print the store's view of `key` as JSON
///
/// # Errors
/// - Shared store is unreachable
pub async fn inspect(config: &NzbStreamConfig, key: &str) -> anyhow::Result<()> {
    let service = acquisition_service(config).await?;

    match service.inspect(&RequestHash::new(key)).await? {
        Some(inspection) => println!("{}", serde_json::to_string_pretty(&inspection)?),
        None => println!("Unknown stream key: {key}"),
    }
    Ok(())
}

/// Run the file resolver against the configured WebDAV share
///
/// # Errors
/// - WebDAV URL is invalid or the job folder cannot be listed
pub async fn find_file(
    config: &NzbStreamConfig,
    category: &str,
    job_name: &str,
    requested: Option<RequestedEpisode>,
) -> anyhow::Result<()> {
    let fs = WebDavClient::new(&config.webdav).context("failed to build WebDAV client")?;
    let resolver = FileResolver::new(Arc::new(fs), config.webdav.max_depth);

    match resolver.find_best_file(category, job_name, requested).await? {
        Some(file) => {
            println!("{}", file.path);
            println!("  size: {} bytes", file.size);
            if requested.is_some() {
                println!("  episode match: {}", file.matches_episode);
            }
        }
        None => println!("No playable file under {category}/{job_name}"),
    }
    Ok(())
}

async fn acquisition_service(config: &NzbStreamConfig) -> anyhow::Result<AcquisitionService> {
    let store = open_store(&config.store)
        .await
        .context("failed to open shared store")?;
    let backend = SabnzbdClient::new(&config.backend)?;
    let fs = WebDavClient::new(&config.webdav)?;

    Ok(AcquisitionService::new(
        config,
        store,
        Arc::new(backend),
        Arc::new(fs),
        Arc::new(TracingHealthReporter),
    ))
}
