//! Command-line client for stitch.

mod api_client;

use anyhow::{Context, Result};
use api_client::{ApiClient, StartUploadRequest};
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use stitch_core::UploadId;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8080";
const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "stitchctl")]
#[command(about = "Command-line client for stitch")]
#[command(version)]
struct Cli {
    /// Server API URL
    #[arg(long, global = true, env = "STITCH_SERVER", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Strategy {
    /// Stream chunks through the server with offset writes
    Offset,
    /// Register a manifest and write chunks to the object store via signed URLs
    Delegated,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file in chunks
    Push {
        /// File to upload
        file: PathBuf,
        /// Upload strategy
        #[arg(long, value_enum, default_value_t = Strategy::Offset)]
        strategy: Strategy,
        /// Chunk size in bytes
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: u64,
        /// Maximum number of chunks in flight
        #[arg(long, default_value_t = 4)]
        parallel: usize,
        /// Name to store the file under (default: the local file name)
        #[arg(long)]
        target_name: Option<String>,
        /// Namespace for delegated uploads
        #[arg(long)]
        namespace: Option<String>,
        /// Directory within the namespace for delegated uploads
        #[arg(long)]
        relative_path: Option<String>,
        /// Retries per chunk transfer
        #[arg(long, default_value_t = 3)]
        retries: u32,
    },
    /// Show an upload session and its chunks
    Status {
        /// Upload session identifier
        upload_id: String,
    },
    /// Check server health and version
    Health,
}

/// One slice of the local file.
#[derive(Clone, Debug)]
struct ChunkPlan {
    offset: u64,
    size: usize,
    hash: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let Cli { server, command } = Cli::parse();
    let client = ApiClient::new(&server)?;

    match command {
        Commands::Push {
            file,
            strategy,
            chunk_size,
            parallel,
            target_name,
            namespace,
            relative_path,
            retries,
        } => {
            let options = PushOptions {
                chunk_size,
                parallel: parallel.max(1),
                retries,
            };
            let target_name = match target_name {
                Some(name) => name,
                None => local_file_name(&file)?,
            };
            match strategy {
                Strategy::Offset => push_offset(&client, &file, &target_name, &options).await,
                Strategy::Delegated => {
                    push_delegated(
                        &client,
                        &file,
                        StartUploadRequest {
                            file_name: target_name,
                            namespace,
                            relative_path,
                            ..Default::default()
                        },
                        &options,
                    )
                    .await
                }
            }
        }
        Commands::Status { upload_id } => handle_status_command(&client, &upload_id).await,
        Commands::Health => handle_health_command(&client).await,
    }
}

struct PushOptions {
    chunk_size: u64,
    parallel: usize,
    retries: u32,
}

fn local_file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("cannot derive a target name from {}", path.display()))
}

/// Split the file into fixed-size chunks and hash each one.
async fn plan_chunks(path: &Path, chunk_size: u64) -> Result<(u64, Vec<ChunkPlan>)> {
    if chunk_size == 0 {
        anyhow::bail!("chunk size must be greater than 0");
    }
    let chunk_size = usize::try_from(chunk_size)
        .map_err(|_| anyhow::anyhow!("chunk size exceeds platform limits"))?;

    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut buf = vec![0u8; chunk_size];
    let mut plans = Vec::new();
    let mut offset = 0u64;

    loop {
        let filled = read_full(&mut file, &mut buf).await?;
        if filled == 0 {
            break;
        }
        plans.push(ChunkPlan {
            offset,
            size: filled,
            hash: hex::encode(Sha256::digest(&buf[..filled])),
        });
        offset += filled as u64;
        if filled < chunk_size {
            break;
        }
    }

    Ok((offset, plans))
}

/// Fill `buf` from `file`, stopping early only at end of file.
async fn read_full(file: &mut tokio::fs::File, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

async fn push_offset(
    client: &ApiClient,
    path: &Path,
    target_name: &str,
    options: &PushOptions,
) -> Result<()> {
    let (total, plans) = plan_chunks(path, options.chunk_size).await?;
    info!(file = %path.display(), target_file = target_name, chunks = plans.len(), "offset upload");

    if plans.is_empty() {
        // Creates the target so empty files still land.
        client.upload_at_offset(target_name, 0, Vec::new()).await?;
    }

    let mut file = tokio::fs::File::open(path).await?;
    let mut in_flight = FuturesUnordered::new();

    for plan in &plans {
        let mut data = vec![0u8; plan.size];
        file.read_exact(&mut data).await?;

        let offset = plan.offset;
        let retries = options.retries;
        in_flight.push(async move {
            with_retries(retries, || {
                client.upload_at_offset(target_name, offset, data.clone())
            })
            .await
            .with_context(|| format!("chunk at offset {offset} failed"))?;
            debug!(offset, "chunk written");
            Ok::<_, anyhow::Error>(())
        });

        if in_flight.len() >= options.parallel
            && let Some(result) = in_flight.next().await
        {
            result?;
        }
    }

    while let Some(result) = in_flight.next().await {
        result?;
    }

    println!("Uploaded {target_name} ({total} bytes, {} chunks)", plans.len());
    Ok(())
}

async fn push_delegated(
    client: &ApiClient,
    path: &Path,
    mut request: StartUploadRequest,
    options: &PushOptions,
) -> Result<()> {
    let (total, plans) = plan_chunks(path, options.chunk_size).await?;
    request.file_size = total;
    request.chunk_hashes = plans.iter().map(|plan| plan.hash.clone()).collect();

    let registered = client.start_upload(&request).await?;
    let upload_id = registered.upload_id;
    println!("Upload ID: {upload_id}");
    info!(%upload_id, chunks = plans.len(), "registered delegated upload");

    let mut file = tokio::fs::File::open(path).await?;
    let mut seen = HashSet::new();
    let mut in_flight = FuturesUnordered::new();

    for plan in &plans {
        let mut data = vec![0u8; plan.size];
        file.read_exact(&mut data).await?;

        // Repeated content shares one object and one confirmation.
        if !seen.insert(plan.hash.clone()) {
            continue;
        }

        let hash = plan.hash.clone();
        let retries = options.retries;
        in_flight.push(async move {
            let signed_url = with_retries(retries, || client.get_signed_url(&upload_id, &hash))
                .await
                .with_context(|| format!("signing chunk {hash} failed"))?;
            with_retries(retries, || client.put_signed(&signed_url, data.clone()))
                .await
                .with_context(|| format!("chunk {hash} failed"))?;
            with_retries(retries, || client.confirm_chunk(&upload_id, &hash))
                .await
                .with_context(|| format!("confirming chunk {hash} failed"))?;
            debug!(%hash, "chunk confirmed");
            Ok::<_, anyhow::Error>(())
        });

        if in_flight.len() >= options.parallel
            && let Some(result) = in_flight.next().await
        {
            result?;
        }
    }

    while let Some(result) = in_flight.next().await {
        result?;
    }

    let status = client.get_upload(&upload_id).await?;
    println!(
        "Uploaded {} version {} ({total} bytes, {}/{} chunks, {})",
        status.upload.file_name,
        status.upload.version,
        status.completed_chunks,
        status.total_chunks,
        status.upload.status
    );
    Ok(())
}

/// Run `make_request` until it succeeds, backing off 1s, 2s, 4s between attempts.
async fn with_retries<F, Fut, T>(retries: u32, mut make_request: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match make_request().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt > retries {
                    return Err(e);
                }
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                eprintln!("  Request error ({e}), retrying in {}s...", delay.as_secs());
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn handle_status_command(client: &ApiClient, upload_id: &str) -> Result<()> {
    let upload_id = UploadId::parse(upload_id)?;
    let status = client.get_upload(&upload_id).await?;
    let upload = &status.upload;

    println!("Upload ID: {}", upload.upload_id);
    println!("File: {}", upload.logical_path());
    println!("Version: {}", upload.version);
    println!("Size: {} bytes", upload.file_size);
    println!("Status: {}", upload.status);
    println!(
        "Chunks: {}/{} completed",
        status.completed_chunks, status.total_chunks
    );
    for chunk in &status.chunks {
        println!(
            "  [{}] {} {}",
            chunk.chunk_index, chunk.chunk_hash, chunk.status
        );
    }
    Ok(())
}

async fn handle_health_command(client: &ApiClient) -> Result<()> {
    let health = client.health().await?;

    println!("Status: {}", health.status);
    println!("Server version: {}", health.version);
    println!("Client version: {}", env!("CARGO_PKG_VERSION"));

    if health.version != env!("CARGO_PKG_VERSION") {
        eprintln!(
            "Warning: version mismatch (server: {}, client: {})",
            health.version,
            env!("CARGO_PKG_VERSION")
        );
    }
    Ok(())
}
