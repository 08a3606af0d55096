//! # TFS CLI Entry Point
//!
//! Command-line front end for the TFS RESTful storage client. Reads and
//! writes local files; every storage call goes through [`TfsClient`].
//!
//! ## Usage
//!
//! ```bash
//! # Upload a file anonymously (prints name, size and URL as JSON)
//! tfs --appkey tfscom upload ./logo.png
//!
//! # Download it again, or just a byte range of it
//! tfs --appkey tfscom download T1abc.png -o logo.png
//! tfs --appkey tfscom download T1abc.png --offset 100 --size 50 > part.bin
//!
//! # Named files under a user id
//! tfs --appkey tfscom upload-file 320 docs/readme.txt ./README
//! tfs --appkey tfscom remove-file 320 docs/readme.txt
//!
//! # Inspect the service
//! tfs --appkey tfscom servers
//! ```
//!
//! ## Configuration
//!
//! Flags override the `TFS_*` environment variables (`TFS_APPKEY`,
//! `TFS_ROOT_SERVER`, `TFS_IMAGE_SERVERS`, `TFS_APP_LOCATION`,
//! `TFS_UPLOAD_TIMEOUT_MS`, `TFS_APPID`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use tfs_client::{ByteRange, ClientConfig, ClientEvent, RefreshOutcome, TfsClient};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;

/// Main CLI structure parsed from command-line arguments.
#[derive(FromArgs)]
/// TFS - command-line client for the TFS RESTful storage service
struct Cli {
    /// application key (overrides TFS_APPKEY)
    #[argh(option, short = 'k')]
    appkey: Option<String>,

    /// root directory server as host:port (overrides TFS_ROOT_SERVER)
    #[argh(option, short = 'r', long = "root")]
    root_server: Option<String>,

    /// public read replica host; repeat for several (overrides TFS_IMAGE_SERVERS)
    #[argh(option, long = "image-server")]
    image_servers: Vec<String>,

    /// path prefix of anonymous objects on the replicas (overrides TFS_APP_LOCATION)
    #[argh(option, long = "app-location")]
    app_location: Option<String>,

    /// known application id, skips the lookup (overrides TFS_APPID)
    #[argh(option, long = "appid")]
    appid: Option<String>,

    /// per-request timeout in milliseconds (overrides TFS_UPLOAD_TIMEOUT_MS)
    #[argh(option, long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// how long to wait for the client to become ready, in milliseconds
    #[argh(option, long = "connect-timeout-ms", default = "15000")]
    connect_timeout_ms: u64,

    #[argh(subcommand)]
    command: Commands,
}

/// Available CLI subcommands.
///
/// Commands that print JSON to stdout run without log output so they can be
/// piped into `jq` and friends.
#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Upload(UploadArgs),
    Download(DownloadArgs),
    Remove(RemoveArgs),
    Meta(MetaArgs),
    CreateFile(CreateFileArgs),
    UploadFile(UploadFileArgs),
    RemoveFile(RemoveFileArgs),
    Appid(AppidArgs),
    Servers(ServersArgs),
}

#[derive(FromArgs)]
#[argh(subcommand, name = "upload")]
/// store a local file under a server-generated name
struct UploadArgs {
    /// local file to upload
    #[argh(positional)]
    file: PathBuf,

    /// name whose extension becomes the object suffix; defaults to the file name
    #[argh(option, long = "name")]
    name: Option<String>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "download")]
/// fetch an anonymous object
struct DownloadArgs {
    /// server-generated object name
    #[argh(positional)]
    name: String,

    /// output file; stdout when omitted
    #[argh(option, short = 'o')]
    output: Option<PathBuf>,

    /// first byte to read
    #[argh(option, long = "offset")]
    offset: Option<u64>,

    /// number of bytes to read from the offset
    #[argh(option, long = "size")]
    size: Option<u64>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "remove")]
/// delete, hide or unhide an anonymous object
struct RemoveArgs {
    /// server-generated object name
    #[argh(positional)]
    name: String,

    /// hide flag: 1 hides, 0 unhides; omit to delete
    #[argh(option, long = "hide")]
    hide: Option<u8>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "meta")]
/// print the metadata record of an anonymous object
struct MetaArgs {
    /// server-generated object name
    #[argh(positional)]
    name: String,

    /// metadata type flag, 0 or 1
    #[argh(option, long = "type")]
    meta_type: Option<u8>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "create-file")]
/// create a named file, including missing parent directories
struct CreateFileArgs {
    /// user id owning the file
    #[argh(positional)]
    uid: String,

    /// file path under the user
    #[argh(positional)]
    filename: String,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "upload-file")]
/// create a named file and write a local file into it
struct UploadFileArgs {
    /// user id owning the file
    #[argh(positional)]
    uid: String,

    /// file path under the user
    #[argh(positional)]
    filename: String,

    /// local file to upload
    #[argh(positional)]
    file: PathBuf,

    /// write position inside the remote file
    #[argh(option, long = "offset")]
    offset: Option<u64>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "remove-file")]
/// delete a named file
struct RemoveFileArgs {
    /// user id owning the file
    #[argh(positional)]
    uid: String,

    /// file path under the user
    #[argh(positional)]
    filename: String,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "appid")]
/// print the application id of the appkey
struct AppidArgs {}

#[derive(FromArgs)]
#[argh(subcommand, name = "servers")]
/// print the storage agents announced by the root server
struct ServersArgs {}

impl Commands {
    /// Whether the command writes machine-readable output to stdout.
    fn prints_to_stdout(&self) -> bool {
        match self {
            Commands::Download(args) => args.output.is_none(),
            Commands::Upload(_)
            | Commands::Meta(_)
            | Commands::UploadFile(_)
            | Commands::Appid(_)
            | Commands::Servers(_) => true,
            Commands::Remove(_) | Commands::CreateFile(_) | Commands::RemoveFile(_) => false,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    if !cli.command.prints_to_stdout() {
        // Set default log level to INFO, but allow RUST_LOG env var to override
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = load_config(&cli)?;
    let client = TfsClient::new(config).await?;

    // server listing only needs the pool, not the application id
    if !matches!(cli.command, Commands::Servers(_)) {
        tokio::time::timeout(
            Duration::from_millis(cli.connect_timeout_ms),
            client.wait_ready(),
        )
        .await
        .map_err(|_| {
            anyhow::anyhow!(
                "Client not ready after {}ms, is {} reachable?",
                cli.connect_timeout_ms,
                client.config().root_server
            )
        })??;
    }

    match cli.command {
        Commands::Upload(args) => {
            let content = read_content(&args.file).await?;
            let name = match args.name {
                Some(name) => name,
                None => source_name(&args.file),
            };
            let info = client.upload(&name, content, None).await?;
            println!("{}", serde_json::to_string(&info)?);
        }
        Commands::Download(args) => {
            let range = byte_range(args.offset, args.size);
            match &args.output {
                Some(path) => {
                    let mut file = tokio::fs::File::create(path)
                        .await
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    let written = client.download(&args.name, &mut file, range, None).await?;
                    file.flush().await?;
                    tracing::info!("Wrote {} bytes to {}", written, path.display());
                }
                None => {
                    let mut stdout = tokio::io::stdout();
                    download_into(&client, &args.name, &mut stdout, range).await?;
                }
            }
        }
        Commands::Remove(args) => {
            client.remove(&args.name, args.hide, None).await?;
            tracing::info!("Removed {}", args.name);
        }
        Commands::Meta(args) => {
            let meta = client.get_meta(&args.name, args.meta_type, None).await?;
            println!("{}", serde_json::to_string(&meta)?);
        }
        Commands::CreateFile(args) => {
            client.create_file(&args.uid, &args.filename, None).await?;
            tracing::info!("Created {} for user {}", args.filename, args.uid);
        }
        Commands::UploadFile(args) => {
            let content = read_content(&args.file).await?;
            let info = client
                .upload_file(&args.uid, &args.filename, content, args.offset, None)
                .await?;
            println!("{}", serde_json::to_string(&info)?);
        }
        Commands::RemoveFile(args) => {
            client.remove_file(&args.uid, &args.filename, None).await?;
            tracing::info!("Removed {} for user {}", args.filename, args.uid);
        }
        Commands::Appid(_) => {
            let appid = match client.appid() {
                Some(appid) => appid.to_string(),
                None => client.get_appid(None).await?,
            };
            println!("{}", appid);
        }
        Commands::Servers(_) => {
            run_servers(&client, Duration::from_millis(cli.connect_timeout_ms)).await?
        }
    }

    Ok(())
}

/// Builds the client configuration: environment first, then flags.
fn load_config(cli: &Cli) -> Result<ClientConfig> {
    config_from_lookup(cli, |key| std::env::var(key).ok())
}

/// `--appkey` stands in for a missing `TFS_APPKEY`, so the other `TFS_*`
/// variables apply either way.
fn config_from_lookup(
    cli: &Cli,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ClientConfig> {
    let config = ClientConfig::from_lookup(|key| match key {
        "TFS_APPKEY" => lookup(key).or_else(|| cli.appkey.clone()),
        _ => lookup(key),
    })
    .map_err(|e| match &cli.appkey {
        Some(_) => anyhow::anyhow!(e),
        None => anyhow::anyhow!("{} (pass --appkey or set TFS_APPKEY)", e),
    })?;
    Ok(apply_overrides(config, cli))
}

fn apply_overrides(mut config: ClientConfig, cli: &Cli) -> ClientConfig {
    if let Some(appkey) = &cli.appkey {
        config.appkey = appkey.clone();
    }
    if let Some(root) = &cli.root_server {
        config = config.with_root_server(root.clone());
    }
    if let Some(location) = &cli.app_location {
        config = config.with_app_location(location.clone());
    }
    if let Some(appid) = &cli.appid {
        config = config.with_appid(appid.clone());
    }
    if let Some(ms) = cli.timeout_ms {
        config = config.with_upload_timeout(Duration::from_millis(ms));
    }
    config.with_image_servers(cli.image_servers.clone())
}

/// Refreshes the pool once and prints it as a JSON array of `host:port`.
async fn run_servers(client: &TfsClient, wait: Duration) -> Result<()> {
    let mut events = client.subscribe();
    if client.refresh_servers().await == RefreshOutcome::InFlight {
        // the bootstrap poll is already asking the root server
        let _ = tokio::time::timeout(wait, async {
            loop {
                match events.recv().await {
                    Ok(ClientEvent::ServersUpdated(_)) | Ok(ClientEvent::RefreshFailed(_)) => break,
                    Err(broadcast::error::RecvError::Closed) => break,
                    _ => continue,
                }
            }
        })
        .await;
    }

    let servers: Vec<String> = client.servers().await.iter().map(|s| s.to_string()).collect();
    if servers.is_empty() {
        anyhow::bail!("No storage servers available from {}", client.config().root_server);
    }
    println!("{}", serde_json::to_string(&servers)?);
    Ok(())
}

async fn download_into<W>(
    client: &TfsClient,
    name: &str,
    sink: &mut W,
    range: Option<ByteRange>,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let written = client.download(name, sink, range, None).await?;
    sink.flush().await?;
    Ok(written)
}

async fn read_content(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

/// File name of `path`, used for its extension.
fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn byte_range(offset: Option<u64>, size: Option<u64>) -> Option<ByteRange> {
    match (offset, size) {
        (None, None) => None,
        (offset, size) => Some(ByteRange {
            offset: offset.unwrap_or(0),
            size,
        }),
    }
}
