use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;

use sharepoint_uploader::config::{self, Credentials};
use sharepoint_uploader::errors::AppError;
use sharepoint_uploader::uploader::upload_file_to_sharepoint;

#[derive(Parser)]
#[command(
    version,
    about = "Upload a file to a SharePoint document library via Microsoft Graph",
    long_about = "sharepoint-uploader: authenticates with an Entra ID app registration (client credentials), resolves the configured SharePoint site and document library, and uploads the file through a Graph upload session in 320 KiB-aligned chunks.\n\nCredentials (required):\n  SHAREPOINT_CLIENT_ID, SHAREPOINT_CLIENT_SECRET, SHAREPOINT_TENANT_ID\n\nOptional overrides:\n  SHAREPOINT_HOSTNAME, SHAREPOINT_SITE_NAME, SHAREPOINT_DRIVE_NAME, SHAREPOINT_CHUNK_SIZE,\n  SHAREPOINT_CONFLICT_BEHAVIOR (rename|replace|fail), SHAREPOINT_MAX_RETRIES,\n  SHAREPOINT_REQUEST_TIMEOUT_SECS, SHAREPOINT_GRAPH_BASE_URL, SHAREPOINT_AUTHORITY_HOST, SHAREPOINT_SCOPE\n\nExample:\n  sharepoint-uploader --file ./report.pdf --folder \"Reports/2024\""
)]
struct Cli {
    /// Path to the file to upload
    #[arg(long, value_name = "PATH")]
    file: String,

    /// Destination folder, relative to the document library root
    #[arg(long, value_name = "PATH")]
    folder: String,

    /// JSON config file (defaults to <config dir>/sharepoint-uploader/config.json when present)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        match e.downcast_ref::<AppError>() {
            Some(err) if err.is_retryable() => {
                eprintln!("The failure looks transient. Re-running starts a new upload session.")
            }
            Some(err) if err.is_permanent() => {
                eprintln!("Fix the input or configuration before retrying.")
            }
            _ => {}
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = config::load_config(cli.config.as_deref()).context("failed to load configuration")?;
    let credentials = Credentials::from_env()?;

    let outcome = upload_file_to_sharepoint(&config, &credentials, &cli.file, &cli.folder)
        .await
        .with_context(|| format!("failed to upload {}", cli.file))?;

    println!(
        "✅ File uploaded successfully! {} ({} bytes) -> {}",
        outcome.file_name, outcome.bytes_uploaded, outcome.destination
    );
    if let Some(url) = outcome.item.as_ref().and_then(|i| i.web_url.as_deref()) {
        println!("{}", url);
    }
    Ok(())
}
