use bytes::Bytes;
use chrono::Utc;
use tokio::io::AsyncReadExt;
use tokio::time::Duration;

use crate::config::{validate_config, Credentials, UploaderConfig};
use crate::errors::{AppError, AppResult};
use crate::security::{graph_item_path, InputValidator, SourceFile};

use super::auth::acquire_token;
use super::chunks::ChunkPlan;
use super::graph_client::{select_drive, ChunkResponse, DriveItem, GraphClient, UploadSession};
use super::progress_tracker::UploadProgress;

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    /// Present when Graph returned the created item with the final range.
    pub item: Option<DriveItem>,
    pub file_name: String,
    pub destination: String,
    pub bytes_uploaded: u64,
    pub chunks: u64,
    pub elapsed: Duration,
    pub request_id: String,
}

/// Upload `file_path` into `folder_path` of the configured site's document library.
///
/// Each run authenticates, resolves site and drive, opens a fresh upload
/// session and sends the file range by range. The first failed range aborts the
/// whole upload; the abandoned session expires server-side.
pub async fn upload_file_to_sharepoint(
    config: &UploaderConfig,
    credentials: &Credentials,
    file_path: &str,
    folder_path: &str,
) -> AppResult<UploadOutcome> {
    validate_config(config)?;
    let source = InputValidator::validate_source_file(file_path)?;
    let folder = InputValidator::normalize_folder_path(folder_path)?;
    let item_path = graph_item_path(&folder, &source.file_name);
    let plan = ChunkPlan::new(source.size, config.chunk_size)?;

    let client = GraphClient::new(config)?;
    log::info!(
        "Uploading {} ({} bytes, {} chunk(s)) to {}:/sites/{} [{}] /{} (request id {})",
        source.file_name,
        source.size,
        plan.chunk_count(),
        config.hostname,
        config.site_name,
        config.drive_name,
        folder,
        client.request_id()
    );

    let token = acquire_token(&client, config, credentials).await?;
    let site = client
        .get_site(&token, &config.hostname, &config.site_name)
        .await?;
    let drives = client.list_drives(&token, &site.id).await?;
    let drive = select_drive(&drives, &config.drive_name)?;
    log::info!("Using drive '{}' ({})", drive.name, drive.id);

    let mut session = client
        .create_upload_session(
            &token,
            &site.id,
            &drive.id,
            &item_path,
            config.conflict_behavior,
        )
        .await?;

    let (progress, item) = match transfer_chunks(&client, &mut session, &source, &plan).await {
        Ok(result) => result,
        Err(e) => {
            match session.expiration {
                Some(expires) => log::error!(
                    "Upload of {} aborted: {}. The upload session is abandoned and expires at {}",
                    source.file_name,
                    e,
                    expires
                ),
                None => log::error!("Upload of {} aborted: {}", source.file_name, e),
            }
            return Err(e);
        }
    };

    log::info!(
        "Uploaded {} ({} bytes in {} chunk(s), {:.1}s)",
        source.file_name,
        progress.bytes_sent(),
        progress.chunks_sent(),
        progress.elapsed().as_secs_f64()
    );

    let destination = if folder.is_empty() {
        source.file_name.clone()
    } else {
        format!("{}/{}", folder, source.file_name)
    };

    Ok(UploadOutcome {
        item,
        file_name: source.file_name,
        destination,
        bytes_uploaded: progress.bytes_sent(),
        chunks: progress.chunks_sent(),
        elapsed: progress.elapsed(),
        request_id: client.request_id().to_string(),
    })
}

/// Send every planned range in order. The size comes from the file's metadata
/// at validation time; a file that shrinks mid-upload fails with an IO error.
///
/// `session.expiration` follows the expiry Graph returns with each accepted range.
async fn transfer_chunks(
    client: &GraphClient,
    session: &mut UploadSession,
    source: &SourceFile,
    plan: &ChunkPlan,
) -> AppResult<(UploadProgress, Option<DriveItem>)> {
    let mut file = tokio::fs::File::open(&source.path).await?;
    let mut progress = UploadProgress::new(&source.file_name, plan.file_size(), plan.chunk_count());
    let mut item = None;

    for chunk in plan.chunks() {
        if session.is_expired(Utc::now()) {
            return Err(AppError::SessionExpired {
                expired_at: session
                    .expiration
                    .map(|e| e.to_rfc3339())
                    .unwrap_or_default(),
            });
        }

        let mut buffer = vec![0u8; chunk.size() as usize];
        file.read_exact(&mut buffer).await?;

        progress.chunk_started(&chunk);
        match client
            .upload_chunk(&session.upload_url, &chunk, Bytes::from(buffer))
            .await?
        {
            ChunkResponse::Accepted {
                next_expected_ranges,
                expiration,
            } => {
                log::debug!("Server expects next ranges {:?}", next_expected_ranges);
                if let Some(expires) = expiration {
                    session.expiration = Some(expires);
                }
                if chunk.is_last() {
                    log::warn!("Final range accepted but the server did not commit the file");
                }
            }
            ChunkResponse::Completed(created) => {
                if !chunk.is_last() {
                    return Err(AppError::EarlyCommit {
                        end: chunk.end,
                        total: chunk.total,
                    });
                }
                item = created;
            }
        }
        progress.chunk_completed(&chunk);
    }

    Ok((progress, item))
}
