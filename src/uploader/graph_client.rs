use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::config::{ConflictBehavior, UploaderConfig};
use crate::errors::{AppError, AppResult};
use crate::security::encode_path_segment;

use super::auth::AccessToken;
use super::chunks::Chunk;
use super::retry::{send_with_retry, RetryPolicy};

const CLIENT_REQUEST_ID: &str = "client-request-id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub id: String,
    pub display_name: Option<String>,
    pub web_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Drive {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub drive_type: Option<String>,
    pub web_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UploadSession {
    pub upload_url: String,
    pub expiration: Option<DateTime<Utc>>,
    pub next_expected_ranges: Vec<String>,
}

impl UploadSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration.map_or(false, |expires| now >= expires)
    }
}

/// The file as Graph reports it once the last range is committed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub size: Option<u64>,
    pub web_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkResponse {
    /// 202: more ranges expected. Graph pushes the session expiry forward
    /// with each accepted range.
    Accepted {
        next_expected_ranges: Vec<String>,
        expiration: Option<DateTime<Utc>>,
    },
    /// 200/201: upload committed
    Completed(Option<DriveItem>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SiteDto {
    id: Option<String>,
    display_name: Option<String>,
    web_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveListDto {
    #[serde(default)]
    value: Vec<Drive>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadSessionDto {
    upload_url: Option<String>,
    expiration_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    next_expected_ranges: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NextRangesDto {
    expiration_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    next_expected_ranges: Vec<String>,
}

#[derive(Debug, Serialize)]
struct UploadSessionRequest {
    item: UploadSessionItem,
}

#[derive(Debug, Serialize)]
struct UploadSessionItem {
    #[serde(rename = "@microsoft.graph.conflictBehavior")]
    conflict_behavior: ConflictBehavior,
}

/// Microsoft Graph client for site, drive and upload-session calls
pub struct GraphClient {
    client: Client,
    base_url: String,
    retry_policy: RetryPolicy,
    request_id: String,
}

impl GraphClient {
    pub fn new(config: &UploaderConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("sharepoint-uploader/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.graph_base_url().to_string(),
            retry_policy: config.retry.clone(),
            request_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Sent as `client-request-id` on every Graph call of this run.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub async fn get_site(
        &self,
        token: &AccessToken,
        hostname: &str,
        site_name: &str,
    ) -> AppResult<Site> {
        let operation = "site lookup";
        let url = format!(
            "{}/sites/{}:/sites/{}",
            self.base_url,
            hostname.trim(),
            encode_path_segment(site_name.trim())
        );
        log::debug!("GET {}", url);

        let response = send_with_retry(&self.retry_policy, operation, || {
            self.client
                .get(&url)
                .bearer_auth(token.secret())
                .header(CLIENT_REQUEST_ID, &self.request_id)
                .send()
        })
        .await?;
        let dto: SiteDto = read_json(response, operation).await?;

        let id = dto
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::missing_field(operation, "id"))?;

        log::info!(
            "Resolved site {} ({})",
            dto.display_name.as_deref().unwrap_or(site_name),
            id
        );

        Ok(Site {
            id,
            display_name: dto.display_name,
            web_url: dto.web_url,
        })
    }

    pub async fn list_drives(&self, token: &AccessToken, site_id: &str) -> AppResult<Vec<Drive>> {
        let operation = "drive listing";
        let url = format!("{}/sites/{}/drives", self.base_url, site_id);
        log::debug!("GET {}", url);

        let response = send_with_retry(&self.retry_policy, operation, || {
            self.client
                .get(&url)
                .bearer_auth(token.secret())
                .header(CLIENT_REQUEST_ID, &self.request_id)
                .send()
        })
        .await?;
        let dto: DriveListDto = read_json(response, operation).await?;

        log::debug!("Site {} has {} drive(s)", site_id, dto.value.len());
        Ok(dto.value)
    }

    pub async fn create_upload_session(
        &self,
        token: &AccessToken,
        site_id: &str,
        drive_id: &str,
        item_path: &str,
        conflict_behavior: Option<ConflictBehavior>,
    ) -> AppResult<UploadSession> {
        let operation = "upload session creation";
        let url = format!(
            "{}/sites/{}/drives/{}/root:/{}:/createUploadSession",
            self.base_url, site_id, drive_id, item_path
        );
        log::debug!("POST {}", url);

        let body = conflict_behavior.map(|conflict_behavior| UploadSessionRequest {
            item: UploadSessionItem { conflict_behavior },
        });

        let response = send_with_retry(&self.retry_policy, operation, || {
            let request = self
                .client
                .post(&url)
                .bearer_auth(token.secret())
                .header(CLIENT_REQUEST_ID, &self.request_id);
            let request = match &body {
                Some(body) => request.json(body),
                None => request.header(CONTENT_LENGTH, 0u64),
            };
            request.send()
        })
        .await?;
        let dto: UploadSessionDto = read_json(response, operation).await?;

        let upload_url = dto
            .upload_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| AppError::missing_field(operation, "uploadUrl"))?;

        match dto.expiration_date_time {
            Some(expires) => log::info!("Upload session opened (expires {})", expires),
            None => log::info!("Upload session opened"),
        }
        log::debug!("Session expects ranges {:?}", dto.next_expected_ranges);

        Ok(UploadSession {
            upload_url,
            expiration: dto.expiration_date_time,
            next_expected_ranges: dto.next_expected_ranges,
        })
    }

    /// PUT one byte range to the pre-authenticated upload URL.
    ///
    /// No `Authorization` header is sent; Graph rejects it on upload URLs.
    pub async fn upload_chunk(
        &self,
        upload_url: &str,
        chunk: &Chunk,
        data: Bytes,
    ) -> AppResult<ChunkResponse> {
        let content_range = chunk.content_range();
        let operation = format!("chunk upload ({})", content_range);

        let response = send_with_retry(&self.retry_policy, &operation, || {
            self.client
                .put(upload_url)
                .header(CONTENT_LENGTH, data.len())
                .header(CONTENT_RANGE, content_range.as_str())
                .body(data.clone())
                .send()
        })
        .await?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        match status {
            202 => {
                let dto = serde_json::from_str::<NextRangesDto>(&text).unwrap_or_else(|e| {
                    log::debug!("Unreadable 202 body for {}: {}", content_range, e);
                    NextRangesDto {
                        expiration_date_time: None,
                        next_expected_ranges: Vec::new(),
                    }
                });
                Ok(ChunkResponse::Accepted {
                    next_expected_ranges: dto.next_expected_ranges,
                    expiration: dto.expiration_date_time,
                })
            }
            200 | 201 => {
                let item = serde_json::from_str::<DriveItem>(&text).ok();
                if item.is_none() {
                    log::debug!("Final chunk response carried no drive item");
                }
                Ok(ChunkResponse::Completed(item))
            }
            _ => Err(AppError::ChunkUploadFailed {
                start: chunk.start,
                end: chunk.end,
                status,
                body: text,
            }),
        }
    }
}

/// Pick the drive whose name matches `wanted`, ignoring case.
pub fn select_drive<'a>(drives: &'a [Drive], wanted: &str) -> AppResult<&'a Drive> {
    let wanted = wanted.trim();
    drives
        .iter()
        .find(|d| d.name.eq_ignore_ascii_case(wanted))
        .ok_or_else(|| AppError::DriveNotFound {
            wanted: wanted.to_string(),
            available: drives.iter().map(|d| d.name.clone()).collect(),
        })
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: Response,
    operation: &str,
) -> AppResult<T> {
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        return Err(AppError::graph(operation, status.as_u16(), text));
    }

    log::debug!(
        "{} response (first 300 chars): {}",
        operation,
        &text[..floor_char_boundary(&text, 300)]
    );
    Ok(serde_json::from_str(&text)?)
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    let mut idx = max;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
