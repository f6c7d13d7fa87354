use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::errors::{AppError, AppResult};
use crate::uploader::chunks::{GRAPH_CHUNK_ALIGNMENT, GRAPH_MAX_CHUNK_SIZE};
use crate::uploader::retry::RetryPolicy;

pub const DEFAULT_HOSTNAME: &str = "bbrenergie03.sharepoint.com";
pub const DEFAULT_SITE_NAME: &str = "PRODUCTION";
pub const DEFAULT_DRIVE_NAME: &str = "Documents";
pub const DEFAULT_CHUNK_SIZE: u64 = 3_276_800; // 10 x 320 KiB
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
pub const DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";

pub const ENV_CLIENT_ID: &str = "SHAREPOINT_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "SHAREPOINT_CLIENT_SECRET";
pub const ENV_TENANT_ID: &str = "SHAREPOINT_TENANT_ID";

const CONFIG_DIR_NAME: &str = "sharepoint-uploader";

/// What Graph should do when the destination file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictBehavior {
    Rename,
    Replace,
    Fail,
}

impl ConflictBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictBehavior::Rename => "rename",
            ConflictBehavior::Replace => "replace",
            ConflictBehavior::Fail => "fail",
        }
    }
}

impl fmt::Display for ConflictBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictBehavior {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rename" => Ok(ConflictBehavior::Rename),
            "replace" => Ok(ConflictBehavior::Replace),
            "fail" => Ok(ConflictBehavior::Fail),
            _ => Err(AppError::validation(
                "conflict_behavior",
                "Must be 'rename', 'replace', or 'fail'",
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    pub hostname: String,
    pub site_name: String,
    pub drive_name: String,
    pub chunk_size: u64, // bytes
    pub graph_base_url: String,
    pub authority_host: String,
    pub scope: String,
    pub conflict_behavior: Option<ConflictBehavior>,
    pub request_timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            hostname: DEFAULT_HOSTNAME.to_string(),
            site_name: DEFAULT_SITE_NAME.to_string(),
            drive_name: DEFAULT_DRIVE_NAME.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            graph_base_url: DEFAULT_GRAPH_BASE_URL.to_string(),
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            conflict_behavior: None,
            request_timeout_secs: 120,
            retry: RetryPolicy::default(),
        }
    }
}

impl UploaderConfig {
    pub fn graph_base_url(&self) -> &str {
        self.graph_base_url.trim_end_matches('/')
    }

    pub fn token_url(&self, tenant_id: &str) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host.trim_end_matches('/'),
            tenant_id
        )
    }
}

/// App registration credentials for the client-credentials grant.
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var: &str| -> AppResult<String> {
            match lookup(var) {
                Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
                _ => Err(AppError::MissingCredential {
                    var: var.to_string(),
                }),
            }
        };

        Ok(Self {
            client_id: required(ENV_CLIENT_ID)?,
            client_secret: required(ENV_CLIENT_SECRET)?,
            tenant_id: required(ENV_TENANT_ID)?,
        })
    }
}

pub fn get_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join("config.json"))
}

/// Load configuration: defaults, then the JSON file, then environment overrides.
///
/// An explicit `path` must exist and parse. The per-user default file is optional
/// and falls back to defaults when it cannot be parsed.
pub fn load_config(path: Option<&Path>) -> AppResult<UploaderConfig> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// `load_config` with environment lookups supplied by the caller.
pub fn load_config_with<F>(path: Option<&Path>, lookup: F) -> AppResult<UploaderConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => match get_config_path() {
            Some(default_path) if default_path.exists() => read_config_file(&default_path)
                .unwrap_or_else(|e| {
                    log::warn!(
                        "Failed to read config file {}: {}. Using defaults.",
                        default_path.display(),
                        e
                    );
                    UploaderConfig::default()
                }),
            _ => UploaderConfig::default(),
        },
    };

    apply_env_overrides(&mut config, lookup)?;
    validate_config(&config)?;

    log::debug!(
        "Using site {}:/sites/{} drive '{}' chunk size {} bytes",
        config.hostname,
        config.site_name,
        config.drive_name,
        config.chunk_size
    );
    Ok(config)
}

pub fn read_config_file(path: &Path) -> AppResult<UploaderConfig> {
    if !path.exists() {
        return Err(AppError::file_not_found(&path.to_string_lossy()));
    }
    let config_str = fs::read_to_string(path)?;
    let config: UploaderConfig = serde_json::from_str(&config_str)?;
    log::info!("Loaded configuration from {}", path.display());
    Ok(config)
}

pub fn apply_env_overrides<F>(config: &mut UploaderConfig, lookup: F) -> AppResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("SHAREPOINT_HOSTNAME") {
        config.hostname = v;
    }
    if let Some(v) = get("SHAREPOINT_SITE_NAME") {
        config.site_name = v;
    }
    if let Some(v) = get("SHAREPOINT_DRIVE_NAME") {
        config.drive_name = v;
    }
    if let Some(v) = get("SHAREPOINT_CHUNK_SIZE") {
        config.chunk_size = parse_number("SHAREPOINT_CHUNK_SIZE", &v)?;
    }
    if let Some(v) = get("SHAREPOINT_GRAPH_BASE_URL") {
        config.graph_base_url = v;
    }
    if let Some(v) = get("SHAREPOINT_AUTHORITY_HOST") {
        config.authority_host = v;
    }
    if let Some(v) = get("SHAREPOINT_SCOPE") {
        config.scope = v;
    }
    if let Some(v) = get("SHAREPOINT_CONFLICT_BEHAVIOR") {
        config.conflict_behavior = Some(v.parse()?);
    }
    if let Some(v) = get("SHAREPOINT_REQUEST_TIMEOUT_SECS") {
        config.request_timeout_secs = parse_number("SHAREPOINT_REQUEST_TIMEOUT_SECS", &v)?;
    }
    if let Some(v) = get("SHAREPOINT_MAX_RETRIES") {
        config.retry.max_retries = parse_number("SHAREPOINT_MAX_RETRIES", &v)?;
    }

    Ok(())
}

fn parse_number<T: FromStr>(field: &str, value: &str) -> AppResult<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| AppError::validation(field, "Must be a non-negative integer"))
}

pub fn validate_config(config: &UploaderConfig) -> AppResult<()> {
    let hostname_pattern = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9.\-]*$")
        .map_err(|e| AppError::Config(e.to_string()))?;
    if !hostname_pattern.is_match(config.hostname.trim()) {
        return Err(AppError::validation(
            "hostname",
            "Must be a DNS host name such as contoso.sharepoint.com",
        ));
    }

    if config.site_name.trim().is_empty() {
        return Err(AppError::validation("site_name", "Cannot be empty"));
    }

    if config.drive_name.trim().is_empty() {
        return Err(AppError::validation("drive_name", "Cannot be empty"));
    }

    if config.chunk_size == 0 || config.chunk_size % GRAPH_CHUNK_ALIGNMENT != 0 {
        return Err(AppError::validation(
            "chunk_size",
            "Must be a positive multiple of 327680 bytes (320 KiB)",
        ));
    }

    if config.chunk_size > GRAPH_MAX_CHUNK_SIZE {
        return Err(AppError::validation(
            "chunk_size",
            "Must be at most 62914560 bytes (60 MiB)",
        ));
    }

    for (field, url) in [
        ("graph_base_url", &config.graph_base_url),
        ("authority_host", &config.authority_host),
    ] {
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(AppError::validation(field, "Must be an http(s) URL"));
        }
    }

    if config.scope.trim().is_empty() {
        return Err(AppError::validation("scope", "Cannot be empty"));
    }

    if config.request_timeout_secs == 0 {
        return Err(AppError::validation(
            "request_timeout_secs",
            "Must be greater than 0",
        ));
    }

    if config.retry.max_retries > 10 {
        return Err(AppError::validation(
            "retry.max_retries",
            "Must be 10 or fewer",
        ));
    }

    if config.retry.exponential_base < 1.0 {
        return Err(AppError::validation(
            "retry.exponential_base",
            "Must be at least 1.0",
        ));
    }

    Ok(())
}
