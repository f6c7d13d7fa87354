use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use std::path::{Path, PathBuf};

use crate::errors::{AppError, AppResult};

/// RFC 3986 unreserved characters stay as-is; everything else is escaped.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// A validated local file ready for upload.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
}

pub struct InputValidator;

impl InputValidator {
    pub fn validate_source_file(path: &str) -> AppResult<SourceFile> {
        if path.trim().is_empty() {
            return Err(AppError::validation("file", "File path cannot be empty"));
        }

        let path_obj = Path::new(path);
        if !path_obj.exists() {
            return Err(AppError::file_not_found(path));
        }
        if !path_obj.is_file() {
            return Err(AppError::validation("file", "Path is not a file"));
        }

        let file_name = path_obj
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| AppError::validation("file", "Path has no file name"))?;
        Self::validate_file_name(&file_name)?;

        let size = std::fs::metadata(path_obj)?.len();
        if size == 0 {
            return Err(AppError::EmptyFile {
                path: path.to_string(),
            });
        }

        Ok(SourceFile {
            path: path_obj.to_path_buf(),
            file_name,
            size,
        })
    }

    /// SharePoint rejects these characters in item names.
    pub fn validate_file_name(name: &str) -> AppResult<()> {
        let forbidden = Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#)
            .map_err(|e| AppError::Config(e.to_string()))?;

        if name.trim().is_empty() {
            return Err(AppError::validation("file", "File name cannot be empty"));
        }
        if forbidden.is_match(name) {
            return Err(AppError::validation(
                "file",
                "File name contains characters SharePoint does not allow",
            ));
        }
        if name.len() > 255 {
            return Err(AppError::validation(
                "file",
                "File name too long (max 255 characters)",
            ));
        }
        Ok(())
    }

    /// Normalise a destination folder relative to the drive root.
    ///
    /// Backslashes become slashes, empty segments are dropped, and an empty
    /// (or all-blank) result means the root of the drive. Segments are never
    /// trimmed: SharePoint would treat `"Reports "` as a different folder.
    pub fn normalize_folder_path(folder: &str) -> AppResult<String> {
        if folder.trim().is_empty() {
            return Ok(String::new());
        }

        let normalized = folder.replace('\\', "/");
        let mut segments = Vec::new();

        for segment in normalized.split('/') {
            if segment.is_empty() || segment == "." {
                continue;
            }
            if segment == ".." {
                return Err(AppError::validation(
                    "folder",
                    "Parent directory segments are not allowed",
                ));
            }
            if segment.trim() != segment {
                return Err(AppError::validation(
                    "folder",
                    "Folder names cannot start or end with whitespace",
                ));
            }
            if segment.chars().any(|c| c.is_control()) {
                return Err(AppError::validation(
                    "folder",
                    "Folder path contains control characters",
                ));
            }
            segments.push(segment);
        }

        Ok(segments.join("/"))
    }
}

pub fn encode_path_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

/// Encoded `folder/file` path used after `root:/` in drive item addressing.
pub fn graph_item_path(folder: &str, file_name: &str) -> String {
    folder
        .split('/')
        .filter(|s| !s.is_empty())
        .chain(std::iter::once(file_name))
        .map(encode_path_segment)
        .collect::<Vec<_>>()
        .join("/")
}
