// Uploader module - resumable uploads into a SharePoint document library
//
// Token, site and drive resolution, upload session, then ordered byte ranges.

pub mod auth;
pub mod chunks;
pub mod graph_client;
pub mod progress_tracker;
pub mod retry;
pub mod upload_session;

pub use upload_session::{upload_file_to_sharepoint, UploadOutcome};
