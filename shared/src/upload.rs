//! Image upload to managed object storage.
//!
//! Files are checked locally (size, extension, sniffed content) before the
//! store is contacted, and stored under a fresh `<uuid>.<ext>` name so the
//! user's original file name never leaves the device.

use bytes::Bytes;
use image::ImageFormat;
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::capabilities::ObjectStore;
use crate::config::UploadConfig;
use crate::error::{BackendError, ErrorKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("file is empty")]
    Empty,

    #[error("file too large: {size} bytes, max {max}")]
    TooLarge { size: usize, max: usize },

    #[error("unsupported file type: {extension:?}")]
    UnsupportedFormat { extension: String },

    #[error("file content does not match .{extension} (detected {detected:?})")]
    ContentMismatch {
        extension: String,
        detected: Option<String>,
    },

    #[error("object store error: {0}")]
    Store(#[from] BackendError),

    #[error("object store returned an unusable public URL: {url}")]
    InvalidPublicUrl { url: String },
}

impl UploadError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(e) => e.kind(),
            Self::InvalidPublicUrl { .. } => ErrorKind::Internal,
            Self::Empty
            | Self::TooLarge { .. }
            | Self::UnsupportedFormat { .. }
            | Self::ContentMismatch { .. } => ErrorKind::Validation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub bucket: String,
    pub file_name: String,
    pub public_url: String,
    pub content_type: String,
}

/// Validates `bytes` and stores them in `bucket`.
#[instrument(skip(store, config, bytes), fields(size = bytes.len()))]
pub async fn upload_image(
    store: &dyn ObjectStore,
    config: &UploadConfig,
    bucket: &str,
    original_name: &str,
    bytes: Bytes,
) -> Result<UploadedFile, UploadError> {
    counter!("upload.requests").increment(1);

    let (extension, format) = match check(config, original_name, &bytes) {
        Ok(checked) => checked,
        Err(e) => {
            counter!("upload.rejected").increment(1);
            warn!(error = %e, "upload rejected");
            return Err(e);
        }
    };

    let file_name = format!("{}.{}", Uuid::new_v4(), extension);
    let content_type = format.to_mime_type();
    let public_url = store
        .upload(bucket, &file_name, bytes, content_type)
        .await?;

    if !is_web_url(&public_url) {
        warn!(url = %public_url, "discarding upload with unusable public URL");
        if let Err(e) = store.remove(bucket, &file_name).await {
            warn!(error = %e, "failed to remove orphaned upload");
        }
        return Err(UploadError::InvalidPublicUrl { url: public_url });
    }

    info!(bucket, file_name = %file_name, "upload stored");
    Ok(UploadedFile {
        bucket: bucket.to_string(),
        file_name,
        public_url,
        content_type: content_type.to_string(),
    })
}

fn check(
    config: &UploadConfig,
    original_name: &str,
    bytes: &[u8],
) -> Result<(String, ImageFormat), UploadError> {
    if bytes.is_empty() {
        return Err(UploadError::Empty);
    }
    if bytes.len() > config.max_bytes {
        return Err(UploadError::TooLarge {
            size: bytes.len(),
            max: config.max_bytes,
        });
    }

    let extension = original_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if !config.allowed_extensions.contains(&extension) {
        return Err(UploadError::UnsupportedFormat { extension });
    }
    let Some(declared) = ImageFormat::from_extension(&extension) else {
        return Err(UploadError::UnsupportedFormat { extension });
    };

    match image::guess_format(bytes) {
        Ok(detected) if detected == declared => Ok((extension, declared)),
        Ok(detected) => Err(UploadError::ContentMismatch {
            extension,
            detected: Some(detected.to_mime_type().to_string()),
        }),
        Err(_) => Err(UploadError::ContentMismatch {
            extension,
            detected: None,
        }),
    }
}

fn is_web_url(raw: &str) -> bool {
    url::Url::parse(raw)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}
