use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::capabilities::KvError;
use crate::config::ConfigError;
use crate::model::{Collection, RecordId};
use crate::upload::UploadError;
use crate::validation::ValidationErrors;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Timeout,
    Authentication,
    Authorization,
    Validation,
    NotFound,
    Conflict,
    RateLimited,
    Internal,
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Authentication => "AUTH_ERROR",
            Self::Authorization => "FORBIDDEN",
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::Internal => "INTERNAL_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            0 => Self::Network,
            400 | 422 => Self::Validation,
            401 => Self::Authentication,
            403 => Self::Authorization,
            404 => Self::NotFound,
            408 | 504 => Self::Timeout,
            409 => Self::Conflict,
            429 => Self::RateLimited,
            500..=599 => Self::Internal,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::RateLimited | Self::Conflict
        )
    }
}

/// Failure reported by a hosted-service collaborator. `status` is HTTP-like;
/// `0` means the request never reached the service.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("backend error {status}: {message}")]
pub struct BackendError {
    pub status: u16,
    pub message: String,
}

impl BackendError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(0, message)
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::from_status(self.status)
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationKind {
    Delete,
    Like,
    Unlike,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Delete => "delete",
            Self::Like => "like",
            Self::Unlike => "unlike",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error("failed to load {collection}: {reason}")]
    Fetch {
        collection: Collection,
        status: Option<u16>,
        reason: String,
    },

    #[error("{op} of {id} failed and was rolled back: {source}")]
    Mutation {
        op: MutationKind,
        id: RecordId,
        #[source]
        source: BackendError,
    },

    #[error("not allowed to modify {}", .id.as_ref().map_or("listings", RecordId::as_str))]
    Forbidden { id: Option<RecordId> },

    #[error("record {id} is not in this list")]
    NotFound { id: RecordId },

    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),

    #[error("{0}")]
    Validation(#[from] ValidationErrors),

    #[error("storage error: {0}")]
    Storage(#[from] KvError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("offline")]
    Offline,

    #[error("view has been disposed")]
    Disposed,
}

impl CoreError {
    pub(crate) fn fetch(collection: Collection, err: &BackendError) -> Self {
        Self::Fetch {
            collection,
            status: Some(err.status),
            reason: err.message.clone(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Fetch { status: Some(s), .. } => ErrorKind::from_status(*s),
            Self::Fetch { status: None, .. } => ErrorKind::Internal,
            Self::Mutation { source, .. } => source.kind(),
            Self::Forbidden { .. } => ErrorKind::Authorization,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Upload(e) => e.kind(),
            Self::Validation(_) => ErrorKind::Validation,
            Self::Offline => ErrorKind::Network,
            Self::Storage(_) | Self::Config(_) | Self::Disposed => ErrorKind::Internal,
        }
    }

    /// Text the presentation layer shows. Local state has already been
    /// restored when this error is returned.
    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self {
            Self::Validation(errors) => errors.to_string(),
            Self::Forbidden { .. } => "You can only change listings you created.".into(),
            Self::Offline => {
                "You are offline. Please check your connection and try again.".into()
            }
            Self::Upload(UploadError::TooLarge { max, .. }) => format!(
                "The file is too large. Please use a file smaller than {} MB.",
                max.div_ceil(1024 * 1024)
            ),
            Self::Upload(UploadError::UnsupportedFormat { .. })
            | Self::Upload(UploadError::ContentMismatch { .. }) => {
                "This image format is not supported. Please use JPEG, PNG, or WebP.".into()
            }
            Self::Fetch { .. } => {
                "Could not refresh the list. Showing the last loaded items.".into()
            }
            other => match other.kind() {
                ErrorKind::Network => {
                    "Unable to connect. Please check your internet connection and try again."
                        .into()
                }
                ErrorKind::Timeout => "The request timed out. Please try again.".into(),
                ErrorKind::Authentication => {
                    "Your session has expired. Please sign in again.".into()
                }
                ErrorKind::Authorization => {
                    "You don't have permission to perform this action.".into()
                }
                ErrorKind::NotFound => "The item could not be found.".into(),
                ErrorKind::Conflict => {
                    "This item changed recently. Please refresh and try again.".into()
                }
                ErrorKind::RateLimited => {
                    "Too many requests. Please wait a moment and try again.".into()
                }
                ErrorKind::Validation | ErrorKind::Internal | ErrorKind::Unknown => {
                    "Something went wrong. Please try again.".into()
                }
            },
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
