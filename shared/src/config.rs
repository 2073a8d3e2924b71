//! Core configuration, supplied by the shell as JSON.
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::model::Collection;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("JSON parse error: {0}")]
    Parse(String),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub buckets: BucketConfig,
    pub upload: UploadConfig,
    pub collection: CollectionConfig,
    pub validation: ValidationLimits,
}

/// Object-storage bucket per kind of image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    pub equipment: String,
    pub seeds: String,
    pub land: String,
    pub groups: String,
    pub forum: String,
    pub avatars: String,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            equipment: "equipment-images".into(),
            seeds: "seed-images".into(),
            land: "land-images".into(),
            groups: "group-images".into(),
            forum: "forum-images".into(),
            avatars: "avatars".into(),
        }
    }
}

impl BucketConfig {
    pub fn for_collection(&self, collection: Collection) -> &str {
        match collection {
            Collection::Equipment => &self.equipment,
            Collection::Seeds => &self.seeds,
            Collection::Land => &self.land,
            Collection::Groups => &self.groups,
            Collection::ForumPosts => &self.forum,
        }
    }

    fn all(&self) -> [&str; 6] {
        [
            &self.equipment,
            &self.seeds,
            &self.land,
            &self.groups,
            &self.forum,
            &self.avatars,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_bytes: usize,
    /// Lowercase extensions without the dot.
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: 5 * 1024 * 1024,
            allowed_extensions: vec![
                "jpg".into(),
                "jpeg".into(),
                "png".into(),
                "webp".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// How long a like toggle waits for a follow-up tap before sending.
    /// Zero still yields once so same-tick toggles coalesce.
    pub like_coalesce_window_ms: u64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            like_coalesce_window_ms: 300,
        }
    }
}

impl CollectionConfig {
    pub fn like_coalesce_window(&self) -> Duration {
        Duration::from_millis(self.like_coalesce_window_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationLimits {
    pub max_title_len: usize,
    pub max_description_len: usize,
    pub min_post_len: usize,
    pub max_post_len: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_title_len: 100,
            max_description_len: 2000,
            min_post_len: 10,
            max_post_len: 5000,
        }
    }
}

impl CoreConfig {
    /// Parses and validates. Missing sections take their defaults.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let cfg: CoreConfig = serde_json::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buckets.all().iter().any(|b| b.trim().is_empty()) {
            return Err(ConfigError::Invalid("bucket names must be non-empty"));
        }
        if self.upload.max_bytes == 0 {
            return Err(ConfigError::Invalid("upload.max_bytes must be > 0"));
        }
        if self.upload.allowed_extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "upload.allowed_extensions must not be empty",
            ));
        }
        if self
            .upload
            .allowed_extensions
            .iter()
            .any(|e| e.is_empty() || e.starts_with('.') || e.to_ascii_lowercase() != *e)
        {
            return Err(ConfigError::Invalid(
                "upload.allowed_extensions must be lowercase and without dots",
            ));
        }
        let v = &self.validation;
        if v.max_title_len == 0 || v.max_description_len == 0 {
            return Err(ConfigError::Invalid("validation limits must be > 0"));
        }
        if v.min_post_len > v.max_post_len {
            return Err(ConfigError::Invalid(
                "validation.min_post_len must not exceed max_post_len",
            ));
        }
        Ok(())
    }
}
