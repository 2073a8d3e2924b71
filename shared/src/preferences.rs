use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::capabilities::{KeyNamespace, KeyValueStore, KvKey};
use crate::error::CoreError;

pub const THEME_KEY: &str = "theme";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

impl Theme {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
            Self::System => "system",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "light" => Some(Self::Light),
            "dark" => Some(Self::Dark),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn theme_key() -> Result<KvKey, CoreError> {
    Ok(KvKey::new(KeyNamespace::Settings, THEME_KEY)?)
}

/// Stored theme, or `System` when nothing usable is stored.
pub async fn load_theme(kv: &dyn KeyValueStore) -> Result<Theme, CoreError> {
    let stored = kv.get(&theme_key()?).await?;
    Ok(match stored.as_deref().map(|raw| (raw, Theme::parse(raw))) {
        Some((_, Some(theme))) => theme,
        Some((raw, None)) => {
            warn!(value = raw, "ignoring unknown theme preference");
            Theme::System
        }
        None => Theme::System,
    })
}

pub async fn save_theme(kv: &dyn KeyValueStore, theme: Theme) -> Result<(), CoreError> {
    kv.set(&theme_key()?, theme.as_str()).await?;
    Ok(())
}
