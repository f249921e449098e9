use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identity::SubjectId;

/// The persisted session. Every key is string-valued on disk and all of them
/// are cleared together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(rename = "user_id", default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<SubjectId>,
    #[serde(rename = "user_name", default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(
        rename = "session_start",
        default,
        skip_serializing_if = "Option::is_none",
        with = "timestamp_millis"
    )]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, with = "bool_string")]
    pub policies_accepted: bool,
}

impl SessionRecord {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// File-backed key-value storage for [`SessionRecord`]. `None` path keeps the
/// record in memory only.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: Option<PathBuf>,
}

impl SessionStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Missing file means no session. A corrupt file is discarded.
    pub fn load(&self) -> SessionRecord {
        let Some(path) = &self.path else {
            return SessionRecord::default();
        };
        if !path.exists() {
            return SessionRecord::default();
        }
        match read_record(path) {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!("Discarding unreadable session file: {:#}", error);
                SessionRecord::default()
            }
        }
    }

    pub fn save(&self, record: &SessionRecord) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if record.is_empty() {
            return self.clear();
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let raw = toml::to_string(record).context("failed to serialize session")?;
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, raw).with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => {
                Err(error).with_context(|| format!("failed to remove {}", path.display()))
            }
        }
    }
}

fn read_record(path: &Path) -> Result<SessionRecord> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

mod timestamp_millis {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&ts.timestamp_millis().to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let millis: i64 = raw.trim().parse().map_err(de::Error::custom)?;
        Utc.timestamp_millis_opt(millis)
            .single()
            .map(Some)
            .ok_or_else(|| de::Error::custom("session_start out of range"))
    }
}

mod bool_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &bool, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(if *value { "true" } else { "false" })
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.trim().eq_ignore_ascii_case("true"))
    }
}
