use serde::de::DeserializeOwned;
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;

/// One build host entry from the `build_hosts` settings list.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BuildHost {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

/// Read-only view over the key/value settings bag the editor host exposes.
/// The bag itself is JSON shaped; typed accessors deserialize individual
/// entries and fall back to a default when a key is missing or malformed.
pub struct Settings {
    data: Value,
}

impl Settings {
    pub fn new(data: Value) -> Settings {
        Settings { data }
    }

    /// Parses a raw JSON settings document.
    pub fn from_str(raw: &str) -> Result<Settings, serde_json::Error> {
        Ok(Settings {
            data: serde_json::from_str(raw)?,
        })
    }

    /// Empty bag, for hosts with no settings at all.
    pub fn empty() -> Settings {
        Settings {
            data: Value::Object(Default::default()),
        }
    }

    /// Deserializes the value stored under `key`, if present and well formed.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// The configured build hosts. Missing or malformed entries yield an
    /// empty list rather than an error; a host with no build hosts simply has
    /// nowhere to build.
    pub fn build_hosts(&self) -> Vec<BuildHost> {
        self.get("build_hosts").unwrap_or_default()
    }

    /// Host-wide file exclusion patterns, merged into every folder entry.
    pub fn file_exclude_patterns(&self) -> Vec<String> {
        self.get("file_exclude_patterns").unwrap_or_default()
    }

    /// Host-wide folder exclusion patterns, merged into every folder entry.
    pub fn folder_exclude_patterns(&self) -> Vec<String> {
        self.get("folder_exclude_patterns").unwrap_or_default()
    }
}
