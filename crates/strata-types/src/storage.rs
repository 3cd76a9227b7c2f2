//! Persisted record of a mounted storage.

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::path::{actual_mount_path, is_balance};

/// Field a listing is sorted by when the driver sorts locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderBy {
    Name,
    Size,
    Modified,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

/// Where directories go relative to files after sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExtractFolder {
    Front,
    Back,
}

/// How WebDAV clients are served file content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WebdavPolicy {
    #[default]
    Redirect,
    UseProxyUrl,
    NativeProxy,
}

/// Operational state of a storage.
///
/// `Error` carries the text of the last failed initialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageStatus {
    #[default]
    Work,
    Disabled,
    Error(String),
}

impl StorageStatus {
    pub fn is_work(&self) -> bool {
        matches!(self, StorageStatus::Work)
    }
}

impl std::fmt::Display for StorageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageStatus::Work => f.write_str("work"),
            StorageStatus::Disabled => f.write_str("disabled"),
            StorageStatus::Error(e) => f.write_str(e),
        }
    }
}

/// Local sort policy, only honoured by drivers that sort locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sort {
    pub order_by: Option<OrderBy>,
    pub order_direction: Option<OrderDirection>,
    pub extract_folder: Option<ExtractFolder>,
}

/// Download proxy policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Proxy {
    pub web_proxy: bool,
    pub webdav_policy: WebdavPolicy,
    pub proxy_range: bool,
    pub down_proxy_url: String,
}

impl Proxy {
    pub fn webdav_redirect(&self) -> bool {
        self.webdav_policy == WebdavPolicy::Redirect
    }

    pub fn webdav_proxy(&self) -> bool {
        self.webdav_policy == WebdavPolicy::UseProxyUrl
    }

    pub fn webdav_native(&self) -> bool {
        self.webdav_policy == WebdavPolicy::NativeProxy
    }
}

fn default_cache_expiration() -> u64 {
    30
}

/// One configured storage.
///
/// The `addition` object is the driver-specific configuration; the driver
/// deserializes it into its own type during init.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Storage {
    pub id: u64,
    pub mount_path: String,
    /// Tie-breaker among storages listed side by side; lower sorts first.
    pub order: i32,
    pub driver: String,
    /// Listing cache lifetime, in minutes.
    #[serde(default = "default_cache_expiration")]
    pub cache_expiration: u64,
    pub status: StorageStatus,
    pub addition: serde_json::Value,
    pub remark: String,
    pub modified: SystemTime,
    pub disabled: bool,
    pub enable_sign: bool,
    #[serde(flatten)]
    pub sort: Sort,
    #[serde(flatten)]
    pub proxy: Proxy,
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            id: 0,
            mount_path: String::new(),
            order: 0,
            driver: String::new(),
            cache_expiration: default_cache_expiration(),
            status: StorageStatus::Work,
            addition: serde_json::Value::Object(Default::default()),
            remark: String::new(),
            modified: SystemTime::UNIX_EPOCH,
            disabled: false,
            enable_sign: false,
            sort: Sort::default(),
            proxy: Proxy::default(),
        }
    }
}

impl Storage {
    pub fn new(mount_path: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            mount_path: mount_path.into(),
            driver: driver.into(),
            ..Default::default()
        }
    }

    pub fn with_addition(mut self, addition: serde_json::Value) -> Self {
        self.addition = addition;
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_cache_expiration(mut self, minutes: u64) -> Self {
        self.cache_expiration = minutes;
        self
    }

    /// Listing cache lifetime.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_expiration.saturating_mul(60))
    }

    pub fn is_balance(&self) -> bool {
        is_balance(&self.mount_path)
    }

    /// Mount path with any balance marker stripped.
    pub fn actual_mount_path(&self) -> &str {
        actual_mount_path(&self.mount_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_deserializes_with_defaults() {
        let json = serde_json::json!({
            "mount_path": "/media",
            "driver": "memory",
            "order_by": "size",
            "webdav_policy": "native_proxy",
        });
        let storage: Storage = serde_json::from_value(json).unwrap();
        assert_eq!(storage.mount_path, "/media");
        assert_eq!(storage.cache_expiration, 30);
        assert_eq!(storage.sort.order_by, Some(OrderBy::Size));
        assert!(storage.proxy.webdav_native());
        assert_eq!(storage.status, StorageStatus::Work);
    }

    #[test]
    fn test_cache_ttl_in_minutes() {
        let storage = Storage::new("/a", "memory").with_cache_expiration(2);
        assert_eq!(storage.cache_ttl(), Duration::from_secs(120));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(StorageStatus::Work.to_string(), "work");
        assert_eq!(StorageStatus::Error("token expired".into()).to_string(), "token expired");
    }

    #[test]
    fn test_order_by_strum_roundtrip() {
        assert_eq!("modified".parse::<OrderBy>().unwrap(), OrderBy::Modified);
        assert_eq!(ExtractFolder::Front.to_string(), "front");
    }
}
