//! Effective root detection.
//!
//! Every path handled by the client is relative to one root item. For personal
//! and business accounts that is the drive root; in shared mode it is a folder
//! another user shared with this account, which lives in the owner's drive.
//! Detection runs once per client; the descriptor never changes afterwards.

use crate::cache::normalize_path;
use crate::client::{encode_segment, RequestExecutor};
use crate::config::AccountMode;
use crate::errors::{ConfigurationError, OneDriveError, OneDriveResult, ResourceError};
use crate::transport::{HttpMethod, HttpRequest};
use crate::types::{DriveItem, FileInfo};
use tokio::sync::OnceCell;
use tracing::info;

/// The resolved base all paths are relative to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootDescriptor {
    /// Account type the client talks to.
    pub account_mode: AccountMode,
    /// Whether the root is a folder shared from another drive.
    pub is_shared: bool,
    /// Identifier of the root item.
    pub root_id: String,
    /// Drive path prefix owning the root, e.g. `drive` or `drives/{id}`.
    pub drive_path: String,
    /// Name of the shared folder; a leading path segment with this name
    /// addresses the root itself.
    pub mount_name: Option<String>,
}

impl RootDescriptor {
    /// API path of an item in the root's drive.
    pub fn item_path(&self, item_id: &str) -> String {
        format!("{}/items/{}", self.drive_path, encode_segment(item_id))
    }

    /// Metadata of the root item itself.
    pub fn info(&self) -> FileInfo {
        FileInfo {
            id: self.root_id.clone(),
            is_directory: true,
            size: 0,
        }
    }

    /// Normalises `path` relative to the root.
    ///
    /// In shared mode a leading segment equal to the mount name is dropped, so
    /// `sharedtest/a` and `a` name the same item.
    pub fn relative_path(&self, path: &str) -> String {
        let path = normalize_path(path);
        match &self.mount_name {
            Some(mount) if path == *mount => String::new(),
            Some(mount) => match path.strip_prefix(mount.as_str()) {
                Some(rest) if rest.starts_with('/') => rest[1..].to_string(),
                _ => path,
            },
            None => path,
        }
    }
}

/// Resolves the root descriptor exactly once.
#[derive(Debug, Default)]
pub struct RootDetector {
    root: OnceCell<RootDescriptor>,
}

impl RootDetector {
    /// Creates a detector with no root resolved yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the resolved root, or `RootNotResolved`.
    pub fn get(&self) -> OneDriveResult<&RootDescriptor> {
        self.root
            .get()
            .ok_or(OneDriveError::Configuration(ConfigurationError::RootNotResolved))
    }

    /// Returns true once detection has succeeded.
    pub fn is_resolved(&self) -> bool {
        self.root.initialized()
    }

    /// Detects the root on first use and returns the cached descriptor
    /// afterwards. Concurrent first calls share a single detection; a failed
    /// detection leaves the detector unresolved.
    pub async fn detect(
        &self,
        executor: &RequestExecutor,
        root_name: &str,
    ) -> OneDriveResult<&RootDescriptor> {
        self.root
            .get_or_try_init(|| detect_root(executor, root_name))
            .await
    }
}

async fn detect_root(executor: &RequestExecutor, root_name: &str) -> OneDriveResult<RootDescriptor> {
    let config = executor.config();
    let account_mode = config.account_mode;
    let own_drive = account_mode.drive_path();

    if !config.shared {
        let url = executor.build_url(&format!("{}/root", own_drive))?;
        let item: DriveItem = executor
            .execute_json(HttpRequest::new(HttpMethod::Get, url))
            .await
            .map_err(|e| match e {
                OneDriveError::Resource(ResourceError::NotFound(msg)) => {
                    OneDriveError::Resource(ResourceError::RootNotFound(msg))
                }
                other => other,
            })?;

        info!(root_id = %item.id, account_mode = ?account_mode, "Resolved drive root");

        return Ok(RootDescriptor {
            account_mode,
            is_shared: false,
            root_id: item.id,
            drive_path: own_drive.to_string(),
            mount_name: None,
        });
    }

    let url = executor.build_url(&format!("{}/sharedWithMe", own_drive))?;
    let shared = executor.collect_items(url).await?;

    let folder = shared
        .into_iter()
        .find(|item| item.name == root_name && item.is_directory())
        .ok_or_else(|| {
            OneDriveError::Resource(ResourceError::RootNotFound(format!(
                "No shared folder named '{}'",
                root_name
            )))
        })?;

    let (root_id, drive_path) = match folder.remote_item {
        Some(remote) => {
            let drive_path = remote
                .parent_reference
                .and_then(|parent| parent.drive_id)
                .map(|drive_id| format!("drives/{}", encode_segment(&drive_id)))
                .unwrap_or_else(|| own_drive.to_string());
            (remote.id, drive_path)
        }
        None => (folder.id, own_drive.to_string()),
    };

    info!(
        root_id = %root_id,
        drive_path = %drive_path,
        name = %root_name,
        "Resolved shared root"
    );

    Ok(RootDescriptor {
        account_mode,
        is_shared: true,
        root_id,
        drive_path,
        mount_name: Some(root_name.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_detector() {
        let detector = RootDetector::new();
        assert!(!detector.is_resolved());
        assert!(matches!(
            detector.get(),
            Err(OneDriveError::Configuration(ConfigurationError::RootNotResolved))
        ));
    }

    #[test]
    fn test_item_path() {
        let root = RootDescriptor {
            account_mode: AccountMode::Personal,
            is_shared: true,
            root_id: "R!1".into(),
            drive_path: "drives/abc".into(),
            mount_name: Some("sharedtest".into()),
        };
        assert_eq!(root.item_path("X!2"), "drives/abc/items/X!2");
        assert_eq!(root.info().id, "R!1");
    }

    #[test]
    fn test_relative_path_strips_mount_name() {
        let mut root = RootDescriptor {
            account_mode: AccountMode::Business,
            is_shared: true,
            root_id: "R".into(),
            drive_path: "drives/abc".into(),
            mount_name: Some("sharedtest".into()),
        };
        assert_eq!(root.relative_path("sharedtest"), "");
        assert_eq!(root.relative_path("/sharedtest/test1/"), "test1");
        assert_eq!(root.relative_path("test1/a"), "test1/a");
        assert_eq!(root.relative_path("sharedtester/a"), "sharedtester/a");

        root.mount_name = None;
        assert_eq!(root.relative_path("sharedtest/test1"), "sharedtest/test1");
    }
}
