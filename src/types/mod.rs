//! Type definitions for the OneDrive API and the adapter's public model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Adapter Types
// ============================================================================

/// One listed item of a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Item name, unique within its parent.
    pub name: String,
    /// Remote identifier.
    pub id: String,
    /// Whether the item is a directory.
    pub is_directory: bool,
    /// Size in bytes (0 for directories on some account types).
    pub size: u64,
}

impl From<DriveItem> for RemoteEntry {
    fn from(item: DriveItem) -> Self {
        let is_directory = item.is_directory();
        Self {
            name: item.name,
            id: item.id,
            is_directory,
            size: item.size,
        }
    }
}

/// Resolved metadata for a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Remote identifier.
    pub id: String,
    /// Whether the item is a directory.
    pub is_directory: bool,
    /// Size in bytes.
    pub size: u64,
}

impl From<&RemoteEntry> for FileInfo {
    fn from(entry: &RemoteEntry) -> Self {
        Self {
            id: entry.id.clone(),
            is_directory: entry.is_directory,
            size: entry.size,
        }
    }
}

// ============================================================================
// Drive Items
// ============================================================================

/// OneDrive item representation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    /// Item ID.
    pub id: String,

    /// Item name.
    #[serde(default)]
    pub name: String,

    /// Size in bytes.
    #[serde(default)]
    pub size: u64,

    /// Present when the item is a folder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<FolderFacet>,

    /// Present when the item is a file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileFacet>,

    /// Present when the item lives in another drive (shared items).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_item: Option<RemoteItem>,

    /// Parent reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_reference: Option<ItemReference>,

    /// Entity tag.
    #[serde(rename = "eTag", skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,

    /// Last modification time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified_date_time: Option<DateTime<Utc>>,
}

impl DriveItem {
    /// Returns true if the item, or the remote item it points to, is a folder.
    pub fn is_directory(&self) -> bool {
        self.folder.is_some()
            || self
                .remote_item
                .as_ref()
                .map_or(false, |remote| remote.folder.is_some())
    }
}

/// Folder facet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderFacet {
    /// Number of children.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_count: Option<u64>,
}

/// File facet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFacet {
    /// MIME type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// The target of a shared item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteItem {
    /// Item ID in the owning drive.
    pub id: String,

    /// Item name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Present when the target is a folder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<FolderFacet>,

    /// Location of the target, including its drive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_reference: Option<ItemReference>,
}

/// Reference to an item or its location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemReference {
    /// Drive ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drive_id: Option<String>,

    /// Item ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// One page of a children listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemList {
    /// Items in this page.
    #[serde(default)]
    pub value: Vec<DriveItem>,

    /// Continuation link for the next page.
    #[serde(rename = "@odata.nextLink", skip_serializing_if = "Option::is_none")]
    pub next_link: Option<String>,
}

/// Upload session state returned by the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSessionResponse {
    /// Pre-authorized URL receiving the windows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,

    /// Session expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_date_time: Option<DateTime<Utc>>,

    /// Byte ranges the service still expects, e.g. `["26-"]`.
    #[serde(default)]
    pub next_expected_ranges: Vec<String>,
}

impl UploadSessionResponse {
    /// Start offset of the first expected range.
    pub fn next_offset(&self) -> Option<u64> {
        self.next_expected_ranges
            .first()
            .and_then(|range| range.split('-').next())
            .and_then(|start| start.parse().ok())
    }
}

/// Error body returned by the service.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphErrorResponse {
    /// Error detail.
    pub error: GraphErrorDetail,
}

/// Error detail.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphErrorDetail {
    /// Machine-readable code, e.g. `itemNotFound`.
    #[serde(default)]
    pub code: String,

    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

// ============================================================================
// Request Types
// ============================================================================

/// How the service resolves a name collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictBehavior {
    /// Fail with 409.
    Fail,
    /// Replace the existing item.
    Replace,
    /// Pick a new name.
    Rename,
}

impl ConflictBehavior {
    /// Query-string form.
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictBehavior::Fail => "fail",
            ConflictBehavior::Replace => "replace",
            ConflictBehavior::Rename => "rename",
        }
    }
}

/// Request to create a folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFolderRequest {
    /// Folder name.
    pub name: String,

    /// Folder facet (empty).
    pub folder: FolderFacet,

    /// Collision handling.
    #[serde(rename = "@microsoft.graph.conflictBehavior")]
    pub conflict_behavior: ConflictBehavior,
}

impl CreateFolderRequest {
    /// Creates a request that fails on collision.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            folder: FolderFacet::default(),
            conflict_behavior: ConflictBehavior::Fail,
        }
    }
}

/// Request to change an item's parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveItemRequest {
    /// New parent.
    pub parent_reference: ItemReference,
}

impl MoveItemRequest {
    /// Creates a request moving the item under `parent_id`.
    pub fn to_parent(parent_id: impl Into<String>) -> Self {
        Self {
            parent_reference: ItemReference {
                drive_id: None,
                id: Some(parent_id.into()),
            },
        }
    }
}

/// Request to open an upload session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUploadSessionRequest {
    /// Item properties.
    pub item: UploadItemProperties,
}

/// Item properties of an upload session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadItemProperties {
    /// Collision handling.
    #[serde(rename = "@microsoft.graph.conflictBehavior")]
    pub conflict_behavior: ConflictBehavior,
}

impl CreateUploadSessionRequest {
    /// Creates a request that overwrites an existing item.
    pub fn replace() -> Self {
        Self {
            item: UploadItemProperties {
                conflict_behavior: ConflictBehavior::Replace,
            },
        }
    }
}
