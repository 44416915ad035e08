//! Path to identifier resolution and directory materialization.

use super::{DriveContext, EntryLister};
use crate::cache::join_path;
use crate::errors::{OneDriveError, OneDriveResult, RequestError, ResourceError};
use crate::root::RootDescriptor;
use crate::transport::HttpMethod;
use crate::types::{CreateFolderRequest, DriveItem, FileInfo};
use std::sync::Arc;
use tracing::{debug, info};

/// Walks slash-separated paths from the root, one segment at a time.
///
/// Each segment is looked up in the cache first; on a miss the parent is
/// listed, which caches every sibling at once.
#[derive(Clone)]
pub struct PathResolver {
    ctx: Arc<DriveContext>,
    lister: EntryLister,
}

impl PathResolver {
    /// Creates a new resolver.
    pub fn new(ctx: Arc<DriveContext>) -> Self {
        let lister = EntryLister::new(ctx.clone());
        Self { ctx, lister }
    }

    /// The lister used on cache misses.
    pub fn lister(&self) -> &EntryLister {
        &self.lister
    }

    /// Resolves a path to its metadata.
    ///
    /// Returns `None` when only the final segment is missing. A missing or
    /// non-directory intermediate segment fails with `PathNotFound`.
    pub async fn resolve(&self, path: &str) -> OneDriveResult<Option<FileInfo>> {
        let root = self.ctx.root()?;
        let path = root.relative_path(path);
        self.resolve_relative(root, &path).await
    }

    /// Resolves a root-relative path that must exist.
    pub async fn resolve_existing(&self, root: &RootDescriptor, path: &str) -> OneDriveResult<FileInfo> {
        self.resolve_relative(root, path).await?.ok_or_else(|| {
            OneDriveError::Resource(ResourceError::NotFound(format!("{} does not exist", path)))
        })
    }

    /// Resolves a root-relative path that must be an existing directory.
    pub async fn resolve_directory(&self, root: &RootDescriptor, path: &str) -> OneDriveResult<FileInfo> {
        let info = self.resolve_existing(root, path).await?;
        if !info.is_directory {
            return Err(OneDriveError::Request(RequestError::NotADirectory(
                path.to_string(),
            )));
        }
        Ok(info)
    }

    /// Creates `name` under `parent_path`.
    ///
    /// Succeeds without change when a directory of that name already exists;
    /// fails with `NameConflict` when a file occupies the name.
    pub async fn create_directory(&self, parent_path: &str, name: &str) -> OneDriveResult<FileInfo> {
        let root = self.ctx.root()?;
        let parent_path = root.relative_path(parent_path);
        self.create_relative(root, &parent_path, name).await
    }

    /// Makes sure every segment of the root-relative `path` exists as a
    /// directory.
    pub async fn ensure_directory(&self, root: &RootDescriptor, path: &str) -> OneDriveResult<FileInfo> {
        let mut current = root.info();
        let mut current_path = String::new();

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let next_path = join_path(&current_path, segment);
            current = match self.resolve_relative(root, &next_path).await? {
                Some(info) if info.is_directory => info,
                Some(_) => {
                    return Err(OneDriveError::Resource(ResourceError::NameConflict(format!(
                        "{} exists and is not a directory",
                        next_path
                    ))))
                }
                None => self.create_relative(root, &current_path, segment).await?,
            };
            current_path = next_path;
        }

        Ok(current)
    }

    /// Resolves a path already relative to `root`; no mount-name stripping
    /// happens here.
    pub async fn resolve_relative(&self, root: &RootDescriptor, path: &str) -> OneDriveResult<Option<FileInfo>> {
        if path.is_empty() {
            return Ok(Some(root.info()));
        }

        let cache = self.ctx.cache();
        if let Some(info) = cache.get(path) {
            return Ok(Some(info));
        }

        let segments: Vec<&str> = path.split('/').collect();
        let mut current = root.info();
        let mut current_path = String::new();

        for (index, segment) in segments.iter().enumerate() {
            let is_last = index + 1 == segments.len();
            let next_path = join_path(&current_path, segment);

            let found = match cache.get(&next_path) {
                Some(info) => Some(info),
                None => self
                    .lister
                    .list_children(&current_path, &current.id)
                    .await?
                    .iter()
                    .find(|entry| entry.name == *segment)
                    .map(FileInfo::from),
            };

            match found {
                Some(info) if is_last => return Ok(Some(info)),
                Some(info) if info.is_directory => current = info,
                Some(_) | None if !is_last => {
                    return Err(OneDriveError::Resource(ResourceError::PathNotFound(
                        path.to_string(),
                    )))
                }
                _ => return Ok(None),
            }

            current_path = next_path;
        }

        Ok(None)
    }

    async fn create_relative(
        &self,
        root: &RootDescriptor,
        parent_path: &str,
        name: &str,
    ) -> OneDriveResult<FileInfo> {
        if name.is_empty() || name.contains('/') {
            return Err(OneDriveError::Request(RequestError::ValidationError(format!(
                "Invalid directory name '{}'",
                name
            ))));
        }

        let parent_path = parent_path.to_string();
        let path = join_path(&parent_path, name);

        let parent = match self.resolve_relative(root, &parent_path).await? {
            Some(info) if info.is_directory => info,
            Some(_) => {
                return Err(OneDriveError::Request(RequestError::NotADirectory(parent_path)))
            }
            None => {
                return Err(OneDriveError::Resource(ResourceError::PathNotFound(parent_path)))
            }
        };

        let executor = self.ctx.executor();
        let url = self.ctx.item_url(root, &parent.id, "/children")?;
        let request = executor.json_request(HttpMethod::Post, url, &CreateFolderRequest::new(name))?;

        match executor.execute_json::<DriveItem>(request).await {
            Ok(item) => {
                let info = FileInfo {
                    id: item.id,
                    is_directory: true,
                    size: 0,
                };
                self.ctx.cache().insert(path.clone(), info.clone());
                info!(path = %path, item_id = %info.id, "Created directory");
                Ok(info)
            }
            Err(error) if error.is_conflict() => {
                debug!(path = %path, "Directory name already taken, checking existing item");
                let existing = self
                    .lister
                    .list_children(&parent_path, &parent.id)
                    .await?
                    .into_iter()
                    .find(|entry| entry.name == name)
                    .map(|entry| FileInfo::from(&entry));
                match existing {
                    Some(existing) if existing.is_directory => Ok(existing),
                    Some(_) => Err(OneDriveError::Resource(ResourceError::NameConflict(format!(
                        "{} exists and is not a directory",
                        path
                    )))),
                    None => Err(error),
                }
            }
            Err(error) => self.ctx.evict_on_not_found(&parent_path, Err(error)),
        }
    }
}
