//! Identifier-based move, delete and download.

use super::{DriveContext, PathResolver};
use crate::cache::{join_path, split_parent};
use crate::errors::{OneDriveError, OneDriveResult, RequestError};
use crate::transport::{ByteStream, HttpMethod, HttpRequest};
use crate::types::{DriveItem, FileInfo, MoveItemRequest};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use pin_project::pin_project;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::{debug, info};

/// Move, delete and download by path.
#[derive(Clone)]
pub struct ItemOperations {
    ctx: Arc<DriveContext>,
    resolver: PathResolver,
}

impl ItemOperations {
    /// Creates a new item service.
    pub fn new(ctx: Arc<DriveContext>, resolver: PathResolver) -> Self {
        Self { ctx, resolver }
    }

    /// Moves the item at `source_path` into the directory `dest_dir_path`,
    /// keeping its name.
    ///
    /// The item is re-parented in place; nothing is copied. Fails with a
    /// conflict if the destination already holds that name.
    pub async fn move_file(&self, source_path: &str, dest_dir_path: &str) -> OneDriveResult<FileInfo> {
        let root = self.ctx.root()?;
        let source_path = root.relative_path(source_path);
        let dest_dir_path = root.relative_path(dest_dir_path);
        if source_path.is_empty() {
            return Err(OneDriveError::Request(RequestError::ValidationError(
                "Cannot move the root".to_string(),
            )));
        }

        let source = self.resolver.resolve_existing(root, &source_path).await?;
        let dest = self.resolver.resolve_directory(root, &dest_dir_path).await?;

        let (source_parent, name) = split_parent(&source_path);
        let new_path = join_path(&dest_dir_path, name);
        if source_parent == dest_dir_path {
            debug!(path = %source_path, "Source already in destination");
            return Ok(source);
        }

        let executor = self.ctx.executor();
        let url = self.ctx.item_url(
            root,
            &source.id,
            "?@microsoft.graph.conflictBehavior=fail",
        )?;
        let request =
            executor.json_request(HttpMethod::Patch, url, &MoveItemRequest::to_parent(&dest.id))?;

        let result = executor.execute_json::<DriveItem>(request).await;
        let item = self.ctx.evict_on_not_found(&source_path, result)?;

        let info = FileInfo {
            id: if item.id.is_empty() { source.id.clone() } else { item.id },
            is_directory: source.is_directory,
            size: source.size,
        };

        let cache = self.ctx.cache();
        cache.remove_tree(&source_path);
        cache.insert(new_path.clone(), info.clone());

        info!(from = %source_path, to = %new_path, item_id = %info.id, "Moved item");
        Ok(info)
    }

    /// Deletes the item at `path`; directories go with their contents.
    pub async fn delete_file(&self, path: &str) -> OneDriveResult<()> {
        let root = self.ctx.root()?;
        let path = root.relative_path(path);
        if path.is_empty() {
            return Err(OneDriveError::Request(RequestError::ValidationError(
                "Cannot delete the root".to_string(),
            )));
        }

        let target = self.resolver.resolve_existing(root, &path).await?;

        let url = self.ctx.item_url(root, &target.id, "")?;
        let result = self
            .ctx
            .executor()
            .execute(HttpRequest::new(HttpMethod::Delete, url))
            .await;
        self.ctx.evict_on_not_found(&path, result)?;

        let removed = self.ctx.cache().remove_tree(&path);
        info!(path = %path, item_id = %target.id, evicted = removed, "Deleted item");
        Ok(())
    }

    /// Opens the content of the file at `path` as a stream.
    pub async fn download_file(&self, path: &str) -> OneDriveResult<DownloadStream> {
        let root = self.ctx.root()?;
        let path = root.relative_path(path);

        let target = self.resolver.resolve_existing(root, &path).await?;
        if target.is_directory {
            return Err(OneDriveError::Request(RequestError::ValidationError(format!(
                "{} is a directory",
                path
            ))));
        }

        let url = self.ctx.item_url(root, &target.id, "/content")?;
        let result = self
            .ctx
            .executor()
            .execute_streaming(HttpRequest::new(HttpMethod::Get, url))
            .await;
        let response = self.ctx.evict_on_not_found(&path, result)?;

        debug!(path = %path, item_id = %target.id, size = target.size, "Opened download");

        Ok(DownloadStream::new(response.body, target.size))
    }
}

/// Content of a downloaded file.
///
/// Dropping the stream, whether finished or not, releases the connection.
#[pin_project]
pub struct DownloadStream {
    #[pin]
    inner: ByteStream,
    size: u64,
}

impl DownloadStream {
    /// Wraps a response body of `size` bytes.
    pub fn new(inner: ByteStream, size: u64) -> Self {
        Self { inner, size }
    }

    /// Size of the file as recorded when it was resolved.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Adapts the stream to [`AsyncRead`].
    pub fn into_async_read(self) -> impl AsyncRead + Send + Unpin {
        StreamReader::new(self.map(|chunk| chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e))))
    }

    /// Reads the whole content into memory.
    pub async fn read_to_end(mut self) -> OneDriveResult<Bytes> {
        let mut buffer = BytesMut::with_capacity(self.size as usize);
        while let Some(chunk) = self.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }
}

impl Stream for DownloadStream {
    type Item = OneDriveResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project()
            .inner
            .poll_next(cx)
            .map(|chunk| chunk.map(|result| result.map_err(OneDriveError::from)))
    }
}

impl std::fmt::Debug for DownloadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadStream").field("size", &self.size).finish()
    }
}
