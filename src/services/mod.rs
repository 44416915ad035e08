//! Path-level operations layered on the identifier-based API.
//!
//! Every operation resolves its path to an identifier, issues the remote call
//! and then updates the [`IdentifierCache`] to match the new remote state.

mod items;
mod listing;
mod resolver;
mod upload;

pub use items::*;
pub use listing::*;
pub use resolver::*;
pub use upload::*;

use crate::cache::IdentifierCache;
use crate::client::RequestExecutor;
use crate::errors::OneDriveResult;
use crate::root::{RootDescriptor, RootDetector};
use tracing::debug;
use url::Url;

/// State shared by all services of one client.
pub struct DriveContext {
    executor: RequestExecutor,
    cache: IdentifierCache,
    root: RootDetector,
}

impl DriveContext {
    /// Creates a context with an empty cache and no root resolved.
    pub fn new(executor: RequestExecutor) -> Self {
        Self {
            executor,
            cache: IdentifierCache::new(),
            root: RootDetector::new(),
        }
    }

    /// The request executor.
    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// The identifier cache.
    pub fn cache(&self) -> &IdentifierCache {
        &self.cache
    }

    /// The root detector.
    pub fn detector(&self) -> &RootDetector {
        &self.root
    }

    /// The resolved root; fails with `RootNotResolved` before detection.
    pub fn root(&self) -> OneDriveResult<&RootDescriptor> {
        self.root.get()
    }

    /// URL of `{item}{suffix}` in the root's drive.
    pub fn item_url(&self, root: &RootDescriptor, item_id: &str, suffix: &str) -> OneDriveResult<Url> {
        self.executor
            .build_url(&format!("{}{}", root.item_path(item_id), suffix))
    }

    /// Evicts `path` when a call against its cached identifier found nothing.
    pub fn evict_on_not_found<T>(&self, path: &str, result: OneDriveResult<T>) -> OneDriveResult<T> {
        if let Err(error) = &result {
            if error.is_not_found() {
                let removed = self.cache.remove_tree(path);
                debug!(path = %path, removed = removed, "Evicted stale identifier");
            }
        }
        result
    }
}
