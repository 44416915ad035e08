//! Complete directory listings.

use super::DriveContext;
use crate::errors::OneDriveResult;
use crate::types::RemoteEntry;
use std::sync::Arc;
use tracing::debug;

/// Turns the paginated children endpoint into one complete listing.
///
/// Listings are eager: every continuation link is followed before anything is
/// returned, and a failure on any page fails the whole call.
#[derive(Clone)]
pub struct EntryLister {
    ctx: Arc<DriveContext>,
}

impl EntryLister {
    /// Creates a new lister.
    pub fn new(ctx: Arc<DriveContext>) -> Self {
        Self { ctx }
    }

    /// Lists the children of the directory `dir_id` found at `dir_path`.
    ///
    /// `dir_path` must be relative to the root. On success the cached
    /// children of `dir_path` are replaced by the listing, unless the cache
    /// changed while the listing was in flight.
    pub async fn list_children(&self, dir_path: &str, dir_id: &str) -> OneDriveResult<Vec<RemoteEntry>> {
        let root = self.ctx.root()?;
        let page_size = self.ctx.executor().config().page_size;
        let url = self
            .ctx
            .item_url(root, dir_id, &format!("/children?$top={}", page_size))?;

        let observed = self.ctx.cache().generation();
        let result = self.ctx.executor().collect_items(url).await;
        let items = self.ctx.evict_on_not_found(dir_path, result)?;

        let entries: Vec<RemoteEntry> = items.into_iter().map(RemoteEntry::from).collect();
        let cached = self.ctx.cache().replace_children(dir_path, &entries, observed);

        debug!(
            path = %dir_path,
            item_id = %dir_id,
            count = entries.len(),
            cached = cached,
            "Listed directory"
        );

        Ok(entries)
    }
}
