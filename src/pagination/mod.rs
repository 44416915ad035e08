//! Pagination handling for the OneDrive API.
//!
//! Listings are served in pages chained by an `@odata.nextLink` continuation
//! token. [`PageIterator::collect_all`] follows the chain to the end and
//! returns one materialized sequence; a failure on any page fails the whole
//! collection.

use crate::errors::{OneDriveError, OneDriveResult, ProtocolError};
use std::collections::HashSet;
use std::marker::PhantomData;

/// A page of results.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// The items in this page.
    pub items: Vec<T>,
    /// Token for the next page.
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    /// Creates a new page.
    pub fn new(items: Vec<T>, next_page_token: Option<String>) -> Self {
        Self {
            items,
            next_page_token,
        }
    }

    /// Returns true if there is a next page.
    pub fn has_next(&self) -> bool {
        self.next_page_token.is_some()
    }

    /// Returns the number of items in this page.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if this page is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Maps the items in this page to a different type.
    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            items: self.items.into_iter().map(f).collect(),
            next_page_token: self.next_page_token,
        }
    }
}

/// Iterator over all pages.
///
/// `fetch_fn` receives `None` for the first page and the previous page's
/// continuation token afterwards.
pub struct PageIterator<T, F, Fut>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: std::future::Future<Output = OneDriveResult<Page<T>>>,
{
    fetch_fn: F,
    next_token: Option<String>,
    seen_tokens: HashSet<String>,
    done: bool,
    _marker: PhantomData<T>,
}

impl<T, F, Fut> PageIterator<T, F, Fut>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: std::future::Future<Output = OneDriveResult<Page<T>>>,
{
    /// Creates a new page iterator.
    pub fn new(fetch_fn: F) -> Self {
        Self {
            fetch_fn,
            next_token: None,
            seen_tokens: HashSet::new(),
            done: false,
            _marker: PhantomData,
        }
    }

    /// Fetches the next page of results.
    pub async fn next_page(&mut self) -> OneDriveResult<Option<Page<T>>> {
        if self.done {
            return Ok(None);
        }

        let page = (self.fetch_fn)(self.next_token.take()).await?;

        match &page.next_page_token {
            Some(token) => {
                if !self.seen_tokens.insert(token.clone()) {
                    self.done = true;
                    return Err(OneDriveError::Protocol(ProtocolError::InvalidContinuation(
                        format!("continuation token repeated: {}", token),
                    )));
                }
                self.next_token = Some(token.clone());
            }
            None => self.done = true,
        }

        Ok(Some(page))
    }

    /// Collects all remaining items from all pages.
    pub async fn collect_all(&mut self) -> OneDriveResult<Vec<T>> {
        let mut all_items = Vec::new();

        while let Some(page) = self.next_page().await? {
            all_items.extend(page.items);
        }

        Ok(all_items)
    }

    /// Returns true if there are more pages to fetch.
    pub fn has_next(&self) -> bool {
        !self.done
    }
}
