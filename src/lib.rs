//! OneDrive Storage Backend
//!
//! This crate lets a backup engine treat a OneDrive account as a plain
//! path-addressed file store. The service itself addresses items by opaque
//! identifiers, pages its listings and throttles aggressively; the client
//! hides all of that behind list, read, write, move and delete by path.
//!
//! # Features
//!
//! - **Path Resolution**: Paths are walked segment by segment and memoized in an
//!   identifier cache that every mutation keeps up to date
//! - **Complete Listings**: Continuation links are followed until the directory
//!   is exhausted; a failed page fails the listing
//! - **Uploads**: Direct PUT for small payloads, resumable sessions with
//!   per-window retry for large ones, overwrite on conflict, optional pacing
//! - **Move/Delete/Download**: Re-parenting without copies, recursive delete,
//!   streaming downloads
//! - **Account Types**: Personal, business, and folders shared by other users
//! - **Resilience**: Exponential backoff with jitter honouring `Retry-After`
//!
//! # Example
//!
//! ```no_run
//! use integrations_onedrive::{OneDriveClient, StaticTokenProvider};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = OneDriveClient::builder()
//!     .auth_provider(StaticTokenProvider::new("access-token"))
//!     .build()?;
//!
//! client.detect_shared_storage("backups").await?;
//! client.create_directory("", "backups").await?;
//! client.upload_file("backups/chunks/ab12", b"chunk".to_vec(), 0).await?;
//!
//! for entry in client.list_entries("backups/chunks").await? {
//!     println!("{} ({} bytes)", entry.name, entry.size);
//! }
//!
//! let content = client.download_file("backups/chunks/ab12").await?.read_to_end().await?;
//! assert_eq!(&content[..], b"chunk");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_inception)]

// Core modules
pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod errors;
pub mod pagination;
pub mod resilience;
pub mod root;
pub mod services;
pub mod transport;
pub mod types;

// Testing utilities
pub mod mocks;

// Re-exports for convenience
pub use auth::{AccessToken, AuthProvider, StaticTokenProvider};
pub use client::{OneDriveClient, OneDriveClientBuilder};
pub use config::{AccountMode, OneDriveConfig, OneDriveConfigBuilder};
pub use errors::{ErrorKind, OneDriveError, OneDriveResult};
pub use root::RootDescriptor;
pub use services::DownloadStream;
pub use types::{FileInfo, RemoteEntry};

/// Prelude module with commonly used types and traits.
///
/// ```no_run
/// use integrations_onedrive::prelude::*;
/// ```
pub mod prelude {
    // Client
    pub use crate::client::{OneDriveClient, OneDriveClientBuilder};

    // Configuration
    pub use crate::config::{AccountMode, OneDriveConfig, OneDriveConfigBuilder};

    // Authentication
    pub use crate::auth::{AccessToken, AuthProvider, StaticTokenProvider};

    // Results
    pub use crate::root::RootDescriptor;
    pub use crate::services::DownloadStream;
    pub use crate::types::{FileInfo, RemoteEntry};

    // Errors
    pub use crate::errors::{ErrorKind, OneDriveError, OneDriveResult};

    // Resilience
    pub use crate::resilience::RetryConfig;
}
