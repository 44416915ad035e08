//! Mock implementations for testing.
//!
//! [`FakeDrive`] is a stateful, in-memory stand-in for the OneDrive API that
//! plugs into the client through [`HttpTransport`](crate::transport::HttpTransport).
//! It keeps a real item tree, serves paginated listings, runs upload sessions
//! and can inject failures.

mod drive;

pub use drive::{Fault, FakeDrive, RecordedRequest, FAKE_API_URL, FAKE_UPLOAD_URL};

use crate::auth::StaticTokenProvider;
use crate::client::OneDriveClient;
use crate::config::{AccountMode, OneDriveConfig, UPLOAD_CHUNK_ALIGNMENT};
use crate::errors::OneDriveResult;
use crate::resilience::RetryConfig;
use std::sync::Arc;
use std::time::Duration;

/// Retry policy that keeps tests fast.
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(10),
        multiplier: 2.0,
        jitter: false,
    }
}

/// Creates a client wired to `drive`, using the smallest legal chunk size.
pub fn fake_client(
    drive: Arc<FakeDrive>,
    account_mode: AccountMode,
    shared: bool,
    test_mode: bool,
) -> OneDriveResult<OneDriveClient> {
    let config = OneDriveConfig::builder()
        .auth_provider(StaticTokenProvider::new(drive.token()))
        .account_mode(account_mode)
        .api_url(FAKE_API_URL)
        .shared(shared)
        .test_mode(test_mode)
        .upload_chunk_size(UPLOAD_CHUNK_ALIGNMENT)
        .retry(fast_retry(4))
        .build()?;

    OneDriveClient::with_transport(config, drive)
}
