//! Configuration for the OneDrive adapter.

use crate::auth::AuthProvider;
use crate::errors::{ConfigurationError, OneDriveError, OneDriveResult};
use crate::resilience::RetryConfig;
use std::sync::Arc;
use std::time::Duration;
use url::{Host, Url};

/// API base for personal accounts.
pub const PERSONAL_API_URL: &str = "https://api.onedrive.com/v1.0/";

/// API base for business accounts.
pub const BUSINESS_API_URL: &str = "https://graph.microsoft.com/v1.0/";

/// Upload session windows must be a multiple of this size (320 KiB).
pub const UPLOAD_CHUNK_ALIGNMENT: usize = 320 * 1024;

/// Default upload session window (10 MiB).
pub const DEFAULT_UPLOAD_CHUNK_SIZE: usize = 32 * UPLOAD_CHUNK_ALIGNMENT;

/// Largest payload accepted by a direct PUT (4 MiB).
pub const SIMPLE_UPLOAD_LIMIT: usize = 4 * 1024 * 1024;

/// Largest page the listing endpoint serves.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Which drive family the account belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccountMode {
    /// Consumer OneDrive.
    #[default]
    Personal,
    /// OneDrive for Business.
    Business,
}

impl AccountMode {
    /// Default API base URL for this account family.
    pub fn default_api_url(self) -> &'static str {
        match self {
            AccountMode::Personal => PERSONAL_API_URL,
            AccountMode::Business => BUSINESS_API_URL,
        }
    }

    /// Path of the account's own drive, relative to the API base.
    pub fn drive_path(self) -> &'static str {
        match self {
            AccountMode::Personal => "drive",
            AccountMode::Business => "me/drive",
        }
    }
}

/// Configuration for the OneDrive adapter.
#[derive(Clone)]
pub struct OneDriveConfig {
    /// Authentication provider.
    pub auth_provider: Arc<dyn AuthProvider>,

    /// Account family.
    pub account_mode: AccountMode,

    /// Whether the storage root is a folder shared into this account.
    pub shared: bool,

    /// Integration-test mode: every non-empty upload goes through an upload session.
    pub test_mode: bool,

    /// Base URL for the API (always ends with `/`).
    pub api_url: Url,

    /// Default timeout for requests.
    pub timeout: Duration,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Retry policy for transient failures.
    pub retry: RetryConfig,

    /// Upload session window size (multiple of 320 KiB).
    pub upload_chunk_size: usize,

    /// Payloads strictly below this size use a direct PUT.
    pub simple_upload_threshold: usize,

    /// Number of entries requested per listing page.
    pub page_size: u32,

    /// User agent string.
    pub user_agent: String,

    /// Pool configuration.
    pub pool: PoolConfig,
}

/// Connection pool configuration.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Maximum idle connections per host.
    pub max_idle_per_host: usize,

    /// Idle timeout.
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 10,
            idle_timeout: Some(Duration::from_secs(90)),
        }
    }
}

impl OneDriveConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> OneDriveConfigBuilder {
        OneDriveConfigBuilder::new()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> OneDriveResult<()> {
        if self.upload_chunk_size == 0 || self.upload_chunk_size % UPLOAD_CHUNK_ALIGNMENT != 0 {
            return Err(invalid("Upload chunk size must be a non-zero multiple of 320KiB"));
        }

        if self.simple_upload_threshold > SIMPLE_UPLOAD_LIMIT {
            return Err(invalid("Simple upload threshold cannot exceed 4MiB"));
        }

        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(invalid(format!(
                "Page size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        if self.retry.max_attempts == 0 {
            return Err(invalid("At least one attempt is required"));
        }

        if self.api_url.scheme() != "https" && !is_loopback(&self.api_url) {
            return Err(invalid("API URL must use HTTPS"));
        }

        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> OneDriveError {
    OneDriveError::Configuration(ConfigurationError::InvalidConfiguration(msg.into()))
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain == "localhost",
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// Builder for OneDriveConfig.
pub struct OneDriveConfigBuilder {
    auth_provider: Option<Arc<dyn AuthProvider>>,
    account_mode: AccountMode,
    shared: bool,
    test_mode: bool,
    api_url: Option<String>,
    timeout: Duration,
    connect_timeout: Duration,
    retry: RetryConfig,
    upload_chunk_size: usize,
    simple_upload_threshold: usize,
    page_size: u32,
    user_agent: Option<String>,
    pool: PoolConfig,
}

impl OneDriveConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self {
            auth_provider: None,
            account_mode: AccountMode::Personal,
            shared: false,
            test_mode: false,
            api_url: None,
            timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            upload_chunk_size: DEFAULT_UPLOAD_CHUNK_SIZE,
            simple_upload_threshold: SIMPLE_UPLOAD_LIMIT,
            page_size: MAX_PAGE_SIZE,
            user_agent: None,
            pool: PoolConfig::default(),
        }
    }

    /// Sets the authentication provider.
    pub fn auth_provider<A: AuthProvider + 'static>(mut self, provider: A) -> Self {
        self.auth_provider = Some(Arc::new(provider));
        self
    }

    /// Sets the authentication provider from an Arc.
    pub fn auth_provider_arc(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth_provider = Some(provider);
        self
    }

    /// Sets the account family.
    pub fn account_mode(mut self, mode: AccountMode) -> Self {
        self.account_mode = mode;
        self
    }

    /// Marks the storage root as a folder shared into the account.
    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    /// Enables integration-test mode.
    pub fn test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    /// Overrides the API base URL.
    pub fn api_url(mut self, url: impl AsRef<str>) -> Self {
        self.api_url = Some(url.as_ref().to_string());
        self
    }

    /// Sets the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the maximum number of attempts for transient failures.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.retry.max_attempts = retries;
        self
    }

    /// Sets the full retry policy.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the upload session window size (multiple of 320KiB).
    pub fn upload_chunk_size(mut self, size: usize) -> Self {
        self.upload_chunk_size = size;
        self
    }

    /// Sets the size below which uploads use a direct PUT.
    pub fn simple_upload_threshold(mut self, size: usize) -> Self {
        self.simple_upload_threshold = size;
        self
    }

    /// Sets the listing page size.
    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the user agent string.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Sets the pool configuration.
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> OneDriveResult<OneDriveConfig> {
        let auth_provider = self.auth_provider.ok_or_else(|| {
            OneDriveError::Configuration(ConfigurationError::MissingCredentials(
                "Authentication provider is required".to_string(),
            ))
        })?;

        let raw_url = self
            .api_url
            .unwrap_or_else(|| self.account_mode.default_api_url().to_string());
        let mut api_url =
            Url::parse(&raw_url).map_err(|e| invalid(format!("Invalid API URL {}: {}", raw_url, e)))?;
        if !api_url.path().ends_with('/') {
            let path = format!("{}/", api_url.path());
            api_url.set_path(&path);
        }

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("integrations-onedrive/{}", env!("CARGO_PKG_VERSION")));

        let config = OneDriveConfig {
            auth_provider,
            account_mode: self.account_mode,
            shared: self.shared,
            test_mode: self.test_mode,
            api_url,
            timeout: self.timeout,
            connect_timeout: self.connect_timeout,
            retry: self.retry,
            upload_chunk_size: self.upload_chunk_size,
            simple_upload_threshold: self.simple_upload_threshold,
            page_size: self.page_size,
            user_agent,
            pool: self.pool,
        };

        config.validate()?;

        Ok(config)
    }
}

impl Default for OneDriveConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
