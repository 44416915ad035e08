//! OneDrive client implementation.

use crate::auth::AuthProvider;
use crate::cache::IdentifierCache;
use crate::config::{AccountMode, OneDriveConfig};
use crate::errors::{OneDriveError, OneDriveResult};
use crate::root::RootDescriptor;
use crate::services::*;
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::types::{FileInfo, RemoteEntry};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

mod executor;
pub use executor::{encode_segment, map_error_response, parse_json, retry_after, RequestExecutor};

/// Path-oriented file store over a OneDrive account.
///
/// The client is cheap to share: all methods take `&self` and it can be used
/// from many tasks at once. [`detect_shared_storage`](Self::detect_shared_storage)
/// must complete before any other operation; until then they fail with
/// `RootNotResolved`.
pub struct OneDriveClient {
    ctx: Arc<DriveContext>,
    resolver: PathResolver,
    uploads: UploadManager,
    items: ItemOperations,
}

impl OneDriveClient {
    /// Creates a new client with the given configuration.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use integrations_onedrive::{OneDriveClient, OneDriveConfig, StaticTokenProvider};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = OneDriveConfig::builder()
    ///     .auth_provider(StaticTokenProvider::new("access-token"))
    ///     .build()?;
    ///
    /// let client = OneDriveClient::new(config)?;
    /// client.detect_shared_storage("backups").await?;
    /// let entries = client.list_entries("backups/chunks").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(config: OneDriveConfig) -> OneDriveResult<Self> {
        config.validate()?;

        let transport = ReqwestTransport::from_config(&config).map_err(|e| {
            OneDriveError::configuration(format!("Failed to create transport: {}", e))
        })?;

        Self::with_transport(config, Arc::new(transport))
    }

    /// Creates a client that sends every request through `transport`.
    pub fn with_transport(
        config: OneDriveConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> OneDriveResult<Self> {
        config.validate()?;

        let ctx = Arc::new(DriveContext::new(RequestExecutor::new(config, transport)));
        let resolver = PathResolver::new(ctx.clone());
        let uploads = UploadManager::new(ctx.clone(), resolver.clone());
        let items = ItemOperations::new(ctx.clone(), resolver.clone());

        Ok(Self {
            ctx,
            resolver,
            uploads,
            items,
        })
    }

    /// Creates a new client builder.
    pub fn builder() -> OneDriveClientBuilder {
        OneDriveClientBuilder::new()
    }

    /// Determines the root every path is relative to.
    ///
    /// In shared mode `root_name` names the folder shared with this account;
    /// otherwise it is ignored and the drive root is used. The first
    /// successful call fixes the root for the lifetime of the client.
    pub async fn detect_shared_storage(&self, root_name: &str) -> OneDriveResult<RootDescriptor> {
        let root = self
            .ctx
            .detector()
            .detect(self.ctx.executor(), root_name)
            .await?;
        Ok(root.clone())
    }

    /// The resolved root, if detection has run.
    pub fn root(&self) -> OneDriveResult<&RootDescriptor> {
        self.ctx.root()
    }

    /// Lists every entry of the directory at `dir_path`.
    pub async fn list_entries(&self, dir_path: &str) -> OneDriveResult<Vec<RemoteEntry>> {
        let root = self.ctx.root()?;
        let path = root.relative_path(dir_path);
        let dir = self.resolver.resolve_directory(root, &path).await?;
        self.resolver.lister().list_children(&path, &dir.id).await
    }

    /// Returns the metadata of `path`, or `None` if nothing is there.
    pub async fn get_file_info(&self, path: &str) -> OneDriveResult<Option<FileInfo>> {
        self.resolver.resolve(path).await
    }

    /// Creates the directory `name` inside `parent_path`. Idempotent.
    pub async fn create_directory(&self, parent_path: &str, name: &str) -> OneDriveResult<FileInfo> {
        self.resolver.create_directory(parent_path, name).await
    }

    /// Writes `content` to `path`, creating missing parent directories and
    /// replacing an existing file. `rate_limit_kbs` of `0` means unlimited.
    pub async fn upload_file(
        &self,
        path: &str,
        content: impl Into<Bytes>,
        rate_limit_kbs: u32,
    ) -> OneDriveResult<FileInfo> {
        self.uploads.upload_file(path, content.into(), rate_limit_kbs).await
    }

    /// Moves the item at `source_path` into the directory `dest_dir_path`.
    pub async fn move_file(&self, source_path: &str, dest_dir_path: &str) -> OneDriveResult<FileInfo> {
        self.items.move_file(source_path, dest_dir_path).await
    }

    /// Opens the content of the file at `path`.
    pub async fn download_file(&self, path: &str) -> OneDriveResult<DownloadStream> {
        self.items.download_file(path).await
    }

    /// Deletes the item at `path`.
    pub async fn delete_file(&self, path: &str) -> OneDriveResult<()> {
        self.items.delete_file(path).await
    }

    /// Gets the configuration.
    pub fn config(&self) -> &OneDriveConfig {
        self.ctx.executor().config()
    }

    /// Gets the identifier cache.
    pub fn cache(&self) -> &IdentifierCache {
        self.ctx.cache()
    }

    /// Gets the request executor (for advanced use cases).
    pub fn executor(&self) -> &RequestExecutor {
        self.ctx.executor()
    }
}

impl std::fmt::Debug for OneDriveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let config = self.config();
        f.debug_struct("OneDriveClient")
            .field("api_url", &config.api_url.as_str())
            .field("account_mode", &config.account_mode)
            .field("shared", &config.shared)
            .field("root", &self.ctx.root().ok())
            .finish()
    }
}

/// Builder for OneDriveClient.
pub struct OneDriveClientBuilder {
    config_builder: crate::config::OneDriveConfigBuilder,
    transport: Option<Arc<dyn HttpTransport>>,
}

impl OneDriveClientBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self {
            config_builder: OneDriveConfig::builder(),
            transport: None,
        }
    }

    /// Sets the authentication provider.
    pub fn auth_provider<A: AuthProvider + 'static>(mut self, provider: A) -> Self {
        self.config_builder = self.config_builder.auth_provider(provider);
        self
    }

    /// Sets the authentication provider from an Arc.
    pub fn auth_provider_arc(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.config_builder = self.config_builder.auth_provider_arc(provider);
        self
    }

    /// Sets the account mode.
    pub fn account_mode(mut self, mode: AccountMode) -> Self {
        self.config_builder = self.config_builder.account_mode(mode);
        self
    }

    /// Roots all paths at a folder shared with this account.
    pub fn shared(mut self, shared: bool) -> Self {
        self.config_builder = self.config_builder.shared(shared);
        self
    }

    /// Forces chunked uploads for every non-empty payload.
    pub fn test_mode(mut self, test_mode: bool) -> Self {
        self.config_builder = self.config_builder.test_mode(test_mode);
        self
    }

    /// Sets the API base URL.
    pub fn api_url(mut self, url: impl AsRef<str>) -> Self {
        self.config_builder = self.config_builder.api_url(url);
        self
    }

    /// Sets the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config_builder = self.config_builder.timeout(timeout);
        self
    }

    /// Sets the maximum number of retries.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config_builder = self.config_builder.max_retries(retries);
        self
    }

    /// Sets the retry policy.
    pub fn retry(mut self, retry: crate::resilience::RetryConfig) -> Self {
        self.config_builder = self.config_builder.retry(retry);
        self
    }

    /// Sets the upload chunk size.
    pub fn upload_chunk_size(mut self, size: usize) -> Self {
        self.config_builder = self.config_builder.upload_chunk_size(size);
        self
    }

    /// Sets the listing page size.
    pub fn page_size(mut self, size: u32) -> Self {
        self.config_builder = self.config_builder.page_size(size);
        self
    }

    /// Sets the user agent.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.user_agent(ua);
        self
    }

    /// Sends requests through a custom transport.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Builds the client.
    pub fn build(self) -> OneDriveResult<OneDriveClient> {
        let config = self.config_builder.build()?;
        match self.transport {
            Some(transport) => OneDriveClient::with_transport(config, transport),
            None => {
                info!(api_url = %config.api_url, "Creating OneDrive client");
                OneDriveClient::new(config)
            }
        }
    }
}

impl Default for OneDriveClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;
    use crate::errors::ConfigurationError;

    #[test]
    fn test_client_builder() {
        let result = OneDriveClient::builder()
            .auth_provider(StaticTokenProvider::new("token"))
            .timeout(Duration::from_secs(60))
            .build();

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_operations_need_root() {
        let client = OneDriveClient::builder()
            .auth_provider(StaticTokenProvider::new("token"))
            .build()
            .unwrap();

        assert!(client.root().is_err());
        let result = client.get_file_info("test").await;
        assert!(matches!(
            result,
            Err(OneDriveError::Configuration(ConfigurationError::RootNotResolved))
        ));
    }
}
