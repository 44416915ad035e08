//! Request executor with auth, resilience, and error handling.

use crate::auth::AuthProvider;
use crate::config::OneDriveConfig;
use crate::errors::{
    AuthenticationError, OneDriveError, OneDriveResult, ProtocolError, RequestError,
    ResourceError, TransientError,
};
use crate::pagination::{Page, PageIterator};
use crate::resilience::RetryExecutor;
use crate::transport::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, RequestBody, StreamingResponse,
};
use crate::types::{DriveItem, GraphErrorResponse, ItemList};
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Characters escaped inside a single URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b':')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Percent-encodes an item name or identifier for use as one path segment.
pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

/// Request executor that handles HTTP requests with authentication, resilience, and error mapping.
///
/// Every remote failure is classified here. Only transient failures are
/// retried; everything else surfaces on the first attempt.
pub struct RequestExecutor {
    config: OneDriveConfig,
    transport: Arc<dyn HttpTransport>,
    auth: Arc<dyn AuthProvider>,
    retry: RetryExecutor,
}

impl RequestExecutor {
    /// Creates a new request executor.
    pub fn new(config: OneDriveConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let auth = config.auth_provider.clone();
        let retry = RetryExecutor::new(config.retry.clone());
        Self {
            config,
            transport,
            auth,
            retry,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &OneDriveConfig {
        &self.config
    }

    /// Returns the retry executor shared by all calls.
    pub fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    /// Builds a full URL from a path relative to the API base.
    pub fn build_url(&self, path: &str) -> OneDriveResult<Url> {
        let path = path.trim_start_matches('/');

        self.config.api_url.join(path).map_err(|e| {
            OneDriveError::Request(RequestError::ValidationError(format!(
                "Invalid URL '{}': {}",
                path, e
            )))
        })
    }

    /// Validates an absolute continuation link.
    ///
    /// Links pointing anywhere but the configured API origin are rejected so
    /// the bearer token never leaves it.
    pub fn continuation_url(&self, link: &str) -> OneDriveResult<Url> {
        let url = Url::parse(link).map_err(|e| {
            OneDriveError::Protocol(ProtocolError::InvalidContinuation(format!(
                "Malformed continuation link '{}': {}",
                link, e
            )))
        })?;

        if url.origin() != self.config.api_url.origin() {
            return Err(OneDriveError::Protocol(ProtocolError::InvalidContinuation(
                format!("Continuation link leaves the API origin: {}", link),
            )));
        }

        Ok(url)
    }

    /// Creates a request carrying a JSON body.
    pub fn json_request<B: Serialize>(
        &self,
        method: HttpMethod,
        url: Url,
        body: &B,
    ) -> OneDriveResult<HttpRequest> {
        let payload = serde_json::to_vec(body).map_err(|e| {
            OneDriveError::Request(RequestError::ValidationError(format!(
                "Failed to serialize request body: {}",
                e
            )))
        })?;

        let content_type = HeaderValue::from_str(mime::APPLICATION_JSON.as_ref()).map_err(|e| {
            OneDriveError::Request(RequestError::ValidationError(format!(
                "Invalid content type: {}",
                e
            )))
        })?;

        let mut request = HttpRequest::new(method, url);
        request.headers.insert(CONTENT_TYPE, content_type);
        request.body = RequestBody::Bytes(Bytes::from(payload));
        Ok(request)
    }

    /// Executes an authenticated request, retrying transient failures.
    pub async fn execute(&self, request: HttpRequest) -> OneDriveResult<HttpResponse> {
        self.retry
            .execute(|| self.execute_once(request.clone()))
            .await
    }

    /// Executes an authenticated request and deserializes the JSON response.
    pub async fn execute_json<T: DeserializeOwned>(&self, request: HttpRequest) -> OneDriveResult<T> {
        let response = self.execute(request).await?;
        parse_json(&response.body)
    }

    /// Executes an authenticated request and returns the unread body.
    ///
    /// Only establishing the response is retried; once bytes flow, errors
    /// surface on the stream.
    pub async fn execute_streaming(&self, request: HttpRequest) -> OneDriveResult<StreamingResponse> {
        let request = &request;
        self.retry
            .execute(move || async move {
                let request = self.prepare(request.clone(), true).await?;
                debug!(method = ?request.method, url = %request.url, "Streaming request");

                let response = self.transport.send_streaming(request).await?;
                if response.status.is_success() {
                    return Ok::<_, OneDriveError>(response);
                }

                let response = response.into_response().await?;
                Err(map_error_response(&response))
            })
            .await
    }

    /// Sends one unauthenticated request and returns the response as-is.
    ///
    /// Upload session URLs are pre-authorized and their status codes carry
    /// protocol meaning, so the caller interprets the status itself.
    pub async fn send_unauthenticated(&self, request: HttpRequest) -> OneDriveResult<HttpResponse> {
        let request = self.prepare(request, false).await?;
        debug!(method = ?request.method, url = %request.url, "Sending request");
        Ok(self.transport.send(request).await?)
    }

    /// Fetches every item of a paginated item collection starting at `first`.
    pub async fn collect_items(&self, first: Url) -> OneDriveResult<Vec<DriveItem>> {
        let mut pages = PageIterator::new(|token: Option<String>| {
            let first = first.clone();
            async move {
                let url = match token {
                    Some(link) => self.continuation_url(&link)?,
                    None => first,
                };

                let list: ItemList = self
                    .execute_json(HttpRequest::new(HttpMethod::Get, url))
                    .await?;
                Ok::<_, OneDriveError>(Page::new(list.value, list.next_link))
            }
        });

        pages.collect_all().await
    }

    async fn execute_once(&self, request: HttpRequest) -> OneDriveResult<HttpResponse> {
        let request = self.prepare(request, true).await?;
        let method = request.method;
        let url = request.url.clone();

        debug!(method = ?method, url = %url, "Sending request");

        let response = self.transport.send(request).await?;

        if !response.status.is_success() {
            let error = map_error_response(&response);
            debug!(
                method = ?method,
                url = %url,
                status = response.status.as_u16(),
                error = %error,
                "Request failed"
            );
            return Err(error);
        }

        Ok(response)
    }

    async fn prepare(&self, mut request: HttpRequest, authenticated: bool) -> OneDriveResult<HttpRequest> {
        if authenticated {
            let token = self.auth.get_access_token().await?;
            request.headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&token.authorization_header()).map_err(|e| {
                    OneDriveError::Authentication(AuthenticationError::InvalidToken(format!(
                        "Invalid auth header: {}",
                        e
                    )))
                })?,
            );
        }

        request.headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.config.user_agent).map_err(|e| {
                OneDriveError::Request(RequestError::ValidationError(format!(
                    "Invalid user agent: {}",
                    e
                )))
            })?,
        );

        if request.timeout.is_none() {
            request.timeout = Some(self.config.timeout);
        }

        Ok(request)
    }
}

/// Deserializes a JSON response body.
pub fn parse_json<T: DeserializeOwned>(body: &[u8]) -> OneDriveResult<T> {
    serde_json::from_slice(body).map_err(|e| {
        OneDriveError::Protocol(ProtocolError::DeserializationError(format!(
            "Failed to deserialize response: {}",
            e
        )))
    })
}

/// Parses a `Retry-After` header given in seconds.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Maps an unsuccessful response to a domain error.
pub fn map_error_response(response: &HttpResponse) -> OneDriveError {
    let status = response.status;

    let detail = serde_json::from_slice::<GraphErrorResponse>(&response.body)
        .ok()
        .map(|body| body.error);

    let message = match &detail {
        Some(detail) if !detail.message.is_empty() => {
            format!("{}: {}", detail.code, detail.message)
        }
        Some(detail) => detail.code.clone(),
        None => format!(
            "HTTP {}: {}",
            status.as_u16(),
            String::from_utf8_lossy(&response.body)
        ),
    };

    let retry_after = retry_after(&response.headers);

    match status {
        StatusCode::BAD_REQUEST => {
            OneDriveError::Request(RequestError::ValidationError(message))
        }
        StatusCode::UNAUTHORIZED => {
            OneDriveError::Authentication(AuthenticationError::InvalidToken(message))
        }
        StatusCode::FORBIDDEN => {
            OneDriveError::Authentication(AuthenticationError::Forbidden(message))
        }
        StatusCode::NOT_FOUND => OneDriveError::Resource(ResourceError::NotFound(message)),
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
            OneDriveError::Resource(ResourceError::Conflict(message))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            warn!(retry_after = ?retry_after, "Request throttled");
            OneDriveError::Transient(TransientError::RateLimited {
                message,
                retry_after,
            })
        }
        // 509 Bandwidth Limit Exceeded is used by personal accounts.
        s if s == StatusCode::SERVICE_UNAVAILABLE || s.as_u16() == 509 => {
            warn!(status = s.as_u16(), retry_after = ?retry_after, "Service unavailable");
            OneDriveError::Transient(TransientError::ServiceUnavailable {
                message,
                retry_after,
            })
        }
        StatusCode::INTERNAL_SERVER_ERROR | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
            OneDriveError::Transient(TransientError::Server(message))
        }
        _ => OneDriveError::Protocol(ProtocolError::UnexpectedStatus {
            status: status.as_u16(),
            message,
        }),
    }
}
