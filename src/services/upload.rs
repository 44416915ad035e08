//! Uploads: one direct PUT for small payloads, a chunked session otherwise.
//!
//! # Session protocol
//! 1. `POST .../createUploadSession` returns a pre-authorized upload URL
//! 2. Windows go to the upload URL as `PUT` with `Content-Range`
//! 3. `202 Accepted` carries `nextExpectedRanges`; `200`/`201` carries the item
//! 4. On `416` the session status is queried with `GET` and the upload resumes
//!    from the first expected byte
//!
//! Each window is retried on its own when it fails transiently. The session
//! URL carries its own authorization, so no bearer token is sent to it.

use super::{DriveContext, PathResolver};
use crate::cache::split_parent;
use crate::client::{encode_segment, map_error_response, parse_json};
use crate::errors::{
    OneDriveError, OneDriveResult, ProtocolError, RequestError, ResourceError, UploadError,
};
use crate::resilience::UploadPacer;
use crate::root::RootDescriptor;
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, RequestBody};
use crate::types::{CreateUploadSessionRequest, DriveItem, FileInfo, UploadSessionResponse};
use bytes::Bytes;
use reqwest::header::{HeaderValue, CONTENT_RANGE, CONTENT_TYPE};
use reqwest::StatusCode;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// State of one chunked upload. Lives for a single `upload_file` call.
#[derive(Debug, Clone)]
pub struct UploadSession {
    /// Path being written, relative to the root.
    pub target_path: String,
    /// Pre-authorized URL receiving the windows.
    pub upload_url: Url,
    /// Total payload size.
    pub total_size: u64,
    /// Bytes acknowledged by the service.
    pub bytes_sent: u64,
}

impl UploadSession {
    /// Returns true once every byte is acknowledged.
    pub fn is_complete(&self) -> bool {
        self.bytes_sent >= self.total_size
    }
}

/// Outcome of sending one window.
#[derive(Debug)]
enum WindowOutcome {
    /// The service expects more bytes starting at this offset.
    Continue(u64),
    /// The upload finished and produced this item.
    Complete(DriveItem),
    /// The service rejected the range; the session status must be queried.
    Resync,
}

/// Writes payloads to paths, creating parent directories on the way.
#[derive(Clone)]
pub struct UploadManager {
    ctx: Arc<DriveContext>,
    resolver: PathResolver,
}

impl UploadManager {
    /// Creates a new upload manager.
    pub fn new(ctx: Arc<DriveContext>, resolver: PathResolver) -> Self {
        Self { ctx, resolver }
    }

    /// Uploads `content` to `path`, replacing any file already there.
    ///
    /// `rate_limit_kbs` caps the average upload rate in KB/s; `0` means
    /// unlimited.
    pub async fn upload_file(
        &self,
        path: &str,
        content: Bytes,
        rate_limit_kbs: u32,
    ) -> OneDriveResult<FileInfo> {
        let root = self.ctx.root()?;
        let path = root.relative_path(path);
        let (parent_path, name) = split_parent(&path);
        if name.is_empty() {
            return Err(OneDriveError::Request(RequestError::ValidationError(
                "Cannot upload to the root".to_string(),
            )));
        }

        let parent = self.resolver.ensure_directory(root, parent_path).await?;

        let config = self.ctx.executor().config();
        let use_session = !content.is_empty()
            && (config.test_mode || content.len() >= config.simple_upload_threshold);

        info!(
            path = %path,
            size = content.len(),
            chunked = use_session,
            rate_limit_kbs = rate_limit_kbs,
            "Uploading file"
        );

        let mut pacer = UploadPacer::new(rate_limit_kbs);
        let item = if use_session {
            let mut session = self.open_session(root, &path, &parent.id, name, content.len() as u64).await?;
            self.send_windows(&mut session, &content, &mut pacer).await?
        } else {
            self.simple_upload(root, &path, &parent.id, name, content.clone(), &mut pacer).await?
        };

        let info = FileInfo {
            id: item.id,
            is_directory: false,
            size: if item.size > 0 { item.size } else { content.len() as u64 },
        };
        self.ctx.cache().insert(path.clone(), info.clone());

        debug!(path = %path, item_id = %info.id, "Upload complete");
        Ok(info)
    }

    async fn simple_upload(
        &self,
        root: &RootDescriptor,
        path: &str,
        parent_id: &str,
        name: &str,
        content: Bytes,
        pacer: &mut UploadPacer,
    ) -> OneDriveResult<DriveItem> {
        let executor = self.ctx.executor();
        let url = self.ctx.item_url(
            root,
            parent_id,
            &format!(
                ":/{}:/content?@microsoft.graph.conflictBehavior=replace",
                encode_segment(name)
            ),
        )?;

        let size = content.len();
        let mut request = HttpRequest::new(HttpMethod::Put, url);
        request.headers.insert(CONTENT_TYPE, octet_stream()?);
        request.body = RequestBody::Bytes(content);

        let item: DriveItem = match executor.execute_json(request).await {
            Ok(item) => item,
            Err(error) if error.is_conflict() => return Err(self.explain_conflict(root, path, error).await),
            Err(error) => return Err(error),
        };

        pacer.record(size).await;
        Ok(item)
    }

    async fn open_session(
        &self,
        root: &RootDescriptor,
        path: &str,
        parent_id: &str,
        name: &str,
        total_size: u64,
    ) -> OneDriveResult<UploadSession> {
        let executor = self.ctx.executor();
        let url = self.ctx.item_url(
            root,
            parent_id,
            &format!(":/{}:/createUploadSession", encode_segment(name)),
        )?;
        let request =
            executor.json_request(HttpMethod::Post, url, &CreateUploadSessionRequest::replace())?;

        let response: UploadSessionResponse = match executor.execute_json(request).await {
            Ok(response) => response,
            Err(error) if error.is_conflict() => {
                warn!(path = %path, "Upload target exists, opening session on the existing item");
                let existing = self.existing_file(root, path, error).await?;
                let url = self.ctx.item_url(root, &existing.id, "/createUploadSession")?;
                let request = executor.json_request(
                    HttpMethod::Post,
                    url,
                    &CreateUploadSessionRequest::replace(),
                )?;
                executor.execute_json(request).await?
            }
            Err(error) => return Err(error),
        };

        let upload_url = response.upload_url.ok_or_else(|| {
            OneDriveError::Protocol(ProtocolError::UnexpectedFormat(
                "Upload session response has no uploadUrl".to_string(),
            ))
        })?;
        let upload_url = Url::parse(&upload_url).map_err(|e| {
            OneDriveError::Protocol(ProtocolError::UnexpectedFormat(format!(
                "Invalid upload URL: {}",
                e
            )))
        })?;

        debug!(path = %path, total_size = total_size, "Opened upload session");

        Ok(UploadSession {
            target_path: path.to_string(),
            upload_url,
            total_size,
            bytes_sent: 0,
        })
    }

    async fn send_windows(
        &self,
        session: &mut UploadSession,
        content: &Bytes,
        pacer: &mut UploadPacer,
    ) -> OneDriveResult<DriveItem> {
        let executor = self.ctx.executor();
        let chunk_size = executor.config().upload_chunk_size as u64;
        let max_stalls = executor.retry().config().max_attempts;
        let mut stalls = 0;

        loop {
            let start = session.bytes_sent;
            let end = (start + chunk_size).min(session.total_size);
            let window = content.slice(start as usize..end as usize);

            let session_ref = &*session;
            let outcome = executor
                .retry()
                .execute(|| self.put_window(session_ref, window.clone(), start))
                .await?;

            let next = match outcome {
                WindowOutcome::Complete(item) => {
                    pacer.record(window.len()).await;
                    session.bytes_sent = session.total_size;
                    return Ok(item);
                }
                WindowOutcome::Continue(next) => {
                    pacer.record(window.len()).await;
                    next
                }
                WindowOutcome::Resync => {
                    let session_ref = &*session;
                    executor
                        .retry()
                        .execute(|| self.query_status(session_ref))
                        .await?
                }
            };

            if next > session.total_size {
                return Err(OneDriveError::Protocol(ProtocolError::UnexpectedFormat(format!(
                    "Service expects offset {} beyond the payload size {}",
                    next, session.total_size
                ))));
            }

            if next <= start {
                stalls += 1;
                if stalls >= max_stalls {
                    return Err(OneDriveError::Upload(UploadError::UploadFailed(format!(
                        "Upload of {} makes no progress at offset {}",
                        session.target_path, start
                    ))));
                }
            } else {
                stalls = 0;
            }

            session.bytes_sent = next;
            debug!(
                path = %session.target_path,
                bytes_sent = session.bytes_sent,
                total_size = session.total_size,
                "Upload in progress"
            );

            if session.is_complete() {
                return Err(OneDriveError::Upload(UploadError::UploadFailed(format!(
                    "All bytes of {} acknowledged but the item was not returned",
                    session.target_path
                ))));
            }
        }
    }

    async fn put_window(
        &self,
        session: &UploadSession,
        window: Bytes,
        offset: u64,
    ) -> OneDriveResult<WindowOutcome> {
        let end = offset + window.len() as u64;
        let range = format!("bytes {}-{}/{}", offset, end - 1, session.total_size);

        let mut request = HttpRequest::new(HttpMethod::Put, session.upload_url.clone());
        request.headers.insert(
            CONTENT_RANGE,
            HeaderValue::from_str(&range).map_err(|e| {
                OneDriveError::Request(RequestError::ValidationError(format!(
                    "Invalid Content-Range: {}",
                    e
                )))
            })?,
        );
        request.body = RequestBody::Bytes(window);

        debug!(path = %session.target_path, range = %range, "Sending upload window");

        let response = self.ctx.executor().send_unauthenticated(request).await?;

        match response.status {
            StatusCode::OK | StatusCode::CREATED => {
                Ok(WindowOutcome::Complete(parse_json(&response.body)?))
            }
            StatusCode::ACCEPTED => {
                let status: UploadSessionResponse = parse_json(&response.body)?;
                Ok(WindowOutcome::Continue(status.next_offset().unwrap_or(end)))
            }
            StatusCode::RANGE_NOT_SATISFIABLE => {
                warn!(path = %session.target_path, range = %range, "Window rejected, resyncing session");
                Ok(WindowOutcome::Resync)
            }
            _ => Err(session_error(session, &response)),
        }
    }

    async fn query_status(&self, session: &UploadSession) -> OneDriveResult<u64> {
        let request = HttpRequest::new(HttpMethod::Get, session.upload_url.clone());
        let response = self.ctx.executor().send_unauthenticated(request).await?;

        if !response.status.is_success() {
            return Err(session_error(session, &response));
        }

        let status: UploadSessionResponse = parse_json(&response.body)?;
        status.next_offset().ok_or_else(|| {
            OneDriveError::Upload(UploadError::UploadFailed(format!(
                "Session for {} reports no expected ranges",
                session.target_path
            )))
        })
    }

    /// Looks up what occupies `path` after a conflict and returns it if it is
    /// a file that may be overwritten.
    async fn existing_file(
        &self,
        root: &RootDescriptor,
        path: &str,
        conflict: OneDriveError,
    ) -> OneDriveResult<FileInfo> {
        self.ctx.cache().remove_tree(path);
        match self.resolver.resolve_relative(root, path).await? {
            Some(info) if info.is_directory => Err(name_conflict(path)),
            Some(info) => Ok(info),
            None => Err(conflict),
        }
    }

    async fn explain_conflict(
        &self,
        root: &RootDescriptor,
        path: &str,
        conflict: OneDriveError,
    ) -> OneDriveError {
        match self.existing_file(root, path, conflict).await {
            Ok(_) => OneDriveError::Resource(ResourceError::Conflict(format!(
                "{} could not be replaced",
                path
            ))),
            Err(error) => error,
        }
    }
}

fn name_conflict(path: &str) -> OneDriveError {
    OneDriveError::Resource(ResourceError::NameConflict(format!(
        "{} exists and is a directory",
        path
    )))
}

fn session_error(session: &UploadSession, response: &HttpResponse) -> OneDriveError {
    if response.status == StatusCode::NOT_FOUND {
        warn!(path = %session.target_path, "Upload session expired");
        return OneDriveError::Upload(UploadError::SessionExpired(format!(
            "Upload session for {} no longer exists",
            session.target_path
        )));
    }
    map_error_response(response)
}

fn octet_stream() -> OneDriveResult<HeaderValue> {
    HeaderValue::from_str(mime::APPLICATION_OCTET_STREAM.as_ref()).map_err(|e| {
        OneDriveError::Request(RequestError::ValidationError(format!(
            "Invalid content type: {}",
            e
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_completion() {
        let mut session = UploadSession {
            target_path: "test/a".into(),
            upload_url: Url::parse("https://upload.example.com/session/1").unwrap(),
            total_size: 10,
            bytes_sent: 4,
        };
        assert!(!session.is_complete());
        session.bytes_sent = 10;
        assert!(session.is_complete());
    }

    #[test]
    fn test_expired_session_error() {
        let session = UploadSession {
            target_path: "test/a".into(),
            upload_url: Url::parse("https://upload.example.com/session/1").unwrap(),
            total_size: 10,
            bytes_sent: 0,
        };
        let response = HttpResponse::new(
            StatusCode::NOT_FOUND,
            reqwest::header::HeaderMap::new(),
            Bytes::new(),
        );
        assert!(matches!(
            session_error(&session, &response),
            OneDriveError::Upload(UploadError::SessionExpired(_))
        ));

        let throttled = HttpResponse::new(
            StatusCode::SERVICE_UNAVAILABLE,
            reqwest::header::HeaderMap::new(),
            Bytes::new(),
        );
        assert!(session_error(&session, &throttled).is_retryable());
    }

    #[test]
    fn test_octet_stream_header() {
        assert_eq!(octet_stream().unwrap(), "application/octet-stream");
    }
}
