//! In-memory OneDrive.

use crate::errors::TransportError;
use crate::transport::{
    ByteStream, HttpMethod, HttpRequest, HttpResponse, HttpTransport, StreamingResponse,
};
use crate::types::{
    DriveItem, FileFacet, FolderFacet, ItemList, ItemReference, MoveItemRequest, RemoteItem,
    UploadSessionResponse,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{Duration as ChronoDuration, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use percent_encoding::percent_decode_str;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_RANGE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use url::Url;

/// API base served by the fake.
pub const FAKE_API_URL: &str = "https://fake.onedrive.test/v1.0/";

/// Prefix of upload session URLs handed out by the fake.
pub const FAKE_UPLOAD_URL: &str = "https://upload.fake.onedrive.test/session/";

const ROOT_ID: &str = "FAKE!ROOT";
const OWNER_ROOT_ID: &str = "OWNER!ROOT";
const OWNER_DRIVE_ID: &str = "0wner0drive";
const DOWNLOAD_CHUNK: usize = 16 * 1024;

/// A request seen by the fake.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Full URL.
    pub url: Url,
    /// Whether an `Authorization` header was sent.
    pub authorized: bool,
    /// `Content-Range` header, if any.
    pub content_range: Option<String>,
}

/// A scripted failure.
///
/// By default a fault answers matching requests instead of serving them. An
/// `after_apply` fault lets the request change state first and then fails the
/// response, as when an acknowledgement is lost.
#[derive(Debug, Clone)]
pub struct Fault {
    status: u16,
    retry_after: Option<u64>,
    method: Option<HttpMethod>,
    url_contains: Option<String>,
    remaining: usize,
    after_apply: bool,
}

impl Fault {
    /// Fails the next matching request with `status`.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            retry_after: None,
            method: None,
            url_contains: None,
            remaining: 1,
            after_apply: false,
        }
    }

    /// Fires for the next `count` matching requests.
    pub fn times(mut self, count: usize) -> Self {
        self.remaining = count;
        self
    }

    /// Only matches requests with this method.
    pub fn on(mut self, method: HttpMethod) -> Self {
        self.method = Some(method);
        self
    }

    /// Only matches URLs containing `fragment`.
    pub fn matching(mut self, fragment: impl Into<String>) -> Self {
        self.url_contains = Some(fragment.into());
        self
    }

    /// Sends a `Retry-After` header.
    pub fn retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Applies the request before failing its response.
    pub fn after_apply(mut self) -> Self {
        self.after_apply = true;
        self
    }

    fn matches(&self, request: &HttpRequest) -> bool {
        self.remaining > 0
            && self.method.map_or(true, |method| method == request.method)
            && self
                .url_contains
                .as_ref()
                .map_or(true, |fragment| request.url.as_str().contains(fragment.as_str()))
    }

    fn response(&self) -> HttpResponse {
        let mut response = error_response(self.status, "injectedFault", "Injected failure");
        if let Some(seconds) = self.retry_after {
            response
                .headers
                .insert("retry-after", HeaderValue::from(seconds));
        }
        response
    }
}

#[derive(Debug, Clone)]
struct Node {
    id: String,
    name: String,
    parent: Option<String>,
    is_dir: bool,
    content: Bytes,
}

#[derive(Debug)]
struct Session {
    parent_id: String,
    name: String,
    target_id: Option<String>,
    total: Option<u64>,
    received: BytesMut,
}

#[derive(Debug)]
struct State {
    nodes: HashMap<String, Node>,
    sessions: HashMap<String, Session>,
    shared: Vec<DriveItem>,
    faults: Vec<Fault>,
    requests: Vec<RecordedRequest>,
    next_id: u64,
    page_size: Option<usize>,
    next_link_host: Option<String>,
    stuck_pagination: bool,
    session_conflicts: bool,
}

impl State {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("FAKE!{}", self.next_id)
    }

    fn children(&self, parent_id: &str) -> Vec<&Node> {
        let mut children: Vec<&Node> = self
            .nodes
            .values()
            .filter(|node| node.parent.as_deref() == Some(parent_id))
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        children
    }

    fn child_named(&self, parent_id: &str, name: &str) -> Option<&Node> {
        self.nodes
            .values()
            .find(|node| node.parent.as_deref() == Some(parent_id) && node.name == name)
    }

    fn insert(&mut self, parent_id: &str, name: &str, is_dir: bool, content: Bytes) -> String {
        let id = self.allocate_id();
        self.nodes.insert(
            id.clone(),
            Node {
                id: id.clone(),
                name: name.to_string(),
                parent: Some(parent_id.to_string()),
                is_dir,
                content,
            },
        );
        id
    }

    fn remove_tree(&mut self, id: &str) {
        let children: Vec<String> = self.children(id).iter().map(|node| node.id.clone()).collect();
        for child in children {
            self.remove_tree(&child);
        }
        self.nodes.remove(id);
    }

    fn is_ancestor<'a>(&'a self, ancestor: &str, mut id: &'a str) -> bool {
        loop {
            if id == ancestor {
                return true;
            }
            match self.nodes.get(id).and_then(|node| node.parent.as_deref()) {
                Some(parent) => id = parent,
                None => return false,
            }
        }
    }

    fn item(&self, node: &Node) -> DriveItem {
        DriveItem {
            id: node.id.clone(),
            name: node.name.clone(),
            size: node.content.len() as u64,
            folder: node.is_dir.then(|| FolderFacet {
                child_count: Some(self.children(&node.id).len() as u64),
            }),
            file: (!node.is_dir).then(|| FileFacet {
                mime_type: Some("application/octet-stream".to_string()),
            }),
            parent_reference: node.parent.as_ref().map(|parent| ItemReference {
                drive_id: None,
                id: Some(parent.clone()),
            }),
            ..Default::default()
        }
    }

    fn write_file(&mut self, parent_id: &str, name: &str, content: Bytes) -> Result<(String, bool), HttpResponse> {
        let existing = self
            .child_named(parent_id, name)
            .map(|node| (node.id.clone(), node.is_dir));
        match existing {
            Some((_, true)) => Err(error_response(
                409,
                "nameAlreadyExists",
                "A folder with that name already exists",
            )),
            Some((id, false)) => {
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.content = content;
                }
                Ok((id, false))
            }
            None => Ok((self.insert(parent_id, name, false, content), true)),
        }
    }

    fn page<T: Clone>(&self, items: &[T], url: &Url) -> (Vec<T>, Option<String>) {
        let top = query(url, "$top")
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(200)
            .max(1);
        let limit = self.page_size.map_or(top, |size| size.min(top));
        let skip = query(url, "$skiptoken")
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(0);

        let end = (skip + limit).min(items.len());
        let page = items.get(skip..end).unwrap_or_default().to_vec();

        let next_link = (end < items.len()).then(|| {
            let offset = if self.stuck_pagination { skip } else { end };
            let mut next = url.clone();
            next.set_query(Some(&format!("$top={}&$skiptoken={}", top, offset)));
            if let Some(host) = &self.next_link_host {
                let _ = next.set_host(Some(host));
            }
            next.to_string()
        });

        (page, next_link)
    }
}

/// Stateful in-memory OneDrive.
///
/// Requests to the API must carry a bearer token; requests to upload session
/// URLs must not. IDs look like `FAKE!12`.
pub struct FakeDrive {
    state: Mutex<State>,
    token: String,
    open_downloads: Arc<AtomicUsize>,
}

impl FakeDrive {
    /// Creates an empty drive.
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        for id in [ROOT_ID, OWNER_ROOT_ID] {
            nodes.insert(
                id.to_string(),
                Node {
                    id: id.to_string(),
                    name: "root".to_string(),
                    parent: None,
                    is_dir: true,
                    content: Bytes::new(),
                },
            );
        }

        Self {
            state: Mutex::new(State {
                nodes,
                sessions: HashMap::new(),
                shared: Vec::new(),
                faults: Vec::new(),
                requests: Vec::new(),
                next_id: 0,
                page_size: None,
                next_link_host: None,
                stuck_pagination: false,
                session_conflicts: false,
            }),
            token: "fake-token".to_string(),
            open_downloads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Bearer token the fake accepts.
    pub fn token(&self) -> String {
        self.token.clone()
    }

    /// Identifier of the drive root.
    pub fn root_id(&self) -> String {
        ROOT_ID.to_string()
    }

    /// Caps every listing page at `size` items.
    pub fn set_page_size(&self, size: usize) {
        self.state.lock().page_size = Some(size.max(1));
    }

    /// Makes continuation links point at another host.
    pub fn set_next_link_host(&self, host: impl Into<String>) {
        self.state.lock().next_link_host = Some(host.into());
    }

    /// Makes every continuation link repeat the current page.
    pub fn set_stuck_pagination(&self, stuck: bool) {
        self.state.lock().stuck_pagination = stuck;
    }

    /// Rejects upload sessions opened by path over an existing file with 409.
    pub fn set_session_conflicts(&self, conflicts: bool) {
        self.state.lock().session_conflicts = conflicts;
    }

    /// Queues a failure.
    pub fn inject(&self, fault: Fault) {
        self.state.lock().faults.push(fault);
    }

    /// Drops every open upload session.
    pub fn expire_sessions(&self) {
        self.state.lock().sessions.clear();
    }

    /// Number of open upload sessions.
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Shares a new folder named `name` with this account and returns its ID.
    pub fn add_shared_folder(&self, name: &str) -> String {
        let mut state = self.state.lock();
        let id = state.insert(OWNER_ROOT_ID, name, true, Bytes::new());
        let link = state.allocate_id();
        state.shared.push(DriveItem {
            id: link,
            name: name.to_string(),
            remote_item: Some(RemoteItem {
                id: id.clone(),
                name: Some(name.to_string()),
                folder: Some(FolderFacet::default()),
                parent_reference: Some(ItemReference {
                    drive_id: Some(OWNER_DRIVE_ID.to_string()),
                    id: Some(OWNER_ROOT_ID.to_string()),
                }),
            }),
            ..Default::default()
        });
        id
    }

    /// Shares a file named `name` with this account.
    pub fn add_shared_file(&self, name: &str) -> String {
        let mut state = self.state.lock();
        let id = state.insert(OWNER_ROOT_ID, name, false, Bytes::from_static(b"x"));
        let link = state.allocate_id();
        state.shared.push(DriveItem {
            id: link,
            name: name.to_string(),
            file: Some(FileFacet::default()),
            remote_item: Some(RemoteItem {
                id: id.clone(),
                name: Some(name.to_string()),
                folder: None,
                parent_reference: Some(ItemReference {
                    drive_id: Some(OWNER_DRIVE_ID.to_string()),
                    id: Some(OWNER_ROOT_ID.to_string()),
                }),
            }),
            ..Default::default()
        });
        id
    }

    /// Creates a folder directly, bypassing the API.
    pub fn create_folder(&self, parent_id: &str, name: &str) -> String {
        self.state.lock().insert(parent_id, name, true, Bytes::new())
    }

    /// Creates a file directly, bypassing the API.
    pub fn create_file(&self, parent_id: &str, name: &str, content: impl Into<Bytes>) -> String {
        self.state.lock().insert(parent_id, name, false, content.into())
    }

    /// Deletes an item directly, bypassing the API.
    pub fn remove(&self, id: &str) {
        self.state.lock().remove_tree(id);
    }

    /// Resolves a slash-separated path below `base_id`.
    pub fn find(&self, base_id: &str, path: &str) -> Option<String> {
        let state = self.state.lock();
        let mut current = base_id.to_string();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = state.child_named(&current, segment)?.id.clone();
        }
        Some(current)
    }

    /// Sorted names of the children of `id`.
    pub fn child_names(&self, id: &str) -> Vec<String> {
        self.state
            .lock()
            .children(id)
            .iter()
            .map(|node| node.name.clone())
            .collect()
    }

    /// Content of the file `id`.
    pub fn content(&self, id: &str) -> Option<Bytes> {
        self.state.lock().nodes.get(id).map(|node| node.content.clone())
    }

    /// Every request seen so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    /// Number of requests seen so far.
    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Number of requests with `method` whose URL contains `fragment`.
    pub fn count_requests(&self, method: HttpMethod, fragment: &str) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|request| request.method == method && request.url.as_str().contains(fragment))
            .count()
    }

    /// Clears the request log.
    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }

    /// Download bodies not yet dropped.
    pub fn open_downloads(&self) -> usize {
        self.open_downloads.load(Ordering::SeqCst)
    }

    fn handle(&self, request: &HttpRequest) -> Reply {
        let mut state = self.state.lock();

        state.requests.push(RecordedRequest {
            method: request.method,
            url: request.url.clone(),
            authorized: request.headers.contains_key(AUTHORIZATION),
            content_range: request
                .headers
                .get(CONTENT_RANGE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
        });

        if let Some(response) = take_fault(&mut state, request, false) {
            return Reply::Full(response);
        }

        let reply = if request.url.as_str().starts_with(FAKE_UPLOAD_URL) {
            Reply::Full(self.handle_session(&mut state, request))
        } else {
            self.handle_api(&mut state, request)
        };

        match take_fault(&mut state, request, true) {
            Some(response) => Reply::Full(response),
            None => reply,
        }
    }

    fn handle_api(&self, state: &mut State, request: &HttpRequest) -> Reply {
        let expected = format!("Bearer {}", self.token);
        let authorized = request
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map_or(false, |value| value == expected);
        if !authorized {
            return Reply::Full(error_response(401, "unauthenticated", "Missing or invalid token"));
        }

        let path = request.url.path();
        let Some(rest) = path.strip_prefix("/v1.0/") else {
            return Reply::Full(error_response(400, "invalidRequest", "Unknown API version"));
        };
        let rest = if let Some(rest) = rest.strip_prefix("me/drive/") {
            rest
        } else if let Some(rest) = rest.strip_prefix("drive/") {
            rest
        } else if let Some(rest) = rest.strip_prefix("drives/") {
            match rest.split_once('/') {
                Some((_, rest)) => rest,
                None => return Reply::Full(error_response(400, "invalidRequest", "Missing drive path")),
            }
        } else {
            return Reply::Full(error_response(400, "invalidRequest", "Unknown drive path"));
        };

        match (request.method, rest) {
            (HttpMethod::Get, "root") => {
                let root = state.nodes.get(ROOT_ID).map(|node| state.item(node));
                Reply::Full(json_response(200, &root))
            }
            (HttpMethod::Get, "sharedWithMe") => {
                let (value, next_link) = state.page(&state.shared, &request.url);
                Reply::Full(json_response(200, &ItemList { value, next_link }))
            }
            (_, rest) => match rest.strip_prefix("items/") {
                Some(item_path) => self.handle_item(state, request, item_path),
                None => Reply::Full(error_response(400, "invalidRequest", "Unknown endpoint")),
            },
        }
    }

    fn handle_item(&self, state: &mut State, request: &HttpRequest, item_path: &str) -> Reply {
        // items/{parent}:/{name}:/{action}
        if let Some((parent_id, rest)) = item_path.split_once(":/") {
            let parent_id = decode(parent_id);
            let Some((name, action)) = rest.split_once(":/") else {
                return Reply::Full(error_response(400, "invalidRequest", "Malformed item path"));
            };
            let name = decode(name);

            match state.nodes.get(&parent_id) {
                Some(node) if node.is_dir => {}
                _ => return Reply::Full(not_found()),
            }

            return Reply::Full(match (request.method, action) {
                (HttpMethod::Put, "content") => {
                    match state.write_file(&parent_id, &name, request.body.as_bytes()) {
                        Ok((id, created)) => {
                            let item = state.nodes.get(&id).map(|node| state.item(node));
                            json_response(if created { 201 } else { 200 }, &item)
                        }
                        Err(response) => response,
                    }
                }
                (HttpMethod::Post, "createUploadSession") => {
                    let existing = state.child_named(&parent_id, &name).map(|node| node.is_dir);
                    match existing {
                        Some(true) => {
                            error_response(409, "nameAlreadyExists", "A folder with that name already exists")
                        }
                        Some(false) if state.session_conflicts => {
                            error_response(409, "nameAlreadyExists", "An item with that name already exists")
                        }
                        _ => open_session(state, parent_id, name, None),
                    }
                }
                _ => error_response(400, "invalidRequest", "Unsupported action"),
            });
        }

        let (id, action) = match item_path.split_once('/') {
            Some((id, action)) => (decode(id), action),
            None => (decode(item_path), ""),
        };

        let Some(node) = state.nodes.get(&id).cloned() else {
            return Reply::Full(not_found());
        };

        match (request.method, action) {
            (HttpMethod::Get, "") => Reply::Full(json_response(200, &state.item(&node))),
            (HttpMethod::Get, "children") => {
                if !node.is_dir {
                    return Reply::Full(error_response(400, "invalidRequest", "Item is not a folder"));
                }
                let children: Vec<DriveItem> =
                    state.children(&id).into_iter().map(|child| state.item(child)).collect();
                let (value, next_link) = state.page(&children, &request.url);
                Reply::Full(json_response(200, &ItemList { value, next_link }))
            }
            (HttpMethod::Post, "children") => Reply::Full(create_folder(state, &node, request)),
            (HttpMethod::Get, "content") => {
                if node.is_dir {
                    return Reply::Full(error_response(400, "invalidRequest", "Item is a folder"));
                }
                Reply::Download(node.content.clone())
            }
            (HttpMethod::Post, "createUploadSession") => {
                if node.is_dir {
                    return Reply::Full(error_response(409, "nameAlreadyExists", "Item is a folder"));
                }
                let parent_id = node.parent.clone().unwrap_or_default();
                Reply::Full(open_session(state, parent_id, node.name.clone(), Some(id)))
            }
            (HttpMethod::Patch, "") => Reply::Full(move_item(state, &node, request)),
            (HttpMethod::Delete, "") => {
                if node.parent.is_none() {
                    return Reply::Full(error_response(400, "invalidRequest", "Cannot delete a root"));
                }
                state.remove_tree(&id);
                Reply::Full(HttpResponse::new(StatusCode::NO_CONTENT, HeaderMap::new(), Bytes::new()))
            }
            _ => Reply::Full(error_response(400, "invalidRequest", "Unsupported action")),
        }
    }

    fn handle_session(&self, state: &mut State, request: &HttpRequest) -> HttpResponse {
        if request.headers.contains_key(AUTHORIZATION) {
            return error_response(401, "unauthenticated", "Upload URLs must not carry a token");
        }

        let key = request.url.as_str().to_string();
        let Some(session) = state.sessions.get_mut(&key) else {
            return not_found();
        };

        match request.method {
            HttpMethod::Get => json_response(200, &session_status(session)),
            HttpMethod::Put => {
                let Some((start, end, total)) = request
                    .headers
                    .get(CONTENT_RANGE)
                    .and_then(|value| value.to_str().ok())
                    .and_then(parse_content_range)
                else {
                    return error_response(400, "invalidRange", "Malformed Content-Range");
                };

                if session.total.map_or(false, |known| known != total) {
                    return error_response(400, "invalidRange", "Total size changed");
                }
                if start != session.received.len() as u64 {
                    return error_response(416, "invalidRange", "Unexpected range start");
                }
                if end + 1 - start != request.body.len() as u64 || end >= total {
                    return error_response(400, "invalidRange", "Range does not match the body");
                }

                session.total = Some(total);
                session.received.extend_from_slice(&request.body.as_bytes());

                if (session.received.len() as u64) < total {
                    return json_response(202, &session_status(session));
                }

                let Some(session) = state.sessions.remove(&key) else {
                    return not_found();
                };
                commit_session(state, session)
            }
            _ => error_response(400, "invalidRequest", "Unsupported method"),
        }
    }
}

impl Default for FakeDrive {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FakeDrive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FakeDrive")
            .field("items", &state.nodes.len())
            .field("sessions", &state.sessions.len())
            .field("recorded_requests", &state.requests.len())
            .finish()
    }
}

#[async_trait]
impl HttpTransport for FakeDrive {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        Ok(match self.handle(&request) {
            Reply::Full(response) => response,
            Reply::Download(content) => HttpResponse::new(StatusCode::OK, HeaderMap::new(), content),
        })
    }

    async fn send_streaming(&self, request: HttpRequest) -> Result<StreamingResponse, TransportError> {
        match self.handle(&request) {
            Reply::Full(response) => Ok(StreamingResponse {
                status: response.status,
                headers: response.headers,
                body: ByteStream::new(futures::stream::iter(vec![Ok::<_, TransportError>(response.body)])),
            }),
            Reply::Download(content) => {
                let guard = DownloadGuard::new(self.open_downloads.clone());
                let chunks: Vec<Bytes> = content
                    .chunks(DOWNLOAD_CHUNK)
                    .map(Bytes::copy_from_slice)
                    .collect();
                let stream = futures::stream::iter(chunks).map(move |chunk| {
                    let _open = &guard;
                    Ok::<_, TransportError>(chunk)
                });
                Ok(StreamingResponse {
                    status: StatusCode::OK,
                    headers: HeaderMap::new(),
                    body: ByteStream::new(stream),
                })
            }
        }
    }
}

enum Reply {
    Full(HttpResponse),
    Download(Bytes),
}

/// Counts a download as open until its body is dropped.
struct DownloadGuard(Arc<AtomicUsize>);

impl DownloadGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for DownloadGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Deserialize)]
struct CreateFolderBody {
    name: String,
    #[serde(rename = "@microsoft.graph.conflictBehavior", default)]
    conflict_behavior: Option<String>,
}

#[derive(Serialize)]
struct GraphError<'a> {
    error: GraphErrorBody<'a>,
}

#[derive(Serialize)]
struct GraphErrorBody<'a> {
    code: &'a str,
    message: &'a str,
}

fn take_fault(state: &mut State, request: &HttpRequest, after_apply: bool) -> Option<HttpResponse> {
    let fault = state
        .faults
        .iter_mut()
        .find(|fault| fault.after_apply == after_apply && fault.matches(request))?;
    fault.remaining -= 1;
    let response = fault.response();
    state.faults.retain(|fault| fault.remaining > 0);
    Some(response)
}

fn create_folder(state: &mut State, parent: &Node, request: &HttpRequest) -> HttpResponse {
    if !parent.is_dir {
        return error_response(400, "invalidRequest", "Parent is not a folder");
    }
    let Ok(body) = serde_json::from_slice::<CreateFolderBody>(&request.body.as_bytes()) else {
        return error_response(400, "invalidRequest", "Malformed folder body");
    };

    if state.child_named(&parent.id, &body.name).is_some() {
        if body.conflict_behavior.as_deref() == Some("fail") {
            return error_response(409, "nameAlreadyExists", "An item with that name already exists");
        }
        let existing = state.child_named(&parent.id, &body.name).map(|node| state.item(node));
        return json_response(200, &existing);
    }

    let id = state.insert(&parent.id, &body.name, true, Bytes::new());
    let item = state.nodes.get(&id).map(|node| state.item(node));
    json_response(201, &item)
}

fn move_item(state: &mut State, node: &Node, request: &HttpRequest) -> HttpResponse {
    let Ok(body) = serde_json::from_slice::<MoveItemRequest>(&request.body.as_bytes()) else {
        return error_response(400, "invalidRequest", "Malformed move body");
    };
    let Some(dest_id) = body.parent_reference.id else {
        return error_response(400, "invalidRequest", "Missing parentReference.id");
    };

    match state.nodes.get(&dest_id) {
        Some(dest) if dest.is_dir => {}
        Some(_) => return error_response(400, "invalidRequest", "Destination is not a folder"),
        None => return not_found(),
    }
    if state.is_ancestor(&node.id, &dest_id) {
        return error_response(400, "invalidRequest", "Cannot move a folder into itself");
    }
    if state.child_named(&dest_id, &node.name).is_some() {
        return error_response(409, "nameAlreadyExists", "An item with that name already exists");
    }

    if let Some(moved) = state.nodes.get_mut(&node.id) {
        moved.parent = Some(dest_id);
    }
    let item = state.nodes.get(&node.id).map(|node| state.item(node));
    json_response(200, &item)
}

fn open_session(state: &mut State, parent_id: String, name: String, target_id: Option<String>) -> HttpResponse {
    let number = state.allocate_id();
    let upload_url = format!("{}{}", FAKE_UPLOAD_URL, number.trim_start_matches("FAKE!"));

    state.sessions.insert(
        upload_url.clone(),
        Session {
            parent_id,
            name,
            target_id,
            total: None,
            received: BytesMut::new(),
        },
    );

    json_response(
        200,
        &UploadSessionResponse {
            upload_url: Some(upload_url),
            expiration_date_time: Some(Utc::now() + ChronoDuration::hours(1)),
            next_expected_ranges: vec!["0-".to_string()],
        },
    )
}

fn session_status(session: &Session) -> UploadSessionResponse {
    UploadSessionResponse {
        upload_url: None,
        expiration_date_time: Some(Utc::now() + ChronoDuration::hours(1)),
        next_expected_ranges: vec![format!("{}-", session.received.len())],
    }
}

fn commit_session(state: &mut State, session: Session) -> HttpResponse {
    let content = session.received.freeze();

    let target = session
        .target_id
        .filter(|id| state.nodes.contains_key(id));

    let (id, created) = match target {
        Some(id) => {
            if let Some(node) = state.nodes.get_mut(&id) {
                node.content = content;
            }
            (id, false)
        }
        None => match state.write_file(&session.parent_id, &session.name, content) {
            Ok(result) => result,
            Err(response) => return response,
        },
    };

    let item = state.nodes.get(&id).map(|node| state.item(node));
    json_response(if created { 201 } else { 200 }, &item)
}

fn parse_content_range(value: &str) -> Option<(u64, u64, u64)> {
    let range = value.strip_prefix("bytes ")?;
    let (span, total) = range.split_once('/')?;
    let (start, end) = span.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?, total.parse().ok()?))
}

fn query(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.into_owned())
}

fn decode(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}

fn json_response<T: Serialize>(status: u16, body: &T) -> HttpResponse {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match serde_json::to_vec(body) {
        Ok(body) => HttpResponse::new(status, HeaderMap::new(), Bytes::from(body)),
        Err(_) => error_response(500, "generalException", "Serialization failed"),
    }
}

fn error_response(status: u16, code: &str, message: &str) -> HttpResponse {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = serde_json::to_vec(&GraphError {
        error: GraphErrorBody { code, message },
    })
    .unwrap_or_default();
    HttpResponse::new(status, HeaderMap::new(), Bytes::from(body))
}

fn not_found() -> HttpResponse {
    error_response(404, "itemNotFound", "The resource could not be found")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(method: HttpMethod, path: &str) -> HttpRequest {
        let mut request = HttpRequest::new(method, Url::parse(FAKE_API_URL).unwrap().join(path).unwrap());
        request
            .headers
            .insert(AUTHORIZATION, HeaderValue::from_static("Bearer fake-token"));
        request
    }

    #[tokio::test]
    async fn test_requires_token() {
        let drive = FakeDrive::new();
        let mut request = api(HttpMethod::Get, "drive/root");
        request.headers.clear();

        let response = drive.send(request).await.unwrap();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_children_pagination() {
        let drive = FakeDrive::new();
        for i in 0..5 {
            drive.create_file(ROOT_ID, &format!("f{}", i), Bytes::from_static(b"x"));
        }
        drive.set_page_size(2);

        let response = drive
            .send(api(HttpMethod::Get, "drive/items/FAKE!ROOT/children?$top=1000"))
            .await
            .unwrap();
        let list: ItemList = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(list.value.len(), 2);
        let next = list.next_link.unwrap();
        assert!(next.contains("skiptoken=2"));
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let drive = FakeDrive::new();
        drive.inject(Fault::status(429).retry_after(3).times(2));

        for _ in 0..2 {
            let response = drive.send(api(HttpMethod::Get, "drive/root")).await.unwrap();
            assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
            assert_eq!(response.headers.get("retry-after").unwrap(), "3");
        }
        let response = drive.send(api(HttpMethod::Get, "drive/root")).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(drive.request_count(), 3);
    }

    #[test]
    fn test_parse_content_range() {
        assert_eq!(parse_content_range("bytes 0-9/20"), Some((0, 9, 20)));
        assert_eq!(parse_content_range("bytes */20"), None);
    }

    #[test]
    fn test_find_and_remove() {
        let drive = FakeDrive::new();
        let dir = drive.create_folder(ROOT_ID, "a");
        let file = drive.create_file(&dir, "b", Bytes::from_static(b"hi"));
        assert_eq!(drive.find(ROOT_ID, "a/b"), Some(file.clone()));
        assert_eq!(drive.content(&file).unwrap(), Bytes::from_static(b"hi"));

        drive.remove(&dir);
        assert_eq!(drive.find(ROOT_ID, "a/b"), None);
        assert!(drive.child_names(ROOT_ID).is_empty());
    }
}
