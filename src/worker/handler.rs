//! Per-worker session protocol handling.
//!
//! # Responsibilities
//! - Route parsed requests under the session prefix
//! - Drive each session through `Unbound → Http → WebSocket → Closed`
//! - Apply client patches and produce the response patch or full state
//! - Push server-side updates to a bound WebSocket
//!
//! Every method runs synchronously on the owning worker. Nothing here awaits.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::app::Application;
use crate::error::Error;
use crate::http::buffer::BufferView;
use crate::http::request::{Method, ParsedRequest, RequestLayout, SESSION_COOKIE};
use crate::http::response::{HttpResponse, ResponseKind};
use crate::observability::metrics;
use crate::patch::version::ReadyDocument;
use crate::patch::{apply_elements, encode, parse_document, PatchError};
use crate::session::{Binding, SessionSlot, SessionTable, SessionToken, TableStats};
use crate::viewmodel::ViewModel;
use crate::worker::WorkerError;

/// Where a request under the session prefix goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    /// `POST <prefix>`
    Create,
    /// `GET <prefix>/{token}`
    Get(&'a [u8]),
    /// `PATCH <prefix>/{token}`
    Patch(&'a [u8]),
    /// `DELETE <prefix>/{token}`
    Delete(&'a [u8]),
    /// `GET <prefix>/wsupgrade/{token}`
    Upgrade(&'a [u8]),
    NotFound,
    MethodNotAllowed,
}

impl<'a> Route<'a> {
    pub fn of(request: &ParsedRequest<'a>, prefix: &str) -> Self {
        let path = request.path();
        let method = request.method();
        let prefix = prefix.as_bytes();

        if path == prefix {
            return match method {
                Method::Post => Route::Create,
                _ => Route::MethodNotAllowed,
            };
        }
        let Some(rest) = path.strip_prefix(prefix).and_then(|r| r.strip_prefix(b"/")) else {
            return Route::NotFound;
        };
        let token = request.session_token().unwrap_or(&[]);
        if token.is_empty() {
            return Route::NotFound;
        }

        if let Some(segment) = rest.strip_prefix(b"wsupgrade/") {
            if segment.contains(&b'/') {
                return Route::NotFound;
            }
            return match method {
                Method::Get => Route::Upgrade(token),
                _ => Route::MethodNotAllowed,
            };
        }
        if rest.contains(&b'/') {
            return Route::NotFound;
        }
        match method {
            Method::Get => Route::Get(token),
            Method::Patch => Route::Patch(token),
            Method::Delete => Route::Delete(token),
            _ => Route::MethodNotAllowed,
        }
    }

    /// Response for routes that never reach a session.
    pub fn rejection(&self) -> Option<HttpResponse> {
        match self {
            Route::NotFound => Some(HttpResponse::error(404, "not found")),
            Route::MethodNotAllowed => Some(HttpResponse::error(405, "method not allowed")),
            _ => None,
        }
    }

    /// Raw token text of routes that address a session.
    pub fn token(&self) -> Option<&'a [u8]> {
        match self {
            Route::Get(t) | Route::Patch(t) | Route::Delete(t) | Route::Upgrade(t) => Some(t),
            _ => None,
        }
    }
}

/// Outbound side of a WebSocket connection, handed to the worker on upgrade.
#[derive(Debug, Clone)]
pub struct ChannelRegistration {
    pub id: u64,
    pub outbound: mpsc::Sender<Bytes>,
}

/// What happened to the changes of a server-side update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Sent as a patch over the bound WebSocket.
    Pushed,
    /// Left in the change log for the client's next request.
    Pending,
}

/// One worker's sessions and the logic that serves them.
pub struct Worker {
    id: u32,
    table: SessionTable,
    app: Arc<dyn Application>,
    prefix: String,
}

impl Worker {
    pub fn new(table: SessionTable, app: Arc<dyn Application>, prefix: impl Into<String>) -> Self {
        Self {
            id: table.worker_id(),
            table,
            app,
            prefix: prefix.into(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn stats(&self) -> TableStats {
        self.table.stats()
    }

    /// Serve one request whose layout was computed by the connection task.
    pub fn handle_request(
        &mut self,
        buffer: &[u8],
        layout: RequestLayout,
        channel: Option<ChannelRegistration>,
    ) -> HttpResponse {
        let request = ParsedRequest::from_layout(BufferView::new(buffer), layout);
        let route = Route::of(&request, &self.prefix);
        let result = match route {
            Route::Create => self.create(&request),
            Route::Get(token) => self.get(&request, token),
            Route::Patch(token) => self.patch(&request, token),
            Route::Delete(token) => self.delete(token),
            Route::Upgrade(token) => self.upgrade(&request, token, channel),
            Route::NotFound | Route::MethodNotAllowed => {
                return route.rejection().unwrap_or_else(|| HttpResponse::error(404, "not found"))
            }
        };
        result.unwrap_or_else(|err| HttpResponse::from_error(&Error::Worker(err)))
    }

    /// Start a session and return its token.
    pub fn create_session(&mut self) -> Result<SessionToken, WorkerError> {
        let state = self.app.initial_state();
        let token = self.table.create_session(Some(&state))?;
        metrics::record_session_created();
        metrics::set_active_sessions(self.id, self.table.active());
        tracing::info!(
            worker_id = self.id,
            session = token.app_session_id,
            "Session created"
        );
        Ok(token)
    }

    fn create(&mut self, request: &ParsedRequest<'_>) -> Result<HttpResponse, WorkerError> {
        let token = self.create_session()?;
        let slot = self.table.resolve(&token).ok_or(WorkerError::SessionNotFound)?;
        let body = slot.tree().serialize_full();
        let kind = full_state_kind(request);
        Ok(HttpResponse::payload(201, kind, &body)
            .with_header("Location", format!("{}/{}", self.prefix, token))
            .with_header("Set-Cookie", format!("{SESSION_COOKIE}={token}; HttpOnly")))
    }

    fn get(&mut self, request: &ParsedRequest<'_>, token: &[u8]) -> Result<HttpResponse, WorkerError> {
        let slot = self.slot(token)?;
        slot.mark_http();
        let body = slot.tree().serialize_full();
        Ok(HttpResponse::payload(200, full_state_kind(request), &body))
    }

    fn patch(&mut self, request: &ParsedRequest<'_>, token: &[u8]) -> Result<HttpResponse, WorkerError> {
        let app = Arc::clone(&self.app);
        let worker_id = self.id;
        let slot = self.slot(token)?;
        slot.mark_http();
        apply_client_patch(app.as_ref(), worker_id, slot, request.body())?;

        match ResponseKind::negotiate(request.accept(), ResponseKind::Patch) {
            ResponseKind::FullJson => {
                slot.tree_mut().checkpoint();
                let body = slot.tree().serialize_full();
                Ok(HttpResponse::payload(200, ResponseKind::FullJson, &body))
            }
            _ => {
                let body = outgoing_patch(slot);
                Ok(HttpResponse::payload(200, ResponseKind::Patch, &body))
            }
        }
    }

    fn delete(&mut self, token: &[u8]) -> Result<HttpResponse, WorkerError> {
        let token = SessionToken::decode(token).ok_or(WorkerError::SessionNotFound)?;
        if let Some(slot) = self.table.resolve(&token) {
            if matches!(slot.binding, Binding::WebSocket { .. }) {
                metrics::websocket_closed();
            }
        }
        if !self.table.destroy(&token) {
            return Err(WorkerError::SessionNotFound);
        }
        metrics::record_session_destroyed("logout");
        metrics::set_active_sessions(self.id, self.table.active());
        tracing::info!(worker_id = self.id, session = token.app_session_id, "Session destroyed");
        Ok(HttpResponse::new(204))
    }

    fn upgrade(
        &mut self,
        request: &ParsedRequest<'_>,
        token: &[u8],
        channel: Option<ChannelRegistration>,
    ) -> Result<HttpResponse, WorkerError> {
        let (key, channel) = match (request.is_websocket_upgrade(), request.websocket_key(), channel) {
            (true, Some(key), Some(channel)) => (key, channel),
            _ => return Ok(HttpResponse::error(400, "websocket upgrade requires Upgrade and Sec-WebSocket-Key")),
        };
        let worker_id = self.id;
        let slot = self.slot(token)?;
        if !matches!(slot.binding, Binding::WebSocket { .. }) {
            metrics::websocket_opened();
        }
        slot.binding = Binding::WebSocket {
            channel: channel.id,
            outbound: channel.outbound,
        };
        tracing::info!(
            worker_id,
            session = slot.app_session_id(),
            channel = channel.id,
            "WebSocket bound"
        );
        Ok(HttpResponse::switching_protocols(key))
    }

    /// Apply one patch document received on `channel` and return the
    /// response patch. Only the channel currently bound to the session is
    /// served; a replaced one gets `ChannelDisconnected`.
    pub fn handle_frame(
        &mut self,
        token: &SessionToken,
        channel: u64,
        payload: &[u8],
    ) -> Result<Bytes, WorkerError> {
        let app = Arc::clone(&self.app);
        let worker_id = self.id;
        let slot = self.table.resolve(token).ok_or(WorkerError::SessionNotFound)?;
        match slot.binding {
            Binding::WebSocket { channel: bound, .. } if bound == channel => {}
            _ => {
                tracing::debug!(worker_id, session = token.app_session_id, channel, "Frame from unbound channel");
                return Err(WorkerError::ChannelDisconnected);
            }
        }
        apply_client_patch(app.as_ref(), worker_id, slot, payload)?;
        Ok(outgoing_patch(slot))
    }

    /// Channel `channel` went away.
    pub fn unbind(&mut self, token: &SessionToken, channel: u64) {
        if self.table.unbind(token, channel) {
            metrics::websocket_closed();
            tracing::info!(worker_id = self.id, session = token.app_session_id, channel, "WebSocket closed");
        }
    }

    /// Run server-side logic against a session. If a WebSocket is bound the
    /// resulting patch is pushed right away.
    pub fn update(
        &mut self,
        token: &SessionToken,
        apply: impl FnOnce(&mut ViewModel),
    ) -> Result<Delivery, WorkerError> {
        let worker_id = self.id;
        let slot = self.table.resolve(token).ok_or(WorkerError::SessionNotFound)?;
        apply(slot.tree_mut());

        let Binding::WebSocket { outbound, .. } = &slot.binding else {
            return Ok(Delivery::Pending);
        };
        let outbound = outbound.clone();
        let delivery = match reserve(&outbound) {
            Ok(permit) => {
                permit.send(outgoing_patch(slot));
                Delivery::Pushed
            }
            Err(e) => {
                tracing::warn!(worker_id, session = token.app_session_id, error = %e, "Push deferred");
                Delivery::Pending
            }
        };
        Ok(delivery)
    }

    /// Full state without checkpointing.
    pub fn snapshot(&mut self, token: &SessionToken) -> Result<Value, WorkerError> {
        let slot = self.table.resolve(token).ok_or(WorkerError::SessionNotFound)?;
        Ok(slot.tree().to_value())
    }

    pub fn destroy_session(&mut self, token: &SessionToken) -> bool {
        let destroyed = self.table.destroy(token);
        if destroyed {
            metrics::record_session_destroyed("logout");
            metrics::set_active_sessions(self.id, self.table.active());
        }
        destroyed
    }

    /// Evict idle sessions as of `tick`.
    pub fn sweep(&mut self, tick: u64) {
        let evicted = self.table.sweep_inactive(tick);
        if evicted.is_empty() {
            return;
        }
        for session in &evicted {
            metrics::record_session_destroyed("idle");
            tracing::debug!(worker_id = self.id, session, "Idle session evicted");
        }
        metrics::set_active_sessions(self.id, self.table.active());
        tracing::info!(worker_id = self.id, evicted = evicted.len(), "Swept idle sessions");
    }

    fn slot(&mut self, token: &[u8]) -> Result<&mut SessionSlot, WorkerError> {
        let token = SessionToken::decode(token).ok_or(WorkerError::SessionNotFound)?;
        self.table.resolve(&token).ok_or(WorkerError::SessionNotFound)
    }
}

/// Room for one push on a channel's writer. A full queue counts as
/// disconnected; the worker never waits on a client. Reserving before the
/// change log is drained keeps undelivered changes for the next request.
fn reserve(outbound: &mpsc::Sender<Bytes>) -> Result<mpsc::Permit<'_, Bytes>, WorkerError> {
    outbound
        .try_reserve()
        .map_err(|_| WorkerError::ChannelDisconnected)
}

fn full_state_kind(request: &ParsedRequest<'_>) -> ResponseKind {
    match ResponseKind::negotiate(request.accept(), ResponseKind::FullJson) {
        ResponseKind::Html => ResponseKind::Html,
        _ => ResponseKind::FullJson,
    }
}

/// Apply a client document to the session, honouring version stamps when
/// the session has them.
fn apply_client_patch(
    app: &dyn Application,
    worker_id: u32,
    slot: &mut SessionSlot,
    body: &[u8],
) -> Result<usize, PatchError> {
    let session = slot.app_session_id();
    let result = apply_batches(app, slot, body);
    match &result {
        Ok(applied) => {
            metrics::record_patch_applied();
            tracing::debug!(worker_id, session, operations = applied, "Patch applied");
        }
        Err(e) => {
            metrics::record_patch_rejected();
            tracing::warn!(
                worker_id,
                session,
                operation_index = ?e.operation_index,
                error = %e,
                "Patch rejected"
            );
        }
    }
    result
}

fn apply_batches(app: &dyn Application, slot: &mut SessionSlot, body: &[u8]) -> Result<usize, PatchError> {
    let batches: Vec<(usize, Vec<Value>)> = match slot.versions.as_mut() {
        None => vec![(0, parse_document(body)?)],
        Some(versions) => versions
            .accept(body)?
            .into_iter()
            .map(|ready| (ReadyDocument::FIRST_INDEX, ready.elements))
            .collect(),
    };
    let tree = slot.tree_mut();
    let mut applied = 0;
    for (first_index, elements) in &batches {
        applied += apply_elements(tree, elements, *first_index, |vm, op| app.on_input(vm, op))?;
    }
    Ok(applied)
}

/// Drain the session's change log into a (stamped) patch document.
fn outgoing_patch(slot: &mut SessionSlot) -> Bytes {
    let records = slot.tree_mut().checkpoint();
    let mut document = encode(&records);
    if let Some(versions) = slot.versions.as_mut() {
        versions.stamp(&mut document);
    }
    Bytes::from(document.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::EmptyApplication;
    use crate::http::request::{parse, ParseLimits};
    use crate::patch::PatchOperation;
    use serde_json::json;

    fn worker() -> Worker {
        Worker::new(SessionTable::new(0, 8), Arc::new(EmptyApplication), "/vm")
    }

    fn send(worker: &mut Worker, raw: &str) -> HttpResponse {
        let request = parse(BufferView::new(raw.as_bytes()), &ParseLimits::default()).unwrap();
        let layout = *request.layout();
        worker.handle_request(raw.as_bytes(), layout, None)
    }

    fn patch_request(token: &str, accept: &str, body: &str) -> String {
        format!(
            "PATCH /vm/{token} HTTP/1.1\r\nHost: x\r\nAccept: {accept}\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        )
    }

    fn location_token(resp: &HttpResponse) -> String {
        resp.header("Location").unwrap().trim_start_matches("/vm/").to_string()
    }

    #[test]
    fn routes() {
        let check = |raw: &str| {
            let request = parse(BufferView::new(raw.as_bytes()), &ParseLimits::default()).unwrap();
            match Route::of(&request, "/vm") {
                Route::Create => "create",
                Route::Get(_) => "get",
                Route::Patch(_) => "patch",
                Route::Delete(_) => "delete",
                Route::Upgrade(_) => "upgrade",
                Route::NotFound => "404",
                Route::MethodNotAllowed => "405",
            }
        };
        assert_eq!(check("POST /vm HTTP/1.1\r\n\r\n"), "create");
        assert_eq!(check("GET /vm HTTP/1.1\r\n\r\n"), "405");
        assert_eq!(check("GET /vm/abc HTTP/1.1\r\n\r\n"), "get");
        assert_eq!(check("GET /vm/abc?x=1 HTTP/1.1\r\n\r\n"), "get");
        assert_eq!(check("DELETE /vm/abc HTTP/1.1\r\n\r\n"), "delete");
        assert_eq!(check("PUT /vm/abc HTTP/1.1\r\n\r\n"), "405");
        assert_eq!(check("GET /vm/wsupgrade/abc HTTP/1.1\r\n\r\n"), "upgrade");
        assert_eq!(check("GET /other HTTP/1.1\r\n\r\n"), "404");
        assert_eq!(check("GET /vmx/abc HTTP/1.1\r\n\r\n"), "404");
        assert_eq!(check("GET /vm/a/b HTTP/1.1\r\n\r\n"), "404");
    }

    #[test]
    fn create_get_patch_delete() {
        let mut worker = worker();
        let created = send(&mut worker, "POST /vm HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(created.status(), 201);
        let token = location_token(&created);
        assert_eq!(
            created.header("Set-Cookie"),
            Some(format!("ScSessionId={token}; HttpOnly").as_str())
        );
        assert_eq!(created.body().as_ref(), b"{}");

        let resp = send(
            &mut worker,
            &patch_request(&token, "application/json-patch+json", r#"[{"op":"add","path":"/name","value":"Joe"}]"#),
        );
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.header("Content-Type"), Some("application/json-patch+json"));
        // Client changes are not echoed back.
        assert_eq!(resp.body().as_ref(), b"[]");

        let resp = send(&mut worker, &format!("GET /vm/{token} HTTP/1.1\r\n\r\n"));
        assert_eq!(resp.body().as_ref(), br#"{"name":"Joe"}"#);

        let resp = send(&mut worker, &format!("DELETE /vm/{token} HTTP/1.1\r\n\r\n"));
        assert_eq!(resp.status(), 204);
        let resp = send(&mut worker, &format!("GET /vm/{token} HTTP/1.1\r\n\r\n"));
        assert_eq!(resp.status(), 404);
        let resp = send(&mut worker, &format!("DELETE /vm/{token} HTTP/1.1\r\n\r\n"));
        assert_eq!(resp.status(), 404);
    }

    #[test]
    fn bad_patch_reports_operation() {
        let mut worker = worker();
        let token = location_token(&send(&mut worker, "POST /vm HTTP/1.1\r\n\r\n"));
        let resp = send(
            &mut worker,
            &patch_request(&token, "*/*", r#"[{"op":"replace","path":"/missing/x","value":1}]"#),
        );
        assert_eq!(resp.status(), 400);
        let body: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["operationIndex"], 0);
        assert!(body["error"].as_str().unwrap().contains("/missing"));
        assert!(!body.to_string().contains(&token));
    }

    #[test]
    fn full_json_on_request() {
        let mut worker = worker();
        let token = location_token(&send(&mut worker, "POST /vm HTTP/1.1\r\n\r\n"));
        let resp = send(
            &mut worker,
            &patch_request(&token, "application/json", r#"[{"op":"add","path":"/a","value":1}]"#),
        );
        assert_eq!(resp.header("Content-Type"), Some("application/json"));
        assert_eq!(resp.body().as_ref(), br#"{"a":1}"#);
    }

    #[test]
    fn html_bootstrap() {
        let mut worker = worker();
        let token = location_token(&send(&mut worker, "POST /vm HTTP/1.1\r\n\r\n"));
        let resp = send(&mut worker, &format!("GET /vm/{token} HTTP/1.1\r\nAccept: text/html\r\n\r\n"));
        assert_eq!(resp.header("Content-Type"), Some("text/html; charset=utf-8"));
    }

    #[test]
    fn malformed_tokens_are_not_found() {
        let mut worker = worker();
        let resp = send(&mut worker, "GET /vm/not-a-token HTTP/1.1\r\n\r\n");
        assert_eq!(resp.status(), 404);
    }

    #[test]
    fn slots_exhausted_is_retryable() {
        let mut worker = Worker::new(SessionTable::new(0, 1), Arc::new(EmptyApplication), "/vm");
        assert_eq!(send(&mut worker, "POST /vm HTTP/1.1\r\n\r\n").status(), 201);
        let resp = send(&mut worker, "POST /vm HTTP/1.1\r\n\r\n");
        assert_eq!(resp.status(), 503);
        assert_eq!(resp.header("Retry-After"), Some("1"));
    }

    struct Doubler;

    impl Application for Doubler {
        fn initial_state(&self) -> Value {
            json!({"input": 0, "doubled": 0})
        }

        fn on_input(&self, vm: &mut ViewModel, op: &PatchOperation) {
            if op.path == "/input" {
                let n = vm.get("/input").ok().and_then(|v| v.as_i64()).unwrap_or(0);
                let _ = vm.set("/doubled", json!(n * 2));
            }
        }
    }

    /// Upgrade `token` onto channel `id` and return the channel's receiver.
    fn bind(worker: &mut Worker, token: &SessionToken, id: u64) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(4);
        let raw = format!(
            "GET /vm/wsupgrade/{token} HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n"
        );
        let request = parse(BufferView::new(raw.as_bytes()), &ParseLimits::default()).unwrap();
        let resp = worker.handle_request(raw.as_bytes(), *request.layout(), Some(ChannelRegistration { id, outbound: tx }));
        assert_eq!(resp.status(), 101);
        rx
    }

    #[test]
    fn application_changes_come_back_as_patch() {
        let mut worker = Worker::new(SessionTable::new(0, 2), Arc::new(Doubler), "/vm");
        let token = worker.create_session().unwrap();
        let _rx = bind(&mut worker, &token, 1);
        let patch = worker
            .handle_frame(&token, 1, br#"[{"op":"replace","path":"/input","value":21}]"#)
            .unwrap();
        assert_eq!(patch.as_ref(), br#"[{"op":"replace","path":"/doubled","value":42}]"#);
        assert_eq!(worker.snapshot(&token).unwrap(), json!({"input": 21, "doubled": 42}));
    }

    #[test]
    fn versioned_sessions_stamp_patches() {
        let table = SessionTable::new(0, 2).with_versioning(4);
        let mut worker = Worker::new(table, Arc::new(Doubler), "/vm");
        let token = worker.create_session().unwrap();
        let _rx = bind(&mut worker, &token, 1);
        let doc = json!([
            {"op": "replace", "path": "/_ver#c$", "value": 1},
            {"op": "test", "path": "/_ver#s", "value": 0},
            {"op": "replace", "path": "/input", "value": 2},
        ]);
        let patch = worker.handle_frame(&token, 1, doc.to_string().as_bytes()).unwrap();
        let patch: Value = serde_json::from_slice(&patch).unwrap();
        assert_eq!(
            patch,
            json!([
                {"op": "replace", "path": "/_ver#s", "value": 1},
                {"op": "test", "path": "/_ver#c$", "value": 1},
                {"op": "replace", "path": "/doubled", "value": 4},
            ])
        );

        let err = worker.handle_frame(&token, 1, doc.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, WorkerError::Patch(ref e) if e.message.contains("remote version mismatch")));
    }

    #[tokio::test]
    async fn updates_push_to_bound_channel() {
        let mut worker = worker();
        let token = worker.create_session().unwrap();
        assert_eq!(
            worker.update(&token, |vm| vm.set("/a", json!(1)).unwrap()).unwrap(),
            Delivery::Pending
        );

        let (tx, mut rx) = mpsc::channel(4);
        let raw = format!(
            "GET /vm/wsupgrade/{token} HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n"
        );
        let request = parse(BufferView::new(raw.as_bytes()), &ParseLimits::default()).unwrap();
        let resp = worker.handle_request(
            raw.as_bytes(),
            *request.layout(),
            Some(ChannelRegistration { id: 9, outbound: tx }),
        );
        assert_eq!(resp.status(), 101);
        assert_eq!(worker.stats().websocket_bound, 1);

        assert_eq!(
            worker.update(&token, |vm| vm.set("/b", json!(2)).unwrap()).unwrap(),
            Delivery::Pushed
        );
        let pushed = rx.recv().await.unwrap();
        assert_eq!(
            pushed.as_ref(),
            br#"[{"op":"add","path":"/a","value":1},{"op":"add","path":"/b","value":2}]"#
        );

        worker.unbind(&token, 9);
        assert_eq!(worker.stats().websocket_bound, 0);
        assert_eq!(worker.snapshot(&token).unwrap(), json!({"a": 1, "b": 2}));
    }

    #[tokio::test]
    async fn full_channel_keeps_changes_for_later() {
        let mut worker = worker();
        let token = worker.create_session().unwrap();
        let (tx, mut rx) = mpsc::channel(1);
        let raw = format!(
            "GET /vm/wsupgrade/{token} HTTP/1.1\r\nUpgrade: websocket\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n"
        );
        let request = parse(BufferView::new(raw.as_bytes()), &ParseLimits::default()).unwrap();
        let resp = worker.handle_request(raw.as_bytes(), *request.layout(), Some(ChannelRegistration { id: 1, outbound: tx }));
        assert_eq!(resp.status(), 101);

        let set = |key: &'static str| move |vm: &mut ViewModel| vm.set(key, json!(true)).unwrap();
        assert_eq!(worker.update(&token, set("/a")).unwrap(), Delivery::Pushed);
        assert_eq!(worker.update(&token, set("/b")).unwrap(), Delivery::Pending);

        rx.recv().await.unwrap();
        assert_eq!(worker.update(&token, set("/c")).unwrap(), Delivery::Pushed);
        let pushed = rx.recv().await.unwrap();
        assert_eq!(
            pushed.as_ref(),
            br#"[{"op":"add","path":"/b","value":true},{"op":"add","path":"/c","value":true}]"#
        );
    }

    #[test]
    fn frames_from_a_replaced_channel_are_refused() {
        let mut worker = Worker::new(SessionTable::new(0, 2), Arc::new(Doubler), "/vm");
        let token = worker.create_session().unwrap();
        let frame = br#"[{"op":"replace","path":"/input","value":1}]"#;

        assert_eq!(
            worker.handle_frame(&token, 1, frame).unwrap_err(),
            WorkerError::ChannelDisconnected
        );

        let _first = bind(&mut worker, &token, 1);
        let _second = bind(&mut worker, &token, 2);
        assert_eq!(worker.stats().websocket_bound, 1);
        assert_eq!(
            worker.handle_frame(&token, 1, frame).unwrap_err(),
            WorkerError::ChannelDisconnected
        );
        assert_eq!(worker.snapshot(&token).unwrap(), json!({"input": 0, "doubled": 0}));

        worker.handle_frame(&token, 2, frame).unwrap();
        assert_eq!(worker.snapshot(&token).unwrap(), json!({"input": 1, "doubled": 2}));
    }

    #[test]
    fn upgrade_without_key_is_rejected() {
        let mut worker = worker();
        let token = worker.create_session().unwrap();
        let resp = send(&mut worker, &format!("GET /vm/wsupgrade/{token} HTTP/1.1\r\n\r\n"));
        assert_eq!(resp.status(), 400);
    }
}
