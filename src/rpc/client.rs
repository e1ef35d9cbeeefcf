//! Typed facade over [`RpcConnection`].
//!
//! Each method is exactly one `send()`: no caching, no retries. A non-200
//! status comes back as `Ok(Response)` for the caller to interpret.

use std::time::Duration;

use tokio::sync::watch;

use super::call::{BookmarkData, LeafPolicy, NewTag, RpcCall, TagUpdate};
use super::connection::{ConnectionState, PendingResponse, RpcConnection};
use super::RpcError;
use crate::config::Config;
use crate::protocol::Response;

/// Authenticated client for the bookmark service.
#[derive(Debug, Clone)]
pub struct RpcClient {
    conn: RpcConnection,
}

impl RpcClient {
    /// Wrap an existing connection.
    pub fn new(conn: RpcConnection) -> Self {
        Self { conn }
    }

    /// Connect to the configured server with `token`.
    pub fn open(config: &Config, token: &str) -> Self {
        Self::new(RpcConnection::open(config, token))
    }

    /// Submit an operation. The request is enqueued before this returns.
    pub fn call(&self, call: &RpcCall) -> PendingResponse {
        log::debug!("[RpcClient] {}", call.func_name());
        self.conn.send(call.to_request())
    }

    /// Like [`call`](Self::call), but gives up after `limit`.
    ///
    /// The connection keeps retrying in the background; only this caller
    /// stops waiting.
    pub async fn call_with_timeout(
        &self,
        call: &RpcCall,
        limit: Duration,
    ) -> Result<Response, RpcError> {
        tokio::time::timeout(limit, self.call(call))
            .await
            .map_err(|_| RpcError::Timeout(limit))?
    }

    /// Whole tag tree.
    pub async fn get_tags_tree(&self) -> Result<Response, RpcError> {
        self.call(&RpcCall::GetTagsTree).await
    }

    /// One tag by path or id.
    pub async fn get_tag(&self, tag: impl Into<String>) -> Result<Response, RpcError> {
        self.call(&RpcCall::GetTag { tag: tag.into() }).await
    }

    /// Tags matching `pattern`.
    pub async fn get_tags_by_pattern(
        &self,
        pattern: impl Into<String>,
        allow_new: bool,
    ) -> Result<Response, RpcError> {
        self.call(&RpcCall::GetTagsByPattern {
            pattern: pattern.into(),
            allow_new,
        })
        .await
    }

    /// Create a tag under `parent`.
    pub async fn add_tag(
        &self,
        parent: impl Into<String>,
        data: NewTag,
    ) -> Result<Response, RpcError> {
        self.call(&RpcCall::AddTag {
            parent: parent.into(),
            data,
        })
        .await
    }

    /// Update a tag.
    pub async fn update_tag(
        &self,
        tag: impl Into<String>,
        data: TagUpdate,
    ) -> Result<Response, RpcError> {
        self.call(&RpcCall::UpdateTag {
            tag: tag.into(),
            data,
        })
        .await
    }

    /// Delete a tag.
    pub async fn delete_tag(
        &self,
        tag: impl Into<String>,
        policy: LeafPolicy,
    ) -> Result<Response, RpcError> {
        self.call(&RpcCall::DeleteTag {
            tag: tag.into(),
            policy,
        })
        .await
    }

    /// Bookmarks tagged with all of `tag_ids`.
    pub async fn get_tagged_bookmarks(&self, tag_ids: Vec<u64>) -> Result<Response, RpcError> {
        self.call(&RpcCall::GetTaggedBookmarks { tag_ids }).await
    }

    /// Bookmarks for `url`.
    pub async fn get_bookmarks_by_url(&self, url: impl Into<String>) -> Result<Response, RpcError> {
        self.call(&RpcCall::GetBookmarksByUrl { url: url.into() })
            .await
    }

    /// One bookmark.
    pub async fn get_bookmark_by_id(&self, id: u64) -> Result<Response, RpcError> {
        self.call(&RpcCall::GetBookmarkById { id }).await
    }

    /// Create a bookmark.
    pub async fn add_bookmark(&self, data: BookmarkData) -> Result<Response, RpcError> {
        self.call(&RpcCall::AddBookmark { data }).await
    }

    /// Update a bookmark.
    pub async fn update_bookmark(&self, id: u64, data: BookmarkData) -> Result<Response, RpcError> {
        self.call(&RpcCall::UpdateBookmark { id, data }).await
    }

    /// Delete a bookmark.
    pub async fn delete_bookmark(&self, id: u64) -> Result<Response, RpcError> {
        self.call(&RpcCall::DeleteBookmark { id }).await
    }

    /// See [`RpcConnection::on_connected`].
    pub fn on_connected<F>(&self, invoke_if_connected: bool, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.conn.on_connected(invoke_if_connected, callback);
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.conn.subscribe_state()
    }

    /// Underlying connection.
    pub fn connection(&self) -> &RpcConnection {
        &self.conn
    }

    /// Shut the connection down.
    pub fn close(&self) {
        self.conn.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectConfig;
    use crate::protocol::{Method, QueryValue, Request};
    use crate::rpc::connection::ConnectionOptions;
    use crate::rpc::transport::memory::{MemoryConnector, MemoryServerConn};
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn client() -> (RpcClient, mpsc::UnboundedReceiver<MemoryServerConn>) {
        let (connector, accept_rx) = MemoryConnector::new();
        let options = ConnectionOptions {
            pacing_delay: None,
            reconnect: ReconnectConfig {
                auto_reconnect: false,
                ..ReconnectConfig::default()
            },
        };
        let conn = RpcConnection::new(Arc::new(connector), options);
        (RpcClient::new(conn), accept_rx)
    }

    #[tokio::test]
    async fn test_each_call_is_one_request() {
        let (client, mut accept_rx) = client();

        let c = client.clone();
        let task = tokio::spawn(async move { c.get_tags_by_pattern("wor", true).await });
        let mut server = accept_rx.recv().await.unwrap();

        let text = server.from_client.recv().await.unwrap();
        let req: Request = serde_json::from_str(&text).unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.values["allow_new"], QueryValue::from("1"));
        server
            .to_client
            .send(json!({"id": req.id, "status": 200, "body": [{"path": "/work"}]}).to_string())
            .unwrap();

        let resp = task.await.unwrap().unwrap();
        assert_eq!(resp.body[0]["path"], "/work");
        assert!(server.from_client.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_application_error_is_data() {
        let (client, mut accept_rx) = client();
        let pending = client.call(&RpcCall::DeleteBookmark { id: 5 });
        let mut server = accept_rx.recv().await.unwrap();

        let text = server.from_client.recv().await.unwrap();
        let req: Request = serde_json::from_str(&text).unwrap();
        assert_eq!(req.path, "/bookmarks/5");
        server
            .to_client
            .send(json!({"id": req.id, "status": 403, "body": {"message": "forbidden"}}).to_string())
            .unwrap();

        let resp = pending.await.unwrap();
        assert_eq!(resp.status, 403);
        assert_eq!(resp.body["message"], "forbidden");
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_with_timeout_gives_up_on_unreachable_server() {
        let (connector, _accept_rx) = MemoryConnector::new();
        connector.set_refuse(true);
        let conn = RpcConnection::new(Arc::new(connector), ConnectionOptions::default());
        let client = RpcClient::new(conn);

        let result = client
            .call_with_timeout(&RpcCall::GetTagsTree, Duration::from_secs(30))
            .await;
        assert!(matches!(result, Err(RpcError::Timeout(limit)) if limit == Duration::from_secs(30)));
        client.close();
    }
}
