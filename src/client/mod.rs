//! HTTP client for the tracker protocol, used by the CLI and by anything
//! embedding the library as a sync agent.

mod mirror;

pub use mirror::LocalMirror;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::codec;
use crate::notes::NoteUpdate;
use crate::protocol::*;
use crate::tags::Operation;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {kind}: {message}")]
    Server { kind: String, message: String },
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Transport failures and lock contention are worth retrying later.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Http(_) => true,
            ClientError::Server { kind, .. } => kind == "lock_unavailable",
            ClientError::Decode(_) => false,
        }
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

pub struct TrackerClient {
    endpoint: String,
    http: reqwest::Client,
}

impl TrackerClient {
    pub fn new(endpoint: impl Into<String>) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;
        Ok(Self { endpoint: endpoint.into(), http })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn action_url(&self, action: &str) -> String {
        let sep = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{sep}action={action}", self.endpoint)
    }

    async fn get_action<T: DeserializeOwned>(&self, action: &str) -> ClientResult<T> {
        let resp = self.http.get(self.action_url(action)).send().await?;
        decode_response(resp).await
    }

    async fn post_action<B: Serialize, T: DeserializeOwned>(
        &self,
        action: &str,
        body: &B,
    ) -> ClientResult<T> {
        let body = with_action(action, body).map_err(|e| ClientError::Decode(e.to_string()))?;
        let resp = self.http.post(&self.endpoint).json(&body).send().await?;
        decode_response(resp).await
    }

    pub async fn ping(&self) -> ClientResult<String> {
        self.get_action(ACTION_PING).await
    }

    pub async fn last_modified(&self) -> ClientResult<Option<String>> {
        #[derive(serde::Deserialize)]
        struct Reply {
            last_modified: Option<String>,
        }
        let reply: Reply = self.get_action(ACTION_LAST_MODIFIED).await?;
        Ok(reply.last_modified)
    }

    /// True when the server has changed since `known` was observed.
    /// An unset server stamp is never newer than anything.
    pub async fn is_stale(&self, known: Option<&str>) -> ClientResult<bool> {
        let current = self.last_modified().await?;
        Ok(match (current.as_deref(), known) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(current), Some(known)) => current != known,
        })
    }

    pub async fn batch_update(&self, operations: &[Operation]) -> ClientResult<UpdateSummary> {
        let body = BatchUpdateRequest { operations: operations.to_vec() };
        self.post_action(ACTION_BATCH_UPDATE, &body).await
    }

    /// Returns how many notes changed.
    pub async fn batch_notes(&self, updates: &[NoteUpdate]) -> ClientResult<usize> {
        #[derive(serde::Deserialize)]
        struct Reply {
            updated: usize,
        }
        let body = BatchNotesRequest { note_updates: updates.to_vec() };
        let reply: Reply = self.post_action(ACTION_BATCH_NOTES, &body).await?;
        Ok(reply.updated)
    }

    /// Seed a fresh store. Returns the server's message, which is
    /// "Already initialized" when the store was seeded before.
    pub async fn initialize(&self, init_data: Map<String, Value>) -> ClientResult<String> {
        #[derive(serde::Deserialize)]
        struct Reply {
            message: String,
        }
        let reply: Reply = self
            .post_action(ACTION_INITIALIZE, &InitializeRequest { init_data })
            .await?;
        Ok(reply.message)
    }

    /// Send everything queued as one `sync` request and return the server's
    /// full state. On failure the edits are put back in the queue.
    pub async fn flush(&self, queue: &mut SyncQueue, compress: bool) -> ClientResult<SyncResult> {
        let pending = queue.take();
        let count = pending.len();
        let body = SyncRequest { queue: pending, compress };
        match self.post_action::<_, SyncResult>(ACTION_SYNC, &body).await {
            Ok(result) => {
                tracing::debug!(count, "sync queue flushed");
                Ok(result)
            }
            Err(e) => {
                tracing::warn!(count, "sync failed, re-queueing edits: {e}");
                queue.restore(body.queue);
                Err(e)
            }
        }
    }

    /// Pull server state into `mirror` if it changed since the mirror's stamp.
    /// Returns whether a refresh happened.
    pub async fn refresh(&self, mirror: &mut LocalMirror) -> ClientResult<bool> {
        if !self.is_stale(mirror.last_modified()).await? {
            return Ok(false);
        }
        let result = self.flush(&mut SyncQueue::new(), false).await?;
        let stamp = self.last_modified().await?;
        mirror.reconcile(result, stamp);
        Ok(true)
    }
}

async fn decode_response<T: DeserializeOwned>(resp: reqwest::Response) -> ClientResult<T> {
    let status = resp.status();
    let text = resp.text().await?;
    let envelope: Envelope = serde_json::from_str(&text)
        .map_err(|e| ClientError::Decode(format!("HTTP {status}: {e}")))?;

    if !envelope.is_success() {
        return Err(ClientError::Server {
            kind: envelope.kind.unwrap_or_else(|| "generic_internal".to_string()),
            message: envelope.message.unwrap_or_default(),
        });
    }

    let data = envelope.data.unwrap_or(Value::Null);
    let data = if envelope.compressed {
        let encoded = data
            .as_str()
            .ok_or_else(|| ClientError::Decode("compressed payload is not a string".into()))?;
        let json = codec::decompress_text(encoded).map_err(|e| ClientError::Decode(e.to_string()))?;
        serde_json::from_str(&json).map_err(|e| ClientError::Decode(e.to_string()))?
    } else {
        data
    };
    serde_json::from_value(data).map_err(|e| ClientError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::engine::{Tracker, TrackerOptions};
    use crate::store::MemoryStore;
    use crate::AppState;
    use mockito::Matcher;
    use serde_json::json;
    use std::sync::Arc;

    fn envelope(data: Value) -> String {
        serde_json::to_string(&Envelope::success(data)).unwrap()
    }

    #[tokio::test]
    async fn ping_reads_envelope_data() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/")
            .match_query(Matcher::UrlEncoded("action".into(), "ping".into()))
            .with_header("content-type", "application/json")
            .with_body(envelope(json!("Connection established!")))
            .create_async()
            .await;

        let client = TrackerClient::new(format!("{}/", server.url())).unwrap();
        assert_eq!(client.ping().await.unwrap(), "Connection established!");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_error_maps_to_kind() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::to_string(&Envelope::error("lock_unavailable", "busy")).unwrap();
        server
            .mock("POST", "/")
            .with_status(503)
            .with_body(body)
            .create_async()
            .await;

        let client = TrackerClient::new(format!("{}/", server.url())).unwrap();
        let err = client.batch_update(&[Operation::add("w", "1")]).await.unwrap_err();
        match &err {
            ClientError::Server { kind, message } => {
                assert_eq!(kind, "lock_unavailable");
                assert_eq!(message, "busy");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn non_envelope_body_is_decode_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/")
            .match_query(Matcher::Any)
            .with_status(502)
            .with_body("<html>bad gateway</html>")
            .create_async()
            .await;

        let client = TrackerClient::new(format!("{}/", server.url())).unwrap();
        let err = client.last_modified().await.unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn failed_flush_restores_queue() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(500)
            .with_body(serde_json::to_string(&Envelope::error("generic_internal", "boom")).unwrap())
            .create_async()
            .await;

        let client = TrackerClient::new(format!("{}/", server.url())).unwrap();
        let mut queue = SyncQueue::new();
        queue.push_operation(Operation::add("w", "1"));
        queue.push_note(NoteUpdate::upsert("1", "note", "2024-01-01"));

        assert!(client.flush(&mut queue, false).await.is_err());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.operations[0].key, "w");
    }

    #[tokio::test]
    async fn compressed_sync_payload_is_decoded() {
        let mut server = mockito::Server::new_async().await;
        let result = SyncResult {
            success: true,
            status_data: [("w".to_string(), "1,2".to_string())].into_iter().collect(),
            ..SyncResult::default()
        };
        let packed = codec::compress_text(&serde_json::to_string(&result).unwrap()).unwrap();
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"action": "sync", "compress": true})))
            .with_body(serde_json::to_string(&Envelope::compressed(packed)).unwrap())
            .create_async()
            .await;

        let client = TrackerClient::new(format!("{}/", server.url())).unwrap();
        let got = client.flush(&mut SyncQueue::new(), true).await.unwrap();
        assert_eq!(got, result);
    }

    #[test]
    fn action_url_respects_existing_query() {
        let client = TrackerClient::new("https://script.example/exec?v=2").unwrap();
        assert_eq!(client.action_url("ping"), "https://script.example/exec?v=2&action=ping");
        let client = TrackerClient::new("http://127.0.0.1:8787/").unwrap();
        assert_eq!(client.action_url("ping"), "http://127.0.0.1:8787/?action=ping");
    }

    #[tokio::test]
    async fn end_to_end_against_router() {
        let tracker = Arc::new(Tracker::new(Arc::new(MemoryStore::new()), TrackerOptions::default()));
        let state = Arc::new(AppState::new(tracker, ServerConfig::default()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(crate::sync_http::serve(listener, state.clone()));

        let client = TrackerClient::new(format!("http://{addr}/")).unwrap();
        assert_eq!(client.ping().await.unwrap(), PING_REPLY);
        assert_eq!(client.last_modified().await.unwrap(), None);

        let mut init = Map::new();
        init.insert("work_123".into(), json!("1,2,3"));
        assert!(client.initialize(init.clone()).await.unwrap().starts_with("Initialized"));
        assert_eq!(client.initialize(init).await.unwrap(), ALREADY_INITIALIZED);

        let summary = client.batch_update(&[Operation::add("work_123", "4")]).await.unwrap();
        assert_eq!(summary, UpdateSummary { updated: 1, operations_processed: 1 });

        let mut mirror = LocalMirror::new();
        assert!(client.refresh(&mut mirror).await.unwrap());
        assert_eq!(mirror.tags("work_123"), vec!["1", "2", "3", "4"]);
        assert!(!client.refresh(&mut mirror).await.unwrap());

        assert_eq!(client.batch_notes(&[NoteUpdate::upsert("55", "great", "2024-01-01")]).await.unwrap(), 1);
        assert!(client.is_stale(mirror.last_modified()).await.unwrap());

        state.shutdown();
    }
}
