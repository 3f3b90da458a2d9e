//! SPARQL triple-store backend.
//!
//! Talks to any store implementing the SPARQL 1.1 protocol (Fuseki, Oxigraph,
//! GraphDB...) through two endpoints: one for queries, one for updates. The
//! HTTP layer sits behind [`SparqlTransport`] so the backend logic can run
//! against an in-process fake.
//!
//! Network failures, timeouts and 5xx responses become `BackendUnavailable`
//! and are retried with bounded backoff, except for the access-count
//! increment, which is not idempotent. A 4xx response means the store
//! rejected the request and is surfaced immediately as `Validation`.
//!
//! Search downloads candidate entries and ranks them locally.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use semem_core::retry::RetryPolicy;
use semem_core::storage::backend::{StorageBackend, require_confirmation};
use semem_core::vector::rank_entries;
use semem_types::backend::{BackendKind, StorageStats, TripleStoreParams};
use semem_types::entry::{MemoryEntry, ScoredEntry};
use semem_types::error::MemoryError;
use tracing::{debug, warn};
use uuid::Uuid;

use super::sparql;

/// Carries SPARQL text to a store and brings results back.
pub trait SparqlTransport: Send + Sync {
    /// Run a query; returns the `application/sparql-results+json` body.
    fn query(
        &self,
        sparql: &str,
    ) -> impl Future<Output = Result<serde_json::Value, MemoryError>> + Send;

    /// Run an update.
    fn update(&self, sparql: &str) -> impl Future<Output = Result<(), MemoryError>> + Send;
}

// ---------------------------------------------------------------------------
// HTTP transport
// ---------------------------------------------------------------------------

/// SPARQL 1.1 protocol over HTTP with optional basic authentication.
///
/// The password is held as a [`SecretString`] and only exposed while building
/// the request. Debug output never includes it.
pub struct HttpSparqlTransport {
    client: reqwest::Client,
    query_endpoint: String,
    update_endpoint: String,
    username: Option<String>,
    password: Option<SecretString>,
}

impl HttpSparqlTransport {
    pub fn new(params: &TripleStoreParams) -> Result<Self, MemoryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(params.timeout_ms.max(1)))
            .build()
            .map_err(|e| MemoryError::unavailable("connect", e))?;
        Ok(Self {
            client,
            query_endpoint: params.query_endpoint.clone(),
            update_endpoint: params.update_endpoint.clone(),
            username: params.username.clone(),
            password: params.password.clone().map(SecretString::from),
        })
    }

    async fn post(
        &self,
        operation: &str,
        endpoint: &str,
        content_type: &str,
        body: &str,
    ) -> Result<reqwest::Response, MemoryError> {
        let mut request = self
            .client
            .post(endpoint)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header(reqwest::header::ACCEPT, "application/sparql-results+json")
            .body(body.to_string());
        if let Some(username) = &self.username {
            request = request.basic_auth(
                username,
                self.password.as_ref().map(|p| p.expose_secret().to_string()),
            );
        }

        let response = request
            .send()
            .await
            .map_err(|e| MemoryError::unavailable(operation, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let error_body = response.text().await.unwrap_or_default();
        warn!(status = %status, endpoint, operation, "SPARQL endpoint error response");
        if status.is_server_error() || status.as_u16() == 429 {
            Err(MemoryError::unavailable(
                operation,
                format!("HTTP {status}: {error_body}"),
            ))
        } else {
            Err(MemoryError::Validation(format!(
                "triple store rejected {operation} (HTTP {status}): {error_body}"
            )))
        }
    }
}

impl SparqlTransport for HttpSparqlTransport {
    async fn query(&self, sparql: &str) -> Result<serde_json::Value, MemoryError> {
        let response = self
            .post("query", &self.query_endpoint, "application/sparql-query", sparql)
            .await?;
        response
            .json()
            .await
            .map_err(|e| MemoryError::Serialization(format!("failed to parse SPARQL results: {e}")))
    }

    async fn update(&self, sparql: &str) -> Result<(), MemoryError> {
        self.post(
            "update",
            &self.update_endpoint,
            "application/sparql-update",
            sparql,
        )
        .await?;
        Ok(())
    }
}

impl std::fmt::Debug for HttpSparqlTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSparqlTransport")
            .field("query_endpoint", &self.query_endpoint)
            .field("update_endpoint", &self.update_endpoint)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Storage backend persisting entries as statements in one named graph.
#[derive(Debug)]
pub struct TripleStoreBackend<T = HttpSparqlTransport> {
    transport: T,
    graph: String,
    retry: RetryPolicy,
}

impl TripleStoreBackend<HttpSparqlTransport> {
    /// Build an HTTP-backed store from connection parameters.
    pub fn connect(params: &TripleStoreParams) -> Result<Self, MemoryError> {
        let transport = HttpSparqlTransport::new(params)?;
        Ok(Self::with_transport(
            transport,
            params.graph.clone(),
            RetryPolicy::with_attempts(params.max_retries),
        ))
    }
}

impl<T: SparqlTransport> TripleStoreBackend<T> {
    pub fn with_transport(transport: T, graph: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            graph: graph.into(),
            retry,
        }
    }

    pub fn graph(&self) -> &str {
        &self.graph
    }

    async fn query(&self, operation: &str, text: &str) -> Result<serde_json::Value, MemoryError> {
        self.retry
            .run(operation, || self.transport.query(text))
            .await
    }

    async fn update(&self, operation: &str, text: &str) -> Result<(), MemoryError> {
        self.retry
            .run(operation, || self.transport.update(text))
            .await
    }

    async fn count(&self) -> Result<u64, MemoryError> {
        let response = self
            .query("count", &sparql::count_entries(&self.graph))
            .await?;
        sparql::parse_count(response)
    }

    async fn exists(&self, id: &Uuid) -> Result<bool, MemoryError> {
        let response = self
            .query("get", &sparql::ask_entry(&self.graph, id))
            .await?;
        sparql::parse_ask(&response)
    }

    /// Fetch entries, skipping subjects that cannot be rebuilt.
    async fn fetch_entries(
        &self,
        operation: &str,
        page: Option<(usize, usize)>,
    ) -> Result<Vec<MemoryEntry>, MemoryError> {
        let response = self
            .query(operation, &sparql::select_entries(&self.graph, page))
            .await?;
        let mut entries = Vec::new();
        for (subject, parsed) in sparql::parse_entries(response)? {
            match parsed {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!(subject = %subject, error = %err, "skipping unreadable entry"),
            }
        }
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    /// One round-trip without retry; `false` on any failure.
    async fn healthy(&self) -> bool {
        match self.transport.query(sparql::HEALTH_PROBE).await {
            Ok(response) => sparql::parse_ask(&response).is_ok(),
            Err(err) => {
                debug!(error = %err, "triple store health probe failed");
                false
            }
        }
    }
}

impl<T: SparqlTransport> StorageBackend for TripleStoreBackend<T> {
    fn kind(&self) -> BackendKind {
        BackendKind::TripleStore
    }

    async fn store(&self, entry: &MemoryEntry) -> Result<Uuid, MemoryError> {
        entry.validate(None)?;
        let update = sparql::upsert_entry(&self.graph, entry)?;
        self.update("store", &update)
            .await
            .map_err(|e| e.with_id(entry.id))?;
        Ok(entry.id)
    }

    async fn get(&self, id: &Uuid) -> Result<Option<MemoryEntry>, MemoryError> {
        let response = self
            .query("get", &sparql::select_entry(&self.graph, id))
            .await
            .map_err(|e| e.with_id(*id))?;
        match sparql::parse_entries(response)?.into_iter().next() {
            Some((_, parsed)) => parsed.map(Some),
            None => Ok(None),
        }
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        min_similarity: f32,
        type_filter: Option<&[String]>,
    ) -> Result<Vec<ScoredEntry>, MemoryError> {
        let candidates = self.fetch_entries("search", None).await?;
        Ok(rank_entries(
            &candidates,
            query_embedding,
            k,
            min_similarity,
            type_filter,
        ))
    }

    async fn remove(&self, id: &Uuid) -> Result<bool, MemoryError> {
        if !self.exists(id).await.map_err(|e| e.with_id(*id))? {
            return Ok(false);
        }
        self.update("remove", &sparql::delete_entry(&self.graph, id))
            .await
            .map_err(|e| e.with_id(*id))?;
        Ok(true)
    }

    async fn clear(&self, confirm: bool) -> Result<u64, MemoryError> {
        require_confirmation(confirm)?;
        let count = self.count().await?;
        self.update("clear", &sparql::delete_all(&self.graph)).await?;
        Ok(count)
    }

    async fn stats(&self) -> Result<StorageStats, MemoryError> {
        if !self.healthy().await {
            return Ok(StorageStats {
                count: 0,
                size_bytes: None,
                backend_type: BackendKind::TripleStore,
                healthy: false,
                cache: None,
            });
        }
        Ok(StorageStats {
            count: self.count().await?,
            size_bytes: None,
            backend_type: BackendKind::TripleStore,
            healthy: true,
            cache: None,
        })
    }

    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<MemoryEntry>, MemoryError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.fetch_entries("list", Some((offset, limit))).await
    }

    async fn record_access(&self, id: &Uuid, at: DateTime<Utc>) -> Result<(), MemoryError> {
        // The update increments the access count in place. A timed-out attempt
        // may still have been applied, so it is sent once and never retried.
        self.transport
            .update(&sparql::record_access(&self.graph, id, &at))
            .await
            .map_err(|e| e.with_id(*id))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use semem_types::entry::Metadata;
    use serde_json::json;

    use super::*;
    use crate::storage::sparql::tests::{rows_for, select_response};

    /// Scripted transport: queries pop canned responses, updates are recorded.
    #[derive(Default)]
    pub(crate) struct FakeTransport {
        pub responses: Mutex<VecDeque<Result<serde_json::Value, MemoryError>>>,
        pub update_failures: Mutex<VecDeque<MemoryError>>,
        pub queries: Mutex<Vec<String>>,
        pub updates: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        pub fn respond(&self, response: serde_json::Value) {
            self.responses.lock().unwrap().push_back(Ok(response));
        }

        pub fn fail_query(&self, err: MemoryError) {
            self.responses.lock().unwrap().push_back(Err(err));
        }

        pub fn fail_update(&self, err: MemoryError) {
            self.update_failures.lock().unwrap().push_back(err);
        }

        pub fn query_count(&self) -> usize {
            self.queries.lock().unwrap().len()
        }
    }

    impl SparqlTransport for FakeTransport {
        async fn query(&self, sparql: &str) -> Result<serde_json::Value, MemoryError> {
            self.queries.lock().unwrap().push(sparql.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(select_response(Vec::new())))
        }

        async fn update(&self, sparql: &str) -> Result<(), MemoryError> {
            self.updates.lock().unwrap().push(sparql.to_string());
            match self.update_failures.lock().unwrap().pop_front() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn backend() -> TripleStoreBackend<FakeTransport> {
        TripleStoreBackend::with_transport(
            FakeTransport::default(),
            "http://example.org/memory",
            quick_retry(),
        )
    }

    fn entry(prompt: &str, embedding: Vec<f32>) -> MemoryEntry {
        MemoryEntry::new(prompt, "response", embedding, Metadata::new())
    }

    #[tokio::test]
    async fn test_store_issues_upsert_into_graph() {
        let backend = backend();
        let e = entry("what is SPARQL", vec![1.0, 0.0]);
        assert_eq!(backend.store(&e).await.unwrap(), e.id);
        let updates = backend.transport.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert!(updates[0].contains("GRAPH <http://example.org/memory>"));
        assert!(updates[0].contains("what is SPARQL"));
    }

    #[tokio::test]
    async fn test_get_parses_entry_and_missing_is_none() {
        let backend = backend();
        let e = entry("p", vec![0.5, 0.5]);
        backend.transport.respond(select_response(rows_for(&e)));
        assert_eq!(backend.get(&e.id).await.unwrap(), Some(e));
        assert_eq!(backend.get(&Uuid::now_v7()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let backend = backend();
        backend
            .transport
            .fail_update(MemoryError::unavailable("update", "connection reset"));
        let e = entry("p", vec![1.0]);
        backend.store(&e).await.unwrap();
        assert_eq!(backend.transport.updates.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_retries_are_bounded_and_carry_the_id() {
        let backend = backend();
        for _ in 0..5 {
            backend
                .transport
                .fail_update(MemoryError::unavailable("update", "timed out"));
        }
        let e = entry("p", vec![1.0]);
        match backend.store(&e).await {
            Err(MemoryError::BackendUnavailable { id, .. }) => assert_eq!(id, Some(e.id)),
            other => panic!("expected BackendUnavailable, got {other:?}"),
        }
        assert_eq!(backend.transport.updates.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_access_increment_is_sent_once_on_failure() {
        let backend = backend();
        backend
            .transport
            .fail_update(MemoryError::unavailable("update", "timed out"));
        let id = Uuid::now_v7();
        match backend.record_access(&id, Utc::now()).await {
            Err(MemoryError::BackendUnavailable { id: failed, .. }) => assert_eq!(failed, Some(id)),
            other => panic!("expected BackendUnavailable, got {other:?}"),
        }
        assert_eq!(backend.transport.updates.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_request_is_not_retried() {
        let backend = backend();
        backend
            .transport
            .fail_query(MemoryError::Validation("HTTP 400".into()));
        assert!(matches!(
            backend.get(&Uuid::now_v7()).await,
            Err(MemoryError::Validation(_))
        ));
        assert_eq!(backend.transport.query_count(), 1);
    }

    #[tokio::test]
    async fn test_search_ranks_downloaded_candidates() {
        let backend = backend();
        let a = entry("a", vec![1.0, 0.0, 0.0, 0.0]);
        let b = entry("b", vec![0.0, 1.0, 0.0, 0.0]);
        let c = entry("c", vec![0.9, 0.1, 0.0, 0.0]);
        let rows = [&a, &b, &c].into_iter().flat_map(rows_for).collect();
        backend.transport.respond(select_response(rows));
        let results = backend
            .search(&[1.0, 0.0, 0.0, 0.0], 2, 0.5, None)
            .await
            .unwrap();
        let ids: Vec<Uuid> = results.iter().map(|r| r.entry.id).collect();
        assert_eq!(ids, vec![a.id, c.id]);
    }

    #[tokio::test]
    async fn test_remove_checks_existence_first() {
        let backend = backend();
        backend.transport.respond(json!({ "boolean": false }));
        assert!(!backend.remove(&Uuid::now_v7()).await.unwrap());
        assert!(backend.transport.updates.lock().unwrap().is_empty());

        backend.transport.respond(json!({ "boolean": true }));
        assert!(backend.remove(&Uuid::now_v7()).await.unwrap());
        assert_eq!(backend.transport.updates.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_requires_confirmation_and_reports_count() {
        let backend = backend();
        assert!(backend.clear(false).await.is_err());
        assert!(backend.transport.updates.lock().unwrap().is_empty());

        backend.transport.respond(json!({
            "head": { "vars": ["count"] },
            "results": { "bindings": [ { "count": { "type": "literal", "value": "3" } } ] },
        }));
        assert_eq!(backend.clear(true).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_stats_reports_unhealthy_store() {
        let backend = backend();
        backend
            .transport
            .fail_query(MemoryError::unavailable("query", "connection refused"));
        let stats = backend.stats().await.unwrap();
        assert!(!stats.healthy);
        assert_eq!(stats.backend_type, BackendKind::TripleStore);
    }

    #[tokio::test]
    async fn test_cached_store_serves_second_get_from_cache() {
        use semem_core::cache::CachedBackend;

        let cached = CachedBackend::new(backend(), 16);
        let e = entry("cache me", vec![1.0, 0.0]);
        cached.store(&e).await.unwrap();
        cached
            .inner()
            .transport
            .respond(select_response(rows_for(&e)));

        let first = cached.get(&e.id).await.unwrap();
        assert_eq!(first.as_ref(), Some(&e));
        let stats = cached.cache_stats();
        assert_eq!((stats.hits, stats.misses), (0, 1));
        let queries_after_first = cached.inner().transport.query_count();

        let second = cached.get(&e.id).await.unwrap();
        assert_eq!(second, Some(e));
        let stats = cached.cache_stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert_eq!(cached.inner().transport.query_count(), queries_after_first);
        assert_eq!(cached.kind(), BackendKind::CachedTripleStore);
    }

    #[test]
    fn test_http_transport_debug_hides_password() {
        let params = TripleStoreParams {
            username: Some("admin".into()),
            password: Some("hunter2".into()),
            ..Default::default()
        };
        let transport = HttpSparqlTransport::new(&params).unwrap();
        let debug = format!("{transport:?}");
        assert!(debug.contains("admin"));
        assert!(!debug.contains("hunter2"));
    }
}
