//! Pinecone-style HTTP vector index.
//!
//! | Operation | Request |
//! |---|---|
//! | upsert | `POST /vectors/upsert` |
//! | query | `POST /query` with `{"field": {"$eq": value}}` filters |
//! | fetch | `GET /vectors/fetch?ids=…` |
//! | readiness | `POST /describe_index_stats` |
//!
//! Every request carries the `Api-Key` header and, when configured, the namespace.

use super::{IndexError, IndexResult, Metadata, VectorIndex, VectorMatch, VectorRecord};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Clone)]
pub struct HttpVectorIndex {
    client: reqwest::Client,
    host: String,
    api_key: String,
    namespace: Option<String>,
}

impl std::fmt::Debug for HttpVectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpVectorIndex")
            .field("host", &self.host)
            .field("namespace", &self.namespace)
            .finish()
    }
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<VectorMatch>,
}

#[derive(Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: HashMap<String, VectorRecord>,
}

impl HttpVectorIndex {
    /// `host` may be given with or without a scheme; `https://` is assumed.
    pub fn new(
        host: &str,
        api_key: &str,
        namespace: Option<String>,
        timeout: Duration,
    ) -> IndexResult<Self> {
        let host = host.trim().trim_end_matches('/');
        if host.is_empty() {
            return Err(IndexError::config("vector_index.host is not set"));
        }
        if api_key.trim().is_empty() {
            return Err(IndexError::config("vector index API key is not set"));
        }

        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{host}")
        };

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            host,
            api_key: api_key.to_string(),
            namespace: namespace.filter(|ns| !ns.is_empty()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }

    async fn check(response: reqwest::Response) -> IndexResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(IndexError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn post(&self, path: &str, body: Value) -> IndexResult<reqwest::Response> {
        let response = self
            .client
            .post(self.url(path))
            .header("Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        Self::check(response).await
    }

    fn with_namespace(&self, mut body: Value) -> Value {
        if let (Some(ns), Some(object)) = (&self.namespace, body.as_object_mut()) {
            object.insert("namespace".to_string(), ns.clone().into());
        }
        body
    }

    /// Readiness probe.
    pub async fn describe(&self) -> IndexResult<Value> {
        let response = self.post("/describe_index_stats", json!({})).await?;
        Ok(serde_json::from_str(&response.text().await?)?)
    }
}

/// Turn an exact-match filter into `$eq` clauses.
fn eq_filter(filter: &Metadata) -> Value {
    let clauses: serde_json::Map<String, Value> = filter
        .iter()
        .map(|(key, value)| (key.clone(), json!({ "$eq": value })))
        .collect();
    Value::Object(clauses)
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    async fn upsert(&self, record: VectorRecord) -> IndexResult<()> {
        let body = self.with_namespace(json!({ "vectors": [record] }));
        self.post("/vectors/upsert", body).await?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &Metadata,
    ) -> IndexResult<Vec<VectorMatch>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut body = json!({
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
        });
        if !filter.is_empty() {
            body["filter"] = eq_filter(filter);
        }
        let response = self.post("/query", self.with_namespace(body)).await?;
        let parsed: QueryResponse = serde_json::from_str(&response.text().await?)?;
        Ok(parsed.matches)
    }

    async fn fetch(&self, ids: &[String]) -> IndexResult<HashMap<String, VectorRecord>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut params: Vec<(&str, &str)> = ids.iter().map(|id| ("ids", id.as_str())).collect();
        if let Some(ns) = &self.namespace {
            params.push(("namespace", ns.as_str()));
        }

        let response = self
            .client
            .get(self.url("/vectors/fetch"))
            .header("Api-Key", &self.api_key)
            .query(&params)
            .send()
            .await?;
        let response = Self::check(response).await?;
        let parsed: FetchResponse = serde_json::from_str(&response.text().await?)?;
        Ok(parsed.vectors)
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubServer;

    fn index(base: &str) -> HttpVectorIndex {
        HttpVectorIndex::new(base, "secret", Some("books".to_string()), Duration::from_secs(5))
            .unwrap()
    }

    #[test]
    fn test_missing_host_or_key_is_config_error() {
        let err = HttpVectorIndex::new("", "key", None, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, IndexError::Config { .. }));
        let err = HttpVectorIndex::new("idx.example.io", " ", None, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, IndexError::Config { .. }));
    }

    #[test]
    fn test_host_gets_scheme() {
        let index = HttpVectorIndex::new("idx.example.io/", "k", None, Duration::from_secs(1))
            .unwrap();
        assert_eq!(index.url("/query"), "https://idx.example.io/query");
    }

    #[test]
    fn test_eq_filter() {
        let mut filter = Metadata::new();
        filter.insert("path".to_string(), "a.txt".into());
        assert_eq!(eq_filter(&filter), json!({"path": {"$eq": "a.txt"}}));
    }

    #[tokio::test]
    async fn test_query_sends_filter_and_parses_matches() {
        let server = StubServer::start(vec![(
            200,
            r#"{"matches":[{"id":"a.txt:1","score":0.9,"metadata":{"path":"a.txt","index":1,"hash":"h"}}]}"#,
        )])
        .await;
        let index = index(&server.base_url());

        let mut filter = Metadata::new();
        filter.insert("hash".to_string(), "h".into());
        let matches = index.query(&[0.1, 0.2], 3, &filter).await.unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "a.txt:1");
        assert_eq!(matches[0].metadata["index"], 1);

        let requests = server.requests();
        assert!(requests[0].starts_with("POST /query"));
        assert!(requests[0].to_lowercase().contains("api-key: secret"));
        assert!(requests[0].contains(r#""$eq":"h""#));
        assert!(requests[0].contains(r#""namespace":"books""#));
    }

    #[tokio::test]
    async fn test_float_chunk_index_is_recovered() {
        let server = StubServer::start(vec![(
            200,
            r#"{"matches":[{"id":"a.txt:1","score":0.8,"metadata":{"path":"a.txt","index":1.0,"hash":"h"}}]}"#,
        )])
        .await;
        let index = index(&server.base_url());

        let matches = index.query(&[0.1, 0.2], 3, &Metadata::new()).await.unwrap();
        assert!(matches[0].metadata["index"].is_f64());

        let chunks = vec!["zero".to_string(), "one".to_string()];
        let recovered = crate::retrieval::search::recover_chunks(&matches, &chunks);
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].text, "one");
    }

    #[tokio::test]
    async fn test_upsert_and_fetch() {
        let server = StubServer::start(vec![
            (200, r#"{"upsertedCount":1}"#),
            (
                200,
                r#"{"vectors":{"a.txt:0":{"id":"a.txt:0","values":[1.0,0.0],"metadata":{"path":"a.txt"}}}}"#,
            ),
        ])
        .await;
        let index = index(&server.base_url());

        index
            .upsert(VectorRecord::for_chunk("a.txt", 0, "h", vec![1.0, 0.0]))
            .await
            .unwrap();
        let fetched = index.fetch(&["a.txt:0".to_string()]).await.unwrap();
        assert_eq!(fetched["a.txt:0"].embedding, vec![1.0, 0.0]);

        let requests = server.requests();
        assert!(requests[0].starts_with("POST /vectors/upsert"));
        assert!(requests[0].contains(r#""values":[1.0,0.0]"#));
        assert!(requests[1].starts_with("GET /vectors/fetch?ids=a.txt%3A0&namespace=books"));
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = StubServer::start(vec![(503, "overloaded")]).await;
        let index = index(&server.base_url());
        let err = index.describe().await.unwrap_err();
        assert!(matches!(err, IndexError::Status { status: 503, .. }));
    }
}
