//! Shared fakes for unit tests.

use async_trait::async_trait;
use scriptorium_embed::{EmbedError, EmbeddingProvider, EmbeddingResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::vector::{IndexError, IndexResult, Metadata, VectorIndex, VectorMatch, VectorRecord};

pub const DIMS: usize = 8;

/// Deterministic embedder: letter frequencies folded into [`DIMS`] buckets.
#[derive(Default)]
pub struct FakeEmbedder {
    pub calls: AtomicUsize,
    pub failing: AtomicBool,
}

impl FakeEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let embedder = Self::default();
        embedder.failing.store(true, Ordering::SeqCst);
        Arc::new(embedder)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIMS];
        for c in text.chars().filter(|c| c.is_alphanumeric()) {
            v[(c.to_ascii_lowercase() as usize) % DIMS] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    async fn embed_text(&self, text: &str) -> scriptorium_embed::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(EmbedError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(Self::vector_for(text))
    }

    async fn embed_texts(&self, texts: &[String]) -> scriptorium_embed::Result<EmbeddingResult> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed_text(text).await?);
        }
        Ok(EmbeddingResult::new(embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        DIMS
    }

    fn provider_name(&self) -> &str {
        "fake"
    }
}

/// In-memory index recording every upsert; can be told to reject them.
#[derive(Default)]
pub struct MemoryIndex {
    pub records: Mutex<HashMap<String, VectorRecord>>,
    pub upserts: AtomicUsize,
    pub reject_upserts: AtomicBool,
}

impl MemoryIndex {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn get(&self, id: &str) -> Option<VectorRecord> {
        self.records.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(&self, record: VectorRecord) -> IndexResult<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        if self.reject_upserts.load(Ordering::SeqCst) {
            return Err(IndexError::Status {
                status: 400,
                body: "rejected".to_string(),
            });
        }
        self.records
            .lock()
            .unwrap()
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &Metadata,
    ) -> IndexResult<Vec<VectorMatch>> {
        let records = self.records.lock().unwrap();
        let mut matches: Vec<VectorMatch> = records
            .values()
            .filter(|r| crate::vector::matches_filter(&r.metadata, filter))
            .map(|r| VectorMatch {
                id: r.id.clone(),
                score: r.embedding.iter().zip(vector).map(|(a, b)| a * b).sum(),
                metadata: r.metadata.clone(),
            })
            .collect();
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn fetch(&self, ids: &[String]) -> IndexResult<HashMap<String, VectorRecord>> {
        let records = self.records.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| records.get(id).map(|r| (id.clone(), r.clone())))
            .collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Minimal HTTP/1.1 server answering each connection with the next canned response.
pub struct StubServer {
    addr: std::net::SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StubServer {
    pub async fn start(responses: Vec<(u16, &'static str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&requests);

        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let request = read_request(&mut socket).await;
                captured.lock().unwrap().push(request);
                let reply = format!(
                    "HTTP/1.1 {status} STUB\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        Self { addr, requests }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        let Some(header_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
        let content_length = headers
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buf.len() >= header_end + 4 + content_length {
            break;
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}
