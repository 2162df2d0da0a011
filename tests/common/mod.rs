#![allow(dead_code)]

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use serde_json::Value;
use tokio::net::TcpListener;
use faketransfer::alist_client::AlistClient;
use faketransfer::aliyun_client::AliyunClient;
use faketransfer::config::{AlistConfig, AliyunConfig};
use faketransfer::token_cache::{CachedToken, TokenCache, TokenStore, TOKEN_CACHE_KEY};

#[derive(Debug, Clone)]
pub struct Hit {
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub cookie: Option<String>,
    pub body: Value,
}

type Handler = Arc<dyn Fn(&Hit) -> (u16, Value) + Send + Sync>;

/// In-process HTTP server answering every request through `handler` and
/// recording what it saw.
pub struct MockServer {
    pub url: String,
    hits: Arc<Mutex<Vec<Hit>>>,
}

impl MockServer {
    pub async fn start(handler: impl Fn(&Hit) -> (u16, Value) + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let hits: Arc<Mutex<Vec<Hit>>> = Arc::new(Mutex::new(Vec::new()));
        let handler: Handler = Arc::new(handler);

        let server_hits = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let io = TokioIo::new(stream);
                let hits = server_hits.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    let _ = http1::Builder::new()
                        .serve_connection(
                            io,
                            service_fn(move |req: Request<Incoming>| {
                                let hits = hits.clone();
                                let handler = handler.clone();
                                async move { Ok::<_, Infallible>(respond(req, &hits, &handler).await) }
                            }),
                        )
                        .await;
                });
            }
        });

        Self { url, hits }
    }

    pub fn hits(&self, path: &str) -> Vec<Hit> {
        self.hits
            .lock()
            .unwrap()
            .iter()
            .filter(|h| h.path == path)
            .cloned()
            .collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.hits(path).len()
    }
}

async fn respond(req: Request<Incoming>, hits: &Mutex<Vec<Hit>>, handler: &Handler) -> Response<Full<Bytes>> {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let authorization = header("authorization");
    let cookie = header("cookie");
    let bytes = req.into_body().collect().await.map(|c| c.to_bytes()).unwrap_or_default();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    let hit = Hit { path, query, authorization, cookie, body };
    let (status, reply) = handler(&hit);
    hits.lock().unwrap().push(hit);

    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(serde_json::to_vec(&reply).unwrap())))
        .unwrap()
}

/// Alist `fs/list` reply with the given `(name, is_dir, size, sha1)` entries.
pub fn alist_listing(entries: &[(&str, bool, u64, Option<&str>)]) -> Value {
    let content: Vec<Value> = entries
        .iter()
        .map(|(name, is_dir, size, sha1)| {
            serde_json::json!({
                "name": name,
                "is_dir": is_dir,
                "size": size,
                "hash_info": sha1.map(|s| serde_json::json!({ "sha1": s })),
            })
        })
        .collect();
    let total = content.len();
    serde_json::json!({ "code": 200, "message": "success", "data": { "content": content, "total": total } })
}

pub fn alist_empty() -> Value {
    serde_json::json!({ "code": 200, "message": "success", "data": { "content": null, "total": 0 } })
}

#[derive(Default)]
pub struct MemoryStore(Mutex<HashMap<String, CachedToken>>);

impl TokenStore for MemoryStore {
    fn load(&self, key: &str) -> Option<CachedToken> {
        self.0.lock().unwrap().get(key).cloned()
    }

    fn save(&self, key: &str, token: &CachedToken) {
        self.0.lock().unwrap().insert(key.to_string(), token.clone());
    }
}

/// Cloud-drive client pointed at `url`, holding a token valid for an hour so
/// no refresh traffic reaches the mock.
pub fn aliyun_client(url: &str) -> AliyunClient {
    let store = Arc::new(MemoryStore::default());
    store.save(
        TOKEN_CACHE_KEY,
        &CachedToken { access_token: "drive-token".to_string(), expires_at: chrono::Utc::now().timestamp() + 3600 },
    );
    let alist = Arc::new(AlistClient::new(&AlistConfig::default()).unwrap());
    let tokens = Arc::new(TokenCache::new(alist, None, url, None, None, store).unwrap());
    let config = AliyunConfig {
        host: url.to_string(),
        drive_id: Some("drive-1".to_string()),
        parent_file_id: Some("parent-1".to_string()),
        ..Default::default()
    };
    AliyunClient::new(&config, tokens).unwrap()
}
