//! Scripted origin for engine tests.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Method, StatusCode};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::fetch::{FetchError, Origin, OriginRequest, OriginResponse};

#[derive(Clone)]
struct Canned {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: Bytes,
    /// Answer, but report the body as over the size limit.
    oversized: bool,
    delay: Option<Duration>,
}

/// In-process origin with an online switch, canned responses and a call log.
///
/// The response is chosen when the request arrives; any delay applies after
/// that, like an origin that has already read its data.
pub struct MockOrigin {
    online: AtomicBool,
    delay: Mutex<Option<Duration>>,
    routes: Mutex<HashMap<(String, String), Canned>>,
    calls: Mutex<Vec<(Method, String)>>,
}

impl MockOrigin {
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            delay: Mutex::new(None),
            routes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Answer `method path` (path includes any query) with a status and body.
    pub fn respond(&self, method: Method, path: &str, status: u16, body: &str) {
        self.respond_with_headers(method, path, status, vec![("content-type".into(), "application/json".into())], body);
    }

    pub fn respond_with_headers(
        &self, method: Method, path: &str, status: u16, headers: Vec<(String, String)>, body: &str,
    ) {
        self.insert(method, path, Canned {
            status: StatusCode::from_u16(status).unwrap(),
            headers,
            body: Bytes::from(body.to_string()),
            oversized: false,
            delay: None,
        });
    }

    /// Like [`MockOrigin::respond`], but this route takes `delay` to answer.
    pub fn respond_slowly(&self, method: Method, path: &str, status: u16, body: &str, delay: Duration) {
        self.respond(method.clone(), path, status, body);
        if let Some(canned) = self.routes.lock().unwrap().get_mut(&(method.to_string(), path.to_string())) {
            canned.delay = Some(delay);
        }
    }

    /// Accept `method path` with `status`, then fail because the body is too large.
    pub fn respond_oversized(&self, method: Method, path: &str, status: u16) {
        self.insert(method, path, Canned {
            status: StatusCode::from_u16(status).unwrap(),
            headers: vec![],
            body: Bytes::new(),
            oversized: true,
            delay: None,
        });
    }

    fn insert(&self, method: Method, path: &str, canned: Canned) {
        self.routes.lock().unwrap().insert((method.to_string(), path.to_string()), canned);
    }

    /// Every request seen, including ones that failed while offline.
    pub fn calls(&self) -> Vec<(Method, String)> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of requests for a path with the given method.
    pub fn count(&self, method: Method, path: &str) -> usize {
        self.calls().iter().filter(|(m, p)| *m == method && p == path).count()
    }
}

fn path_and_query(url: &url::Url) -> String {
    match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    }
}

#[async_trait]
impl Origin for MockOrigin {
    async fn fetch(&self, request: &OriginRequest) -> Result<OriginResponse, FetchError> {
        let path = path_and_query(&request.url);
        self.calls.lock().unwrap().push((request.method.clone(), path.clone()));

        let route = self.routes.lock().unwrap().get(&(request.method.to_string(), path)).cloned();

        let delay = route.as_ref().and_then(|canned| canned.delay).or_else(|| *self.delay.lock().unwrap());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if !self.online.load(Ordering::SeqCst) {
            return Err(FetchError::Network("connection refused".into()));
        }

        let canned = route.unwrap_or(Canned {
            status: StatusCode::NOT_FOUND,
            headers: vec![],
            body: Bytes::from_static(b"not found"),
            oversized: false,
            delay: None,
        });
        if canned.oversized {
            return Err(FetchError::TooLarge { status: canned.status, size: usize::MAX, limit: 0 });
        }
        Ok(OriginResponse { status: canned.status, headers: canned.headers, body: canned.body, fetch_ms: 1 })
    }
}
