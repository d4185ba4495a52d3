//! Scripted transport for adapter tests

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use funding_core::{ConnectorError, ConnectorResult};

use crate::http::{classify_status, HttpRequest, HttpTransport};

/// One canned upstream response
#[derive(Debug, Clone)]
pub enum Scripted {
    Json(Value),
    Status(u16),
}

/// Answers requests from per-route queues.
///
/// Routes are keyed by URL path, or `path#type` for JSON bodies carrying a
/// `type` field. The last response of a queue is repeated once the queue
/// is down to one entry.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Scripted>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, key: &str, responses: Vec<Scripted>) -> Self {
        self.routes.lock().insert(key.to_string(), responses.into());
        self
    }

    pub fn json(self, key: &str, value: Value) -> Self {
        self.route(key, vec![Scripted::Json(value)])
    }

    /// Replace the queue for `key` after construction
    pub fn set(&self, key: &str, responses: Vec<Scripted>) {
        self.routes.lock().insert(key.to_string(), responses.into());
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.url.to_string()).collect()
    }

    pub fn total_calls(&self) -> usize {
        self.requests.lock().len()
    }

    /// Calls whose path or `path#type` key equals `key`
    pub fn calls(&self, key: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.path() == key || typed_key(r).as_deref() == Some(key))
            .count()
    }
}

fn typed_key(request: &HttpRequest) -> Option<String> {
    let kind = request.body.as_ref()?.get("type")?.as_str()?;
    Some(format!("{}#{}", request.path(), kind))
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: &HttpRequest) -> ConnectorResult<Value> {
        self.requests.lock().push(request.clone());

        let response = {
            let mut routes = self.routes.lock();
            let key = typed_key(request)
                .filter(|k| routes.contains_key(k))
                .unwrap_or_else(|| request.path().to_string());

            routes.get_mut(&key).and_then(|queue| {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            })
        };

        let url = request.url.to_string();
        match response {
            Some(Scripted::Json(value)) => Ok(value),
            Some(Scripted::Status(status)) => Err(classify_status(status, &url, "scripted")),
            None => Err(ConnectorError::NotFound { url }),
        }
    }
}
