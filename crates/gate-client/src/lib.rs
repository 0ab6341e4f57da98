//! Blocking HTTP client for the Gate lock broker.
//!
//! One `BrokerClient` is shared (via `Arc`) across every thread a FUSE
//! adapter's callback pool hands operations to. `reqwest::blocking::Client`
//! is itself `Send + Sync`, so no extra locking is needed here.

pub mod error;

use std::sync::Arc;
use std::time::Duration;

use gate_core::{LockInfo, Mode, StatusSnapshot};
use log::debug;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde_json::{json, Value};

pub use error::ClientError;

/// Host/port pair identifying a running broker.
#[derive(Debug, Clone)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
}

impl BrokerEndpoint {
    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Outcome of a call to `acquire`.
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    Granted(LockInfo),
    TimedOut,
}

#[derive(Clone)]
pub struct BrokerClient {
    inner: Arc<Client>,
    endpoint: BrokerEndpoint,
}

impl BrokerClient {
    pub fn new(endpoint: BrokerEndpoint) -> Result<Self, ClientError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            inner: Arc::new(client),
            endpoint,
        })
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    fn status_to_error(status: reqwest::StatusCode, body: &Value) -> ClientError {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("request failed")
            .to_string();
        match status.as_u16() {
            400 => ClientError::InvalidRequest(message),
            403 => ClientError::OwnerMismatch,
            404 => ClientError::NotFound(message),
            408 => ClientError::TimedOut,
            other => ClientError::ServerError {
                status: other,
                message,
            },
        }
    }

    fn post(&self, path: &str, payload: Value) -> Result<Value, ClientError> {
        let url = format!("{}{}", self.endpoint.base_url(), path);
        debug!("POST {url}");
        let resp = self
            .inner
            .post(&url)
            .headers(self.headers())
            .json(&payload)
            .send()?;
        let status = resp.status();
        let body: Value = resp.json().unwrap_or(Value::Null);
        if status.is_success() {
            return Ok(body);
        }
        if status.as_u16() == 408 {
            return Err(ClientError::TimedOut);
        }
        Err(Self::status_to_error(status, &body))
    }

    fn get(&self, path: &str) -> Result<Value, ClientError> {
        let url = format!("{}{}", self.endpoint.base_url(), path);
        debug!("GET {url}");
        let resp = self.inner.get(&url).headers(self.headers()).send()?;
        let status = resp.status();
        let body: Value = resp.json().unwrap_or(Value::Null);
        if status.is_success() {
            return Ok(body);
        }
        Err(Self::status_to_error(status, &body))
    }

    /// Acquire a lock. A 408 (timeout) is not an error; it surfaces as
    /// `Ok(AcquireOutcome::TimedOut)` so callers don't have to special-case
    /// one more error variant for an expected outcome.
    pub fn acquire(
        &self,
        path: &str,
        mode: Mode,
        owner: &str,
        timeout_ms: Option<u64>,
        lease_ms: u64,
        max_hold_ms: Option<u64>,
    ) -> Result<AcquireOutcome, ClientError> {
        let payload = json!({
            "path": path,
            "mode": mode.as_str(),
            "owner": owner,
            "timeout_ms": timeout_ms,
            "lease_ms": lease_ms,
            "max_hold_ms": max_hold_ms,
        });
        match self.post("/v1/locks/acquire", payload) {
            Ok(body) => {
                let lock: LockInfo = serde_json::from_value(body["lock"].clone())
                    .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
                Ok(AcquireOutcome::Granted(lock))
            }
            Err(ClientError::TimedOut) => Ok(AcquireOutcome::TimedOut),
            Err(other) => Err(other),
        }
    }

    pub fn release(&self, lock_id: &str, owner: &str) -> Result<(), ClientError> {
        let payload = json!({"lock_id": lock_id, "owner": owner});
        self.post("/v1/locks/release", payload)?;
        Ok(())
    }

    pub fn heartbeat(&self, lock_id: &str, owner: &str, lease_ms: u64) -> Result<(), ClientError> {
        let payload = json!({"lock_id": lock_id, "owner": owner, "lease_ms": lease_ms});
        self.post("/v1/locks/heartbeat", payload)?;
        Ok(())
    }

    pub fn status(&self, path: Option<&str>) -> Result<StatusSnapshot, ClientError> {
        let body = match path {
            Some(path) => self.get(&format!("/v1/locks/status?path={}", urlencoding::encode(path)))?,
            None => self.get("/v1/locks/status")?,
        };
        serde_json::from_value(body).map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }
}
