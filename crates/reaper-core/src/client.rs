//! A single async HTTP client for the `/api/v1` surface. Per the design
//! notes, the core ships one implementation; a synchronous call site (the
//! CLI) just drives it from its own runtime rather than duplicating it.

#![cfg(feature = "client")]

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ReaperError, Result};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: None,
            timeout: crate::config::DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Clone)]
pub struct ReaperClient {
    http: reqwest::Client,
    config: ClientConfig,
}

#[derive(Debug, Serialize)]
pub struct EnforceRequest {
    pub tool_name: String,
    pub tool_args: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnforceResponse {
    pub session_id: String,
    pub decision: String,
    pub rule_name: Option<String>,
    pub reason: String,
    pub policy_version: String,
    pub log_id: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ResultRequest {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_duration_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    message: Option<String>,
}

impl ReaperClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ReaperError::server(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    /// The base URL this client was built with, mainly useful for a
    /// caller (e.g. `tamesdk status`) that wants to echo back which
    /// service it's about to talk to.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let mut builder = self.http.request(method, url);
        if let Some(token) = &self.config.api_key {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    pub async fn enforce(&self, req: &EnforceRequest) -> Result<EnforceResponse> {
        let resp = self
            .request(reqwest::Method::POST, "/api/v1/enforce")
            .json(req)
            .send()
            .await
            .map_err(|e| ReaperError::server(format!("request failed: {e}")))?;
        Self::parse(resp).await
    }

    pub async fn update_result(
        &self,
        session_id: &str,
        log_id: &str,
        req: &ResultRequest,
    ) -> Result<Value> {
        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/api/v1/enforce/{session_id}/result?log_id={log_id}"),
            )
            .json(req)
            .send()
            .await
            .map_err(|e| ReaperError::server(format!("request failed: {e}")))?;
        Self::parse(resp).await
    }

    pub async fn policy_current(&self) -> Result<Value> {
        let resp = self
            .request(reqwest::Method::GET, "/api/v1/policy/current")
            .send()
            .await
            .map_err(|e| ReaperError::server(format!("request failed: {e}")))?;
        Self::parse(resp).await
    }

    pub async fn policy_test(&self, tool_name: &str, tool_args: &Value, session_context: &Value) -> Result<Value> {
        let resp = self
            .request(reqwest::Method::GET, "/api/v1/policy/test")
            .query(&[
                ("tool_name", tool_name.to_string()),
                ("tool_args", tool_args.to_string()),
                ("session_context", session_context.to_string()),
            ])
            .send()
            .await
            .map_err(|e| ReaperError::server(format!("request failed: {e}")))?;
        Self::parse(resp).await
    }

    pub async fn policy_validate(&self, policy_content: &str) -> Result<Value> {
        let resp = self
            .request(reqwest::Method::POST, "/api/v1/policy/validate")
            .json(&json!({"policy_content": policy_content}))
            .send()
            .await
            .map_err(|e| ReaperError::server(format!("request failed: {e}")))?;
        Self::parse(resp).await
    }

    pub async fn policy_create(
        &self,
        policy_content: &str,
        version: &str,
        description: Option<&str>,
        activate: bool,
    ) -> Result<Value> {
        let resp = self
            .request(reqwest::Method::POST, "/api/v1/policy/create")
            .json(&json!({
                "policy_content": policy_content,
                "version": version,
                "description": description,
                "activate": activate,
            }))
            .send()
            .await
            .map_err(|e| ReaperError::server(format!("request failed: {e}")))?;
        Self::parse(resp).await
    }

    pub async fn policy_reload(&self) -> Result<Value> {
        let resp = self
            .request(reqwest::Method::POST, "/api/v1/policy/reload")
            .send()
            .await
            .map_err(|e| ReaperError::server(format!("request failed: {e}")))?;
        Self::parse(resp).await
    }

    pub async fn list_sessions(&self) -> Result<Value> {
        let resp = self
            .request(reqwest::Method::GET, "/api/v1/sessions")
            .send()
            .await
            .map_err(|e| ReaperError::server(format!("request failed: {e}")))?;
        Self::parse(resp).await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Value> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/api/v1/sessions/{session_id}"))
            .send()
            .await
            .map_err(|e| ReaperError::server(format!("request failed: {e}")))?;
        Self::parse(resp).await
    }

    pub async fn compliance_report(&self) -> Result<Value> {
        let resp = self
            .request(reqwest::Method::GET, "/api/v1/compliance/report/generate")
            .send()
            .await
            .map_err(|e| ReaperError::server(format!("request failed: {e}")))?;
        Self::parse(resp).await
    }

    pub async fn retention_status(&self) -> Result<Value> {
        let resp = self
            .request(reqwest::Method::GET, "/api/v1/compliance/retention/status")
            .send()
            .await
            .map_err(|e| ReaperError::server(format!("request failed: {e}")))?;
        Self::parse(resp).await
    }

    pub async fn health(&self) -> Result<Value> {
        let resp = self
            .request(reqwest::Method::GET, "/health")
            .send()
            .await
            .map_err(|e| ReaperError::server(format!("request failed: {e}")))?;
        Self::parse(resp).await
    }

    async fn parse<T: for<'de> Deserialize<'de>>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ReaperError::server(format!("failed to read response body: {e}")))?;

        if status.is_success() {
            serde_json::from_slice(&bytes)
                .map_err(|e| ReaperError::server(format!("failed to decode response: {e}")))
        } else {
            let body: Option<ErrorBody> = serde_json::from_slice(&bytes).ok();
            let message = body
                .map(|b| b.message.unwrap_or(b.error))
                .unwrap_or_else(|| format!("HTTP {status}"));
            Err(match status.as_u16() {
                400 => ReaperError::validation(message),
                401 => ReaperError::Unauthenticated,
                404 => ReaperError::not_found(message),
                409 => ReaperError::conflict(message),
                429 => ReaperError::RateLimited { retry_after_ms: 1000 },
                _ => ReaperError::server(message),
            })
        }
    }
}
