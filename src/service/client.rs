//! HTTP client for the interview service

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ServiceError;

use super::protocol::{AnswerReply, AnswerRequest, HealthReply, StartReply, TimeoutReply};

/// Request/response boundary to the remote interview logic
#[async_trait]
pub trait InterviewService: Send + Sync {
    async fn start(&self) -> Result<StartReply, ServiceError>;

    async fn answer(&self, answer: &str) -> Result<AnswerReply, ServiceError>;

    async fn timeout(&self) -> Result<TimeoutReply, ServiceError>;
}

/// reqwest-backed [`InterviewService`]
#[derive(Debug, Clone)]
pub struct HttpInterviewService {
    base_url: String,
    client: reqwest::Client,
}

impl HttpInterviewService {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Reachability probe against the service root
    pub async fn health(&self) -> Result<HealthReply, ServiceError> {
        let res = self.client.get(&self.base_url).send().await?;
        decode(res).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&AnswerRequest>,
    ) -> Result<T, ServiceError> {
        let url = self.url(path);
        debug!(%url, "service request");
        let mut req = self.client.post(&url);
        if let Some(body) = body {
            req = req.json(body);
        }
        let res = req.send().await?;
        decode(res).await
    }
}

/// Map a response to `T`, separating transport and application failures
async fn decode<T: DeserializeOwned>(res: reqwest::Response) -> Result<T, ServiceError> {
    let status = res.status();
    let body = res.text().await?;
    if !status.is_success() {
        return Err(ServiceError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let value: serde_json::Value =
        serde_json::from_str(&body).map_err(|e| ServiceError::Malformed(e.to_string()))?;
    if let Some(message) = value.get("error").and_then(|e| e.as_str()) {
        return Err(ServiceError::Application(message.to_string()));
    }
    serde_json::from_value(value).map_err(|e| ServiceError::Malformed(e.to_string()))
}

#[async_trait]
impl InterviewService for HttpInterviewService {
    async fn start(&self) -> Result<StartReply, ServiceError> {
        self.post("start", None).await
    }

    async fn answer(&self, answer: &str) -> Result<AnswerReply, ServiceError> {
        let body = AnswerRequest {
            answer: answer.to_string(),
        };
        self.post("answer", Some(&body)).await
    }

    async fn timeout(&self) -> Result<TimeoutReply, ServiceError> {
        self.post("timeout", None).await
    }
}
