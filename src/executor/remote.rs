//! HTTP 执行器：`POST {base}/command`、`GET {base}/tools`、`GET {base}/history`

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::core::TransportError;
use crate::executor::CommandExecutor;
use crate::protocol::{Catalogue, CommandRequest, CommandResponse, HistoryEntry};

pub struct RemoteExecutor {
    client: reqwest::Client,
    base_url: String,
    timeout_secs: u64,
}

impl RemoteExecutor {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout_secs,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn history(&self) -> Result<Vec<HistoryEntry>, TransportError> {
        let resp = self
            .client
            .get(format!("{}/history", self.base_url))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        Self::decode(resp).await
    }

    fn map_send_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout_secs)
        } else if e.is_connect() {
            TransportError::Unavailable(format!("{}: {}", self.base_url, e))
        } else {
            TransportError::Network(e.to_string())
        }
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, TransportError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<T>().await.map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[async_trait]
impl CommandExecutor for RemoteExecutor {
    async fn execute(&self, request: &CommandRequest) -> Result<CommandResponse, TransportError> {
        tracing::debug!(command = %request.command, url = %self.base_url, "remote dispatch");
        let resp = self
            .client
            .post(format!("{}/command", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        Self::decode(resp).await
    }

    async fn capabilities(&self) -> Result<Catalogue, TransportError> {
        let resp = self
            .client
            .get(format!("{}/tools", self.base_url))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        Self::decode(resp).await
    }
}
