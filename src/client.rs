//! Client for a running `kbchat serve` gateway.
//!
//! [`GatewayClient`] implements both [`AssistantGateway`] and
//! [`DocumentIndex`] over the gateway's `/api/chat` routes, so the CLI can
//! work without holding an OpenAI key.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::config::Config;
use crate::error::{GatewayError, IndexError};
use crate::index::{AssistantGateway, DocumentIndex};
use crate::models::{
    DeleteRequest, DeleteResponse, KnowledgeBaseEntry, TurnReply, TurnRequest, UploadResponse,
    UploadedFile,
};

/// HTTP client for the `kbchat serve` gateway. Needs no API key.
pub struct GatewayClient {
    http: reqwest::Client,
    /// Full `/api/chat` URL; every route shares it and differs by method.
    endpoint: String,
}

impl GatewayClient {
    /// `base_url` is the gateway root, e.g. `http://127.0.0.1:3000`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, IndexError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: format!("{}/api/chat", base_url.trim_end_matches('/')),
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self::new(
            &config.client.gateway_url,
            Duration::from_secs(config.openai.timeout_secs),
        )?)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, IndexError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::from_body(status.as_u16(), &body));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| IndexError::InvalidResponse(e.to_string()))
    }

    async fn delete_entry(&self, collection_id: &str, file_id: &str) -> Result<(), IndexError> {
        let body = DeleteRequest {
            file_id: Some(file_id.to_string()),
            vector_store_id: Some(collection_id.to_string()),
        };
        let reply: DeleteResponse = self
            .execute(self.http.delete(&self.endpoint).json(&body))
            .await?;
        if !reply.success {
            return Err(IndexError::InvalidResponse(reply.message));
        }
        Ok(())
    }
}

#[async_trait]
impl AssistantGateway for GatewayClient {
    async fn send_turn(&self, request: &TurnRequest) -> Result<TurnReply, GatewayError> {
        self.execute(self.http.post(&self.endpoint).json(request))
            .await
    }
}

#[async_trait]
impl DocumentIndex for GatewayClient {
    async fn upload_and_index(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadedFile, IndexError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        let reply: UploadResponse = self
            .execute(self.http.put(&self.endpoint).multipart(form))
            .await?;
        if !reply.success {
            return Err(IndexError::InvalidResponse(reply.message));
        }
        Ok(reply.file)
    }

    /// One `DELETE /api/chat`; the gateway detaches and deletes in a
    /// single request.
    async fn remove_entry(&self, entry: &KnowledgeBaseEntry) -> Result<(), IndexError> {
        self.delete_entry(&entry.collection_id, &entry.file_id).await
    }
}
