//! OpenAI REST client: Responses, Files and Vector Stores.
//!
//! Covers the handful of endpoints the gateway needs:
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | [`create_response`](OpenAIClient::create_response) | `POST /responses` |
//! | [`list_vector_stores`](OpenAIClient::list_vector_stores) | `GET /vector_stores` |
//! | [`create_vector_store`](OpenAIClient::create_vector_store) | `POST /vector_stores` |
//! | [`upload_file`](OpenAIClient::upload_file) | `POST /files` (multipart) |
//! | [`attach_file`](OpenAIClient::attach_file) | `POST /vector_stores/{id}/files` |
//! | [`detach_file`](OpenAIClient::detach_file) | `DELETE /vector_stores/{id}/files/{file}` |
//! | [`delete_file`](OpenAIClient::delete_file) | `DELETE /files/{file}` |
//!
//! Nothing is retried. A non-success status becomes [`IndexError::Api`]
//! carrying the status and the `error.message` from the payload.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::{Config, OpenAIConfig};
use crate::error::{GatewayError, IndexError};
use crate::index::{tolerate_not_found, AssistantGateway, DocumentIndex};
use crate::models::{ChatMessage, KnowledgeBaseEntry, Role, TurnReply, TurnRequest, UploadedFile};

/// Input used when the last message of a turn is not from the user.
const FALLBACK_INPUT: &str = "Proceed.";

/// Authenticated client for the OpenAI REST API.
///
/// Holds the API key for the life of the process; the gateway owns one
/// behind an `Arc` and shares it across requests.
pub struct OpenAIClient {
    http: reqwest::Client,
    /// API root without a trailing slash, e.g. `https://api.openai.com/v1`.
    base_url: String,
    api_key: String,
    /// Model, instructions and vector store name used for every call.
    settings: OpenAIConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VectorStore {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct FileObject {
    id: String,
}

/// The subset of a Responses API object the gateway reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseObject {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub output_text: Option<String>,
    #[serde(default)]
    pub output: Vec<OutputItem>,
    #[serde(default)]
    pub error: Option<ResponseError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseError {
    #[serde(default)]
    pub message: String,
}

/// Parameters of one `POST /responses` call.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseParams {
    pub model: String,
    pub input: Vec<Value>,
    pub instructions: String,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
}

impl OpenAIClient {
    pub fn new(settings: OpenAIConfig, api_key: impl Into<String>) -> Result<Self, IndexError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| IndexError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            settings,
        })
    }

    /// Builds a client from `[openai]`, reading the key from the environment.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let api_key = config.api_key()?;
        Ok(Self::new(config.openai.clone(), api_key)?)
    }

    pub fn settings(&self) -> &OpenAIConfig {
        &self.settings
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, IndexError> {
        let response = request.bearer_auth(&self.api_key).send().await?;
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

    /// Shapes a gateway turn into Responses API parameters.
    ///
    /// Only the last message is sent; earlier context lives upstream behind
    /// `previous_response_id`.
    pub fn response_params(&self, request: &TurnRequest) -> Result<ResponseParams, IndexError> {
        let input = turn_input(&request.messages)?;
        let tools = match &request.vector_store_id {
            Some(id) if !id.is_empty() => vec![json!({
                "type": "file_search",
                "vector_store_ids": [id],
            })],
            _ => Vec::new(),
        };
        Ok(ResponseParams {
            model: self.settings.model.clone(),
            input: vec![json!({
                "type": "message",
                "role": "user",
                "content": input,
            })],
            instructions: self.settings.instructions.clone(),
            temperature: self.settings.temperature,
            previous_response_id: request
                .previous_response_id
                .clone()
                .filter(|id| !id.is_empty()),
            tools,
        })
    }

    pub async fn create_response(
        &self,
        params: &ResponseParams,
    ) -> Result<ResponseObject, IndexError> {
        tracing::debug!(
            model = %params.model,
            scoped = !params.tools.is_empty(),
            continued = params.previous_response_id.is_some(),
            "creating response"
        );
        self.execute(self.http.post(self.url("/responses")).json(params))
            .await
    }

    pub async fn list_vector_stores(&self) -> Result<Vec<VectorStore>, IndexError> {
        let list: ListResponse<VectorStore> = self
            .execute(
                self.http
                    .get(self.url("/vector_stores"))
                    .query(&[("limit", "100")]),
            )
            .await?;
        Ok(list.data)
    }

    pub async fn create_vector_store(&self, name: &str) -> Result<VectorStore, IndexError> {
        tracing::info!(name, "creating vector store");
        self.execute(
            self.http
                .post(self.url("/vector_stores"))
                .json(&json!({ "name": name })),
        )
        .await
    }

    /// Returns the id of the vector store called `name`, creating it if none
    /// exists.
    pub async fn find_or_create_vector_store(&self, name: &str) -> Result<String, IndexError> {
        let stores = self.list_vector_stores().await?;
        if let Some(store) = stores.iter().find(|s| s.name.as_deref() == Some(name)) {
            return Ok(store.id.clone());
        }
        Ok(self.create_vector_store(name).await?.id)
    }

    /// Uploads raw bytes with purpose `assistants`; returns the file id.
    pub async fn upload_file(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, IndexError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new()
            .text("purpose", "assistants")
            .part("file", part);
        let file: FileObject = self
            .execute(self.http.post(self.url("/files")).multipart(form))
            .await?;
        Ok(file.id)
    }

    pub async fn attach_file(&self, vector_store_id: &str, file_id: &str) -> Result<(), IndexError> {
        let _: Value = self
            .execute(
                self.http
                    .post(self.url(&format!("/vector_stores/{}/files", vector_store_id)))
                    .json(&json!({ "file_id": file_id })),
            )
            .await?;
        Ok(())
    }

    pub async fn detach_file(&self, vector_store_id: &str, file_id: &str) -> Result<(), IndexError> {
        let _: Value = self
            .execute(self.http.delete(self.url(&format!(
                "/vector_stores/{}/files/{}",
                vector_store_id, file_id
            ))))
            .await?;
        Ok(())
    }

    pub async fn delete_file(&self, file_id: &str) -> Result<(), IndexError> {
        let _: Value = self
            .execute(self.http.delete(self.url(&format!("/files/{}", file_id))))
            .await?;
        Ok(())
    }

    /// Detaches `file_id` from `vector_store_id`, then deletes the file.
    ///
    /// Not-found at either step counts as removed. When the detach fails
    /// the delete is not attempted.
    pub async fn remove_file_from_store(
        &self,
        vector_store_id: &str,
        file_id: &str,
    ) -> Result<(), IndexError> {
        tolerate_not_found(self.detach_file(vector_store_id, file_id).await)?;
        tolerate_not_found(self.delete_file(file_id).await)?;
        tracing::info!(%file_id, %vector_store_id, "file removed");
        Ok(())
    }
}

/// Picks the text to send for a turn.
///
/// Errors if there are no messages at all; falls back to `"Proceed."` when
/// the last message is not a user message.
pub fn turn_input(messages: &[ChatMessage]) -> Result<String, IndexError> {
    let last = messages
        .last()
        .ok_or_else(|| IndexError::Validation("No input message provided.".to_string()))?;
    Ok(match last.role {
        Role::User => last.content.clone(),
        Role::Assistant => FALLBACK_INPUT.to_string(),
    })
}

/// Pulls the assistant text out of a Responses API object.
///
/// Prefers `output_text`, then the concatenation of every `output_text`
/// part of every assistant message, then a status-specific explanation.
pub fn extract_text(response: &ResponseObject) -> String {
    if let Some(text) = response.output_text.as_deref().filter(|t| !t.is_empty()) {
        return text.to_string();
    }

    let from_output: String = response
        .output
        .iter()
        .filter(|item| item.kind == "message" && item.role.as_deref() == Some("assistant"))
        .flat_map(|item| item.content.iter())
        .filter(|part| part.kind == "output_text")
        .filter_map(|part| part.text.as_deref())
        .collect();
    if !from_output.is_empty() {
        return from_output;
    }

    let status = response.status.as_deref().unwrap_or("unknown");
    match (&response.error, status) {
        (Some(err), "failed") => format!("Error from Responses API: {}", err.message),
        (_, "completed") => "Received a response, but could not extract text content.".to_string(),
        _ => format!("Response status: {}. No text content extracted.", status),
    }
}

#[async_trait]
impl AssistantGateway for OpenAIClient {
    async fn send_turn(&self, request: &TurnRequest) -> Result<TurnReply, GatewayError> {
        let params = self.response_params(request)?;
        let response = self.create_response(&params).await?;
        Ok(TurnReply {
            response: extract_text(&response),
            response_id: Some(response.id),
        })
    }
}

#[async_trait]
impl DocumentIndex for OpenAIClient {
    async fn upload_and_index(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadedFile, IndexError> {
        let vector_store_id = self
            .find_or_create_vector_store(&self.settings.vector_store_name)
            .await?;
        let file_id = self.upload_file(file_name, bytes).await?;
        self.attach_file(&vector_store_id, &file_id).await?;
        tracing::info!(file_name, %file_id, %vector_store_id, "file indexed");
        Ok(UploadedFile {
            file_name: file_name.to_string(),
            file_id,
            collection_id: vector_store_id,
        })
    }

    async fn remove_entry(&self, entry: &KnowledgeBaseEntry) -> Result<(), IndexError> {
        self.remove_file_from_store(&entry.collection_id, &entry.file_id)
            .await
    }
}
