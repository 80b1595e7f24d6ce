//! Core data types shared by the registry, the gateway and the clients.
//!
//! Field names on the wire follow the gateway's JSON contract
//! (`fileId`, `vectorStoreId`, `previousResponseId`, ...), so every type
//! that crosses HTTP or local storage carries a camelCase serde rename.

use serde::{Deserialize, Serialize};

/// One file that was successfully indexed into a remote collection.
///
/// `file_id` is unique within a registry; `collection_id` is shared by all
/// files attached to the same vector store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBaseEntry {
    /// Original filename. Not guaranteed unique.
    pub name: String,
    #[serde(rename = "fileId")]
    pub file_id: String,
    #[serde(rename = "vectorStoreId")]
    pub collection_id: String,
}

impl KnowledgeBaseEntry {
    pub fn new(
        name: impl Into<String>,
        file_id: impl Into<String>,
        collection_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            file_id: file_id.into(),
            collection_id: collection_id.into(),
        }
    }
}

/// A collection as offered to the chat input: one row per registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreDetail {
    pub id: String,
    pub name: String,
    #[serde(rename = "isActive")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub id: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn assistant(content: impl Into<String>, id: Option<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        }
    }
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Retrieval scope: the collection to ground this turn in.
    #[serde(
        rename = "vectorStoreId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub vector_store_id: Option<String>,
    /// Continuation token returned by the previous turn.
    #[serde(
        rename = "previousResponseId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub previous_response_id: Option<String>,
}

/// Success body of `POST /api/chat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnReply {
    pub response: String,
    #[serde(rename = "responseId", default)]
    pub response_id: Option<String>,
}

/// Result of a successful upload-and-index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "fileId")]
    pub file_id: String,
    #[serde(rename = "vectorStoreId")]
    pub collection_id: String,
}

impl From<UploadedFile> for KnowledgeBaseEntry {
    fn from(f: UploadedFile) -> Self {
        KnowledgeBaseEntry {
            name: f.file_name,
            file_id: f.file_id,
            collection_id: f.collection_id,
        }
    }
}

/// Success body of `PUT /api/chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    #[serde(flatten)]
    pub file: UploadedFile,
    pub message: String,
}

/// Body of `DELETE /api/chat`. Both fields are optional on the wire so a
/// missing one is reported as a validation error instead of a parse error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteRequest {
    #[serde(rename = "fileId", default)]
    pub file_id: Option<String>,
    #[serde(rename = "vectorStoreId", default)]
    pub vector_store_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_uses_stored_field_names() {
        let entry = KnowledgeBaseEntry::new("a.txt", "f1", "c1");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "a.txt", "fileId": "f1", "vectorStoreId": "c1"})
        );
    }

    #[test]
    fn turn_request_omits_absent_scope_and_token() {
        let req = TurnRequest {
            messages: vec![ChatMessage::user("hi")],
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("vectorStoreId").is_none());
        assert!(json.get("previousResponseId").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn upload_response_is_flat() {
        let body = r#"{"success":true,"fileName":"a.txt","fileId":"f1","vectorStoreId":"c1","message":"ok"}"#;
        let parsed: UploadResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            KnowledgeBaseEntry::from(parsed.file),
            KnowledgeBaseEntry::new("a.txt", "f1", "c1")
        );
    }
}
