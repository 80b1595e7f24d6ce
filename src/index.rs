//! Collaborator traits for the remote side.
//!
//! Two implementations exist for each trait:
//!
//! | Implementation | Transport |
//! |----------------|-----------|
//! | [`OpenAIClient`](crate::openai::OpenAIClient) | direct calls to the OpenAI REST API |
//! | [`GatewayClient`](crate::client::GatewayClient) | calls to a running `kbchat serve` gateway |
//!
//! The registry, the upload batch runner and the chat session only see the
//! traits, so they are tested against in-process fakes.

use async_trait::async_trait;

use crate::error::{GatewayError, IndexError};
use crate::models::{KnowledgeBaseEntry, TurnReply, TurnRequest, UploadedFile};

/// The remote document index (files + vector-store collections).
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Stores `bytes` as a file, attaches it to the configured collection
    /// (creating the collection if needed) and returns the identifiers.
    async fn upload_and_index(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadedFile, IndexError>;

    /// Removes one registry entry: the file is detached from its
    /// collection, then deleted. A detach failure leaves the file in place
    /// and is returned as is. Not-found at either step counts as success.
    async fn remove_entry(&self, entry: &KnowledgeBaseEntry) -> Result<(), IndexError>;
}

/// The remote assistant: one conversation turn per call.
#[async_trait]
pub trait AssistantGateway: Send + Sync {
    async fn send_turn(&self, request: &TurnRequest) -> Result<TurnReply, GatewayError>;
}

/// Maps a not-found failure to success, leaving every other outcome intact.
pub fn tolerate_not_found(result: Result<(), IndexError>) -> Result<(), IndexError> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_tolerated_other_errors_are_not() {
        let not_found = Err(IndexError::Api {
            status: 404,
            message: "gone".into(),
        });
        assert!(tolerate_not_found(not_found).is_ok());
        let forbidden = Err(IndexError::Api {
            status: 403,
            message: "no".into(),
        });
        assert!(tolerate_not_found(forbidden).is_err());
        assert!(tolerate_not_found(Err(IndexError::Transport("refused".into()))).is_err());
    }
}
