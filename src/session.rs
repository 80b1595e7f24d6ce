//! Conversation state on the client side.
//!
//! The transcript is kept locally for display only. Continuity comes from
//! the continuation token the gateway returns with every reply: it is sent
//! back with the next turn, and dropped whenever a turn fails so the next
//! turn starts a fresh conversation upstream.

use crate::error::{GatewayError, IndexError};
use crate::index::AssistantGateway;
use crate::models::{ChatMessage, TurnReply, TurnRequest};

#[derive(Debug, Default)]
pub struct ChatSession {
    messages: Vec<ChatMessage>,
    continuation: Option<String>,
    scope: Option<String>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn continuation(&self) -> Option<&str> {
        self.continuation.as_deref()
    }

    /// Resumes a conversation from a token obtained earlier.
    pub fn set_continuation(&mut self, token: Option<String>) {
        self.continuation = token;
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Sets the collection that grounds subsequent turns.
    pub fn set_scope(&mut self, collection_id: Option<String>) {
        self.scope = collection_id;
    }

    /// Sends one turn.
    ///
    /// On failure the error text is appended to the transcript as an
    /// assistant message, the continuation token is dropped, and the error
    /// is returned. Blank input is rejected without calling `gateway`.
    pub async fn send(
        &mut self,
        gateway: &dyn AssistantGateway,
        text: &str,
    ) -> Result<TurnReply, GatewayError> {
        if text.trim().is_empty() {
            return Err(IndexError::Validation(
                "Message must not be empty.".to_string(),
            ));
        }

        self.messages.push(ChatMessage::user(text));
        let request = TurnRequest {
            messages: self.messages.clone(),
            vector_store_id: self.scope.clone(),
            previous_response_id: self.continuation.clone(),
        };

        match gateway.send_turn(&request).await {
            Ok(reply) => {
                self.messages.push(ChatMessage::assistant(
                    reply.response.clone(),
                    reply.response_id.clone(),
                ));
                self.continuation = reply.response_id.clone();
                Ok(reply)
            }
            Err(e) => {
                tracing::debug!(error = %e, "turn failed, dropping continuation token");
                self.messages.push(ChatMessage::assistant(e.to_string(), None));
                self.continuation = None;
                Err(e)
            }
        }
    }

    /// Forgets the transcript and the continuation token. The scope stays.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.continuation = None;
    }
}
