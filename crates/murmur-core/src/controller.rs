//! Conversation controller
//!
//! Drives one send at a time through
//! `CREATED -> AWAITING_COMPLETION -> (REVEALING -> REVEALED) | FAILED`,
//! keyed by the assistant placeholder's id.
//!
//! The typing flag is cleared when the completion request settles, not when
//! the reveal finishes, so a new send can start while a reply is still being
//! revealed.

use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::completion::CompletionBackend;
use crate::error::{normalize_error, CompletionError, SendError, GENERIC_SEND_FAILURE};
use crate::reveal::{Reveal, RevealStep};
use crate::state::{ChatMessage, MessageId, NewMessage};
use crate::store::ConversationStore;

/// A send that passed validation and has its two messages in the store.
#[derive(Debug, Clone)]
pub struct SendTicket {
    pub user_id: MessageId,
    pub assistant_id: MessageId,
    /// Everything up to and including the new user message.
    pub history: Vec<ChatMessage>,
}

struct PendingCompletion {
    assistant_id: MessageId,
    task: JoinHandle<Result<String, CompletionError>>,
}

pub struct ChatController {
    store: ConversationStore,
    backend: Arc<dyn CompletionBackend>,
    reveals: Vec<Reveal>,
    pending: Option<PendingCompletion>,
}

impl ChatController {
    pub fn new(store: ConversationStore, backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            store,
            backend,
            reveals: Vec::new(),
            pending: None,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ConversationStore {
        &mut self.store
    }

    pub fn is_typing(&self) -> bool {
        self.store.is_typing()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_revealing(&self, id: MessageId) -> bool {
        self.reveals.iter().any(|r| r.message_id() == id)
    }

    pub fn active_reveals(&self) -> usize {
        self.reveals.len()
    }

    /// Validate the input and add the user message and the empty assistant
    /// placeholder, in that order.
    pub fn begin_send(&mut self, input: &str) -> Result<SendTicket, SendError> {
        let text = input.trim();
        if text.is_empty() {
            return Err(SendError::EmptyInput);
        }
        if self.store.is_typing() {
            return Err(SendError::Busy);
        }

        let user = self.store.add_message(NewMessage::user(text));
        let history = self.store.messages().to_vec();
        let assistant = self.store.add_message(NewMessage::assistant_placeholder());
        self.store.set_typing(true);

        tracing::info!(assistant_id = %assistant.id, "Send started");

        Ok(SendTicket {
            user_id: user.id,
            assistant_id: assistant.id,
            history,
        })
    }

    /// Resolve a send with the backend's outcome.
    pub fn settle(&mut self, assistant_id: MessageId, result: Result<String, CompletionError>) {
        match result {
            Ok(text) => {
                tracing::info!(%assistant_id, chars = text.chars().count(), "Completion received");
                self.reveals.push(Reveal::new(assistant_id, text));
            }
            Err(e) => {
                tracing::warn!(%assistant_id, error = %e, "Completion failed");
                let message = normalize_error(&e, GENERIC_SEND_FAILURE);
                self.store.mark_message_error(assistant_id, &message);
            }
        }
        self.store.set_typing(false);
    }

    /// Run a whole send inline, awaiting the backend.
    pub async fn send(&mut self, input: &str) -> Result<MessageId, SendError> {
        let ticket = self.begin_send(input)?;
        let result = self.backend.complete(&ticket.history).await;
        self.settle(ticket.assistant_id, result);
        Ok(ticket.assistant_id)
    }

    /// Start a send and run the backend call on a background task.
    /// `poll_pending` settles it once the task finishes.
    pub fn spawn_send(&mut self, input: &str) -> Result<MessageId, SendError> {
        let ticket = self.begin_send(input)?;
        let backend = self.backend.clone();
        let history = ticket.history;
        let task = tokio::spawn(async move { backend.complete(&history).await });

        self.pending = Some(PendingCompletion {
            assistant_id: ticket.assistant_id,
            task,
        });
        Ok(ticket.assistant_id)
    }

    /// Settle the background send if it has finished. Returns whether it did.
    pub async fn poll_pending(&mut self) -> bool {
        let finished = self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.task.is_finished());
        if !finished {
            return false;
        }
        self.settle_pending().await
    }

    /// Wait for the background send, however long it takes.
    pub async fn wait_pending(&mut self) -> bool {
        self.settle_pending().await
    }

    async fn settle_pending(&mut self) -> bool {
        let Some(pending) = self.pending.take() else {
            return false;
        };

        let result = match pending.task.await {
            Ok(result) => result,
            Err(join_error) => {
                tracing::error!(error = %join_error, "Completion task did not finish");
                Err(CompletionError::Network(GENERIC_SEND_FAILURE.to_string()))
            }
        };
        self.settle(pending.assistant_id, result);
        true
    }

    /// Advance every active reveal by one step.
    pub fn tick(&mut self) {
        if self.reveals.is_empty() {
            return;
        }

        for reveal in self.reveals.iter_mut() {
            let Some(step) = reveal.tick() else {
                continue;
            };
            match step {
                RevealStep::Partial(content) => {
                    self.store.update_message_content(reveal.message_id(), &content);
                }
                RevealStep::Done(content) => {
                    self.store.update_message_content(reveal.message_id(), &content);
                    tracing::debug!(message_id = %reveal.message_id(), "Reveal finished");
                }
            }
        }
        self.reveals.retain(|r| !r.is_finished());
    }

    pub fn cancel_reveals(&mut self) {
        if !self.reveals.is_empty() {
            tracing::debug!(count = self.reveals.len(), "Cancelling reveals");
        }
        self.reveals.clear();
    }

    /// User-initiated reset.
    pub fn clear_conversation(&mut self) {
        self.cancel_reveals();
        self.store.clear_conversation();
        tracing::info!("Conversation cleared");
    }
}

impl Drop for ChatController {
    fn drop(&mut self) {
        self.cancel_reveals();
    }
}
