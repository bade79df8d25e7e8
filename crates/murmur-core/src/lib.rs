pub mod completion;
pub mod config;
pub mod controller;
pub mod error;
pub mod reveal;
pub mod speech;
pub mod state;
pub mod storage;
pub mod store;

// Re-export main types for convenience
pub use completion::{CompletionBackend, CompletionClient};
pub use config::Config;
pub use controller::{ChatController, SendTicket};
pub use error::{normalize_error, CompletionError, SendError};
pub use reveal::{Reveal, RevealStep, REVEAL_INTERVAL};
pub use speech::{CommandSynthesizer, LocalSynthesizer, SpeechClient, Utterance};
pub use state::{ChatMessage, ChatRole, MessageId, NewMessage};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use store::{ConversationSnapshot, ConversationStore, SubscriptionId};
