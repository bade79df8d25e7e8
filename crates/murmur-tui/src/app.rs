use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use murmur_core::{
    ChatController, ChatMessage, ChatRole, CompletionBackend, CompletionClient, Config,
    ConversationStore, FileStorage, MessageId, SendError, SpeechClient, Storage,
};
use ratatui::layout::Rect;
use tokio::task::JoinHandle;

/// Ticks between two frames of the typing animation (30ms ticks -> ~300ms).
const ANIMATION_TICKS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub controller: ChatController,
    pub model: String,
    pub status: Option<String>,

    // Input state
    pub input: String,
    pub input_cursor: usize,

    // Chat view state
    pub chat_scroll: u16,
    pub chat_height: u16, // Height of chat area for scroll calculations
    pub chat_width: u16,  // Width of chat area for wrap calculations
    pub chat_area: Option<Rect>,
    pub stick_to_bottom: bool,
    conversation_changed: Arc<AtomicBool>,

    // Typing animation
    pub animation_frame: u8,
    tick_count: u32,

    // Speech state
    pub speech: SpeechClient,
    pub voice_loading: Option<MessageId>,
    /// Reply chosen with `[`/`]`; `None` follows the newest one.
    pub selected_reply: Option<MessageId>,
    voice_task: Option<JoinHandle<()>>,
}

impl App {
    pub fn new(config: &Config, data_dir: &Path) -> Self {
        let completion = CompletionClient::from_config(config);
        let status = if completion.has_credential() {
            None
        } else {
            Some("No OpenRouter API key configured; replies will fail until one is set.".to_string())
        };
        let model = completion.model().to_string();

        let storage = FileStorage::new(data_dir);
        Self::with_parts(
            Box::new(storage),
            Arc::new(completion),
            SpeechClient::from_config(config),
            model,
            status,
        )
    }

    pub fn with_parts(
        storage: Box<dyn Storage>,
        backend: Arc<dyn CompletionBackend>,
        speech: SpeechClient,
        model: String,
        status: Option<String>,
    ) -> Self {
        let mut store = ConversationStore::load(storage);

        // Follow the tail whenever a message is added/removed or typing toggles
        let conversation_changed = Arc::new(AtomicBool::new(true));
        let changed = conversation_changed.clone();
        let mut last_len = store.messages().len();
        let mut last_typing = store.is_typing();
        store.subscribe(move |snapshot| {
            if snapshot.messages.len() != last_len || snapshot.is_typing != last_typing {
                last_len = snapshot.messages.len();
                last_typing = snapshot.is_typing;
                changed.store(true, Ordering::Relaxed);
            }
        });

        Self {
            should_quit: false,
            input_mode: InputMode::Editing,
            controller: ChatController::new(store, backend),
            model,
            status,

            input: String::new(),
            input_cursor: 0,

            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            chat_area: None,
            stick_to_bottom: true,
            conversation_changed,

            animation_frame: 0,
            tick_count: 0,

            speech,
            voice_loading: None,
            selected_reply: None,
            voice_task: None,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.controller.store().messages()
    }

    pub fn is_typing(&self) -> bool {
        self.controller.is_typing()
    }

    /// Send the input box contents. Ignored while a reply is pending.
    pub fn submit_input(&mut self) {
        match self.controller.spawn_send(&self.input) {
            Ok(_) => {
                self.input.clear();
                self.input_cursor = 0;
                self.stick_to_bottom = true;
            }
            Err(SendError::EmptyInput) | Err(SendError::Busy) => {}
        }
    }

    pub fn on_tick(&mut self) {
        self.controller.tick();

        self.tick_count = self.tick_count.wrapping_add(1);
        if self.is_typing() && self.tick_count % ANIMATION_TICKS == 0 {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }

        if self.conversation_changed.swap(false, Ordering::Relaxed) {
            self.stick_to_bottom = true;
        }
        if self.stick_to_bottom {
            self.scroll_chat_to_bottom();
        }
    }

    /// Settle finished background work.
    pub async fn poll_tasks(&mut self) {
        self.controller.poll_pending().await;

        if self.voice_task.as_ref().is_some_and(|t| t.is_finished()) {
            self.voice_task = None;
            self.voice_loading = None;
        }
    }

    /// Assistant replies with content and no error, oldest first.
    fn speakable_replies(&self) -> impl DoubleEndedIterator<Item = &ChatMessage> {
        self.messages()
            .iter()
            .filter(|m| m.role == ChatRole::Assistant && !m.content.is_empty() && !m.has_error())
    }

    /// The selected reply when it is still speakable, else the newest one.
    pub fn speakable_reply(&self) -> Option<&ChatMessage> {
        self.selected_reply
            .and_then(|id| self.speakable_replies().find(|m| m.id == id))
            .or_else(|| self.speakable_replies().next_back())
    }

    /// Move the speak selection one reply back.
    pub fn select_previous_reply(&mut self) {
        let Some(current) = self.speakable_reply().map(|m| m.id) else {
            return;
        };
        let previous = self
            .speakable_replies()
            .rev()
            .skip_while(|m| m.id != current)
            .nth(1)
            .map(|m| m.id);
        if let Some(id) = previous {
            self.selected_reply = Some(id);
        }
    }

    /// Move the speak selection one reply forward. Reaching the newest follows it again.
    pub fn select_next_reply(&mut self) {
        let Some(current) = self.speakable_reply().map(|m| m.id) else {
            return;
        };
        let next = self
            .speakable_replies()
            .skip_while(|m| m.id != current)
            .nth(1)
            .map(|m| m.id);
        let newest = self.speakable_replies().next_back().map(|m| m.id);
        self.selected_reply = next.filter(|id| Some(*id) != newest);
    }

    pub fn speak_selected_reply(&mut self) {
        let Some(message) = self.speakable_reply() else {
            return;
        };
        let id = message.id;
        let text = message.content.clone();

        if let Some(task) = self.voice_task.take() {
            task.abort();
        }

        let speech = self.speech.clone();
        self.voice_loading = Some(id);
        self.voice_task = Some(tokio::spawn(async move {
            speech.speak(&text).await;
        }));
    }

    pub fn clear_conversation(&mut self) {
        self.controller.clear_conversation();
        self.chat_scroll = 0;
        self.stick_to_bottom = true;
        self.voice_loading = None;
        self.selected_reply = None;
    }

    // Chat scrolling
    pub fn scroll_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
        self.stick_to_bottom = false;
    }

    pub fn scroll_down(&mut self, lines: u16) {
        let max_scroll = self.max_chat_scroll();
        self.chat_scroll = self.chat_scroll.saturating_add(lines).min(max_scroll);
        self.stick_to_bottom = self.chat_scroll >= max_scroll;
    }

    pub fn scroll_chat_to_bottom(&mut self) {
        self.chat_scroll = self.max_chat_scroll();
    }

    fn max_chat_scroll(&self) -> u16 {
        let visible_height = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };
        let max = self.chat_line_count().saturating_sub(visible_height as usize);
        u16::try_from(max).unwrap_or(u16::MAX)
    }

    /// Approximate wrapped height of the chat transcript.
    pub fn chat_line_count(&self) -> usize {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let wrapped = |text: &str| -> usize {
            text.lines().fold(0usize, |total, line| {
                // Use character count, not byte length, for proper UTF-8 handling
                let char_count = line.chars().count();
                total.saturating_add(char_count / wrap_width + 1)
            })
        };

        let speakable = self.speakable_reply().map(|m| m.id);
        let mut total_lines: usize = 0;

        for msg in self.messages() {
            // Role line, content, blank line after message
            total_lines = total_lines.saturating_add(wrapped(&msg.content) + 2);
            if let Some(error) = &msg.error {
                total_lines = total_lines.saturating_add(wrapped(error));
            }
            if Some(msg.id) == speakable {
                total_lines = total_lines.saturating_add(1); // Speak hint
            }
        }

        if self.is_typing() {
            total_lines = total_lines.saturating_add(1); // "Thinking..."
        }

        total_lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use murmur_core::{
        CompletionError, LocalSynthesizer, MemoryStorage, NewMessage, Utterance,
    };

    struct EchoBackend;

    #[async_trait]
    impl CompletionBackend for EchoBackend {
        async fn complete(&self, history: &[ChatMessage]) -> Result<String, CompletionError> {
            let last = history.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(format!("echo: {}", last))
        }
    }

    struct SilentSynthesizer;

    impl LocalSynthesizer for SilentSynthesizer {
        fn stop(&self) {}
        fn speak(&self, _text: &str, _utterance: &Utterance) {}
    }

    fn test_app() -> App {
        let speech = SpeechClient::new(None, "voice", Arc::new(SilentSynthesizer));
        App::with_parts(
            Box::new(MemoryStorage::new()),
            Arc::new(EchoBackend),
            speech,
            "test-model".to_string(),
            None,
        )
    }

    async fn settle(app: &mut App) {
        app.controller.wait_pending().await;
        while app.controller.active_reveals() > 0 {
            app.on_tick();
        }
    }

    #[tokio::test]
    async fn test_submit_clears_input_and_sends() {
        let mut app = test_app();
        app.input = "  hello  ".to_string();
        app.input_cursor = 9;
        app.submit_input();

        assert!(app.input.is_empty());
        assert_eq!(app.input_cursor, 0);
        assert!(app.is_typing());

        settle(&mut app).await;
        let contents: Vec<&str> = app.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hello", "echo: hello"]);
        assert!(!app.is_typing());
    }

    #[tokio::test]
    async fn test_submit_while_typing_keeps_input() {
        let mut app = test_app();
        app.input = "first".to_string();
        app.submit_input();

        app.input = "second".to_string();
        app.submit_input();
        assert_eq!(app.input, "second");
        assert_eq!(app.messages().len(), 2);

        settle(&mut app).await;
    }

    #[tokio::test]
    async fn test_speakable_reply_skips_errors_and_empty() {
        let mut app = test_app();
        assert!(app.speakable_reply().is_none());

        app.input = "hi".to_string();
        app.submit_input();
        // Placeholder is empty until revealed
        assert!(app.speakable_reply().is_none());

        settle(&mut app).await;
        assert_eq!(app.speakable_reply().unwrap().content, "echo: hi");
    }

    #[tokio::test]
    async fn test_speak_tracks_loading_until_finished() {
        let mut app = test_app();
        app.input = "hi".to_string();
        app.submit_input();
        settle(&mut app).await;

        app.speak_selected_reply();
        let reply_id = app.speakable_reply().unwrap().id;
        assert_eq!(app.voice_loading, Some(reply_id));

        for _ in 0..100 {
            app.poll_tasks().await;
            if app.voice_loading.is_none() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(app.voice_loading.is_none());
    }

    #[tokio::test]
    async fn test_scroll_follows_tail_until_user_scrolls() {
        let mut app = test_app();
        app.chat_height = 3;
        app.chat_width = 40;
        for i in 0..3 {
            app.input = format!("message {}", i);
            app.submit_input();
            settle(&mut app).await;
        }
        app.on_tick();
        let bottom = app.chat_scroll;
        assert!(bottom > 0);

        app.scroll_up(2);
        assert!(!app.stick_to_bottom);
        app.on_tick();
        assert_eq!(app.chat_scroll, bottom - 2);

        app.scroll_down(10);
        assert!(app.stick_to_bottom);
        assert_eq!(app.chat_scroll, bottom);
    }

    #[tokio::test]
    async fn test_clear_conversation_resets_view() {
        let mut app = test_app();
        app.input = "hi".to_string();
        app.submit_input();
        settle(&mut app).await;

        app.clear_conversation();
        assert!(app.messages().is_empty());
        assert_eq!(app.chat_scroll, 0);
    }

    #[tokio::test]
    async fn test_select_reply_to_speak() {
        let mut app = test_app();
        for text in ["one", "two", "three"] {
            app.input = text.to_string();
            app.submit_input();
            settle(&mut app).await;
        }
        let reply = |app: &App| app.speakable_reply().unwrap().content.clone();
        assert_eq!(reply(&app), "echo: three");

        app.select_previous_reply();
        app.select_previous_reply();
        assert_eq!(reply(&app), "echo: one");
        app.select_previous_reply();
        assert_eq!(reply(&app), "echo: one");

        app.speak_selected_reply();
        let first_reply = app.messages()[1].id;
        assert_eq!(app.voice_loading, Some(first_reply));

        app.select_next_reply();
        assert_eq!(reply(&app), "echo: two");
        app.select_next_reply();
        assert_eq!(app.selected_reply, None);
        assert_eq!(reply(&app), "echo: three");

        app.poll_tasks().await;
    }

    #[tokio::test]
    async fn test_long_persisted_history_counts_without_overflow() {
        let storage = MemoryStorage::new();
        {
            let mut store = ConversationStore::load(Box::new(storage.clone()));
            let long_message = "line\n".repeat(1000);
            for _ in 0..70 {
                store.add_message(NewMessage::user(&long_message));
            }
        }

        let mut app = App::with_parts(
            Box::new(storage),
            Arc::new(EchoBackend),
            SpeechClient::new(None, "voice", Arc::new(SilentSynthesizer)),
            "test-model".to_string(),
            None,
        );
        assert_eq!(app.messages().len(), 70);
        assert_eq!(app.chat_line_count(), 70 * 1002);

        app.on_tick();
        assert_eq!(app.chat_scroll, u16::MAX);

        app.scroll_up(10);
        app.scroll_down(u16::MAX);
        assert_eq!(app.chat_scroll, u16::MAX);
    }
}
