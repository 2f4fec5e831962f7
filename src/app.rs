use ratatui::layout::Rect;
use folio_core::{Backend, ChatRole, Conversation, EngineManager, EngineState, Snapshot, UserConsent};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,

    // Input box
    pub input: String,
    pub cursor: usize, // cursor position in input, in chars

    // Chat state (latest transcript snapshot)
    pub messages: Snapshot,
    pub chat_scroll: u16,
    pub chat_height: u16, // Height of chat area for scroll calculations
    pub chat_width: u16,  // Width of chat area for wrap calculations
    pub follow_tail: bool,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Backend
    pub backend: Backend,
    pub conversation: Conversation,
    pub engine: Option<EngineManager>,
    pub engine_state: EngineState,
    pub model: String,

    // Download confirmation popup (local mode)
    pub show_download_confirm: bool,

    // Panel area for mouse hit-testing (updated during render)
    pub chat_area: Option<Rect>,
}

impl App {
    pub fn new(conversation: Conversation, backend: Backend, engine: Option<EngineManager>, model: &str) -> Self {
        let messages = conversation.transcript().snapshot();
        let engine_state = engine
            .as_ref()
            .map(|e| e.state())
            .unwrap_or(EngineState::NotStarted);

        Self {
            should_quit: false,
            input_mode: InputMode::Editing,

            input: String::new(),
            cursor: 0,

            messages,
            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            follow_tail: true,

            animation_frame: 0,

            backend,
            conversation,
            engine,
            engine_state,
            model: model.to_string(),

            show_download_confirm: false,

            chat_area: None,
        }
    }

    /// Typing and sending are allowed only when a turn could start.
    pub fn input_enabled(&self) -> bool {
        self.conversation.can_submit()
    }

    pub fn is_busy(&self) -> bool {
        self.conversation.is_busy()
    }

    /// Busy with nothing streamed yet.
    pub fn is_thinking(&self) -> bool {
        self.is_busy()
            && self
                .messages
                .last()
                .map(|m| m.role == ChatRole::Assistant && m.content.is_empty())
                .unwrap_or(false)
    }

    /// Hand the input to the conversation; blank input or a busy
    /// conversation leaves everything as it was.
    pub fn send_query(&mut self) {
        if let Some(turn) = self.conversation.begin(&self.input) {
            self.input.clear();
            self.cursor = 0;
            self.follow_tail = true;
            self.messages = self.conversation.transcript().snapshot();
            self.scroll_to_bottom();
            tokio::spawn(turn.run());
        }
    }

    /// Local engine not loaded (or failed): ask before downloading anything.
    pub fn request_engine_load(&mut self) {
        if matches!(self.engine_state, EngineState::NotStarted | EngineState::Failed(_)) && self.engine.is_some() {
            self.show_download_confirm = true;
        }
    }

    pub fn confirm_download(&mut self) {
        self.show_download_confirm = false;
        if let Some(engine) = &self.engine {
            self.start_engine_load(engine.clone(), UserConsent::given());
        }
    }

    pub fn decline_download(&mut self) {
        self.show_download_confirm = false;
        info!("local engine download declined");
    }

    pub fn start_engine_load(&mut self, engine: EngineManager, consent: UserConsent) {
        if let Some(load) = engine.begin_load(consent) {
            self.engine_state = engine.state();
            tokio::spawn(load.run());
        }
    }

    pub fn on_transcript(&mut self, snapshot: Snapshot) {
        self.messages = snapshot;
        if self.follow_tail {
            self.scroll_to_bottom();
        }
    }

    pub fn on_engine(&mut self, state: EngineState) {
        self.engine_state = state;
    }

    /// One line for the footer: engine progress in local mode, otherwise the server.
    pub fn status_text(&self) -> String {
        match self.backend {
            Backend::Local => self.engine_state.status_text(),
            Backend::Remote => format!("{} - {}", self.backend.display_name(), self.model),
        }
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.is_thinking() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.follow_tail = false;
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
    }

    pub fn scroll_down(&mut self, lines: u16) {
        let max = self.max_scroll();
        self.chat_scroll = self.chat_scroll.saturating_add(lines).min(max);
        self.follow_tail = self.chat_scroll >= max;
    }

    /// Scroll chat to bottom so the newest text (or "Thinking...") is visible
    pub fn scroll_to_bottom(&mut self) {
        self.chat_scroll = self.max_scroll();
    }

    fn max_scroll(&self) -> u16 {
        // Default to 50 wide / 20 high before the first render
        let wrap_width = if self.chat_width > 0 { self.chat_width as usize } else { 50 };
        let visible_height = if self.chat_height > 0 { self.chat_height } else { 20 };

        let mut total_lines: u16 = 0;
        for msg in self.messages.iter() {
            total_lines = total_lines.saturating_add(1); // Role line ("You:" or "AI:")
            let content = if msg.content.is_empty() && self.is_thinking() { "Thinking..." } else { &msg.content };
            total_lines = total_lines.saturating_add(wrapped_line_count(content, wrap_width));
            total_lines = total_lines.saturating_add(1); // Blank line after message
        }

        total_lines.saturating_sub(visible_height)
    }
}

/// Lines `text` takes when wrapped at `width` columns.
pub fn wrapped_line_count(text: &str, width: usize) -> u16 {
    let width = width.max(1);
    let mut lines: u16 = 0;
    for line in text.lines() {
        // Use character count, not byte length, for proper UTF-8 handling
        let char_count = line.chars().count();
        let wrapped = if char_count == 0 { 1 } else { char_count.div_ceil(width) };
        lines = lines.saturating_add(wrapped as u16);
    }
    lines.max(1)
}
