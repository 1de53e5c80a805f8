use tysva_shared::{ChatMessage, GenerationRequest, MessageRole};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEntry {
    TextTurn { role: MessageRole, content: String },
    FileTurn { path: String },
}

impl HistoryEntry {
    fn is_assistant(&self) -> bool {
        matches!(self, HistoryEntry::TextTurn { role: MessageRole::Assistant, .. })
    }

    fn to_message(&self) -> ChatMessage {
        match self {
            HistoryEntry::TextTurn { role, content } => ChatMessage::new(*role, content.clone()),
            HistoryEntry::FileTurn { path } => ChatMessage::new(
                MessageRole::User,
                format!("My prompt is contained in this audio file: {}", path),
            ),
        }
    }
}

/// Conversation owned by one CLI run. The server is stateless; every request
/// carries the history built here.
pub struct Session {
    pub id: Uuid,
    entries: Vec<HistoryEntry>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            entries: Vec::new(),
        }
    }

    pub fn push_text(&mut self, content: impl Into<String>) {
        self.entries.push(HistoryEntry::TextTurn {
            role: MessageRole::User,
            content: content.into(),
        });
    }

    pub fn push_file(&mut self, path: impl Into<String>) {
        self.entries.push(HistoryEntry::FileTurn { path: path.into() });
    }

    fn pending_start(&self) -> usize {
        self.entries
            .iter()
            .rposition(HistoryEntry::is_assistant)
            .map_or(0, |i| i + 1)
    }

    pub fn has_pending(&self) -> bool {
        self.pending_start() < self.entries.len()
    }

    /// Builds the request for the user turns since the last reply. The first
    /// non-empty text wins; otherwise the first queued file is sent.
    pub fn next_request(&self, voice_enabled: bool) -> Option<GenerationRequest> {
        let start = self.pending_start();
        let pending = &self.entries[start..];
        let chat_history = self.entries[..start].iter().map(HistoryEntry::to_message).collect();

        let text = pending.iter().find_map(|entry| match entry {
            HistoryEntry::TextTurn { content, .. } if !content.trim().is_empty() => Some(content.clone()),
            _ => None,
        });
        if let Some(prompt) = text {
            return Some(GenerationRequest::from_prompt(prompt, voice_enabled, chat_history));
        }

        pending.iter().find_map(|entry| match entry {
            HistoryEntry::FileTurn { path } => Some(GenerationRequest::from_file(
                path.clone(),
                voice_enabled,
                chat_history.clone(),
            )),
            _ => None,
        })
    }

    /// Appends the reply. An empty trace is not recorded.
    pub fn record_exchange(&mut self, process: &str, response: &str) {
        if !process.is_empty() {
            self.entries.push(HistoryEntry::TextTurn {
                role: MessageRole::Assistant,
                content: process.to_string(),
            });
        }
        self.entries.push(HistoryEntry::TextTurn {
            role: MessageRole::Assistant,
            content: response.to_string(),
        });
    }

    /// Drops user turns that never got a reply.
    pub fn discard_pending(&mut self) {
        let start = self.pending_start();
        self.entries.truncate(start);
    }

    pub fn chat_history(&self) -> Vec<ChatMessage> {
        self.entries.iter().map(HistoryEntry::to_message).collect()
    }
}
