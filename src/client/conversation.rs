use crate::engines::Role;
use crate::protocol::ServerEvent;

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationEntry {
    pub role: Role,
    pub text: String,
}

/// Visible transcript of a conversation, built from server events.
///
/// Assistant deltas accumulate into one live message that the final
/// `assistant_message` replaces in place. A final whose text repeats the
/// last visible assistant message adds nothing.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    entries: Vec<ConversationEntry>,
    live: Option<String>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Returns true if the visible transcript changed.
    pub fn apply(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::FinalTranscript { text, .. } => {
                if text.trim().is_empty() {
                    return false;
                }
                self.commit_live();
                self.entries.push(ConversationEntry {
                    role: Role::User,
                    text: text.clone(),
                });
                true
            }
            ServerEvent::AssistantDelta { delta } => {
                if delta.is_empty() {
                    return false;
                }
                self.live.get_or_insert_with(String::new).push_str(delta);
                true
            }
            ServerEvent::AssistantMessage { text } => self.finish_assistant(text),
            ServerEvent::Done => {
                self.commit_live();
                false
            }
            ServerEvent::Cancelled | ServerEvent::Error { .. } => self.drop_live(),
            _ => false,
        }
    }

    /// Discard the in-progress assistant message, e.g. after a lost connection
    pub fn drop_live(&mut self) -> bool {
        self.live.take().is_some()
    }

    /// Everything visible, the live message last
    pub fn messages(&self) -> Vec<ConversationEntry> {
        let mut messages = self.entries.clone();
        if let Some(live) = &self.live {
            messages.push(ConversationEntry {
                role: Role::Assistant,
                text: live.clone(),
            });
        }
        messages
    }

    pub fn live_text(&self) -> Option<&str> {
        self.live.as_deref()
    }

    fn finish_assistant(&mut self, text: &str) -> bool {
        if let Some(live) = self.live.take() {
            self.entries.push(ConversationEntry {
                role: Role::Assistant,
                text: text.to_string(),
            });
            return live != text;
        }

        let repeated = matches!(
            self.entries.last(),
            Some(ConversationEntry { role: Role::Assistant, text: last }) if last == text
        );
        if repeated || text.is_empty() {
            return false;
        }

        self.entries.push(ConversationEntry {
            role: Role::Assistant,
            text: text.to_string(),
        });
        true
    }

    fn commit_live(&mut self) {
        if let Some(live) = self.live.take() {
            self.entries.push(ConversationEntry {
                role: Role::Assistant,
                text: live,
            });
        }
    }
}
