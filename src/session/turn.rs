use std::collections::VecDeque;

use crate::cancel::EpochToken;
use crate::engines::ChatMessage;

/// One user utterance and the assistant's reply to it.
pub struct Turn {
    pub epoch: u64,
    pub token: EpochToken,
    /// Final transcript, once transcription has finished.
    pub transcript: Option<String>,
    /// Assistant text accumulated from deltas.
    pub assistant_text: String,
    pub chunks_sent: u32,
}

impl Turn {
    pub fn new(epoch: u64) -> Self {
        Self {
            epoch,
            token: EpochToken::new(epoch),
            transcript: None,
            assistant_text: String::new(),
            chunks_sent: 0,
        }
    }

    /// Raises the token so every pending stage of this turn stops at its next
    /// suspension point. The worker task is left to observe it and exit.
    pub fn retire(self) -> EpochToken {
        self.token.cancel();
        self.token
    }
}

/// Completed turns used as generation context, oldest first.
#[derive(Debug, Clone, Default)]
pub struct History {
    turns: VecDeque<(String, String)>,
    max_turns: usize,
}

impl History {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns,
        }
    }

    pub fn push(&mut self, user: String, assistant: String) {
        if self.max_turns == 0 {
            return;
        }
        self.turns.push_back((user, assistant));
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.turns
            .iter()
            .flat_map(|(user, assistant)| {
                [
                    ChatMessage::user(user.clone()),
                    ChatMessage::assistant(assistant.clone()),
                ]
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let mut history = History::new(2);
        history.push("a".into(), "1".into());
        history.push("b".into(), "2".into());
        history.push("c".into(), "3".into());
        assert_eq!(history.len(), 2);
        let messages = history.messages();
        assert_eq!(messages[0], ChatMessage::user("b"));
        assert_eq!(messages[3], ChatMessage::assistant("3"));
    }

    #[test]
    fn test_retire_raises_token() {
        let turn = Turn::new(3);
        let token = turn.token.clone();
        let retired = turn.retire();
        assert!(token.is_cancelled());
        assert_eq!(retired.epoch(), 3);
    }
}
