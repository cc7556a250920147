//! Ordered message history for one of the session's two LLM dialogues.

use crate::types::Message;
use serde::{Deserialize, Serialize};

/// How a dialogue-driven step treats the existing history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueMode {
    /// Discard history and start from a new system prompt and task.
    Fresh,
    /// Keep history and append the "previous query returned no results" turn.
    Retry,
}

/// An append-only log of role-tagged messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dialogue {
    messages: Vec<Message>,
}

impl Dialogue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the history with a system prompt followed by a user task.
    pub fn start_fresh(&mut self, system: impl Into<String>, task: impl Into<String>) {
        self.messages.clear();
        self.messages.push(Message::system(system));
        self.messages.push(Message::user(task));
    }

    /// Append a user turn to the existing history.
    pub fn continue_with(&mut self, turn: impl Into<String>) {
        self.messages.push(Message::user(turn));
    }

    /// Append the model's reply.
    pub fn record_reply(&mut self, reply: Message) {
        self.messages.push(reply);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[test]
    fn test_start_fresh_discards_history() {
        let mut dialogue = Dialogue::new();
        dialogue.start_fresh("sys-1", "task-1");
        dialogue.record_reply(Message::assistant("reply"));
        dialogue.start_fresh("sys-2", "task-2");

        assert_eq!(dialogue.len(), 2);
        assert_eq!(dialogue.messages()[0], Message::system("sys-2"));
        assert_eq!(dialogue.messages()[1], Message::user("task-2"));
    }

    #[test]
    fn test_continue_appends_user_turn() {
        let mut dialogue = Dialogue::new();
        dialogue.start_fresh("sys", "task");
        dialogue.record_reply(Message::assistant("{}"));
        dialogue.continue_with("try again");

        let roles: Vec<Role> = dialogue.messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(dialogue.last().map(|m| m.text.as_str()), Some("try again"));
    }

    #[test]
    fn test_new_dialogue_is_empty() {
        let dialogue = Dialogue::new();
        assert!(dialogue.is_empty());
        assert!(dialogue.last().is_none());
    }
}
