use crate::error::ValidationError;
use crate::storage::{word_count, Sender, Turn};

/// Append-only, ordered log of a session's turns.
///
/// Word counts are kept incrementally per sender. Offsets never go backwards:
/// an append with an earlier offset than the last turn is raised to it.
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    session_id: String,
    turns: Vec<Turn>,
    user_words: u32,
    agent_words: u32,
}

impl TranscriptStore {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            turns: Vec::new(),
            user_words: 0,
            agent_words: 0,
        }
    }

    /// Append a turn. The text is trimmed and must not end up empty.
    pub fn append(
        &mut self,
        sender: Sender,
        text: &str,
        offset_secs: f64,
    ) -> Result<&Turn, ValidationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyText);
        }

        let floor = self.last_offset();
        let offset = if offset_secs.is_finite() {
            offset_secs.max(floor)
        } else {
            floor
        };

        let turn = Turn::new(&self.session_id, sender, text, offset);
        match sender {
            Sender::User => self.user_words += turn.word_count(),
            Sender::Agent => self.agent_words += turn.word_count(),
        }
        self.turns.push(turn);

        Ok(&self.turns[self.turns.len() - 1])
    }

    /// Append with a sender given as text, as it arrives from outside the crate.
    pub fn append_from(
        &mut self,
        sender: &str,
        text: &str,
        offset_secs: f64,
    ) -> Result<&Turn, ValidationError> {
        let sender = sender.parse::<Sender>()?;
        self.append(sender, text, offset_secs)
    }

    /// All turns in insertion order.
    pub fn all(&self) -> &[Turn] {
        &self.turns
    }

    /// The most recent `n` turns.
    pub fn window(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    pub fn word_count(&self, sender: Sender) -> u32 {
        match sender {
            Sender::User => self.user_words,
            Sender::Agent => self.agent_words,
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn count(&self, sender: Sender) -> usize {
        self.turns.iter().filter(|t| t.sender == sender).count()
    }

    pub fn has_both_senders(&self) -> bool {
        self.count(Sender::User) > 0 && self.count(Sender::Agent) > 0
    }

    /// Latest turn by `sender`.
    pub fn last_from(&self, sender: Sender) -> Option<&Turn> {
        self.turns.iter().rev().find(|t| t.sender == sender)
    }

    pub fn last_offset(&self) -> f64 {
        self.turns.last().map_or(0.0, |t| t.offset_secs)
    }

    /// Recount words from scratch. Matches the incremental counters.
    pub fn recount(&self, sender: Sender) -> u32 {
        self.turns
            .iter()
            .filter(|t| t.sender == sender)
            .map(|t| word_count(&t.text))
            .sum()
    }
}
