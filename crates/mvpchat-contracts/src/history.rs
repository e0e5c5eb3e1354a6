use std::fmt;

/// Exchanges kept when no explicit bound is configured.
pub const DEFAULT_MAX_EXCHANGES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEntry {
    User(String),
    Assistant(String),
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(text) => write!(f, "User: {text}"),
            Self::Assistant(text) => write!(f, "Assistant:{text}"),
        }
    }
}

/// Rolling conversation history for one session.
///
/// Entries are stored already rendered (`"User: ..."` / `"Assistant:..."`)
/// because that is the shape the text model receives. With a non-zero
/// `max_exchanges` the oldest entries are evicted two at a time, so the
/// sequence keeps starting on a user entry.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    entries: Vec<String>,
    max_exchanges: usize,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EXCHANGES)
    }
}

impl HistoryStore {
    /// `max_exchanges == 0` disables eviction.
    pub fn new(max_exchanges: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_exchanges,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    pub fn max_exchanges(&self) -> usize {
        self.max_exchanges
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn append(&mut self, entry: HistoryEntry) {
        self.entries.push(entry.to_string());
        self.evict();
    }

    pub fn record_exchange(&mut self, user: &str, assistant: &str) {
        self.append(HistoryEntry::User(user.to_string()));
        self.append(HistoryEntry::Assistant(assistant.to_string()));
    }

    pub fn read(&self) -> &[String] {
        self.entries.as_slice()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict(&mut self) {
        if self.max_exchanges == 0 {
            return;
        }
        let limit = self.max_exchanges * 2;
        if self.entries.len() <= limit {
            return;
        }
        let excess = self.entries.len() - limit;
        let drop = excess + excess % 2;
        self.entries.drain(..drop);
    }
}
