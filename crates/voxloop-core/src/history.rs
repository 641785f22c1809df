//! Bounded conversational memory.

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::time::Instant;

/// One completed exchange. Immutable once created.
#[derive(Debug, Clone)]
pub struct ConversationEntry {
    pub user_input: String,
    pub ai_response: String,
    pub timestamp: Instant,
}

impl ConversationEntry {
    pub fn new(user_input: impl Into<String>, ai_response: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            ai_response: ai_response.into(),
            timestamp: Instant::now(),
        }
    }
}

/// Insertion-ordered log of exchanges with a fixed capacity and FIFO
/// eviction. Safe for concurrent reads alongside a single writer; readers
/// never observe a partially appended entry.
pub struct ConversationHistory {
    entries: RwLock<VecDeque<ConversationEntry>>,
    capacity: usize,
}

impl ConversationHistory {
    /// `capacity` must be >= 1.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "history capacity must be at least 1");
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Appends to the tail, evicting from the head once over capacity.
    pub fn append(&self, entry: ConversationEntry) {
        let mut entries = self.entries.write();
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Independent, order-preserving copy; callers observe no further
    /// mutation.
    pub fn snapshot(&self) -> Vec<ConversationEntry> {
        self.entries.read().iter().cloned().collect()
    }

    /// Empties the log. Capacity is unaffected.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Renders the grounding context sent with each generation call: the
    /// retained exchanges oldest-first as User/Assistant lines, followed by
    /// the configured system prompt.
    pub fn render_context(&self, system_prompt: &str) -> String {
        let entries = self.entries.read();
        let mut context = String::new();

        if !entries.is_empty() {
            context.push_str("Previous conversation history:\n");
            for entry in entries.iter() {
                let _ = writeln!(context, "User: {}", entry.user_input);
                let _ = writeln!(context, "Assistant: {}", entry.ai_response);
                context.push_str("---\n");
            }
            context.push('\n');
        }

        context.push_str(system_prompt);
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn entry(user: &str, ai: &str) -> ConversationEntry {
        ConversationEntry::new(user, ai)
    }

    #[test]
    fn evicts_oldest_first_at_capacity() {
        let history = ConversationHistory::new(2);
        history.append(entry("a", "ra"));
        history.append(entry("b", "rb"));
        history.append(entry("c", "rc"));

        let snap = history.snapshot();
        assert_eq!(history.len(), 2);
        assert_eq!(snap[0].user_input, "b");
        assert_eq!(snap[1].user_input, "c");
    }

    #[test]
    fn retains_the_capacity_most_recent_of_many() {
        let history = ConversationHistory::new(3);
        for i in 0..10 {
            history.append(entry(&format!("u{i}"), &format!("r{i}")));
        }
        let snap = history.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0].user_input, "u7");
        assert_eq!(snap[2].user_input, "u9");
    }

    #[test]
    fn snapshot_is_idempotent_and_defensive() {
        let history = ConversationHistory::new(4);
        history.append(entry("hello", "world"));

        let a = history.snapshot();
        let b = history.snapshot();
        assert_eq!(a.len(), b.len());
        assert_eq!(a[0].user_input, b[0].user_input);
        assert_eq!(a[0].ai_response, b[0].ai_response);

        // Mutating after the snapshot does not reach earlier copies.
        history.append(entry("again", "yes"));
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn clear_keeps_capacity() {
        let history = ConversationHistory::new(2);
        history.append(entry("a", "b"));
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.capacity(), 2);

        history.append(entry("c", "d"));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn renders_history_before_prompt_oldest_first() {
        let history = ConversationHistory::new(4);
        history.append(entry("hi", "hello"));
        history.append(entry("how are you", "fine"));

        let context = history.render_context("Be terse.");
        let expected = "Previous conversation history:\n\
                        User: hi\nAssistant: hello\n---\n\
                        User: how are you\nAssistant: fine\n---\n\n\
                        Be terse.";
        assert_eq!(context, expected);
    }

    #[test]
    fn empty_history_renders_prompt_only() {
        let history = ConversationHistory::new(4);
        assert_eq!(history.render_context("Be terse."), "Be terse.");
    }

    #[test]
    fn concurrent_readers_with_one_writer() {
        let history = Arc::new(ConversationHistory::new(8));
        let writer = {
            let history = history.clone();
            std::thread::spawn(move || {
                for i in 0..100 {
                    history.append(entry(&format!("u{i}"), "r"));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let history = history.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let snap = history.snapshot();
                        assert!(snap.len() <= 8);
                        // Entries are whole: user text always has a matching
                        // response.
                        assert!(snap.iter().all(|e| e.ai_response == "r"));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(history.len(), 8);
    }
}
