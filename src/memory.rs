//! Bounded in-process session memory.
//!
//! Holds recent conversation turns per session behind a `RwLock`d map.
//! This is a cache tier, not a store of record: it is empty after a
//! process restart and gets reconstructed from the durable chat log on
//! first access. History is bounded twice after every append — first by
//! turn count, then by estimated token cost — dropping oldest turns first.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;

use crate::models::{SessionMetadata, SessionSummary, Turn};

const DEFAULT_TITLE: &str = "New Conversation";
const TITLE_MAX_CHARS: usize = 50;

struct Session {
    metadata: SessionMetadata,
    history: Vec<Turn>,
}

pub struct ChatMemory {
    max_turns: usize,
    max_tokens: usize,
    sessions: RwLock<HashMap<String, Session>>,
}

impl ChatMemory {
    pub fn new(max_turns: usize, max_tokens: usize) -> Self {
        Self {
            max_turns,
            max_tokens,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Rough estimate: 1 token ≈ 4 characters. Only bounds memory growth;
    /// generation never depends on it being exact.
    fn estimate_tokens(text: &str) -> usize {
        text.chars().count() / 4
    }

    /// Create a session if it does not exist. Idempotent.
    pub fn create_session(&self, session_id: &str, title: Option<String>) {
        let mut sessions = self.sessions.write().unwrap();
        sessions.entry(session_id.to_string()).or_insert_with(|| {
            let now = Utc::now();
            Session {
                metadata: SessionMetadata {
                    title: title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
                    created_at: now,
                    updated_at: now,
                    message_count: 0,
                },
                history: Vec::new(),
            }
        });
    }

    /// Append a question/answer turn, auto-creating the session.
    ///
    /// Derives the session title from the first question when no explicit
    /// title was set, then enforces the turn-count bound followed by the
    /// token bound, trimming oldest-first.
    pub fn add_turn(&self, session_id: &str, question: &str, answer: &str) {
        let mut sessions = self.sessions.write().unwrap();
        let session = sessions.entry(session_id.to_string()).or_insert_with(|| {
            let now = Utc::now();
            Session {
                metadata: SessionMetadata {
                    title: DEFAULT_TITLE.to_string(),
                    created_at: now,
                    updated_at: now,
                    message_count: 0,
                },
                history: Vec::new(),
            }
        });

        session.history.push(Turn {
            question: question.to_string(),
            answer: answer.to_string(),
            timestamp: Utc::now(),
        });
        session.metadata.updated_at = Utc::now();
        session.metadata.message_count = session.history.len();

        if session.metadata.title == DEFAULT_TITLE && session.history.len() == 1 {
            session.metadata.title = derive_title(question);
        }

        // Turn bound first, then token bound.
        if session.history.len() > self.max_turns {
            let excess = session.history.len() - self.max_turns;
            session.history.drain(..excess);
        }
        session.history = Self::trim_to_token_limit(
            std::mem::take(&mut session.history),
            self.max_tokens,
        );
    }

    /// Keep the most recent turns whose cumulative estimate fits the budget.
    fn trim_to_token_limit(history: Vec<Turn>, max_tokens: usize) -> Vec<Turn> {
        let mut total = 0usize;
        let mut kept: Vec<Turn> = Vec::new();
        for turn in history.into_iter().rev() {
            let cost = Self::estimate_tokens(&turn.question) + Self::estimate_tokens(&turn.answer);
            if total + cost > max_tokens {
                break;
            }
            kept.push(turn);
            total += cost;
        }
        kept.reverse();
        kept
    }

    /// The session's turn history, oldest first. Unknown session → empty.
    pub fn get_history(&self, session_id: &str) -> Vec<Turn> {
        let sessions = self.sessions.read().unwrap();
        sessions
            .get(session_id)
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }

    /// Unknown session → `None`, never an error.
    pub fn get_session_metadata(&self, session_id: &str) -> Option<SessionMetadata> {
        let sessions = self.sessions.read().unwrap();
        sessions.get(session_id).map(|s| s.metadata.clone())
    }

    /// All sessions, most recently updated first.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.read().unwrap();
        let mut summaries: Vec<SessionSummary> = sessions
            .iter()
            .map(|(id, s)| SessionSummary {
                session_id: id.clone(),
                metadata: s.metadata.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| b.metadata.updated_at.cmp(&a.metadata.updated_at));
        summaries
    }

    /// Returns false if the session is unknown.
    pub fn update_session_title(&self, session_id: &str, title: &str) -> bool {
        let mut sessions = self.sessions.write().unwrap();
        match sessions.get_mut(session_id) {
            Some(session) => {
                session.metadata.title = title.to_string();
                session.metadata.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn delete_session(&self, session_id: &str) -> bool {
        self.sessions.write().unwrap().remove(session_id).is_some()
    }

    /// Clear history and reset the message count; the session itself and
    /// its title survive.
    pub fn clear(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().unwrap();
        match sessions.get_mut(session_id) {
            Some(session) => {
                session.history.clear();
                session.metadata.message_count = 0;
                session.metadata.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }
}

fn derive_title(question: &str) -> String {
    let chars: Vec<char> = question.chars().collect();
    if chars.len() > TITLE_MAX_CHARS {
        let mut title: String = chars[..TITLE_MAX_CHARS].iter().collect();
        title.push_str("...");
        title
    } else {
        question.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_session_idempotent() {
        let memory = ChatMemory::new(20, 4000);
        memory.create_session("s1", Some("My chat".to_string()));
        memory.create_session("s1", Some("Other title".to_string()));
        let meta = memory.get_session_metadata("s1").unwrap();
        assert_eq!(meta.title, "My chat");
        assert_eq!(meta.message_count, 0);
    }

    #[test]
    fn test_add_turn_auto_creates() {
        let memory = ChatMemory::new(20, 4000);
        memory.add_turn("s1", "What is Rust?", "A systems language.");
        let history = memory.get_history("s1");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].question, "What is Rust?");
        let meta = memory.get_session_metadata("s1").unwrap();
        assert_eq!(meta.message_count, 1);
    }

    #[test]
    fn test_title_derived_from_first_question() {
        let memory = ChatMemory::new(20, 4000);
        memory.add_turn("s1", "Short question", "Answer");
        assert_eq!(
            memory.get_session_metadata("s1").unwrap().title,
            "Short question"
        );
    }

    #[test]
    fn test_long_title_truncated_with_ellipsis() {
        let memory = ChatMemory::new(20, 4000);
        let question = "x".repeat(80);
        memory.add_turn("s1", &question, "Answer");
        let title = memory.get_session_metadata("s1").unwrap().title;
        assert_eq!(title.chars().count(), 53);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn test_explicit_title_not_overwritten() {
        let memory = ChatMemory::new(20, 4000);
        memory.create_session("s1", Some("Budget review".to_string()));
        memory.add_turn("s1", "What were Q3 numbers?", "Here they are.");
        assert_eq!(
            memory.get_session_metadata("s1").unwrap().title,
            "Budget review"
        );
    }

    #[test]
    fn test_turn_bound_drops_oldest_and_title_survives() {
        // 25 turns with max_turns = 20: the 20 most recent remain and the
        // title derived from the (now evicted) first question is untouched.
        let memory = ChatMemory::new(20, 1_000_000);
        for i in 0..25 {
            memory.add_turn("s1", &format!("question {}", i), &format!("answer {}", i));
        }
        let history = memory.get_history("s1");
        assert_eq!(history.len(), 20);
        assert_eq!(history[0].question, "question 5");
        assert_eq!(history[19].question, "question 24");
        assert_eq!(
            memory.get_session_metadata("s1").unwrap().title,
            "question 0"
        );
    }

    #[test]
    fn test_token_bound_enforced() {
        // Each turn is ~100 estimated tokens (200 chars question + 200
        // chars answer over 4); budget of 250 keeps two turns.
        let memory = ChatMemory::new(100, 250);
        let text = "y".repeat(200);
        for i in 0..5 {
            memory.add_turn("s1", &format!("{}{}", text, i), &text);
        }
        let history = memory.get_history("s1");
        assert_eq!(history.len(), 2);
        assert!(history[1].question.ends_with('4'));
    }

    #[test]
    fn test_unknown_session_sentinels() {
        let memory = ChatMemory::new(20, 4000);
        assert!(memory.get_history("nope").is_empty());
        assert!(memory.get_session_metadata("nope").is_none());
        assert!(!memory.update_session_title("nope", "t"));
        assert!(!memory.delete_session("nope"));
        assert!(!memory.clear("nope"));
    }

    #[test]
    fn test_list_sessions_sorted_by_updated_at() {
        let memory = ChatMemory::new(20, 4000);
        memory.add_turn("a", "first", "x");
        memory.add_turn("b", "second", "x");
        memory.add_turn("a", "third", "x");
        let listed = memory.list_sessions();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].session_id, "a");
        assert_eq!(listed[1].session_id, "b");
    }

    #[test]
    fn test_clear_keeps_session() {
        let memory = ChatMemory::new(20, 4000);
        memory.add_turn("s1", "hello there friend", "hi");
        assert!(memory.clear("s1"));
        assert!(memory.get_history("s1").is_empty());
        let meta = memory.get_session_metadata("s1").unwrap();
        assert_eq!(meta.message_count, 0);
        assert_eq!(meta.title, "hello there friend");
    }

    #[test]
    fn test_delete_session_removes_everything() {
        let memory = ChatMemory::new(20, 4000);
        memory.add_turn("s1", "q", "a");
        assert!(memory.delete_session("s1"));
        assert!(memory.get_session_metadata("s1").is_none());
    }
}
