//! Append-only conversational memory.
//!
//! Every turn of a session lands here in arrival order and is rendered back to
//! text (`speaker: message` per entry) for inclusion in prompts. Entries are never
//! edited or removed; an optional window only limits what `render_window` emits.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MemoryEntry {
    pub speaker: String,
    pub message: String,
    pub agent_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn render(&self) -> String {
        format!("{}: {}", self.speaker, self.message)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Memory {
    entries: Vec<MemoryEntry>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(
        &mut self,
        speaker: impl Into<String>,
        message: impl Into<String>,
        agent_name: Option<String>,
        timestamp: Option<DateTime<Utc>>,
    ) -> &MemoryEntry {
        self.entries.push(MemoryEntry {
            speaker: speaker.into(),
            message: message.into(),
            agent_name,
            timestamp: timestamp.unwrap_or_else(Utc::now),
        });
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn render(&self) -> String {
        render_entries(&self.entries)
    }

    /// Renders only the most recent `window` entries; `None` renders everything.
    pub fn render_window(&self, window: Option<usize>) -> String {
        match window {
            Some(size) if size < self.entries.len() => {
                render_entries(&self.entries[self.entries.len() - size..])
            }
            _ => self.render(),
        }
    }
}

fn render_entries(entries: &[MemoryEntry]) -> String {
    entries.iter().map(MemoryEntry::render).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::Memory;

    #[test]
    fn render_preserves_call_order_one_line_per_entry() {
        let mut memory = Memory::new();
        memory.append("User", "Hi", None, None);
        memory.append("Tim", "Hello", Some("ConversationAgent".to_string()), None);
        memory.append("User", "How are you?", None, None);

        let rendered = memory.render();
        let lines = rendered.lines().collect::<Vec<_>>();

        assert_eq!(lines, vec!["User: Hi", "Tim: Hello", "User: How are you?"]);
        assert_eq!(memory.len(), 3);
    }

    #[test]
    fn empty_memory_renders_empty_text() {
        let memory = Memory::new();
        assert!(memory.is_empty());
        assert_eq!(memory.render(), "");
    }

    #[test]
    fn explicit_timestamp_is_kept_and_default_is_now() {
        let fixed = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).single().expect("valid timestamp");
        let before = Utc::now();

        let mut memory = Memory::new();
        memory.append("User", "first", None, Some(fixed));
        memory.append("User", "second", None, None);

        assert_eq!(memory.entries()[0].timestamp, fixed);
        assert!(memory.entries()[1].timestamp >= before);
    }

    #[test]
    fn agent_attribution_is_recorded() {
        let mut memory = Memory::new();
        let entry =
            memory.append("Tim", "Hello", Some("ConversationAgent".to_string()), None).clone();

        assert_eq!(entry.agent_name.as_deref(), Some("ConversationAgent"));
        assert_eq!(entry.speaker, "Tim");
    }

    #[test]
    fn window_limits_rendering_but_never_drops_entries() {
        let mut memory = Memory::new();
        for index in 0..5 {
            memory.append("User", format!("message {index}"), None, None);
        }

        assert_eq!(memory.render_window(Some(2)), "User: message 3\nUser: message 4");
        assert_eq!(memory.render_window(Some(10)), memory.render());
        assert_eq!(memory.render_window(None), memory.render());
        assert_eq!(memory.len(), 5);
    }
}
