//! Conversation notes: a rolling transcript condensed into timestamped bullets.

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

/// Default number of transcript characters kept per bullet.
pub const DEFAULT_SUMMARY_CHARS: usize = 100;

/// A saved conversation with one person.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: i64,
    pub person_id: String,
    pub person_name: String,
    pub recorded_at: DateTime<Utc>,
    pub bullet_points: Vec<String>,
}

/// Accumulates transcript text between summaries and the bullets produced
/// so far.
#[derive(Debug, Clone)]
pub struct ConversationBuffer {
    transcript: String,
    bullets: Vec<String>,
    max_chars: usize,
}

impl Default for ConversationBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_SUMMARY_CHARS)
    }
}

impl ConversationBuffer {
    pub fn new(max_chars: usize) -> Self {
        Self {
            transcript: String::new(),
            bullets: Vec::new(),
            max_chars,
        }
    }

    /// Append recognized speech to the pending transcript.
    pub fn push_transcript(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.transcript.is_empty() {
            self.transcript.push(' ');
        }
        self.transcript.push_str(text);
    }

    pub fn pending_transcript(&self) -> &str {
        &self.transcript
    }

    /// Turn the pending transcript into one bullet stamped with `now`.
    ///
    /// Returns the new bullet, or `None` when nothing was said since the
    /// last summary.
    pub fn summarize(&mut self, now: DateTime<Local>) -> Option<&str> {
        if self.transcript.trim().is_empty() {
            self.transcript.clear();
            return None;
        }
        let excerpt: String = self.transcript.chars().take(self.max_chars).collect();
        let bullet = format!("{}: • {}...", now.format("%H:%M:%S"), excerpt);
        self.transcript.clear();
        self.bullets.push(bullet);
        self.bullets.last().map(String::as_str)
    }

    pub fn bullets(&self) -> &[String] {
        &self.bullets
    }

    /// Hand over the bullets collected so far, leaving the buffer empty.
    pub fn take_bullets(&mut self) -> Vec<String> {
        std::mem::take(&mut self.bullets)
    }

    /// Drop the oldest `count` bullets, once they have been saved elsewhere.
    pub fn discard_bullets(&mut self, count: usize) {
        self.bullets.drain(..count.min(self.bullets.len()));
    }

    pub fn clear(&mut self) {
        self.transcript.clear();
        self.bullets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 14, h, m, s).single().unwrap()
    }

    #[test]
    fn test_summarize_formats_bullet() {
        let mut buf = ConversationBuffer::default();
        buf.push_transcript("we talked about the garden");
        let bullet = buf.summarize(at(9, 5, 7)).map(str::to_string);
        assert_eq!(bullet.as_deref(), Some("09:05:07: • we talked about the garden..."));
        assert!(buf.pending_transcript().is_empty());
        assert_eq!(buf.bullets().len(), 1);
    }

    #[test]
    fn test_summarize_truncates_by_characters() {
        let mut buf = ConversationBuffer::new(5);
        buf.push_transcript("héllo wörld");
        let bullet = buf.summarize(at(12, 0, 0)).map(str::to_string);
        assert_eq!(bullet.as_deref(), Some("12:00:00: • héllo..."));
    }

    #[test]
    fn test_summarize_empty_is_noop() {
        let mut buf = ConversationBuffer::default();
        buf.push_transcript("   ");
        assert!(buf.summarize(at(8, 0, 0)).is_none());
        assert!(buf.bullets().is_empty());
    }

    #[test]
    fn test_push_joins_fragments() {
        let mut buf = ConversationBuffer::default();
        buf.push_transcript("hello");
        buf.push_transcript(" there ");
        assert_eq!(buf.pending_transcript(), "hello there");
    }

    #[test]
    fn test_take_bullets_drains() {
        let mut buf = ConversationBuffer::default();
        buf.push_transcript("one");
        buf.summarize(at(1, 0, 0));
        buf.push_transcript("two");
        buf.summarize(at(1, 0, 30));
        let bullets = buf.take_bullets();
        assert_eq!(bullets.len(), 2);
        assert!(buf.bullets().is_empty());
    }

    #[test]
    fn test_discard_bullets_keeps_newer_ones() {
        let mut buf = ConversationBuffer::default();
        buf.push_transcript("one");
        buf.summarize(at(1, 0, 0));
        buf.push_transcript("two");
        buf.summarize(at(1, 0, 30));

        buf.discard_bullets(1);
        assert_eq!(buf.bullets(), ["01:00:30: • two..."]);
        buf.discard_bullets(5);
        assert!(buf.bullets().is_empty());
    }
}
