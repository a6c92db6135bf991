//! Output Buffer - bounded capture of process and console text
//!
//! Both task executions and debug sessions accumulate output into an
//! [`OutputBuffer`]. Content is append-only and never exceeds the capacity;
//! once the capacity is hit the buffer is marked truncated and everything
//! offered afterwards is dropped.

use serde::{Deserialize, Serialize};

/// Engine-wide default capacity (bytes of UTF-8 text)
pub const DEFAULT_OUTPUT_CAPACITY: usize = 1024 * 1024;

/// Marker appended by [`OutputBuffer::render`] for truncated buffers
pub const TRUNCATION_NOTICE: &str = "\n... [output truncated]";

/// Bounded, append-only text accumulator
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    content: String,
    capacity: usize,
    offered: usize,
    truncated: bool,
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            content: String::new(),
            capacity,
            offered: 0,
            truncated: false,
        }
    }

    /// Resolve an optional per-record override against the engine default
    pub fn with_override(capacity: Option<usize>, default_capacity: usize) -> Self {
        Self::new(capacity.unwrap_or(default_capacity))
    }

    /// Buffer pre-filled with a placeholder, used when capture is disabled
    pub fn placeholder(message: impl Into<String>) -> Self {
        let content = message.into();
        Self {
            capacity: content.len(),
            offered: content.len(),
            content,
            truncated: false,
        }
    }

    /// Append a fragment, clipping at the capacity.
    ///
    /// A fragment straddling the limit is cut at the last UTF-8 character
    /// boundary that still fits, so `len() <= capacity()` always holds.
    pub fn push(&mut self, fragment: &str) {
        self.offered = self.offered.saturating_add(fragment.len());
        if self.truncated {
            return;
        }

        let remaining = self.capacity - self.content.len();
        if fragment.len() <= remaining {
            self.content.push_str(fragment);
            return;
        }

        let mut cut = remaining;
        while !fragment.is_char_boundary(cut) {
            cut -= 1;
        }
        self.content.push_str(&fragment[..cut]);
        self.truncated = true;
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Content with a trailing notice when truncated
    pub fn render(&self) -> String {
        if self.truncated {
            format!("{}{}", self.content, TRUNCATION_NOTICE)
        } else {
            self.content.clone()
        }
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total bytes ever offered, including dropped ones
    pub fn offered(&self) -> usize {
        self.offered
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn snapshot(&self) -> OutputSnapshot {
        OutputSnapshot {
            content: self.content.clone(),
            truncated: self.truncated,
            total_bytes: self.offered,
        }
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_CAPACITY)
    }
}

/// Immutable view of a buffer handed to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSnapshot {
    pub content: String,
    pub truncated: bool,
    pub total_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_within_capacity() {
        let mut buffer = OutputBuffer::new(16);
        buffer.push("hello\n");
        buffer.push("world\n");
        assert_eq!(buffer.content(), "hello\nworld\n");
        assert!(!buffer.is_truncated());
    }

    #[test]
    fn test_exact_capacity_is_not_truncated() {
        let mut buffer = OutputBuffer::new(5);
        buffer.push("abcde");
        assert_eq!(buffer.len(), 5);
        assert!(!buffer.is_truncated());

        buffer.push("f");
        assert_eq!(buffer.content(), "abcde");
        assert!(buffer.is_truncated());
    }

    #[test]
    fn test_straddling_write_is_clipped() {
        let mut buffer = OutputBuffer::new(10);
        buffer.push(&"x".repeat(100));
        assert_eq!(buffer.content(), "x".repeat(10));
        assert!(buffer.is_truncated());
        assert_eq!(buffer.offered(), 100);
    }

    #[test]
    fn test_truncated_flag_is_sticky() {
        let mut buffer = OutputBuffer::new(3);
        buffer.push("abcd");
        assert!(buffer.is_truncated());
        buffer.push("");
        buffer.push("e");
        assert!(buffer.is_truncated());
        assert_eq!(buffer.content(), "abc");
    }

    #[test]
    fn test_clip_respects_char_boundary() {
        let mut buffer = OutputBuffer::new(4);
        // "é" is two bytes; the second one would straddle the limit
        buffer.push("abcé");
        assert_eq!(buffer.content(), "abc");
        assert!(buffer.len() <= buffer.capacity());
        assert!(buffer.is_truncated());
    }

    #[test]
    fn test_length_never_exceeds_capacity() {
        for capacity in 0..24 {
            let mut buffer = OutputBuffer::new(capacity);
            let mut offered = 0;
            for fragment in ["ab", "ü", "", "line\n", "日本", "z"] {
                buffer.push(fragment);
                offered += fragment.len();
                assert!(buffer.len() <= capacity);
                assert_eq!(buffer.is_truncated(), offered > capacity);
            }
        }
    }

    #[test]
    fn test_override_and_render() {
        let mut buffer = OutputBuffer::with_override(Some(2), DEFAULT_OUTPUT_CAPACITY);
        assert_eq!(buffer.capacity(), 2);
        buffer.push("abc");
        assert_eq!(buffer.render(), format!("ab{}", TRUNCATION_NOTICE));

        let buffer = OutputBuffer::with_override(None, 7);
        assert_eq!(buffer.capacity(), 7);
    }

    #[test]
    fn test_placeholder() {
        let buffer = OutputBuffer::placeholder("not captured");
        assert_eq!(buffer.content(), "not captured");
        assert!(!buffer.is_truncated());
    }
}
