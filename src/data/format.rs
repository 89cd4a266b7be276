//! Request log buffering and the text wire format
//!
//! A log artifact is UTF-8 text holding one JSON object per entry, with entries
//! separated by a blank line. serde_json never emits raw newlines inside a value,
//! so the separator is unambiguous.

use crate::error::RecorderResult;

use super::RequestLogEntry;

/// Separator between serialized entries
pub const ENTRY_SEPARATOR: &str = "\n\n";

/// Buffer for collecting log entries during a recording
#[derive(Debug, Default)]
pub struct RequestLogBuffer {
    entries: Vec<RequestLogEntry>,
}

impl RequestLogBuffer {
    /// Create a new empty buffer
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append an entry, keeping arrival order
    pub fn push(&mut self, entry: RequestLogEntry) {
        self.entries.push(entry);
    }

    /// Get the number of entries in the buffer
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in arrival order
    pub fn as_slice(&self) -> &[RequestLogEntry] {
        &self.entries
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drain all entries from the buffer
    pub fn drain(&mut self) -> Vec<RequestLogEntry> {
        std::mem::take(&mut self.entries)
    }
}

/// Serialize entries into the log text format
pub fn encode_log(entries: &[RequestLogEntry]) -> RecorderResult<String> {
    let lines = entries
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lines.join(ENTRY_SEPARATOR))
}

/// Parse log text back into entries
pub fn decode_log(text: &str) -> RecorderResult<Vec<RequestLogEntry>> {
    text.split(ENTRY_SEPARATOR)
        .filter(|chunk| !chunk.trim().is_empty())
        .map(|chunk| Ok(serde_json::from_str(chunk)?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::HttpExchange;

    fn entry(path: &str, status: u16) -> RequestLogEntry {
        RequestLogEntry::captured(HttpExchange::new(
            "GET",
            format!("https://api.example.com{}", path),
            status,
        ))
    }

    #[test]
    fn test_encode_separates_entries_with_blank_line() {
        let entries = vec![entry("/a", 200), entry("/b", 404)];
        let text = encode_log(&entries).unwrap();

        assert_eq!(text.matches(ENTRY_SEPARATOR).count(), 1);
        assert!(text.starts_with('{'));
        assert!(text.ends_with('}'));
    }

    #[test]
    fn test_multiline_bodies_stay_on_one_line() {
        let exchange = HttpExchange::new("POST", "https://api.example.com/form", 500)
            .with_response_body("line one\n\nline two");
        let entries = vec![RequestLogEntry::captured(exchange), entry("/next", 200)];

        let text = encode_log(&entries).unwrap();
        let decoded = decode_log(&text).unwrap();

        assert_eq!(decoded, entries);
    }

    #[test]
    fn test_buffer_drain_empties() {
        let mut buffer = RequestLogBuffer::new();
        buffer.push(entry("/a", 200));
        buffer.push(entry("/b", 200));

        let drained = buffer.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].request.url, "https://api.example.com/a");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_decode_empty_text() {
        assert!(decode_log("").unwrap().is_empty());
    }
}
