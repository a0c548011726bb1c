//! Incremental SSE parser for POST response bodies.
//!
//! The server frames JSON-RPC responses as `event: message` / `data: ...`
//! blocks terminated by a blank line. The parser is fed one line at a time
//! so chunk boundaries in the HTTP body never matter, and only `message`
//! blocks are surfaced; comments, unknown fields, and other event types
//! are dropped.

use serde_json::Value;

#[derive(Debug, Default)]
pub struct SseMessageParser {
    event_type: Option<String>,
    data: String,
    has_data: bool,
}

impl SseMessageParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line; a completed `event: message` block yields its data.
    pub fn feed_line(&mut self, raw_line: &str) -> Option<String> {
        let line = raw_line.trim_end_matches(['\r', '\n']);

        if line.is_empty() {
            return self.flush();
        }

        if line.starts_with(':') {
            return None;
        }

        if let Some(stripped) = line.strip_prefix("event:") {
            let value = stripped.trim_start();
            self.event_type = if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            };
            return None;
        }

        if let Some(stripped) = line.strip_prefix("data:") {
            if self.has_data {
                self.data.push('\n');
            }
            self.data.push_str(stripped.trim_start());
            self.has_data = true;
            return None;
        }

        // id:, retry:, and anything else are ignored.
        None
    }

    /// Terminate the pending block, as a trailing blank line would. Needed
    /// for bodies that end without one.
    pub fn flush(&mut self) -> Option<String> {
        if self.event_type.is_none() && !self.has_data {
            return None;
        }
        let event_type = self.event_type.take();
        let data = std::mem::take(&mut self.data);
        self.has_data = false;

        match event_type.as_deref() {
            Some("message") => Some(data),
            _ => None,
        }
    }
}

/// All `message` payloads in an SSE body, one [`Value`] per block.
/// Data that is not valid JSON is carried through as a string rather than
/// dropped.
pub fn message_payloads(body: &str) -> Vec<Value> {
    let mut parser = SseMessageParser::new();
    let mut payloads = Vec::new();
    for line in body.lines() {
        if let Some(data) = parser.feed_line(line) {
            payloads.push(parse_payload(&data));
        }
    }
    if let Some(data) = parser.flush() {
        payloads.push(parse_payload(&data));
    }
    payloads
}

fn parse_payload(data: &str) -> Value {
    serde_json::from_str(data).unwrap_or_else(|_| Value::String(data.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_message_block_yields_its_payload() {
        let payloads = message_payloads("event: message\ndata: {\"a\":1}\n\n");
        assert_eq!(payloads, vec![json!({"a": 1})]);
    }

    #[test]
    fn block_without_trailing_blank_line_is_still_surfaced() {
        let payloads = message_payloads("event: message\ndata: {\"a\":1}");
        assert_eq!(payloads, vec![json!({"a": 1})]);
    }

    #[test]
    fn non_message_events_and_comments_are_dropped() {
        let body = ": keep-alive\n\
                    event: ping\ndata: {}\n\n\
                    event: message\ndata: {\"id\":1}\n\n";
        let payloads = message_payloads(body);
        assert_eq!(payloads, vec![json!({"id": 1})]);
    }

    #[test]
    fn multiple_message_blocks_each_yield_one_payload() {
        let body = "event: message\ndata: {\"id\":1}\n\n\
                    event: message\ndata: {\"id\":2}\n\n";
        let payloads = message_payloads(body);
        assert_eq!(payloads, vec![json!({"id": 1}), json!({"id": 2})]);
    }

    #[test]
    fn malformed_data_falls_back_to_raw_text() {
        let payloads = message_payloads("event: message\ndata: {not json\n\n");
        assert_eq!(payloads, vec![Value::String("{not json".into())]);
    }

    #[test]
    fn multiline_data_is_joined_before_parsing() {
        let body = "event: message\ndata: {\"a\":\ndata: 1}\n\n";
        let payloads = message_payloads(body);
        assert_eq!(payloads, vec![json!({"a": 1})]);
    }

    #[test]
    fn data_only_blocks_are_not_messages() {
        assert!(message_payloads("data: {\"a\":1}\n\n").is_empty());
    }

    #[test]
    fn crlf_bodies_parse_the_same() {
        let payloads = message_payloads("event: message\r\ndata: {\"a\":1}\r\n\r\n");
        assert_eq!(payloads, vec![json!({"a": 1})]);
    }

    #[test]
    fn parser_resets_between_blocks() {
        let mut parser = SseMessageParser::new();
        assert!(parser.feed_line("event: message").is_none());
        assert!(parser.feed_line("data: one").is_none());
        assert_eq!(parser.feed_line("").as_deref(), Some("one"));

        // The next block starts clean: no event type carried over.
        assert!(parser.feed_line("data: two").is_none());
        assert!(parser.feed_line("").is_none());
    }
}
