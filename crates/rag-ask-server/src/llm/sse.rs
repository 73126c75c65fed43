/// Incremental SSE parsing: a line buffer for byte chunks that split
/// mid-line, and a state machine that assembles `event:`/`data:` frames.
/// Both tolerate a final event without a trailing blank line.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    AwaitingEvent,
    ReadingData,
    EventComplete,
    Done,
}

/// Accumulates bytes and yields complete lines; CRLF and LF both count.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop(); // the \n
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Remaining partial line at EOF.
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }
}

/// Line-level SSE state machine. Feed lines; complete events come back as
/// they close. `finish` drains a final unterminated event at EOF.
#[derive(Debug)]
pub struct SseParser {
    state: ParserState,
    event_name: Option<String>,
    data_lines: Vec<String>,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::AwaitingEvent,
            event_name: None,
            data_lines: Vec::new(),
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
        if self.state == ParserState::Done {
            return None;
        }
        if self.state == ParserState::EventComplete {
            self.state = ParserState::AwaitingEvent;
        }

        if line.is_empty() {
            return self.complete_event();
        }

        if let Some(rest) = line.strip_prefix(':') {
            // Comment line; keep-alives arrive this way.
            let _ = rest;
            return None;
        }

        if let Some(value) = field_value(line, "event") {
            self.event_name = Some(value.to_string());
            return None;
        }

        if let Some(value) = field_value(line, "data") {
            self.data_lines.push(value.to_string());
            self.state = ParserState::ReadingData;
            return None;
        }

        None
    }

    /// EOF: emit a pending event even without its trailing blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let event = self.complete_event();
        self.state = ParserState::Done;
        event
    }

    fn complete_event(&mut self) -> Option<SseEvent> {
        if self.data_lines.is_empty() && self.event_name.is_none() {
            self.state = ParserState::AwaitingEvent;
            return None;
        }

        let event = SseEvent {
            event: self.event_name.take(),
            data: self.data_lines.join("\n"),
        };
        self.data_lines.clear();
        self.state = ParserState::EventComplete;
        Some(event)
    }
}

fn field_value<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?;
    let rest = rest.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(parser: &mut SseParser, input: &str) -> Vec<SseEvent> {
        let mut events = Vec::new();
        for line in input.split('\n') {
            if let Some(event) = parser.feed_line(line) {
                events.push(event);
            }
        }
        if let Some(event) = parser.finish() {
            events.push(event);
        }
        events
    }

    #[test]
    fn parses_named_events() {
        let mut parser = SseParser::new();
        let events = collect(&mut parser, "event: chunk\ndata: {\"text\":\"hi\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("chunk"));
        assert_eq!(events[0].data, "{\"text\":\"hi\"}");
    }

    #[test]
    fn parses_bare_data_events() {
        let mut parser = SseParser::new();
        let events = collect(&mut parser, "data: one\n\ndata: two\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "one");
        assert_eq!(events[1].data, "two");
        assert!(events[0].event.is_none());
    }

    #[test]
    fn tolerates_missing_trailing_blank_line() {
        let mut parser = SseParser::new();
        let events = collect(&mut parser, "data: last");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "last");
        assert_eq!(parser.state(), ParserState::Done);
    }

    #[test]
    fn multiline_data_joins_with_newline() {
        let mut parser = SseParser::new();
        let events = collect(&mut parser, "data: a\ndata: b\n\n");
        assert_eq!(events[0].data, "a\nb");
    }

    #[test]
    fn comments_and_stray_blank_lines_are_ignored() {
        let mut parser = SseParser::new();
        let events = collect(&mut parser, ": keep-alive\n\n\ndata: x\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn data_without_space_after_colon() {
        let mut parser = SseParser::new();
        let events = collect(&mut parser, "data:[DONE]\n\n");
        assert_eq!(events[0].data, "[DONE]");
    }

    #[test]
    fn line_buffer_handles_split_lines() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"data: par").is_empty());
        let lines = buffer.push(b"tial\ndata: next\n");
        assert_eq!(lines, vec!["data: partial", "data: next"]);
        assert!(buffer.flush().is_none());
    }

    #[test]
    fn line_buffer_strips_crlf() {
        let mut buffer = LineBuffer::default();
        let lines = buffer.push(b"event: chunk\r\n");
        assert_eq!(lines, vec!["event: chunk"]);
    }

    #[test]
    fn line_buffer_flushes_unterminated_tail() {
        let mut buffer = LineBuffer::default();
        buffer.push(b"data: tail");
        assert_eq!(buffer.flush().as_deref(), Some("data: tail"));
    }
}
