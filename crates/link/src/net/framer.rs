use super::protocol::count_token;

const MAX_BUFFERED: usize = 64 * 1024;

/// Pulls brace-delimited messages out of a fragmented byte stream.
///
/// A watched token is only counted in bytes that fall between messages,
/// so the same text inside a message body is left alone.
#[derive(Debug, Default)]
pub struct StreamFramer {
    buffer: Vec<u8>,
    watch: Option<&'static str>,
    tokens_seen: usize,
}

impl StreamFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watching(token: &'static str) -> Self {
        Self {
            watch: Some(token),
            ..Default::default()
        }
    }

    /// Watched tokens found since the previous call.
    pub fn take_tokens(&mut self) -> usize {
        std::mem::take(&mut self.tokens_seen)
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
        if self.buffer.len() > MAX_BUFFERED {
            log::warn!("framer buffer exceeded {} bytes, discarding", MAX_BUFFERED);
            self.buffer.clear();
        }
    }

    /// Returns at most one complete message per call.
    pub fn extract_next(&mut self) -> Option<String> {
        let Some(open) = find(&self.buffer, b'{', 0) else {
            let end = match find(&self.buffer, b'}', 0) {
                Some(close) => close + 1,
                None => self.buffer.len(),
            };
            self.discard(end);
            return None;
        };

        if open > 0 {
            self.discard(open);
        }

        let close = find(&self.buffer, b'}', 0)?;

        // A second `{` before the close means the first message was cut short.
        let start = self.buffer[..close]
            .iter()
            .rposition(|&b| b == b'{')
            .unwrap_or(0);
        if start > 0 {
            log::warn!(
                "dropping truncated fragment: {}",
                String::from_utf8_lossy(&self.buffer[..start])
            );
        }

        let message = String::from_utf8_lossy(&self.buffer[start..=close]).into_owned();
        self.buffer.drain(..=close);
        Some(message)
    }

    fn discard(&mut self, end: usize) {
        if let Some(token) = self.watch {
            self.tokens_seen += count_token(&self.buffer[..end], token);
        }
        self.buffer.drain(..end);
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.tokens_seen = 0;
    }
}

fn find(haystack: &[u8], needle: u8, from: usize) -> Option<usize> {
    haystack[from..].iter().position(|&b| b == needle).map(|i| i + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_back_to_back_messages_one_per_call() {
        let mut framer = StreamFramer::new();
        framer.feed(b"{a}{b}");
        assert_eq!(framer.extract_next().as_deref(), Some("{a}"));
        assert_eq!(framer.extract_next().as_deref(), Some("{b}"));
        assert_eq!(framer.extract_next(), None);
    }

    #[test]
    fn test_recovers_from_leading_garbage() {
        let mut framer = StreamFramer::new();
        framer.feed(b"garbage}{valid}");
        assert_eq!(framer.extract_next().as_deref(), Some("{valid}"));
        assert_eq!(framer.extract_next(), None);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_waits_for_closing_brace() {
        let mut framer = StreamFramer::new();
        framer.feed(br#"{"player":"p1","#);
        assert_eq!(framer.extract_next(), None);
        assert!(framer.pending() > 0);

        framer.feed(br#""value":1}"#);
        assert_eq!(framer.extract_next().as_deref(), Some(r#"{"player":"p1","value":1}"#));
    }

    #[test]
    fn test_orphaned_close_discarded() {
        let mut framer = StreamFramer::new();
        framer.feed(b"tail} more");
        assert_eq!(framer.extract_next(), None);
        assert_eq!(framer.pending(), 5);
        assert_eq!(framer.extract_next(), None);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_no_braces_dropped() {
        let mut framer = StreamFramer::new();
        framer.feed(b"just text");
        assert_eq!(framer.extract_next(), None);
        assert_eq!(framer.pending(), 0);
    }

    // Slicing starts at the last `{` before the close, not the first one,
    // so a cut-off message never swallows the complete one after it.
    #[test]
    fn test_truncated_message_skipped() {
        let mut framer = StreamFramer::new();
        framer.feed(b"{\"player\":\"p{\"type\":\"haptic\"}");
        assert_eq!(framer.extract_next().as_deref(), Some("{\"type\":\"haptic\"}"));
    }

    #[test]
    fn test_watched_token_between_messages() {
        let mut framer = StreamFramer::watching("ACKH");
        framer.feed(b"ACKH{\"player\":\"ACKHx\"}ACKH");
        assert_eq!(framer.extract_next().as_deref(), Some("{\"player\":\"ACKHx\"}"));
        assert_eq!(framer.extract_next(), None);
        assert_eq!(framer.take_tokens(), 2);
        assert_eq!(framer.take_tokens(), 0);
    }

    #[test]
    fn test_watched_token_alone() {
        let mut framer = StreamFramer::watching("ACKH");
        framer.feed(b"ACKH");
        assert_eq!(framer.extract_next(), None);
        assert_eq!(framer.take_tokens(), 1);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_token_inside_split_message_not_counted() {
        let mut framer = StreamFramer::watching("ACKH");
        framer.feed(b"{\"player\":\"AC");
        assert_eq!(framer.extract_next(), None);
        framer.feed(b"KH\"}");
        assert_eq!(framer.extract_next().as_deref(), Some("{\"player\":\"ACKH\"}"));
        assert_eq!(framer.take_tokens(), 0);
    }
}
