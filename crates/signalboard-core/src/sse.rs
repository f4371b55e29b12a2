//! Incremental `text/event-stream` decoding.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Defaults to `message` when the server omits `event:`.
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
    last_event_id: Option<String>,
    retry: Option<Duration>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retry(&self) -> Option<Duration> {
        self.retry
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" if !value.contains('\0') => self.id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry = Some(Duration::from_millis(ms));
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let id = self.id.take();
        if id.is_some() {
            self.last_event_id = id.clone();
        }
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| "message".to_string()),
            data,
            id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_named_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();

        let first = decoder.push(b"event: traffic-state\ndata: {\"timest");
        let second = decoder.push(b"amp\":1}\n\n");

        assert!(first.is_empty());
        assert_eq!(
            second,
            vec![SseEvent {
                event: "traffic-state".into(),
                data: "{\"timestamp\":1}".into(),
                id: None,
            }]
        );
    }

    #[test]
    fn joins_multiline_data_and_handles_crlf() {
        let mut decoder = SseDecoder::new();

        let events = decoder.push(b": keep-alive\r\nid: 7\r\ndata: a\r\ndata: b\r\n\r\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "a\nb");
        assert_eq!(decoder.last_event_id(), Some("7"));
    }

    #[test]
    fn records_retry_and_skips_empty_events() {
        let mut decoder = SseDecoder::new();

        let events = decoder.push(b"retry: 1500\n\nevent: ping\n\n");

        assert!(events.is_empty());
        assert_eq!(decoder.retry(), Some(Duration::from_millis(1500)));
    }
}
