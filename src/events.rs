use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Info,
    Error,
    Result,
}

/// A single progress notification emitted by the research engine.
#[derive(Serialize, Debug, Clone)]
pub struct SearchEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub data: Option<Value>,
}

impl SearchEvent {
    pub fn new(kind: EventKind, message: impl Into<String>) -> SearchEvent {
        SearchEvent {
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> SearchEvent {
        self.data = Some(data);
        self
    }
}

/// Consumer of engine progress events.
///
/// `handle_message` is called inline from the engine and must return quickly;
/// implementations that forward over a network should hand the event to a
/// queue instead of doing I/O here.
pub trait EventSink: Send + Sync {
    fn handle_message(&self, event: SearchEvent);
}

/// Prints events to stdout, errors and results marked with a prefix.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn handle_message(&self, event: SearchEvent) {
        match event.kind {
            EventKind::Error => println!("[error] {}", event.message),
            EventKind::Result => println!("[result] {}", event.message),
            EventKind::Info => println!("{}", event.message),
        }
    }
}

/// Forwards events into an unbounded channel. A dropped receiver is not an
/// error; the event is discarded.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SearchEvent>,
}

impl ChannelSink {
    pub fn new() -> (ChannelSink, mpsc::UnboundedReceiver<SearchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelSink { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn handle_message(&self, event: SearchEvent) {
        if self.tx.send(event).is_err() {
            log::debug!("event receiver dropped, discarding event");
        }
    }
}

/// Trims messages, drops empty ones and drops an event identical (same kind
/// and message) to the one forwarded just before it.
pub struct DedupSink<S> {
    inner: S,
    last: Mutex<Option<(EventKind, String)>>,
}

impl<S: EventSink> DedupSink<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            last: Mutex::new(None),
        }
    }
}

impl<S: EventSink> EventSink for DedupSink<S> {
    fn handle_message(&self, mut event: SearchEvent) {
        let trimmed = event.message.trim();
        if trimmed.is_empty() {
            return;
        }
        if trimmed.len() != event.message.len() {
            event.message = trimmed.to_string();
        }

        {
            let mut last = match self.last.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some((kind, message)) = last.as_ref() {
                if *kind == event.kind && *message == event.message {
                    return;
                }
            }
            *last = Some((event.kind, event.message.clone()));
        }

        self.inner.handle_message(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<SearchEvent>) -> Vec<SearchEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn test_channel_sink_forwards_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.handle_message(SearchEvent::new(EventKind::Info, "one"));
        sink.handle_message(SearchEvent::new(EventKind::Error, "two"));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "one");
        assert_eq!(events[1].kind, EventKind::Error);
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.handle_message(SearchEvent::new(EventKind::Info, "nobody listening"));
    }

    #[test]
    fn test_dedup_sink_drops_empty_and_repeats() {
        let (sink, mut rx) = ChannelSink::new();
        let sink = DedupSink::new(sink);

        sink.handle_message(SearchEvent::new(EventKind::Info, "   "));
        sink.handle_message(SearchEvent::new(EventKind::Info, " Searching... "));
        sink.handle_message(SearchEvent::new(EventKind::Info, "Searching..."));
        sink.handle_message(SearchEvent::new(EventKind::Error, "Searching..."));
        sink.handle_message(SearchEvent::new(EventKind::Info, "Searching..."));

        let events = drain(&mut rx);
        let messages: Vec<(EventKind, &str)> = events
            .iter()
            .map(|e| (e.kind, e.message.as_str()))
            .collect();
        assert_eq!(
            messages,
            vec![
                (EventKind::Info, "Searching..."),
                (EventKind::Error, "Searching..."),
                (EventKind::Info, "Searching..."),
            ]
        );
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = SearchEvent::new(EventKind::Result, "done")
            .with_data(serde_json::json!({"attempts": 1}));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "result");
        assert_eq!(json["message"], "done");
        assert_eq!(json["data"]["attempts"], 1);
    }
}
