// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Streaming events.
//!
//! Typed events delivered to the caller-supplied sink during a
//! `process_message` call. Events are sent in pipeline order; the sink may
//! apply back-pressure by blocking, which pauses the pipeline but never
//! reorders. Delivery is at-most-once; a failing sink is logged and the
//! pipeline continues.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use tracing::warn;

/// An event emitted during message processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamingEvent {
    Thinking {
        content: String,
    },
    ToolCall {
        tool_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        parameters: Option<serde_json::Value>,
    },
    ToolResult {
        tool_name: String,
        success: bool,
        content: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
    Text {
        content: String,
    },
    Error {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl StreamingEvent {
    /// Create a thinking event.
    pub fn thinking(content: impl Into<String>) -> Self {
        Self::Thinking {
            content: content.into(),
        }
    }

    /// Create a text event.
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    /// Create an error event.
    pub fn error(content: impl Into<String>, code: Option<&str>) -> Self {
        Self::Error {
            content: content.into(),
            code: code.map(|c| c.to_string()),
        }
    }

    /// Short name of the variant, for assertions and logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Text { .. } => "text",
            Self::Error { .. } => "error",
        }
    }
}

/// Destination for streaming events.
///
/// `send` is awaited by the pipeline before it proceeds, so a slow sink
/// provides natural back-pressure.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, event: StreamingEvent) -> crate::error::Result<()>;
}

/// Sink backed by a bounded tokio channel.
pub struct ChannelSink {
    sender: tokio::sync::mpsc::Sender<StreamingEvent>,
}

impl ChannelSink {
    /// Create a channel sink and its receiving end.
    pub fn new(capacity: usize) -> (Self, tokio::sync::mpsc::Receiver<StreamingEvent>) {
        let (sender, receiver) = tokio::sync::mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&self, event: StreamingEvent) -> crate::error::Result<()> {
        self.sender
            .send(event)
            .await
            .map_err(|_| anyhow::anyhow!("event receiver dropped"))
    }
}

/// Sink that buffers events in memory. Handy for tests and synchronous
/// callers.
#[derive(Default)]
pub struct CollectSink {
    events: Mutex<Vec<StreamingEvent>>,
}

impl CollectSink {
    /// Create an empty collecting sink.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Copy of the collected events, in delivery order.
    pub fn events(&self) -> Vec<StreamingEvent> {
        self.events.lock().expect("collect sink lock poisoned").clone()
    }

    /// Drain the collected events.
    pub fn take(&self) -> Vec<StreamingEvent> {
        std::mem::take(&mut *self.events.lock().expect("collect sink lock poisoned"))
    }
}

#[async_trait]
impl EventSink for CollectSink {
    async fn send(&self, event: StreamingEvent) -> crate::error::Result<()> {
        self.events
            .lock()
            .expect("collect sink lock poisoned")
            .push(event);
        Ok(())
    }
}

/// Wraps an optional sink; send failures are logged and swallowed so the
/// pipeline keeps going.
pub(crate) struct EventEmitter {
    sink: Option<Arc<dyn EventSink>>,
}

impl EventEmitter {
    pub fn new(sink: Option<Arc<dyn EventSink>>) -> Self {
        Self { sink }
    }

    pub async fn emit(&self, event: StreamingEvent) {
        if let Some(ref sink) = self.sink {
            if let Err(e) = sink.send(event).await {
                warn!("Event sink error: {e}");
            }
        }
    }

    pub async fn thinking(&self, content: impl Into<String>) {
        self.emit(StreamingEvent::thinking(content)).await;
    }

    pub async fn text(&self, content: impl Into<String>) {
        self.emit(StreamingEvent::text(content)).await;
    }

    pub async fn error(&self, content: impl Into<String>, code: Option<&str>) {
        self.emit(StreamingEvent::error(content, code)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_sink_preserves_order() {
        let sink = CollectSink::new();
        sink.send(StreamingEvent::thinking("a")).await.unwrap();
        sink.send(StreamingEvent::text("b")).await.unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), "thinking");
        assert_eq!(events[1].kind(), "text");
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut receiver) = ChannelSink::new(8);
        sink.send(StreamingEvent::error("boom", Some("TOOL_ERROR")))
            .await
            .unwrap();

        let event = receiver.recv().await.unwrap();
        match event {
            StreamingEvent::Error { content, code } => {
                assert_eq!(content, "boom");
                assert_eq!(code.as_deref(), Some("TOOL_ERROR"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_emitter_survives_sink_failure() {
        let (sink, receiver) = ChannelSink::new(1);
        drop(receiver);
        let emitter = EventEmitter::new(Some(Arc::new(sink)));
        // Receiver gone: emit logs and continues.
        emitter.text("lost").await;
    }

    #[test]
    fn test_serialization_tag() {
        let event = StreamingEvent::ToolCall {
            tool_name: "web-search".to_string(),
            parameters: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "tool_call");
        assert_eq!(json["tool_name"], "web-search");
    }
}
