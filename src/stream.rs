// src/stream.rs
//! Answer stream events and the sink that keeps their order legal.
//!
//! Order per request: at most one `Results`, any number of `Text`, then
//! exactly one terminal event (`Done` or `Error`). The sink rejects anything
//! else, and a closed channel (client gone) surfaces as [`SinkClosed`] so the
//! producing task can stop.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::assemble::ResultItem;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Results { results: Vec<ResultItem> },
    Text { content: String },
    Done,
    Error { content: String },
}

impl StreamEvent {
    pub fn text(s: impl Into<String>) -> Self {
        StreamEvent::Text { content: s.into() }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }
}

/// Lifecycle of one answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Routing,
    Retrieving,
    Assembling,
    Generating,
    Completed,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Routing => "routing",
            Phase::Retrieving => "retrieving",
            Phase::Assembling => "assembling",
            Phase::Generating => "generating",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        }
    }
}

/// The receiving side went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("event stream closed by receiver")]
pub struct SinkClosed;

pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
    phase: Phase,
    results_sent: bool,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self {
            tx,
            phase: Phase::Idle,
            results_sent: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Completed | Phase::Failed)
    }

    /// Advance to a non-terminal phase. Ignored once finished.
    pub fn enter(&mut self, phase: Phase) {
        if !self.is_finished() && !matches!(phase, Phase::Completed | Phase::Failed) {
            tracing::trace!(target: "pipeline", from = self.phase.as_str(), to = phase.as_str(), "phase");
            self.phase = phase;
        }
    }

    pub async fn results(&mut self, results: Vec<ResultItem>) -> Result<(), SinkClosed> {
        if self.results_sent || self.is_finished() {
            return Ok(());
        }
        self.results_sent = true;
        self.enter(Phase::Assembling);
        self.send(StreamEvent::Results { results }).await
    }

    pub async fn text(&mut self, content: impl Into<String>) -> Result<(), SinkClosed> {
        let content = content.into();
        if content.is_empty() || self.is_finished() {
            return Ok(());
        }
        self.send(StreamEvent::Text { content }).await
    }

    pub async fn done(&mut self) -> Result<(), SinkClosed> {
        if self.is_finished() {
            return Ok(());
        }
        self.phase = Phase::Completed;
        self.send(StreamEvent::Done).await
    }

    pub async fn error(&mut self, message: impl Into<String>) -> Result<(), SinkClosed> {
        if self.is_finished() {
            return Ok(());
        }
        self.phase = Phase::Failed;
        self.send(StreamEvent::Error {
            content: message.into(),
        })
        .await
    }

    /// Resolves once the receiver is dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    async fn send(&self, ev: StreamEvent) -> Result<(), SinkClosed> {
        self.tx.send(ev).await.map_err(|_| SinkClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format() {
        let t = serde_json::to_string(&StreamEvent::text("Hi")).unwrap();
        assert_eq!(t, r#"{"type":"text","content":"Hi"}"#);
        assert_eq!(
            serde_json::to_string(&StreamEvent::Done).unwrap(),
            r#"{"type":"done"}"#
        );
        let r = serde_json::to_string(&StreamEvent::Results { results: vec![] }).unwrap();
        assert_eq!(r, r#"{"type":"results","results":[]}"#);
    }

    #[tokio::test]
    async fn sink_enforces_single_results_and_single_terminal() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut sink = EventSink::new(tx);
        sink.results(vec![]).await.unwrap();
        sink.results(vec![]).await.unwrap();
        sink.text("a").await.unwrap();
        sink.text("").await.unwrap();
        sink.done().await.unwrap();
        sink.error("late").await.unwrap();
        sink.text("late").await.unwrap();
        drop(sink);

        let mut got = Vec::new();
        while let Some(ev) = rx.recv().await {
            got.push(ev);
        }
        assert_eq!(
            got,
            vec![
                StreamEvent::Results { results: vec![] },
                StreamEvent::text("a"),
                StreamEvent::Done
            ]
        );
    }

    #[tokio::test]
    async fn closed_receiver_is_reported() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut sink = EventSink::new(tx);
        assert_eq!(sink.text("x").await, Err(SinkClosed));
    }
}
