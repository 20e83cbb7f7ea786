//! Session events and their SSE framing

use axum::response::sse::Event;
use memctx_common::errors::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payload of the terminal `done` event
pub const DONE_PAYLOAD: &str = "[DONE]";

/// Event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Status,
    Analysis,
    Metadata,
    Error,
    Done,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Status => "status",
            EventKind::Analysis => "analysis",
            EventKind::Metadata => "metadata",
            EventKind::Error => "error",
            EventKind::Done => "done",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary sent with the `metadata` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub documents_analyzed: usize,
    pub relationships_found: usize,
    pub processing_time_ms: u64,
    pub total_analysis_chunks: usize,
}

/// One typed event of an analysis session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub kind: EventKind,
    pub data: String,
}

impl SessionEvent {
    fn new(kind: EventKind, data: impl Into<String>) -> Self {
        Self { kind, data: data.into() }
    }

    pub fn status(message: impl Into<String>) -> Self {
        Self::new(EventKind::Status, message)
    }

    pub fn analysis(text: impl Into<String>) -> Self {
        Self::new(EventKind::Analysis, text)
    }

    pub fn metadata(metadata: &AnalysisMetadata) -> Result<Self> {
        Ok(Self::new(EventKind::Metadata, serde_json::to_string(metadata)?))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventKind::Error, message)
    }

    pub fn done() -> Self {
        Self::new(EventKind::Done, DONE_PAYLOAD)
    }

    /// `done` and `error` end a session
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::Done | EventKind::Error)
    }

    /// Payload lines with carriage returns folded into line breaks
    fn data_lines(&self) -> impl Iterator<Item = &str> {
        self.data.split("\r\n").flat_map(|l| l.split(['\r', '\n']))
    }

    /// `event: <type>` followed by one `data:` line per payload line
    pub fn to_sse_frame(&self) -> String {
        let mut frame = format!("event: {}\n", self.kind);
        for line in self.data_lines() {
            frame.push_str("data: ");
            frame.push_str(line);
            frame.push('\n');
        }
        frame.push('\n');
        frame
    }

    /// Convert into an axum SSE event
    pub fn to_axum_event(&self) -> Event {
        let data = self.data_lines().collect::<Vec<_>>().join("\n");
        Event::default().event(self.kind.as_str()).data(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line_frame() {
        let frame = SessionEvent::status("Generating analysis...").to_sse_frame();
        assert_eq!(frame, "event: status\ndata: Generating analysis...\n\n");
    }

    #[test]
    fn test_multi_line_payload_has_no_bare_blank_line() {
        let frame = SessionEvent::analysis("first\n\nthird\r\nfourth").to_sse_frame();
        assert_eq!(
            frame,
            "event: analysis\ndata: first\ndata: \ndata: third\ndata: fourth\n\n"
        );
        assert_eq!(frame.matches("\n\n").count(), 1);
        assert!(frame.ends_with("\n\n"));
    }

    #[test]
    fn test_done_and_metadata() {
        let done = SessionEvent::done();
        assert!(done.is_terminal());
        assert_eq!(done.to_sse_frame(), "event: done\ndata: [DONE]\n\n");

        let metadata = SessionEvent::metadata(&AnalysisMetadata {
            documents_analyzed: 2,
            relationships_found: 1,
            processing_time_ms: 12,
            total_analysis_chunks: 5,
        })
        .unwrap();
        let json: serde_json::Value = serde_json::from_str(&metadata.data).unwrap();
        assert_eq!(json["total_analysis_chunks"], 5);
        assert!(!metadata.is_terminal());
    }
}
