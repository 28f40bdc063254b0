//! One-line status for compact surfaces (widgets, progress lines).
//!
//! Reads the same snapshot as the full projection; only the newest visible
//! group and the phase matter here.

use cs_protocol::{PacketObj, StopReason};

use crate::reducer::{Phase, ReducerSnapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetStatus {
    pub label: String,
    /// More output is expected.
    pub busy: bool,
}

impl WidgetStatus {
    fn busy(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            busy: true,
        }
    }

    fn idle(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            busy: false,
        }
    }
}

pub fn widget_status(snapshot: &ReducerSnapshot) -> WidgetStatus {
    match &snapshot.phase {
        Phase::Empty => WidgetStatus::busy("Waiting..."),
        Phase::Streaming => streaming_status(snapshot),
        Phase::Complete => WidgetStatus::idle("Done"),
        Phase::Interrupted(StopReason::ContextLength) => {
            WidgetStatus::idle("Stopped: context limit reached")
        }
        Phase::Interrupted(_) => WidgetStatus::idle("Stopped"),
        Phase::Failed(_) => WidgetStatus::idle("Something went wrong"),
    }
}

fn streaming_status(snapshot: &ReducerSnapshot) -> WidgetStatus {
    let newest = snapshot
        .groups
        .last()
        .and_then(|group| group.packets().iter().rev().find(|obj| obj.is_content_bearing()));
    let Some(obj) = newest else {
        return WidgetStatus::busy("Thinking...");
    };

    let label = match obj {
        PacketObj::SearchToolStart { .. } | PacketObj::SearchToolQueriesDelta { .. } => {
            "Searching...".to_string()
        }
        PacketObj::SearchToolDocumentsDelta { .. }
        | PacketObj::OpenUrlStart
        | PacketObj::OpenUrlUrls { .. }
        | PacketObj::OpenUrlDocuments { .. } => "Reading documents...".to_string(),
        PacketObj::PythonToolStart { .. } | PacketObj::PythonToolDelta { .. } => {
            "Running code...".to_string()
        }
        PacketObj::CustomToolStart { tool_name } | PacketObj::CustomToolDelta { tool_name, .. } => {
            format!("Running {tool_name}...")
        }
        PacketObj::ReasoningStart | PacketObj::ReasoningDelta { .. } | PacketObj::ReasoningDone => {
            "Thinking...".to_string()
        }
        PacketObj::ImageGenerationStart
        | PacketObj::ImageGenerationHeartbeat
        | PacketObj::ImageGenerationFinal { .. } => "Generating image...".to_string(),
        PacketObj::MessageStart { .. } | PacketObj::MessageDelta { .. } => {
            "Answering...".to_string()
        }
        PacketObj::DeepResearchPlanStart | PacketObj::DeepResearchPlanDelta { .. } => {
            "Planning research...".to_string()
        }
        PacketObj::ResearchAgentStart { .. }
        | PacketObj::IntermediateReportStart
        | PacketObj::IntermediateReportDelta { .. }
        | PacketObj::IntermediateReportCitedDocs { .. } => "Researching...".to_string(),
        PacketObj::Error(_) => "A step failed".to_string(),
        PacketObj::SectionEnd
        | PacketObj::Stop(_)
        | PacketObj::OverallStop(_)
        | PacketObj::TopLevelBranching { .. }
        | PacketObj::CitationInfo { .. } => "Working...".to_string(),
    };
    WidgetStatus::busy(label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::StreamReducer;
    use cs_protocol::{Packet, StopInfo, StreamRecord, StreamingError};

    fn rec(turn: u32, obj: PacketObj) -> StreamRecord {
        Packet::new(turn, 0, obj).into()
    }

    fn status_of(log: &[StreamRecord]) -> WidgetStatus {
        let mut reducer = StreamReducer::new();
        reducer.ingest(log);
        widget_status(&reducer.snapshot())
    }

    #[test]
    fn empty_is_waiting() {
        assert_eq!(status_of(&[]), WidgetStatus::busy("Waiting..."));
    }

    #[test]
    fn follows_newest_group() {
        let mut log = vec![rec(
            0,
            PacketObj::SearchToolStart {
                is_internet_search: false,
            },
        )];
        assert_eq!(status_of(&log).label, "Searching...");

        log.push(rec(
            0,
            PacketObj::SearchToolDocumentsDelta {
                documents: Vec::new(),
            },
        ));
        assert_eq!(status_of(&log).label, "Reading documents...");

        log.push(rec(
            1,
            PacketObj::CustomToolStart {
                tool_name: "calendar".to_string(),
            },
        ));
        assert_eq!(status_of(&log).label, "Running calendar...");

        log.push(rec(
            2,
            PacketObj::MessageStart {
                final_documents: None,
            },
        ));
        let status = status_of(&log);
        assert_eq!(status.label, "Answering...");
        assert!(status.busy);
    }

    #[test]
    fn trailing_section_end_keeps_last_activity() {
        let status = status_of(&[
            rec(0, PacketObj::ReasoningStart),
            rec(0, PacketObj::SectionEnd),
        ]);
        assert_eq!(status.label, "Thinking...");
    }

    #[test]
    fn terminal_phases() {
        let stopped = status_of(&[
            rec(0, PacketObj::MessageDelta { content: "x".to_string() }),
            rec(
                0,
                PacketObj::Stop(StopInfo {
                    stop_reason: Some(StopReason::UserCancelled),
                }),
            ),
        ]);
        assert_eq!(stopped, WidgetStatus::idle("Stopped"));

        let done = status_of(&[rec(0, PacketObj::Stop(StopInfo::default()))]);
        assert_eq!(done, WidgetStatus::idle("Done"));

        let failed = status_of(&[StreamRecord::StreamError(StreamingError {
            error: "boom".to_string(),
            stack_trace: None,
            error_code: None,
            is_retryable: false,
            details: None,
        })]);
        assert!(!failed.busy);
        assert_eq!(failed.label, "Something went wrong");
    }
}
