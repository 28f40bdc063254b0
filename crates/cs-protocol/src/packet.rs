//! Packet envelope and the closed set of packet bodies streamed by the chat server.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a packet belongs in the assistant's response.
///
/// `turn_index` is the logical step; `tab_index` separates parallel
/// branches inside one step and defaults to 0 when absent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Placement {
    pub turn_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_index: Option<u32>,
}

impl Placement {
    pub fn new(turn_index: u32, tab_index: u32) -> Self {
        Self {
            turn_index,
            tab_index: Some(tab_index),
        }
    }

    pub fn turn(turn_index: u32) -> Self {
        Self {
            turn_index,
            tab_index: None,
        }
    }

    pub fn key(&self) -> GroupKey {
        GroupKey {
            turn_index: self.turn_index,
            tab_index: self.tab_index.unwrap_or(0),
        }
    }
}

/// Identity of a packet group. Ordered by turn, then tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GroupKey {
    pub turn_index: u32,
    pub tab_index: u32,
}

impl GroupKey {
    pub fn new(turn_index: u32, tab_index: u32) -> Self {
        Self {
            turn_index,
            tab_index,
        }
    }
}

/// One typed event of the streaming protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Packet {
    pub placement: Placement,
    pub obj: PacketObj,
}

impl Packet {
    pub fn new(turn_index: u32, tab_index: u32, obj: PacketObj) -> Self {
        Self {
            placement: Placement::new(turn_index, tab_index),
            obj,
        }
    }

    pub fn key(&self) -> GroupKey {
        self.placement.key()
    }
}

/// Why the server stopped streaming.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[serde(alias = "natural", alias = "FINISHED")]
    Finished,
    #[serde(alias = "cancelled", alias = "CANCELLED")]
    UserCancelled,
    #[serde(alias = "CONTEXT_LENGTH")]
    ContextLength,
    #[serde(other)]
    Unknown,
}

impl StopReason {
    /// Whether the response ran to its natural end.
    pub fn is_natural(self) -> bool {
        matches!(self, StopReason::Finished)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StopInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

/// In-band failure of one section. Rendered, never raised.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PacketError {
    #[serde(default, alias = "exception", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_retryable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// A search result or fetched page the answer can cite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blurb: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub is_internet: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Document {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            semantic_identifier: None,
            link: None,
            blurb: None,
            source_type: None,
            score: None,
            updated_at: None,
            is_internet: false,
            hidden: false,
            metadata: None,
        }
    }

    /// Human-readable title, falling back to the link and then the id.
    pub fn title(&self) -> &str {
        self.semantic_identifier
            .as_deref()
            .or(self.link.as_deref())
            .unwrap_or(&self.document_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeneratedImage {
    pub file_id: String,
    pub url: String,
    #[serde(default)]
    pub revised_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<String>,
}

/// Body of a packet, discriminated by the `type` field on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PacketObj {
    // Control
    SectionEnd,
    Stop(StopInfo),
    OverallStop(StopInfo),
    TopLevelBranching {
        num_parallel_branches: u32,
    },
    Error(PacketError),

    // Final answer
    MessageStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        final_documents: Option<Vec<Document>>,
    },
    MessageDelta {
        content: String,
    },
    CitationInfo {
        citation_number: u32,
        document_id: String,
    },

    // Tools
    SearchToolStart {
        #[serde(default)]
        is_internet_search: bool,
    },
    SearchToolQueriesDelta {
        queries: Vec<String>,
    },
    SearchToolDocumentsDelta {
        documents: Vec<Document>,
    },
    OpenUrlStart,
    OpenUrlUrls {
        urls: Vec<String>,
    },
    OpenUrlDocuments {
        documents: Vec<Document>,
    },
    ImageGenerationStart,
    ImageGenerationHeartbeat,
    ImageGenerationFinal {
        images: Vec<GeneratedImage>,
    },
    PythonToolStart {
        #[serde(default)]
        code: String,
    },
    PythonToolDelta {
        #[serde(default)]
        stdout: String,
        #[serde(default)]
        stderr: String,
        #[serde(default)]
        file_ids: Vec<String>,
    },
    CustomToolStart {
        tool_name: String,
    },
    CustomToolDelta {
        tool_name: String,
        response_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_ids: Option<Vec<String>>,
    },

    // Reasoning
    ReasoningStart,
    ReasoningDelta {
        reasoning: String,
    },
    ReasoningDone,

    // Deep research
    DeepResearchPlanStart,
    DeepResearchPlanDelta {
        content: String,
    },
    ResearchAgentStart {
        research_task: String,
    },
    IntermediateReportStart,
    IntermediateReportDelta {
        content: String,
    },
    IntermediateReportCitedDocs {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cited_docs: Option<Vec<Document>>,
    },
}

/// Coarse family of a packet body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketCategory {
    Control,
    Branching,
    Citation,
    Message,
    ImageGeneration,
    Search,
    OpenUrl,
    Python,
    CustomTool,
    Reasoning,
    ResearchPlan,
    ResearchAgent,
}

impl PacketObj {
    /// Wire name of this packet's `type` field.
    pub fn type_name(&self) -> &'static str {
        match self {
            PacketObj::SectionEnd => "section_end",
            PacketObj::Stop(_) => "stop",
            PacketObj::OverallStop(_) => "overall_stop",
            PacketObj::TopLevelBranching { .. } => "top_level_branching",
            PacketObj::Error(_) => "error",
            PacketObj::MessageStart { .. } => "message_start",
            PacketObj::MessageDelta { .. } => "message_delta",
            PacketObj::CitationInfo { .. } => "citation_info",
            PacketObj::SearchToolStart { .. } => "search_tool_start",
            PacketObj::SearchToolQueriesDelta { .. } => "search_tool_queries_delta",
            PacketObj::SearchToolDocumentsDelta { .. } => "search_tool_documents_delta",
            PacketObj::OpenUrlStart => "open_url_start",
            PacketObj::OpenUrlUrls { .. } => "open_url_urls",
            PacketObj::OpenUrlDocuments { .. } => "open_url_documents",
            PacketObj::ImageGenerationStart => "image_generation_start",
            PacketObj::ImageGenerationHeartbeat => "image_generation_heartbeat",
            PacketObj::ImageGenerationFinal { .. } => "image_generation_final",
            PacketObj::PythonToolStart { .. } => "python_tool_start",
            PacketObj::PythonToolDelta { .. } => "python_tool_delta",
            PacketObj::CustomToolStart { .. } => "custom_tool_start",
            PacketObj::CustomToolDelta { .. } => "custom_tool_delta",
            PacketObj::ReasoningStart => "reasoning_start",
            PacketObj::ReasoningDelta { .. } => "reasoning_delta",
            PacketObj::ReasoningDone => "reasoning_done",
            PacketObj::DeepResearchPlanStart => "deep_research_plan_start",
            PacketObj::DeepResearchPlanDelta { .. } => "deep_research_plan_delta",
            PacketObj::ResearchAgentStart { .. } => "research_agent_start",
            PacketObj::IntermediateReportStart => "intermediate_report_start",
            PacketObj::IntermediateReportDelta { .. } => "intermediate_report_delta",
            PacketObj::IntermediateReportCitedDocs { .. } => "intermediate_report_cited_docs",
        }
    }

    pub fn category(&self) -> PacketCategory {
        match self {
            PacketObj::SectionEnd
            | PacketObj::Stop(_)
            | PacketObj::OverallStop(_)
            | PacketObj::Error(_) => PacketCategory::Control,
            PacketObj::TopLevelBranching { .. } => PacketCategory::Branching,
            PacketObj::CitationInfo { .. } => PacketCategory::Citation,
            PacketObj::MessageStart { .. } | PacketObj::MessageDelta { .. } => {
                PacketCategory::Message
            }
            PacketObj::ImageGenerationStart
            | PacketObj::ImageGenerationHeartbeat
            | PacketObj::ImageGenerationFinal { .. } => PacketCategory::ImageGeneration,
            PacketObj::SearchToolStart { .. }
            | PacketObj::SearchToolQueriesDelta { .. }
            | PacketObj::SearchToolDocumentsDelta { .. } => PacketCategory::Search,
            PacketObj::OpenUrlStart
            | PacketObj::OpenUrlUrls { .. }
            | PacketObj::OpenUrlDocuments { .. } => PacketCategory::OpenUrl,
            PacketObj::PythonToolStart { .. } | PacketObj::PythonToolDelta { .. } => {
                PacketCategory::Python
            }
            PacketObj::CustomToolStart { .. } | PacketObj::CustomToolDelta { .. } => {
                PacketCategory::CustomTool
            }
            PacketObj::ReasoningStart
            | PacketObj::ReasoningDelta { .. }
            | PacketObj::ReasoningDone => PacketCategory::Reasoning,
            PacketObj::DeepResearchPlanStart | PacketObj::DeepResearchPlanDelta { .. } => {
                PacketCategory::ResearchPlan
            }
            PacketObj::ResearchAgentStart { .. }
            | PacketObj::IntermediateReportStart
            | PacketObj::IntermediateReportDelta { .. }
            | PacketObj::IntermediateReportCitedDocs { .. } => PacketCategory::ResearchAgent,
        }
    }

    /// `section_end` or `error`: closes the group it lands in.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PacketObj::SectionEnd | PacketObj::Error(_))
    }

    /// `stop` or `overall_stop`: ends the whole stream.
    pub fn stop_info(&self) -> Option<&StopInfo> {
        match self {
            PacketObj::Stop(info) | PacketObj::OverallStop(info) => Some(info),
            _ => None,
        }
    }

    /// Packets that start or continue the user-facing answer.
    pub fn is_final_answer_content(&self) -> bool {
        matches!(
            self,
            PacketObj::MessageStart { .. }
                | PacketObj::MessageDelta { .. }
                | PacketObj::ImageGenerationStart
                | PacketObj::ImageGenerationFinal { .. }
                | PacketObj::PythonToolStart { .. }
                | PacketObj::PythonToolDelta { .. }
        )
    }

    /// Packets that show the model went back to calling tools.
    ///
    /// Reasoning is internal deliberation and does not count. Python and
    /// image generation produce answer content and do not count either.
    pub fn is_tool_invocation(&self) -> bool {
        matches!(
            self.category(),
            PacketCategory::Search
                | PacketCategory::OpenUrl
                | PacketCategory::CustomTool
                | PacketCategory::ResearchAgent
        )
    }

    /// Whether this packet alone is enough to make its group worth rendering.
    pub fn is_content_bearing(&self) -> bool {
        match self.category() {
            PacketCategory::Control => matches!(self, PacketObj::Error(_)),
            PacketCategory::Branching | PacketCategory::Citation => false,
            PacketCategory::Message
            | PacketCategory::ImageGeneration
            | PacketCategory::Search
            | PacketCategory::OpenUrl
            | PacketCategory::Python
            | PacketCategory::CustomTool
            | PacketCategory::Reasoning
            | PacketCategory::ResearchPlan
            | PacketCategory::ResearchAgent => true,
        }
    }

    /// Message and image packets render as answer content rather than tool steps.
    pub fn is_display(&self) -> bool {
        matches!(
            self.category(),
            PacketCategory::Message | PacketCategory::ImageGeneration
        )
    }

    /// Documents carried by this packet, if any.
    pub fn documents(&self) -> &[Document] {
        match self {
            PacketObj::SearchToolDocumentsDelta { documents }
            | PacketObj::OpenUrlDocuments { documents } => documents,
            PacketObj::MessageStart {
                final_documents: Some(documents),
            }
            | PacketObj::IntermediateReportCitedDocs {
                cited_docs: Some(documents),
            } => documents,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(json: &str) -> Packet {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn placement_tab_defaults_to_zero() {
        let packet = parse(r#"{"placement":{"turn_index":3},"obj":{"type":"section_end"}}"#);
        assert_eq!(packet.placement.tab_index, None);
        assert_eq!(packet.key(), GroupKey::new(3, 0));
    }

    #[test]
    fn group_keys_order_by_turn_then_tab() {
        let mut keys = vec![
            GroupKey::new(1, 0),
            GroupKey::new(0, 1),
            GroupKey::new(0, 0),
            GroupKey::new(1, 2),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                GroupKey::new(0, 0),
                GroupKey::new(0, 1),
                GroupKey::new(1, 0),
                GroupKey::new(1, 2),
            ]
        );
    }

    #[test]
    fn message_delta_parses() {
        let packet = parse(
            r#"{"placement":{"turn_index":0,"tab_index":0},"obj":{"type":"message_delta","content":"Hello"}}"#,
        );
        assert_eq!(
            packet.obj,
            PacketObj::MessageDelta {
                content: "Hello".to_string()
            }
        );
    }

    #[test]
    fn search_documents_parse_with_sparse_fields() {
        let packet = parse(
            r#"{"placement":{"turn_index":1},"obj":{"type":"search_tool_documents_delta","documents":[{"document_id":"d1","semantic_identifier":"Design doc","link":null,"score":0.5}]}}"#,
        );
        let docs = packet.obj.documents();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].document_id, "d1");
        assert_eq!(docs[0].title(), "Design doc");
        assert_eq!(docs[0].link, None);
        assert!(!docs[0].is_internet);
    }

    #[test]
    fn stop_reasons_accept_aliases() {
        let natural = parse(
            r#"{"placement":{"turn_index":0},"obj":{"type":"stop","stop_reason":"natural"}}"#,
        );
        assert_eq!(
            natural.obj.stop_info().unwrap().stop_reason,
            Some(StopReason::Finished)
        );

        let cancelled = parse(
            r#"{"placement":{"turn_index":0},"obj":{"type":"stop","stop_reason":"user_cancelled"}}"#,
        );
        assert_eq!(
            cancelled.obj.stop_info().unwrap().stop_reason,
            Some(StopReason::UserCancelled)
        );

        let odd = parse(
            r#"{"placement":{"turn_index":0},"obj":{"type":"overall_stop","stop_reason":"tokens_ran_out"}}"#,
        );
        assert_eq!(
            odd.obj.stop_info().unwrap().stop_reason,
            Some(StopReason::Unknown)
        );

        let bare = parse(r#"{"placement":{"turn_index":0},"obj":{"type":"stop"}}"#);
        assert_eq!(bare.obj.stop_info().unwrap().stop_reason, None);
    }

    #[test]
    fn error_packet_reads_exception_field() {
        let packet = parse(
            r#"{"placement":{"turn_index":2},"obj":{"type":"error","exception":"tool crashed"}}"#,
        );
        match packet.obj {
            PacketObj::Error(err) => assert_eq!(err.message.as_deref(), Some("tool crashed")),
            other => panic!("expected error packet, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let result: Result<Packet, _> = serde_json::from_str(
            r#"{"placement":{"turn_index":0},"obj":{"type":"teleport_start"}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn unit_packets_serialize_as_bare_type() {
        let json = serde_json::to_value(PacketObj::SectionEnd).unwrap();
        assert_eq!(json, serde_json::json!({"type": "section_end"}));
    }

    #[test]
    fn type_name_matches_wire_tag() {
        let samples = vec![
            PacketObj::OpenUrlStart,
            PacketObj::ReasoningDelta {
                reasoning: "hm".to_string(),
            },
            PacketObj::TopLevelBranching {
                num_parallel_branches: 2,
            },
            PacketObj::Stop(StopInfo::default()),
            PacketObj::IntermediateReportCitedDocs { cited_docs: None },
        ];
        for obj in samples {
            let json = serde_json::to_value(&obj).unwrap();
            assert_eq!(json["type"], obj.type_name());
        }
    }

    #[test]
    fn reasoning_is_not_a_tool_invocation() {
        assert!(!PacketObj::ReasoningStart.is_tool_invocation());
        assert!(PacketObj::ReasoningStart.is_content_bearing());
        assert!(PacketObj::SearchToolStart {
            is_internet_search: false
        }
        .is_tool_invocation());
        assert!(!PacketObj::PythonToolStart {
            code: String::new()
        }
        .is_tool_invocation());
    }

    #[test]
    fn control_packets_are_not_content_bearing_except_error() {
        assert!(!PacketObj::SectionEnd.is_content_bearing());
        assert!(!PacketObj::Stop(StopInfo::default()).is_content_bearing());
        assert!(!PacketObj::CitationInfo {
            citation_number: 1,
            document_id: "d".to_string()
        }
        .is_content_bearing());
        assert!(PacketObj::Error(PacketError::default()).is_content_bearing());
    }

    #[test]
    fn final_documents_are_exposed() {
        let obj = PacketObj::MessageStart {
            final_documents: Some(vec![Document::new("d9")]),
        };
        assert_eq!(obj.documents()[0].document_id, "d9");
        assert!(PacketObj::MessageStart {
            final_documents: None
        }
        .documents()
        .is_empty());
    }
}
