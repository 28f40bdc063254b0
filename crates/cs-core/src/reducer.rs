//! Incremental fold of a record log into render state.
//!
//! The caller hands [`StreamReducer::ingest`] the whole log it has received so
//! far. Only records past the reducer's cursor are applied, so calling it
//! again with the same log is a no-op and the batch boundaries chosen by the
//! caller never change the result. A log shorter than the cursor means the
//! caller replaced it, and all derived state is rebuilt from scratch.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use cs_protocol::{
    Document, GroupKey, MessageIds, Packet, PacketObj, StopReason, StreamRecord, StreamingError,
};

/// Packets sharing one `(turn_index, tab_index)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub key: GroupKey,
    packets: Vec<PacketObj>,
    closed: bool,
    synthetic_end: bool,
    content: bool,
    failed: bool,
}

impl Group {
    /// Build a group from already-received packets.
    pub fn new(key: GroupKey, packets: Vec<PacketObj>) -> Self {
        let mut group = Self {
            key,
            packets: Vec::with_capacity(packets.len()),
            closed: false,
            synthetic_end: false,
            content: false,
            failed: false,
        };
        for obj in packets {
            group.push(obj);
        }
        group
    }

    pub fn packets(&self) -> &[PacketObj] {
        &self.packets
    }

    /// Has a `section_end` or `error`, received or synthesized.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Closed by the reducer rather than by the server.
    pub fn closed_synthetically(&self) -> bool {
        self.synthetic_end
    }

    pub fn has_content(&self) -> bool {
        self.content
    }

    pub fn first_content(&self) -> Option<&PacketObj> {
        self.packets.iter().find(|obj| obj.is_content_bearing())
    }

    pub fn has_error(&self) -> bool {
        self.failed
    }

    fn push(&mut self, obj: PacketObj) {
        self.closed |= obj.is_terminal();
        self.content |= obj.is_content_bearing();
        self.failed |= matches!(obj, PacketObj::Error(_));
        self.packets.push(obj);
    }

    fn close_synthetically(&mut self) {
        if !self.closed {
            self.packets.push(PacketObj::SectionEnd);
            self.closed = true;
            self.synthetic_end = true;
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    /// Answer content has started and no tool call has superseded it.
    pub final_answer_coming: bool,
    /// The answer has been fully shown, by a stop or by the UI.
    pub display_complete: bool,
    pub stop_packet_seen: bool,
    pub stop_reason: Option<StopReason>,
}

/// First citation of a document, in the order citations arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub citation_number: u32,
    pub document_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Empty,
    Streaming,
    Complete,
    Interrupted(StopReason),
    Failed(String),
}

impl Phase {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            Phase::Complete | Phase::Interrupted(_) | Phase::Failed(_)
        )
    }
}

/// Immutable view of the reducer's derived state.
///
/// Taking one is cheap: groups and maps are shared with the reducer and only
/// copied if the reducer changes them while the snapshot is still alive.
#[derive(Debug, Clone, PartialEq)]
pub struct ReducerSnapshot {
    pub groups: Arc<[Arc<Group>]>,
    pub citation_map: Arc<BTreeMap<u32, String>>,
    pub citations: Arc<Vec<Citation>>,
    pub document_map: Arc<BTreeMap<String, Document>>,
    pub flags: Flags,
    pub expected_branches: BTreeMap<u32, u32>,
    pub phase: Phase,
    pub message_ids: Option<MessageIds>,
    pub chat_session_id: Option<String>,
}

#[derive(Debug)]
pub struct StreamReducer {
    message_id: Option<i64>,
    cursor: usize,
    tracked: BTreeMap<GroupKey, Arc<Group>>,
    seen_turns: BTreeSet<u32>,
    citation_map: Arc<BTreeMap<u32, String>>,
    citations: Arc<Vec<Citation>>,
    cited_documents: BTreeSet<String>,
    document_map: Arc<BTreeMap<String, Document>>,
    flags: Flags,
    expected_branches: BTreeMap<u32, u32>,
    message_ids: Option<MessageIds>,
    chat_session_id: Option<String>,
    stream_error: Option<StreamingError>,
    phase: Phase,
    groups: Arc<[Arc<Group>]>,
}

impl Default for StreamReducer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamReducer {
    pub fn new() -> Self {
        Self {
            message_id: None,
            cursor: 0,
            tracked: BTreeMap::new(),
            seen_turns: BTreeSet::new(),
            citation_map: Arc::default(),
            citations: Arc::default(),
            cited_documents: BTreeSet::new(),
            document_map: Arc::default(),
            flags: Flags::default(),
            expected_branches: BTreeMap::new(),
            message_ids: None,
            chat_session_id: None,
            stream_error: None,
            phase: Phase::Empty,
            groups: Arc::from(Vec::new()),
        }
    }

    /// Drop all derived state. The current message id is kept.
    pub fn reset(&mut self) {
        let message_id = self.message_id;
        *self = Self::new();
        self.message_id = message_id;
    }

    /// Start rendering a different message. Returns whether state was reset.
    pub fn switch_message(&mut self, message_id: Option<i64>) -> bool {
        if self.message_id == message_id {
            return false;
        }
        log::debug!(
            "switching reducer from message {:?} to {:?}",
            self.message_id,
            message_id
        );
        self.reset();
        self.message_id = message_id;
        true
    }

    /// Apply every record of `log` past the cursor. Returns whether any
    /// derived state changed.
    pub fn ingest(&mut self, log: &[StreamRecord]) -> bool {
        let mut changed = false;
        if log.len() < self.cursor {
            log::debug!(
                "record log shrank from {} to {}; rebuilding",
                self.cursor,
                log.len()
            );
            self.reset();
            changed = true;
        }
        if log.len() == self.cursor {
            return changed;
        }

        // Release our handles on the previous list so unshared groups are
        // mutated in place.
        self.groups = Arc::from(Vec::new());
        for record in &log[self.cursor..] {
            self.apply(record);
        }
        self.cursor = log.len();
        self.rebuild_groups();
        true
    }

    /// The UI finished showing the final answer.
    pub fn mark_display_complete(&mut self) {
        self.flags.display_complete = true;
    }

    fn apply(&mut self, record: &StreamRecord) {
        if self.phase == Phase::Empty {
            self.phase = Phase::Streaming;
        }

        match record {
            StreamRecord::Packet(packet) => self.apply_packet(packet),
            StreamRecord::MessageIds(ids) => self.message_ids = Some(*ids),
            StreamRecord::SessionCreated(created) => {
                self.chat_session_id = Some(created.chat_session_id.clone());
            }
            StreamRecord::StreamError(error) => {
                self.close_open_groups();
                self.phase = Phase::Failed(error.error.clone());
                self.stream_error = Some(error.clone());
            }
        }
    }

    fn apply_packet(&mut self, packet: &Packet) {
        let obj = &packet.obj;
        let turn = packet.placement.turn_index;

        if let PacketObj::TopLevelBranching {
            num_parallel_branches,
        } = obj
        {
            self.expected_branches.insert(turn, *num_parallel_branches);
            return;
        }

        // Only a new turn closes earlier groups; sibling tabs stay open.
        if self.seen_turns.insert(turn) && self.seen_turns.len() > 1 {
            self.close_open_groups();
        }

        let key = packet.key();
        let group = self
            .tracked
            .entry(key)
            .or_insert_with(|| Arc::new(Group::new(key, Vec::new())));
        Arc::make_mut(group).push(obj.clone());

        if let PacketObj::CitationInfo {
            citation_number,
            document_id,
        } = obj
        {
            self.record_citation(*citation_number, document_id);
        }

        let documents = obj.documents();
        if !documents.is_empty() {
            let document_map = Arc::make_mut(&mut self.document_map);
            for document in documents {
                document_map.insert(document.document_id.clone(), document.clone());
            }
        }

        if obj.is_final_answer_content() {
            self.flags.final_answer_coming = true;
        }

        if let Some(info) = obj.stop_info() {
            self.flags.stop_packet_seen = true;
            self.flags.stop_reason = info.stop_reason;
            self.flags.display_complete = true;
            self.close_open_groups();
            if !matches!(self.phase, Phase::Failed(_)) {
                self.phase = match info.stop_reason {
                    None | Some(StopReason::Finished) => Phase::Complete,
                    Some(reason) => Phase::Interrupted(reason),
                };
            }
        }

        if self.flags.final_answer_coming
            && !self.flags.stop_packet_seen
            && obj.is_tool_invocation()
        {
            log::debug!(
                "{} at turn {turn} after answer content; answer is not final yet",
                obj.type_name()
            );
            self.flags.final_answer_coming = false;
            self.flags.display_complete = false;
        }
    }

    fn record_citation(&mut self, citation_number: u32, document_id: &str) {
        match self.citation_map.get(&citation_number) {
            Some(existing) if existing != document_id => {
                log::debug!(
                    "citation [{citation_number}] already maps to {existing}; ignoring {document_id}"
                );
            }
            Some(_) => {}
            None => {
                Arc::make_mut(&mut self.citation_map)
                    .insert(citation_number, document_id.to_string());
            }
        }

        if self.cited_documents.insert(document_id.to_string()) {
            Arc::make_mut(&mut self.citations).push(Citation {
                citation_number,
                document_id: document_id.to_string(),
            });
        }
    }

    fn close_open_groups(&mut self) {
        for group in self.tracked.values_mut() {
            if !group.is_closed() {
                log::debug!(
                    "closing group ({}, {}) without a section_end",
                    group.key.turn_index,
                    group.key.tab_index
                );
                Arc::make_mut(group).close_synthetically();
            }
        }
    }

    fn rebuild_groups(&mut self) {
        // BTreeMap iteration is already in (turn, tab) order.
        self.groups = self
            .tracked
            .values()
            .filter(|group| group.has_content())
            .cloned()
            .collect();
    }

    /// Visible groups in `(turn, tab)` order. A new allocation after every
    /// ingest that changed anything; groups that did not change keep their
    /// `Arc`.
    pub fn groups(&self) -> Arc<[Arc<Group>]> {
        Arc::clone(&self.groups)
    }

    pub fn citation_map(&self) -> &BTreeMap<u32, String> {
        &self.citation_map
    }

    pub fn citations(&self) -> &[Citation] {
        &self.citations
    }

    pub fn document_map(&self) -> &BTreeMap<String, Document> {
        &self.document_map
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn expected_branches(&self) -> &BTreeMap<u32, u32> {
        &self.expected_branches
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn message_ids(&self) -> Option<MessageIds> {
        self.message_ids
    }

    pub fn chat_session_id(&self) -> Option<&str> {
        self.chat_session_id.as_deref()
    }

    pub fn stream_error(&self) -> Option<&StreamingError> {
        self.stream_error.as_ref()
    }

    pub fn message_id(&self) -> Option<i64> {
        self.message_id
    }

    /// Number of records consumed so far.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn snapshot(&self) -> ReducerSnapshot {
        ReducerSnapshot {
            groups: self.groups(),
            citation_map: Arc::clone(&self.citation_map),
            citations: Arc::clone(&self.citations),
            document_map: Arc::clone(&self.document_map),
            flags: self.flags,
            expected_branches: self.expected_branches.clone(),
            phase: self.phase.clone(),
            message_ids: self.message_ids,
            chat_session_id: self.chat_session_id.clone(),
        }
    }
}
