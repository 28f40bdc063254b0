//! Render projection: which groups to show, and how.
//!
//! Pure functions over a reducer snapshot. Tool groups (search, code, custom
//! tools, reasoning, research) render as steps; display groups (answer text
//! and images) render as the final answer once the tool phase has handed off.

use std::collections::BTreeSet;
use std::sync::Arc;

use cs_protocol::{Document, GroupKey, PacketCategory, PacketObj};

use crate::reducer::{Flags, Group, ReducerSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    Tool,
    Display,
}

/// One group as the UI sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupView<'a> {
    pub key: GroupKey,
    pub kind: GroupKind,
    pub complete: bool,
    pub failed: bool,
    pub steps: u32,
    pub packets: &'a [PacketObj],
}

impl<'a> GroupView<'a> {
    /// `None` for groups without content-bearing packets.
    pub fn of(group: &'a Group) -> Option<Self> {
        let first = group.first_content()?;
        let kind = if first.is_display() {
            GroupKind::Display
        } else {
            GroupKind::Tool
        };
        Some(Self {
            key: group.key,
            kind,
            complete: group.is_closed(),
            failed: group.has_error(),
            steps: steps(first, group.packets()),
            packets: group.packets(),
        })
    }

    /// Category of the packet that decided this group's kind.
    pub fn category(&self) -> Option<PacketCategory> {
        self.packets
            .iter()
            .find(|obj| obj.is_content_bearing())
            .map(PacketObj::category)
    }

    /// Concatenated answer text.
    pub fn text(&self) -> String {
        self.packets
            .iter()
            .filter_map(|obj| match obj {
                PacketObj::MessageDelta { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    /// One-line description of a tool group.
    pub fn summary(&self) -> String {
        let mut queries: Vec<&str> = Vec::new();
        let mut documents = 0usize;
        let mut urls = 0usize;
        let mut tool_name = None;
        let mut task = None;
        for obj in self.packets {
            match obj {
                PacketObj::SearchToolQueriesDelta { queries: q } => {
                    queries.extend(q.iter().map(String::as_str));
                }
                PacketObj::SearchToolDocumentsDelta { documents: d }
                | PacketObj::OpenUrlDocuments { documents: d } => documents += d.len(),
                PacketObj::OpenUrlUrls { urls: u } => urls += u.len(),
                PacketObj::CustomToolStart { tool_name: name } => tool_name = Some(name.as_str()),
                PacketObj::ResearchAgentStart { research_task } => {
                    task = Some(research_task.as_str())
                }
                _ => {}
            }
        }

        let mut line = match self.category() {
            Some(PacketCategory::Search) if queries.is_empty() => "Searching".to_string(),
            Some(PacketCategory::Search) => format!("Searched {}", queries.join(", ")),
            Some(PacketCategory::OpenUrl) => format!("Opened {urls} URL(s)"),
            Some(PacketCategory::Python) => "Ran code".to_string(),
            Some(PacketCategory::CustomTool) => {
                format!("Called {}", tool_name.unwrap_or("tool"))
            }
            Some(PacketCategory::Reasoning) => "Thought".to_string(),
            Some(PacketCategory::ResearchPlan) => "Planned research".to_string(),
            Some(PacketCategory::ResearchAgent) => match task {
                Some(task) => format!("Researched {task}"),
                None => "Researched".to_string(),
            },
            Some(PacketCategory::ImageGeneration) => "Generated image".to_string(),
            Some(PacketCategory::Message) => "Answered".to_string(),
            Some(PacketCategory::Control) => "Failed".to_string(),
            Some(PacketCategory::Branching | PacketCategory::Citation) | None => {
                "Working".to_string()
            }
        };
        if documents > 0 {
            line.push_str(&format!(" ({documents} documents)"));
        }
        if self.failed {
            if let Some(message) = self.error_message() {
                line.push_str(&format!(": {message}"));
            }
        }
        line
    }

    pub fn error_message(&self) -> Option<&str> {
        self.packets.iter().find_map(|obj| match obj {
            PacketObj::Error(error) => error.message.as_deref(),
            _ => None,
        })
    }
}

/// A search group that both issued queries and read documents counts twice.
fn steps(first: &PacketObj, packets: &[PacketObj]) -> u32 {
    if first.category() != PacketCategory::Search {
        return 1;
    }
    let queried = packets
        .iter()
        .any(|obj| matches!(obj, PacketObj::SearchToolQueriesDelta { .. }));
    let read = packets
        .iter()
        .any(|obj| matches!(obj, PacketObj::SearchToolDocumentsDelta { .. }));
    if queried && read {
        2
    } else {
        1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection<'a> {
    pub tool_groups: Vec<GroupView<'a>>,
    /// Empty until the tool phase has handed off to the answer.
    pub display_groups: Vec<GroupView<'a>>,
    /// Every tool group has its terminal marker.
    pub is_each_group_complete: bool,
}

impl<'a> Projection<'a> {
    /// Tool groups of one turn, in tab order.
    pub fn tabs_for_turn(&self, turn_index: u32) -> Vec<&GroupView<'a>> {
        self.tool_groups
            .iter()
            .filter(|view| view.key.turn_index == turn_index)
            .collect()
    }

    /// Declared branches of `turn_index` that have not produced a group yet.
    pub fn awaiting_branches(&self, turn_index: u32, expected: u32) -> u32 {
        let present = self.tabs_for_turn(turn_index).len() as u32;
        expected.saturating_sub(present)
    }

    pub fn total_steps(&self) -> u32 {
        self.tool_groups.iter().map(|view| view.steps).sum()
    }
}

/// Split groups into tool and display views.
pub fn project<'a>(groups: &'a [Arc<Group>], flags: &Flags) -> Projection<'a> {
    let (tool_groups, display_groups): (Vec<_>, Vec<_>) = groups
        .iter()
        .filter_map(|group| GroupView::of(group))
        .partition(|view| view.kind == GroupKind::Tool);

    let is_each_group_complete = tool_groups.iter().all(|view| view.complete);
    let display_groups = if flags.final_answer_coming || tool_groups.is_empty() {
        display_groups
    } else {
        Vec::new()
    };

    Projection {
        tool_groups,
        display_groups,
        is_each_group_complete,
    }
}

/// Answer text of every display group, in order, regardless of hand-off.
pub fn answer_text(snapshot: &ReducerSnapshot) -> String {
    snapshot
        .groups
        .iter()
        .filter_map(|group| GroupView::of(group))
        .filter(|view| view.kind == GroupKind::Display)
        .map(|view| view.text())
        .collect()
}

/// Cited documents in citation order. Citations whose document never
/// arrived are skipped.
pub fn sources(snapshot: &ReducerSnapshot) -> Vec<(u32, &Document)> {
    snapshot
        .citations
        .iter()
        .filter_map(|citation| {
            snapshot
                .document_map
                .get(&citation.document_id)
                .map(|doc| (citation.citation_number, doc))
        })
        .collect()
}

/// Fires its callback once, when every tool group is complete and the
/// consumer has reported each of them displayed.
pub struct ToolDisplayLatch<F: FnMut()> {
    on_all_displayed: F,
    displayed: BTreeSet<GroupKey>,
    fired: bool,
}

impl<F: FnMut()> ToolDisplayLatch<F> {
    pub fn new(on_all_displayed: F) -> Self {
        Self {
            on_all_displayed,
            displayed: BTreeSet::new(),
            fired: false,
        }
    }

    /// Record that the UI finished showing a group.
    pub fn mark_displayed(&mut self, key: GroupKey) {
        self.displayed.insert(key);
    }

    /// Fire if the projection is fully shown. Returns whether it fired now.
    pub fn check(&mut self, projection: &Projection<'_>) -> bool {
        if self.fired || projection.tool_groups.is_empty() || !projection.is_each_group_complete
        {
            return false;
        }
        let all_displayed = projection
            .tool_groups
            .iter()
            .all(|view| self.displayed.contains(&view.key));
        if !all_displayed {
            return false;
        }
        self.fired = true;
        (self.on_all_displayed)();
        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// Re-arm for the next message.
    pub fn reset(&mut self) {
        self.displayed.clear();
        self.fired = false;
    }
}
