//! Terminal output: progress on stderr, answer on stdout.

use std::collections::BTreeSet;
use std::io::{self, Write};
use std::time::Instant;

use cs_protocol::{GroupKey, StopReason};

use crate::projection::{sources, Projection};
use crate::reducer::ReducerSnapshot;
use crate::status::WidgetStatus;

/// Encapsulates all stderr formatting for a streamed answer.
///
/// TTY output overwrites a single status line between persistent step lines.
/// Non-TTY output uses plain text with one line per change and no ANSI codes.
pub struct StreamOutput<W: Write> {
    writer: W,
    is_tty: bool,
    start_time: Instant,
    summary: String,
    term_width: u16,
    last_status: Option<String>,
    reported: BTreeSet<GroupKey>,
}

impl<W: Write> StreamOutput<W> {
    pub fn new(writer: W, is_tty: bool, message: &str) -> Self {
        let term_width = if is_tty {
            crossterm::terminal::size().map(|(w, _)| w).unwrap_or(80)
        } else {
            80
        };

        let head: String = message.chars().take(60).collect();
        let summary = if message.chars().count() > 60 {
            format!("{head}...")
        } else {
            head
        };

        Self {
            writer,
            is_tty,
            start_time: Instant::now(),
            summary,
            term_width,
            last_status: None,
            reported: BTreeSet::new(),
        }
    }

    fn prefix(&self) -> &'static str {
        "[cs]"
    }

    fn colored_prefix(&self) -> String {
        if self.is_tty {
            format!("\x1b[2m\x1b[36m{}\x1b[0m", self.prefix())
        } else {
            self.prefix().to_string()
        }
    }

    /// Truncate to fit the terminal width after the prefix.
    fn truncate_to_width(&self, s: &str) -> String {
        let prefix_len = self.prefix().len() + 1;
        let max_content = (self.term_width as usize).saturating_sub(prefix_len);
        if s.chars().count() > max_content && max_content > 3 {
            let mut truncated: String = s.chars().take(max_content - 3).collect();
            truncated.push_str("...");
            truncated
        } else {
            s.to_string()
        }
    }

    pub fn emit_start(&mut self) {
        if self.is_tty {
            let _ = writeln!(
                self.writer,
                "{} \x1b[36m---\x1b[0m \"{}\"",
                self.colored_prefix(),
                self.summary
            );
        } else {
            let _ = writeln!(self.writer, "{} --- \"{}\"", self.prefix(), self.summary);
        }
    }

    /// Show the current activity (overwritten in TTY mode, printed on change otherwise).
    pub fn emit_status(&mut self, status: &WidgetStatus) {
        if self.last_status.as_deref() == Some(status.label.as_str()) {
            return;
        }
        self.last_status = Some(status.label.clone());
        let label = self.truncate_to_width(&status.label);
        if self.is_tty {
            let _ = write!(
                self.writer,
                "\r\x1b[K{} \x1b[2m{}\x1b[0m",
                self.colored_prefix(),
                label
            );
        } else {
            let _ = writeln!(self.writer, "{} {}", self.prefix(), label);
        }
        let _ = self.writer.flush();
    }

    /// Print a persistent line for every newly completed tool group.
    /// Returns the keys printed by this call.
    pub fn emit_completed_steps(&mut self, projection: &Projection<'_>) -> Vec<GroupKey> {
        let mut printed = Vec::new();
        for view in projection.tool_groups.iter().filter(|view| view.complete) {
            if !self.reported.insert(view.key) {
                continue;
            }
            let line = self.truncate_to_width(&view.summary());
            let mark = if view.failed { "x" } else { "+" };
            if self.is_tty {
                let color = if view.failed { "31" } else { "32" };
                let _ = writeln!(
                    self.writer,
                    "\r\x1b[K{} \x1b[{color}m{mark}\x1b[0m {line}",
                    self.colored_prefix()
                );
            } else {
                let _ = writeln!(self.writer, "{} {mark} {line}", self.prefix());
            }
            printed.push(view.key);
        }
        if !printed.is_empty() {
            // The status line was overwritten; reprint it on the next change.
            self.last_status = None;
        }
        printed
    }

    /// Emit an error (persists, red).
    pub fn emit_error(&mut self, msg: &str) {
        if self.is_tty {
            let _ = writeln!(
                self.writer,
                "\r\x1b[K{} \x1b[31merror: {}\x1b[0m",
                self.colored_prefix(),
                msg,
            );
        } else {
            let _ = writeln!(self.writer, "{} error: {}", self.prefix(), msg);
        }
    }

    pub fn emit_stopped(&mut self, reason: Option<StopReason>) {
        let why = match reason {
            Some(StopReason::UserCancelled) | None => "stopped by user",
            Some(StopReason::ContextLength) => "stopped: context limit reached",
            Some(StopReason::Finished) | Some(StopReason::Unknown) => "stopped",
        };
        if self.is_tty {
            let _ = writeln!(
                self.writer,
                "\r\x1b[K{} \x1b[33m{why}\x1b[0m",
                self.colored_prefix()
            );
        } else {
            let _ = writeln!(self.writer, "{} {why}", self.prefix());
        }
    }

    /// Emit the done boundary line (persists).
    pub fn emit_done(&mut self, steps: u32) {
        let elapsed = self.start_time.elapsed().as_secs();
        if self.is_tty {
            let _ = writeln!(
                self.writer,
                "\r\x1b[K{} \x1b[36m---\x1b[0m \x1b[2mdone ({elapsed}s, {steps} steps)\x1b[0m",
                self.colored_prefix(),
            );
        } else {
            let _ = writeln!(
                self.writer,
                "{} --- done ({elapsed}s, {steps} steps)",
                self.prefix(),
            );
        }
    }
}

/// Write the answer and its numbered sources.
pub fn write_answer<W: Write>(out: &mut W, answer: &str, snapshot: &ReducerSnapshot) -> io::Result<()> {
    let answer = answer.trim_end();
    if !answer.is_empty() {
        writeln!(out, "{answer}")?;
    }

    let cited = sources(snapshot);
    if !cited.is_empty() {
        writeln!(out)?;
        writeln!(out, "Sources:")?;
        for (number, doc) in cited {
            match doc.link.as_deref() {
                Some(link) if doc.semantic_identifier.is_some() => {
                    writeln!(out, "[{number}] {} <{link}>", doc.title())?
                }
                _ => writeln!(out, "[{number}] {}", doc.title())?,
            }
        }
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::project;
    use crate::reducer::StreamReducer;
    use cs_protocol::{Document, Packet, PacketObj, StopInfo, StreamRecord};

    fn rec(turn: u32, obj: PacketObj) -> StreamRecord {
        Packet::new(turn, 0, obj).into()
    }

    fn captured(output: StreamOutput<Vec<u8>>) -> String {
        String::from_utf8(output.writer).unwrap()
    }

    #[test]
    fn plain_output_has_no_ansi() {
        let mut output = StreamOutput::new(Vec::new(), false, "what is rust");
        output.emit_start();
        output.emit_status(&WidgetStatus {
            label: "Searching...".to_string(),
            busy: true,
        });
        output.emit_error("boom");
        output.emit_done(2);

        let text = captured(output);
        assert!(!text.contains('\x1b'));
        assert!(text.contains("[cs] --- \"what is rust\""));
        assert!(text.contains("[cs] Searching..."));
        assert!(text.contains("[cs] error: boom"));
        assert!(text.contains("steps)"));
    }

    #[test]
    fn unchanged_status_is_not_repeated() {
        let mut output = StreamOutput::new(Vec::new(), false, "q");
        let status = WidgetStatus {
            label: "Thinking...".to_string(),
            busy: true,
        };
        output.emit_status(&status);
        output.emit_status(&status);
        assert_eq!(captured(output).matches("Thinking...").count(), 1);
    }

    #[test]
    fn long_messages_are_summarized() {
        let long = "x".repeat(100);
        let output = StreamOutput::new(Vec::new(), false, &long);
        assert_eq!(output.summary.chars().count(), 63);
        assert!(output.summary.ends_with("..."));
    }

    #[test]
    fn completed_steps_print_once() {
        let mut reducer = StreamReducer::new();
        reducer.ingest(&[
            rec(
                0,
                PacketObj::SearchToolQueriesDelta {
                    queries: vec!["tokio".to_string()],
                },
            ),
            rec(0, PacketObj::SectionEnd),
            rec(1, PacketObj::ReasoningStart),
        ]);
        let groups = reducer.groups();
        let projection = project(&groups, &reducer.flags());

        let mut output = StreamOutput::new(Vec::new(), false, "q");
        let first = output.emit_completed_steps(&projection);
        let second = output.emit_completed_steps(&projection);

        assert_eq!(first, vec![GroupKey::new(0, 0)]);
        assert!(second.is_empty());
        assert!(captured(output).contains("[cs] + Searched tokio"));
    }

    #[test]
    fn answer_lists_sources() {
        let mut reducer = StreamReducer::new();
        reducer.ingest(&[
            rec(
                0,
                PacketObj::SearchToolDocumentsDelta {
                    documents: vec![Document {
                        semantic_identifier: Some("Tokio docs".to_string()),
                        link: Some("https://tokio.rs".to_string()),
                        ..Document::new("d1")
                    }],
                },
            ),
            rec(1, PacketObj::MessageDelta { content: "Async [1]".to_string() }),
            rec(
                1,
                PacketObj::CitationInfo {
                    citation_number: 1,
                    document_id: "d1".to_string(),
                },
            ),
            rec(1, PacketObj::Stop(StopInfo::default())),
        ]);

        let mut out = Vec::new();
        write_answer(&mut out, "Async [1]\n", &reducer.snapshot()).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Async [1]\n\nSources:\n[1] Tokio docs <https://tokio.rs>\n"
        );
    }
}
