//! One message, end to end.
//!
//! Pulls records from the server (or a captured NDJSON file), folds them with
//! the reducer, reports progress on stderr, prints the answer on stdout and
//! remembers the session for the next run.

use std::fmt::Display;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};

use cs_backend::{ndjson_stream, ChatClient, NdjsonError};
use cs_protocol::{
    ChatSessionCreationRequest, SendMessageRequest, StopReason, StreamRecord,
};
use futures::{Stream, StreamExt};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::cache::{CachedSession, SessionCache};
use crate::config::Config;
use crate::output::{write_answer, StreamOutput};
use crate::projection::{answer_text, project, ToolDisplayLatch};
use crate::reducer::{Phase, ReducerSnapshot, StreamReducer};
use crate::status::widget_status;

/// Command-line choices for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub message: String,
    pub session: Option<String>,
    pub parent: Option<i64>,
    pub replay: Option<PathBuf>,
    pub no_citations: bool,
    pub no_cache: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Cancelled,
    Failed,
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Completed => 0,
            Outcome::Failed => 1,
            Outcome::Cancelled => 130,
        }
    }
}

pub struct RunReport {
    pub outcome: Outcome,
    pub answer: String,
    pub snapshot: ReducerSnapshot,
}

/// Fold `records` until they end, fail, or `cancel` fires.
pub async fn drive<S, E, W>(
    records: S,
    cancel: &CancellationToken,
    output: &mut StreamOutput<W>,
) -> RunReport
where
    S: Stream<Item = Result<StreamRecord, E>>,
    E: Display,
    W: Write,
{
    let mut records = std::pin::pin!(records);
    let mut log: Vec<StreamRecord> = Vec::new();
    let mut reducer = StreamReducer::new();
    let mut latch = ToolDisplayLatch::new(|| log::debug!("every tool step has been shown"));
    let mut failure: Option<String> = None;

    output.emit_start();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = records.next() => next,
        };
        match next {
            Some(Ok(record)) => log.push(record),
            Some(Err(e)) => {
                failure = Some(e.to_string());
                break;
            }
            None => break,
        }

        if reducer.ingest(&log) {
            let snapshot = reducer.snapshot();
            let projection = project(&snapshot.groups, &snapshot.flags);
            for key in output.emit_completed_steps(&projection) {
                latch.mark_displayed(key);
            }
            latch.check(&projection);
            if !snapshot.phase.is_finished() {
                output.emit_status(&widget_status(&snapshot));
            }
        }
    }

    let snapshot = reducer.snapshot();
    let projection = project(&snapshot.groups, &snapshot.flags);
    output.emit_completed_steps(&projection);
    let steps = projection.total_steps();

    let outcome = if let Some(message) = failure {
        output.emit_error(&message);
        Outcome::Failed
    } else if let Phase::Failed(message) = &snapshot.phase {
        output.emit_error(message);
        Outcome::Failed
    } else if cancel.is_cancelled() {
        output.emit_stopped(Some(StopReason::UserCancelled));
        Outcome::Cancelled
    } else if let Phase::Interrupted(reason) = snapshot.phase {
        output.emit_stopped(Some(reason));
        if reason == StopReason::UserCancelled {
            Outcome::Cancelled
        } else {
            Outcome::Completed
        }
    } else {
        if snapshot.phase != Phase::Complete {
            log::warn!("stream ended without a stop packet");
        }
        output.emit_done(steps);
        Outcome::Completed
    };

    RunReport {
        outcome,
        answer: answer_text(&snapshot),
        snapshot,
    }
}

/// Records of a captured NDJSON file, framed like a live response.
pub async fn replay_records(
    path: &Path,
) -> io::Result<impl Stream<Item = Result<StreamRecord, NdjsonError<io::Error>>>> {
    let file = tokio::fs::File::open(path).await?;
    Ok(ndjson_stream(ReaderStream::new(file)))
}

/// Run one message and return the process exit code.
pub async fn run(config: &Config, options: &RunOptions, cancel: CancellationToken) -> i32 {
    let is_tty = io::stderr().is_terminal();
    let mut output = StreamOutput::new(io::stderr(), is_tty, &options.message);

    if let Some(path) = &options.replay {
        let records = match replay_records(path).await {
            Ok(records) => records,
            Err(e) => {
                output.emit_error(&format!("cannot read {}: {e}", path.display()));
                return 1;
            }
        };
        let report = drive(records, &cancel, &mut output).await;
        print_answer(&report);
        return report.outcome.exit_code();
    }

    let client = match ChatClient::new(config.server.base_url.as_str()) {
        Ok(client) => client.with_retry(config.stream.retry_policy()),
        Err(e) => {
            output.emit_error(&e.to_string());
            return 1;
        }
    };
    let client = match config.server.resolve_api_key() {
        Some(key) => client.with_api_key(key),
        None => client,
    };

    let cache = (config.cache.enabled && !options.no_cache)
        .then(|| SessionCache::new(config.cache.resolve_dir(), config.cache.ttl()));
    let cache_key = format!("persona-{}", config.server.persona_id);
    let cached = cache.as_ref().and_then(|cache| {
        cache.load(&cache_key).unwrap_or_else(|e| {
            log::warn!("{e}");
            None
        })
    });

    let (session_id, cached) = match (&options.session, cached) {
        (Some(id), Some(entry)) if entry.chat_session_id == *id => (id.clone(), Some(entry)),
        (Some(id), _) => (id.clone(), None),
        (None, Some(entry)) => (entry.chat_session_id.clone(), Some(entry)),
        (None, None) => {
            let request = ChatSessionCreationRequest {
                persona_id: config.server.persona_id,
                description: None,
            };
            let created = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Outcome::Cancelled.exit_code(),
                created = client.create_session(&request) => created,
            };
            match created {
                Ok(id) => (id, None),
                Err(e) => {
                    output.emit_error(&e.to_string());
                    return 1;
                }
            }
        }
    };

    let parent = options
        .parent
        .or_else(|| cached.as_ref().and_then(CachedSession::last_assistant_id));
    let mut request = SendMessageRequest::new(options.message.as_str())
        .with_session(session_id.as_str())
        .with_citations(config.stream.include_citations && !options.no_citations);
    if parent.is_some() {
        request = request.with_parent(parent);
    }

    let records = client.stream_message(request, cancel.clone());
    let report = drive(records, &cancel, &mut output).await;
    print_answer(&report);

    if report.outcome == Outcome::Completed {
        if let Some(cache) = &cache {
            let session_id = report
                .snapshot
                .chat_session_id
                .clone()
                .unwrap_or(session_id);
            let mut entry = match cached {
                Some(entry) if entry.chat_session_id == session_id => entry,
                _ => CachedSession::new(session_id),
            };
            entry.push_exchange(&options.message, &report.answer, report.snapshot.message_ids);
            if let Err(e) = cache.store(&cache_key, &entry) {
                log::warn!("{e}");
            }
        }
    }

    report.outcome.exit_code()
}

fn print_answer(report: &RunReport) {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if let Err(e) = write_answer(&mut out, &report.answer, &report.snapshot) {
        log::warn!("failed to write answer: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_backend::mock::{fixtures, mock_stream, MockConfig, MockResponse};
    use cs_protocol::Document;

    fn quiet() -> StreamOutput<Vec<u8>> {
        StreamOutput::new(Vec::new(), false, "question")
    }

    #[tokio::test]
    async fn completed_answer() {
        let cancel = CancellationToken::new();
        let mut output = quiet();
        let report = drive(
            mock_stream(fixtures::text_answer(&["Hel", "lo"])),
            &cancel,
            &mut output,
        )
        .await;

        assert_eq!(report.outcome, Outcome::Completed);
        assert_eq!(report.answer, "Hello");
        assert_eq!(
            report
                .snapshot
                .message_ids
                .map(|ids| ids.reserved_assistant_message_id),
            Some(2)
        );
    }

    #[tokio::test]
    async fn search_steps_are_reported() {
        let cancel = CancellationToken::new();
        let mut output = quiet();
        let config = fixtures::search_then_answer(
            "rust",
            vec![Document::new("d1")],
            &["Rust [1]."],
        );
        let report = drive(mock_stream(config), &cancel, &mut output).await;

        assert_eq!(report.outcome, Outcome::Completed);
        assert_eq!(report.answer, "Rust [1].");
        assert_eq!(report.snapshot.citations.len(), 1);
    }

    #[tokio::test]
    async fn server_side_cancel_maps_to_cancelled() {
        let cancel = CancellationToken::new();
        let mut output = quiet();
        let report = drive(
            mock_stream(fixtures::cancelled_answer(&["Par"])),
            &cancel,
            &mut output,
        )
        .await;

        assert_eq!(report.outcome, Outcome::Cancelled);
        assert_eq!(report.outcome.exit_code(), 130);
        assert_eq!(report.answer, "Par");
    }

    #[tokio::test]
    async fn stream_error_record_fails() {
        let cancel = CancellationToken::new();
        let mut output = quiet();
        let report = drive(
            mock_stream(fixtures::error_mid_stream("Work", "overloaded")),
            &cancel,
            &mut output,
        )
        .await;

        assert_eq!(report.outcome, Outcome::Failed);
        assert_eq!(report.outcome.exit_code(), 1);
    }

    #[tokio::test]
    async fn framing_error_fails() {
        let cancel = CancellationToken::new();
        let mut output = quiet();
        let config = MockConfig::new().with_responses(vec![MockResponse::Raw {
            line: "not json".to_string(),
        }]);
        let report = drive(mock_stream(config), &cancel, &mut output).await;

        assert_eq!(report.outcome, Outcome::Failed);
    }

    #[tokio::test]
    async fn local_cancel_stops_reading() {
        let cancel = CancellationToken::new();
        let mut output = quiet();
        let config = fixtures::text_answer(&["a", "b", "c"]).with_chunk_delay(50);
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(75)).await;
            trigger.cancel();
        });

        let report = drive(mock_stream(config), &cancel, &mut output).await;

        assert_eq!(report.outcome, Outcome::Cancelled);
        assert!(!report.snapshot.flags.stop_packet_seen);
    }

    #[tokio::test]
    async fn replay_reads_captured_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.ndjson");
        std::fs::write(
            &path,
            concat!(
                r#"{"placement":{"turn_index":0},"obj":{"type":"message_start"}}"#,
                "\n\n",
                r#"{"placement":{"turn_index":0},"obj":{"type":"message_delta","content":"From disk"}}"#,
                "\n",
                r#"{"placement":{"turn_index":0},"obj":{"type":"stop"}}"#,
            ),
        )
        .unwrap();

        let cancel = CancellationToken::new();
        let mut output = quiet();
        let records = replay_records(&path).await.unwrap();
        let report = drive(records, &cancel, &mut output).await;

        assert_eq!(report.outcome, Outcome::Completed);
        assert_eq!(report.answer, "From disk");
    }

    #[tokio::test]
    async fn missing_replay_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(replay_records(&dir.path().join("absent")).await.is_err());
    }
}
