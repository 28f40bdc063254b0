//! Mock chat server for testing.
//!
//! Produces the same `Result<StreamRecord, ClientError>` sequence as
//! [`ChatClient::stream_message`](crate::ChatClient::stream_message), so tests
//! above the transport can run without HTTP.

use std::time::Duration;

use async_stream::stream;
use cs_protocol::{MessageIds, Packet, StreamRecord, StreamingError};
use futures::Stream;
use tokio::time::sleep;

use crate::client::ClientError;
use crate::ndjson::parse_line;

/// Configurable mock responses for testing.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Emit a packet.
    Packet(Packet),
    /// Emit the reserved message ids.
    Ids {
        user_message_id: Option<i64>,
        assistant_message_id: i64,
    },
    /// Emit a stream-level error record.
    StreamError { message: String },
    /// Emit a raw line that is framed like wire input; a bad line ends the stream.
    Raw { line: String },
    /// Delay before next record (for timing tests).
    Delay { ms: u64 },
}

/// Configuration for mock stream.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Sequence of responses to emit.
    pub responses: Vec<MockResponse>,
    /// Optional delay between each record (ms).
    pub chunk_delay_ms: Option<u64>,
}

impl MockConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(mut self, responses: Vec<MockResponse>) -> Self {
        self.responses = responses;
        self
    }

    pub fn with_packets(mut self, packets: impl IntoIterator<Item = Packet>) -> Self {
        self.responses
            .extend(packets.into_iter().map(MockResponse::Packet));
        self
    }

    pub fn with_chunk_delay(mut self, ms: u64) -> Self {
        self.chunk_delay_ms = Some(ms);
        self
    }
}

/// Create a record stream from mock config.
pub fn mock_stream(
    config: MockConfig,
) -> impl Stream<Item = Result<StreamRecord, ClientError>> + Send + 'static {
    stream! {
        let mut line = 0usize;
        for response in config.responses {
            if let MockResponse::Delay { ms } = response {
                sleep(Duration::from_millis(ms)).await;
                continue;
            }
            if let Some(delay_ms) = config.chunk_delay_ms {
                sleep(Duration::from_millis(delay_ms)).await;
            }
            line += 1;

            match response {
                MockResponse::Packet(packet) => {
                    yield Ok(StreamRecord::Packet(packet));
                }
                MockResponse::Ids { user_message_id, assistant_message_id } => {
                    yield Ok(StreamRecord::MessageIds(MessageIds {
                        user_message_id,
                        reserved_assistant_message_id: assistant_message_id,
                    }));
                }
                MockResponse::StreamError { message } => {
                    yield Ok(StreamRecord::StreamError(StreamingError {
                        error: message,
                        stack_trace: None,
                        error_code: None,
                        is_retryable: true,
                        details: None,
                    }));
                }
                MockResponse::Raw { line: raw } => match parse_line(line, raw.as_bytes()) {
                    Ok(Some(record)) => yield Ok(record),
                    Ok(None) => {}
                    Err(e) => {
                        yield Err(ClientError::Framing(e));
                        return;
                    }
                },
                MockResponse::Delay { .. } => {}
            }
        }
    }
}

/// Built-in test fixtures for common scenarios.
pub mod fixtures {
    use cs_protocol::{Document, PacketObj, StopInfo, StopReason};

    use super::*;

    fn stop(turn: u32, reason: StopReason) -> Packet {
        Packet::new(
            turn,
            0,
            PacketObj::Stop(StopInfo {
                stop_reason: Some(reason),
            }),
        )
    }

    fn answer(turn: u32, chunks: &[&str]) -> Vec<Packet> {
        let mut packets = vec![Packet::new(
            turn,
            0,
            PacketObj::MessageStart {
                final_documents: None,
            },
        )];
        packets.extend(chunks.iter().map(|chunk| {
            Packet::new(
                turn,
                0,
                PacketObj::MessageDelta {
                    content: (*chunk).to_string(),
                },
            )
        }));
        packets
    }

    /// A plain answer streamed in chunks, then a natural stop.
    pub fn text_answer(chunks: &[&str]) -> MockConfig {
        let mut packets = answer(0, chunks);
        packets.push(stop(0, StopReason::Finished));
        MockConfig::new()
            .with_responses(vec![MockResponse::Ids {
                user_message_id: Some(1),
                assistant_message_id: 2,
            }])
            .with_packets(packets)
    }

    /// One search turn, then a cited answer on the next turn.
    pub fn search_then_answer(query: &str, documents: Vec<Document>, chunks: &[&str]) -> MockConfig {
        let first_id = documents.first().map(|doc| doc.document_id.clone());
        let mut packets = vec![
            Packet::new(
                0,
                0,
                PacketObj::SearchToolStart {
                    is_internet_search: false,
                },
            ),
            Packet::new(
                0,
                0,
                PacketObj::SearchToolQueriesDelta {
                    queries: vec![query.to_string()],
                },
            ),
            Packet::new(0, 0, PacketObj::SearchToolDocumentsDelta { documents }),
            Packet::new(0, 0, PacketObj::SectionEnd),
        ];
        packets.extend(answer(1, chunks));
        if let Some(document_id) = first_id {
            packets.push(Packet::new(
                1,
                0,
                PacketObj::CitationInfo {
                    citation_number: 1,
                    document_id,
                },
            ));
        }
        packets.push(stop(1, StopReason::Finished));
        MockConfig::new().with_packets(packets)
    }

    /// Two searches running in parallel tabs of turn 0, then an answer.
    pub fn parallel_searches(queries: [&str; 2], chunks: &[&str]) -> MockConfig {
        let mut packets = vec![Packet::new(
            0,
            0,
            PacketObj::TopLevelBranching {
                num_parallel_branches: 2,
            },
        )];
        for (tab, query) in queries.iter().enumerate() {
            let tab = tab as u32;
            packets.push(Packet::new(
                0,
                tab,
                PacketObj::SearchToolStart {
                    is_internet_search: true,
                },
            ));
            packets.push(Packet::new(
                0,
                tab,
                PacketObj::SearchToolQueriesDelta {
                    queries: vec![(*query).to_string()],
                },
            ));
        }
        packets.extend(answer(1, chunks));
        packets.push(stop(1, StopReason::Finished));
        MockConfig::new().with_packets(packets)
    }

    /// A partial answer cut off by the user.
    pub fn cancelled_answer(chunks: &[&str]) -> MockConfig {
        let mut packets = answer(0, chunks);
        packets.push(stop(0, StopReason::UserCancelled));
        MockConfig::new().with_packets(packets)
    }

    /// Some answer text, then a stream-level error record.
    pub fn error_mid_stream(text_before: &str, error: &str) -> MockConfig {
        let mut config = MockConfig::new().with_packets(answer(0, &[text_before]));
        config.responses.push(MockResponse::StreamError {
            message: error.to_string(),
        });
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_protocol::{Document, PacketObj};
    use futures::StreamExt;

    #[tokio::test]
    async fn mock_stream_emits_records() {
        let config = MockConfig::new().with_responses(vec![
            MockResponse::Ids {
                user_message_id: None,
                assistant_message_id: 9,
            },
            MockResponse::Packet(Packet::new(0, 0, PacketObj::SectionEnd)),
        ]);

        let records: Vec<_> = mock_stream(config).collect().await;

        assert_eq!(records.len(), 2);
        assert!(matches!(
            records[0],
            Ok(StreamRecord::MessageIds(MessageIds {
                reserved_assistant_message_id: 9,
                ..
            }))
        ));
        assert_eq!(
            records[1].as_ref().unwrap().as_packet().unwrap().obj,
            PacketObj::SectionEnd
        );
    }

    #[tokio::test]
    async fn raw_lines_are_framed() {
        let config = MockConfig::new().with_responses(vec![
            MockResponse::Raw {
                line: r#"{"placement":{"turn_index":0},"obj":{"type":"reasoning_start"}}"#
                    .to_string(),
            },
            MockResponse::Raw {
                line: String::new(),
            },
            MockResponse::Raw {
                line: "{not json".to_string(),
            },
            MockResponse::Packet(Packet::new(0, 0, PacketObj::SectionEnd)),
        ]);

        let records: Vec<_> = mock_stream(config).collect().await;

        assert_eq!(records.len(), 2);
        assert!(records[0].is_ok());
        assert!(records[1].as_ref().unwrap_err().is_framing());
    }

    #[tokio::test]
    async fn delay_pauses_without_counting_as_a_line() {
        let config = MockConfig::new().with_responses(vec![
            MockResponse::Raw {
                line: r#"{"placement":{"turn_index":0},"obj":{"type":"reasoning_start"}}"#
                    .to_string(),
            },
            MockResponse::Delay { ms: 40 },
            MockResponse::Raw {
                line: "{not json".to_string(),
            },
        ]);

        let started = tokio::time::Instant::now();
        let records: Vec<_> = mock_stream(config).collect().await;

        assert!(started.elapsed() >= Duration::from_millis(40));
        assert_eq!(records.len(), 2);
        assert!(matches!(
            records[1],
            Err(ClientError::Framing(crate::FramingError::InvalidJson { line: 2, .. }))
        ));
    }

    #[tokio::test]
    async fn fixture_text_answer() {
        let records: Vec<_> = mock_stream(fixtures::text_answer(&["Hel", "lo"]))
            .collect()
            .await;

        // ids + start + 2 deltas + stop
        assert_eq!(records.len(), 5);
        let last = records[4].as_ref().unwrap().as_packet().unwrap();
        assert!(last.obj.stop_info().is_some());
    }

    #[tokio::test]
    async fn fixture_search_then_answer_cites_first_document() {
        let config =
            fixtures::search_then_answer("rust", vec![Document::new("doc-1")], &["See [1]."]);
        let records: Vec<_> = mock_stream(config).collect().await;

        let cited = records.iter().filter_map(|r| r.as_ref().ok()).any(|r| {
            matches!(
                r.as_packet().map(|p| &p.obj),
                Some(PacketObj::CitationInfo { citation_number: 1, document_id }) if document_id == "doc-1"
            )
        });
        assert!(cited);
    }

    #[tokio::test]
    async fn fixture_error_mid_stream() {
        let records: Vec<_> = mock_stream(fixtures::error_mid_stream("Working", "boom"))
            .collect()
            .await;

        assert!(matches!(
            records.last(),
            Some(Ok(StreamRecord::StreamError(StreamingError { error, .. }))) if error == "boom"
        ));
    }
}
