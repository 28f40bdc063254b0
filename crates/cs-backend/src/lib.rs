//! cs-backend: Transport for the chat packet stream.
//!
//! This crate sends messages to the chat server, frames the NDJSON response
//! into [`StreamRecord`](cs_protocol::StreamRecord)s, and retries transient
//! failures. A mock stream stands in for the server in tests.

pub mod client;
pub mod mock;
pub mod ndjson;
pub mod retry;

pub use client::{ChatClient, ClientError};
pub use mock::{MockConfig, MockResponse};
pub use ndjson::{ndjson_stream, FramingError, NdjsonError, NdjsonStream};
pub use retry::RetryPolicy;
