//! Chat server client with NDJSON streaming, retry and cancellation.

use std::time::Duration;

use async_stream::stream;
use cs_protocol::{
    ChatSessionCreationRequest, CreateChatSessionResponse, SendMessageRequest, StreamRecord,
};
use futures::{Stream, StreamExt};
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::ndjson::{ndjson_stream, FramingError, NdjsonError};
use crate::retry::{is_retryable_status, RetryPolicy};

const CREATE_SESSION_PATH: &str = "/chat/create-chat-session";
const SEND_MESSAGE_PATH: &str = "/chat/send-chat-message";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("API error: {0}")]
    Api(String),
}

impl ClientError {
    /// Malformed upstream output, as opposed to a transport failure.
    pub fn is_framing(&self) -> bool {
        matches!(self, ClientError::Framing(_))
    }
}

/// Chat server client.
#[derive(Clone)]
pub struct ChatClient {
    base_url: String,
    api_key: Option<String>,
    http: Client,
    retry: RetryPolicy,
}

/// Build an HTTP client with a connect timeout. Streams may run long, so
/// there is no overall request timeout.
fn build_http_client() -> Result<Client, ClientError> {
    Ok(Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(2)
        .build()?)
}

impl ChatClient {
    /// Create a client for the API rooted at `base_url` (e.g. `http://host/api`).
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Ok(Self {
            base_url: base_url.into(),
            api_key: None,
            http: build_http_client()?,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Create a chat session and return its id.
    pub async fn create_session(
        &self,
        request: &ChatSessionCreationRequest,
    ) -> Result<String, ClientError> {
        let url = self.url(CREATE_SESSION_PATH);
        let never = CancellationToken::new();
        let response = send_with_retry(
            &self.http,
            &url,
            self.api_key.as_deref(),
            request,
            self.retry,
            &never,
        )
        .await?
        .ok_or_else(|| ClientError::Api("session creation cancelled".to_string()))?;

        let created: CreateChatSessionResponse = response.json().await?;
        log::debug!("created chat session {}", created.chat_session_id);
        Ok(created.chat_session_id)
    }

    /// Send a message and return the lazily-read stream of records.
    ///
    /// Nothing is sent until the stream is first polled. When `cancel` fires
    /// the stream ends without a final item and without retrying. A framing
    /// error is yielded once and ends the stream.
    pub fn stream_message(
        &self,
        request: SendMessageRequest,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<StreamRecord, ClientError>> + Send + 'static {
        let http = self.http.clone();
        let url = self.url(SEND_MESSAGE_PATH);
        let api_key = self.api_key.clone();
        let retry = self.retry;

        stream! {
            let response = match send_with_retry(
                &http,
                &url,
                api_key.as_deref(),
                &request,
                retry,
                &cancel,
            )
            .await
            {
                Ok(Some(response)) => response,
                Ok(None) => {
                    log::debug!("send-chat-message cancelled before a response arrived");
                    return;
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut records = ndjson_stream(response.bytes_stream());
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        log::debug!("send-chat-message cancelled after {} lines", records.lines_read());
                        return;
                    }
                    next = records.next() => next,
                };

                match next {
                    Some(Ok(record)) => yield Ok(record),
                    Some(Err(NdjsonError::Framing(e))) => {
                        yield Err(ClientError::Framing(e));
                        return;
                    }
                    Some(Err(NdjsonError::Transport(e))) => {
                        yield Err(ClientError::Http(e));
                        return;
                    }
                    None => return,
                }
            }
        }
    }
}

/// POST `body` as JSON, retrying transient failures.
///
/// Returns `Ok(None)` when `cancel` fires before a successful response.
async fn send_with_retry<B>(
    http: &Client,
    url: &str,
    api_key: Option<&str>,
    body: &B,
    retry: RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Option<Response>, ClientError>
where
    B: Serialize + ?Sized,
{
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Ok(None);
        }

        let mut builder = http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(body);
        if let Some(key) = api_key {
            builder = builder.bearer_auth(key);
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            result = builder.send() => result,
        };

        let error = match result {
            Ok(response) if response.status().is_success() => return Ok(Some(response)),
            Ok(response) => {
                let status = response.status();
                let body = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(None),
                    body = response.text() => body.unwrap_or_default(),
                };
                let error = ClientError::Status { status, body };
                if !is_retryable_status(status) {
                    return Err(error);
                }
                error
            }
            Err(e) if e.is_builder() => return Err(e.into()),
            Err(e) => ClientError::Http(e),
        };

        if !retry.should_retry(attempt) {
            return Err(error);
        }

        let delay = retry.delay_for(attempt);
        log::warn!(
            "{url}: attempt {} of {} failed ({error}); retrying in {delay:?}",
            attempt + 1,
            retry.max_attempts
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}
