use std::borrow::Cow;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use std::{fmt, io};

use bytes::Bytes;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::status::ResponseStatus;

/// Content type of newline-delimited JSON payloads.
pub const JSON_STREAM_CONTENT_TYPE: &str = "application/x-json-stream";

/// Default time a single send may take before it fails with [`TransportError::Timeout`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(100);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// An error creating or slicing a [`Transmission`].
#[derive(Debug, thiserror::Error)]
pub enum TransmissionError {
    /// The endpoint address is empty.
    #[error("transmission endpoint must not be empty")]
    EmptyEndpoint,
    /// The payload is empty.
    #[error("transmission content must not be empty")]
    EmptyContent,
    /// Compressing or decompressing the payload failed.
    #[error("failed to encode transmission content")]
    Encoding(#[from] io::Error),
}

/// The content encoding of a transmission payload.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ContentEncoding {
    /// The payload is sent as is.
    #[default]
    Identity,
    /// The payload is gzip compressed.
    Gzip,
}

impl ContentEncoding {
    /// The value of the `Content-Encoding` header, if any.
    pub fn header_value(self) -> Option<&'static str> {
        match self {
            Self::Identity => None,
            Self::Gzip => Some("gzip"),
        }
    }

    fn encode(self, data: &[u8]) -> Result<Bytes, io::Error> {
        match self {
            Self::Identity => Ok(Bytes::copy_from_slice(data)),
            Self::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data)?;
                Ok(encoder.finish()?.into())
            }
        }
    }

    fn decode(self, data: &[u8]) -> Result<Cow<'_, [u8]>, io::Error> {
        match self {
            Self::Identity => Ok(Cow::Borrowed(data)),
            Self::Gzip => {
                let mut decoded = Vec::new();
                GzDecoder::new(data).read_to_end(&mut decoded)?;
                Ok(Cow::Owned(decoded))
            }
        }
    }
}

/// A batch of serialized telemetry items sent to the ingestion endpoint in one request.
///
/// Cloning a transmission is cheap, the payload is reference counted.
#[derive(Clone)]
pub struct Transmission {
    id: u64,
    endpoint: String,
    content: Bytes,
    content_type: String,
    content_encoding: ContentEncoding,
    timeout: Duration,
}

impl Transmission {
    /// Creates a transmission from an already encoded payload.
    pub fn new(
        endpoint: impl Into<String>,
        content: impl Into<Bytes>,
        content_type: impl Into<String>,
        content_encoding: ContentEncoding,
    ) -> Result<Self, TransmissionError> {
        let endpoint = endpoint.into();
        if endpoint.is_empty() {
            return Err(TransmissionError::EmptyEndpoint);
        }

        let content = content.into();
        if content.is_empty() {
            return Err(TransmissionError::EmptyContent);
        }

        Ok(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            endpoint,
            content,
            content_type: content_type.into(),
            content_encoding,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Creates a newline-delimited JSON transmission from serialized items.
    pub fn from_lines<I, S>(
        endpoint: impl Into<String>,
        lines: I,
        content_encoding: ContentEncoding,
    ) -> Result<Self, TransmissionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let lines: Vec<S> = lines.into_iter().collect();
        let joined = join_lines(lines.iter().map(|line| line.as_ref().as_bytes()));
        let content = content_encoding.encode(&joined)?;
        Self::new(endpoint, content, JSON_STREAM_CONTENT_TYPE, content_encoding)
    }

    /// Sets the time a send of this transmission may take.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Identifies this transmission and every transmission sliced from it.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The address of the ingestion endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The encoded payload.
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// The MIME type of the decoded payload.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// The encoding of the payload.
    pub fn content_encoding(&self) -> ContentEncoding {
        self.content_encoding
    }

    /// The time a send of this transmission may take.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The size of the encoded payload in bytes.
    pub fn size(&self) -> usize {
        self.content.len()
    }

    /// Returns the payload with the content encoding removed.
    pub fn decoded_content(&self) -> Result<Cow<'_, [u8]>, TransmissionError> {
        Ok(self.content_encoding.decode(&self.content)?)
    }

    /// Builds a transmission that contains only the given lines of this payload.
    ///
    /// Lines are addressed by their zero-based index and are emitted in payload order.
    /// Indexes past the last line are ignored. Returns `None` if no line was selected.
    pub fn slice(&self, indexes: &[usize]) -> Result<Option<Self>, TransmissionError> {
        let decoded = self.decoded_content()?;

        let mut selected = indexes.to_vec();
        selected.sort_unstable();
        selected.dedup();

        let lines: Vec<&[u8]> = decoded.split(|b| *b == b'\n').collect();
        let picked: Vec<&[u8]> = selected
            .into_iter()
            .filter_map(|index| lines.get(index).copied())
            .collect();

        if picked.is_empty() {
            return Ok(None);
        }

        let content = self.content_encoding.encode(&join_lines(picked))?;
        Ok(Some(Self {
            content,
            ..self.clone()
        }))
    }
}

impl fmt::Debug for Transmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transmission")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("size", &self.content.len())
            .field("content_type", &self.content_type)
            .field("content_encoding", &self.content_encoding)
            .finish()
    }
}

fn join_lines<'a>(lines: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
    let mut joined = Vec::new();
    for (index, line) in lines.into_iter().enumerate() {
        if index > 0 {
            joined.push(b'\n');
        }
        joined.extend_from_slice(line);
    }
    joined
}

/// A response received from the ingestion endpoint.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransmissionResponse {
    /// The status code of the response.
    pub status: ResponseStatus,
    /// The response body, if one was received.
    pub content: Option<String>,
    /// The raw value of the `Retry-After` header.
    pub retry_after: Option<String>,
}

impl TransmissionResponse {
    /// Creates a response without body and headers.
    pub fn new(status: impl Into<ResponseStatus>) -> Self {
        Self {
            status: status.into(),
            content: None,
            retry_after: None,
        }
    }

    /// Sets the response body.
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Sets the `Retry-After` header.
    pub fn with_retry_after(mut self, retry_after: impl Into<String>) -> Self {
        self.retry_after = Some(retry_after.into());
        self
    }
}

/// A send that failed without receiving any response.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The send did not complete within the transmission's timeout.
    #[error("transmission timed out after {0:?}")]
    Timeout(Duration),
    /// The connection could not be established or broke.
    #[error("failed to send transmission")]
    Connection(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// The result of sending a transmission, reported to every transmission policy.
#[derive(Debug)]
pub struct TransmissionOutcome {
    /// The transmission that was sent.
    pub transmission: Transmission,
    /// The response or the transport failure.
    pub result: Result<TransmissionResponse, TransportError>,
}

impl TransmissionOutcome {
    /// The response, if one was received.
    pub fn response(&self) -> Option<&TransmissionResponse> {
        self.result.as_ref().ok()
    }

    /// The response status, if a response was received.
    pub fn status(&self) -> Option<ResponseStatus> {
        self.response().map(|response| response.status)
    }

    /// The `Retry-After` header, if a response was received and carried it.
    pub fn retry_after(&self) -> Option<&str> {
        self.response()?.retry_after.as_deref()
    }
}
