use std::io::{Read, Seek};

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};

pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

#[derive(Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Buffered(Bytes),
    Seekable(Box<dyn ReadSeek + Send + Sync>),
    Stream(Box<dyn Read + Send + Sync>),
    /// A stream that was handed to the transport and cannot be read again.
    Consumed,
}

impl RequestBody {
    pub fn empty() -> Self {
        Self::Empty
    }

    pub fn bytes(body: impl Into<Bytes>) -> Self {
        Self::Buffered(body.into())
    }

    pub fn seekable<R>(reader: R) -> Self
    where
        R: Read + Seek + Send + Sync + 'static,
    {
        Self::Seekable(Box::new(reader))
    }

    pub fn stream<R>(reader: R) -> Self
    where
        R: Read + Send + Sync + 'static,
    {
        Self::Stream(Box::new(reader))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn is_replayable(&self) -> bool {
        matches!(self, Self::Empty | Self::Buffered(_) | Self::Seekable(_))
    }

    pub fn len_hint(&self) -> Option<u64> {
        match self {
            Self::Empty => Some(0),
            Self::Buffered(body) => Some(body.len() as u64),
            _ => None,
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(body: Bytes) -> Self {
        Self::Buffered(body)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(body: Vec<u8>) -> Self {
        Self::Buffered(Bytes::from(body))
    }
}

impl From<String> for RequestBody {
    fn from(body: String) -> Self {
        Self::Buffered(Bytes::from(body))
    }
}

impl From<&'static str> for RequestBody {
    fn from(body: &'static str) -> Self {
        Self::Buffered(Bytes::from_static(body.as_bytes()))
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => formatter.write_str("Empty"),
            Self::Buffered(body) => formatter
                .debug_tuple("Buffered")
                .field(&body.len())
                .finish(),
            Self::Seekable(_) => formatter.write_str("Seekable(..)"),
            Self::Stream(_) => formatter.write_str("Stream(..)"),
            Self::Consumed => formatter.write_str("Consumed"),
        }
    }
}

#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: RequestBody,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_headers(mut self, headers: &HeaderMap) -> Self {
        for (name, value) in headers {
            self.headers.append(name.clone(), value.clone());
        }
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub(crate) fn set_uri(&mut self, uri: Uri) {
        self.uri = uri;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub(crate) fn body_mut(&mut self) -> &mut RequestBody {
        &mut self.body
    }

    pub(crate) fn clear_body(&mut self) {
        self.body = RequestBody::Empty;
    }
}
