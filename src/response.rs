use std::io::Read;

use bytes::Bytes;
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;

use crate::DirectorResult;
use crate::error::Error;
use crate::request::Request;
use crate::util::{dump_headers, redact_uri_for_logs};

/// Method, redacted uri and headers of the request that produced a response.
#[derive(Clone, Debug)]
pub struct RequestSummary {
    method: Method,
    uri: String,
    headers: HeaderMap,
}

impl RequestSummary {
    pub(crate) fn capture(request: &Request) -> Self {
        Self {
            method: request.method().clone(),
            uri: redact_uri_for_logs(&request.uri().to_string()),
            headers: request.headers().clone(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn dump(&self) -> String {
        format!(
            "{} {}\r\n{}",
            self.method,
            self.uri,
            dump_headers(&self.headers)
        )
    }
}

/// A response whose body has not been read yet.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Box<dyn Read>,
    request: Option<RequestSummary>,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Read + 'static) -> Self {
        Self {
            status,
            headers,
            body: Box::new(body),
            request: None,
        }
    }

    pub fn from_bytes(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self::new(status, headers, std::io::Cursor::new(body.into()))
    }

    pub(crate) fn with_request(mut self, request: RequestSummary) -> Self {
        self.request = Some(request);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn request(&self) -> Option<&RequestSummary> {
        self.request.as_ref()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
    }

    pub fn body_mut(&mut self) -> &mut dyn Read {
        self.body.as_mut()
    }

    pub fn read_body(mut self) -> DirectorResult<HttpResponse> {
        let mut collected = Vec::new();
        self.body
            .read_to_end(&mut collected)
            .map_err(|source| Error::ReadBody { source })?;
        Ok(HttpResponse::new(
            self.status,
            self.headers,
            Bytes::from(collected),
        ))
    }

    /// Drains whatever is left of the body before dropping the connection. Dropping
    /// an unread body is not enough: the next attempt can race the half-read socket.
    pub fn discard(mut self) {
        let _ = std::io::copy(&mut self.body, &mut std::io::sink());
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpResponse {
    pub(crate) fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T>(&self) -> DirectorResult<T>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(&self.body).map_err(|source| Error::Deserialize {
            source,
            body: self.text_lossy(),
        })
    }

    pub(crate) fn dump(&self) -> String {
        format!(
            "HTTP {}\r\n{}\r\n{}",
            self.status,
            dump_headers(&self.headers),
            self.text_lossy()
        )
    }
}
