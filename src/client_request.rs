use std::io::Write;
use std::sync::Arc;

use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{Level, debug};

use crate::DirectorResult;
use crate::error::Error;
use crate::reporter::FileReporter;
use crate::request::{Request, RequestBody};
use crate::response::{HttpResponse, Response};
use crate::transport::Sender;
use crate::util::{
    join_endpoint_path, parse_header_value, parse_uri, redact_uri_for_logs, redirect_location,
};

pub const CONTEXT_ID_HEADER: &str = "x-bosh-context-id";

const ACCEPTED_STATUSES: [StatusCode; 5] = [
    StatusCode::OK,
    StatusCode::CREATED,
    StatusCode::NO_CONTENT,
    StatusCode::PARTIAL_CONTENT,
    StatusCode::FOUND,
];
const MAX_FOUND_FOLLOWS: usize = 10;

/// Destination for a streamed response body.
pub trait DownloadSink: Write {
    /// Whether the download should be wrapped by the [`FileReporter`].
    fn track_download(&self) -> bool {
        true
    }
}

impl DownloadSink for Vec<u8> {}

impl DownloadSink for std::fs::File {}

/// A sink that opts out of progress reporting.
#[derive(Debug)]
pub struct UntrackedSink<W>(pub W);

impl<W: Write> Write for UntrackedSink<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl<W: Write> DownloadSink for UntrackedSink<W> {
    fn track_download(&self) -> bool {
        false
    }
}

/// Verb-level access to the Director API.
///
/// Cheap to clone; [`ClientRequest::with_context`] returns a copy rather than
/// changing the original.
#[derive(Clone)]
pub struct ClientRequest {
    endpoint: String,
    context_id: String,
    sender: Arc<dyn Sender>,
    file_reporter: Arc<dyn FileReporter>,
}

impl ClientRequest {
    pub fn new(
        endpoint: impl Into<String>,
        sender: Arc<dyn Sender>,
        file_reporter: Arc<dyn FileReporter>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            context_id: String::new(),
            sender,
            file_reporter,
        }
    }

    pub fn with_context(&self, context_id: impl Into<String>) -> Self {
        Self {
            context_id: context_id.into(),
            ..self.clone()
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn get<T>(&self, path: &str) -> DirectorResult<T>
    where
        T: DeserializeOwned,
    {
        decode(&self.raw_get(path, None, &HeaderMap::new())?)
    }

    pub fn post<T>(
        &self,
        path: &str,
        payload: impl Into<RequestBody>,
        headers: &HeaderMap,
    ) -> DirectorResult<T>
    where
        T: DeserializeOwned,
    {
        decode(&self.raw_post(path, payload, headers)?)
    }

    pub fn post_json<T, P>(&self, path: &str, payload: &P) -> DirectorResult<T>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let (body, headers) = json_payload(payload)?;
        self.post(path, body, &headers)
    }

    pub fn put<T>(
        &self,
        path: &str,
        payload: impl Into<RequestBody>,
        headers: &HeaderMap,
    ) -> DirectorResult<T>
    where
        T: DeserializeOwned,
    {
        decode(&self.raw_put(path, payload, headers)?)
    }

    pub fn put_json<T, P>(&self, path: &str, payload: &P) -> DirectorResult<T>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let (body, headers) = json_payload(payload)?;
        self.put(path, body, &headers)
    }

    pub fn delete<T>(&self, path: &str) -> DirectorResult<T>
    where
        T: DeserializeOwned,
    {
        decode(&self.raw_delete(path, &HeaderMap::new())?)
    }

    /// GET that either buffers the body or, with `out`, streams it there. A `302`
    /// is followed to the `Location` path.
    pub fn raw_get(
        &self,
        path: &str,
        out: Option<&mut dyn DownloadSink>,
        headers: &HeaderMap,
    ) -> DirectorResult<HttpResponse> {
        self.raw_request(Method::GET, path, RequestBody::Empty, out, headers, 0)
    }

    pub fn raw_post(
        &self,
        path: &str,
        payload: impl Into<RequestBody>,
        headers: &HeaderMap,
    ) -> DirectorResult<HttpResponse> {
        self.raw_request(Method::POST, path, payload.into(), None, headers, 0)
    }

    pub fn raw_put(
        &self,
        path: &str,
        payload: impl Into<RequestBody>,
        headers: &HeaderMap,
    ) -> DirectorResult<HttpResponse> {
        self.raw_request(Method::PUT, path, payload.into(), None, headers, 0)
    }

    pub fn raw_delete(&self, path: &str, headers: &HeaderMap) -> DirectorResult<HttpResponse> {
        self.raw_request(Method::DELETE, path, RequestBody::Empty, None, headers, 0)
    }

    fn raw_request(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
        out: Option<&mut dyn DownloadSink>,
        headers: &HeaderMap,
        follows: usize,
    ) -> DirectorResult<HttpResponse> {
        let url = join_endpoint_path(&self.endpoint, path);
        let mut request = Request::new(method.clone(), parse_uri(&url)?)
            .with_headers(headers)
            .with_body(body);
        if !self.context_id.is_empty() {
            request.headers_mut().insert(
                CONTEXT_ID_HEADER,
                parse_header_value(CONTEXT_ID_HEADER, &self.context_id)?,
            );
        }

        let response = self
            .sender
            .send(&mut request)
            .map_err(|error| error.wrap_request(&method, &redact_uri_for_logs(&url)))?;
        let status = response.status();
        let accepted = ACCEPTED_STATUSES.contains(&status);

        let out = match out {
            Some(sink) if accepted && status != StatusCode::FOUND => {
                return self.stream_into(response, sink);
            }
            out => out,
        };
        let buffered = self.buffer(response)?;

        if !accepted {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                body: buffered.text_lossy(),
            });
        }
        if status != StatusCode::FOUND {
            return Ok(buffered);
        }

        let location =
            redirect_location(buffered.headers()).ok_or_else(|| Error::MissingRedirectLocation {
                status: status.as_u16(),
                method: method.clone(),
                uri: redact_uri_for_logs(&url),
            })?;
        if follows >= MAX_FOUND_FOLLOWS {
            return Err(Error::RedirectLimitExceeded {
                max_redirects: MAX_FOUND_FOLLOWS,
                method,
                uri: redact_uri_for_logs(&url),
            });
        }
        let redirect_path = location_path(&url, &location).ok_or_else(|| {
            Error::InvalidRedirectLocation {
                location: location.clone(),
                method: method.clone(),
                uri: redact_uri_for_logs(&url),
            }
        })?;
        debug!(from = %path, to = %redirect_path, "following director 302");
        self.raw_request(
            Method::GET,
            &redirect_path,
            RequestBody::Empty,
            out,
            &HeaderMap::new(),
            follows + 1,
        )
    }

    fn buffer(&self, response: Response) -> DirectorResult<HttpResponse> {
        let summary = response.request().cloned();
        let buffered = response.read_body()?;
        if tracing::enabled!(Level::DEBUG) {
            if let Some(summary) = summary {
                debug!("Dumping Director client request:\n{}", summary.dump());
            }
            debug!("Dumping Director client response:\n{}", buffered.dump());
        }
        Ok(buffered)
    }

    fn stream_into(
        &self,
        mut response: Response,
        sink: &mut dyn DownloadSink,
    ) -> DirectorResult<HttpResponse> {
        let size = response.content_length();
        let track = sink.track_download();
        let writer: &mut dyn Write = sink;
        let copied = if track {
            let mut tracked = self.file_reporter.track_download(size, writer);
            std::io::copy(response.body_mut(), &mut tracked)
        } else {
            std::io::copy(response.body_mut(), writer)
        };
        copied.map_err(|source| Error::ReadBody { source })?;
        Ok(HttpResponse::new(
            response.status(),
            response.headers().clone(),
            bytes::Bytes::new(),
        ))
    }
}

impl std::fmt::Debug for ClientRequest {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ClientRequest")
            .field("endpoint", &self.endpoint)
            .field("context_id", &self.context_id)
            .finish_non_exhaustive()
    }
}

fn json_payload<P>(payload: &P) -> DirectorResult<(RequestBody, HeaderMap)>
where
    P: Serialize + ?Sized,
{
    let body = serde_json::to_vec(payload).map_err(|source| Error::Serialize { source })?;
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok((RequestBody::from(body), headers))
}

/// Empty bodies decode as JSON `null`, so `()` and `Option<T>` accept `204`.
pub(crate) fn decode<T>(response: &HttpResponse) -> DirectorResult<T>
where
    T: DeserializeOwned,
{
    if response.body().iter().all(u8::is_ascii_whitespace) {
        return serde_json::from_slice(b"null").map_err(|source| Error::Deserialize {
            source,
            body: String::new(),
        });
    }
    response.json()
}

/// Path of a `Location` header. Only the path is kept; the query is dropped.
fn location_path(current: &str, location: &str) -> Option<String> {
    let base = url::Url::parse(current).ok()?;
    let resolved = base.join(location).ok()?;
    Some(resolved.path().to_owned())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use http::{HeaderMap, Method};
    use serde::Deserialize;

    use super::{ClientRequest, DownloadSink, UntrackedSink};
    use crate::error::ErrorCode;
    use crate::reporter::{NoopFileReporter, ProgressFileReporter};
    use crate::test_support::{Reply, ScriptedSender};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Deployment {
        name: String,
    }

    fn client(sender: &Arc<ScriptedSender>) -> ClientRequest {
        ClientRequest::new(
            "https://10.0.0.6:25555",
            sender.clone(),
            Arc::new(NoopFileReporter),
        )
    }

    #[test]
    fn get_decodes_json_and_omits_empty_context() {
        let sender = ScriptedSender::new([Reply::body(200, r#"[{"name":"mysql"}]"#)]);
        let deployments: Vec<Deployment> = client(&sender)
            .get("/deployments?exclude_configs=true")
            .expect("deployments");

        assert_eq!(
            deployments,
            vec![Deployment {
                name: "mysql".to_owned()
            }]
        );
        let seen = sender.seen();
        assert_eq!(seen[0].method, Method::GET);
        assert_eq!(seen[0].path(), "/deployments?exclude_configs=true");
        assert_eq!(seen[0].header("x-bosh-context-id"), None);
    }

    #[test]
    fn context_id_is_set_on_a_copy_only() {
        let sender = ScriptedSender::new([Reply::status(204), Reply::status(204)]);
        let base = client(&sender);
        let scoped = base.with_context("migration-42");

        let mut headers = HeaderMap::new();
        headers.insert("x-bosh-context-id", "caller".parse().expect("header"));
        scoped
            .raw_delete("/deployments/mysql", &headers)
            .expect("deleted");
        base.delete::<()>("/deployments/mysql").expect("deleted");

        let seen = sender.seen();
        assert_eq!(seen[0].header("x-bosh-context-id"), Some("migration-42"));
        assert_eq!(seen[0].headers.get_all("x-bosh-context-id").iter().count(), 1);
        assert_eq!(seen[1].header("x-bosh-context-id"), None);
        assert_eq!(base.context_id(), "");
    }

    #[test]
    fn non_accepted_status_embeds_full_body() {
        let body = format!("{{\"code\":70000,\"description\":\"{}\"}}", "y".repeat(4_096));
        let sender = ScriptedSender::new([Reply::body(500, &body)]);

        let error = client(&sender)
            .raw_get("/info", None, &HeaderMap::new())
            .expect_err("500 rejected");
        assert_eq!(error.code(), ErrorCode::HttpStatus);
        assert_eq!(
            error.to_string(),
            format!("Director responded with non-successful status code '500' response '{body}'")
        );
    }

    #[test]
    fn found_is_followed_with_get_to_location_path() {
        let sender = ScriptedSender::new([
            Reply::status(302).header("location", "https://10.0.0.6:25555/tasks/17"),
            Reply::body(200, r#"{"id":17,"state":"queued"}"#),
        ]);

        let response = client(&sender)
            .raw_post("/deployments", "---\nname: mysql\n", &HeaderMap::new())
            .expect("redirect followed");
        assert_eq!(response.text_lossy(), r#"{"id":17,"state":"queued"}"#);

        let seen = sender.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].method, Method::POST);
        assert_eq!(seen[1].method, Method::GET);
        assert_eq!(seen[1].path(), "/tasks/17");
        assert!(seen[1].body.is_empty());
    }

    #[test]
    fn endless_found_chain_is_cut_off() {
        let replies = (0..12).map(|_| Reply::status(302).header("location", "/tasks/1"));
        let sender = ScriptedSender::new(replies);

        let error = client(&sender)
            .raw_get("/tasks/1", None, &HeaderMap::new())
            .expect_err("loop");
        assert_eq!(error.code(), ErrorCode::RedirectLimitExceeded);
        assert_eq!(sender.seen().len(), 11);
    }

    #[test]
    fn send_errors_are_wrapped_with_method_and_url() {
        let sender = ScriptedSender::new([Reply::Refused]);
        let error = client(&sender)
            .raw_get("/info", None, &HeaderMap::new())
            .expect_err("refused");
        assert_eq!(error.code(), ErrorCode::Transport);
        assert!(
            error
                .to_string()
                .starts_with("error performing request GET 'https://10.0.0.6:25555/info'")
        );
    }

    #[test]
    fn download_is_streamed_through_the_file_reporter() {
        let sender = ScriptedSender::new([
            Reply::body(200, "tarball-bytes").header("content-length", "13"),
        ]);
        let progress = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&progress);
        let client = ClientRequest::new(
            "https://10.0.0.6:25555",
            sender.clone(),
            Arc::new(ProgressFileReporter::new(move |written, total| {
                assert_eq!(total, Some(13));
                counter.store(written as usize, Ordering::SeqCst);
            })),
        );

        let mut sink = Vec::new();
        let response = client
            .raw_get(
                "/resources/abc",
                Some(&mut sink as &mut dyn DownloadSink),
                &HeaderMap::new(),
            )
            .expect("download");
        assert!(response.body().is_empty());
        assert_eq!(sink, b"tarball-bytes");
        assert_eq!(progress.load(Ordering::SeqCst), 13);
    }

    #[test]
    fn untracked_sink_skips_progress() {
        let sender = ScriptedSender::new([Reply::body(200, "manifest")]);
        let client = ClientRequest::new(
            "https://10.0.0.6:25555",
            sender.clone(),
            Arc::new(ProgressFileReporter::new(|_, _| {
                panic!("progress must not be reported");
            })),
        );

        let mut sink = UntrackedSink(Vec::new());
        client
            .raw_get(
                "/deployments/mysql/manifest",
                Some(&mut sink as &mut dyn DownloadSink),
                &HeaderMap::new(),
            )
            .expect("download");
        assert_eq!(sink.0, b"manifest");
    }
}
