use std::sync::{Arc, RwLock};
use std::time::Duration;

use http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, PROXY_AUTHORIZATION};
use http::Method;
use tracing::debug;

use crate::DirectorResult;
use crate::error::{Error, TransportErrorKind};
use crate::proxy::{DialRoute, ProxyDialer};
use crate::replay::BodyReader;
use crate::request::{Request, RequestBody};
use crate::response::{RequestSummary, Response};
use crate::tls::{TlsSettings, build_tls_config};
use crate::util::{
    is_redirect_status, read_unpoisoned, redact_uri_for_logs, redirect_location, redirect_method,
    resolve_redirect_uri, same_origin, write_unpoisoned,
};

pub const DEFAULT_MAX_REDIRECTS: usize = 10;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Anything that can turn a [`Request`] into a [`Response`].
///
/// Every layer of the client stack implements this and wraps the next one down.
pub trait Sender: Send + Sync {
    fn send(&self, request: &mut Request) -> DirectorResult<Response>;
}

impl<S> Sender for Arc<S>
where
    S: Sender + ?Sized,
{
    fn send(&self, request: &mut Request) -> DirectorResult<Response> {
        (**self).send(request)
    }
}

/// Consulted before a redirect is followed. `via` holds every request already sent
/// for this logical request, oldest first.
pub trait RedirectHook: Send + Sync {
    fn check_redirect(&self, next: &mut Request, via: &[RequestSummary]) -> DirectorResult<()>;
}

#[derive(Clone, Copy, Debug)]
pub struct RedirectLimit {
    max_redirects: usize,
}

impl RedirectLimit {
    pub const fn new(max_redirects: usize) -> Self {
        Self { max_redirects }
    }
}

impl Default for RedirectLimit {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REDIRECTS)
    }
}

impl RedirectHook for RedirectLimit {
    fn check_redirect(&self, next: &mut Request, via: &[RequestSummary]) -> DirectorResult<()> {
        if via.len() > self.max_redirects {
            return Err(Error::RedirectLimitExceeded {
                max_redirects: self.max_redirects,
                method: next.method().clone(),
                uri: redact_uri_for_logs(&next.uri().to_string()),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct TransportSettings {
    pub tls: TlsSettings,
    pub connect_timeout: Duration,
    /// Upper bound for a whole exchange. `None` leaves long downloads unbounded.
    pub request_timeout: Option<Duration>,
    pub user_agent: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            tls: TlsSettings::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: None,
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

/// Bottom of the stack: one HTTP exchange over a fresh connection, plus redirects.
///
/// Connections are never pooled, so a Director restart or a dropped tunnel never
/// leaves a stale socket behind for the next attempt. The agent is built on the first
/// send, after the dialer has produced a route.
pub struct Transport {
    settings: TransportSettings,
    dialer: Arc<ProxyDialer>,
    redirect_hook: Arc<dyn RedirectHook>,
    agent: RwLock<Option<ureq::Agent>>,
}

impl Transport {
    pub fn new(settings: TransportSettings, dialer: Arc<ProxyDialer>) -> Self {
        Self {
            settings,
            dialer,
            redirect_hook: Arc::new(RedirectLimit::default()),
            agent: RwLock::new(None),
        }
    }

    pub fn with_redirect_hook(mut self, redirect_hook: Arc<dyn RedirectHook>) -> Self {
        self.redirect_hook = redirect_hook;
        self
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    fn agent(&self) -> DirectorResult<ureq::Agent> {
        if let Some(agent) = read_unpoisoned(&self.agent).as_ref() {
            return Ok(agent.clone());
        }

        let mut cached = write_unpoisoned(&self.agent);
        if let Some(agent) = cached.as_ref() {
            return Ok(agent.clone());
        }
        let proxy = match self.dialer.dial()? {
            DialRoute::Direct => None,
            DialRoute::Proxy(url) => Some(ureq::Proxy::new(&url).map_err(|source| {
                Error::ProxyConfig {
                    message: format!("invalid proxy url '{}': {source}", redact_uri_for_logs(&url)),
                }
            })?),
        };
        let agent = make_agent(&self.settings, proxy)?;
        *cached = Some(agent.clone());
        Ok(agent)
    }

    fn run_once(&self, agent: &ureq::Agent, request: &mut Request) -> DirectorResult<Response> {
        let method = request.method().clone();
        let uri_text = request.uri().to_string();
        let mut builder = ureq::http::Request::builder()
            .method(method.clone())
            .uri(uri_text.as_str());
        for (name, value) in request.headers() {
            builder = builder.header(name, value);
        }

        debug!(method = %method, uri = %redact_uri_for_logs(&uri_text), "sending director request");
        match outgoing_body(request)? {
            OutgoingBody::Empty => {
                let request = builder
                    .body(())
                    .map_err(|source| Error::RequestBuild { source })?;
                self.run(agent, request, &method, &uri_text)
            }
            OutgoingBody::Bytes(bytes) => {
                let request = builder
                    .body(bytes)
                    .map_err(|source| Error::RequestBuild { source })?;
                self.run(agent, request, &method, &uri_text)
            }
            OutgoingBody::Borrowed(mut reader) => {
                let request = builder
                    .body(ureq::SendBody::from_reader(&mut reader))
                    .map_err(|source| Error::RequestBuild { source })?;
                self.run(agent, request, &method, &uri_text)
            }
            OutgoingBody::Owned(reader) => {
                let request = builder
                    .body(ureq::SendBody::from_owned_reader(reader))
                    .map_err(|source| Error::RequestBuild { source })?;
                self.run(agent, request, &method, &uri_text)
            }
        }
    }

    fn run<S: ureq::AsSendBody>(
        &self,
        agent: &ureq::Agent,
        request: ureq::http::Request<S>,
        method: &Method,
        uri_text: &str,
    ) -> DirectorResult<Response> {
        let response = agent.run(request).map_err(|source| match source {
            ureq::Error::Timeout(_) => Error::Timeout {
                timeout_ms: self
                    .settings
                    .request_timeout
                    .unwrap_or(self.settings.connect_timeout)
                    .as_millis(),
                method: method.clone(),
                uri: redact_uri_for_logs(uri_text),
            },
            other => Error::Transport {
                kind: classify_ureq_transport_error(&other),
                method: method.clone(),
                uri: redact_uri_for_logs(uri_text),
                source: Box::new(other),
            },
        })?;
        let (parts, body) = response.into_parts();
        Ok(Response::new(parts.status, parts.headers, body.into_reader()))
    }
}

impl Sender for Transport {
    fn send(&self, request: &mut Request) -> DirectorResult<Response> {
        let agent = self.agent()?;
        let mut via: Vec<RequestSummary> = Vec::new();
        let mut redirected: Option<Request> = None;

        loop {
            let current = match redirected.as_mut() {
                Some(next) => next,
                None => &mut *request,
            };
            let summary = RequestSummary::capture(current);
            let response = self
                .run_once(&agent, current)?
                .with_request(summary.clone());
            if !is_redirect_status(response.status()) {
                return Ok(response);
            }

            let Some(mut next) = next_request(current, &response)? else {
                return Ok(response);
            };
            debug!(
                status = response.status().as_u16(),
                from = %summary.uri(),
                to = %redact_uri_for_logs(&next.uri().to_string()),
                "following redirect"
            );
            response.discard();
            via.push(summary);
            self.redirect_hook.check_redirect(&mut next, &via)?;
            redirected = Some(next);
        }
    }
}

enum OutgoingBody<'a> {
    Empty,
    Bytes(Vec<u8>),
    Borrowed(BodyReader<'a>),
    Owned(Box<dyn std::io::Read + Send + Sync>),
}

fn outgoing_body(request: &mut Request) -> DirectorResult<OutgoingBody<'_>> {
    if matches!(request.body(), RequestBody::Seekable(_)) {
        return request.regenerate_body().map(OutgoingBody::Borrowed);
    }
    // A one-shot stream is handed over whole; the request keeps a tombstone.
    match std::mem::replace(request.body_mut(), RequestBody::Consumed) {
        RequestBody::Stream(reader) => Ok(OutgoingBody::Owned(reader)),
        RequestBody::Consumed => Err(Error::body_replay(
            "request body was already sent and is not replayable",
        )),
        other => {
            let outgoing = match &other {
                RequestBody::Buffered(body) => OutgoingBody::Bytes(body.to_vec()),
                _ => OutgoingBody::Empty,
            };
            *request.body_mut() = other;
            Ok(outgoing)
        }
    }
}

/// Builds the follow-up request for a redirect response, or `None` when the body
/// would have to be sent again and cannot be.
fn next_request(current: &Request, response: &Response) -> DirectorResult<Option<Request>> {
    let status = response.status();
    let location =
        redirect_location(response.headers()).ok_or_else(|| Error::MissingRedirectLocation {
            status: status.as_u16(),
            method: current.method().clone(),
            uri: redact_uri_for_logs(&current.uri().to_string()),
        })?;
    let uri = resolve_redirect_uri(current.uri(), &location).ok_or_else(|| {
        Error::InvalidRedirectLocation {
            location: location.clone(),
            method: current.method().clone(),
            uri: redact_uri_for_logs(&current.uri().to_string()),
        }
    })?;
    let method = redirect_method(current.method(), status);

    let body = if method == *current.method() {
        match current.body() {
            RequestBody::Empty => RequestBody::Empty,
            RequestBody::Buffered(body) => RequestBody::Buffered(body.clone()),
            _ => return Ok(None),
        }
    } else {
        RequestBody::Empty
    };
    let body_dropped = body.is_empty();

    let mut next = Request::new(method, uri)
        .with_headers(current.headers())
        .with_body(body);
    if body_dropped {
        next.headers_mut().remove(CONTENT_LENGTH);
        next.headers_mut().remove(CONTENT_TYPE);
    }
    if !same_origin(current.uri(), next.uri()) {
        next.headers_mut().remove(AUTHORIZATION);
        next.headers_mut().remove(PROXY_AUTHORIZATION);
        next.headers_mut().remove(COOKIE);
    }
    Ok(Some(next))
}

fn make_agent(
    settings: &TransportSettings,
    proxy: Option<ureq::Proxy>,
) -> DirectorResult<ureq::Agent> {
    let tls_config = build_tls_config(&settings.tls)?;
    let config = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .user_agent(settings.user_agent.as_str())
        .max_redirects(0)
        .max_redirects_will_error(false)
        .max_idle_connections(0)
        .max_idle_connections_per_host(0)
        .timeout_connect(Some(settings.connect_timeout))
        .timeout_global(settings.request_timeout)
        .tls_config(tls_config)
        .proxy(proxy)
        .build();
    Ok(config.new_agent())
}

fn classify_ureq_transport_error(error: &ureq::Error) -> TransportErrorKind {
    match error {
        ureq::Error::HostNotFound => TransportErrorKind::Dns,
        ureq::Error::Tls(_) | ureq::Error::Rustls(_) | ureq::Error::Pem(_) => {
            TransportErrorKind::Tls
        }
        ureq::Error::ConnectProxyFailed(_) | ureq::Error::InvalidProxyUrl => {
            TransportErrorKind::Proxy
        }
        ureq::Error::ConnectionFailed => TransportErrorKind::Connect,
        ureq::Error::Io(source) => match source.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                TransportErrorKind::Read
            }
            std::io::ErrorKind::NotFound => TransportErrorKind::Dns,
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::AddrNotAvailable => TransportErrorKind::Connect,
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => TransportErrorKind::Read,
            _ => TransportErrorKind::Other,
        },
        _ => TransportErrorKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::Bytes;
    use http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue, LOCATION};
    use http::{HeaderMap, Method, StatusCode};

    use super::{RedirectHook, RedirectLimit, next_request};
    use crate::error::ErrorCode;
    use crate::request::{Request, RequestBody};
    use crate::response::{RequestSummary, Response};

    fn redirect(status: StatusCode, location: &str) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_str(location).expect("location"));
        Response::from_bytes(status, headers, Bytes::new())
    }

    fn authorized_post() -> Request {
        let mut request = Request::new(
            Method::POST,
            "https://10.0.0.6:25555/deployments".parse().expect("uri"),
        )
        .with_body("---\nname: mysql\n");
        request
            .headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static("bearer token"));
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/yaml"));
        request
    }

    #[test]
    fn found_after_post_becomes_bodyless_get() {
        let current = authorized_post();
        let next = next_request(&current, &redirect(StatusCode::FOUND, "/tasks/17"))
            .expect("redirect")
            .expect("followed");

        assert_eq!(next.method(), Method::GET);
        assert_eq!(next.uri().to_string(), "https://10.0.0.6:25555/tasks/17");
        assert!(next.body().is_empty());
        assert!(next.headers().get(CONTENT_TYPE).is_none());
        assert!(next.headers().get(AUTHORIZATION).is_some());
    }

    #[test]
    fn temporary_redirect_keeps_method_and_buffered_body() {
        let current = authorized_post();
        let next = next_request(
            &current,
            &redirect(StatusCode::TEMPORARY_REDIRECT, "/deployments?redirected=1"),
        )
        .expect("redirect")
        .expect("followed");

        assert_eq!(next.method(), Method::POST);
        let RequestBody::Buffered(body) = next.body() else {
            panic!("expected buffered body");
        };
        assert_eq!(body.as_ref(), b"---\nname: mysql\n");
    }

    #[test]
    fn temporary_redirect_with_stream_body_is_not_followed() {
        let current = Request::new(
            Method::PUT,
            "https://10.0.0.6:25555/deployments".parse().expect("uri"),
        )
        .with_body(RequestBody::stream(Cursor::new(b"payload".to_vec())));
        let next = next_request(&current, &redirect(StatusCode::TEMPORARY_REDIRECT, "/other"))
            .expect("redirect");
        assert!(next.is_none());
    }

    #[test]
    fn cross_origin_redirect_drops_credentials() {
        let current = authorized_post();
        let next = next_request(
            &current,
            &redirect(StatusCode::SEE_OTHER, "https://uaa.example.com:8443/login"),
        )
        .expect("redirect")
        .expect("followed");
        assert!(next.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn missing_location_is_an_error() {
        let current = authorized_post();
        let response = Response::from_bytes(StatusCode::FOUND, HeaderMap::new(), Bytes::new());
        let error = next_request(&current, &response).expect_err("no location");
        assert_eq!(error.code(), ErrorCode::MissingRedirectLocation);
    }

    #[test]
    fn redirect_limit_allows_ten_hops() {
        let limit = RedirectLimit::default();
        let mut next = Request::new(
            Method::GET,
            "https://10.0.0.6:25555/info".parse().expect("uri"),
        );
        let hop = RequestSummary::capture(&next);

        let ten = vec![hop.clone(); 10];
        assert!(limit.check_redirect(&mut next, &ten).is_ok());

        let eleven = vec![hop; 11];
        let error = limit
            .check_redirect(&mut next, &eleven)
            .expect_err("eleventh hop");
        assert_eq!(error.code(), ErrorCode::RedirectLimitExceeded);
        assert!(error.to_string().contains("too many redirects"));
    }
}
