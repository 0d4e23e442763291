use http::{Method, StatusCode};
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Proxy,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Proxy => "proxy",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStage {
    State,
    Output,
    Result,
}

impl std::fmt::Display for TaskStage {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::State => "getting task state",
            Self::Output => "getting task output",
            Self::Result => "getting task result",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidUri,
    RequestBuild,
    InvalidHeaderValue,
    Transport,
    Timeout,
    BodyReplay,
    ReadBody,
    HttpStatus,
    Serialize,
    Deserialize,
    TlsConfig,
    ProxyConfig,
    Tunnel,
    Token,
    MissingRedirectLocation,
    InvalidRedirectLocation,
    RedirectLimitExceeded,
    TaskFailed,
    DeploymentNotFound,
    InvalidTimestamp,
    Config,
    DeadlineExceeded,
    Worker,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUri => "invalid_uri",
            Self::RequestBuild => "request_build",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::BodyReplay => "body_replay",
            Self::ReadBody => "read_body",
            Self::HttpStatus => "http_status",
            Self::Serialize => "serialize",
            Self::Deserialize => "deserialize",
            Self::TlsConfig => "tls_config",
            Self::ProxyConfig => "proxy_config",
            Self::Tunnel => "tunnel",
            Self::Token => "token",
            Self::MissingRedirectLocation => "missing_redirect_location",
            Self::InvalidRedirectLocation => "invalid_redirect_location",
            Self::RedirectLimitExceeded => "redirect_limit_exceeded",
            Self::TaskFailed => "task_failed",
            Self::DeploymentNotFound => "deployment_not_found",
            Self::InvalidTimestamp => "invalid_timestamp",
            Self::Config => "config",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Worker => "worker",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("{kind} transport failure for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("request timed out after {timeout_ms}ms for {method} {uri}")]
    Timeout {
        timeout_ms: u128,
        method: Method,
        uri: String,
    },
    #[error("error performing request {method} '{uri}': {source}")]
    Request {
        method: Method,
        uri: String,
        #[source]
        source: Box<Error>,
    },
    #[error("request body cannot be replayed: {message}")]
    BodyReplay {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
    #[error("reading director response: {source}")]
    ReadBody {
        #[source]
        source: std::io::Error,
    },
    #[error("Director responded with non-successful status code '{status}' response '{body}'")]
    HttpStatus { status: u16, body: String },
    #[error("marshaling request payload: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("unmarshaling director response: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
    #[error("invalid tls configuration: {message}")]
    TlsConfig { message: String },
    #[error("invalid all_proxy configuration: {message}")]
    ProxyConfig { message: String },
    #[error("creating SOCKS5 dialer through {target}: {source}")]
    Tunnel {
        target: String,
        #[source]
        source: std::io::Error,
    },
    #[error("getting access token: {message}")]
    Token {
        message: String,
        #[source]
        source: Option<Box<Error>>,
    },
    #[error("redirect response {status} missing location header for {method} {uri}")]
    MissingRedirectLocation {
        status: u16,
        method: Method,
        uri: String,
    },
    #[error("invalid redirect location {location} for {method} {uri}")]
    InvalidRedirectLocation {
        location: String,
        method: Method,
        uri: String,
    },
    #[error("too many redirects ({max_redirects}) for {method} {uri}")]
    RedirectLimitExceeded {
        max_redirects: usize,
        method: Method,
        uri: String,
    },
    #[error("expected task '{id}' to succeed but state is '{state}'")]
    TaskFailed { id: u64, state: String },
    #[error("{stage} for task '{id}': {source}")]
    Task {
        id: u64,
        stage: TaskStage,
        #[source]
        source: Box<Error>,
    },
    #[error("deployment '{name}' not found")]
    DeploymentNotFound { name: String },
    #[error("converting {field} '{value}' to time: {source}")]
    InvalidTimestamp {
        field: &'static str,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("invalid director configuration: {message}")]
    Config { message: String },
    #[error("{operation} did not finish within {timeout_ms}ms")]
    DeadlineExceeded { operation: String, timeout_ms: u128 },
    #[error("{operation} worker failed: {message}")]
    Worker { operation: String, message: String },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Request { source, .. } => source.code(),
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::BodyReplay { .. } => ErrorCode::BodyReplay,
            Self::ReadBody { .. } => ErrorCode::ReadBody,
            Self::HttpStatus { .. } => ErrorCode::HttpStatus,
            Self::Serialize { .. } => ErrorCode::Serialize,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
            Self::TlsConfig { .. } => ErrorCode::TlsConfig,
            Self::ProxyConfig { .. } => ErrorCode::ProxyConfig,
            Self::Tunnel { .. } => ErrorCode::Tunnel,
            Self::Token { .. } => ErrorCode::Token,
            Self::MissingRedirectLocation { .. } => ErrorCode::MissingRedirectLocation,
            Self::InvalidRedirectLocation { .. } => ErrorCode::InvalidRedirectLocation,
            Self::RedirectLimitExceeded { .. } => ErrorCode::RedirectLimitExceeded,
            Self::TaskFailed { .. } => ErrorCode::TaskFailed,
            Self::Task { source, .. } => source.code(),
            Self::DeploymentNotFound { .. } => ErrorCode::DeploymentNotFound,
            Self::InvalidTimestamp { .. } => ErrorCode::InvalidTimestamp,
            Self::Config { .. } => ErrorCode::Config,
            Self::DeadlineExceeded { .. } => ErrorCode::DeadlineExceeded,
            Self::Worker { .. } => ErrorCode::Worker,
        }
    }

    /// Status of the director response behind this error, looking through wrappers.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::HttpStatus { status, .. } => StatusCode::from_u16(*status).ok(),
            Self::Request { source, .. } | Self::Task { source, .. } => source.status(),
            Self::Token {
                source: Some(source),
                ..
            } => source.status(),
            _ => None,
        }
    }

    pub(crate) fn body_replay(message: impl Into<String>) -> Self {
        Self::BodyReplay {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn wrap_request(self, method: &Method, uri: &str) -> Self {
        Self::Request {
            method: method.clone(),
            uri: uri.to_owned(),
            source: Box::new(self),
        }
    }

    pub(crate) fn wrap_task(self, id: u64, stage: TaskStage) -> Self {
        Self::Task {
            id,
            stage,
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use http::{Method, StatusCode};

    use super::{Error, ErrorCode, TaskStage};

    #[test]
    fn status_is_found_through_request_and_task_wrappers() {
        let error = Error::HttpStatus {
            status: 416,
            body: String::new(),
        }
        .wrap_request(&Method::GET, "https://director:25555/tasks/1/output")
        .wrap_task(1, TaskStage::Output);

        assert_eq!(error.status(), Some(StatusCode::RANGE_NOT_SATISFIABLE));
        assert_eq!(error.code(), ErrorCode::HttpStatus);
    }

    #[test]
    fn status_error_message_keeps_the_full_body() {
        let body = "x".repeat(10_000);
        let error = Error::HttpStatus {
            status: 500,
            body: body.clone(),
        };

        let message = error.to_string();
        assert!(message.starts_with("Director responded with non-successful status code '500'"));
        assert!(message.contains(&body));
    }

    #[test]
    fn task_failure_names_id_and_state() {
        let error = Error::TaskFailed {
            id: 42,
            state: "cancelled".to_owned(),
        };
        assert_eq!(
            error.to_string(),
            "expected task '42' to succeed but state is 'cancelled'"
        );
        assert_eq!(error.code().as_str(), "task_failed");
    }
}
