use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::header::AUTHORIZATION;
use http::uri::Authority;
use http::{StatusCode, Uri};
use tracing::debug;

use crate::DirectorResult;
use crate::error::Error;
use crate::request::Request;
use crate::response::{RequestSummary, Response};
use crate::transport::{RedirectHook, RedirectLimit, Sender};
use crate::util::{parse_uri, sensitive_header_value};

/// Attaches credentials to outgoing requests.
pub trait RequestAdjuster: Send + Sync {
    /// `retried` asks for fresh credentials instead of cached ones.
    fn adjust(&self, request: &mut Request, retried: bool) -> DirectorResult<()>;

    fn needs_readjustment(&self, response: &Response) -> bool {
        response.status() == StatusCode::UNAUTHORIZED
    }
}

/// Produces a complete `Authorization` header value, e.g. `bearer eyJ...`.
pub trait TokenSource: Send + Sync {
    fn token(&self, retried: bool) -> DirectorResult<String>;
}

#[derive(Clone)]
pub enum Credentials {
    Anonymous,
    Basic { username: String, secret: String },
    Token(Arc<dyn TokenSource>),
}

impl Credentials {
    pub fn basic(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub fn token(source: Arc<dyn TokenSource>) -> Self {
        Self::Token(source)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => formatter.write_str("Anonymous"),
            Self::Basic { username, .. } => formatter
                .debug_struct("Basic")
                .field("username", username)
                .field("secret", &"[REDACTED]")
                .finish(),
            Self::Token(_) => formatter.write_str("Token(..)"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthAdjustment {
    credentials: Credentials,
}

impl AuthAdjustment {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

impl RequestAdjuster for AuthAdjustment {
    fn adjust(&self, request: &mut Request, retried: bool) -> DirectorResult<()> {
        let value = match &self.credentials {
            Credentials::Anonymous => return Ok(()),
            Credentials::Basic { username, secret } => {
                format!("Basic {}", STANDARD.encode(format!("{username}:{secret}")))
            }
            Credentials::Token(source) => source.token(retried)?,
        };
        request
            .headers_mut()
            .insert(AUTHORIZATION, sensitive_header_value("authorization", &value)?);
        Ok(())
    }
}

/// Adds credentials before sending and retries exactly once when the Director
/// rejects them with `401`.
pub struct AdjustableClient {
    delegate: Arc<dyn Sender>,
    adjuster: Arc<dyn RequestAdjuster>,
}

impl AdjustableClient {
    pub fn new(delegate: Arc<dyn Sender>, adjuster: Arc<dyn RequestAdjuster>) -> Self {
        Self { delegate, adjuster }
    }
}

impl Sender for AdjustableClient {
    fn send(&self, request: &mut Request) -> DirectorResult<Response> {
        let retried = !request.body().is_empty();
        self.adjuster.adjust(request, retried)?;

        let response = self.delegate.send(request)?;
        if !self.adjuster.needs_readjustment(&response) {
            return Ok(response);
        }

        debug!(
            method = %request.method(),
            status = response.status().as_u16(),
            "director rejected credentials, re-authenticating once"
        );
        response.discard();
        request.rewind_body()?;
        self.adjuster.adjust(request, true)?;
        self.delegate.send(request)
    }
}

/// Redirect policy for Director connections: re-authenticates every hop, pins it
/// to the Director endpoint, and strips everything but `Authorization`.
pub struct DirectorRedirect {
    authority: Authority,
    adjuster: Arc<dyn RequestAdjuster>,
    limit: RedirectLimit,
}

impl DirectorRedirect {
    pub fn new(endpoint: &str, adjuster: Arc<dyn RequestAdjuster>) -> DirectorResult<Self> {
        let uri = parse_uri(endpoint)?;
        let authority = uri.authority().cloned().ok_or_else(|| Error::InvalidUri {
            uri: endpoint.to_owned(),
        })?;
        Ok(Self {
            authority,
            adjuster,
            limit: RedirectLimit::default(),
        })
    }
}

impl RedirectHook for DirectorRedirect {
    fn check_redirect(&self, next: &mut Request, via: &[RequestSummary]) -> DirectorResult<()> {
        self.limit.check_redirect(next, via)?;
        self.adjuster.adjust(next, true)?;

        let mut parts = next.uri().clone().into_parts();
        parts.authority = Some(self.authority.clone());
        let uri = Uri::from_parts(parts).map_err(|_| Error::InvalidUri {
            uri: next.uri().to_string(),
        })?;
        next.set_uri(uri);

        let authorization = next.headers().get(AUTHORIZATION).cloned();
        next.headers_mut().clear();
        if let Some(authorization) = authorization {
            next.headers_mut().insert(AUTHORIZATION, authorization);
        }
        next.clear_body();
        Ok(())
    }
}
