use std::sync::{Arc, RwLock};

use http::header::{ACCEPT, CONTENT_TYPE, HeaderValue};
use http::Method;
use serde::Deserialize;
use tracing::debug;

use crate::DirectorResult;
use crate::auth::{AuthAdjustment, Credentials, RequestAdjuster, TokenSource};
use crate::error::Error;
use crate::request::Request;
use crate::transport::Sender;
use crate::util::{
    join_endpoint_path, parse_uri, read_unpoisoned, redact_uri_for_logs, write_unpoisoned,
};

#[derive(Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

fn default_token_type() -> String {
    "bearer".to_owned()
}

impl AccessToken {
    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AccessToken")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Client-credentials grant against UAA.
pub struct UaaClient {
    token_url: String,
    client_auth: AuthAdjustment,
    sender: Arc<dyn Sender>,
}

impl UaaClient {
    pub fn new(
        uaa_url: &str,
        client: impl Into<String>,
        client_secret: impl Into<String>,
        sender: Arc<dyn Sender>,
    ) -> Self {
        Self {
            token_url: join_endpoint_path(uaa_url, "/oauth/token"),
            client_auth: AuthAdjustment::new(Credentials::basic(client, client_secret)),
            sender,
        }
    }

    pub fn client_credentials_token(&self) -> DirectorResult<AccessToken> {
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "client_credentials")
            .append_pair("response_type", "token")
            .finish();

        let mut request = Request::new(Method::POST, parse_uri(&self.token_url)?).with_body(form);
        request
            .headers_mut()
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        request.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        self.client_auth.adjust(&mut request, false)?;

        let uri = redact_uri_for_logs(&self.token_url);
        let response = self
            .sender
            .send(&mut request)
            .and_then(|response| response.read_body())
            .map_err(|source| Error::Token {
                message: format!("requesting token from {uri}"),
                source: Some(Box::new(source)),
            })?;
        if !response.status().is_success() {
            return Err(Error::Token {
                message: format!("requesting token from {uri}"),
                source: Some(Box::new(Error::HttpStatus {
                    status: response.status().as_u16(),
                    body: response.text_lossy(),
                })),
            });
        }
        debug!(uri = %uri, "obtained uaa access token");
        response.json()
    }
}

impl std::fmt::Debug for UaaClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("UaaClient")
            .field("token_url", &self.token_url)
            .field("client_auth", &self.client_auth)
            .finish_non_exhaustive()
    }
}

/// Caches the last token; a retried adjustment always fetches a new one.
pub struct UaaTokenSource {
    client: UaaClient,
    cached: RwLock<Option<String>>,
}

impl UaaTokenSource {
    pub fn new(client: UaaClient) -> Self {
        Self {
            client,
            cached: RwLock::new(None),
        }
    }
}

impl TokenSource for UaaTokenSource {
    fn token(&self, retried: bool) -> DirectorResult<String> {
        if !retried && let Some(token) = read_unpoisoned(&self.cached).clone() {
            return Ok(token);
        }
        // No lock is held while UAA answers; concurrent refreshes each fetch
        // and the last one written wins.
        let token = self.client.client_credentials_token()?.authorization();
        *write_unpoisoned(&self.cached) = Some(token.clone());
        Ok(token)
    }
}

impl std::fmt::Debug for UaaTokenSource {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("UaaTokenSource")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}
