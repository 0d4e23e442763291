use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::DirectorResult;
use crate::error::Error;
use crate::proxy::ALL_PROXY_ENV;
use crate::task::DEFAULT_POLL_INTERVAL;
use crate::tls::TlsSettings;
use crate::transport::{DEFAULT_CONNECT_TIMEOUT, TransportSettings};

pub const DEFAULT_DIRECTOR_PORT: u16 = 25555;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: usize,
    #[serde(with = "duration_ms")]
    pub delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(500),
        }
    }
}

/// Where the Director lives and how to reach it. Durations are milliseconds on
/// the wire.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorConfig {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub ca_cert: Option<String>,
    pub insecure_skip_verify: bool,
    pub client: String,
    pub client_secret: String,
    pub all_proxy: Option<String>,
    pub retry: RetrySettings,
    #[serde(with = "duration_ms")]
    pub task_poll_interval: Duration,
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    #[serde(with = "optional_duration_ms")]
    pub request_timeout: Option<Duration>,
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            scheme: "https".to_owned(),
            host: String::new(),
            port: DEFAULT_DIRECTOR_PORT,
            ca_cert: None,
            insecure_skip_verify: false,
            client: String::new(),
            client_secret: String::new(),
            all_proxy: None,
            retry: RetrySettings::default(),
            task_poll_interval: DEFAULT_POLL_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: None,
        }
    }
}

impl DirectorConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn with_ca_cert(mut self, ca_cert: impl Into<String>) -> Self {
        self.ca_cert = Some(ca_cert.into());
        self
    }

    pub fn with_insecure_skip_verify(mut self, insecure_skip_verify: bool) -> Self {
        self.insecure_skip_verify = insecure_skip_verify;
        self
    }

    pub fn with_client(
        mut self,
        client: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.client = client.into();
        self.client_secret = client_secret.into();
        self
    }

    pub fn with_all_proxy(mut self, all_proxy: impl Into<String>) -> Self {
        self.all_proxy = Some(all_proxy.into());
        self
    }

    pub fn with_retry(mut self, max_attempts: usize, delay: Duration) -> Self {
        self.retry = RetrySettings {
            max_attempts,
            delay,
        };
        self
    }

    pub fn with_task_poll_interval(mut self, task_poll_interval: Duration) -> Self {
        self.task_poll_interval = task_poll_interval;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = Some(request_timeout);
        self
    }

    pub fn validate(&self) -> DirectorResult<()> {
        if self.host.trim().is_empty() {
            return Err(config_error("director host must not be empty"));
        }
        if self.port == 0 {
            return Err(config_error("director port must not be zero"));
        }
        if !matches!(self.scheme.as_str(), "https" | "http") {
            return Err(config_error(format!(
                "unsupported director scheme '{}'",
                self.scheme
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(config_error("retry max_attempts must be at least 1"));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> String {
        let host = self.host.trim();
        if host.contains(':') && !host.starts_with('[') {
            format!("{}://[{host}]:{}", self.scheme, self.port)
        } else {
            format!("{}://{host}:{}", self.scheme, self.port)
        }
    }

    /// Configured `all_proxy`, or `BOSH_ALL_PROXY` when none is configured.
    pub fn effective_all_proxy(&self) -> Option<String> {
        resolve_all_proxy(self.all_proxy.as_deref(), std::env::var(ALL_PROXY_ENV).ok())
    }

    pub fn tls_settings(&self) -> TlsSettings {
        TlsSettings {
            ca_cert: self.ca_cert.clone(),
            insecure_skip_verify: self.insecure_skip_verify,
        }
    }

    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            tls: self.tls_settings(),
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            ..TransportSettings::default()
        }
    }
}

impl std::fmt::Debug for DirectorConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("DirectorConfig")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("ca_cert", &self.ca_cert.as_ref().map(|_| "<pem>"))
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("client", &self.client)
            .field("client_secret", &"[REDACTED]")
            .field("all_proxy", &self.all_proxy.as_ref().map(|_| "[REDACTED]"))
            .field("retry", &self.retry)
            .field("task_poll_interval", &self.task_poll_interval)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

fn config_error(message: impl Into<String>) -> Error {
    Error::Config {
        message: message.into(),
    }
}

fn resolve_all_proxy(configured: Option<&str>, from_env: Option<String>) -> Option<String> {
    configured
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .or_else(|| from_env.filter(|value| !value.trim().is_empty()))
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod optional_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => {
                serializer.serialize_some(&u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
            }
            None => serializer.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|value| value.map(Duration::from_millis))
    }
}
