use std::sync::Arc;

use tracing::{debug, info};

use crate::DirectorResult;
use crate::auth::{AdjustableClient, AuthAdjustment, Credentials, DirectorRedirect, RequestAdjuster};
use crate::client_request::ClientRequest;
use crate::config::DirectorConfig;
use crate::director::{Director, DirectorClient, Info};
use crate::error::Error;
use crate::proxy::ProxyDialer;
use crate::reporter::{FileReporter, NoopFileReporter, NoopTaskReporter, TaskReporter};
use crate::retry::RetryClient;
use crate::task::TaskClientRequest;
use crate::transport::{Sender, Transport};
use crate::uaa::{UaaClient, UaaTokenSource};

/// Wires transport, retry, auth, dispatcher and task poller for one Director.
///
/// Every client built by the same factory shares one [`ProxyDialer`], so an SSH
/// tunnel is opened at most once per factory.
pub struct DirectorFactory {
    config: DirectorConfig,
    dialer: Arc<ProxyDialer>,
    task_reporter: Arc<dyn TaskReporter>,
    file_reporter: Arc<dyn FileReporter>,
}

impl DirectorFactory {
    pub fn new(config: DirectorConfig) -> DirectorResult<Self> {
        config.validate()?;
        let dialer = ProxyDialer::new(
            config.effective_all_proxy().unwrap_or_default(),
            config.connect_timeout,
        );
        Ok(Self {
            config,
            dialer: Arc::new(dialer),
            task_reporter: Arc::new(NoopTaskReporter),
            file_reporter: Arc::new(NoopFileReporter),
        })
    }

    pub fn with_task_reporter(mut self, task_reporter: Arc<dyn TaskReporter>) -> Self {
        self.task_reporter = task_reporter;
        self
    }

    pub fn with_file_reporter(mut self, file_reporter: Arc<dyn FileReporter>) -> Self {
        self.file_reporter = file_reporter;
        self
    }

    pub fn config(&self) -> &DirectorConfig {
        &self.config
    }

    pub fn dialer(&self) -> &Arc<ProxyDialer> {
        &self.dialer
    }

    pub fn endpoint(&self) -> String {
        self.config.endpoint()
    }

    pub fn build(&self, credentials: Credentials) -> DirectorResult<DirectorClient> {
        let endpoint = self.endpoint();
        let adjuster: Arc<dyn RequestAdjuster> = Arc::new(AuthAdjustment::new(credentials));
        let transport = Transport::new(self.config.transport_settings(), Arc::clone(&self.dialer))
            .with_redirect_hook(Arc::new(DirectorRedirect::new(
                &endpoint,
                Arc::clone(&adjuster),
            )?));
        let retrying = self.retrying(Arc::new(transport));
        let sender: Arc<dyn Sender> = Arc::new(AdjustableClient::new(retrying, adjuster));

        let client_request =
            ClientRequest::new(endpoint, sender, Arc::clone(&self.file_reporter));
        Ok(DirectorClient::new(TaskClientRequest::new(
            client_request,
            Arc::clone(&self.task_reporter),
            self.config.task_poll_interval,
        )))
    }

    /// Asks the Director how it authenticates, then builds a client with the
    /// matching credentials.
    pub fn connect(&self) -> DirectorResult<DirectorClient> {
        let info = self.build(Credentials::Anonymous)?.info()?;
        info!(
            director = %info.name,
            version = %info.version,
            auth = info.auth_type(),
            "connected to director"
        );
        let credentials = self.credentials_for(&info)?;
        self.build(credentials)
    }

    fn credentials_for(&self, info: &Info) -> DirectorResult<Credentials> {
        let client = self.config.client.as_str();
        let secret = self.config.client_secret.as_str();

        if info.is_uaa() {
            let uaa_url = info.uaa_url().ok_or_else(|| Error::Config {
                message: "director uses UAA authentication but did not advertise a UAA url"
                    .to_owned(),
            })?;
            if client.is_empty() || secret.is_empty() {
                return Err(Error::Config {
                    message: "director uses UAA authentication; client and client_secret are \
                              required"
                        .to_owned(),
                });
            }
            debug!(uaa = %uaa_url, "using uaa client credentials");
            let transport =
                Transport::new(self.config.transport_settings(), Arc::clone(&self.dialer));
            let uaa = UaaClient::new(uaa_url, client, secret, self.retrying(Arc::new(transport)));
            return Ok(Credentials::token(Arc::new(UaaTokenSource::new(uaa))));
        }

        if !secret.is_empty() {
            return Ok(Credentials::basic(client, secret));
        }
        Ok(Credentials::Anonymous)
    }

    fn retrying(&self, delegate: Arc<dyn Sender>) -> Arc<dyn Sender> {
        Arc::new(RetryClient::network_safe(
            delegate,
            self.config.retry.max_attempts,
            self.config.retry.delay,
        ))
    }
}

impl std::fmt::Debug for DirectorFactory {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("DirectorFactory")
            .field("config", &self.config)
            .field("dialer", &self.dialer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::DirectorFactory;
    use crate::auth::Credentials;
    use crate::config::DirectorConfig;
    use crate::director::Info;
    use crate::error::ErrorCode;

    fn info(json: &str) -> Info {
        serde_json::from_str(json).expect("info")
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let error = DirectorFactory::new(DirectorConfig::default()).expect_err("no host");
        assert_eq!(error.code(), ErrorCode::Config);
    }

    #[test]
    fn basic_director_uses_client_secret() {
        let factory =
            DirectorFactory::new(DirectorConfig::new("10.0.0.6").with_client("admin", "pw"))
                .expect("factory");
        assert_eq!(factory.endpoint(), "https://10.0.0.6:25555");

        let credentials = factory
            .credentials_for(&info(r#"{"user_authentication":{"type":"basic"}}"#))
            .expect("credentials");
        assert!(matches!(
            credentials,
            Credentials::Basic { ref username, .. } if username == "admin"
        ));
    }

    #[test]
    fn uaa_director_gets_a_token_source() {
        let factory =
            DirectorFactory::new(DirectorConfig::new("10.0.0.6").with_client("ops", "secret"))
                .expect("factory");
        let uaa = info(
            r#"{"user_authentication":{"type":"uaa","options":{"url":"https://10.0.0.6:8443"}}}"#,
        );
        assert!(matches!(
            factory.credentials_for(&uaa).expect("credentials"),
            Credentials::Token(_)
        ));

        let anonymous = DirectorFactory::new(DirectorConfig::new("10.0.0.6")).expect("factory");
        let error = anonymous
            .credentials_for(&uaa)
            .expect_err("client credentials missing");
        assert_eq!(error.code(), ErrorCode::Config);

        let no_url = info(r#"{"user_authentication":{"type":"uaa","options":{}}}"#);
        assert!(factory.credentials_for(&no_url).is_err());
    }

    #[test]
    fn clients_share_the_factory_dialer() {
        let factory = DirectorFactory::new(
            DirectorConfig::new("10.0.0.6").with_all_proxy("socks5://127.0.0.1:1080"),
        )
        .expect("factory");
        assert_eq!(factory.dialer().all_proxy(), "socks5://127.0.0.1:1080");
        let first = factory.build(Credentials::Anonymous).expect("client");
        let second = factory.build(Credentials::Anonymous).expect("client");
        assert_eq!(std::sync::Arc::strong_count(factory.dialer()), 3);
        drop((first, second));
        assert_eq!(std::sync::Arc::strong_count(factory.dialer()), 1);
    }
}
