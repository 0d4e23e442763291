use std::sync::Arc;
use std::time::Duration;

use http::{Method, StatusCode, Uri};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::DirectorResult;
use crate::attempt::{Attempt, AttemptStrategy, Retryable};
use crate::error::{Error, ErrorCode};
use crate::request::Request;
use crate::response::Response;
use crate::transport::Sender;
use crate::util::redact_uri_for_logs;

/// What a classifier gets to look at after one attempt.
#[derive(Debug)]
pub struct RetryDecision<'a> {
    pub attempt: usize,
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub status: Option<StatusCode>,
    pub error: Option<&'a Error>,
}

pub trait RetryClassifier: Send + Sync {
    fn should_retry(&self, decision: &RetryDecision<'_>) -> bool;
}

/// Whether `error` is a failure to reach the Director that another attempt
/// might get past. Redirect loops, bad requests and token failures are final.
fn is_transient(error: &Error) -> bool {
    matches!(
        error.code(),
        ErrorCode::Transport | ErrorCode::Timeout | ErrorCode::ProxyConfig | ErrorCode::Tunnel
    )
}

/// Retries transient send errors and any response outside `2xx`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PermissiveRetryClassifier;

impl RetryClassifier for PermissiveRetryClassifier {
    fn should_retry(&self, decision: &RetryDecision<'_>) -> bool {
        match decision.error {
            Some(error) => is_transient(error),
            None => decision.status.is_some_and(|status| !status.is_success()),
        }
    }
}

/// Retries transient send errors, and gateway failures on reads only.
/// Anything else the Director answered is final.
#[derive(Clone, Copy, Debug, Default)]
pub struct NetworkSafeRetryClassifier;

impl RetryClassifier for NetworkSafeRetryClassifier {
    fn should_retry(&self, decision: &RetryDecision<'_>) -> bool {
        if let Some(error) = decision.error {
            return is_transient(error);
        }
        let safe_method = *decision.method == Method::GET || *decision.method == Method::HEAD;
        safe_method
            && decision.status.is_some_and(|status| {
                matches!(
                    status,
                    StatusCode::BAD_GATEWAY
                        | StatusCode::SERVICE_UNAVAILABLE
                        | StatusCode::GATEWAY_TIMEOUT
                )
            })
    }
}

/// One request driven through an [`AttemptStrategy`].
struct RetryableRequest<'a> {
    id: Uuid,
    attempt: usize,
    request: &'a mut Request,
    delegate: &'a dyn Sender,
    classifier: &'a dyn RetryClassifier,
    last_response: Option<Response>,
}

impl<'a> RetryableRequest<'a> {
    fn new(
        request: &'a mut Request,
        delegate: &'a dyn Sender,
        classifier: &'a dyn RetryClassifier,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempt: 0,
            request,
            delegate,
            classifier,
            last_response: None,
        }
    }

    fn prepare_body(&mut self) -> DirectorResult<()> {
        if self.attempt == 0 {
            return self.request.make_replayable();
        }
        // Closing alone races the next attempt on the same host; read it out first.
        if let Some(previous) = self.last_response.take() {
            previous.discard();
        }
        self.request.rewind_body()
    }
}

impl Retryable for RetryableRequest<'_> {
    type Error = Error;

    fn attempt(&mut self) -> Attempt<Error> {
        if let Err(error) = self.prepare_body() {
            return Attempt::Stop(Err(error));
        }
        self.attempt += 1;

        debug!(
            request_id = %self.id,
            attempt = self.attempt,
            method = %self.request.method(),
            uri = %redact_uri_for_logs(&self.request.uri().to_string()),
            "director request attempt"
        );
        let outcome = self.delegate.send(self.request);

        let decision = RetryDecision {
            attempt: self.attempt,
            method: self.request.method(),
            uri: self.request.uri(),
            status: outcome.as_ref().ok().map(Response::status),
            error: outcome.as_ref().err(),
        };
        let retry = self.classifier.should_retry(&decision);
        if retry {
            match &outcome {
                Ok(response) => warn!(
                    request_id = %self.id,
                    attempt = self.attempt,
                    status = response.status().as_u16(),
                    "retryable director response"
                ),
                Err(error) => warn!(
                    request_id = %self.id,
                    attempt = self.attempt,
                    error = %error,
                    "director request failed"
                ),
            }
        }

        let result = match outcome {
            Ok(response) => {
                self.last_response = Some(response);
                Ok(())
            }
            Err(error) => Err(error),
        };
        if retry {
            Attempt::Retry(result)
        } else {
            Attempt::Stop(result)
        }
    }
}

/// Re-sends a request while the classifier says another attempt may help.
pub struct RetryClient {
    delegate: Arc<dyn Sender>,
    strategy: AttemptStrategy,
    classifier: Arc<dyn RetryClassifier>,
}

impl RetryClient {
    pub fn new(delegate: Arc<dyn Sender>, max_attempts: usize, delay: Duration) -> Self {
        Self {
            delegate,
            strategy: AttemptStrategy::new(max_attempts, delay),
            classifier: Arc::new(PermissiveRetryClassifier),
        }
    }

    pub fn network_safe(delegate: Arc<dyn Sender>, max_attempts: usize, delay: Duration) -> Self {
        Self::new(delegate, max_attempts, delay)
            .with_classifier(Arc::new(NetworkSafeRetryClassifier))
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn RetryClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn strategy(&self) -> AttemptStrategy {
        self.strategy
    }
}

impl Sender for RetryClient {
    fn send(&self, request: &mut Request) -> DirectorResult<Response> {
        let mut unit =
            RetryableRequest::new(request, self.delegate.as_ref(), self.classifier.as_ref());
        let result = self.strategy.run(&mut unit);
        match (result, unit.last_response) {
            (Ok(()), Some(response)) => Ok(response),
            (Err(error), _) => Err(error),
            (Ok(()), None) => Err(Error::body_replay("retry loop finished without a response")),
        }
    }
}
