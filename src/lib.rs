//! `service-migrator` carries the BOSH Director client stack used to move Cloud
//! Foundry service instances between foundations.
//!
//! Requests travel down a chain of [`Sender`] layers:
//!
//! ```text
//! TaskClientRequest -> ClientRequest -> AdjustableClient -> RetryClient -> Transport
//! ```
//!
//! The transport dials directly, through a SOCKS5 proxy, or through an SSH jump
//! host configured with `all_proxy`/`BOSH_ALL_PROXY`.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use service_migrator::prelude::{Director, DirectorConfig, DirectorFactory};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DirectorConfig::new("10.0.0.6")
//!         .with_client("admin", "admin-client-secret")
//!         .with_all_proxy("ssh+socks5://jumpbox@203.0.113.10:22?private-key=/home/me/jumpbox.pem")
//!         .with_retry(5, Duration::from_millis(500));
//!
//!     let director = DirectorFactory::new(config)?.connect()?;
//!     let deployment = director.with_context("migrate-mysql").find_deployment("mysql")?;
//!     for vm in deployment.vm_infos()? {
//!         println!("{} {:?} {:?}", vm.id, vm.ips, vm.disk_ids);
//!     }
//!     Ok(())
//! }
//! ```

mod attempt;
mod auth;
mod client_request;
mod config;
mod deadline;
mod director;
mod error;
mod factory;
mod proxy;
mod replay;
mod reporter;
mod request;
mod response;
mod retry;
mod task;
mod tls;
mod transport;
mod tunnel;
mod uaa;
mod util;

pub use crate::attempt::{Attempt, AttemptStrategy, Retryable};
pub use crate::auth::{
    AdjustableClient, AuthAdjustment, Credentials, DirectorRedirect, RequestAdjuster, TokenSource,
};
pub use crate::client_request::{CONTEXT_ID_HEADER, ClientRequest, DownloadSink, UntrackedSink};
pub use crate::config::{DEFAULT_DIRECTOR_PORT, DirectorConfig, RetrySettings};
pub use crate::deadline::run_with_timeout;
pub use crate::director::{
    Deployment, DeploymentSummary, Director, DirectorClient, DirectorDeployment, Info,
    NameVersion, UserAuthentication, VmInfo, VmProcess, parse_vm_infos,
};
pub use crate::error::{Error, ErrorCode, TaskStage, TransportErrorKind};
pub use crate::factory::DirectorFactory;
pub use crate::proxy::{
    ALL_PROXY_ENV, AllProxy, DialRoute, ProxyDialer, SshJumpHost, parse_all_proxy,
};
pub use crate::replay::BodyReader;
pub use crate::reporter::{
    FileReporter, NoopFileReporter, NoopTaskReporter, ProgressFileReporter, TaskReporter,
    TracingTaskReporter,
};
pub use crate::request::{ReadSeek, Request, RequestBody};
pub use crate::response::{HttpResponse, RequestSummary, Response};
pub use crate::retry::{
    NetworkSafeRetryClassifier, PermissiveRetryClassifier, RetryClassifier, RetryClient,
    RetryDecision,
};
pub use crate::task::{
    DEFAULT_POLL_INTERVAL, OutputCursor, TaskClientRequest, TaskHandle, TaskState,
};
pub use crate::tls::TlsSettings;
pub use crate::transport::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_REDIRECTS, RedirectHook, RedirectLimit, Sender,
    Transport, TransportSettings,
};
pub use crate::uaa::{AccessToken, UaaClient, UaaTokenSource};

pub type DirectorResult<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        ClientRequest, Credentials, Deployment, Director, DirectorClient, DirectorConfig,
        DirectorFactory, DirectorResult, Error, ErrorCode, FileReporter, HttpResponse,
        RequestBody, TaskClientRequest, TaskReporter, TaskState, TracingTaskReporter, VmInfo,
    };
}

#[cfg(test)]
mod test_support;
