use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::DirectorResult;
use crate::error::Error;

/// Runs `work` on its own thread and gives up after `timeout`.
///
/// Giving up does not stop the work: the thread keeps running detached and
/// whatever it sent to the Director may still complete there.
pub fn run_with_timeout<T, F>(operation: &str, timeout: Duration, work: F) -> DirectorResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> DirectorResult<T> + Send + 'static,
{
    let (done, finished) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name("director-deadline".to_owned())
        .spawn(move || {
            let _ = done.send(work());
        })
        .map_err(|source| Error::Worker {
            operation: operation.to_owned(),
            message: source.to_string(),
        })?;

    match finished.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!(
                operation,
                timeout_ms = timeout.as_millis() as u64,
                "operation abandoned after deadline"
            );
            Err(Error::DeadlineExceeded {
                operation: operation.to_owned(),
                timeout_ms: timeout.as_millis(),
            })
        }
        Err(RecvTimeoutError::Disconnected) => Err(Error::Worker {
            operation: operation.to_owned(),
            message: "worker exited without a result".to_owned(),
        }),
    }
}
