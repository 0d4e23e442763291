use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use http::header::RANGE;
use http::{HeaderMap, StatusCode};
use serde::Deserialize;
use tracing::{debug, debug_span};

use crate::DirectorResult;
use crate::client_request::{ClientRequest, decode};
use crate::error::{Error, TaskStage};
use crate::reporter::TaskReporter;
use crate::request::RequestBody;
use crate::util::parse_header_value;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// State string reported by `GET /tasks/{id}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum TaskState {
    Queued,
    Processing,
    Cancelling,
    Done,
    Error,
    Cancelled,
    Other(String),
}

impl TaskState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Cancelling => "cancelling",
            Self::Done => "done",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
            Self::Other(state) => state,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Queued | Self::Processing | Self::Cancelling)
    }

    pub fn is_successfully_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl From<&str> for TaskState {
    fn from(state: &str) -> Self {
        match state {
            "queued" => Self::Queued,
            "processing" => Self::Processing,
            "cancelling" => Self::Cancelling,
            "done" => Self::Done,
            "error" => Self::Error,
            "cancelled" => Self::Cancelled,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl From<String> for TaskState {
    fn from(state: String) -> Self {
        Self::from(state.as_str())
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// The `{id, state}` stub the Director answers with when it queues work.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct TaskHandle {
    id: u64,
    state: TaskState,
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }
}

/// Byte offset into a task's event output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OutputCursor(u64);

impl OutputCursor {
    pub fn offset(self) -> u64 {
        self.0
    }

    pub fn advance(&mut self, received: usize) {
        self.0 = self.0.saturating_add(received as u64);
    }

    pub fn range_header(self) -> String {
        format!("bytes={}-", self.0)
    }
}

/// Submits Director operations that answer with a task and waits for their
/// result.
///
/// State is always refreshed before output is drained, so the chunk written
/// while the task finished is still picked up on the last iteration.
#[derive(Clone)]
pub struct TaskClientRequest {
    client_request: ClientRequest,
    reporter: Arc<dyn TaskReporter>,
    poll_interval: Duration,
}

impl TaskClientRequest {
    pub fn new(
        client_request: ClientRequest,
        reporter: Arc<dyn TaskReporter>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client_request,
            reporter,
            poll_interval,
        }
    }

    pub fn with_context(&self, context_id: impl Into<String>) -> Self {
        Self {
            client_request: self.client_request.with_context(context_id),
            ..self.clone()
        }
    }

    pub fn client_request(&self) -> &ClientRequest {
        &self.client_request
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn get_result(&self, path: &str) -> DirectorResult<Bytes> {
        let submitted = self
            .client_request
            .raw_get(path, None, &HeaderMap::new())?;
        self.wait_for_result(&decode(&submitted)?)
    }

    pub fn post_result(
        &self,
        path: &str,
        payload: impl Into<RequestBody>,
        headers: &HeaderMap,
    ) -> DirectorResult<Bytes> {
        let submitted = self.client_request.raw_post(path, payload, headers)?;
        self.wait_for_result(&decode(&submitted)?)
    }

    pub fn put_result(
        &self,
        path: &str,
        payload: impl Into<RequestBody>,
        headers: &HeaderMap,
    ) -> DirectorResult<Bytes> {
        let submitted = self.client_request.raw_put(path, payload, headers)?;
        self.wait_for_result(&decode(&submitted)?)
    }

    pub fn delete_result(&self, path: &str) -> DirectorResult<Bytes> {
        let submitted = self.client_request.raw_delete(path, &HeaderMap::new())?;
        self.wait_for_result(&decode(&submitted)?)
    }

    /// Current `{id, state}` of a task without waiting on it.
    pub fn task(&self, id: u64) -> DirectorResult<TaskHandle> {
        self.client_request
            .get(&format!("/tasks/{id}"))
            .map_err(|error| error.wrap_task(id, TaskStage::State))
    }

    /// Polls until the task leaves a running state, streaming `output_type`
    /// output to the reporter. Anything but `done` is returned as
    /// [`Error::TaskFailed`].
    pub fn wait_for_completion(&self, id: u64, output_type: &str) -> DirectorResult<()> {
        let _span = debug_span!("director_task", task_id = id).entered();
        self.reporter.task_started(id);

        let mut last_state = String::new();
        let outcome = self.poll(id, output_type, &mut last_state);
        self.reporter.task_finished(id, &last_state);
        outcome
    }

    fn poll(&self, id: u64, output_type: &str, last_state: &mut String) -> DirectorResult<()> {
        let mut cursor = OutputCursor::default();
        loop {
            let task = self.task(id)?;
            last_state.clear();
            last_state.push_str(task.state.as_str());

            self.drain_output(id, output_type, &mut cursor)?;

            if task.state.is_running() {
                debug!(
                    state = %task.state,
                    offset = cursor.offset(),
                    "director task still running"
                );
                thread::sleep(self.poll_interval);
                continue;
            }
            if task.state.is_successfully_done() {
                return Ok(());
            }
            return Err(Error::TaskFailed {
                id,
                state: task.state.as_str().to_owned(),
            });
        }
    }

    fn drain_output(
        &self,
        id: u64,
        output_type: &str,
        cursor: &mut OutputCursor,
    ) -> DirectorResult<()> {
        let mut headers = HeaderMap::new();
        headers.insert(RANGE, parse_header_value("range", &cursor.range_header())?);

        let path = format!("/tasks/{id}/output?type={output_type}");
        match self.client_request.raw_get(&path, None, &headers) {
            Ok(response) => {
                let chunk = response.body();
                if !chunk.is_empty() {
                    cursor.advance(chunk.len());
                    self.reporter.task_output_chunk(id, chunk);
                }
                Ok(())
            }
            Err(error) if error.status() == Some(StatusCode::RANGE_NOT_SATISFIABLE) => Ok(()),
            Err(error) => Err(error.wrap_task(id, TaskStage::Output)),
        }
    }

    fn wait_for_result(&self, task: &TaskHandle) -> DirectorResult<Bytes> {
        self.wait_for_completion(task.id, "event")?;

        let path = format!("/tasks/{}/output?type=result", task.id);
        let response = self
            .client_request
            .raw_get(&path, None, &HeaderMap::new())
            .map_err(|error| error.wrap_task(task.id, TaskStage::Result))?;
        Ok(response.into_body())
    }
}

impl std::fmt::Debug for TaskClientRequest {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TaskClientRequest")
            .field("client_request", &self.client_request)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}
