use std::io::Write;
use std::sync::Arc;

use tracing::{debug, info};

/// Observes a Director task from the outside.
pub trait TaskReporter: Send + Sync {
    fn task_started(&self, id: u64);

    fn task_finished(&self, id: u64, state: &str);

    /// New event output. Called only with non-empty chunks.
    fn task_output_chunk(&self, id: u64, chunk: &[u8]);
}

/// Wraps download writers to report progress.
pub trait FileReporter: Send + Sync {
    fn track_download<'a>(
        &self,
        size: Option<u64>,
        writer: &'a mut dyn Write,
    ) -> Box<dyn Write + 'a>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTaskReporter;

impl TaskReporter for NoopTaskReporter {
    fn task_started(&self, _id: u64) {}

    fn task_finished(&self, _id: u64, _state: &str) {}

    fn task_output_chunk(&self, _id: u64, _chunk: &[u8]) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TracingTaskReporter;

impl TaskReporter for TracingTaskReporter {
    fn task_started(&self, id: u64) {
        info!(task_id = id, "director task started");
    }

    fn task_finished(&self, id: u64, state: &str) {
        info!(task_id = id, state, "director task finished");
    }

    fn task_output_chunk(&self, id: u64, chunk: &[u8]) {
        debug!(
            task_id = id,
            bytes = chunk.len(),
            output = %String::from_utf8_lossy(chunk),
            "director task output"
        );
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopFileReporter;

impl FileReporter for NoopFileReporter {
    fn track_download<'a>(
        &self,
        _size: Option<u64>,
        writer: &'a mut dyn Write,
    ) -> Box<dyn Write + 'a> {
        Box::new(writer)
    }
}

type ProgressCallback = dyn Fn(u64, Option<u64>) + Send + Sync;

/// Calls back with `(bytes_written, total)` after every write.
#[derive(Clone)]
pub struct ProgressFileReporter {
    callback: Arc<ProgressCallback>,
}

impl ProgressFileReporter {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(u64, Option<u64>) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }
}

impl std::fmt::Debug for ProgressFileReporter {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("ProgressFileReporter").finish_non_exhaustive()
    }
}

impl FileReporter for ProgressFileReporter {
    fn track_download<'a>(
        &self,
        size: Option<u64>,
        writer: &'a mut dyn Write,
    ) -> Box<dyn Write + 'a> {
        Box::new(ProgressWriter {
            inner: writer,
            written: 0,
            total: size,
            callback: Arc::clone(&self.callback),
        })
    }
}

struct ProgressWriter<'a> {
    inner: &'a mut dyn Write,
    written: u64,
    total: Option<u64>,
    callback: Arc<ProgressCallback>,
}

impl Write for ProgressWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.written = self.written.saturating_add(written as u64);
        (self.callback)(self.written, self.total);
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    use super::{FileReporter, ProgressFileReporter};
    use crate::util::lock_unpoisoned;

    #[test]
    fn progress_reporter_counts_bytes_against_total() {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let reporter = ProgressFileReporter::new(move |written, total| {
            lock_unpoisoned(&sink).push((written, total));
        });

        let mut target = Vec::new();
        {
            let mut tracked = reporter.track_download(Some(10), &mut target);
            tracked.write_all(b"hello").expect("write");
            tracked.write_all(b"world").expect("write");
        }

        assert_eq!(target, b"helloworld");
        assert_eq!(
            *lock_unpoisoned(&reports),
            vec![(5, Some(10)), (10, Some(10))]
        );
    }
}
