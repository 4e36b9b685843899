//! `TraceSink`: an abstract, time-bounded writer for [`TraceRecord`]s.

use crate::record::{TraceLevel, TraceRecord};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Default bound on a single sink write: chosen well under
/// the stage-level retry backoff cap of 30s so a slow sink can
/// never dominate a retry cycle.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn write(&self, record: &TraceRecord) -> std::io::Result<()>;
}

/// Write `record` to `sink`, bounding the write to `timeout`. On timeout the
/// record is dropped and a local warning is emitted rather than
/// blocking the caller.
pub async fn write_bounded(sink: &dyn TraceSink, record: &TraceRecord, timeout: Duration) {
    match tokio::time::timeout(timeout, sink.write(record)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(run_id = %record.run_id, error = %e, "trace sink write failed");
        }
        Err(_) => {
            tracing::warn!(run_id = %record.run_id, timeout_ms = timeout.as_millis() as u64, "trace sink write timed out; record dropped");
        }
    }
}

/// Writes trace records via `tracing` events at the matching level — the
/// "stdout" default sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

#[async_trait]
impl TraceSink for StdoutSink {
    async fn write(&self, record: &TraceRecord) -> std::io::Result<()> {
        let cut_id = &record.cut_id;
        let parent = record.parent_run_id.map(|p| p.to_string()).unwrap_or_default();
        match record.level {
            TraceLevel::Trace => tracing::trace!(run_id = %record.run_id, %cut_id, parent_run_id = %parent, "{}", record.message),
            TraceLevel::Debug => tracing::debug!(run_id = %record.run_id, %cut_id, parent_run_id = %parent, "{}", record.message),
            TraceLevel::Info => tracing::info!(run_id = %record.run_id, %cut_id, parent_run_id = %parent, "{}", record.message),
            TraceLevel::Warn => tracing::warn!(run_id = %record.run_id, %cut_id, parent_run_id = %parent, "{}", record.message),
            TraceLevel::Error => tracing::error!(run_id = %record.run_id, %cut_id, parent_run_id = %parent, "{}", record.message),
        }
        Ok(())
    }
}

/// One append-only file per run at `<trace_path>/<run_id>/trace.log`, one JSON line per record.
#[derive(Debug, Clone)]
pub struct FileSink {
    trace_path: PathBuf,
}

impl FileSink {
    pub fn new(trace_path: impl Into<PathBuf>) -> Self {
        Self {
            trace_path: trace_path.into(),
        }
    }
}

#[async_trait]
impl TraceSink for FileSink {
    async fn write(&self, record: &TraceRecord) -> std::io::Result<()> {
        let dir = self.trace_path.join(record.run_id.to_string());
        tokio::fs::create_dir_all(&dir).await?;
        let line = serde_json::to_string(record)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("trace.log"))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcore_core::RunId;

    struct SlowSink;

    #[async_trait]
    impl TraceSink for SlowSink {
        async fn write(&self, _record: &TraceRecord) -> std::io::Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_sink_write_is_bounded_by_timeout() {
        let sink = SlowSink;
        let record = TraceRecord::new(RunId::new(), TraceLevel::Info, "hello");
        let fut = write_bounded(&sink, &record, Duration::from_millis(10));
        tokio::time::timeout(Duration::from_secs(1), fut)
            .await
            .expect("write_bounded must itself return promptly");
    }

    #[tokio::test]
    async fn file_sink_writes_one_json_line_per_record() {
        let dir = std::env::temp_dir().join(format!("flowcore-trace-test-{}", uuid::Uuid::new_v4()));
        let sink = FileSink::new(&dir);
        let run_id = RunId::new();
        let record = TraceRecord::new(run_id, TraceLevel::Info, "hi");
        sink.write(&record).await.unwrap();

        let contents = tokio::fs::read_to_string(dir.join(run_id.to_string()).join("trace.log"))
            .await
            .unwrap();
        assert_eq!(contents.lines().count(), 1);
        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
