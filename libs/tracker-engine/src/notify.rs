//! Progress notifications for runs tied to an asynchronous job.
//!
//! The sink is advisory and fire-and-forget: implementations must not block
//! or fail the pipeline, so the methods cannot return errors.

use std::time::Duration;

use uuid::Uuid;

use trellis_models::ImportReport;

pub trait ProgressSink: Send + Sync {
    fn started(&self, job: Uuid);
    fn stage(&self, job: Uuid, stage: &str, elapsed: Duration);
    fn completed(&self, job: Uuid, report: &ImportReport);
    fn failed(&self, job: Uuid, message: &str);
}

/// Discards everything.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn started(&self, _: Uuid) {}
    fn stage(&self, _: Uuid, _: &str, _: Duration) {}
    fn completed(&self, _: Uuid, _: &ImportReport) {}
    fn failed(&self, _: Uuid, _: &str) {}
}

/// Emits progress through `tracing`.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn started(&self, job: Uuid) {
        tracing::info!(%job, "import started");
    }

    fn stage(&self, job: Uuid, stage: &str, elapsed: Duration) {
        tracing::info!(%job, stage, elapsed_ms = elapsed.as_millis() as u64, "import progress");
    }

    fn completed(&self, job: Uuid, report: &ImportReport) {
        tracing::info!(%job, status = ?report.status, "import completed");
    }

    fn failed(&self, job: Uuid, message: &str) {
        tracing::warn!(%job, message, "import failed");
    }
}
