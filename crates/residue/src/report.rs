//! Leak sinks and the outcome of tearing a tracer down.

use parking_lot::Mutex;
use residue_types::{Checkpoint, LeakReport, ObjectRecord, ReportKind};
use tracing::{error, info, warn};

/// Exit status used when leaks are found and `fatal_leaks` is set.
pub const LEAK_EXIT_STATUS: i32 = 2;

/// Receives formatted tracer output.
///
/// Called with no tracer lock held, so implementations may be slow.
pub trait LeakSink: Send + Sync {
    fn object(&self, kind: ReportKind, record: &ObjectRecord);

    /// Called once per report, after every `object` call for it.
    fn summary(&self, report: &LeakReport);

    fn checkpoint(&self, checkpoint: &Checkpoint);
}

/// Default sink: everything goes through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LeakSink for TracingSink {
    fn object(&self, kind: ReportKind, record: &ObjectRecord) {
        let label = record.label.as_deref().unwrap_or("");
        match kind {
            ReportKind::Leaks => warn!(
                type_name = %record.type_name,
                object = %record.object,
                label,
                generation = record.generation,
                "object-alive"
            ),
            ReportKind::LiveObjects => info!(
                type_name = %record.type_name,
                object = %record.object,
                label,
                generation = record.generation,
                "object-alive"
            ),
        }
    }

    fn summary(&self, report: &LeakReport) {
        match report.kind {
            ReportKind::Leaks if report.is_empty() => info!("no leaks detected"),
            ReportKind::Leaks => warn!(
                leaks = report.len(),
                by_type = ?report.count_by_type(),
                "leaks detected"
            ),
            ReportKind::LiveObjects => info!(
                live = report.len(),
                by_type = ?report.count_by_type(),
                "live objects"
            ),
        }
    }

    fn checkpoint(&self, checkpoint: &Checkpoint) {
        for log in &checkpoint.created {
            info!(type_name = %log.type_name, object = %log.object, "object-created");
        }
        for log in &checkpoint.removed {
            info!(type_name = %log.type_name, object = %log.object, "object-removed");
        }
        info!(
            created = checkpoint.created.len(),
            removed = checkpoint.removed.len(),
            "activity checkpoint"
        );
    }
}

/// Sink that keeps everything it is given.
#[derive(Default)]
pub struct MemorySink {
    objects: Mutex<Vec<(ReportKind, ObjectRecord)>>,
    summaries: Mutex<Vec<LeakReport>>,
    checkpoints: Mutex<Vec<Checkpoint>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn objects(&self) -> Vec<(ReportKind, ObjectRecord)> {
        self.objects.lock().clone()
    }

    pub fn summaries(&self) -> Vec<LeakReport> {
        self.summaries.lock().clone()
    }

    pub fn last_summary(&self) -> Option<LeakReport> {
        self.summaries.lock().last().cloned()
    }

    pub fn checkpoints(&self) -> Vec<Checkpoint> {
        self.checkpoints.lock().clone()
    }
}

impl LeakSink for MemorySink {
    fn object(&self, kind: ReportKind, record: &ObjectRecord) {
        self.objects.lock().push((kind, record.clone()));
    }

    fn summary(&self, report: &LeakReport) {
        self.summaries.lock().push(report.clone());
    }

    fn checkpoint(&self, checkpoint: &Checkpoint) {
        self.checkpoints.lock().push(checkpoint.clone());
    }
}

pub(crate) fn emit(sink: &dyn LeakSink, report: &LeakReport) {
    for record in &report.objects {
        sink.object(report.kind, record);
    }
    sink.summary(report);
}

/// Result of [`LeaksTracer::finish`](crate::LeaksTracer::finish).
#[derive(Debug, Clone)]
pub struct LeakOutcome {
    /// Final report, or `None` if the tracer was already finished or
    /// teardown reporting is disabled.
    pub report: Option<LeakReport>,

    /// Leaks were found and the tracer is configured to treat them as fatal.
    pub fatal: bool,
}

impl LeakOutcome {
    pub fn leaked(&self) -> usize {
        self.report.as_ref().map_or(0, LeakReport::len)
    }

    /// Terminate the process with [`LEAK_EXIT_STATUS`] if this outcome is fatal.
    pub fn exit_if_fatal(&self) {
        if self.fatal {
            error!(
                leaks = self.leaked(),
                status = LEAK_EXIT_STATUS,
                "leaks detected with fatal-leaks enabled; exiting"
            );
            std::process::exit(LEAK_EXIT_STATUS);
        }
    }
}
