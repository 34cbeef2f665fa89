use residue_types::{Checkpoint, LeakReport, ObjectKey, ReportKind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info};

use crate::config::TracerConfig;
use crate::filter::TypeFilter;
use crate::host::TypeSystem;
use crate::registry::LiveRegistry;
use crate::report::{self, LeakOutcome, LeakSink, TracingSink};
#[cfg(unix)]
use crate::signals::{self, SignalRequests};

/// Leak tracer: owns the filter and the live-object registry.
///
/// Attach it to a host through its [`LifecycleHooks`](crate::LifecycleHooks)
/// implementation, then call [`finish`](Self::finish) or
/// [`finish_or_exit`](Self::finish_or_exit) at teardown. A tracer that is
/// dropped without being finished still reports, but never exits the
/// process: dropping may happen while unwinding or on an error path the
/// host wants to report itself.
pub struct LeaksTracer {
    pub(crate) config: TracerConfig,
    pub(crate) types: Arc<dyn TypeSystem>,
    pub(crate) filter: TypeFilter,
    pub(crate) registry: LiveRegistry,
    sink: Arc<dyn LeakSink>,
    finished: AtomicBool,
}

impl LeaksTracer {
    pub fn new(config: TracerConfig, types: Arc<dyn TypeSystem>) -> Self {
        let filter = TypeFilter::configure(&config.filters, &*types);
        info!(
            filters = config.filters.len(),
            unresolved = filter.unresolved().len(),
            fatal_leaks = config.fatal_leaks,
            "leaks tracer configured"
        );
        Self {
            config,
            types,
            filter,
            registry: LiveRegistry::new(),
            sink: Arc::new(TracingSink),
            finished: AtomicBool::new(false),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn LeakSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn tracked_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_tracked(&self, object: ObjectKey) -> bool {
        self.registry.contains(object)
    }

    fn take_report(&self, kind: ReportKind) -> LeakReport {
        let objects = self
            .registry
            .snapshot()
            .iter()
            .map(|entry| entry.to_record())
            .collect();
        LeakReport::new(kind, objects)
    }

    /// Every tracked object still alive, oldest first.
    pub fn live_objects(&self) -> LeakReport {
        self.take_report(ReportKind::LiveObjects)
    }

    /// Send every live object to the sink without treating it as a failure.
    pub fn log_live_objects(&self) -> usize {
        let report = self.live_objects();
        report::emit(&*self.sink, &report);
        report.len()
    }

    /// Report everything still alive as leaked and return the count.
    ///
    /// Leaves the registry untouched, so it can also be used for a mid-run
    /// dump. Fatal handling only happens in [`finish`](Self::finish).
    pub fn report(&self) -> usize {
        let report = self.take_report(ReportKind::Leaks);
        report::emit(&*self.sink, &report);
        report.len()
    }

    /// Begin recording creations and removals. `false` if already recording.
    pub fn start_tracking(&self) -> bool {
        self.registry.start_activity()
    }

    /// Objects created and removed since the previous checkpoint.
    /// `None` unless tracking was started.
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.registry.checkpoint()
    }

    pub fn log_checkpoint(&self) -> Option<Checkpoint> {
        let checkpoint = self.registry.checkpoint()?;
        self.sink.checkpoint(&checkpoint);
        Some(checkpoint)
    }

    pub fn stop_tracking(&self) -> bool {
        self.registry.stop_activity()
    }

    /// Handle pending `SIGUSR1`/`SIGUSR2` requests, see [`crate::signals`].
    #[cfg(unix)]
    pub fn service_signals(&self) -> SignalRequests {
        let pending = signals::take_pending();
        self.service_requests(pending);
        pending
    }

    #[cfg(unix)]
    pub(crate) fn service_requests(&self, requests: SignalRequests) {
        if requests.live_objects {
            self.log_live_objects();
        }
        if requests.checkpoint {
            if self.start_tracking() {
                info!("activity tracking started");
            } else {
                self.log_checkpoint();
            }
        }
    }

    /// Teardown: empty the registry, report what was left and decide
    /// whether it is fatal. Only the first call does anything; objects
    /// constructed afterwards are no longer tracked.
    pub fn finish(&self) -> LeakOutcome {
        if self.finished.swap(true, Ordering::AcqRel) {
            return LeakOutcome {
                report: None,
                fatal: false,
            };
        }

        let remaining = self.registry.drain();
        if !self.config.log_leaks_on_detach {
            debug!(remaining = remaining.len(), "leak report on detach disabled");
            return LeakOutcome {
                report: None,
                fatal: false,
            };
        }

        let report = LeakReport::new(
            ReportKind::Leaks,
            remaining.iter().map(|entry| entry.to_record()).collect(),
        );
        report::emit(&*self.sink, &report);
        let fatal = self.config.fatal_leaks && !report.is_empty();
        LeakOutcome {
            report: Some(report),
            fatal,
        }
    }

    /// [`finish`](Self::finish), then exit the process if leaks are fatal.
    pub fn finish_or_exit(&self) -> LeakOutcome {
        let outcome = self.finish();
        outcome.exit_if_fatal();
        outcome
    }
}

impl Drop for LeaksTracer {
    fn drop(&mut self) {
        if self.finished.load(Ordering::Acquire) {
            return;
        }
        let outcome = self.finish();
        if outcome.fatal {
            error!(
                leaks = outcome.leaked(),
                panicking = std::thread::panicking(),
                "leaks tracer dropped without finish; not exiting"
            );
        }
    }
}
