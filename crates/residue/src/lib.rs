//! Leak tracer for reference-counted object runtimes.
//!
//! A [`LeaksTracer`] is attached to a host runtime as a [`LifecycleHooks`]
//! observer. Every construction whose type passes the [`TypeFilter`] is
//! recorded in a [`LiveRegistry`] keyed by the object's address; every
//! finalization removes it again. Whatever is left when the tracer is
//! finished is reported as leaked, and optionally treated as fatal.
//!
//! The tracer never holds a reference to a tracked object and never reports
//! a failure back into the host's lifecycle calls; anomalies are logged
//! through `tracing` and absorbed.
//!
//! ```
//! use residue::{HostRuntime, LeaksTracer, TracerConfig, TypeTable};
//! use std::sync::Arc;
//!
//! let types = Arc::new(TypeTable::new());
//! let buffer = types.register("Buffer", None).unwrap();
//! let runtime = HostRuntime::new(types.clone());
//!
//! let tracer = Arc::new(LeaksTracer::new(TracerConfig::default(), types));
//! let hook = runtime.attach(tracer.clone());
//!
//! let kept = runtime.create(buffer, Some("kept")).unwrap();
//! drop(runtime.create(buffer, None).unwrap());
//! assert_eq!(tracer.report(), 1);
//!
//! drop(kept);
//! runtime.detach(hook);
//! assert_eq!(tracer.finish().leaked(), 0);
//! ```

mod config;
mod filter;
pub mod host;
mod interceptor;
mod registry;
mod report;
#[cfg(unix)]
pub mod signals;
mod tracer;

#[cfg(test)]
mod tests;

pub use config::{ConfigError, TRACER_ENV, TracerConfig};
pub use filter::{FilterError, FilterPattern, SUBTYPES_SUFFIX, TypeFilter};
pub use host::{HookId, HostRuntime, Instance, TypeError, TypeSystem, TypeTable};
pub use interceptor::{HostObject, LifecycleHooks};
pub use registry::{Entry, LiveRegistry};
pub use report::{LEAK_EXIT_STATUS, LeakOutcome, LeakSink, MemorySink, TracingSink};
pub use tracer::LeaksTracer;

pub use residue_types::{
    Checkpoint, InvariantError, LeakReport, ObjectKey, ObjectLog, ObjectRecord, ReportKind, TypeKey,
};
