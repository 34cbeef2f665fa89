use super::*;
use std::sync::Arc;

struct Pipeline {
    types: Arc<TypeTable>,
    decoder: TypeKey,
    encoder: TypeKey,
    h264: TypeKey,
    buffer: TypeKey,
    event: TypeKey,
}

fn pipeline_types() -> Pipeline {
    let types = Arc::new(TypeTable::new());
    let object = types.register("Object", None).expect("register Object");
    let element = types.register("Element", Some(object)).expect("register Element");
    let decoder = types.register("DecoderBase", Some(element)).expect("register DecoderBase");
    let encoder = types.register("EncoderBase", Some(element)).expect("register EncoderBase");
    let h264 = types.register("H264Decoder", Some(decoder)).expect("register H264Decoder");
    let buffer = types.register("Buffer", None).expect("register Buffer");
    let event = types.register("Event", None).expect("register Event");
    Pipeline {
        types,
        decoder,
        encoder,
        h264,
        buffer,
        event,
    }
}

fn tracer_with(
    types: &Arc<TypeTable>,
    config: TracerConfig,
) -> (Arc<LeaksTracer>, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let tracer = Arc::new(LeaksTracer::new(config, types.clone()).with_sink(sink.clone()));
    (tracer, sink)
}

fn filters(list: &str) -> TracerConfig {
    TracerConfig {
        filters: FilterPattern::parse_list(list).expect("valid filter list"),
        ..TracerConfig::default()
    }
}

#[test]
fn balanced_lifecycles_report_no_leaks() {
    let p = pipeline_types();
    let runtime = HostRuntime::new(p.types.clone());
    let (tracer, sink) = tracer_with(&p.types, TracerConfig::default());
    runtime.attach(tracer.clone());

    let mut alive = Vec::new();
    for i in 0..50 {
        let ty = [p.buffer, p.event, p.h264][i % 3];
        alive.push(runtime.create(ty, None).expect("create"));
        if i % 4 == 3 {
            alive.truncate(alive.len() / 2);
        }
    }
    drop(alive);

    assert_eq!(tracer.report(), 0);
    let outcome = tracer.finish();
    assert_eq!(outcome.leaked(), 0);
    assert!(!outcome.fatal);
    let summary = sink.last_summary().expect("finish emits a summary");
    assert_eq!(summary.kind, ReportKind::Leaks);
    assert!(summary.is_empty());
}

#[test]
fn filtered_out_types_never_reach_the_registry() {
    let p = pipeline_types();
    let runtime = HostRuntime::new(p.types.clone());
    let (tracer, _sink) = tracer_with(&p.types, filters("Buffer"));
    runtime.attach(tracer.clone());

    let events: Vec<_> = (0..10)
        .map(|_| runtime.create(p.event, None).expect("create"))
        .collect();
    assert_eq!(tracer.tracked_count(), 0);
    let buffer = runtime.create(p.buffer, None).expect("create");
    assert_eq!(tracer.tracked_count(), 1);
    drop(events);
    assert_eq!(tracer.tracked_count(), 1);
    drop(buffer);
    assert_eq!(tracer.tracked_count(), 0);
}

#[test]
fn decoder_subtree_filter_reports_the_one_leak() {
    let p = pipeline_types();
    let runtime = HostRuntime::new(p.types.clone());
    let (tracer, sink) = tracer_with(&p.types, filters("DecoderBase+"));
    runtime.attach(tracer.clone());

    let decoder = runtime.create(p.decoder, Some("dec0")).expect("create");
    let encoder = runtime.create(p.encoder, Some("enc0")).expect("create");
    let h264 = runtime.create(p.h264, Some("h264dec0")).expect("create");

    assert!(tracer.is_tracked(decoder.key()));
    assert!(!tracer.is_tracked(encoder.key()));
    assert!(tracer.is_tracked(h264.key()));
    assert_eq!(tracer.tracked_count(), 2);

    drop(h264);
    assert_eq!(tracer.report(), 1);

    let (kind, record) = sink.objects().pop().expect("one record emitted");
    assert_eq!(kind, ReportKind::Leaks);
    assert_eq!(record.type_name, "DecoderBase");
    assert_eq!(record.object, decoder.key());
    assert_eq!(record.label.as_deref(), Some("dec0"));

    // report() is non-destructive
    assert_eq!(tracer.tracked_count(), 1);

    // Keep the leak alive across teardown, as a real leak would be.
    std::mem::forget(decoder);
    drop(encoder);
    assert_eq!(tracer.finish().leaked(), 1);
}

#[test]
fn empty_filter_names_the_surviving_type() {
    let p = pipeline_types();
    let runtime = HostRuntime::new(p.types.clone());
    let (tracer, _sink) = tracer_with(&p.types, TracerConfig::default());
    let hook = runtime.attach(tracer.clone());

    let buffer = runtime.create(p.buffer, None).expect("create");
    let event = runtime.create(p.event, None).expect("create");
    let encoder = runtime.create(p.encoder, None).expect("create");
    drop(buffer);
    drop(encoder);

    assert_eq!(tracer.report(), 1);
    let report = tracer.live_objects();
    assert_eq!(report.objects[0].type_name, "Event");

    runtime.detach(hook);
    drop(event);
    // Destroy arrived after detach: still counted as leaked.
    assert_eq!(tracer.finish().leaked(), 1);
}

#[test]
fn fatal_mode_flags_outcome_only_when_leaking() {
    let p = pipeline_types();
    let runtime = HostRuntime::new(p.types.clone());
    let config = TracerConfig {
        fatal_leaks: true,
        ..TracerConfig::default()
    };

    let (clean, _) = tracer_with(&p.types, config.clone());
    let hook = runtime.attach(clean.clone());
    drop(runtime.create(p.buffer, None).expect("create"));
    runtime.detach(hook);
    let outcome = clean.finish();
    assert!(!outcome.fatal);

    let (leaky, _) = tracer_with(&p.types, config);
    let hook = runtime.attach(leaky.clone());
    std::mem::forget(runtime.create(p.buffer, None).expect("create"));
    runtime.detach(hook);
    let outcome = leaky.finish();
    assert!(outcome.fatal);
    assert_eq!(outcome.leaked(), 1);

    // Second finish is inert.
    let again = leaky.finish();
    assert!(again.report.is_none());
    assert!(!again.fatal);
}

#[test]
fn report_only_mode_is_never_fatal() {
    let p = pipeline_types();
    let runtime = HostRuntime::new(p.types.clone());
    let (tracer, sink) = tracer_with(&p.types, TracerConfig::default());
    runtime.attach(tracer.clone());
    std::mem::forget(runtime.create(p.event, Some("eos")).expect("create"));

    let outcome = tracer.finish();
    assert_eq!(outcome.leaked(), 1);
    assert!(!outcome.fatal);
    assert_eq!(sink.summaries().len(), 1);
    assert_eq!(tracer.tracked_count(), 0);
}

#[test]
fn detach_report_can_be_disabled() {
    let p = pipeline_types();
    let runtime = HostRuntime::new(p.types.clone());
    let config = TracerConfig {
        fatal_leaks: true,
        log_leaks_on_detach: false,
        ..TracerConfig::default()
    };
    let (tracer, sink) = tracer_with(&p.types, config);
    runtime.attach(tracer.clone());
    std::mem::forget(runtime.create(p.event, None).expect("create"));

    let outcome = tracer.finish();
    assert!(outcome.report.is_none());
    assert!(!outcome.fatal);
    assert!(sink.summaries().is_empty());
}

#[test]
fn reused_address_is_a_new_entity() {
    let p = pipeline_types();
    let runtime = HostRuntime::new(p.types.clone());
    let (tracer, _sink) = tracer_with(&p.types, TracerConfig::default());
    runtime.attach(tracer.clone());

    let first = runtime.create(p.buffer, None).expect("create");
    let key = first.key();
    let first_generation = tracer.live_objects().objects[0].generation;
    drop(first);

    // Spurious second destroy notification.
    tracer.on_destroy(key);
    assert_eq!(tracer.tracked_count(), 0);

    let second = runtime.create(p.buffer, None).expect("create");
    let live = tracer.live_objects();
    assert_eq!(live.len(), 1);
    assert!(live.objects[0].generation > first_generation);
    drop(second);
    assert_eq!(tracer.report(), 0);
}

#[test]
fn duplicate_construct_keeps_latest_entry() {
    struct Fake(ObjectKey);

    impl HostObject for Fake {
        fn object_key(&self) -> ObjectKey {
            self.0
        }

        fn describe(&self) -> Option<String> {
            Some("fake".to_string())
        }
    }

    let p = pipeline_types();
    let (tracer, _sink) = tracer_with(&p.types, TracerConfig::default());
    let fake = Fake(ObjectKey::new(0x1000).expect("non-zero key"));

    tracer.on_construct(&fake, p.buffer);
    tracer.on_construct(&fake, p.event);
    let live = tracer.live_objects();
    assert_eq!(live.len(), 1);
    assert_eq!(live.objects[0].type_name, "Event");
    assert_eq!(live.objects[0].label.as_deref(), Some("fake"));

    tracer.on_destroy(fake.0);
    tracer.on_destroy(fake.0);
    assert_eq!(tracer.report(), 0);
}

#[test]
fn concurrent_workers_balance_out() {
    const WORKERS: usize = 8;
    const OBJECTS: usize = 400;

    let p = pipeline_types();
    let runtime = HostRuntime::new(p.types.clone());
    let (tracer, _sink) = tracer_with(&p.types, filters("Element+,Buffer"));
    runtime.attach(tracer.clone());

    std::thread::scope(|scope| {
        for worker in 0..WORKERS {
            let runtime = &runtime;
            let p = &p;
            scope.spawn(move || {
                let kinds = [p.buffer, p.event, p.h264, p.encoder];
                let mut held = Vec::new();
                for i in 0..OBJECTS {
                    let ty = kinds[(worker + i) % kinds.len()];
                    held.push(runtime.create(ty, None).expect("create"));
                    if held.len() > 16 {
                        held.drain(..8).for_each(drop);
                    }
                }
            });
        }
    });

    assert_eq!(tracer.tracked_count(), 0);
    assert_eq!(tracer.finish().leaked(), 0);
}

#[test]
fn objects_destroyed_on_another_thread_are_removed() {
    let p = pipeline_types();
    let runtime = HostRuntime::new(p.types.clone());
    let (tracer, _sink) = tracer_with(&p.types, TracerConfig::default());
    runtime.attach(tracer.clone());

    let made: Vec<_> = (0..32)
        .map(|_| runtime.create(p.buffer, None).expect("create"))
        .collect();
    assert_eq!(tracer.tracked_count(), 32);
    std::thread::scope(|scope| {
        scope.spawn(move || drop(made));
    });
    assert_eq!(tracer.tracked_count(), 0);
}

#[test]
fn live_object_dump_does_not_fail_anything() {
    let p = pipeline_types();
    let runtime = HostRuntime::new(p.types.clone());
    let (tracer, sink) = tracer_with(&p.types, TracerConfig::default());
    runtime.attach(tracer.clone());

    let a = runtime.create(p.buffer, Some("a")).expect("create");
    let b = runtime.create(p.event, Some("b")).expect("create");
    assert_eq!(tracer.log_live_objects(), 2);

    let summary = sink.last_summary().expect("dump emits a summary");
    assert_eq!(summary.kind, ReportKind::LiveObjects);
    let labels: Vec<_> = summary
        .objects
        .iter()
        .map(|r| r.label.clone().unwrap_or_default())
        .collect();
    assert_eq!(labels, vec!["a".to_string(), "b".to_string()]);

    drop((a, b));
    assert_eq!(tracer.finish().leaked(), 0);
}

#[test]
fn checkpoints_follow_activity() {
    let p = pipeline_types();
    let runtime = HostRuntime::new(p.types.clone());
    let (tracer, sink) = tracer_with(&p.types, TracerConfig::default());
    runtime.attach(tracer.clone());

    let before = runtime.create(p.buffer, None).expect("create");
    assert!(tracer.checkpoint().is_none());
    assert!(tracer.start_tracking());

    let during = runtime.create(p.event, None).expect("create");
    drop(runtime.create(p.event, None).expect("create"));
    let before_key = before.key();
    drop(before);

    let checkpoint = tracer.log_checkpoint().expect("tracking started");
    assert_eq!(checkpoint.created.len(), 1);
    assert_eq!(checkpoint.created[0].object, during.key());
    assert_eq!(checkpoint.removed.len(), 1);
    assert_eq!(checkpoint.removed[0].object, before_key);
    assert_eq!(checkpoint.removed[0].type_name, "Buffer");
    assert_eq!(sink.checkpoints(), vec![checkpoint]);

    drop(during);
    let next = tracer.checkpoint().expect("tracking still active");
    assert!(next.created.is_empty());
    assert_eq!(next.removed.len(), 1);

    assert!(tracer.stop_tracking());
    assert!(tracer.checkpoint().is_none());
}

#[cfg(unix)]
#[test]
fn signal_requests_dump_and_checkpoint() {
    let p = pipeline_types();
    let runtime = HostRuntime::new(p.types.clone());
    let (tracer, sink) = tracer_with(&p.types, TracerConfig::default());
    runtime.attach(tracer.clone());
    let kept = runtime.create(p.buffer, None).expect("create");

    let both = signals::SignalRequests {
        live_objects: true,
        checkpoint: true,
    };
    tracer.service_requests(both);
    assert_eq!(sink.summaries().len(), 1);
    assert!(sink.checkpoints().is_empty(), "first checkpoint request starts tracking");

    let extra = runtime.create(p.event, None).expect("create");
    tracer.service_requests(signals::SignalRequests {
        live_objects: false,
        checkpoint: true,
    });
    let checkpoints = sink.checkpoints();
    assert_eq!(checkpoints.len(), 1);
    assert_eq!(checkpoints[0].created[0].object, extra.key());

    drop((kept, extra));
    assert_eq!(tracer.finish().leaked(), 0);
}

#[test]
fn hook_may_create_objects_while_dispatching() {
    struct Spawner<'rt> {
        runtime: &'rt HostRuntime,
        ty: TypeKey,
        trigger: TypeKey,
    }

    impl LifecycleHooks for Spawner<'static> {
        fn on_construct(&self, _object: &dyn HostObject, ty: TypeKey) {
            if ty == self.trigger {
                drop(self.runtime.create(self.ty, None).expect("nested create"));
            }
        }

        fn on_destroy(&self, _object: ObjectKey) {}
    }

    let p = pipeline_types();
    let runtime: &'static HostRuntime = Box::leak(Box::new(HostRuntime::new(p.types.clone())));
    let (tracer, _sink) = tracer_with(&p.types, TracerConfig::default());
    runtime.attach(tracer.clone());
    runtime.attach(Arc::new(Spawner {
        runtime,
        ty: p.buffer,
        trigger: p.event,
    }));

    let event = runtime.create(p.event, None).expect("create");
    assert_eq!(tracer.tracked_count(), 1);
    drop(event);
    assert_eq!(tracer.finish().leaked(), 0);
}

#[test]
fn finished_tracer_stops_tracking() {
    let p = pipeline_types();
    let runtime = HostRuntime::new(p.types.clone());
    let (tracer, sink) = tracer_with(&p.types, TracerConfig::default());
    runtime.attach(tracer.clone());

    assert_eq!(tracer.finish().leaked(), 0);
    for _ in 0..100 {
        std::mem::forget(runtime.create(p.buffer, None).expect("create"));
    }
    assert_eq!(tracer.tracked_count(), 0);
    assert_eq!(tracer.report(), 0);
    assert_eq!(tracer.finish().leaked(), 0);
    assert_eq!(sink.summaries().len(), 2);
}

#[test]
fn dropping_a_fatal_tracer_does_not_exit() {
    let p = pipeline_types();
    let config = TracerConfig {
        fatal_leaks: true,
        ..TracerConfig::default()
    };
    let (tracer, sink) = tracer_with(&p.types, config);
    let runtime = HostRuntime::new(p.types.clone());
    let hook = runtime.attach(tracer.clone());
    std::mem::forget(runtime.create(p.buffer, Some("orphan")).expect("create"));
    runtime.detach(hook);

    drop(tracer);
    let summary = sink.last_summary().expect("drop still reports");
    assert_eq!(summary.len(), 1);
    assert_eq!(summary.objects[0].label.as_deref(), Some("orphan"));
}

#[test]
fn panic_with_fatal_leaks_still_unwinds() {
    let p = pipeline_types();
    let sink = Arc::new(MemorySink::new());
    let types = p.types.clone();
    let buffer = p.buffer;
    let tracer_sink = sink.clone();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
        let config = TracerConfig {
            fatal_leaks: true,
            ..TracerConfig::default()
        };
        let tracer = Arc::new(LeaksTracer::new(config, types.clone()).with_sink(tracer_sink));
        let runtime = HostRuntime::new(types);
        runtime.attach(tracer);
        std::mem::forget(runtime.create(buffer, None).expect("create"));
        panic!("host failed mid-run");
    }));

    assert!(result.is_err());
    assert_eq!(sink.last_summary().map(|s| s.len()), Some(1));
}

#[test]
fn sink_runs_without_registry_lock() {
    struct CreatingSink {
        runtime: &'static HostRuntime,
        ty: TypeKey,
        inner: MemorySink,
    }

    impl LeakSink for CreatingSink {
        fn object(&self, kind: ReportKind, record: &ObjectRecord) {
            drop(self.runtime.create(self.ty, None).expect("create from sink"));
            self.inner.object(kind, record);
        }

        fn summary(&self, report: &LeakReport) {
            self.inner.summary(report);
        }

        fn checkpoint(&self, checkpoint: &Checkpoint) {
            self.inner.checkpoint(checkpoint);
        }
    }

    let p = pipeline_types();
    let runtime: &'static HostRuntime = Box::leak(Box::new(HostRuntime::new(p.types.clone())));
    let sink = Arc::new(CreatingSink {
        runtime,
        ty: p.event,
        inner: MemorySink::new(),
    });
    let tracer = Arc::new(
        LeaksTracer::new(TracerConfig::default(), p.types.clone()).with_sink(sink.clone()),
    );
    let hook = runtime.attach(tracer.clone());

    let kept: Vec<_> = (0..3)
        .map(|_| runtime.create(p.buffer, None).expect("create"))
        .collect();
    assert_eq!(tracer.report(), 3);
    assert_eq!(tracer.log_live_objects(), 3);
    assert_eq!(tracer.tracked_count(), 3);
    assert_eq!(sink.inner.objects().len(), 6);

    std::mem::forget(kept);
    runtime.detach(hook);
    assert_eq!(tracer.finish().leaked(), 3);
    assert_eq!(tracer.tracked_count(), 0);
}
