//! Simulated media pipeline driving the host runtime.
//!
//! Each worker builds its own chain of elements and pushes buffers and
//! events through it. Everything a worker creates is dropped before the
//! worker returns; the only leaks are the ones requested explicitly.

use residue::{HostRuntime, Instance, TypeError, TypeKey, TypeTable};
use std::thread;
use std::time::Duration;

const TICK: Duration = Duration::from_millis(5);
const EVENT_EVERY: usize = 16;
const MAX_IN_FLIGHT: usize = 8;

pub struct PipelineTypes {
    pub source: TypeKey,
    pub decoder_base: TypeKey,
    pub h264_decoder: TypeKey,
    pub encoder_base: TypeKey,
    pub sink: TypeKey,
    pub buffer: TypeKey,
    pub event: TypeKey,
    pub message: TypeKey,
}

pub fn register_types(table: &TypeTable) -> Result<PipelineTypes, TypeError> {
    let object = table.register("Object", None)?;
    let element = table.register("Element", Some(object))?;
    let source = table.register("Source", Some(element))?;
    let decoder_base = table.register("DecoderBase", Some(element))?;
    let h264_decoder = table.register("H264Decoder", Some(decoder_base))?;
    let encoder_base = table.register("EncoderBase", Some(element))?;
    let sink = table.register("Sink", Some(element))?;
    let mini_object = table.register("MiniObject", None)?;
    Ok(PipelineTypes {
        source,
        decoder_base,
        h264_decoder,
        encoder_base,
        sink,
        buffer: table.register("Buffer", Some(mini_object))?,
        event: table.register("Event", Some(mini_object))?,
        message: table.register("Message", Some(mini_object))?,
    })
}

#[derive(Debug, Clone, Copy)]
pub struct Workload {
    pub workers: usize,
    pub objects: usize,
    pub leak: usize,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RunStats {
    pub created: usize,
    pub leaked: usize,
}

/// Run every worker to completion, calling `on_tick` from the current
/// thread while they are busy.
pub fn run(
    runtime: &HostRuntime,
    types: &PipelineTypes,
    workload: Workload,
    mut on_tick: impl FnMut(),
) -> Result<RunStats, String> {
    let created = thread::scope(|scope| {
        let handles: Vec<_> = (0..workload.workers)
            .map(|worker| scope.spawn(move || stream(runtime, types, worker, workload.objects)))
            .collect();

        while handles.iter().any(|handle| !handle.is_finished()) {
            on_tick();
            thread::sleep(TICK);
        }

        let mut created = 0;
        for handle in handles {
            created += handle
                .join()
                .map_err(|_| "pipeline worker panicked".to_string())??;
        }
        Ok::<_, String>(created)
    })?;
    on_tick();

    for index in 0..workload.leak {
        let label = format!("leaked-buffer-{index}");
        let buffer = runtime
            .create(types.buffer, Some(&label))
            .map_err(|e| format!("create leaked buffer: {e}"))?;
        // Never released: the tracer should report it.
        std::mem::forget(buffer);
    }

    Ok(RunStats {
        created: created + workload.leak,
        leaked: workload.leak,
    })
}

fn stream(
    runtime: &HostRuntime,
    types: &PipelineTypes,
    worker: usize,
    objects: usize,
) -> Result<usize, String> {
    let make = |ty: TypeKey, label: Option<&str>| create(runtime, worker, ty, label);

    let decoder = if worker % 2 == 0 {
        types.h264_decoder
    } else {
        types.decoder_base
    };
    let chain = [
        make(types.source, Some(&format!("src{worker}")))?,
        make(decoder, Some(&format!("dec{worker}")))?,
        make(types.encoder_base, Some(&format!("enc{worker}")))?,
        make(types.sink, Some(&format!("sink{worker}")))?,
    ];
    let mut created = chain.len();

    let mut in_flight = Vec::with_capacity(MAX_IN_FLIGHT);
    for index in 0..objects {
        in_flight.push(make(types.buffer, None)?);
        if index % EVENT_EVERY == 0 {
            drop(make(types.event, None)?);
            created += 1;
        }
        if in_flight.len() == MAX_IN_FLIGHT {
            in_flight.clear();
        }
    }
    created += objects;
    drop(in_flight);

    let eos = make(types.message, Some(&format!("eos{worker}")))?;
    created += 1;
    drop(eos);
    drop(chain);
    Ok(created)
}

fn create<'rt>(
    runtime: &'rt HostRuntime,
    worker: usize,
    ty: TypeKey,
    label: Option<&str>,
) -> Result<Instance<'rt>, String> {
    runtime
        .create(ty, label)
        .map_err(|e| format!("worker {worker}: create failed: {e}"))
}
