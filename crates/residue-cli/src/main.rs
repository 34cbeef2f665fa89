use compact_str::CompactString;
use facet::Facet;
use figue as args;
use residue::{
    FilterPattern, HostRuntime, LeakOutcome, LeakReport, LeaksTracer, ReportKind, TRACER_ENV,
    TracerConfig, TypeTable,
};
use std::sync::Arc;
use tracing::info;
#[cfg(unix)]
use tracing::warn;

mod pipeline;

const DEFAULT_WORKERS: u32 = 4;
const DEFAULT_OBJECTS: u32 = 1_000;

#[derive(Facet, Debug)]
struct Cli {
    #[facet(flatten)]
    builtins: args::FigueBuiltins,
    /// Comma-separated type names to track; `Name+` also tracks subtypes.
    #[facet(args::named, default)]
    filters: Option<CompactString>,
    #[facet(args::named, default)]
    fatal_leaks: bool,
    #[facet(args::named, default)]
    workers: Option<u32>,
    /// Buffers each worker pushes through its chain.
    #[facet(args::named, default)]
    objects: Option<u32>,
    /// Buffers to create and never release.
    #[facet(args::named, default)]
    leak: Option<u32>,
    /// Print the final leak report as JSON on stdout.
    #[facet(args::named, default)]
    json: bool,
}

fn main() {
    match run() {
        Ok(outcome) => outcome.exit_if_fatal(),
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<LeakOutcome, String> {
    let cli = parse_cli()?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = config_from_cli(&cli)?;
    let workload = pipeline::Workload {
        workers: cli.workers.unwrap_or(DEFAULT_WORKERS) as usize,
        objects: cli.objects.unwrap_or(DEFAULT_OBJECTS) as usize,
        leak: cli.leak.unwrap_or(0) as usize,
    };

    let types = Arc::new(TypeTable::new());
    let pipeline_types = pipeline::register_types(&types)
        .map_err(|e| format!("failed to register pipeline types: {e}"))?;
    let runtime = HostRuntime::new(types);

    let tracer = Arc::new(LeaksTracer::new(config, runtime.types().clone()));
    let hook = runtime.attach(tracer.clone());

    install_signal_handlers();

    info!(
        workers = workload.workers,
        objects = workload.objects,
        leak = workload.leak,
        "running pipeline"
    );
    let stats = pipeline::run(&runtime, &pipeline_types, workload, || {
        service_signals(&tracer)
    })?;
    info!(
        created = stats.created,
        leaked = stats.leaked,
        still_tracked = tracer.tracked_count(),
        "pipeline finished"
    );

    runtime.detach(hook);
    let outcome = tracer.finish();

    if cli.json {
        let report = outcome
            .report
            .clone()
            .unwrap_or_else(|| LeakReport::new(ReportKind::Leaks, Vec::new()));
        println!(
            "{}",
            facet_json::to_string_pretty(&report).map_err(|e| format!("encode leak report: {e}"))?
        );
    }

    Ok(outcome)
}

#[cfg(unix)]
fn install_signal_handlers() {
    if let Err(e) = residue::signals::install() {
        warn!(%e, "failed to install SIGUSR1/SIGUSR2 handlers");
    }
}

#[cfg(not(unix))]
fn install_signal_handlers() {}

#[cfg(unix)]
fn service_signals(tracer: &LeaksTracer) {
    let served = tracer.service_signals();
    if served.any() {
        info!(
            live_objects = served.live_objects,
            checkpoint = served.checkpoint,
            "served signal requests"
        );
    }
}

#[cfg(not(unix))]
fn service_signals(_tracer: &LeaksTracer) {}

fn parse_cli() -> Result<Cli, String> {
    let figue_config = args::builder::<Cli>()
        .map_err(|e| format!("failed to build CLI schema: {e}"))?
        .cli(|cli| cli.strict())
        .help(|h| {
            h.program_name("residue")
                .description("Run a simulated media pipeline under the residue leak tracer")
                .version(option_env!("CARGO_PKG_VERSION").unwrap_or("dev"))
        })
        .build();

    args::Driver::new(figue_config)
        .run()
        .into_result()
        .map(|v| v.value)
        .map_err(|e| e.to_string())
}

/// `RESIDUE_TRACER` first, then command-line flags on top.
fn config_from_cli(cli: &Cli) -> Result<TracerConfig, String> {
    let mut config = TracerConfig::from_env().map_err(|e| format!("invalid {TRACER_ENV}: {e}"))?;
    if let Some(filters) = &cli.filters {
        config.filters =
            FilterPattern::parse_list(filters).map_err(|e| format!("invalid --filters: {e}"))?;
    }
    if cli.fatal_leaks {
        config.fatal_leaks = true;
    }
    Ok(config)
}
