//! Measures L1D and DTLB behaviour of a synthetic workload

// Modules
mod args;
mod logger;

// Imports
use std::{fs, io};

use anyhow::Context;
use cacheprobe::{
    host,
    noise::{BackgroundActivity, MemoryContention},
    signal, MetricsSink, RunSummary, TrialConfig, TrialOrchestrator, WorkloadConfig,
};
use clap::Parser;

use self::args::{Args, BackgroundArgs, Command, ContendArgs, RunArgs};

fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    logger::init(args.log_file.as_deref(), args.log_file_append)?;
    tracing::debug!(?args, "Arguments");

    match args.command {
        Command::Run(run_args) => run(run_args),
        Command::Probe => {
            cacheprobe::probe().context("Hardware counters are unavailable")?;
            tracing::info!("Hardware counters are available");
            Ok(())
        }
        Command::Contend(contend_args) => contend(contend_args),
        Command::Background(background_args) => background(background_args),
        Command::Maps => {
            let maps = host::memory_maps().context("Unable to read memory maps")?;
            print!("{}", maps);
            Ok(())
        }
    }
}

fn run(args: RunArgs) -> Result<(), anyhow::Error> {
    let mut workload = match &args.config_file {
        Some(path) => {
            let file = fs::File::open(path)
                .with_context(|| format!("Unable to open config file {:?}", path))?;
            serde_json::from_reader::<_, WorkloadConfig>(io::BufReader::new(file))
                .with_context(|| format!("Unable to parse config file {:?}", path))?
        }
        None => WorkloadConfig::default(),
    };
    if let Some(bytes) = args.buffer_size {
        workload = workload.buffer_size_bytes(bytes);
    }
    if let Some(iterations) = args.outer_iterations {
        workload = workload.outer_iterations(iterations);
    }
    if args.sequential {
        workload = workload.random_access(false);
    }
    workload.validate().context("Invalid workload configuration")?;
    tracing::info!(?workload, "Workload");

    if !args.no_pin {
        host::pin_to_cpu(args.cpu).with_context(|| format!("Unable to pin to cpu {}", args.cpu))?;
    }
    signal::watch_for(&[libc::SIGINT, libc::SIGTERM]).context("Unable to install signal handlers")?;

    let config = TrialConfig::default()
        .trials(args.trials)
        .flush_bytes(args.flush_bytes)
        .workload(workload);
    let mut orchestrator = TrialOrchestrator::new(config);

    let summary = match &args.output_file {
        Some(path) => {
            let sink = MetricsSink::create(path, orchestrator.config().specs())
                .with_context(|| format!("Unable to create output file {:?}", path))?;
            self::run_into(&mut orchestrator, sink)?
        }
        None => {
            let sink = MetricsSink::stdout(orchestrator.config().specs()).context("Unable to write header")?;
            self::run_into(&mut orchestrator, sink)?
        }
    };

    if summary.interrupted {
        tracing::warn!(
            completed = summary.completed,
            requested = summary.requested,
            "Interrupted"
        );
    }
    Ok(())
}

fn run_into<W: io::Write>(
    orchestrator: &mut TrialOrchestrator,
    mut sink: MetricsSink<W>,
) -> Result<RunSummary, anyhow::Error> {
    let summary = orchestrator.run(&mut sink).context("Trial run failed")?;
    sink.finish().context("Unable to flush output")?;
    Ok(summary)
}

fn contend(args: ContendArgs) -> Result<(), anyhow::Error> {
    host::pin_to_cpu(args.cpu).with_context(|| format!("Unable to pin to cpu {}", args.cpu))?;

    let mut contention = match args.bytes {
        Some(bytes) => MemoryContention::new(bytes),
        None => MemoryContention::whole_memory(),
    }
    .context("Unable to map contention region")?;

    tracing::info!(pages = contention.pages(), steps = ?args.steps, "Generating contention");
    let steps = contention.run(args.steps);
    tracing::info!(steps, "Contention finished");

    Ok(())
}

fn background(args: BackgroundArgs) -> Result<(), anyhow::Error> {
    host::pin_to_cpu(args.cpu).with_context(|| format!("Unable to pin to cpu {}", args.cpu))?;

    let activity = BackgroundActivity::new(args.elements);
    tracing::info!(elements = args.elements, rounds = ?args.rounds, "Generating background activity");
    let rounds = activity.run(args.rounds).context("Background activity failed")?;
    tracing::info!(rounds, "Background activity finished");

    Ok(())
}
