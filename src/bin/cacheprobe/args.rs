//! Arguments

use std::path::PathBuf;

/// Measure L1D and DTLB counters around a synthetic memory workload
#[derive(Debug, clap::Parser)]
pub struct Args {
    /// Log file
    ///
    /// Specifies a file to perform verbose logging to.
    /// You can use `RUST_LOG_FILE` to set filtering options
    #[clap(long = "log-file", global = true)]
    pub log_file: Option<PathBuf>,

    /// Whether to append to the log file
    #[clap(long = "log-file-append", global = true)]
    pub log_file_append: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Run measured trials and write one CSV row per trial
    Run(RunArgs),

    /// Check that hardware counters can be opened
    Probe,

    /// Generate background memory contention until interrupted
    Contend(ContendArgs),

    /// Generate a light CPU and cache load
    Background(BackgroundArgs),

    /// Print this process's memory mappings
    Maps,
}

#[derive(Debug, clap::Args)]
pub struct RunArgs {
    /// Number of trials
    #[clap(long, default_value_t = 5)]
    pub trials: usize,

    /// Logical CPU to pin the process to
    #[clap(long, default_value_t = 4)]
    pub cpu: usize,

    /// Do not change the CPU affinity
    #[clap(long = "no-pin", conflicts_with = "cpu")]
    pub no_pin: bool,

    /// Output CSV file
    ///
    /// Rows are written to stdout if not given.
    #[clap(long = "output", short = 'o')]
    pub output_file: Option<PathBuf>,

    /// Workload config file (JSON)
    #[clap(long = "config")]
    pub config_file: Option<PathBuf>,

    /// Workload buffer size in bytes
    #[clap(long = "buffer-size")]
    pub buffer_size: Option<usize>,

    /// Working sets visited per trial
    #[clap(long = "outer-iterations")]
    pub outer_iterations: Option<usize>,

    /// Walk the buffer sequentially instead of picking random working sets
    #[clap(long)]
    pub sequential: bool,

    /// Bytes written to flush the caches before each trial
    #[clap(long = "flush-bytes", default_value_t = 64 << 20)]
    pub flush_bytes: usize,
}

#[derive(Debug, clap::Args)]
pub struct ContendArgs {
    /// Logical CPU to pin the contention process to
    #[clap(long, default_value_t = 6)]
    pub cpu: usize,

    /// Size of the contended region in bytes
    ///
    /// Defaults to the size of physical memory.
    #[clap(long)]
    pub bytes: Option<usize>,

    /// Stop after this many page touches
    #[clap(long)]
    pub steps: Option<u64>,
}

#[derive(Debug, clap::Args)]
pub struct BackgroundArgs {
    /// Logical CPU to pin the background process to
    #[clap(long, default_value_t = 5)]
    pub cpu: usize,

    /// Elements in the array filled each round
    #[clap(long, default_value_t = 1_000_000)]
    pub elements: usize,

    /// Stop after this many rounds
    #[clap(long)]
    pub rounds: Option<u64>,
}
