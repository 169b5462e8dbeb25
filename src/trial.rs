use std::fmt;
use std::io;

use crate::error::Error;
use crate::host::{self, ResourceUsage};
use crate::set::{CounterBackend, Counters, Perf, Readings};
use crate::signal;
use crate::sink::MetricsSink;
use crate::spec::{CounterSpec, CACHE_EVENTS};
use crate::workload::{WorkloadBuffer, WorkloadConfig, WorkloadGenerator};

/// The measurements of one trial.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialResult {
    trial_index: usize,
    counters: Readings,
    usage_before: ResourceUsage,
    usage_after: ResourceUsage,
}

#[allow(missing_docs)]
impl TrialResult {
    pub fn new(
        trial_index: usize,
        counters: Readings,
        usage_before: ResourceUsage,
        usage_after: ResourceUsage,
    ) -> Self {
        TrialResult {
            trial_index,
            counters,
            usage_before,
            usage_after,
        }
    }

    pub fn trial_index(&self) -> usize {
        self.trial_index
    }

    /// The value of the counter called `name`, if the kernel reported it.
    pub fn counter(&self, name: &str) -> Option<u64> {
        self.counters.get(name).copied()
    }

    pub fn counters(&self) -> &Readings {
        &self.counters
    }

    pub fn usage_before(&self) -> &ResourceUsage {
        &self.usage_before
    }

    pub fn usage_after(&self) -> &ResourceUsage {
        &self.usage_after
    }

    /// Resource usage accrued over the measured window.
    pub fn usage(&self) -> ResourceUsage {
        self.usage_after.since(&self.usage_before)
    }
}

/// Configure a multi-trial run.
///
/// ```
/// use cacheprobe::{TrialConfig, WorkloadConfig};
///
/// let config = TrialConfig::default()
///     .trials(3)
///     .workload(WorkloadConfig::default().random_access(false));
/// assert_eq!(config.specs().len(), 10);
/// ```
#[derive(Debug, Clone)]
pub struct TrialConfig {
    trials: usize,
    flush_bytes: usize,
    specs: Vec<CounterSpec>,
    workload: WorkloadConfig,
}

impl Default for TrialConfig {
    fn default() -> Self {
        TrialConfig {
            trials: 5,
            flush_bytes: 64 << 20,
            specs: CACHE_EVENTS.clone(),
            workload: WorkloadConfig::default(),
        }
    }
}

impl TrialConfig {
    /// The number of trials to run.
    pub fn trials(self, trials: usize) -> Self {
        Self { trials, ..self }
    }

    /// Bytes written before each trial to evict cached state.
    pub fn flush_bytes(self, flush_bytes: usize) -> Self {
        Self {
            flush_bytes,
            ..self
        }
    }

    /// The counters to measure, in reporting order.
    pub fn specs(&self) -> &[CounterSpec] {
        &self.specs
    }

    /// Measure `specs` instead of [`CACHE_EVENTS`].
    pub fn with_specs(self, specs: impl Into<Vec<CounterSpec>>) -> Self {
        Self {
            specs: specs.into(),
            ..self
        }
    }

    #[allow(missing_docs)]
    pub fn workload(self, workload: WorkloadConfig) -> Self {
        Self { workload, ..self }
    }

    #[allow(missing_docs)]
    pub fn workload_config(&self) -> &WorkloadConfig {
        &self.workload
    }
}

/// Where a trial is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum TrialState {
    Idle,
    CacheFlushed,
    BufferAllocated,
    Armed,
    WorkloadRunning,
    Disarmed,
    Read,
    Emitted,
}

/// The outcome of [`TrialOrchestrator::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Trials asked for.
    pub requested: usize,
    /// Rows emitted.
    pub completed: usize,
    /// The run stopped early at a trial boundary.
    pub interrupted: bool,
}

/// Runs trials one after another, measuring each with a fresh set of
/// counters and writing the results to a [`MetricsSink`].
///
/// Any failure aborts the whole run; rows already written stay in the
/// sink, which is flushed before the error is returned.
pub struct TrialOrchestrator<B: CounterBackend = Perf> {
    config: TrialConfig,
    backend: B,
    state: TrialState,
    stop: Box<dyn Fn() -> bool>,
}

impl TrialOrchestrator<Perf> {
    /// An orchestrator measuring with `perf_event` counters.
    pub fn new(config: TrialConfig) -> Self {
        TrialOrchestrator::with_backend(config, Perf)
    }
}

impl<B: CounterBackend> TrialOrchestrator<B> {
    /// An orchestrator measuring with `backend`.
    pub fn with_backend(config: TrialConfig, backend: B) -> Self {
        TrialOrchestrator {
            config,
            backend,
            state: TrialState::Idle,
            stop: Box::new(|| signal::pending().is_some()),
        }
    }

    /// Check `stop` after every emitted trial and end the run early once it
    /// returns true.
    ///
    /// Defaults to stopping once a signal registered with
    /// [`signal::watch_for`] has arrived.
    pub fn stop_when(self, stop: impl Fn() -> bool + 'static) -> Self {
        Self {
            stop: Box::new(stop),
            ..self
        }
    }

    #[allow(missing_docs)]
    pub fn config(&self) -> &TrialConfig {
        &self.config
    }

    /// The current lifecycle state; `Idle` between runs.
    pub fn state(&self) -> TrialState {
        self.state
    }

    #[allow(missing_docs)]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run every trial, writing a row per trial to `sink`.
    pub fn run<W: io::Write>(&mut self, sink: &mut MetricsSink<W>) -> Result<RunSummary, Error> {
        let outcome = self.run_trials(sink);
        self.state = TrialState::Idle;

        // The sink must be flushed whether or not the run failed.
        let flushed = sink.flush();

        match outcome {
            Ok(summary) => {
                flushed?;
                Ok(summary)
            }
            Err(e) => {
                tracing::error!(error = %e, rows = sink.rows(), "aborting run");
                Err(e)
            }
        }
    }

    fn run_trials<W: io::Write>(&mut self, sink: &mut MetricsSink<W>) -> Result<RunSummary, Error> {
        // Fail on a bad workload before touching memory or counters.
        self.config.workload.validate()?;

        let requested = self.config.trials;
        for trial in 0..requested {
            let result = self.run_trial(trial)?;

            sink.emit(result)?;
            self.enter(TrialState::Emitted);
            self.enter(TrialState::Idle);

            if trial + 1 < requested && (self.stop)() {
                tracing::info!(completed = trial + 1, requested, "stopping early");
                return Ok(RunSummary {
                    requested,
                    completed: trial + 1,
                    interrupted: true,
                });
            }
        }

        tracing::info!(trials = requested, "all trials complete");
        Ok(RunSummary {
            requested,
            completed: requested,
            interrupted: false,
        })
    }

    /// Run trial number `index` and return its measurements.
    pub fn run_trial(&mut self, index: usize) -> Result<TrialResult, Error> {
        let mut generator = WorkloadGenerator::new(self.config.workload.clone())?;

        host::flush_cache(self.config.flush_bytes)?;
        self.enter(TrialState::CacheFlushed);

        let mut buffer = WorkloadBuffer::allocate(generator.config().buffer_size_bytes)?;
        self.enter(TrialState::BufferAllocated);

        let mut counters = self.backend.open(&self.config.specs)?;

        let usage_before = ResourceUsage::capture()?;

        // Nothing but the workload may run while the counters count, so
        // these states are recorded without tracing.
        counters.arm_all()?;
        self.state = TrialState::Armed;
        self.state = TrialState::WorkloadRunning;
        let ran = generator.run(&mut buffer);
        let disarmed = counters.disarm_all();
        self.enter(TrialState::Disarmed);

        let usage_after = ResourceUsage::capture()?;
        ran?;
        disarmed?;

        let readings = counters.read_all()?;
        self.enter(TrialState::Read);

        counters.close();
        drop(buffer);

        let result = TrialResult::new(index, readings, usage_before, usage_after);
        tracing::info!(
            trial = index,
            cpu = ?host::current_cpu(),
            counters = result.counters().len(),
            "trial complete"
        );
        Ok(result)
    }

    fn enter(&mut self, state: TrialState) {
        tracing::trace!(from = ?self.state, to = ?state, "trial state");
        self.state = state;
    }
}

impl<B: CounterBackend + fmt::Debug> fmt::Debug for TrialOrchestrator<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrialOrchestrator")
            .field("config", &self.config)
            .field("backend", &self.backend)
            .field("state", &self.state)
            .finish()
    }
}
