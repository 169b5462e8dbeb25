#![warn(missing_docs)]

//! `cacheprobe` measures the L1 data cache and data TLB behaviour of a
//! synthetic memory workload using grouped hardware performance counters on
//! [`Linux`].
//!
//! Each trial flushes the caches, allocates a fresh buffer, opens the
//! counters, and then runs the workload between a single reset+enable and a
//! single disable of every counter group. The counters are read back
//! atomically per group and written, together with the process's
//! `getrusage` deltas over the same window, as one CSV row.
//!
//! Counters are opened with [`perf_event_open`] as members of a group whose
//! leader is a disabled hardware event. The kernel reads, enables and
//! disables a group as a unit, and tags each value in a grouped read with
//! the member's id, which is how values are mapped back to
//! [`CounterSpec`] names. The PMU schedules at most four counters of a group
//! together, so specs are split into groups of [`MAX_MEMBERS`].
//!
//! Opening counters usually requires `CAP_PERFMON` (or root), or a
//! `kernel.perf_event_paranoid` of 2 or lower.
//!
//! ```no_run
//! use cacheprobe::{host, MetricsSink, TrialConfig, TrialOrchestrator};
//!
//! host::pin_to_cpu(4)?;
//!
//! let config = TrialConfig::default().trials(5);
//! let mut sink = MetricsSink::create("metrics.csv", config.specs())?;
//! let summary = TrialOrchestrator::new(config).run(&mut sink)?;
//!
//! println!("{} trials written", summary.completed);
//! #
//! # Ok::<(), cacheprobe::error::Error>(())
//! ```
//!
//! [`Linux`]: https://www.kernel.org/
//! [`perf_event_open`]: https://man7.org/linux/man-pages/man2/perf_event_open.2.html

#[macro_use]
extern crate lazy_static;

pub mod error;
pub mod host;
pub mod noise;
pub mod signal;

mod spec;
pub use self::spec::{Category, CounterSpec, Operation, Outcome, CACHE_EVENTS};

mod group;
pub use self::group::{probe, CounterGroup, GroupRead, MAX_MEMBERS};

mod set;
pub use self::set::{CounterBackend, CounterGroupSet, Counters, Perf, Readings};

mod workload;
pub use self::workload::{
    Access, AccessKind, WorkloadBuffer, WorkloadConfig, WorkloadGenerator, Xorshift, STORE_STRIDE,
};

mod trial;
pub use self::trial::{RunSummary, TrialConfig, TrialOrchestrator, TrialResult, TrialState};

mod sink;
pub use self::sink::MetricsSink;

#[cfg(target_os = "linux")]
mod sys;

#[cfg(not(target_os = "linux"))]
mod stubs;
