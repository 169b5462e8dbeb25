use std::borrow::Cow;
use std::fmt;

/// The cache a hardware cache event is measured on.
///
/// Discriminants are the kernel's `PERF_COUNT_HW_CACHE_*` ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
	/// Level 1 data cache.
	L1D = 0,

	/// Data translation lookaside buffer.
	DTLB = 3,
}

/// The kind of access counted (`PERF_COUNT_HW_CACHE_OP_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
	/// Loads.
	Read = 0,
	/// Stores.
	Write = 1,
	/// Prefetches.
	Prefetch = 2,
}

/// Whether every access or only misses are counted
/// (`PERF_COUNT_HW_CACHE_RESULT_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
	/// Every access.
	Access = 0,
	/// Misses only.
	Miss = 1,
}

/// `CounterSpec` describes one hardware cache event to measure.
///
/// ```
/// use cacheprobe::{Category, CounterSpec, Operation, Outcome};
///
/// let spec = CounterSpec::new("DTLB Load Misses", Category::DTLB, Operation::Read, Outcome::Miss);
/// assert_eq!(spec.config(), 0x1_00_03);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterSpec {
	name: Cow<'static, str>,
	category: Category,
	operation: Operation,
	outcome: Outcome,
}

impl CounterSpec {
	/// Describe the event `category`/`operation`/`outcome`, reported as
	/// `name`.
	pub fn new(
		name: impl Into<Cow<'static, str>>,
		category: Category,
		operation: Operation,
		outcome: Outcome,
	) -> Self {
		Self {
			name: name.into(),
			category,
			operation,
			outcome,
		}
	}

	/// The name used to report this counter (and its CSV column header).
	pub fn name(&self) -> &str {
		&self.name
	}

	#[allow(missing_docs)]
	pub fn category(&self) -> Category {
		self.category
	}

	#[allow(missing_docs)]
	pub fn operation(&self) -> Operation {
		self.operation
	}

	#[allow(missing_docs)]
	pub fn outcome(&self) -> Outcome {
		self.outcome
	}

	/// The `perf_event_attr.config` value for a `PERF_TYPE_HW_CACHE` event.
	pub fn config(&self) -> u64 {
		(self.category as u64) | ((self.operation as u64) << 8) | ((self.outcome as u64) << 16)
	}
}

impl fmt::Display for CounterSpec {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} ({:#x})", self.name, self.config())
	}
}

lazy_static! {
	/// The ten L1D and DTLB events measured by default, in reporting order.
	pub static ref CACHE_EVENTS: Vec<CounterSpec> = {
		use self::Category::*;
		use self::Operation::*;
		use self::Outcome::*;

		vec![
			CounterSpec::new("L1D Read Misses", L1D, Read, Miss),
			CounterSpec::new("L1D Read Accesses", L1D, Read, Access),
			CounterSpec::new("L1D Write Misses", L1D, Write, Miss),
			CounterSpec::new("L1D Write Accesses", L1D, Write, Access),
			CounterSpec::new("L1D Prefetch Misses", L1D, Prefetch, Miss),
			CounterSpec::new("L1D Prefetch Accesses", L1D, Prefetch, Access),
			CounterSpec::new("DTLB Load Misses", DTLB, Read, Miss),
			CounterSpec::new("DTLB Load Accesses", DTLB, Read, Access),
			CounterSpec::new("DTLB Store Misses", DTLB, Write, Miss),
			CounterSpec::new("DTLB Store Accesses", DTLB, Write, Access),
		]
	};
}
