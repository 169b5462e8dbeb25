extern crate cacheprobe;

use cacheprobe::{Counters, CounterGroupSet, WorkloadBuffer, WorkloadConfig, WorkloadGenerator, CACHE_EVENTS};

fn main() {
	let config = WorkloadConfig::default()
		.buffer_size_bytes(64 << 20)
		.outer_iterations(4096);

	let mut buffer = WorkloadBuffer::allocate(config.buffer_size_bytes).unwrap();
	let mut generator = WorkloadGenerator::new(config).unwrap();

	// Open all ten cache counters, split into groups of three
	let mut counters = CounterGroupSet::new(&CACHE_EVENTS).unwrap();

	// Reset and start every group, run the workload, then stop them
	counters.arm_all().unwrap();
	generator.run(&mut buffer).unwrap();
	counters.disarm_all().unwrap();

	let readings = counters.read_all().unwrap();
	for spec in CACHE_EVENTS.iter() {
		match readings.get(spec.name()) {
			Some(value) => println!("{:>24}: {}", spec.name(), value),
			None => println!("{:>24}: -", spec.name()),
		}
	}
}
