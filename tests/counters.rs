//! These tests open real hardware counters and are ignored by default.
//! Run them with `cargo test -- --ignored` on a Linux host that permits
//! `perf_event_open`.

extern crate cacheprobe;

use cacheprobe::error::*;
use cacheprobe::{CounterGroup, CounterGroupSet, Counters, WorkloadBuffer, WorkloadConfig, WorkloadGenerator, CACHE_EVENTS};

fn workload() {
    let config = WorkloadConfig::default()
        .buffer_size_bytes(1 << 22)
        .working_set_lines(64)
        .outer_iterations(256);
    let mut buffer = WorkloadBuffer::allocate(config.buffer_size_bytes).expect("allocation failed");
    WorkloadGenerator::new(config)
        .expect("invalid config")
        .run(&mut buffer)
        .expect("workload failed");
}

#[test]
#[ignore]
fn test_probe() {
    cacheprobe::probe().expect("counters unavailable");
}

#[test]
#[ignore]
fn test_group_read_is_stable_after_disarm() {
    let mut group = CounterGroup::create().expect("failed to create group");
    for spec in &CACHE_EVENTS[..3] {
        group.add_member(spec.clone()).expect("failed to add member");
    }

    group.arm().expect("failed to arm");
    workload();
    group.disarm().expect("failed to disarm");
    let first = group.read().expect("first read failed");

    // A second disarm must leave the stopped values untouched.
    group.disarm().expect("failed to disarm twice");
    workload();
    let second = group.read().expect("second read failed");
    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
}

#[test]
#[ignore]
fn test_group_is_full() {
    let mut group = CounterGroup::create().expect("failed to create group");
    for spec in &CACHE_EVENTS[..3] {
        group.add_member(spec.clone()).expect("failed to add member");
    }

    let err = group.add_member(CACHE_EVENTS[3].clone()).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::Exhausted);
}

#[test]
#[ignore]
fn test_set_reads_every_counter() {
    let mut set = CounterGroupSet::new(&CACHE_EVENTS).expect("failed to open counters");
    assert_eq!(set.groups().len(), 4);

    set.arm_all().expect("failed to arm");
    assert_eq!(set.arm_all().unwrap_err().kind(), &ErrorKind::Armed);
    workload();
    set.disarm_all().expect("failed to disarm");

    let readings = set.read_all().expect("failed to read");
    assert_eq!(readings.len(), CACHE_EVENTS.len());
    assert!(readings["L1D Read Accesses"] > 0);

    set.close();
}
