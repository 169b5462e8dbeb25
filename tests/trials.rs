extern crate cacheprobe;

use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use cacheprobe::error::*;
use cacheprobe::{
    CounterBackend, CounterSpec, Counters, MetricsSink, Readings, TrialConfig, TrialOrchestrator,
    WorkloadConfig, CACHE_EVENTS,
};

type Log = Rc<RefCell<Vec<&'static str>>>;

/// A backend that hands out canned readings and records every call.
#[derive(Debug, Default)]
struct Scripted {
    log: Log,
    opens: usize,
    fail_open: Option<ErrorKind>,
    fail_on_open: Option<usize>,
    omit: Vec<&'static str>,
}

#[derive(Debug)]
struct ScriptedCounters {
    log: Log,
    readings: Readings,
}

impl CounterBackend for Scripted {
    type Counters = ScriptedCounters;

    fn open(&mut self, specs: &[CounterSpec]) -> Result<ScriptedCounters, Error> {
        self.opens += 1;
        self.log.borrow_mut().push("open");

        if let Some(kind) = self.fail_open {
            return Err(new_error(kind));
        }
        if self.fail_on_open == Some(self.opens) {
            return Err(new_error(ErrorKind::Exhausted));
        }

        let readings = specs
            .iter()
            .enumerate()
            .filter(|(_, spec)| !self.omit.iter().any(|name| *name == spec.name()))
            .map(|(i, spec)| (spec.name().to_string(), 1_000 + i as u64))
            .collect();

        Ok(ScriptedCounters {
            log: self.log.clone(),
            readings,
        })
    }
}

impl Counters for ScriptedCounters {
    fn arm_all(&mut self) -> Result<(), Error> {
        self.log.borrow_mut().push("arm");
        Ok(())
    }

    fn disarm_all(&mut self) -> Result<(), Error> {
        self.log.borrow_mut().push("disarm");
        Ok(())
    }

    fn read_all(&mut self) -> Result<Readings, Error> {
        self.log.borrow_mut().push("read");
        Ok(self.readings.clone())
    }

    fn close(&mut self) {
        self.log.borrow_mut().push("close");
    }
}

/// Log output shared between a subscriber and the test.
#[derive(Debug, Clone, Default)]
struct SharedLog(Arc<Mutex<Vec<u8>>>);

impl SharedLog {
    fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

impl io::Write for SharedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Records how much had been logged when the counters were armed and
/// disarmed.
#[derive(Debug)]
struct Windowed {
    log: SharedLog,
    marks: Rc<RefCell<Vec<usize>>>,
}

impl CounterBackend for Windowed {
    type Counters = Windowed;

    fn open(&mut self, _specs: &[CounterSpec]) -> Result<Windowed, Error> {
        Ok(Windowed {
            log: self.log.clone(),
            marks: self.marks.clone(),
        })
    }
}

impl Counters for Windowed {
    fn arm_all(&mut self) -> Result<(), Error> {
        self.marks.borrow_mut().push(self.log.len());
        Ok(())
    }

    fn disarm_all(&mut self) -> Result<(), Error> {
        self.marks.borrow_mut().push(self.log.len());
        Ok(())
    }

    fn read_all(&mut self) -> Result<Readings, Error> {
        Ok(Readings::new())
    }

    fn close(&mut self) {}
}

fn small_workload() -> WorkloadConfig {
    WorkloadConfig::default()
        .buffer_size_bytes(1 << 20)
        .working_set_lines(64)
        .locality_passes(2)
        .outer_iterations(16)
}

fn config(trials: usize) -> TrialConfig {
    TrialConfig::default()
        .trials(trials)
        .flush_bytes(1 << 16)
        .workload(small_workload())
}

fn output(sink: MetricsSink<Vec<u8>>) -> Vec<String> {
    let bytes = sink.finish().expect("failed to finish sink");
    String::from_utf8(bytes)
        .expect("output is not utf-8")
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_single_sequential_trial() {
    let workload = WorkloadConfig::default()
        .buffer_size_bytes(1 << 30)
        .cache_line_size_bytes(64)
        .working_set_lines(512)
        .locality_passes(16)
        .outer_iterations(1024)
        .random_access(false);
    let config = TrialConfig::default()
        .trials(1)
        .flush_bytes(1 << 16)
        .workload(workload);

    let mut sink = MetricsSink::new(Vec::new(), config.specs()).unwrap();
    let mut orchestrator = TrialOrchestrator::with_backend(config, Scripted::default());
    let summary = orchestrator.run(&mut sink).expect("run failed");

    assert_eq!(summary.completed, 1);
    assert!(!summary.interrupted);

    let lines = output(sink);
    assert_eq!(lines.len(), 2);

    let header: Vec<&str> = lines[0].split(',').collect();
    let row: Vec<&str> = lines[1].split(',').collect();
    assert_eq!(header.len(), 19);
    assert_eq!(row.len(), 19);
    assert_eq!(header[0], "L1D Read Misses");
    assert_eq!(header[10], "user_cpu_s");

    // Every counter is present.
    for (i, value) in row[..10].iter().enumerate() {
        assert_eq!(*value, (1_000 + i).to_string());
    }
}

#[test]
fn test_invalid_workload_fails_before_opening() {
    let workload = WorkloadConfig::default()
        .buffer_size_bytes(1_000)
        .working_set_lines(512)
        .cache_line_size_bytes(64);
    let config = config(3).workload(workload);

    let mut sink = MetricsSink::new(Vec::new(), config.specs()).unwrap();
    let mut orchestrator = TrialOrchestrator::with_backend(config, Scripted::default());

    let err = orchestrator.run(&mut sink).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::InvalidWorkloadConfig);
    assert_eq!(orchestrator.backend().opens, 0);
    assert_eq!(output(sink).len(), 1);
}

#[test]
fn test_forbidden_counters_leave_header_only() {
    let backend = Scripted {
        fail_open: Some(ErrorKind::Forbidden),
        ..Scripted::default()
    };
    let config = config(5);

    let mut sink = MetricsSink::new(Vec::new(), config.specs()).unwrap();
    let mut orchestrator = TrialOrchestrator::with_backend(config, backend);

    let err = orchestrator.run(&mut sink).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::Forbidden);
    assert!(err.is_counter_open());
    assert_eq!(sink.rows(), 0);

    let lines = output(sink);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("L1D Read Misses,"));
}

#[test]
fn test_missing_counter_is_empty_field() {
    let backend = Scripted {
        omit: vec!["L1D Write Misses"],
        ..Scripted::default()
    };
    let config = config(1);

    let mut sink = MetricsSink::new(Vec::new(), config.specs()).unwrap();
    TrialOrchestrator::with_backend(config, backend)
        .run(&mut sink)
        .expect("run failed");

    let lines = output(sink);
    let row: Vec<&str> = lines[1].split(',').collect();
    assert_eq!(row.len(), 19);
    assert_eq!(row[1], "1001");
    assert_eq!(row[2], "");
    assert_eq!(row[3], "1003");
}

#[test]
fn test_stop_at_trial_boundary() {
    let config = config(5);
    let backend = Scripted::default();
    let log = backend.log.clone();

    let mut sink = MetricsSink::new(Vec::new(), config.specs()).unwrap();
    let mut orchestrator = TrialOrchestrator::with_backend(config, backend).stop_when(|| true);
    let summary = orchestrator.run(&mut sink).expect("run failed");

    assert_eq!(summary.requested, 5);
    assert_eq!(summary.completed, 1);
    assert!(summary.interrupted);
    assert_eq!(sink.rows(), 1);

    // The interrupted trial still ran to completion.
    assert_eq!(log.borrow().last(), Some(&"close"));
}

#[test]
fn test_failure_keeps_earlier_rows() {
    let backend = Scripted {
        fail_on_open: Some(2),
        ..Scripted::default()
    };
    let config = config(4);

    let mut sink = MetricsSink::new(Vec::new(), config.specs()).unwrap();
    let mut orchestrator = TrialOrchestrator::with_backend(config, backend);

    let err = orchestrator.run(&mut sink).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::Exhausted);
    assert_eq!(orchestrator.backend().opens, 2);
    assert_eq!(output(sink).len(), 2);
}

#[test]
fn test_allocation_failure_aborts_run() {
    // Passes validation, but no mapping can be this large.
    let config = config(3).workload(small_workload().buffer_size_bytes(isize::MAX as usize));

    let mut sink = MetricsSink::new(Vec::new(), config.specs()).unwrap();
    let mut orchestrator = TrialOrchestrator::with_backend(config, Scripted::default());

    let err = orchestrator.run(&mut sink).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::Allocation);
    assert_eq!(orchestrator.backend().opens, 0);
    assert_eq!(sink.rows(), 0);

    let lines = output(sink);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("L1D Read Misses,"));
}

#[test]
fn test_nothing_logged_while_counting() {
    let log = SharedLog::default();
    let marks = Rc::new(RefCell::new(Vec::new()));
    let backend = Windowed {
        log: log.clone(),
        marks: marks.clone(),
    };

    let writer = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_writer(move || writer.clone())
        .finish();

    let config = config(2);
    let mut sink = MetricsSink::new(Vec::new(), config.specs()).unwrap();
    let mut orchestrator = TrialOrchestrator::with_backend(config, backend);
    tracing::subscriber::with_default(subscriber, || {
        orchestrator.run(&mut sink).expect("run failed");
    });

    let marks = marks.borrow();
    assert_eq!(marks.len(), 4);

    // Trace output exists before arming, and none between arm and disarm.
    assert!(marks[0] > 0);
    assert_eq!(marks[0], marks[1]);
    assert_eq!(marks[2], marks[3]);
    assert!(log.len() > marks[3]);
}

#[test]
fn test_call_order() {
    let config = config(2);
    let backend = Scripted::default();
    let log = backend.log.clone();

    let mut sink = MetricsSink::new(Vec::new(), config.specs()).unwrap();
    TrialOrchestrator::with_backend(config, backend)
        .run(&mut sink)
        .expect("run failed");

    assert_eq!(
        *log.borrow(),
        vec![
            "open", "arm", "disarm", "read", "close", "open", "arm", "disarm", "read", "close",
        ]
    );
    assert_eq!(CACHE_EVENTS.len(), 10);
}
