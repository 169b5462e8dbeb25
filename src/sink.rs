use std::fs::File;
use std::io;
use std::path::Path;

use crate::error::Error;
use crate::host::ResourceUsage;
use crate::spec::CounterSpec;
use crate::trial::TrialResult;

/// Writes one CSV row per trial.
///
/// The header (counter names, then [`ResourceUsage::FIELD_NAMES`]) is
/// written and flushed on creation, so the output is well-formed even if
/// the run aborts before the first row. Counters the kernel did not report
/// are written as empty fields.
pub struct MetricsSink<W: io::Write> {
    writer: csv::Writer<W>,
    names: Vec<String>,
    rows: usize,
}

impl MetricsSink<File> {
    /// Create (or truncate) the CSV file at `path`.
    pub fn create(path: impl AsRef<Path>, specs: &[CounterSpec]) -> Result<Self, Error> {
        let file = File::create(path)?;
        MetricsSink::new(file, specs)
    }
}

impl MetricsSink<io::Stdout> {
    /// Print rows to the console.
    pub fn stdout(specs: &[CounterSpec]) -> Result<Self, Error> {
        MetricsSink::new(io::stdout(), specs)
    }
}

impl<W: io::Write> MetricsSink<W> {
    /// Write the header for `specs` to `writer`.
    pub fn new(writer: W, specs: &[CounterSpec]) -> Result<Self, Error> {
        let mut writer = csv::Writer::from_writer(writer);
        let names: Vec<String> = specs.iter().map(|s| s.name().to_string()).collect();

        writer.write_record(
            names
                .iter()
                .map(String::as_str)
                .chain(ResourceUsage::FIELD_NAMES.iter().copied()),
        )?;
        writer.flush()?;

        Ok(MetricsSink {
            writer,
            names,
            rows: 0,
        })
    }

    /// Write the row for `result`.
    pub fn emit(&mut self, result: TrialResult) -> Result<(), Error> {
        let counters = self.names.iter().map(|name| match result.counter(name) {
            Some(value) => value.to_string(),
            None => String::new(),
        });
        let usage = result.usage().to_record();

        self.writer.write_record(counters.chain(usage))?;
        self.writer.flush()?;
        self.rows += 1;

        tracing::debug!(trial = result.trial_index(), rows = self.rows, "emitted trial");
        Ok(())
    }

    /// Data rows written so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[allow(missing_docs)]
    pub fn flush(&mut self) -> Result<(), Error> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and return the underlying writer.
    pub fn finish(self) -> Result<W, Error> {
        self.writer
            .into_inner()
            .map_err(|e| Error::from(e.into_error()))
    }
}
