use std::collections::HashMap;
use std::slice;

use crate::error::{new_error, with_cause, Error, ErrorKind};
use crate::group::{CounterGroup, MAX_MEMBERS};
use crate::spec::CounterSpec;

/// Counter values keyed by [`CounterSpec::name`].
///
/// A name with no entry was not reported by the kernel; it is never
/// defaulted to zero.
pub type Readings = HashMap<String, u64>;

/// A set of counters that is armed around a workload and read afterwards.
pub trait Counters {
    /// Zero and start every counter.
    fn arm_all(&mut self) -> Result<(), Error>;

    /// Stop every counter. Must follow exactly one `arm_all`.
    fn disarm_all(&mut self) -> Result<(), Error>;

    /// Read every counter by name.
    fn read_all(&mut self) -> Result<Readings, Error>;

    /// Release the counters.
    fn close(&mut self);
}

/// Opens a fresh set of [`Counters`] for a list of specs.
pub trait CounterBackend {
    /// The counters this backend opens.
    type Counters: Counters;

    /// Open one counter per spec.
    fn open(&mut self, specs: &[CounterSpec]) -> Result<Self::Counters, Error>;
}

/// The Linux `perf_event` backend, opening a [`CounterGroupSet`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Perf;

impl CounterBackend for Perf {
    type Counters = CounterGroupSet;

    fn open(&mut self, specs: &[CounterSpec]) -> Result<CounterGroupSet, Error> {
        CounterGroupSet::new(specs)
    }
}

/// Every [`CounterGroup`] needed to measure a list of specs.
///
/// Specs are split, in order, into groups of at most [`MAX_MEMBERS`]; each
/// group gets its own leader.
///
/// ```no_run
/// use cacheprobe::{CounterGroupSet, Counters, CACHE_EVENTS};
///
/// let mut set = CounterGroupSet::new(&CACHE_EVENTS)?;
/// set.arm_all()?;
/// // ... workload ...
/// set.disarm_all()?;
///
/// let readings = set.read_all()?;
/// println!("L1D read misses: {:?}", readings.get("L1D Read Misses"));
/// #
/// # Ok::<(), cacheprobe::error::Error>(())
/// ```
#[derive(Debug)]
pub struct CounterGroupSet {
    groups: Vec<CounterGroup>,
    names: HashMap<u64, String>,
    specs: Vec<CounterSpec>,
    armed: bool,
}

impl CounterGroupSet {
    /// Open a group per [`MAX_MEMBERS`] specs and record every member's id.
    pub fn new(specs: &[CounterSpec]) -> Result<Self, Error> {
        let mut groups = Vec::new();
        let mut names = HashMap::with_capacity(specs.len());

        for chunk in partition(specs) {
            let mut group = CounterGroup::create()?;
            for spec in chunk {
                let id = group.add_member(spec.clone())?;
                if let Some(previous) = names.insert(id, spec.name().to_string()) {
                    return Err(with_cause(
                        ErrorKind::CounterOpen,
                        format!(
                            "kernel id {} assigned to both {:?} and {:?}",
                            id,
                            previous,
                            spec.name()
                        ),
                    ));
                }
            }
            groups.push(group);
        }

        tracing::debug!(
            counters = specs.len(),
            groups = groups.len(),
            "opened counter groups"
        );

        Ok(CounterGroupSet {
            groups,
            names,
            specs: specs.to_vec(),
            armed: false,
        })
    }

    /// The specs measured by this set, in construction order.
    pub fn specs(&self) -> &[CounterSpec] {
        &self.specs
    }

    /// The groups, in creation order.
    pub fn groups(&self) -> &[CounterGroup] {
        &self.groups
    }
}

impl Counters for CounterGroupSet {
    fn arm_all(&mut self) -> Result<(), Error> {
        if self.armed {
            return Err(new_error(ErrorKind::Armed));
        }

        for idx in 0..self.groups.len() {
            if let Err(e) = self.groups[idx].arm() {
                // Leave no group counting behind a failed arm.
                for group in &mut self.groups[..idx] {
                    let _ = group.disarm();
                }
                return Err(e);
            }
        }

        self.armed = true;
        Ok(())
    }

    fn disarm_all(&mut self) -> Result<(), Error> {
        if !self.armed {
            return Err(new_error(ErrorKind::NotArmed));
        }
        self.armed = false;

        // Stop every group even if one of them fails.
        let mut first_err = None;
        for group in &mut self.groups {
            if let Err(e) = group.disarm() {
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn read_all(&mut self) -> Result<Readings, Error> {
        let reads = self
            .groups
            .iter()
            .map(CounterGroup::read)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(correlate(&self.names, &self.specs, reads))
    }

    fn close(&mut self) {
        for group in &mut self.groups {
            group.close();
        }
        self.armed = false;
    }
}

/// Split `specs` into group-sized chunks, preserving order.
pub(crate) fn partition(specs: &[CounterSpec]) -> slice::Chunks<'_, CounterSpec> {
    specs.chunks(MAX_MEMBERS)
}

/// Merge per-group `id -> value` reads into `name -> value`, logging an
/// [`ErrorKind::IncompleteRead`] for every spec left without a value.
pub(crate) fn correlate(
    names: &HashMap<u64, String>,
    specs: &[CounterSpec],
    reads: impl IntoIterator<Item = HashMap<u64, u64>>,
) -> Readings {
    let mut readings = Readings::with_capacity(specs.len());
    for read in reads {
        for (id, value) in read {
            match names.get(&id) {
                Some(name) => {
                    readings.insert(name.clone(), value);
                }
                None => tracing::trace!(id, value, "ignoring value for unknown counter id"),
            }
        }
    }

    let missing: Vec<&str> = specs
        .iter()
        .map(CounterSpec::name)
        .filter(|name| !readings.contains_key(*name))
        .collect();
    if !missing.is_empty() {
        let err = new_error(ErrorKind::IncompleteRead);
        tracing::warn!(error = %err, ?missing, "reporting counters as absent");
    }

    readings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::CACHE_EVENTS;

    fn ids() -> HashMap<u64, String> {
        CACHE_EVENTS
            .iter()
            .enumerate()
            .map(|(i, spec)| (100 + i as u64, spec.name().to_string()))
            .collect()
    }

    #[test]
    fn test_partition_sizes() {
        let sizes: Vec<usize> = partition(&CACHE_EVENTS).map(|c| c.len()).collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);

        let sizes: Vec<usize> = partition(&CACHE_EVENTS[..6]).map(|c| c.len()).collect();
        assert_eq!(sizes, vec![3, 3]);

        assert_eq!(partition(&[]).count(), 0);
    }

    #[test]
    fn test_partition_preserves_order() {
        let flattened: Vec<&CounterSpec> = partition(&CACHE_EVENTS).flatten().collect();
        let original: Vec<&CounterSpec> = CACHE_EVENTS.iter().collect();
        assert_eq!(flattened, original);
    }

    #[test]
    fn test_correlate_all_present() {
        let names = ids();

        // One read per group of three, plus a leader value with an unknown id.
        let reads = partition(&CACHE_EVENTS).enumerate().map(|(g, chunk)| {
            let mut read: HashMap<u64, u64> = chunk
                .iter()
                .enumerate()
                .map(|(i, _)| {
                    let id = 100 + (g * MAX_MEMBERS + i) as u64;
                    (id, id * 10)
                })
                .collect();
            read.insert(9_000 + g as u64, 1);
            read
        });

        let readings = correlate(&names, &CACHE_EVENTS, reads);
        assert_eq!(readings.len(), CACHE_EVENTS.len());
        assert_eq!(readings["L1D Read Misses"], 1_000);
        assert_eq!(readings["DTLB Store Accesses"], 1_090);
    }

    #[test]
    fn test_correlate_missing_is_absent() {
        let names = ids();

        // The kernel dropped "L1D Write Misses" (id 102).
        let read: HashMap<u64, u64> = (100..110).filter(|id| *id != 102).map(|id| (id, 0)).collect();

        let readings = correlate(&names, &CACHE_EVENTS, vec![read]);
        assert_eq!(readings.len(), CACHE_EVENTS.len() - 1);
        assert_eq!(readings.get("L1D Write Misses"), None);
        assert_eq!(readings.get("L1D Read Misses"), Some(&0));
    }
}
