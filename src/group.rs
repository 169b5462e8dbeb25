use std::collections::HashMap;
use std::convert::TryInto;
use std::fs::File;
use std::io::Read;
use std::mem;

#[cfg(not(target_os = "linux"))]
use crate::stubs as sys;
#[cfg(target_os = "linux")]
use crate::sys;

use crate::error::{new_error, open_error, with_cause, Error, ErrorKind};
use crate::spec::CounterSpec;

/// The number of measured counters a single group may hold.
///
/// The PMU schedules at most four counters of a group at once, and one of
/// those slots is taken by the leader.
pub const MAX_MEMBERS: usize = 3;

// Large enough for any group this crate builds.
const READ_BUF_LEN: usize = 4096;

/// The events this crate opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    /// The disabled hardware counter every group hangs off.
    Leader,

    /// Retired user-space instructions, used to probe for perf support.
    Instructions,

    /// A `PERF_TYPE_HW_CACHE` event with the given config.
    HwCache(u64),
}

/// A decoded `PERF_FORMAT_GROUP | PERF_FORMAT_ID` read.
///
/// The kernel writes a count `nr` followed by `nr` `(value, id)` pairs, all
/// native-endian `u64`s.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupRead {
    /// `(id, value)` pairs in kernel order.
    pub entries: Vec<(u64, u64)>,
}

impl GroupRead {
    /// Decode a grouped read buffer.
    ///
    /// Bytes past the last announced entry are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        const WORD: usize = mem::size_of::<u64>();

        let nr = match buf.get(..WORD) {
            Some(word) => word_at(word),
            None => return Err(short_read(buf.len(), WORD)),
        };

        let want = (nr as usize)
            .checked_mul(2 * WORD)
            .and_then(|n| n.checked_add(WORD))
            .ok_or_else(|| short_read(buf.len(), usize::MAX))?;
        if buf.len() < want {
            return Err(short_read(buf.len(), want));
        }

        let entries = buf[WORD..want]
            .chunks_exact(2 * WORD)
            .map(|pair| {
                let value = word_at(&pair[..WORD]);
                let id = word_at(&pair[WORD..]);
                (id, value)
            })
            .collect();

        Ok(GroupRead { entries })
    }

    /// The number of entries the kernel reported.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// The value reported for `id`.
    pub fn value_of(&self, id: u64) -> Option<u64> {
        self.entries
            .iter()
            .find(|(entry_id, _)| *entry_id == id)
            .map(|(_, value)| *value)
    }
}

fn word_at(bytes: &[u8]) -> u64 {
    // Callers always pass exactly eight bytes.
    u64::from_ne_bytes(bytes.try_into().unwrap_or([0; 8]))
}

fn short_read(got: usize, want: usize) -> Error {
    with_cause(
        ErrorKind::ShortRead,
        format!("grouped read returned {} bytes, expected {}", got, want),
    )
}

#[derive(Debug)]
struct Member {
    counter: File,
    spec: CounterSpec,
    id: u64,
}

/// A kernel counter group: a disabled leader plus up to [`MAX_MEMBERS`]
/// hardware cache counters that are reset, enabled, disabled and read
/// together.
///
/// ```no_run
/// use cacheprobe::{CounterGroup, CACHE_EVENTS};
///
/// let mut group = CounterGroup::create()?;
/// group.add_member(CACHE_EVENTS[0].clone())?;
///
/// group.arm()?;
/// // ... workload ...
/// group.disarm()?;
///
/// for (id, value) in group.read()? {
///     println!("{}: {}", id, value);
/// }
/// #
/// # Ok::<(), cacheprobe::error::Error>(())
/// ```
#[derive(Debug)]
pub struct CounterGroup {
    leader: Option<File>,
    members: Vec<Member>,
    armed: bool,
    started: bool,
}

impl CounterGroup {
    /// Open the disabled leader counter of a new group.
    pub fn create() -> Result<Self, Error> {
        let leader = sys::open(Event::Leader, true, None).map_err(open_error)?;
        tracing::trace!("opened group leader");

        Ok(CounterGroup {
            leader: Some(leader),
            members: Vec::with_capacity(MAX_MEMBERS),
            armed: false,
            started: false,
        })
    }

    /// Open a counter for `spec` in this group and record its kernel id.
    ///
    /// Members can only be added before the group is armed for the first
    /// time.
    pub fn add_member(&mut self, spec: CounterSpec) -> Result<u64, Error> {
        if self.started {
            return Err(new_error(ErrorKind::Armed));
        }
        if self.members.len() >= MAX_MEMBERS {
            return Err(with_cause(
                ErrorKind::Exhausted,
                format!("a group holds at most {} counters", MAX_MEMBERS),
            ));
        }

        let leader = self.leader()?;
        let counter =
            sys::open(Event::HwCache(spec.config()), false, Some(leader)).map_err(open_error)?;
        let id = sys::id(&counter).map_err(open_error)?;

        tracing::trace!(counter = %spec, id, "opened group member");
        self.members.push(Member { counter, spec, id });

        Ok(id)
    }

    /// Zero every counter in the group and start counting.
    pub fn arm(&mut self) -> Result<(), Error> {
        if self.armed {
            return Err(new_error(ErrorKind::Armed));
        }

        let leader = self.leader()?;
        sys::reset_group(leader).map_err(|e| with_cause(ErrorKind::Control, e))?;
        sys::enable_group(leader).map_err(|e| with_cause(ErrorKind::Control, e))?;

        self.armed = true;
        self.started = true;
        Ok(())
    }

    /// Stop counting for the whole group.
    ///
    /// Disarming a group that is not armed has no effect on its values.
    pub fn disarm(&mut self) -> Result<(), Error> {
        let leader = self.leader()?;
        sys::disable_group(leader).map_err(|e| with_cause(ErrorKind::Control, e))?;

        self.armed = false;
        Ok(())
    }

    /// Read every member's value, keyed by kernel id.
    ///
    /// Ids the kernel did not report are absent from the result. Reading an
    /// armed group is allowed but returns a live sample.
    pub fn read(&self) -> Result<HashMap<u64, u64>, Error> {
        let raw = self.read_raw()?;

        Ok(self
            .members
            .iter()
            .filter_map(|m| raw.value_of(m.id).map(|value| (m.id, value)))
            .collect())
    }

    /// Perform one grouped read on the leader.
    pub fn read_raw(&self) -> Result<GroupRead, Error> {
        if self.armed {
            tracing::trace!("reading armed group, values are a live sample");
        }

        let mut leader = self.leader()?;
        let mut buf = [0u8; READ_BUF_LEN];
        let n = leader
            .read(&mut buf)
            .map_err(|e| with_cause(ErrorKind::ShortRead, e))?;

        GroupRead::decode(&buf[..n])
    }

    /// The `(id, spec)` pairs of every member, in the order they were added.
    pub fn members(&self) -> impl Iterator<Item = (u64, &CounterSpec)> + '_ {
        self.members.iter().map(|m| (m.id, &m.spec))
    }

    /// The number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[allow(missing_docs)]
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Release the group's counters.
    ///
    /// Calling `close` more than once is a no-op.
    pub fn close(&mut self) {
        if self.leader.is_none() {
            return;
        }

        // Members MUST be closed before their leader.
        for member in self.members.drain(..) {
            drop(member.counter);
        }
        self.leader = None;
        self.armed = false;
        tracing::trace!("closed counter group");
    }

    fn leader(&self) -> Result<&File, Error> {
        self.leader
            .as_ref()
            .ok_or_else(|| with_cause(ErrorKind::Control, "counter group is closed"))
    }
}

impl Drop for CounterGroup {
    fn drop(&mut self) {
        self.close();
    }
}

/// Check that this process may open user-space hardware counters.
pub fn probe() -> Result<(), Error> {
    let counter = sys::open(Event::Instructions, true, None).map_err(open_error)?;
    drop(counter);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(entries: &[(u64, u64)]) -> Vec<u8> {
        let mut buf = (entries.len() as u64).to_ne_bytes().to_vec();
        for (id, value) in entries {
            buf.extend_from_slice(&value.to_ne_bytes());
            buf.extend_from_slice(&id.to_ne_bytes());
        }
        buf
    }

    #[test]
    fn test_decode_group_read() {
        let buf = encode(&[(7, 100), (9, 0), (11, u64::MAX)]);
        let read = GroupRead::decode(&buf).expect("decode failed");

        assert_eq!(read.count(), 3);
        assert_eq!(read.entries, vec![(7, 100), (9, 0), (11, u64::MAX)]);
        assert_eq!(read.value_of(9), Some(0));
        assert_eq!(read.value_of(8), None);
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut buf = encode(&[(1, 2)]);
        buf.extend_from_slice(&[0xff; 32]);

        let read = GroupRead::decode(&buf).expect("decode failed");
        assert_eq!(read.entries, vec![(1, 2)]);
    }

    #[test]
    fn test_decode_truncated() {
        let buf = encode(&[(1, 2), (3, 4)]);

        let err = GroupRead::decode(&buf[..buf.len() - 1]).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ShortRead);

        let err = GroupRead::decode(&buf[..4]).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ShortRead);
    }

    #[test]
    fn test_decode_absurd_count() {
        let buf = u64::MAX.to_ne_bytes();
        let err = GroupRead::decode(&buf).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ShortRead);
    }

    #[test]
    fn test_decode_empty_group() {
        let read = GroupRead::decode(&encode(&[])).expect("decode failed");
        assert_eq!(read.count(), 0);
    }
}
