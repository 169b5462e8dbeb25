//! Process-level collaborators of a trial run: CPU pinning, cache flushing,
//! resource usage accounting and `/proc` inspection.

use std::time::Duration;
use std::{fs, hint, mem};

use crate::error::{new_os_error, with_cause, Error, ErrorKind};

/// Pin the calling process to logical CPU `cpu`.
#[cfg(target_os = "linux")]
pub fn pin_to_cpu(cpu: usize) -> Result<(), Error> {
    if cpu >= libc::CPU_SETSIZE as usize {
        return Err(with_cause(
            ErrorKind::Platform,
            format!("cpu {} exceeds CPU_SETSIZE", cpu),
        ));
    }

    let mut set: libc::cpu_set_t = unsafe { mem::zeroed() };
    unsafe {
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
    }

    if unsafe { libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &set) } != 0 {
        return Err(new_os_error(ErrorKind::Platform));
    }

    tracing::debug!(cpu, "pinned process");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn pin_to_cpu(_cpu: usize) -> Result<(), Error> {
    Err(with_cause(
        ErrorKind::Platform,
        "CPU affinity is only implemented on Linux",
    ))
}

/// The CPU the caller is running on, if the platform can tell.
pub fn current_cpu() -> Option<usize> {
    #[cfg(target_os = "linux")]
    {
        let cpu = unsafe { libc::sched_getcpu() };
        if cpu >= 0 {
            return Some(cpu as usize);
        }
    }
    None
}

/// Evict cached state by writing every byte of a throwaway allocation of
/// `bytes` bytes.
///
/// `bytes` should exceed the last-level cache.
pub fn flush_cache(bytes: usize) -> Result<(), Error> {
    let mut buf: Vec<u8> = Vec::new();
    buf.try_reserve_exact(bytes)
        .map_err(|e| with_cause(ErrorKind::Allocation, e))?;

    buf.extend((0..bytes).map(|i| i as u8));
    hint::black_box(&buf);

    tracing::trace!(bytes, "flushed cache");
    Ok(())
}

/// The text of `/proc/self/maps`.
pub fn memory_maps() -> Result<String, Error> {
    fs::read_to_string("/proc/self/maps").map_err(Error::from)
}

/// A `getrusage(RUSAGE_SELF)` snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    #[allow(missing_docs)]
    pub user_cpu: Duration,
    #[allow(missing_docs)]
    pub system_cpu: Duration,
    /// Peak resident set size in kilobytes.
    pub max_rss_kb: u64,
    /// Page faults served without I/O.
    pub minor_faults: u64,
    /// Page faults that required I/O.
    pub major_faults: u64,
    #[allow(missing_docs)]
    pub block_input_ops: u64,
    #[allow(missing_docs)]
    pub block_output_ops: u64,
    #[allow(missing_docs)]
    pub voluntary_context_switches: u64,
    #[allow(missing_docs)]
    pub involuntary_context_switches: u64,
}

impl ResourceUsage {
    /// Column names matching [`ResourceUsage::to_record`].
    pub const FIELD_NAMES: [&'static str; 9] = [
        "user_cpu_s",
        "system_cpu_s",
        "max_rss_kb",
        "minor_faults",
        "major_faults",
        "block_input_ops",
        "block_output_ops",
        "voluntary_ctx_switches",
        "involuntary_ctx_switches",
    ];

    /// Capture the current process's resource usage.
    pub fn capture() -> Result<Self, Error> {
        let mut ru: libc::rusage = unsafe { mem::zeroed() };
        if unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut ru) } != 0 {
            return Err(new_os_error(ErrorKind::Platform));
        }

        Ok(ResourceUsage {
            user_cpu: timeval(ru.ru_utime),
            system_cpu: timeval(ru.ru_stime),
            max_rss_kb: ru.ru_maxrss.max(0) as u64,
            minor_faults: ru.ru_minflt.max(0) as u64,
            major_faults: ru.ru_majflt.max(0) as u64,
            block_input_ops: ru.ru_inblock.max(0) as u64,
            block_output_ops: ru.ru_oublock.max(0) as u64,
            voluntary_context_switches: ru.ru_nvcsw.max(0) as u64,
            involuntary_context_switches: ru.ru_nivcsw.max(0) as u64,
        })
    }

    /// The usage accrued between `before` and `self`.
    ///
    /// `max_rss_kb` is a high-water mark and is kept as is.
    pub fn since(&self, before: &ResourceUsage) -> ResourceUsage {
        ResourceUsage {
            user_cpu: self.user_cpu.saturating_sub(before.user_cpu),
            system_cpu: self.system_cpu.saturating_sub(before.system_cpu),
            max_rss_kb: self.max_rss_kb,
            minor_faults: self.minor_faults.saturating_sub(before.minor_faults),
            major_faults: self.major_faults.saturating_sub(before.major_faults),
            block_input_ops: self.block_input_ops.saturating_sub(before.block_input_ops),
            block_output_ops: self.block_output_ops.saturating_sub(before.block_output_ops),
            voluntary_context_switches: self
                .voluntary_context_switches
                .saturating_sub(before.voluntary_context_switches),
            involuntary_context_switches: self
                .involuntary_context_switches
                .saturating_sub(before.involuntary_context_switches),
        }
    }

    /// Field values in [`FIELD_NAMES`](Self::FIELD_NAMES) order; CPU times
    /// are seconds with microsecond precision.
    pub fn to_record(&self) -> Vec<String> {
        vec![
            seconds(self.user_cpu),
            seconds(self.system_cpu),
            self.max_rss_kb.to_string(),
            self.minor_faults.to_string(),
            self.major_faults.to_string(),
            self.block_input_ops.to_string(),
            self.block_output_ops.to_string(),
            self.voluntary_context_switches.to_string(),
            self.involuntary_context_switches.to_string(),
        ]
    }
}

fn timeval(tv: libc::timeval) -> Duration {
    Duration::new(tv.tv_sec.max(0) as u64, 0) + Duration::from_micros(tv.tv_usec.max(0) as u64)
}

fn seconds(d: Duration) -> String {
    format!("{}.{:06}", d.as_secs(), d.subsec_micros())
}
