//! Synthetic memory workload.
//!
//! Each outer iteration picks a working set of consecutive cache lines and
//! scans it `locality_passes` times, storing to every 8th line and loading
//! from the rest. Repeated scans give temporal locality; the choice of base
//! between iterations decides spatial reuse across the buffer:
//!
//! * sequential mode walks the buffer one working set at a time, wrapping
//!   at the end, so every line is visited once per wrap;
//! * random mode picks a base uniformly from `[0, buffer_lines -
//!   working_set_lines)` using a fixed-seed [`Xorshift`], so two runs visit
//!   identical offsets.

use std::ops::{Deref, DerefMut};
use std::{hint, ptr, slice};

use serde::{Deserialize, Serialize};

use crate::error::{new_os_error, with_cause, Error, ErrorKind};

/// Every `STORE_STRIDE`th line of a working-set scan is written.
pub const STORE_STRIDE: usize = 8;

/// Workload parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Size of the buffer the workload runs over.
    pub buffer_size_bytes: usize,

    /// Distance between touched addresses.
    pub cache_line_size_bytes: usize,

    /// Lines in one working set.
    pub working_set_lines: usize,

    /// Scans of a working set per outer iteration.
    pub locality_passes: usize,

    /// Working sets visited.
    pub outer_iterations: usize,

    /// Pick working sets at random rather than sequentially.
    pub random_access: bool,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        WorkloadConfig {
            buffer_size_bytes: 1 << 30,
            cache_line_size_bytes: 64,
            working_set_lines: 512,
            locality_passes: 16,
            outer_iterations: 1 << 20,
            random_access: true,
        }
    }
}

#[allow(missing_docs)]
impl WorkloadConfig {
    pub fn buffer_size_bytes(self, bytes: usize) -> Self {
        Self {
            buffer_size_bytes: bytes,
            ..self
        }
    }

    pub fn cache_line_size_bytes(self, bytes: usize) -> Self {
        Self {
            cache_line_size_bytes: bytes,
            ..self
        }
    }

    pub fn working_set_lines(self, lines: usize) -> Self {
        Self {
            working_set_lines: lines,
            ..self
        }
    }

    pub fn locality_passes(self, passes: usize) -> Self {
        Self {
            locality_passes: passes,
            ..self
        }
    }

    pub fn outer_iterations(self, iterations: usize) -> Self {
        Self {
            outer_iterations: iterations,
            ..self
        }
    }

    pub fn random_access(self, random: bool) -> Self {
        Self {
            random_access: random,
            ..self
        }
    }

    /// Whole cache lines in the buffer.
    pub fn buffer_lines(&self) -> usize {
        self.buffer_size_bytes
            .checked_div(self.cache_line_size_bytes)
            .unwrap_or(0)
    }

    /// Check the configuration can run without touching memory outside the
    /// buffer.
    pub fn validate(&self) -> Result<(), Error> {
        if self.cache_line_size_bytes == 0 {
            return Err(invalid("cache line size must be non-zero".to_string()));
        }
        if self.working_set_lines == 0 {
            return Err(invalid("working set must hold at least one line".to_string()));
        }

        let buffer_lines = self.buffer_lines();
        if self.working_set_lines >= buffer_lines {
            return Err(invalid(format!(
                "working set of {} lines does not fit in a buffer of {} lines ({} bytes / {} byte lines)",
                self.working_set_lines,
                buffer_lines,
                self.buffer_size_bytes,
                self.cache_line_size_bytes
            )));
        }

        Ok(())
    }
}

fn invalid(msg: String) -> Error {
    with_cause(ErrorKind::InvalidWorkloadConfig, msg)
}

/// Marsaglia's xorshift128 over 64-bit words.
///
/// Not suitable for anything but reproducible workload offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Xorshift {
    x: u64,
    y: u64,
    z: u64,
    w: u64,
}

impl Default for Xorshift {
    fn default() -> Self {
        Xorshift::from_state([1, 4, 7, 13])
    }
}

impl Xorshift {
    /// A generator starting from `state`, which must not be all zero.
    pub fn from_state(state: [u64; 4]) -> Self {
        let [x, y, z, w] = state;
        Xorshift { x, y, z, w }
    }

    /// The next value in the sequence.
    pub fn next_u64(&mut self) -> u64 {
        let mut t = self.x;
        t ^= t << 11;
        t ^= t >> 8;
        self.x = self.y;
        self.y = self.z;
        self.z = self.w;
        self.w ^= self.w >> 19;
        self.w ^= t;
        self.w
    }
}

impl Iterator for Xorshift {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        Some(self.next_u64())
    }
}

/// Whether a line is loaded or stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    #[allow(missing_docs)]
    Load,
    #[allow(missing_docs)]
    Store,
}

/// One memory touch, `offset` bytes into the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    /// Bytes from the start of the buffer.
    pub offset: usize,
    #[allow(missing_docs)]
    pub kind: AccessKind,
}

/// Generates the workload described by a [`WorkloadConfig`].
#[derive(Debug, Clone)]
pub struct WorkloadGenerator {
    config: WorkloadConfig,
    rng: Xorshift,
    next_sequential: usize,
}

impl WorkloadGenerator {
    /// Validate `config` and build a generator with the fixed seed.
    pub fn new(config: WorkloadConfig) -> Result<Self, Error> {
        config.validate()?;

        Ok(WorkloadGenerator {
            config,
            rng: Xorshift::default(),
            next_sequential: 0,
        })
    }

    /// The validated configuration.
    pub fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    /// The first line of the next working set.
    pub fn next_base(&mut self) -> usize {
        let ws = self.config.working_set_lines;
        let buffer_lines = self.config.buffer_lines();

        if self.config.random_access {
            // validate() guarantees a non-zero range.
            let range = (buffer_lines - ws) as u64;
            return (self.rng.next_u64() % range) as usize;
        }

        let base = self.next_sequential;
        self.next_sequential += ws;
        if self.next_sequential + ws > buffer_lines {
            self.next_sequential = 0;
        }
        base
    }

    /// Drive the workload, passing every access to `visit` instead of
    /// touching memory.
    pub fn run_with<F>(&mut self, mut visit: F)
    where
        F: FnMut(Access),
    {
        let line = self.config.cache_line_size_bytes;
        let ws = self.config.working_set_lines;

        for _ in 0..self.config.outer_iterations {
            let base = self.next_base();
            for _ in 0..self.config.locality_passes {
                for i in 0..ws {
                    let kind = if i % STORE_STRIDE == 0 {
                        AccessKind::Store
                    } else {
                        AccessKind::Load
                    };
                    visit(Access {
                        offset: (base + i) * line,
                        kind,
                    });
                }
            }
        }
    }

    /// Run the workload over `buf`.
    ///
    /// Fails without touching memory if `buf` is smaller than the configured
    /// buffer size.
    pub fn run(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        if buf.len() < self.config.buffer_size_bytes {
            return Err(invalid(format!(
                "buffer of {} bytes is smaller than the configured {} bytes",
                buf.len(),
                self.config.buffer_size_bytes
            )));
        }

        let start = buf.as_mut_ptr();
        self.run_with(|access| {
            // SAFETY: every offset is below buffer_lines * line, which is at
            // most buf.len().
            unsafe {
                let addr = start.add(access.offset);
                match access.kind {
                    AccessKind::Store => ptr::write_volatile(addr, 1),
                    AccessKind::Load => {
                        hint::black_box(ptr::read_volatile(addr));
                    }
                }
            }
        });

        Ok(())
    }
}

/// A zeroed, page-aligned anonymous mapping for the workload.
///
/// Pages are only backed once touched, so first-touch faults land inside
/// the measured window.
#[derive(Debug)]
pub struct WorkloadBuffer {
    ptr: ptr::NonNull<u8>,
    len: usize,
}

impl WorkloadBuffer {
    /// Page alignment keeps TLB behaviour comparable between trials.
    pub const ALIGN: usize = 4096;

    /// Map `size` zeroed bytes.
    pub fn allocate(size: usize) -> Result<Self, Error> {
        if size == 0 {
            return Err(with_cause(ErrorKind::Allocation, "zero-sized buffer"));
        }
        if size > isize::MAX as usize {
            return Err(with_cause(
                ErrorKind::Allocation,
                format!("buffer of {} bytes exceeds the address space", size),
            ));
        }

        #[cfg(target_os = "linux")]
        let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE;
        #[cfg(not(target_os = "linux"))]
        let flags = libc::MAP_PRIVATE | libc::MAP_ANON;

        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(new_os_error(ErrorKind::Allocation));
        }
        let ptr = ptr::NonNull::new(raw as *mut u8).ok_or_else(|| new_os_error(ErrorKind::Allocation))?;

        tracing::trace!(bytes = size, "mapped workload buffer");
        Ok(WorkloadBuffer { ptr, len: size })
    }
}

impl Deref for WorkloadBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the mapping is len readable bytes, zero until written.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for WorkloadBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and we hold the only reference.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for WorkloadBuffer {
    fn drop(&mut self) {
        unsafe { libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len) };
    }
}
