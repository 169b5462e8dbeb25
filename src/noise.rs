//! Background noise generators.
//!
//! Run from a separate process pinned to another CPU, [`MemoryContention`]
//! touches random pages of a large anonymous mapping to compete with the
//! measured workload for memory bandwidth and page-table state.
//! [`BackgroundActivity`] is a lighter CPU and cache load that repeatedly
//! fills and updates a small array.

use std::{hint, ptr};

use crate::error::{new_os_error, with_cause, Error, ErrorKind};
use crate::workload::{Xorshift, STORE_STRIDE};

/// The system page size.
pub fn page_size() -> usize {
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        n if n > 0 => n as usize,
        _ => 4096,
    }
}

/// Installed physical memory in bytes, if the platform reports it.
pub fn physical_memory() -> Option<usize> {
    let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
    if pages <= 0 {
        return None;
    }
    (pages as usize).checked_mul(page_size())
}

/// A lazily-backed anonymous mapping whose pages are touched at random.
#[derive(Debug)]
pub struct MemoryContention {
    region: ptr::NonNull<u8>,
    len: usize,
    page_size: usize,
    rng: Xorshift,
}

impl MemoryContention {
    /// Map `bytes` of anonymous memory without reserving swap for it.
    pub fn new(bytes: usize) -> Result<Self, Error> {
        let page_size = page_size();
        if bytes < page_size {
            return Err(with_cause(
                ErrorKind::Allocation,
                format!("contention region must span at least one {} byte page", page_size),
            ));
        }

        #[cfg(target_os = "linux")]
        let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE;
        #[cfg(not(target_os = "linux"))]
        let flags = libc::MAP_PRIVATE | libc::MAP_ANON;

        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                bytes,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(new_os_error(ErrorKind::Allocation));
        }
        let region = ptr::NonNull::new(raw as *mut u8).ok_or_else(|| new_os_error(ErrorKind::Allocation))?;

        tracing::debug!(bytes, page_size, "mapped contention region");
        Ok(MemoryContention {
            region,
            len: bytes,
            page_size,
            rng: Xorshift::default(),
        })
    }

    /// Map a region the size of physical memory.
    pub fn whole_memory() -> Result<Self, Error> {
        let bytes = physical_memory().ok_or_else(|| {
            with_cause(ErrorKind::Platform, "unable to determine physical memory size")
        })?;
        MemoryContention::new(bytes)
    }

    /// Whole pages in the region.
    pub fn pages(&self) -> usize {
        self.len / self.page_size
    }

    /// Touch `steps` random pages, or keep going forever when `None`.
    ///
    /// Every page is read; every [`STORE_STRIDE`]th step also writes it.
    /// Returns the number of steps taken.
    pub fn run(&mut self, steps: Option<u64>) -> u64 {
        let pages = self.pages() as u64;
        let mut acc = 0u8;
        let mut step = 0u64;

        while steps.map_or(true, |limit| step < limit) {
            let page = (self.rng.next_u64() % pages) as usize;

            // SAFETY: page < pages, so the address is inside the mapping.
            unsafe {
                let addr = self.region.as_ptr().add(page * self.page_size);
                acc = acc.wrapping_add(ptr::read_volatile(addr));
                if step % STORE_STRIDE as u64 == 0 {
                    ptr::write_volatile(addr, 1);
                }
            }
            step += 1;
        }

        hint::black_box(acc);
        step
    }
}

impl Drop for MemoryContention {
    fn drop(&mut self) {
        unsafe { libc::munmap(self.region.as_ptr() as *mut libc::c_void, self.len) };
    }
}

/// Fills a fresh array with its indices and increments every element, once
/// per round.
#[derive(Debug, Clone, Copy)]
pub struct BackgroundActivity {
    elements: usize,
}

impl Default for BackgroundActivity {
    fn default() -> Self {
        BackgroundActivity::new(1_000_000)
    }
}

impl BackgroundActivity {
    #[allow(missing_docs)]
    pub fn new(elements: usize) -> Self {
        BackgroundActivity { elements }
    }

    /// Run one round and return the sum of the updated array.
    pub fn round(&self) -> Result<u64, Error> {
        let mut array: Vec<u32> = Vec::new();
        array
            .try_reserve_exact(self.elements)
            .map_err(|e| with_cause(ErrorKind::Allocation, e))?;

        array.extend((0..self.elements).map(|i| i as u32));
        for value in array.iter_mut() {
            *value = value.wrapping_add(1);
        }

        Ok(hint::black_box(&array).iter().map(|v| u64::from(*v)).sum())
    }

    /// Run `rounds` rounds, or keep going forever when `None`.
    ///
    /// Returns the number of rounds completed.
    pub fn run(&self, rounds: Option<u64>) -> Result<u64, Error> {
        let mut done = 0u64;
        while rounds.map_or(true, |limit| done < limit) {
            self.round()?;
            done += 1;
        }
        Ok(done)
    }
}
