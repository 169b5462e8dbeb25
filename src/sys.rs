//! Thin wrappers over the `perf_event_open(2)` interface.

use std::fs::File;
use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd};

use perf_event_open_sys::bindings::{
    perf_event_attr, PERF_COUNT_HW_CACHE_MISSES, PERF_COUNT_HW_INSTRUCTIONS, PERF_FLAG_FD_CLOEXEC,
    PERF_FORMAT_GROUP, PERF_FORMAT_ID, PERF_IOC_FLAG_GROUP, PERF_TYPE_HARDWARE, PERF_TYPE_HW_CACHE,
};
use perf_event_open_sys::{ioctls, perf_event_open};

use crate::group::Event;

/// Open a user-space only counter for the calling process on any CPU,
/// attached to `group` when given.
pub(crate) fn open(event: Event, disabled: bool, group: Option<&File>) -> io::Result<File> {
    let (type_, config) = match event {
        Event::Leader => (PERF_TYPE_HARDWARE, PERF_COUNT_HW_CACHE_MISSES as u64),
        Event::Instructions => (PERF_TYPE_HARDWARE, PERF_COUNT_HW_INSTRUCTIONS as u64),
        Event::HwCache(config) => (PERF_TYPE_HW_CACHE, config),
    };

    let mut attrs = perf_event_attr {
        size: mem::size_of::<perf_event_attr>() as u32,
        type_,
        config,
        read_format: (PERF_FORMAT_GROUP | PERF_FORMAT_ID) as u64,
        ..perf_event_attr::default()
    };
    attrs.set_disabled(disabled as u64);
    attrs.set_exclude_kernel(1);
    attrs.set_exclude_hv(1);

    let group_fd = group.map_or(-1, |leader| leader.as_raw_fd());

    // pid 0 and cpu -1 measure the calling process wherever it runs.
    let fd = unsafe {
        perf_event_open(
            &mut attrs,
            0,
            -1,
            group_fd,
            PERF_FLAG_FD_CLOEXEC as libc::c_ulong,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(unsafe { File::from_raw_fd(fd) })
}

/// The kernel-assigned id reported next to this counter's value in grouped
/// reads.
pub(crate) fn id(counter: &File) -> io::Result<u64> {
    let mut id = 0u64;
    if unsafe { ioctls::ID(counter.as_raw_fd(), &mut id) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(id)
}

pub(crate) fn reset_group(leader: &File) -> io::Result<()> {
    check(unsafe { ioctls::RESET(leader.as_raw_fd(), PERF_IOC_FLAG_GROUP as libc::c_uint) })
}

pub(crate) fn enable_group(leader: &File) -> io::Result<()> {
    check(unsafe { ioctls::ENABLE(leader.as_raw_fd(), PERF_IOC_FLAG_GROUP as libc::c_uint) })
}

pub(crate) fn disable_group(leader: &File) -> io::Result<()> {
    check(unsafe { ioctls::DISABLE(leader.as_raw_fd(), PERF_IOC_FLAG_GROUP as libc::c_uint) })
}

fn check(ret: libc::c_int) -> io::Result<()> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
