//! Stand-ins for the kernel interface on targets without `perf_event_open`.

#![allow(dead_code)]

use std::fs::File;
use std::io;

use crate::group::Event;

fn unsupported() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "perf_event_open is only implemented on Linux",
    )
}

pub(crate) fn open(_event: Event, _disabled: bool, _group: Option<&File>) -> io::Result<File> {
    Err(unsupported())
}

pub(crate) fn id(_counter: &File) -> io::Result<u64> {
    Err(unsupported())
}

pub(crate) fn reset_group(_leader: &File) -> io::Result<()> {
    Err(unsupported())
}

pub(crate) fn enable_group(_leader: &File) -> io::Result<()> {
    Err(unsupported())
}

pub(crate) fn disable_group(_leader: &File) -> io::Result<()> {
    Err(unsupported())
}
