#![allow(missing_docs)]

use std::{error, fmt, io};

#[derive(Debug)]
pub struct Error {
	kind: ErrorKind,
	cause: Option<Box<dyn error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	/// An unknown error
	Unknown,

	/// The caller does not have the appropriate permissions to open a
	/// counter.
	///
	/// Either run as root, grant `CAP_PERFMON`, or lower
	/// `kernel.perf_event_paranoid`.
	Forbidden,

	/// The CPU, the kernel or the target platform does not support the
	/// requested hardware event.
	Unsupported,

	/// The PMU (or the process) ran out of counters or file descriptors.
	Exhausted,

	/// `CounterOpen` is returned for `perf_event_open` failures that do not
	/// map onto [`Forbidden`], [`Unsupported`] or [`Exhausted`].
	///
	/// [`Forbidden`]: #variant.Forbidden
	/// [`Unsupported`]: #variant.Unsupported
	/// [`Exhausted`]: #variant.Exhausted
	CounterOpen,

	/// A requested counter had no value in the kernel's grouped read.
	///
	/// This is not fatal: the counter is reported as absent.
	IncompleteRead,

	/// The grouped read buffer returned by the kernel could not be decoded.
	ShortRead,

	/// A `PERF_EVENT_IOC_*` control call failed.
	Control,

	/// The requested operation cannot be performed on an armed counter group.
	Armed,

	/// The requested operation can only be performed on an armed counter
	/// group.
	NotArmed,

	/// The workload configuration violates a precondition (for example, the
	/// working set does not fit in the buffer).
	InvalidWorkloadConfig,

	/// The workload buffer could not be allocated.
	Allocation,

	/// Writing results failed.
	Io,

	/// An OS facility outside the counters (CPU affinity, resource usage,
	/// signal handling) failed.
	Platform,
}

impl ErrorKind {
	fn description(&self) -> &'static str {
		match self {
			ErrorKind::Unknown => "unknown error",
			ErrorKind::Forbidden => "insufficient privileges to open counter",
			ErrorKind::Unsupported => "hardware event unsupported",
			ErrorKind::Exhausted => "counter resources exhausted",
			ErrorKind::CounterOpen => "failed to open counter",
			ErrorKind::IncompleteRead => "counter missing from grouped read",
			ErrorKind::ShortRead => "malformed grouped read",
			ErrorKind::Control => "counter control call failed",
			ErrorKind::Armed => "counters are armed",
			ErrorKind::NotArmed => "counters are not armed",
			ErrorKind::InvalidWorkloadConfig => "invalid workload configuration",
			ErrorKind::Allocation => "failed to allocate workload buffer",
			ErrorKind::Io => "i/o error",
			ErrorKind::Platform => "platform call failed",
		}
	}
}

impl error::Error for Error {
	fn source(&self) -> Option<&(dyn error::Error + 'static)> {
		match self.cause {
			None => None,
			Some(ref b) => Some(&**b),
		}
	}
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.cause {
			None => write!(f, "{}", self.kind.description()),
			Some(ref cause) => write!(f, "{}: {}", self.kind.description(), cause),
		}
	}
}

#[doc(hidden)]
impl PartialEq for Error {
	fn eq(&self, other: &Error) -> bool {
		self.kind == other.kind
	}
}

impl From<io::Error> for Error {
	fn from(err: io::Error) -> Self {
		with_cause(ErrorKind::Io, err)
	}
}

impl From<csv::Error> for Error {
	fn from(err: csv::Error) -> Self {
		with_cause(ErrorKind::Io, err)
	}
}

impl Error {
	pub fn kind(&self) -> &ErrorKind {
		&self.kind
	}

	/// Returns true for every kind that means a counter could not be opened.
	pub fn is_counter_open(&self) -> bool {
		matches!(
			self.kind,
			ErrorKind::Forbidden
				| ErrorKind::Unsupported
				| ErrorKind::Exhausted
				| ErrorKind::CounterOpen
		)
	}
}

pub(crate) fn new_os_error(kind: ErrorKind) -> Error {
	// Get the last OS error to reference as the cause
	Error {
		kind,
		cause: Some(Box::new(io::Error::last_os_error())),
	}
}

pub(crate) fn with_cause<E>(kind: ErrorKind, cause: E) -> Error
where
	E: Into<Box<dyn error::Error + Send + Sync>>,
{
	Error {
		kind,
		cause: Some(cause.into()),
	}
}

pub fn new_error(kind: ErrorKind) -> Error {
	Error { kind, cause: None }
}

/// Classify a failed `perf_event_open` call.
pub(crate) fn open_error(err: io::Error) -> Error {
	let kind = match err.raw_os_error() {
		Some(libc::EACCES) | Some(libc::EPERM) => ErrorKind::Forbidden,
		Some(libc::ENOENT) | Some(libc::ENODEV) | Some(libc::EOPNOTSUPP) | Some(libc::ENOSYS) => {
			ErrorKind::Unsupported
		}
		Some(libc::EMFILE) | Some(libc::ENFILE) | Some(libc::ENOSPC) | Some(libc::EBUSY) => {
			ErrorKind::Exhausted
		}
		Some(_) => ErrorKind::CounterOpen,
		None if err.kind() == io::ErrorKind::Unsupported => ErrorKind::Unsupported,
		None => ErrorKind::Unknown,
	};
	with_cause(kind, err)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_open_error_classification() {
		let cases = [
			(libc::EACCES, ErrorKind::Forbidden),
			(libc::EPERM, ErrorKind::Forbidden),
			(libc::ENOENT, ErrorKind::Unsupported),
			(libc::EOPNOTSUPP, ErrorKind::Unsupported),
			(libc::EMFILE, ErrorKind::Exhausted),
			(libc::ENOSPC, ErrorKind::Exhausted),
			(libc::EINVAL, ErrorKind::CounterOpen),
		];

		for (errno, want) in cases.iter() {
			let err = open_error(io::Error::from_raw_os_error(*errno));
			assert_eq!(err.kind(), want, "errno {}", errno);
			assert!(err.is_counter_open());
		}
	}

	#[test]
	fn test_display_includes_cause() {
		let err = open_error(io::Error::from_raw_os_error(libc::EACCES));
		let msg = err.to_string();
		assert!(msg.starts_with("insufficient privileges"), "{}", msg);

		assert_eq!(
			new_error(ErrorKind::Allocation).to_string(),
			"failed to allocate workload buffer"
		);
	}

	#[test]
	fn test_non_open_kinds() {
		assert!(!new_error(ErrorKind::IncompleteRead).is_counter_open());
		assert!(!new_error(ErrorKind::InvalidWorkloadConfig).is_counter_open());
	}

	#[test]
	fn test_source_is_cause() {
		use std::error::Error as _;

		let err = open_error(io::Error::from_raw_os_error(libc::EPERM));
		let source = err.source().expect("missing source");
		let io_err = source
			.downcast_ref::<io::Error>()
			.expect("source is not an io::Error");
		assert_eq!(io_err.raw_os_error(), Some(libc::EPERM));

		assert!(new_error(ErrorKind::Control).source().is_none());
	}
}
