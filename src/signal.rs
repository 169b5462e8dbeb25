//! Deferred handling of termination signals.
//!
//! A trial cannot be cancelled part way through. Once [`watch_for`] has
//! installed the handler, a watched signal is only recorded; the trial
//! loop polls [`pending`] after each trial and stops there.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{new_os_error, Error, ErrorKind};

static LAST_SIG: AtomicUsize = AtomicUsize::new(0);

extern "C" fn interrupt(sig: libc::c_int) {
	LAST_SIG.store(sig as usize, Ordering::SeqCst);
}

/// Record (rather than act on) each of `sigs` from now on.
pub fn watch_for(sigs: &[libc::c_int]) -> Result<(), Error> {
	let handler = interrupt as extern "C" fn(libc::c_int) as libc::sighandler_t;
	for sig in sigs {
		if unsafe { libc::signal(*sig, handler) } == libc::SIG_ERR {
			return Err(new_os_error(ErrorKind::Platform));
		}
	}
	Ok(())
}

/// The last watched signal received, if any.
pub fn pending() -> Option<libc::c_int> {
	match LAST_SIG.load(Ordering::SeqCst) as libc::c_int {
		0 => None,
		sig => Some(sig),
	}
}

/// Forget any recorded signal.
pub fn clear() {
	LAST_SIG.store(0, Ordering::SeqCst);
}
