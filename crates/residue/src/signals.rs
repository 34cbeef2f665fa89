//! `SIGUSR1` / `SIGUSR2` requests.
//!
//! The handlers only raise flags. Nothing is logged from signal context;
//! the host picks the requests up from its own loop through
//! [`LeaksTracer::service_signals`](crate::LeaksTracer::service_signals).
//!
//! - `SIGUSR1`: log every live tracked object.
//! - `SIGUSR2`: start activity tracking, or log a checkpoint if already started.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

static INSTALLED: AtomicBool = AtomicBool::new(false);
static LIVE_OBJECTS_REQUESTED: AtomicBool = AtomicBool::new(false);
static CHECKPOINT_REQUESTED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalRequests {
    pub live_objects: bool,
    pub checkpoint: bool,
}

impl SignalRequests {
    pub fn any(self) -> bool {
        self.live_objects || self.checkpoint
    }
}

/// Install both handlers. Calling it again is a no-op.
pub fn install() -> io::Result<()> {
    if INSTALLED.swap(true, Ordering::AcqRel) {
        return Ok(());
    }

    for signal in [libc::SIGUSR1, libc::SIGUSR2] {
        let rc = unsafe {
            let mut sa: libc::sigaction = std::mem::zeroed();
            sa.sa_sigaction = on_signal as *const () as usize;
            sa.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
            libc::sigemptyset(&mut sa.sa_mask);
            libc::sigaction(signal, &sa, std::ptr::null_mut())
        };
        if rc != 0 {
            INSTALLED.store(false, Ordering::Release);
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

extern "C" fn on_signal(signal: libc::c_int, _info: *mut libc::siginfo_t, _ctx: *mut libc::c_void) {
    match signal {
        libc::SIGUSR1 => LIVE_OBJECTS_REQUESTED.store(true, Ordering::Release),
        libc::SIGUSR2 => CHECKPOINT_REQUESTED.store(true, Ordering::Release),
        _ => {}
    }
}

/// Take and clear whatever was requested since the last call.
pub fn take_pending() -> SignalRequests {
    SignalRequests {
        live_objects: LIVE_OBJECTS_REQUESTED.swap(false, Ordering::AcqRel),
        checkpoint: CHECKPOINT_REQUESTED.swap(false, Ordering::AcqRel),
    }
}
