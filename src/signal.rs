/*! Signal counters.

SIGHUP, SIGINT, SIGUSR1 and SIGTERM are blocked process-wide and only
delivered inside the multiplexer's wait, which supplies an empty mask.
The handlers bump atomic counters and do nothing else; the event loop
consumes the counters whenever a wait returns interrupted.  A second
SIGINT or SIGTERM that arrives before the first was consumed aborts the
process outright.
*/

use nix::sys::signal::{sigaction, sigprocmask, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::signal::SigmaskHow;
use std::io;
use std::mem;
use std::sync::atomic::{AtomicU32, Ordering};

static HUP: AtomicU32 = AtomicU32::new(0);
static INT: AtomicU32 = AtomicU32::new(0);
static USR1: AtomicU32 = AtomicU32::new(0);
static TERM: AtomicU32 = AtomicU32::new(0);

extern "C" fn on_signal(signo: libc::c_int) {
    let counter = match signo {
        libc::SIGHUP => &HUP,
        libc::SIGINT => &INT,
        libc::SIGUSR1 => &USR1,
        libc::SIGTERM => &TERM,
        _ => return,
    };
    let prev = counter.fetch_add(1, Ordering::Relaxed);
    if prev > 0 && (signo == libc::SIGINT || signo == libc::SIGTERM) {
        // Still async-signal-safe, unlike anything more graceful.
        unsafe { libc::abort() };
    }
}

/// Install the handlers and block the four signals process-wide.  Call
/// once, before the first wait.
pub fn install() -> io::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    let mut block = SigSet::empty();
    for sig in [Signal::SIGHUP, Signal::SIGINT, Signal::SIGUSR1, Signal::SIGTERM] {
        unsafe { sigaction(sig, &action) }.map_err(io::Error::from)?;
        block.add(sig);
    }
    sigprocmask(SigmaskHow::SIG_BLOCK, Some(&block), None).map_err(io::Error::from)?;
    Ok(())
}

/// The mask handed to `epoll_pwait`/`ppoll`: deliver everything.
pub fn empty_sigset() -> libc::sigset_t {
    unsafe {
        let mut set = mem::zeroed();
        libc::sigemptyset(&mut set);
        set
    }
}

/// Consume the benign counters, returning (SIGHUP, SIGUSR1) counts.
pub fn take_benign() -> (u32, u32) {
    (
        HUP.swap(0, Ordering::Relaxed),
        USR1.swap(0, Ordering::Relaxed),
    )
}

/// Consume the shutdown counters; true if SIGINT or SIGTERM arrived.
pub fn take_shutdown() -> bool {
    INT.swap(0, Ordering::Relaxed) + TERM.swap(0, Ordering::Relaxed) > 0
}
