//! Cooperative-cancellation token inspected at loop boundaries and
//! suspension points, replacing ad-hoc `volatile` signal flags.
//! Handlers only set flags; all actual handling happens when the
//! Session Controller next checks the token.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const NONE: u8 = 0;
const SIGINT_RECEIVED: u8 = 1;
const SHUTDOWN_REQUESTED: u8 = 2;

static FLAG: AtomicU8 = AtomicU8::new(NONE);

/// Shared, cheaply cloneable handle onto the process-wide flag.
#[derive(Clone, Default)]
pub struct CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    None,
    Interrupt,
    Shutdown,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken
    }

    pub fn poll(&self) -> Signal {
        match FLAG.swap(NONE, Ordering::SeqCst) {
            SIGINT_RECEIVED => Signal::Interrupt,
            SHUTDOWN_REQUESTED => Signal::Shutdown,
            _ => Signal::None,
        }
    }

    pub fn shutdown_requested(&self) -> bool {
        FLAG.load(Ordering::SeqCst) == SHUTDOWN_REQUESTED
    }
}

extern "C" fn on_sigint(_: libc::c_int) {
    FLAG.store(SIGINT_RECEIVED, Ordering::SeqCst);
}

extern "C" fn on_shutdown(_: libc::c_int) {
    FLAG.store(SHUTDOWN_REQUESTED, Ordering::SeqCst);
}

extern "C" fn ignore(_: libc::c_int) {}

/// Installs the session's signal disposition:
/// - `SIGINT`: handled (forwarded to children by the executor, or
///   clears the input line when no child runs).
/// - `SIGTSTP`: ignored.
/// - `SIGTERM`/`SIGQUIT`: set the shutdown flag.
/// - `SIGHUP`/`SIGPIPE`: ignored.
pub fn install_handlers() -> CancellationToken {
    // SAFETY: each handler is a valid `extern "C" fn(c_int)` with
    // 'static lifetime, the only requirement `signal(2)` imposes.
    unsafe {
        libc::signal(libc::SIGINT, on_sigint as libc::sighandler_t);
        libc::signal(libc::SIGTSTP, libc::SIG_IGN);
        libc::signal(libc::SIGTERM, on_shutdown as libc::sighandler_t);
        libc::signal(libc::SIGQUIT, on_shutdown as libc::sighandler_t);
        libc::signal(libc::SIGHUP, libc::SIG_IGN);
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
    let _ = ignore as extern "C" fn(libc::c_int);
    CancellationToken::new()
}

/// Returns the original disposition functions to their defaults;
/// used by the executor's parent around `waitpid` so the child
/// inherits default signal behavior and the parent can forward
/// `SIGINT` during the wait.
pub struct RestoreGuard {
    signals: Vec<libc::c_int>,
}

impl RestoreGuard {
    pub fn ignore_for_child_wait(signals: &[libc::c_int]) -> RestoreGuard {
        for &s in signals {
            // SAFETY: `s` is a valid, caller-supplied signal number.
            unsafe {
                libc::signal(s, libc::SIG_IGN);
            }
        }
        RestoreGuard {
            signals: signals.to_vec(),
        }
    }
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        for &s in &self.signals {
            // SAFETY: restoring default disposition is always valid.
            unsafe {
                libc::signal(s, libc::SIG_DFL);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_defaults_to_none() {
        FLAG.store(NONE, Ordering::SeqCst);
        let token = CancellationToken::new();
        assert_eq!(token.poll(), Signal::None);
    }

    #[test]
    fn poll_consumes_flag() {
        FLAG.store(SIGINT_RECEIVED, Ordering::SeqCst);
        let token = CancellationToken::new();
        assert_eq!(token.poll(), Signal::Interrupt);
        assert_eq!(token.poll(), Signal::None);
    }
}
