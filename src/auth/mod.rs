pub mod converse;
pub mod pam_sys;

pub use converse::{Converser, MessageStyle, TestConverser};

use crate::common::Error;
use crate::{audit_event, sess_info};
use std::io::{self, Write};

const PAM_SERVICE: &str = "sudosh";

/// Drives the platform authentication conversation for one user and
/// reports success/failure; it does not itself touch the credential
/// cache — the caller (Session Controller) updates or clears the
/// cache based on the result, since only the caller knows the
/// `(user, terminal)` cache key.
pub trait Authenticator {
    fn authenticate(&self, username: &str) -> Result<(), Error>;
}

pub struct PamAuthenticator<'a> {
    pub converser: &'a dyn Converser,
}

impl<'a> Authenticator for PamAuthenticator<'a> {
    fn authenticate(&self, username: &str) -> Result<(), Error> {
        let mut ctx = pam_sys::PamContext::start(PAM_SERVICE, username, self.converser)?;
        ctx.authenticate()?;
        ctx.validate_account()?;
        Ok(())
    }
}

/// Rule-based stand-in for `SUDOSH_TEST_MODE=1`: authentication is
/// synchronous and deterministic, no real PAM conversation occurs.
pub struct TestAuthenticator {
    pub accept: bool,
}

impl Authenticator for TestAuthenticator {
    fn authenticate(&self, _username: &str) -> Result<(), Error> {
        if self.accept {
            Ok(())
        } else {
            Err(Error::Authentication("test-mode rejection".into()))
        }
    }
}

/// Terminal-backed converser: prompts on stderr, disables local echo
/// for hidden prompts via `termios`, restores it afterward even on
/// error (RAII guard).
pub struct CliConverser;

impl Converser for CliConverser {
    fn handle_normal_prompt(&self, prompt: &str) -> io::Result<String> {
        eprint!("{prompt}");
        io::stderr().flush()?;
        let mut line = String::new();
        io::stdin().read_line(&mut line)?;
        Ok(line.trim_end_matches('\n').to_string())
    }

    fn handle_hidden_prompt(&self, prompt: &str) -> io::Result<String> {
        eprint!("{prompt}");
        io::stderr().flush()?;
        let _guard = EchoOffGuard::new()?;
        let mut line = String::new();
        io::stdin().read_line(&mut line)?;
        eprintln!();
        Ok(line.trim_end_matches('\n').to_string())
    }

    fn handle_info(&self, message: &str) {
        eprintln!("{message}");
        sess_info!("{message}");
    }

    fn handle_error(&self, message: &str) {
        eprintln!("{message}");
    }
}

struct EchoOffGuard {
    original: libc::termios,
}

impl EchoOffGuard {
    fn new() -> io::Result<EchoOffGuard> {
        use std::mem::MaybeUninit;
        let mut term: MaybeUninit<libc::termios> = MaybeUninit::uninit();
        // SAFETY: fd 0 (stdin) is valid; `term` is fully initialized
        // on success before we read from it below.
        let rc = unsafe { libc::tcgetattr(0, term.as_mut_ptr()) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        let original = unsafe { term.assume_init() };
        let mut modified = original;
        modified.c_lflag &= !libc::ECHO;
        modified.c_lflag |= libc::ECHONL;
        // SAFETY: `modified` is a valid termios obtained from a
        // successful `tcgetattr` call above, only `c_lflag` changed.
        let rc = unsafe { libc::tcsetattr(0, libc::TCSAFLUSH, &modified) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(EchoOffGuard { original })
    }
}

impl Drop for EchoOffGuard {
    fn drop(&mut self) {
        // SAFETY: `self.original` was captured from a successful
        // `tcgetattr` call for the same fd in `new`.
        unsafe {
            libc::tcsetattr(0, libc::TCSAFLUSH, &self.original);
        }
    }
}

/// On any authentication failure, the caller must clear the cache
/// entry and emit an audit record; on success it must update the
/// cache. This helper centralizes the audit emission so both outcomes
/// are logged consistently.
pub fn run_and_audit(
    authenticator: &dyn Authenticator,
    username: &str,
) -> Result<(), Error> {
    match authenticator.authenticate(username) {
        Ok(()) => {
            audit_event!("decision=authenticated user={username}");
            Ok(())
        }
        Err(e) => {
            audit_event!("decision=authentication-failed user={username} reason={e}");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authenticator_accepts() {
        let auth = TestAuthenticator { accept: true };
        assert!(run_and_audit(&auth, "erin").is_ok());
    }

    #[test]
    fn test_authenticator_rejects() {
        let auth = TestAuthenticator { accept: false };
        assert!(run_and_audit(&auth, "erin").is_err());
    }
}
