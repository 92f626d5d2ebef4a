//! Directory Rules Client: asks the enterprise directory responder
//! "what rules apply to this user on this host?" via a capability
//! abstraction (REDESIGN FLAGS) so the Policy Engine sees only
//! `query(user, host) -> RuleList`.

pub mod library;
pub mod socket;
pub mod wire;

use crate::common::Error;
use crate::config::{DIRECTORY_SOCKET_PATH, DIRECTORY_SOCKET_TIMEOUT};
use crate::sess_warn;
use crate::sudoers::ast::Rule;
use crate::system::PrivilegedScope;
use library::LibraryTransport;
use socket::SocketTransport;

/// `query(user, host) -> RuleList`: the only surface the Policy
/// Engine sees, regardless of which transport answered it.
pub trait DirectoryTransport {
    fn query(
        &self,
        uid: u32,
        username: &str,
        hostname_short: &str,
        hostname_canonical: &str,
        runas_user: &str,
    ) -> Result<Vec<Rule>, Error>;
}

struct LibraryAdapter(LibraryTransport);

impl DirectoryTransport for LibraryAdapter {
    fn query(
        &self,
        uid: u32,
        username: &str,
        hostname_short: &str,
        _hostname_canonical: &str,
        _runas_user: &str,
    ) -> Result<Vec<Rule>, Error> {
        self.0.query(uid, username, hostname_short)
    }
}

impl DirectoryTransport for SocketTransport {
    fn query(
        &self,
        uid: u32,
        username: &str,
        hostname_short: &str,
        hostname_canonical: &str,
        runas_user: &str,
    ) -> Result<Vec<Rule>, Error> {
        self.query(uid, username, hostname_short, hostname_canonical, runas_user)
    }
}

/// Tries the library transport first, falling back to the socket
/// transport, per §4.3's declared order. Both require a scoped raise
/// to superuser effective identity around the whole request.
pub struct DirectoryClient {
    force_socket: bool,
    debug: bool,
}

impl DirectoryClient {
    pub fn new(force_socket: bool, debug: bool) -> DirectoryClient {
        DirectoryClient {
            force_socket,
            debug,
        }
    }

    /// Transport failures degrade gracefully: an empty rule set is
    /// returned and the failure is logged; the Policy Engine then
    /// relies on local rules and group membership (§7).
    pub fn query(
        &self,
        uid: u32,
        username: &str,
        hostname_short: &str,
        hostname_canonical: &str,
        runas_user: &str,
    ) -> Vec<Rule> {
        let _scope = match PrivilegedScope::enter() {
            Ok(s) => s,
            Err(e) => {
                sess_warn!("directory client could not raise privileges: {e}");
                return Vec::new();
            }
        };

        if !self.force_socket {
            if let Ok(lib) = LibraryTransport::open() {
                let adapter = LibraryAdapter(lib);
                match adapter.query(uid, username, hostname_short, hostname_canonical, runas_user) {
                    Ok(rules) => return rules,
                    Err(e) => {
                        if self.debug {
                            sess_warn!("directory library transport failed: {e}");
                        }
                    }
                }
            } else if self.debug {
                sess_warn!("no directory client library available, trying socket transport");
            }
        }

        let socket = SocketTransport::new(DIRECTORY_SOCKET_PATH, DIRECTORY_SOCKET_TIMEOUT);
        match DirectoryTransport::query(
            &socket,
            uid,
            username,
            hostname_short,
            hostname_canonical,
            runas_user,
        ) {
            Ok(rules) => rules,
            Err(e) => {
                sess_warn!("directory socket transport failed: {e}");
                Vec::new()
            }
        }
    }
}
