//! Thin, narrowly-scoped wrappers around the libc system-identity and
//! process surface. This is the one place `unsafe` is permitted in the
//! crate; every other module is `#![forbid(unsafe_code)]`.

pub mod file;
pub mod interface;
pub mod signal;
pub mod time;

use crate::common::Error;
use interface::{DeviceId, GroupId, ProcessId, UserId};
use std::ffi::{CStr, CString};
use std::io;
use std::mem::MaybeUninit;

/// A resolved account record, analogous to a `passwd(5)` entry plus
/// its supplementary group ids.
#[derive(Debug, Clone)]
pub struct User {
    pub uid: UserId,
    pub gid: GroupId,
    pub name: String,
    pub home: String,
    pub shell: String,
    pub groups: Vec<GroupId>,
}

/// A resolved group record.
#[derive(Debug, Clone)]
pub struct Group {
    pub gid: GroupId,
    pub name: String,
}

const LOOKUP_BUF_SIZE: usize = 16 * 1024;

impl User {
    pub fn from_name(name: &str) -> Result<Option<User>, Error> {
        let cname = CString::new(name).map_err(|_| Error::UserNotFound(name.to_string()))?;
        let mut pwd: MaybeUninit<libc::passwd> = MaybeUninit::uninit();
        let mut buf = vec![0u8; LOOKUP_BUF_SIZE];
        let mut result: *mut libc::passwd = std::ptr::null_mut();

        // SAFETY: `pwd`/`buf` outlive the call; `getpwnam_r` writes
        // through `result` only on success and leaves it null
        // otherwise.
        let rc = unsafe {
            libc::getpwnam_r(
                cname.as_ptr(),
                pwd.as_mut_ptr(),
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
                &mut result,
            )
        };
        if rc != 0 {
            return Err(Error::Io(io::Error::from_raw_os_error(rc)));
        }
        if result.is_null() {
            return Ok(None);
        }
        // SAFETY: `result` is non-null and was populated by the call.
        Ok(Some(unsafe { User::from_libc(&*result)? }))
    }

    pub fn from_uid(uid: UserId) -> Result<Option<User>, Error> {
        let mut pwd: MaybeUninit<libc::passwd> = MaybeUninit::uninit();
        let mut buf = vec![0u8; LOOKUP_BUF_SIZE];
        let mut result: *mut libc::passwd = std::ptr::null_mut();

        // SAFETY: see `from_name`.
        let rc = unsafe {
            libc::getpwuid_r(
                uid.inner(),
                pwd.as_mut_ptr(),
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
                &mut result,
            )
        };
        if rc != 0 {
            return Err(Error::Io(io::Error::from_raw_os_error(rc)));
        }
        if result.is_null() {
            return Ok(None);
        }
        Ok(Some(unsafe { User::from_libc(&*result)? }))
    }

    /// SAFETY: `pwd` must point at a fully initialized `passwd`
    /// record whose string fields are valid, nul-terminated C strings.
    unsafe fn from_libc(pwd: &libc::passwd) -> Result<User, Error> {
        let name = cstr_to_string(pwd.pw_name);
        let uid = UserId::new(pwd.pw_uid);
        let gid = GroupId::new(pwd.pw_gid);
        let home = cstr_to_string(pwd.pw_dir);
        let shell = cstr_to_string(pwd.pw_shell);

        let mut ngroups: libc::c_int = 32;
        let cname = CString::new(name.clone()).unwrap_or_default();
        let mut groups: Vec<libc::gid_t>;
        loop {
            groups = vec![0; ngroups as usize];
            // SAFETY: `groups` has `ngroups` capacity; on `-1` return
            // `ngroups` is updated to the required size and we retry.
            let rc = libc::getgrouplist(
                cname.as_ptr(),
                gid.inner(),
                groups.as_mut_ptr(),
                &mut ngroups,
            );
            if rc >= 0 {
                groups.truncate(ngroups as usize);
                break;
            }
            if ngroups as usize > 1 << 20 {
                return Err(Error::ResourceExhausted("supplementary group list".into()));
            }
        }

        Ok(User {
            uid,
            gid,
            name,
            home,
            shell,
            groups: groups.into_iter().map(GroupId::new).collect(),
        })
    }

    pub fn is_in_group(&self, gid: GroupId) -> bool {
        self.gid == gid || self.groups.contains(&gid)
    }
}

impl Group {
    pub fn from_name(name: &str) -> Result<Option<Group>, Error> {
        let cname = CString::new(name).map_err(|_| Error::GroupNotFound(name.to_string()))?;
        let mut grp: MaybeUninit<libc::group> = MaybeUninit::uninit();
        let mut buf = vec![0u8; LOOKUP_BUF_SIZE];
        let mut result: *mut libc::group = std::ptr::null_mut();

        // SAFETY: see `User::from_name`.
        let rc = unsafe {
            libc::getgrnam_r(
                cname.as_ptr(),
                grp.as_mut_ptr(),
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
                &mut result,
            )
        };
        if rc != 0 {
            return Err(Error::Io(io::Error::from_raw_os_error(rc)));
        }
        if result.is_null() {
            return Ok(None);
        }
        // SAFETY: `result` is non-null and was populated by the call.
        let g = unsafe { &*result };
        Ok(Some(Group {
            gid: GroupId::new(g.gr_gid),
            name: unsafe { cstr_to_string(g.gr_name) },
        }))
    }
}

unsafe fn cstr_to_string(ptr: *const libc::c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

/// A scoped raise of effective identity to the superuser, guaranteed
/// to lower again on every exit path (including panics, via `Drop`).
/// Wraps a single privileged read (sudoers file, directory socket).
pub struct PrivilegedScope {
    restore_euid: UserId,
}

impl PrivilegedScope {
    pub fn enter() -> Result<PrivilegedScope, Error> {
        // SAFETY: `geteuid`/`seteuid` take no pointers; failure is
        // reported through errno, which `io::Error::last_os_error`
        // reads immediately after the call.
        let restore_euid = unsafe { UserId::new(libc::geteuid()) };
        let rc = unsafe { libc::seteuid(0) };
        if rc != 0 {
            return Err(Error::PermissionDenied(
                "could not raise to superuser identity".into(),
            ));
        }
        Ok(PrivilegedScope { restore_euid })
    }
}

impl Drop for PrivilegedScope {
    fn drop(&mut self) {
        // SAFETY: lowering back to the original effective uid; if this
        // fails there is nothing safe left to do but ignore it, since
        // we are already unwinding or returning.
        unsafe {
            libc::seteuid(self.restore_euid.inner());
        }
    }
}

/// Drops privileges for good, in the mandated order: supplementary
/// groups, then primary group, then user id. Any failure here is
/// fatal to the calling process (the invariant: no command leaves
/// having partially changed identity).
pub fn drop_privileges_permanently(target: &User) -> Result<(), Error> {
    let gids: Vec<libc::gid_t> = target.groups.iter().map(|g| g.inner()).collect();
    // SAFETY: `gids` is a valid slice for the duration of the call.
    let rc = unsafe { libc::setgroups(gids.len(), gids.as_ptr()) };
    if rc != 0 {
        return Err(Error::PermissionDenied("setgroups failed".into()));
    }
    // SAFETY: no pointers.
    let rc = unsafe { libc::setgid(target.gid.inner()) };
    if rc != 0 {
        return Err(Error::PermissionDenied("setgid failed".into()));
    }
    // SAFETY: no pointers.
    let rc = unsafe { libc::setuid(target.uid.inner()) };
    if rc != 0 {
        return Err(Error::PermissionDenied("setuid failed".into()));
    }
    Ok(())
}

/// A snapshot of process identity facts captured once at session
/// start: pid, parent pid, session id, controlling terminal.
#[derive(Debug, Clone)]
pub struct Process {
    pub pid: ProcessId,
    pub ppid: ProcessId,
    pub sid: ProcessId,
    pub tty: Option<String>,
    pub tty_device: Option<DeviceId>,
}

impl Process {
    pub fn current() -> Process {
        // SAFETY: these calls take no pointers and cannot fail in a
        // way that invalidates the returned ids.
        let (pid, ppid, sid) = unsafe { (libc::getpid(), libc::getppid(), libc::getsid(0)) };
        let (tty, tty_device) = Self::controlling_tty();
        Process {
            pid: ProcessId::new(pid),
            ppid: ProcessId::new(ppid),
            sid: ProcessId::new(if sid < 0 { pid } else { sid }),
            tty,
            tty_device,
        }
    }

    fn controlling_tty() -> (Option<String>, Option<DeviceId>) {
        let mut buf = vec![0u8; 256];
        // SAFETY: fd 0 is a valid descriptor in this process (stdin);
        // `ttyname_r` writes into `buf` and returns nonzero on error,
        // including "not a tty", which we treat as "no tty".
        let rc = unsafe {
            libc::ttyname_r(0, buf.as_mut_ptr() as *mut libc::c_char, buf.len())
        };
        if rc != 0 {
            return (None, None);
        }
        let name = unsafe { cstr_to_string(buf.as_ptr() as *const libc::c_char) };
        if name.is_empty() {
            return (None, None);
        }
        let device = std::fs::metadata(&name).ok().map(|m| {
            use std::os::unix::fs::MetadataExt;
            DeviceId::new(m.rdev())
        });
        (Some(name), device)
    }
}

pub fn effective_uid() -> UserId {
    // SAFETY: `geteuid` takes no arguments and cannot fail.
    UserId::new(unsafe { libc::geteuid() })
}

/// The real (not effective) uid/gid of the calling process: who
/// invoked the shell, as opposed to whose privileges it currently
/// runs with.
pub fn real_identity() -> (UserId, GroupId) {
    // SAFETY: `getuid`/`getgid` take no arguments and cannot fail.
    unsafe { (UserId::new(libc::getuid()), GroupId::new(libc::getgid())) }
}

pub fn hostname() -> Result<String, Error> {
    let mut buf = vec![0u8; 256];
    // SAFETY: `buf` is valid for `buf.len()` bytes.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_user_resolves() {
        let u = User::from_name("root").expect("lookup should not error");
        let u = u.expect("root must exist");
        assert_eq!(u.uid.inner(), 0);
    }

    #[test]
    fn unknown_user_is_none() {
        let u = User::from_name("sudosh-test-no-such-user-xyz").unwrap();
        assert!(u.is_none());
    }

    #[test]
    fn root_group_resolves() {
        let g = Group::from_name("root").unwrap();
        assert!(g.is_some());
    }
}
