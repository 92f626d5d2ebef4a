//! Layered identity resolution: files source, then directory-service
//! source, each tried in order with fallthrough on failure. A source
//! that returns a definitive negative is respected only for that
//! source — it does not suppress the next source being tried for a
//! *different* query.

pub mod files;

use crate::config::ADMIN_GROUPS;
use crate::system::interface::{GroupId, UserId};
use crate::system::{Group, User};
use crate::{sess_warn, Error};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub name: String,
    pub uid: UserId,
    pub gid: GroupId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub name: String,
    pub gid: GroupId,
}

/// A single NSS-style lookup source.
pub trait IdentitySource {
    fn lookup_user(&self, name: &str) -> Option<UserRecord>;
    fn lookup_group(&self, name: &str) -> Option<GroupRecord>;
    fn groups_of(&self, user: &UserRecord) -> HashSet<GroupId>;
}

/// The files-backed source: parses `/etc/passwd`/`/etc/group` directly.
pub struct FilesSource {
    pub passwd_path: String,
    pub group_path: String,
}

impl Default for FilesSource {
    fn default() -> Self {
        FilesSource {
            passwd_path: "/etc/passwd".to_string(),
            group_path: "/etc/group".to_string(),
        }
    }
}

impl IdentitySource for FilesSource {
    fn lookup_user(&self, name: &str) -> Option<UserRecord> {
        let (entries, skipped) = files::read_passwd(&self.passwd_path)?;
        for line in &skipped {
            sess_warn!("malformed /etc/passwd line skipped: {line}");
        }
        entries
            .into_iter()
            .find(|e| e.name == name)
            .map(|e| UserRecord {
                name: e.name,
                uid: e.uid,
                gid: e.gid,
            })
    }

    fn lookup_group(&self, name: &str) -> Option<GroupRecord> {
        let (entries, skipped) = files::read_group(&self.group_path)?;
        for line in &skipped {
            sess_warn!("malformed /etc/group line skipped: {line}");
        }
        entries
            .into_iter()
            .find(|e| e.name == name)
            .map(|e| GroupRecord {
                name: e.name,
                gid: e.gid,
            })
    }

    fn groups_of(&self, user: &UserRecord) -> HashSet<GroupId> {
        let mut ids = HashSet::new();
        ids.insert(user.gid);
        if let Some((entries, _)) = files::read_group(&self.group_path) {
            for g in entries {
                if g.members.iter().any(|m| m == &user.name) {
                    ids.insert(g.gid);
                }
            }
        }
        ids
    }
}

/// The directory-service-backed source: a libc call that may
/// transparently consult an enterprise service through the platform
/// resolver configuration.
#[derive(Default)]
pub struct SystemSource;

impl IdentitySource for SystemSource {
    fn lookup_user(&self, name: &str) -> Option<UserRecord> {
        match User::from_name(name) {
            Ok(Some(u)) => Some(UserRecord {
                name: u.name,
                uid: u.uid,
                gid: u.gid,
            }),
            _ => None,
        }
    }

    fn lookup_group(&self, name: &str) -> Option<GroupRecord> {
        match Group::from_name(name) {
            Ok(Some(g)) => Some(GroupRecord {
                name: g.name,
                gid: g.gid,
            }),
            _ => None,
        }
    }

    fn groups_of(&self, user: &UserRecord) -> HashSet<GroupId> {
        match User::from_name(&user.name) {
            Ok(Some(u)) => u.groups.into_iter().chain([u.gid]).collect(),
            _ => HashSet::from([user.gid]),
        }
    }
}

/// Tries each source in the declared order, falling through on
/// failure. This is the component's public surface.
pub struct IdentityResolver {
    sources: Vec<Box<dyn IdentitySource>>,
}

impl IdentityResolver {
    pub fn new(sources: Vec<Box<dyn IdentitySource>>) -> Self {
        IdentityResolver { sources }
    }

    /// Standard NSS order for this crate: files, then directory
    /// service. There is no further "optional directory-server entry"
    /// distinct from the directory service source at this layer —
    /// that distinction lives in the Directory Rules Client, which is
    /// a separate authoritative source for *rules*, not identity.
    pub fn standard() -> Self {
        IdentityResolver::new(vec![
            Box::new(FilesSource::default()),
            Box::new(SystemSource),
        ])
    }

    pub fn lookup_user(&self, name: &str) -> Result<UserRecord, Error> {
        for src in &self.sources {
            if let Some(u) = src.lookup_user(name) {
                return Ok(u);
            }
        }
        Err(Error::UserNotFound(name.to_string()))
    }

    pub fn lookup_group(&self, name: &str) -> Result<GroupRecord, Error> {
        for src in &self.sources {
            if let Some(g) = src.lookup_group(name) {
                return Ok(g);
            }
        }
        Err(Error::GroupNotFound(name.to_string()))
    }

    pub fn groups_of(&self, user: &UserRecord) -> HashSet<GroupId> {
        for src in &self.sources {
            let ids = src.groups_of(user);
            if !ids.is_empty() {
                return ids;
            }
        }
        HashSet::new()
    }

    /// A user is admin iff they belong, by direct listing or primary
    /// group, to any group in `{wheel, sudo, admin}`.
    pub fn is_admin(&self, user: &UserRecord) -> bool {
        self.admin_group(user).is_some()
    }

    /// The first admin group (in `ADMIN_GROUPS` order) the user
    /// belongs to, if any. Used to label the admin-group short-circuit
    /// audit source (e.g. `group:wheel`).
    pub fn admin_group(&self, user: &UserRecord) -> Option<&'static str> {
        let user_groups = self.groups_of(user);
        ADMIN_GROUPS.iter().find(|name| {
            self.lookup_group(name)
                .map(|g| user_groups.contains(&g.gid))
                .unwrap_or(false)
        }).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubSource {
        users: Vec<UserRecord>,
        groups: Vec<(GroupRecord, Vec<String>)>,
    }

    impl IdentitySource for StubSource {
        fn lookup_user(&self, name: &str) -> Option<UserRecord> {
            self.users.iter().find(|u| u.name == name).cloned()
        }

        fn lookup_group(&self, name: &str) -> Option<GroupRecord> {
            self.groups
                .iter()
                .find(|(g, _)| g.name == name)
                .map(|(g, _)| g.clone())
        }

        fn groups_of(&self, user: &UserRecord) -> HashSet<GroupId> {
            let mut ids = HashSet::from([user.gid]);
            for (g, members) in &self.groups {
                if members.iter().any(|m| m == &user.name) {
                    ids.insert(g.gid);
                }
            }
            ids
        }
    }

    fn stub_resolver() -> IdentityResolver {
        let alice = UserRecord {
            name: "alice".into(),
            uid: UserId::new(1001),
            gid: GroupId::new(1001),
        };
        let wheel = GroupRecord {
            name: "wheel".into(),
            gid: GroupId::new(10),
        };
        IdentityResolver::new(vec![Box::new(StubSource {
            users: vec![alice],
            groups: vec![(wheel, vec!["alice".to_string()])],
        })])
    }

    #[test]
    fn alice_is_admin_via_wheel() {
        let resolver = stub_resolver();
        let alice = resolver.lookup_user("alice").unwrap();
        assert!(resolver.is_admin(&alice));
    }

    #[test]
    fn bob_is_not_found() {
        let resolver = stub_resolver();
        assert!(resolver.lookup_user("bob").is_err());
    }
}
