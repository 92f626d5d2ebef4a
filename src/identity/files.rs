//! Direct parser for the local `/etc/passwd`/`/etc/group` databases,
//! independent of libc so the "files" NSS source is testable against
//! a fixture file and so a malformed line degrades per-line rather
//! than aborting the whole source.

use crate::system::interface::{GroupId, UserId};
use std::fs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub name: String,
    pub uid: UserId,
    pub gid: GroupId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub gid: GroupId,
    pub members: Vec<String>,
}

/// Parses passwd-format text; malformed lines are skipped (the caller
/// is expected to audit the skip).
pub fn parse_passwd(text: &str) -> (Vec<PasswdEntry>, Vec<String>) {
    let mut entries = Vec::new();
    let mut skipped = Vec::new();
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_passwd_line(line) {
            Some(e) => entries.push(e),
            None => skipped.push(line.to_string()),
        }
    }
    (entries, skipped)
}

fn parse_passwd_line(line: &str) -> Option<PasswdEntry> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 7 {
        return None;
    }
    let name = fields[0].to_string();
    if name.is_empty() {
        return None;
    }
    let uid: libc::uid_t = fields[2].parse().ok()?;
    let gid: libc::gid_t = fields[3].parse().ok()?;
    Some(PasswdEntry {
        name,
        uid: UserId::new(uid),
        gid: GroupId::new(gid),
    })
}

/// Parses group-format text the same way.
pub fn parse_group(text: &str) -> (Vec<GroupEntry>, Vec<String>) {
    let mut entries = Vec::new();
    let mut skipped = Vec::new();
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_group_line(line) {
            Some(e) => entries.push(e),
            None => skipped.push(line.to_string()),
        }
    }
    (entries, skipped)
}

fn parse_group_line(line: &str) -> Option<GroupEntry> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 4 {
        return None;
    }
    let name = fields[0].to_string();
    if name.is_empty() {
        return None;
    }
    let gid: libc::gid_t = fields[2].parse().ok()?;
    let members = if fields[3].is_empty() {
        Vec::new()
    } else {
        fields[3].split(',').map(|s| s.to_string()).collect()
    };
    Some(GroupEntry {
        name,
        gid: GroupId::new(gid),
        members,
    })
}

/// Reads and parses `/etc/passwd`. An absent file is not fatal — the
/// source is simply skipped by the resolver.
pub fn read_passwd(path: &str) -> Option<(Vec<PasswdEntry>, Vec<String>)> {
    fs::read_to_string(path).ok().map(|t| parse_passwd(&t))
}

pub fn read_group(path: &str) -> Option<(Vec<GroupEntry>, Vec<String>)> {
    fs::read_to_string(path).ok().map(|t| parse_group(&t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_passwd_line() {
        let (entries, skipped) = parse_passwd("alice:x:1001:1001:Alice:/home/alice:/bin/bash\n");
        assert!(skipped.is_empty());
        assert_eq!(entries[0].name, "alice");
        assert_eq!(entries[0].uid.inner(), 1001);
    }

    #[test]
    fn skips_line_with_non_numeric_uid() {
        let (entries, skipped) =
            parse_passwd("broken:x:notanumber:1001:Broken:/home/broken:/bin/bash\n");
        assert!(entries.is_empty());
        assert_eq!(skipped.len(), 1);
    }

    #[test]
    fn skips_comment_and_blank_lines() {
        let (entries, skipped) = parse_passwd("# comment\n\nalice:x:1001:1001::/home/alice:/bin/sh\n");
        assert_eq!(entries.len(), 1);
        assert!(skipped.is_empty());
    }

    #[test]
    fn parses_group_with_members() {
        let (entries, _) = parse_group("wheel:x:10:alice,bob\n");
        assert_eq!(entries[0].members, vec!["alice", "bob"]);
    }

    #[test]
    fn group_with_no_members_parses_empty_list() {
        let (entries, _) = parse_group("empty:x:20:\n");
        assert!(entries[0].members.is_empty());
    }
}
