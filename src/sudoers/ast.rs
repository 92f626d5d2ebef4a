//! The flat `Rule` type shared by the Sudoers Parser and the
//! Directory Rules Client, so the Policy Engine is transport-agnostic.
//! Deliberately flatter than a full sudoers grammar: no alias tables,
//! since this spec's rule model has none.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserMatch {
    Exact(String),
    Group(String),
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostMatch {
    Exact(String),
    Wildcard(String),
    Ipv4(String),
    Cidr(String),
    All,
    Negated(Box<HostMatch>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandPattern {
    All,
    Exact(String),
    Glob(String),
    Negated(Box<CommandPattern>),
}

/// Flag options carried by a rule (§3: reset-environment, requiretty,
/// lecture, io-log, noexec, setenv).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleFlags {
    pub reset_environment: bool,
    pub requiretty: bool,
    pub lecture: bool,
    pub io_log: bool,
    pub noexec: bool,
    pub setenv: bool,
}

/// Scalar options carried by a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleOptions {
    pub flags: RuleFlags,
    pub timestamp_timeout_minutes: Option<i64>,
    pub umask: Option<String>,
    pub secure_path: Option<String>,
    pub chroot: Option<String>,
    pub working_directory: Option<String>,
    pub env_keep: Vec<String>,
    pub env_check: Vec<String>,
    pub env_delete: Vec<String>,
    pub io_log_location: Option<String>,
    pub security_context: Option<String>,
    pub verifypw: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub users: Vec<UserMatch>,
    pub hosts: Vec<HostMatch>,
    pub runas_user: Option<String>,
    pub runas_group: Option<String>,
    pub commands: Vec<CommandPattern>,
    pub nopasswd: bool,
    pub options: RuleOptions,
    pub order: Option<i64>,
    pub not_before: Option<i64>,
    pub not_after: Option<i64>,
    pub source_label: String,
}

impl Rule {
    pub fn new(source_label: impl Into<String>) -> Rule {
        Rule {
            users: Vec::new(),
            hosts: Vec::new(),
            runas_user: None,
            runas_group: None,
            commands: Vec::new(),
            nopasswd: false,
            options: RuleOptions::default(),
            order: None,
            not_before: None,
            not_after: None,
            source_label: source_label.into(),
        }
    }
}

/// Applies one option token (as produced by the sudoers grammar or
/// decoded from a directory `OPTION`/`sudoOption` value) to a rule.
/// Shared by every rule source — the sudoers parser and both directory
/// transports — so option semantics, including `!authenticate`'s
/// effect on `nopasswd`, never diverge between them (§4.5's option
/// alphabet).
pub fn apply_option_token(rule: &mut Rule, token: &str) {
    let token = token.trim();
    if token.is_empty() {
        return;
    }
    if let Some((key, value)) = token.split_once('=') {
        apply_scalar(&mut rule.options, key.trim(), value.trim());
        return;
    }
    let (key, negate) = if let Some(rest) = token.strip_prefix('!') {
        (rest, true)
    } else {
        (token, false)
    };
    match key {
        "authenticate" => rule.nopasswd = negate,
        "env_reset" => rule.options.flags.reset_environment = !negate,
        "requiretty" => rule.options.flags.requiretty = !negate,
        "lecture" => rule.options.flags.lecture = !negate,
        "log_input" | "log_output" | "iolog" => rule.options.flags.io_log = !negate,
        "noexec" => rule.options.flags.noexec = !negate,
        "setenv" => rule.options.flags.setenv = !negate,
        _ => {}
    }
}

fn apply_scalar(options: &mut RuleOptions, key: &str, value: &str) {
    match key {
        "timestamp_timeout" => options.timestamp_timeout_minutes = value.parse().ok(),
        "umask" => options.umask = Some(value.to_string()),
        "secure_path" => options.secure_path = Some(value.to_string()),
        "chroot" => options.chroot = Some(value.to_string()),
        "cwd" | "runcwd" => options.working_directory = Some(value.to_string()),
        "env_keep" => options.env_keep = split_list(value),
        "env_check" => options.env_check = split_list(value),
        "env_delete" => options.env_delete = split_list(value),
        "iolog_file" | "iolog_dir" => options.io_log_location = Some(value.to_string()),
        "role" | "type" => options.security_context = Some(value.to_string()),
        "verifypw" => options.verifypw = Some(value.to_string()),
        _ => {}
    }
}

fn split_list(value: &str) -> Vec<String> {
    let trimmed = value.trim_start_matches('"').trim_end_matches('"');
    trimmed
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// The union of all matching rules' flags, last-wins for scalars,
/// first non-empty string for path-valued options — §4.5 step 7.
pub fn merge_effective_options<'a>(rules: impl Iterator<Item = &'a Rule>) -> RuleOptions {
    let mut merged = RuleOptions::default();
    let mut path_seen: HashMap<&str, bool> = HashMap::new();
    for rule in rules {
        let o = &rule.options;
        merged.flags.reset_environment |= o.flags.reset_environment;
        merged.flags.requiretty |= o.flags.requiretty;
        merged.flags.lecture |= o.flags.lecture;
        merged.flags.io_log |= o.flags.io_log;
        merged.flags.noexec |= o.flags.noexec;
        merged.flags.setenv |= o.flags.setenv;

        if o.timestamp_timeout_minutes.is_some() {
            merged.timestamp_timeout_minutes = o.timestamp_timeout_minutes;
        }
        if o.umask.is_some() {
            merged.umask = o.umask.clone();
        }
        if o.verifypw.is_some() {
            merged.verifypw = o.verifypw.clone();
        }
        if !o.env_keep.is_empty() {
            merged.env_keep = o.env_keep.clone();
        }
        if !o.env_check.is_empty() {
            merged.env_check = o.env_check.clone();
        }
        if !o.env_delete.is_empty() {
            merged.env_delete = o.env_delete.clone();
        }

        if !*path_seen.entry("secure_path").or_insert(false) {
            if o.secure_path.is_some() {
                merged.secure_path = o.secure_path.clone();
                path_seen.insert("secure_path", true);
            }
        }
        if !*path_seen.entry("chroot").or_insert(false) {
            if o.chroot.is_some() {
                merged.chroot = o.chroot.clone();
                path_seen.insert("chroot", true);
            }
        }
        if !*path_seen.entry("cwd").or_insert(false) {
            if o.working_directory.is_some() {
                merged.working_directory = o.working_directory.clone();
                path_seen.insert("cwd", true);
            }
        }
        if !*path_seen.entry("iolog").or_insert(false) {
            if o.io_log_location.is_some() {
                merged.io_log_location = o.io_log_location.clone();
                path_seen.insert("iolog", true);
            }
        }
        if !*path_seen.entry("context").or_insert(false) {
            if o.security_context.is_some() {
                merged.security_context = o.security_context.clone();
                path_seen.insert("context", true);
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_token_sets_timeout() {
        let mut rule = Rule::new("test");
        apply_option_token(&mut rule, "timestamp_timeout=30");
        assert_eq!(rule.options.timestamp_timeout_minutes, Some(30));
    }

    #[test]
    fn negated_flag_clears() {
        let mut rule = Rule::new("test");
        apply_option_token(&mut rule, "requiretty");
        apply_option_token(&mut rule, "!requiretty");
        assert!(!rule.options.flags.requiretty);
    }

    #[test]
    fn authenticate_negation_sets_nopasswd_regardless_of_source() {
        let mut rule = Rule::new("test");
        assert!(!rule.nopasswd);
        apply_option_token(&mut rule, "!authenticate");
        assert!(rule.nopasswd);
    }

    #[test]
    fn authenticate_without_negation_clears_nopasswd() {
        let mut rule = Rule::new("test");
        rule.nopasswd = true;
        apply_option_token(&mut rule, "authenticate");
        assert!(!rule.nopasswd);
    }

    #[test]
    fn merge_is_last_wins_for_scalars_first_for_paths() {
        let mut r1 = Rule::new("a");
        r1.options.secure_path = Some("/one".into());
        r1.options.timestamp_timeout_minutes = Some(5);
        let mut r2 = Rule::new("b");
        r2.options.secure_path = Some("/two".into());
        r2.options.timestamp_timeout_minutes = Some(10);

        let merged = merge_effective_options([&r1, &r2].into_iter());
        assert_eq!(merged.secure_path.as_deref(), Some("/one"));
        assert_eq!(merged.timestamp_timeout_minutes, Some(10));
    }
}
