//! Line-oriented sudoers-style grammar: `users hosts = [(runas)]
//! [NOPASSWD:] commands`. `Defaults` lines and comments are
//! recognized and discarded, never consumed into a rule, matching the
//! distilled spec's Rule model, which has no settings DSL.

use super::ast::{apply_option_token, CommandPattern, HostMatch, Rule, UserMatch};
use crate::sess_warn;

/// Parses the text of one sudoers-style file into rules, tagging each
/// with `source_label`. Malformed lines are dropped and a warning is
/// emitted (the caller is responsible for turning that into an audit
/// record); parsing never aborts partway through a file.
pub fn parse_file(text: &str, source_label: &str) -> Vec<Rule> {
    let mut rules = Vec::new();
    for (lineno, raw_line) in text.lines().enumerate() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("Defaults") || line.starts_with("defaults") {
            continue;
        }
        if line.starts_with("#includedir") || line.starts_with("#include") {
            // Include directives are handled by the caller, which
            // walks the filesystem; a bare directive reaching here
            // (e.g. inside an included file) is simply ignored.
            continue;
        }
        match parse_line(line, source_label) {
            Some(rule) => rules.push(rule),
            None => sess_warn!("{source_label}:{}: could not parse rule, skipped", lineno + 1),
        }
    }
    rules
}

fn strip_comment(line: &str) -> &str {
    // `#` starts a comment unless it begins an include directive,
    // which callers special-case before this strip would apply.
    if line.trim_start().starts_with("#include") {
        return line;
    }
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn parse_line(line: &str, source_label: &str) -> Option<Rule> {
    let (lhs, rhs) = line.split_once('=')?;
    let mut fields = lhs.split_whitespace();
    let users_field = fields.next()?;
    let hosts_field: String = fields.collect::<Vec<_>>().join(" ");
    if hosts_field.is_empty() {
        return None;
    }

    let mut rule = Rule::new(source_label);
    rule.users = users_field
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_user_match)
        .collect();
    rule.hosts = hosts_field
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_host_match)
        .collect();
    if rule.users.is_empty() || rule.hosts.is_empty() {
        return None;
    }

    let mut rest = rhs.trim();

    if let Some(stripped) = rest.strip_prefix('(') {
        let (runas, after) = stripped.split_once(')')?;
        rest = after.trim();
        let mut parts = runas.splitn(2, ':');
        let user_part = parts.next().unwrap_or("").trim();
        let group_part = parts.next().unwrap_or("").trim();
        if !user_part.is_empty() {
            rule.runas_user = Some(user_part.to_string());
        }
        if !group_part.is_empty() {
            rule.runas_group = Some(group_part.to_string());
        }
    }

    if let Some(after) = rest.strip_prefix("NOPASSWD:") {
        rule.nopasswd = true;
        rest = after.trim();
    } else if let Some(after) = rest.strip_prefix("PASSWD:") {
        rest = after.trim();
    }

    if rest.is_empty() {
        return None;
    }

    rule.commands = rest
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_command_pattern)
        .collect();
    if rule.commands.is_empty() {
        return None;
    }

    Some(rule)
}

fn parse_user_match(s: &str) -> UserMatch {
    if s == "ALL" {
        UserMatch::All
    } else if let Some(group) = s.strip_prefix('%') {
        UserMatch::Group(group.to_string())
    } else {
        UserMatch::Exact(s.to_string())
    }
}

fn parse_host_match(s: &str) -> HostMatch {
    if let Some(rest) = s.strip_prefix('!') {
        return HostMatch::Negated(Box::new(parse_host_match(rest)));
    }
    if s == "ALL" {
        HostMatch::All
    } else if s.contains('/') {
        HostMatch::Cidr(s.to_string())
    } else if s.chars().all(|c| c.is_ascii_digit() || c == '.') && s.contains('.') {
        HostMatch::Ipv4(s.to_string())
    } else if s.contains('*') || s.contains('?') {
        HostMatch::Wildcard(s.to_string())
    } else {
        HostMatch::Exact(s.to_string())
    }
}

fn parse_command_pattern(s: &str) -> CommandPattern {
    if let Some(rest) = s.strip_prefix('!') {
        return CommandPattern::Negated(Box::new(parse_command_pattern(rest)));
    }
    if s == "ALL" {
        CommandPattern::All
    } else if s.contains('*') || s.contains('?') || s.contains('[') {
        CommandPattern::Glob(s.to_string())
    } else {
        CommandPattern::Exact(s.to_string())
    }
}

/// Applies trailing option tokens embedded in a command clause, e.g.
/// `commands, !noexec:` style annotations used by the directory
/// client's `OPTION` values. Exposed here so both rule sources reuse
/// identical option-token semantics.
pub fn apply_options(rule: &mut Rule, tokens: impl Iterator<Item = String>) {
    for token in tokens {
        for piece in token.split(|c| c == ',' || c == '\n') {
            apply_option_token(rule, piece);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_rule() {
        let rules = parse_file(
            "carol db01 = NOPASSWD: /usr/bin/systemctl restart nginx\n",
            "sudosh.conf",
        );
        assert_eq!(rules.len(), 1);
        let r = &rules[0];
        assert!(r.nopasswd);
        assert_eq!(r.users, vec![UserMatch::Exact("carol".into())]);
        assert_eq!(r.hosts, vec![HostMatch::Exact("db01".into())]);
        assert_eq!(
            r.commands,
            vec![CommandPattern::Exact(
                "/usr/bin/systemctl restart nginx".into()
            )]
        );
    }

    #[test]
    fn parses_group_and_all() {
        let rules = parse_file("%ops ALL = (ALL) ALL\n", "sudosh.conf");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].users, vec![UserMatch::Group("ops".into())]);
        assert_eq!(rules[0].hosts, vec![HostMatch::All]);
        assert_eq!(rules[0].runas_user.as_deref(), Some("ALL"));
        assert_eq!(rules[0].commands, vec![CommandPattern::All]);
    }

    #[test]
    fn defaults_and_comments_are_ignored() {
        let rules = parse_file(
            "Defaults env_reset\n# a comment\nalice host1 = ALL\n",
            "sudosh.conf",
        );
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        let rules = parse_file("this is not a rule\nalice host1 = ALL\n", "sudosh.conf");
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn negated_command_parses() {
        let rules = parse_file("bob host1 = ALL, !/bin/rm\n", "sudosh.conf");
        assert_eq!(
            rules[0].commands[1],
            CommandPattern::Negated(Box::new(CommandPattern::Exact("/bin/rm".into())))
        );
    }
}
