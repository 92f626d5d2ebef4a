#![forbid(unsafe_code)]

//! Policy Engine: a pure function of `(caller, host, target, command,
//! policy set, cache state, env_intent, clock)`.

use crate::common::{CallerContext, EnvIntent, TargetIdentity};
use crate::identity::{IdentityResolver, UserRecord};
use crate::sudoers::ast::{merge_effective_options, CommandPattern, HostMatch, Rule, RuleOptions, UserMatch};
use crate::validator::Classification;
use glob::Pattern;
use std::net::Ipv4Addr;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow {
        source_label: String,
        nopasswd: bool,
        options: RuleOptions,
    },
    Deny,
}

pub struct PolicyEngine<'a> {
    pub resolver: &'a IdentityResolver,
    pub default_elevated_name: &'a str,
}

impl<'a> PolicyEngine<'a> {
    pub fn new(resolver: &'a IdentityResolver, default_elevated_name: &'a str) -> Self {
        PolicyEngine {
            resolver,
            default_elevated_name,
        }
    }

    /// §4.5 steps 1-6: filters down to the matching rules, in
    /// declared-order, and returns the first disqualifying or
    /// granting decision. Local and directory rules are treated as
    /// one concatenated, order-sorted list, so the decision does not
    /// depend on which source discovered a rule first (testable
    /// property: order-independence given identical `order` values).
    pub fn decide(
        &self,
        caller: &UserRecord,
        target: &TargetIdentity,
        hostnames: (&str, &str),
        local_ipv4s: &[Ipv4Addr],
        command: &str,
        local_rules: &[Rule],
        directory_rules: &[Rule],
        now: i64,
    ) -> Decision {
        let target_name = target.display_name(self.default_elevated_name);

        let mut candidates: Vec<&Rule> = local_rules.iter().chain(directory_rules.iter()).collect();
        candidates.sort_by_key(|r| r.order.unwrap_or(i64::MAX));

        let mut last_match: Option<&Rule> = None;
        let mut allowing_matches: Vec<&Rule> = Vec::new();

        for rule in candidates {
            if !within_time_window(rule, now) {
                continue;
            }
            if !self.user_matches(&rule.users, caller) {
                continue;
            }
            if !self.host_matches(&rule.hosts, hostnames, local_ipv4s) {
                continue;
            }
            if !self.runas_matches(rule, &target_name) {
                continue;
            }
            if let Some(verdict) = self.match_commands(&rule.commands, command) {
                if verdict {
                    last_match = Some(rule);
                    allowing_matches.push(rule);
                } else {
                    // a matching negative pattern denies immediately
                    return Decision::Deny;
                }
            }
        }

        match last_match {
            Some(rule) => Decision::Allow {
                source_label: rule.source_label.clone(),
                nopasswd: rule.nopasswd,
                options: self.effective_options(&allowing_matches),
            },
            None => Decision::Deny,
        }
    }

    fn user_matches(&self, users: &[UserMatch], caller: &UserRecord) -> bool {
        users.iter().any(|u| match u {
            UserMatch::All => true,
            UserMatch::Exact(name) => name == &caller.name,
            UserMatch::Group(group_name) => self
                .resolver
                .lookup_group(group_name)
                .map(|g| self.resolver.groups_of(caller).contains(&g.gid))
                .unwrap_or(false),
        })
    }

    fn host_matches(
        &self,
        hosts: &[HostMatch],
        hostnames: (&str, &str),
        local_ipv4s: &[Ipv4Addr],
    ) -> bool {
        hosts.iter().any(|h| host_match_one(h, hostnames, local_ipv4s))
    }

    fn runas_matches(&self, rule: &Rule, target_name: &str) -> bool {
        match &rule.runas_user {
            None => target_name == self.default_elevated_name,
            Some(spec) if spec == "ALL" => true,
            Some(spec) => spec == target_name,
        }
    }

    /// Evaluates command patterns in order; the *last* matching
    /// pattern (positive or negative) determines the outcome, so a
    /// trailing negation overrides an earlier `ALL` (`ALL, !/bin/rm`).
    /// `None` means no pattern in this rule matched at all.
    fn match_commands(&self, patterns: &[CommandPattern], command: &str) -> Option<bool> {
        let first_token = command.split_whitespace().next().unwrap_or("");
        let mut verdict = None;
        for pattern in patterns {
            if let Some(v) = match_one(pattern, command, first_token) {
                verdict = Some(v);
            }
        }
        verdict
    }

    /// §4.5 step 7: synthesize effective options from all *allowing*
    /// matches accumulated during `decide`'s pass over the candidate
    /// list. Also callable standalone, e.g. by `-l` listing output.
    pub fn effective_options(&self, matching_rules: &[&Rule]) -> RuleOptions {
        merge_effective_options(matching_rules.iter().copied())
    }

    /// §4.5 reauthentication policy: authentication is required unless
    /// a valid cache entry exists AND none of the password-demanding
    /// conditions hold. A `nopasswd` rule never prompts on its own
    /// account — it is not merely "use the cache instead of a
    /// password", it waives the password requirement outright — but
    /// the automated-intent and `verifypw` overrides still force a
    /// prompt regardless of the rule's `nopasswd` flag.
    pub fn requires_reauthentication(
        &self,
        rule_nopasswd: bool,
        cache_is_valid: bool,
        env_intent: EnvIntent,
        classification: &Classification,
        verifypw: Option<&str>,
    ) -> bool {
        let automated_forces = env_intent.is_automated() && classification.is_dangerous_or_moderate();
        let verifypw_forces = matches!(verifypw, Some("always") | Some("any")) && !cache_is_valid;
        automated_forces || verifypw_forces || (!rule_nopasswd && !cache_is_valid)
    }
}

fn within_time_window(rule: &Rule, now: i64) -> bool {
    if let Some(nb) = rule.not_before {
        if now < nb {
            return false;
        }
    }
    if let Some(na) = rule.not_after {
        if now > na {
            return false;
        }
    }
    true
}

fn host_match_one(h: &HostMatch, hostnames: (&str, &str), local_ipv4s: &[Ipv4Addr]) -> bool {
    match h {
        HostMatch::All => true,
        HostMatch::Exact(name) => name == hostnames.0 || name == hostnames.1,
        HostMatch::Wildcard(pat) => Pattern::new(pat)
            .map(|p| p.matches(hostnames.0) || p.matches(hostnames.1))
            .unwrap_or(false),
        HostMatch::Ipv4(addr) => Ipv4Addr::from_str(addr)
            .map(|a| local_ipv4s.contains(&a))
            .unwrap_or(false),
        HostMatch::Cidr(cidr) => cidr_matches(cidr, local_ipv4s),
        HostMatch::Negated(inner) => !host_match_one(inner, hostnames, local_ipv4s),
    }
}

fn cidr_matches(cidr: &str, local_ipv4s: &[Ipv4Addr]) -> bool {
    let Some((addr, prefix)) = cidr.split_once('/') else {
        return false;
    };
    let Ok(network) = Ipv4Addr::from_str(addr) else {
        return false;
    };
    let Ok(prefix_len) = prefix.parse::<u32>() else {
        return false;
    };
    if prefix_len > 32 {
        return false;
    }
    let mask: u32 = if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - prefix_len)
    };
    let network_bits = u32::from(network) & mask;
    local_ipv4s
        .iter()
        .any(|ip| (u32::from(*ip) & mask) == network_bits)
}

fn match_one(pattern: &CommandPattern, command: &str, first_token: &str) -> Option<bool> {
    match pattern {
        CommandPattern::All => Some(true),
        CommandPattern::Exact(p) => {
            if p == command || p == first_token {
                Some(true)
            } else {
                None
            }
        }
        CommandPattern::Glob(p) => {
            let pat_base = basename(p);
            let cmd_base = basename(first_token);
            if p == first_token || pat_base == cmd_base {
                Some(true)
            } else if Pattern::new(p).map(|g| g.matches(first_token)).unwrap_or(false) {
                Some(true)
            } else if Pattern::new(&pat_base).map(|g| g.matches(&cmd_base)).unwrap_or(false) {
                Some(true)
            } else {
                None
            }
        }
        CommandPattern::Negated(inner) => match_one(inner, command, first_token).map(|v| !v),
    }
}

fn basename(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{GroupRecord, IdentitySource};
    use crate::system::interface::{GroupId, UserId};
    use std::collections::HashSet;

    struct StubSource;
    impl IdentitySource for StubSource {
        fn lookup_user(&self, _name: &str) -> Option<UserRecord> {
            None
        }
        fn lookup_group(&self, name: &str) -> Option<GroupRecord> {
            if name == "ops" {
                Some(GroupRecord {
                    name: "ops".into(),
                    gid: GroupId::new(500),
                })
            } else {
                None
            }
        }
        fn groups_of(&self, user: &UserRecord) -> HashSet<GroupId> {
            if user.name == "dave" {
                HashSet::from([user.gid, GroupId::new(500)])
            } else {
                HashSet::from([user.gid])
            }
        }
    }

    fn resolver() -> IdentityResolver {
        IdentityResolver::new(vec![Box::new(StubSource)])
    }

    fn user(name: &str) -> UserRecord {
        UserRecord {
            name: name.to_string(),
            uid: UserId::new(1000),
            gid: GroupId::new(1000),
        }
    }

    #[test]
    fn no_matching_rule_denies() {
        let r = resolver();
        let engine = PolicyEngine::new(&r, "root");
        let decision = engine.decide(
            &user("alice"),
            &TargetIdentity::DefaultElevated,
            ("db01", "db01.example.com"),
            &[],
            "ls -la /var/log",
            &[],
            &[],
            1000,
        );
        assert_eq!(decision, Decision::Deny);
    }

    #[test]
    fn group_rule_grants_dave_via_ops() {
        let r = resolver();
        let engine = PolicyEngine::new(&r, "root");
        let mut rule = Rule::new("sudoers.conf");
        rule.users = vec![UserMatch::Group("ops".into())];
        rule.hosts = vec![HostMatch::All];
        rule.runas_user = Some("ALL".into());
        rule.commands = vec![CommandPattern::All];
        let decision = engine.decide(
            &user("dave"),
            &TargetIdentity::DefaultElevated,
            ("h", "h.example.com"),
            &[],
            "bash",
            &[rule],
            &[],
            1000,
        );
        assert!(matches!(decision, Decision::Allow { .. }));
    }

    #[test]
    fn negated_pattern_denies() {
        let r = resolver();
        let engine = PolicyEngine::new(&r, "root");
        let mut rule = Rule::new("sudoers.conf");
        rule.users = vec![UserMatch::All];
        rule.hosts = vec![HostMatch::All];
        rule.commands = vec![CommandPattern::All, CommandPattern::Negated(Box::new(CommandPattern::Exact("/bin/rm".into())))];
        let decision = engine.decide(
            &user("erin"),
            &TargetIdentity::DefaultElevated,
            ("h", "h.example.com"),
            &[],
            "/bin/rm",
            &[rule],
            &[],
            1000,
        );
        assert_eq!(decision, Decision::Deny);
    }

    #[test]
    fn cidr_slash_zero_matches_everything() {
        assert!(cidr_matches("0.0.0.0/0", &[Ipv4Addr::new(10, 0, 0, 5)]));
    }

    #[test]
    fn cidr_slash_32_matches_only_exact() {
        let ip = Ipv4Addr::new(10, 0, 0, 5);
        assert!(cidr_matches("10.0.0.5/32", &[ip]));
        assert!(!cidr_matches("10.0.0.6/32", &[ip]));
    }

    #[test]
    fn closed_interval_on_not_before_and_after() {
        let mut rule = Rule::new("x");
        rule.not_before = Some(1000);
        rule.not_after = Some(1000);
        assert!(within_time_window(&rule, 1000));
        assert!(!within_time_window(&rule, 999));
        assert!(!within_time_window(&rule, 1001));
    }

    #[test]
    fn nopasswd_rule_skips_auth_even_with_no_prior_cache() {
        let r = resolver();
        let engine = PolicyEngine::new(&r, "root");
        assert!(!engine.requires_reauthentication(
            true,
            false,
            EnvIntent::Interactive,
            &Classification::Safe,
            None,
        ));
    }

    #[test]
    fn non_nopasswd_rule_needs_auth_without_a_valid_cache() {
        let r = resolver();
        let engine = PolicyEngine::new(&r, "root");
        assert!(engine.requires_reauthentication(
            false,
            false,
            EnvIntent::Interactive,
            &Classification::Safe,
            None,
        ));
    }

    #[test]
    fn non_nopasswd_rule_skips_auth_with_a_valid_cache() {
        let r = resolver();
        let engine = PolicyEngine::new(&r, "root");
        assert!(!engine.requires_reauthentication(
            false,
            true,
            EnvIntent::Interactive,
            &Classification::Safe,
            None,
        ));
    }

    #[test]
    fn automated_intent_forces_auth_for_sensitive_command_despite_valid_cache() {
        let r = resolver();
        let engine = PolicyEngine::new(&r, "root");
        assert!(engine.requires_reauthentication(
            true,
            true,
            EnvIntent::Automated,
            &Classification::Moderate,
            None,
        ));
    }

    #[test]
    fn verifypw_always_forces_auth_only_when_no_cache() {
        let r = resolver();
        let engine = PolicyEngine::new(&r, "root");
        assert!(engine.requires_reauthentication(
            true,
            false,
            EnvIntent::Interactive,
            &Classification::Safe,
            Some("always"),
        ));
        assert!(!engine.requires_reauthentication(
            true,
            true,
            EnvIntent::Interactive,
            &Classification::Safe,
            Some("always"),
        ));
    }
}
