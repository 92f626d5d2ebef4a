#![forbid(unsafe_code)]

//! Session Controller: the top-level loop. Reads a command, applies
//! the Command Validator, then the Policy Engine (consulting the
//! Identity Resolver, the loaded rule sets, and the Credential Cache,
//! invoking the Authenticator when required), then the Executor, and
//! finally the Audit Sink — in that order, per §2's data flow and
//! §5's audit-ordering guarantee.

pub mod cli;

use crate::audit::{AuditSink, RecordKind};
use crate::auth::Authenticator;
use crate::cache::{CacheRecord, CheckResult, CredentialCache};
use crate::common::{CallerContext, EnvIntent, Error, TargetIdentity};
use crate::config::DEFAULT_ELEVATED_USER;
use crate::directory::DirectoryClient;
use crate::exec::{CommandSpec, Executor, ExitStatus, PipelineSpec};
use crate::identity::{IdentityResolver, UserRecord};
use crate::policy::{Decision, PolicyEngine};
use crate::sudoers::ast::{Rule, RuleOptions};
use crate::system::signal::{CancellationToken, Signal};
use crate::system::User;
use crate::validator::{classification_of, CommandValidator, Verdict};
use std::net::Ipv4Addr;

/// Outcome of processing one command line, for the caller (typically
/// `main`) to turn into a process exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    NoOp,
    Denied(String),
    Executed(i32),
    AuthenticationFailed,
    Interrupted,
}

/// A redirection operator split off the trailing end of a pipeline's
/// final stage by `split_stage_redirection`.
enum StageRedirect {
    Output { path: String, append: bool },
    Input { path: String },
}

impl StageRedirect {
    fn path(&self) -> &str {
        match self {
            StageRedirect::Output { path, .. } => path,
            StageRedirect::Input { path } => path,
        }
    }
}

/// Splits a trailing `>`, `>>`, or `<` token and its filename argument
/// off a pipeline stage's raw text, tokenizing the same way stage argv
/// is built (whitespace-separated, no quoting). Returns the remaining
/// command text and, if one was found, the redirection it names.
fn split_stage_redirection(stage: &str) -> (String, Option<StageRedirect>) {
    let tokens: Vec<&str> = stage.split_whitespace().collect();
    if tokens.len() < 2 {
        return (stage.trim().to_string(), None);
    }
    let op = tokens[tokens.len() - 2];
    let path = tokens[tokens.len() - 1];
    let redirect = match op {
        ">>" => Some(StageRedirect::Output { path: path.to_string(), append: true }),
        ">" => Some(StageRedirect::Output { path: path.to_string(), append: false }),
        "<" => Some(StageRedirect::Input { path: path.to_string() }),
        _ => None,
    };
    match redirect {
        Some(r) => (tokens[..tokens.len() - 2].join(" "), Some(r)),
        None => (stage.trim().to_string(), None),
    }
}

pub struct SessionController<'a> {
    pub resolver: &'a IdentityResolver,
    pub cache: &'a CredentialCache,
    pub authenticator: &'a dyn Authenticator,
    pub directory: &'a DirectoryClient,
    pub local_rules: Vec<Rule>,
    pub local_ipv4s: Vec<Ipv4Addr>,
    pub cancellation: CancellationToken,
}

impl<'a> SessionController<'a> {
    /// Runs the whole pipeline for one command line. `confirm` is
    /// consulted only when the Validator returns `Confirm(reason)`
    /// (the audited confirmation UI is out of scope; the caller
    /// supplies how a yes/no is obtained).
    pub fn process_command(
        &self,
        caller_ctx: &CallerContext,
        caller: &UserRecord,
        target: &TargetIdentity,
        command: &str,
        now: i64,
        confirm: &dyn Fn(&str) -> bool,
    ) -> Outcome {
        if self.cancellation.poll() == Signal::Shutdown {
            return Outcome::Interrupted;
        }

        let verdict = CommandValidator::classify(command);
        match &verdict {
            Verdict::NoOp => return Outcome::NoOp,
            Verdict::Deny(reason) => {
                AuditSink::emit(&crate::audit::AuditRecord {
                    kind: RecordKind::ValidationDecision,
                    caller_username: &caller_ctx.real_name,
                    caller_terminal: &caller_ctx.terminal_label(),
                    target_username: &target.display_name(DEFAULT_ELEVATED_USER),
                    command,
                    decision: "deny",
                    source_label: None,
                    reason: Some(reason),
                });
                return Outcome::Denied(reason.clone());
            }
            Verdict::Confirm(reason) => {
                if !confirm(reason) {
                    return Outcome::Denied(format!("not confirmed: {reason}"));
                }
            }
            Verdict::Allow => {}
        }

        if let Some(reason) = self.validate_pipeline_and_redirection(caller, command) {
            AuditSink::emit(&crate::audit::AuditRecord {
                kind: RecordKind::ValidationDecision,
                caller_username: &caller_ctx.real_name,
                caller_terminal: &caller_ctx.terminal_label(),
                target_username: &target.display_name(DEFAULT_ELEVATED_USER),
                command,
                decision: "deny",
                source_label: None,
                reason: Some(&reason),
            });
            return Outcome::Denied(reason);
        }

        // Scenario 2: a non-admin caller running a curated always-safe
        // command bypasses the Policy Engine entirely. An admin
        // caller's commands are always run past the engine first
        // (scenario 1) — the admin-group short-circuit only kicks in
        // once the engine has denied.
        let is_admin = self.resolver.admin_group(caller).is_some();
        let is_safe = CommandValidator::is_safe_command(command);

        let decision = if is_safe && !is_admin {
            Decision::Allow {
                source_label: "safe-command".into(),
                nopasswd: true,
                options: RuleOptions::default(),
            }
        } else {
            let hostnames = (caller_ctx.hostname_short.as_str(), caller_ctx.hostname_canonical.as_str());
            let directory_rules = self.directory.query(
                caller.uid.inner(),
                &caller.name,
                hostnames.0,
                hostnames.1,
                &target.display_name(DEFAULT_ELEVATED_USER),
            );
            let engine = PolicyEngine::new(self.resolver, DEFAULT_ELEVATED_USER);
            let engine_decision = engine.decide(
                caller,
                target,
                hostnames,
                &self.local_ipv4s,
                command,
                &self.local_rules,
                &directory_rules,
                now,
            );
            match engine_decision {
                Decision::Deny if is_safe => match self.resolver.admin_group(caller) {
                    Some(group) => Decision::Allow {
                        source_label: format!("group:{group}"),
                        nopasswd: true,
                        options: RuleOptions::default(),
                    },
                    None => Decision::Allow {
                        source_label: "safe-command".into(),
                        nopasswd: true,
                        options: RuleOptions::default(),
                    },
                },
                other => other,
            }
        };

        let Decision::Allow { source_label, nopasswd, options } = decision else {
            AuditSink::emit(&crate::audit::AuditRecord {
                kind: RecordKind::ValidationDecision,
                caller_username: &caller_ctx.real_name,
                caller_terminal: &caller_ctx.terminal_label(),
                target_username: &target.display_name(DEFAULT_ELEVATED_USER),
                command,
                decision: "deny",
                source_label: None,
                reason: Some("no matching policy rule"),
            });
            return Outcome::Denied("not permitted".into());
        };

        AuditSink::emit(&crate::audit::AuditRecord {
            kind: RecordKind::ValidationDecision,
            caller_username: &caller_ctx.real_name,
            caller_terminal: &caller_ctx.terminal_label(),
            target_username: &target.display_name(DEFAULT_ELEVATED_USER),
            command,
            decision: "allow",
            source_label: Some(&source_label),
            reason: None,
        });

        let terminal_label = caller_ctx.terminal_label();
        let cache_state = self.cache.check(&caller.name, &terminal_label, now);
        let cache_is_valid = matches!(cache_state, CheckResult::Valid(_));
        AuditSink::cache_event(
            if cache_is_valid { RecordKind::CacheHit } else { RecordKind::CacheMiss },
            &caller_ctx.real_name,
            &terminal_label,
        );

        let classification = classification_of(&verdict, command);
        let engine = PolicyEngine::new(self.resolver, DEFAULT_ELEVATED_USER);
        let needs_auth = engine.requires_reauthentication(
            nopasswd,
            cache_is_valid,
            caller_ctx.env_intent,
            &classification,
            options.verifypw.as_deref(),
        );

        if needs_auth {
            match self.authenticator.authenticate(&caller.name) {
                Ok(()) => {
                    AuditSink::emit(&crate::audit::AuditRecord {
                        kind: RecordKind::AuthenticationEvent,
                        caller_username: &caller_ctx.real_name,
                        caller_terminal: &terminal_label,
                        target_username: &target.display_name(DEFAULT_ELEVATED_USER),
                        command,
                        decision: "authenticated",
                        source_label: None,
                        reason: None,
                    });
                    let record = CacheRecord {
                        username: caller.name.clone(),
                        timestamp: now,
                        session_id: caller_ctx.pid,
                        uid: caller.uid,
                        gid: caller.gid,
                        terminal_label: terminal_label.clone(),
                        hostname: caller_ctx.hostname_short.clone(),
                    };
                    let _ = self.cache.update(&record);
                }
                Err(e) => {
                    self.cache.clear(&caller.name, &terminal_label);
                    AuditSink::cache_event(RecordKind::CacheInvalidated, &caller_ctx.real_name, &terminal_label);
                    AuditSink::emit(&crate::audit::AuditRecord {
                        kind: RecordKind::AuthenticationEvent,
                        caller_username: &caller_ctx.real_name,
                        caller_terminal: &terminal_label,
                        target_username: &target.display_name(DEFAULT_ELEVATED_USER),
                        command,
                        decision: "authentication-failed",
                        source_label: None,
                        reason: Some(&e.to_string()),
                    });
                    return Outcome::AuthenticationFailed;
                }
            }
        }

        let target_user = match self.resolve_target_user(target) {
            Ok(u) => u,
            Err(e) => return Outcome::Denied(e.to_string()),
        };

        AuditSink::execution_start(&caller_ctx.real_name, &terminal_label, &target_user.name, command, &source_label);

        let status = self.run_pipeline(command, &target_user, &caller_ctx.real_name, &terminal_label);
        match status {
            Ok(status) => {
                AuditSink::execution_complete(&caller_ctx.real_name, &terminal_label, &target_user.name, command, status);
                Outcome::Executed(status.as_process_exit_code())
            }
            Err(e) => {
                AuditSink::execution_complete(
                    &caller_ctx.real_name,
                    &terminal_label,
                    &target_user.name,
                    command,
                    ExitStatus::Code(127),
                );
                Outcome::Denied(e.to_string())
            }
        }
    }

    fn resolve_target_user(&self, target: &TargetIdentity) -> Result<User, Error> {
        let name = target.display_name(DEFAULT_ELEVATED_USER);
        User::from_name(&name)?.ok_or_else(|| Error::UserNotFound(name))
    }

    fn caller_home(&self, username: &str) -> String {
        User::from_name(username)
            .ok()
            .flatten()
            .map(|u| u.home)
            .unwrap_or_default()
    }

    /// §4.4's pipeline and redirection sub-grammars run ahead of the
    /// Policy Engine (Scenario 6's ordering): a multi-stage command
    /// must be built entirely from whitelisted stages, and any
    /// redirection target named by the final stage must resolve
    /// somewhere the caller is permitted to write or read. Returns the
    /// deny reason, if any.
    fn validate_pipeline_and_redirection(&self, caller: &UserRecord, command: &str) -> Option<String> {
        if command.contains('|') {
            if let Verdict::Deny(reason) = CommandValidator::validate_pipeline(command) {
                return Some(reason);
            }
        }

        let last_stage = command.rsplit('|').next().unwrap_or(command);
        let (_, redirect) = split_stage_redirection(last_stage);
        if let Some(redirect) = redirect {
            let home = self.caller_home(&caller.name);
            if let Verdict::Deny(reason) = CommandValidator::validate_redirection(redirect.path(), &home) {
                return Some(reason);
            }
        }

        None
    }

    fn run_pipeline(&self, command: &str, target: &User, caller: &str, tty: &str) -> Result<ExitStatus, Error> {
        let stage_texts: Vec<&str> = command.split('|').collect();
        let last_index = stage_texts.len().saturating_sub(1);
        let stages: Vec<CommandSpec> = stage_texts
            .iter()
            .enumerate()
            .map(|(i, stage)| {
                let (body, redirect) = if i == last_index {
                    split_stage_redirection(stage)
                } else {
                    (stage.trim().to_string(), None)
                };
                let argv: Vec<String> = body.split_whitespace().map(str::to_string).collect();
                let env = std::env::vars().collect::<Vec<_>>();
                let sanitized = crate::exec::env::sanitize(&env, argv.first().map(String::as_str).unwrap_or(""));
                let (redirect_stdin, redirect_stdout) = match redirect {
                    Some(StageRedirect::Output { path, append }) => (None, Some((path, append))),
                    Some(StageRedirect::Input { path }) => (Some(path), None),
                    None => (None, None),
                };
                CommandSpec {
                    argv,
                    envp: sanitized,
                    redirect_stdin,
                    redirect_stdout,
                }
            })
            .collect();

        let target_name = target.name.clone();
        Executor::run_with_stage_hooks(
            &PipelineSpec { stages },
            target,
            |index| {
                let stage_command = stage_texts.get(index).map(|s| s.trim()).unwrap_or("");
                AuditSink::stage_start(caller, tty, &target_name, index, stage_command);
            },
            |index, status| {
                AuditSink::stage_complete(caller, tty, &target_name, index, status);
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TestAuthenticator;
    use crate::common::InvocationMode;
    use crate::identity::{GroupRecord, IdentitySource};
    use crate::system::interface::{GroupId, ProcessId, UserId};
    use std::collections::HashSet;
    use std::time::Duration;

    struct StubSource;
    impl IdentitySource for StubSource {
        fn lookup_user(&self, _name: &str) -> Option<UserRecord> {
            None
        }
        fn lookup_group(&self, name: &str) -> Option<GroupRecord> {
            if name == "wheel" {
                Some(GroupRecord { name: "wheel".into(), gid: GroupId::new(10) })
            } else {
                None
            }
        }
        fn groups_of(&self, user: &UserRecord) -> HashSet<GroupId> {
            if user.name == "alice" {
                HashSet::from([user.gid, GroupId::new(10)])
            } else {
                HashSet::from([user.gid])
            }
        }
    }

    fn ctx(name: &str, automated: bool) -> CallerContext {
        CallerContext {
            real_uid: UserId::new(1000),
            real_gid: GroupId::new(1000),
            real_name: name.to_string(),
            effective_uid: UserId::ROOT,
            terminal: Some("/dev/pts/3".into()),
            hostname_short: "db01".into(),
            hostname_canonical: "db01.example.com".into(),
            pid: ProcessId::new(42),
            mode: InvocationMode::Interactive,
            env_intent: if automated { EnvIntent::Automated } else { EnvIntent::Interactive },
        }
    }

    fn user_record(name: &str) -> UserRecord {
        UserRecord { name: name.to_string(), uid: UserId::new(1000), gid: GroupId::new(1000) }
    }

    fn controller() -> (IdentityResolver, CredentialCache, TestAuthenticator, DirectoryClient) {
        let resolver = IdentityResolver::new(vec![Box::new(StubSource)]);
        let cache = CredentialCache::new(std::env::temp_dir().join("sudosh-session-test"), Duration::from_secs(900));
        let auth = TestAuthenticator { accept: true };
        let directory = DirectoryClient::new(true, false);
        (resolver, cache, auth, directory)
    }

    #[test]
    fn admin_group_short_circuit_labels_source_by_group() {
        // Exercises the decision inputs `process_command` combines
        // for scenario 1 (alice, admin via wheel, a safe read-only
        // command): the validator allows, the command is in the safe
        // set, and the resolver reports `wheel` as her admin group —
        // together these drive the `group:wheel` label without
        // needing to fork a real pipeline.
        let resolver = IdentityResolver::new(vec![Box::new(StubSource)]);
        let caller = user_record("alice");
        assert_eq!(CommandValidator::classify("ls -la /var/log"), Verdict::Allow);
        assert!(CommandValidator::is_safe_command("ls -la /var/log"));
        assert_eq!(resolver.admin_group(&caller), Some("wheel"));

        let bob = user_record("bob");
        assert_eq!(resolver.admin_group(&bob), None);
    }

    #[test]
    fn shell_command_is_denied_before_policy_engine() {
        let (resolver, cache, auth, directory) = controller();
        let sc = SessionController {
            resolver: &resolver,
            cache: &cache,
            authenticator: &auth,
            directory: &directory,
            local_rules: vec![],
            local_ipv4s: vec![],
            cancellation: CancellationToken::new(),
        };
        let caller_ctx = ctx("dave", false);
        let caller = user_record("dave");
        let outcome = sc.process_command(
            &caller_ctx,
            &caller,
            &TargetIdentity::DefaultElevated,
            "bash",
            1000,
            &|_| true,
        );
        assert!(matches!(outcome, Outcome::Denied(_)));
    }

    #[test]
    fn no_rule_non_admin_non_safe_command_is_denied() {
        let (resolver, cache, auth, directory) = controller();
        let sc = SessionController {
            resolver: &resolver,
            cache: &cache,
            authenticator: &auth,
            directory: &directory,
            local_rules: vec![],
            local_ipv4s: vec![],
            cancellation: CancellationToken::new(),
        };
        let caller_ctx = ctx("bob", false);
        let caller = user_record("bob");
        let outcome = sc.process_command(
            &caller_ctx,
            &caller,
            &TargetIdentity::DefaultElevated,
            "systemctl restart nginx",
            1000,
            &|_| false,
        );
        assert!(matches!(outcome, Outcome::Denied(_)));
    }
}
