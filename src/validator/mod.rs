#![forbid(unsafe_code)]

//! Command Validator: a strict total function on the raw command
//! string, returning exactly one of `{allow, deny(reason),
//! confirm(reason)}`. Boundary contract: this operates on the command
//! string *after* any alias expansion the (out-of-scope) line-editing
//! layer performs; the validator itself never expands aliases.

use crate::config::{
    DANGEROUS_COMMANDS, EDITORS, MAX_COMMAND_LENGTH, PIPELINE_WHITELIST, SAFE_READ_ONLY_COMMANDS,
    SHELLS_AND_INTERPRETERS, SYSTEM_DIRECTORIES,
};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Empty/whitespace-only input: nothing to validate.
    NoOp,
    Allow,
    Deny(String),
    Confirm(String),
}

/// How dangerous `requires_reauthentication` should treat this
/// command when the calling environment is automated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Safe,
    Moderate,
    Dangerous,
}

impl Classification {
    pub fn is_dangerous_or_moderate(&self) -> bool {
        !matches!(self, Classification::Safe)
    }
}

pub struct CommandValidator;

impl CommandValidator {
    /// The eight ordered checks of §4.4; first negative decision wins.
    pub fn classify(command: &str) -> Verdict {
        if command.trim().is_empty() {
            return Verdict::NoOp;
        }

        // 1. Shape.
        if command.len() > MAX_COMMAND_LENGTH {
            return Verdict::Deny("command exceeds maximum length".into());
        }
        if command.as_bytes().contains(&0) {
            return Verdict::Deny("command contains an embedded NUL".into());
        }

        // 2. Path safety.
        if command.contains("../") || command.contains("..\\") {
            return Verdict::Deny("path traversal sequence is not permitted".into());
        }

        let first_token = command.split_whitespace().next().unwrap_or("");
        let base = basename(first_token);

        // 3. Shell and interpreter ban.
        if SHELLS_AND_INTERPRETERS
            .iter()
            .any(|pat| token_matches_pattern(&base, pat) || token_matches_pattern(first_token, pat))
        {
            return Verdict::Deny("interactive shells and interpreters are not permitted".into());
        }
        if command.contains(" -c ") || command.contains(" --command") {
            return Verdict::Deny("inline command execution flags are not permitted".into());
        }

        // 4. Outbound access ban.
        if base == "ssh" || first_token == "ssh" {
            return Verdict::Deny("outbound network access is not permitted".into());
        }

        // 5. Interactive editor ban.
        if EDITORS.contains(&base.as_str()) {
            return Verdict::Deny("interactive editors are not permitted; use the audited edit path".into());
        }

        // 6. Dangerous command class.
        if DANGEROUS_COMMANDS.contains(&base.as_str()) {
            return Verdict::Confirm(format!("'{base}' affects system state and requires confirmation"));
        }

        // 7. Dangerous flag patterns.
        if has_dangerous_flag_combo(command, &base) {
            return Verdict::Confirm(format!("'{base}' with a recursive/forced flag requires confirmation"));
        }

        // 8. System-directory access.
        if let Some(verdict) = Self::system_directory_check(command, &base) {
            return verdict;
        }

        Verdict::Allow
    }

    fn system_directory_check(command: &str, base: &str) -> Option<Verdict> {
        let touches_system_dir = SYSTEM_DIRECTORIES
            .iter()
            .any(|dir| command_references_path(command, dir));
        if !touches_system_dir {
            return None;
        }
        let is_mutating = is_mutating_command(base);
        let has_output_redirect = command.contains('>');
        let pipes_into_dangerous = command
            .split('|')
            .skip(1)
            .any(|stage| {
                let stage_first = stage.trim().split_whitespace().next().unwrap_or("");
                DANGEROUS_COMMANDS.contains(&basename(stage_first).as_str())
            });

        if is_mutating || has_output_redirect || pipes_into_dangerous {
            Some(Verdict::Confirm(
                "command touches a system directory and is not a plain read".into(),
            ))
        } else if SAFE_READ_ONLY_COMMANDS.contains(&base) {
            Some(Verdict::Allow)
        } else {
            Some(Verdict::Confirm(
                "command touches a system directory".into(),
            ))
        }
    }

    /// Curated list for users without policy rules.
    pub fn is_safe_command(command: &str) -> bool {
        let first = command.split_whitespace().next().unwrap_or("");
        SAFE_READ_ONLY_COMMANDS.contains(&basename(first).as_str())
    }

    /// Curated list for pipelined execution.
    pub fn is_pipeline_whitelisted(command: &str) -> bool {
        let first = command.split_whitespace().next().unwrap_or("");
        PIPELINE_WHITELIST.contains(&basename(first).as_str())
    }

    /// The pipeline sub-grammar: one or more `|`-separated stages,
    /// each a whitelisted command; no leading/trailing/consecutive
    /// pipes; `find -exec`/`-execdir`/`-delete` banned.
    pub fn validate_pipeline(command: &str) -> Verdict {
        if command.starts_with('|') || command.trim_end().ends_with('|') {
            return Verdict::Deny("pipeline cannot start or end with '|'".into());
        }
        if command.contains("||") {
            return Verdict::Deny("consecutive pipes are not permitted".into());
        }
        for stage in command.split('|') {
            let stage = stage.trim();
            if stage.is_empty() {
                return Verdict::Deny("empty pipeline stage".into());
            }
            let first = stage.split_whitespace().next().unwrap_or("");
            let base = basename(first);
            if !Self::is_pipeline_whitelisted(stage) {
                return Verdict::Deny(format!("'{base}' is not permitted in a pipeline"));
            }
            if base == "find"
                && (stage.contains("-exec") || stage.contains("-execdir") || stage.contains("-delete"))
            {
                return Verdict::Deny("'find' with -exec/-execdir/-delete is not permitted".into());
            }
        }
        Verdict::Allow
    }

    /// The redirection sub-grammar: targets must resolve (after
    /// tilde expansion) to `/tmp/`, `/var/tmp/`, a home directory
    /// root, or a relative path in the current working directory.
    pub fn validate_redirection(target: &str, home_dir: &str) -> Verdict {
        let expanded = if let Some(rest) = target.strip_prefix('~') {
            format!("{home_dir}{rest}")
        } else {
            target.to_string()
        };

        if SYSTEM_DIRECTORIES.iter().any(|dir| path_is_under_dir(&expanded, dir)) {
            return Verdict::Deny("redirection into a system directory is not permitted".into());
        }

        let allowed = expanded.starts_with("/tmp/")
            || expanded.starts_with("/var/tmp/")
            || expanded.starts_with(&format!("{home_dir}/"))
            || expanded == home_dir
            || !Path::new(&expanded).is_absolute();

        if allowed {
            Verdict::Allow
        } else {
            Verdict::Deny("redirection target is outside the permitted locations".into())
        }
    }
}

/// Maps a verdict to the severity class `requires_reauthentication`
/// reasons about; `Deny` has no meaningful classification since the
/// command never reaches the engine. A plain read of a system
/// directory is classified `Moderate` even when the Validator allows
/// it outright without interactive confirmation — whether a human
/// must confirm and whether an automated session needs a fresh
/// password are related but distinct questions.
pub fn classification_of(verdict: &Verdict, command: &str) -> Classification {
    match verdict {
        Verdict::Confirm(_) => Classification::Moderate,
        Verdict::Deny(_) => Classification::Dangerous,
        Verdict::NoOp => Classification::Safe,
        Verdict::Allow => {
            let touches_system_dir = SYSTEM_DIRECTORIES
                .iter()
                .any(|dir| command_references_path(command, dir));
            if touches_system_dir {
                Classification::Moderate
            } else {
                Classification::Safe
            }
        }
    }
}

fn basename(token: &str) -> String {
    token.rsplit('/').next().unwrap_or(token).to_string()
}

/// Matches `token` against one `SHELLS_AND_INTERPRETERS` entry; a
/// trailing `*` in `pattern` matches by prefix (`python*` covers
/// `python2`, `python3`, `python3.11`, ...).
fn token_matches_pattern(token: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => token.starts_with(prefix),
        None => token == pattern,
    }
}

/// Substring check used to flag a command as touching a system
/// directory at all (for the mutation ban and classification, not for
/// the stricter redirection-target check below). A trailing `*` in
/// `pattern` matches on its fixed prefix, so `/lib*` is found in
/// `/lib64/foo` the same way `/etc` is found in `/etc/passwd`.
fn command_references_path(command: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => command.contains(prefix),
        None => command.contains(pattern),
    }
}

/// Directory-boundary check used by the redirection sub-grammar: does
/// `path` name `pattern`'s directory exactly, or something beneath it?
/// A trailing `*` in `pattern` matches any top-level directory whose
/// name shares `pattern`'s prefix, so `/lib*` matches `/lib64` and
/// `/libx32` as directories in their own right, not just paths under
/// a literal `/lib`.
fn path_is_under_dir(path: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => {
            let name_prefix = prefix.trim_start_matches('/');
            match path.strip_prefix('/') {
                Some(rest) => rest.split('/').next().unwrap_or("").starts_with(name_prefix),
                None => false,
            }
        }
        None => path == pattern || path.starts_with(&format!("{pattern}/")),
    }
}

fn is_mutating_command(base: &str) -> bool {
    matches!(
        base,
        "rm" | "mv" | "cp" | "chmod" | "chown" | "chgrp" | "truncate" | "tee" | "mkdir" | "rmdir"
            | "ln" | "dd" | "sed" | "install"
    )
}

fn has_dangerous_flag_combo(command: &str, base: &str) -> bool {
    let recursive_force = (command.contains("-rf")
        || command.contains("-fr")
        || (command.contains(" -r") && command.contains(" -f"))
        || command.contains("--recursive") && command.contains("--force"))
        && matches!(base, "rm" | "chmod" | "chown");
    recursive_force
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_noop() {
        assert_eq!(CommandValidator::classify("   "), Verdict::NoOp);
    }

    #[test]
    fn embedded_nul_is_denied() {
        let cmd = format!("ls{}", '\0');
        assert!(matches!(CommandValidator::classify(&cmd), Verdict::Deny(_)));
    }

    #[test]
    fn max_length_boundary_is_allowed_if_otherwise_valid() {
        let cmd = "x".repeat(MAX_COMMAND_LENGTH);
        assert_eq!(CommandValidator::classify(&cmd), Verdict::Allow);
    }

    #[test]
    fn over_max_length_denied() {
        let cmd = "x".repeat(MAX_COMMAND_LENGTH + 1);
        assert!(matches!(CommandValidator::classify(&cmd), Verdict::Deny(_)));
    }

    #[test]
    fn path_traversal_denied() {
        assert!(matches!(
            CommandValidator::classify("cat ../../etc/shadow"),
            Verdict::Deny(_)
        ));
    }

    #[test]
    fn bash_is_denied() {
        assert!(matches!(CommandValidator::classify("bash"), Verdict::Deny(_)));
    }

    #[test]
    fn ssh_is_denied() {
        assert!(matches!(CommandValidator::classify("ssh host"), Verdict::Deny(_)));
    }

    #[test]
    fn vim_is_denied() {
        assert!(matches!(CommandValidator::classify("vim /etc/hosts"), Verdict::Deny(_)));
    }

    #[test]
    fn systemctl_requires_confirm() {
        assert!(matches!(
            CommandValidator::classify("systemctl restart nginx"),
            Verdict::Confirm(_)
        ));
    }

    #[test]
    fn rm_rf_requires_confirm() {
        assert!(matches!(
            CommandValidator::classify("rm -rf /var/data"),
            Verdict::Confirm(_)
        ));
    }

    #[test]
    fn safe_read_only_under_etc_allowed() {
        assert_eq!(CommandValidator::classify("ls -la /etc"), Verdict::Allow);
    }

    #[test]
    fn redirect_into_etc_requires_confirm() {
        assert!(matches!(
            CommandValidator::classify("echo hi > /etc/motd"),
            Verdict::Confirm(_)
        ));
    }

    #[test]
    fn pipeline_leading_pipe_denied() {
        assert!(matches!(
            CommandValidator::validate_pipeline("| awk '{print}'"),
            Verdict::Deny(_)
        ));
    }

    #[test]
    fn pipeline_trailing_pipe_denied() {
        assert!(matches!(
            CommandValidator::validate_pipeline("grep x |"),
            Verdict::Deny(_)
        ));
    }

    #[test]
    fn pipeline_double_pipe_denied() {
        assert!(matches!(
            CommandValidator::validate_pipeline("grep x || awk y"),
            Verdict::Deny(_)
        ));
    }

    #[test]
    fn pipeline_whitelisted_stages_allowed() {
        assert_eq!(
            CommandValidator::validate_pipeline("grep -R pattern /etc | awk '{print $1}'"),
            Verdict::Allow
        );
    }

    #[test]
    fn find_exec_denied_in_pipeline() {
        assert!(matches!(
            CommandValidator::validate_pipeline("find . -exec rm {} \\;"),
            Verdict::Deny(_)
        ));
    }

    #[test]
    fn redirection_to_tmp_allowed() {
        assert_eq!(
            CommandValidator::validate_redirection("/tmp/out", "/home/frank"),
            Verdict::Allow
        );
    }

    #[test]
    fn redirection_to_etc_denied() {
        assert!(matches!(
            CommandValidator::validate_redirection("/etc/passwd", "/home/frank"),
            Verdict::Deny(_)
        ));
    }

    #[test]
    fn redirection_tilde_expands_to_home() {
        assert_eq!(
            CommandValidator::validate_redirection("~/out.txt", "/home/frank"),
            Verdict::Allow
        );
    }

    #[test]
    fn plain_read_of_system_directory_classifies_as_moderate() {
        let cmd = "ls /etc";
        assert_eq!(CommandValidator::classify(cmd), Verdict::Allow);
        assert_eq!(classification_of(&Verdict::Allow, cmd), Classification::Moderate);
    }

    #[test]
    fn read_outside_system_directory_classifies_as_safe() {
        let cmd = "ls /home/frank";
        assert_eq!(classification_of(&Verdict::Allow, cmd), Classification::Safe);
    }

    #[test]
    fn versioned_python_binary_is_denied_via_wildcard() {
        assert!(matches!(CommandValidator::classify("python3.11"), Verdict::Deny(_)));
        assert!(matches!(CommandValidator::classify("python3.12 -c 'import os'"), Verdict::Deny(_)));
    }

    #[test]
    fn lib_variant_directories_classify_as_moderate() {
        assert_eq!(classification_of(&Verdict::Allow, "ls /lib32"), Classification::Moderate);
        assert_eq!(classification_of(&Verdict::Allow, "ls /libx32"), Classification::Moderate);
    }

    #[test]
    fn redirection_into_lib_variant_directory_denied() {
        assert!(matches!(
            CommandValidator::validate_redirection("/lib32/evil.so", "/home/frank"),
            Verdict::Deny(_)
        ));
        assert!(matches!(
            CommandValidator::validate_redirection("/libx32/evil.so", "/home/frank"),
            Verdict::Deny(_)
        ));
    }

    #[test]
    fn redirection_into_unrelated_directory_is_not_caught_by_lib_wildcard() {
        assert_eq!(
            CommandValidator::validate_redirection("/tmp/liberty.txt", "/home/frank"),
            Verdict::Allow
        );
    }
}
