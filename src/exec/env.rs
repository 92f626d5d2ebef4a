//! Environment sanitization (§4.8, mandatory before any `exec`), and
//! `argv[0]` resolution against the hard-coded secure path rather than
//! the inherited `PATH`.

use crate::common::Environment;
use crate::config::{EDITORS, EDITOR_ENV_VARS, ENV_VARS_TO_UNSET, SECURE_PATH};
use crate::system::User;
use std::path::{Path, PathBuf};

/// Starting from the caller's environment, drop every variable named
/// in `ENV_VARS_TO_UNSET`, the editor-manipulation variables when the
/// resolved command is an editor, and force a secure `PATH` when none
/// is already present. Identity variables (`HOME`/`USER`/`LOGNAME`)
/// are set separately by the caller once the target user is known.
pub fn sanitize(caller_env: &Environment, resolved_base: &str) -> Environment {
    let is_editor = EDITORS.contains(&resolved_base);
    let mut out: Environment = caller_env
        .iter()
        .filter(|(k, _)| !ENV_VARS_TO_UNSET.contains(&k.as_str()))
        .filter(|(k, _)| !(is_editor && EDITOR_ENV_VARS.contains(&k.as_str())))
        .cloned()
        .collect();

    if !out.iter().any(|(k, _)| k == "PATH") {
        out.push(("PATH".to_string(), SECURE_PATH.to_string()));
    }
    out
}

/// Overwrites `HOME`/`USER`/`LOGNAME` with the target's passwd record,
/// per §4.8 step 3.
pub fn set_identity_vars(env: &mut Environment, target: &User) {
    for key in ["HOME", "USER", "LOGNAME"] {
        env.retain(|(k, _)| k != key);
    }
    env.push(("HOME".to_string(), target.home.clone()));
    env.push(("USER".to_string(), target.name.clone()));
    env.push(("LOGNAME".to_string(), target.name.clone()));
}

/// Resolves `argv[0]` per §4.8 step 1: verbatim if it contains a path
/// separator, otherwise a search of the secure path, never the
/// inherited `PATH`. Returns `None` if no executable is found.
pub fn resolve_argv0(argv0: &str) -> Option<PathBuf> {
    if argv0.contains('/') {
        let p = PathBuf::from(argv0);
        return is_executable(&p).then_some(p);
    }
    for dir in SECURE_PATH.split(':') {
        let candidate = Path::new(dir).join(argv0);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_vars_are_removed() {
        let env = vec![
            ("IFS".to_string(), "x".to_string()),
            ("TERM".to_string(), "xterm".to_string()),
        ];
        let out = sanitize(&env, "ls");
        assert!(!out.iter().any(|(k, _)| k == "IFS"));
        assert!(out.iter().any(|(k, _)| k == "TERM"));
    }

    #[test]
    fn missing_path_gets_secure_default() {
        let env = vec![];
        let out = sanitize(&env, "ls");
        assert_eq!(
            out.iter().find(|(k, _)| k == "PATH").map(|(_, v)| v.as_str()),
            Some(SECURE_PATH)
        );
    }

    #[test]
    fn editor_vars_suppressed_for_editor_commands() {
        let env = vec![("EDITOR".to_string(), "vim".to_string())];
        let out = sanitize(&env, "vim");
        assert!(!out.iter().any(|(k, _)| k == "EDITOR"));
    }

    #[test]
    fn editor_vars_preserved_for_non_editor_commands() {
        let env = vec![("EDITOR".to_string(), "vim".to_string())];
        let out = sanitize(&env, "ls");
        assert!(out.iter().any(|(k, _)| k == "EDITOR"));
    }

    #[test]
    fn resolve_argv0_with_separator_is_used_verbatim() {
        assert_eq!(resolve_argv0("/bin/ls").is_some(), Path::new("/bin/ls").exists());
    }

    #[test]
    fn resolve_argv0_unknown_command_is_none() {
        assert!(resolve_argv0("sudosh-test-no-such-binary-xyz").is_none());
    }
}
