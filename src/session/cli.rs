//! Hand-rolled parser for the invocation surface in the external
//! interfaces section: long and short forms accepted equivalently,
//! bare non-option arguments joined into a single command.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SudoAction {
    Help,
    Version,
    List,
    RunShell,
    RunCommand(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub action: SudoAction,
    pub verbose: bool,
    pub log_session_file: Option<String>,
    pub user: Option<String>,
}

impl Default for Invocation {
    fn default() -> Self {
        Invocation {
            action: SudoAction::RunShell,
            verbose: false,
            log_session_file: None,
            user: None,
        }
    }
}

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_COMMAND_NOT_FOUND: i32 = 127;
pub const EXIT_AUTH_FAILURE: i32 = 1;

/// Parses `argv[1..]`. Unrecognized flags are treated as an error;
/// everything after the first bare (non-`-`-prefixed) argument,
/// plus that argument itself, is joined by spaces into a single
/// command (`-c` does the same explicitly).
pub fn parse_args(args: &[String]) -> Result<Invocation, String> {
    let mut inv = Invocation::default();
    let mut i = 0;
    let mut trailing: Vec<String> = Vec::new();

    while i < args.len() {
        let arg = &args[i];
        match arg.as_str() {
            "-h" | "--help" => {
                inv.action = SudoAction::Help;
                return Ok(inv);
            }
            "--version" => {
                inv.action = SudoAction::Version;
                return Ok(inv);
            }
            "-v" | "--verbose" => inv.verbose = true,
            "-l" | "--list" => inv.action = SudoAction::List,
            "-L" | "--log-session" => {
                i += 1;
                let file = args.get(i).ok_or("--log-session requires a FILE argument")?;
                inv.log_session_file = Some(file.clone());
            }
            "-u" | "--user" => {
                i += 1;
                let user = args.get(i).ok_or("--user requires a USER argument")?;
                inv.user = Some(user.clone());
            }
            "-c" => {
                i += 1;
                let rest = args[i..].join(" ");
                inv.action = SudoAction::RunCommand(rest);
                return Ok(inv);
            }
            "--rc-alias-import" | "--no-rc-alias-import" | "--ansible-detect"
            | "--no-ansible-detect" | "--ansible-force" | "--ansible-verbose" => {
                // Out-of-scope heuristics, accepted and ignored so the
                // invocation surface remains drop-in compatible.
            }
            other if other.starts_with('-') && other.len() > 1 => {
                return Err(format!("unrecognized option: {other}"));
            }
            other => {
                trailing.push(other.to_string());
            }
        }
        i += 1;
    }

    if !trailing.is_empty() {
        inv.action = SudoAction::RunCommand(trailing.join(" "));
    }
    Ok(inv)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn help_flag_short_circuits() {
        let inv = parse_args(&args(&["-h", "ls"])).unwrap();
        assert_eq!(inv.action, SudoAction::Help);
    }

    #[test]
    fn bare_args_join_into_one_command() {
        let inv = parse_args(&args(&["ls", "-la", "/var/log"])).unwrap();
        assert_eq!(
            inv.action,
            SudoAction::RunCommand("ls -la /var/log".to_string())
        );
    }

    #[test]
    fn dash_c_joins_remaining_args() {
        let inv = parse_args(&args(&["-c", "ls", "-la"])).unwrap();
        assert_eq!(inv.action, SudoAction::RunCommand("ls -la".to_string()));
    }

    #[test]
    fn user_flag_captures_value() {
        let inv = parse_args(&args(&["-u", "deploy", "whoami"])).unwrap();
        assert_eq!(inv.user.as_deref(), Some("deploy"));
        assert_eq!(inv.action, SudoAction::RunCommand("whoami".to_string()));
    }

    #[test]
    fn unknown_flag_is_an_error() {
        assert!(parse_args(&args(&["--not-a-real-flag"])).is_err());
    }

    #[test]
    fn list_flag_sets_list_only_action() {
        let inv = parse_args(&args(&["-l"])).unwrap();
        assert_eq!(inv.action, SudoAction::List);
    }
}
