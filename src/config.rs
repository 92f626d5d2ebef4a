//! Session-scoped configuration: compile-time defaults plus the
//! `SUDOSH_*` environment overrides named in the external interfaces.
//! There is no `Defaults`-settings DSL here: `Defaults` lines in the
//! sudoers grammar are recognized but discarded (see `sudoers::parser`),
//! so there is no global settings object for them to populate.

use std::env;
use std::time::Duration;

/// Hard-coded secure PATH used to resolve `argv[0]`. Never the
/// inherited `PATH`.
pub const SECURE_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

pub const DEFAULT_ELEVATED_USER: &str = "root";

pub const MAX_COMMAND_LENGTH: usize = 4096;

pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(300);

pub const ADMIN_GROUPS: &[&str] = &["wheel", "sudo", "admin"];

/// Shell and interpreter basenames the executor refuses to launch
/// directly. An entry ending in `*` matches by prefix, so `python*`
/// covers `python2`, `python3`, and versioned binaries like
/// `python3.11` without naming each one.
pub const SHELLS_AND_INTERPRETERS: &[&str] = &[
    "sh", "bash", "zsh", "csh", "tcsh", "ksh", "fish", "dash", "python*", "perl", "ruby", "node",
    "irb", "pry",
];

pub const EDITORS: &[&str] = &[
    "vi", "vim", "nvim", "emacs", "nano", "pico", "joe", "mcedit", "ed", "ex", "view",
];

pub const DANGEROUS_COMMANDS: &[&str] = &[
    "shutdown", "reboot", "halt", "poweroff", "init", "systemctl", "service", "fdisk", "parted",
    "mkfs", "dd", "iptables", "ip6tables", "nft", "ufw", "firewall-cmd", "mount", "umount",
    "crontab", "at", "sudo", "su", "doas", "pkexec",
];

pub const SAFE_READ_ONLY_COMMANDS: &[&str] = &[
    "ls", "cat", "less", "more", "head", "tail", "grep", "find", "whoami", "id", "pwd", "echo",
    "ps", "df", "du", "uptime", "date", "uname", "hostname", "which",
];

pub const PIPELINE_WHITELIST: &[&str] = &[
    "grep", "awk", "sed", "sort", "uniq", "cut", "tr", "wc", "head", "tail", "cat", "xargs",
    "find",
];

/// Directories treated as system-owned for the mutation ban and the
/// redirection sub-grammar. `/lib*` matches by prefix against a path's
/// top-level directory name, covering `/lib64`, `/lib32`, and
/// `/libx32` alongside `/lib` itself.
pub const SYSTEM_DIRECTORIES: &[&str] = &[
    "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/lib*", "/var/log", "/var/run", "/var/lib",
    "/boot", "/dev", "/proc", "/sys", "/root",
];

pub const ENV_VARS_TO_UNSET: &[&str] = &[
    "IFS",
    "CDPATH",
    "ENV",
    "BASH_ENV",
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "SHLIB_PATH",
    "LIBPATH",
    "DYLD_LIBRARY_PATH",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_FORCE_FLAT_NAMESPACE",
    "TMPDIR",
    "TMP",
    "TEMP",
];

pub const EDITOR_ENV_VARS: &[&str] = &["SUDO_EDITOR", "VISUAL", "EDITOR"];

pub const ENV_VARS_PRESERVED_FOR_UI: &[&str] = &[
    "TERM",
    "COLORTERM",
    "PS1",
    "PROMPT",
    "LS_COLORS",
    "CLICOLOR",
    "CLICOLOR_FORCE",
];

pub const CREDENTIAL_CACHE_DIR: &str = "/var/run/sudosh";

pub const DEFAULT_SUDOERS_PATH: &str = "/etc/sudosh.conf";
pub const DEFAULT_SUDOERS_DIR: &str = "/etc/sudosh.d";

pub const DIRECTORY_SOCKET_PATH: &str = "/var/lib/sss/pipes/nss";
pub const DIRECTORY_SOCKET_TIMEOUT: Duration = Duration::from_secs(2);

/// Resolved once at session start from the compile-time defaults
/// above and the environment; never mutated afterward.
#[derive(Debug, Clone)]
pub struct Config {
    pub sudoers_path: String,
    pub sudoers_dir: String,
    pub test_mode: bool,
    pub debug_sssd: bool,
    pub force_socket_transport: bool,
    pub cache_timeout: Duration,
    pub inactivity_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sudoers_path: DEFAULT_SUDOERS_PATH.to_string(),
            sudoers_dir: DEFAULT_SUDOERS_DIR.to_string(),
            test_mode: false,
            debug_sssd: false,
            force_socket_transport: false,
            cache_timeout: DEFAULT_CACHE_TIMEOUT,
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut cfg = Config::default();
        if let Ok(p) = env::var("SUDOSH_SUDOERS_PATH") {
            cfg.sudoers_path = p;
        }
        if let Ok(d) = env::var("SUDOSH_SUDOERS_DIR") {
            cfg.sudoers_dir = d;
        }
        cfg.test_mode = is_truthy_env("SUDOSH_TEST_MODE");
        cfg.debug_sssd = is_truthy_env("SUDOSH_DEBUG_SSSD");
        cfg.force_socket_transport = is_truthy_env("SUDOSH_SSSD_FORCE_SOCKET");
        cfg
    }
}

fn is_truthy_env(name: &str) -> bool {
    matches!(env::var(name).as_deref(), Ok("1"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_overrides_active() {
        let cfg = Config::default();
        assert!(!cfg.test_mode);
        assert_eq!(cfg.sudoers_path, DEFAULT_SUDOERS_PATH);
    }
}
