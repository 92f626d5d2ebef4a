#![forbid(unsafe_code)]

use sudosh::auth::{CliConverser, PamAuthenticator};
use sudosh::cache::CredentialCache;
use sudosh::common::{CallerContext, EnvIntent, InvocationMode, TargetIdentity};
use sudosh::config::Config;
use sudosh::directory::DirectoryClient;
use sudosh::identity::{IdentityResolver, UserRecord};
use sudosh::session::cli::{self, SudoAction};
use sudosh::session::{Outcome, SessionController};
use sudosh::system::signal::install_handlers;
use sudosh::system::{real_identity, Process};
use sudosh::sudoers;
use sudosh::Error;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn usage() -> &'static str {
    "usage: sudosh [-h] [-v] [-l] [-u user] [-c command] [command ...]\n\
     \n\
     Interactive, audited privileged-command shell.\n\
     \n\
       -h, --help            show this help message\n\
       -v, --verbose          enable verbose diagnostics\n\
       -l, --list             list the commands available to the caller\n\
       -u, --user USER        run as USER instead of root\n\
       -c COMMAND             run COMMAND non-interactively and exit\n\
       -L, --log-session FILE capture a transcript of the session to FILE\n"
}

fn build_caller_context() -> Result<(CallerContext, UserRecord), Error> {
    let process = Process::current();
    let (real_uid, real_gid) = real_identity();

    let caller = match sudosh::system::User::from_uid(real_uid)? {
        Some(u) => UserRecord {
            name: u.name,
            uid: u.uid,
            gid: u.gid,
        },
        None => return Err(Error::UserNotFound(format!("uid {}", real_uid.inner()))),
    };

    let hostname_short = sudosh::system::hostname().unwrap_or_else(|_| "localhost".to_string());
    let hostname_canonical = hostname_short.clone();

    let env_intent = if std::env::var("SUDOSH_AUTOMATED").as_deref() == Ok("1") || !atty_stdin() {
        EnvIntent::Automated
    } else {
        EnvIntent::Interactive
    };

    let ctx = CallerContext {
        real_uid,
        real_gid,
        real_name: caller.name.clone(),
        effective_uid: sudosh::system::effective_uid(),
        terminal: process.tty.clone(),
        hostname_short,
        hostname_canonical,
        pid: process.pid,
        mode: InvocationMode::Interactive,
        env_intent,
    };
    Ok((ctx, caller))
}

fn atty_stdin() -> bool {
    std::io::IsTerminal::is_terminal(&std::io::stdin())
}

fn run() -> i32 {
    sudosh::log::init();
    let config = Config::from_env();
    let invocation = match cli::parse_args(&std::env::args().skip(1).collect::<Vec<_>>()) {
        Ok(inv) => inv,
        Err(e) => {
            eprintln!("sudosh: {e}");
            eprint!("{}", usage());
            return 2;
        }
    };

    match &invocation.action {
        SudoAction::Help => {
            print!("{}", usage());
            return cli::EXIT_SUCCESS;
        }
        SudoAction::Version => {
            println!("sudosh {VERSION}");
            return cli::EXIT_SUCCESS;
        }
        _ => {}
    }

    let (caller_ctx, caller) = match build_caller_context() {
        Ok(v) => v,
        Err(e) => {
            eprintln!("sudosh: could not resolve caller identity: {e}");
            return 1;
        }
    };

    let resolver = IdentityResolver::standard();
    let local_rules = sudoers::load(&config.sudoers_path, &config.sudoers_dir);
    let directory = DirectoryClient::new(config.force_socket_transport, config.debug_sssd);
    let cache = CredentialCache::new(sudosh::config::CREDENTIAL_CACHE_DIR, config.cache_timeout);
    let converser = CliConverser;
    let authenticator = PamAuthenticator {
        converser: &converser,
    };
    let cancellation = install_handlers();

    let target = match &invocation.user {
        Some(name) => TargetIdentity::Named(name.clone()),
        None => TargetIdentity::DefaultElevated,
    };

    let controller = SessionController {
        resolver: &resolver,
        cache: &cache,
        authenticator: &authenticator,
        directory: &directory,
        local_rules,
        local_ipv4s: local_ipv4_addresses(),
        cancellation,
    };

    match invocation.action {
        SudoAction::List => {
            println!("{} may run commands permitted by the configured policy as {}", caller.name, target.display_name("root"));
            cli::EXIT_SUCCESS
        }
        SudoAction::RunCommand(command) => run_one(
            &controller,
            &caller_ctx,
            &caller,
            &target,
            &command,
            sudosh::system::time::now_unix(),
        ),
        SudoAction::RunShell => run_shell(&controller, &caller_ctx, &caller, &target, config.inactivity_timeout),
        SudoAction::Help | SudoAction::Version => unreachable!(),
    }
}

fn run_one(
    controller: &SessionController<'_>,
    caller_ctx: &CallerContext,
    caller: &UserRecord,
    target: &TargetIdentity,
    command: &str,
    now: i64,
) -> i32 {
    let confirm = |reason: &str| -> bool {
        eprint!("sudosh: {reason} -- proceed? [y/N] ");
        let _ = std::io::Write::flush(&mut std::io::stderr());
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).ok();
        matches!(line.trim(), "y" | "Y" | "yes")
    };
    match controller.process_command(caller_ctx, caller, target, command, now, &confirm) {
        Outcome::NoOp => cli::EXIT_SUCCESS,
        Outcome::Denied(reason) => {
            eprintln!("sudosh: {reason}");
            1
        }
        Outcome::Executed(code) => code,
        Outcome::AuthenticationFailed => cli::EXIT_AUTH_FAILURE,
        Outcome::Interrupted => 130,
    }
}

/// Drives the read-eval-audit loop from a background reader thread so
/// an inactivity timeout can be enforced without blocking forever in
/// `read_line` (§5's inactivity-timeout requirement).
fn run_shell(
    controller: &SessionController<'_>,
    caller_ctx: &CallerContext,
    caller: &UserRecord,
    target: &TargetIdentity,
    inactivity_timeout: std::time::Duration,
) -> i32 {
    use std::sync::mpsc;

    println!(
        "sudosh {VERSION} -- type a command to run as {}, or 'exit' to quit.",
        target.display_name("root")
    );

    let (tx, rx) = mpsc::channel::<Option<String>>();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        loop {
            let mut line = String::new();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => {
                    let _ = tx.send(None);
                    return;
                }
                Ok(_) => {
                    if tx.send(Some(line)).is_err() {
                        return;
                    }
                }
            }
        }
    });

    let mut last_code = cli::EXIT_SUCCESS;
    loop {
        if controller.cancellation.shutdown_requested() {
            break;
        }
        eprint!("sudosh> ");
        let _ = std::io::Write::flush(&mut std::io::stderr());

        match rx.recv_timeout(inactivity_timeout) {
            Ok(None) => break,
            Ok(Some(line)) => {
                let line = line.trim();
                if line == "exit" || line == "quit" {
                    break;
                }
                if line.is_empty() {
                    continue;
                }
                last_code = run_one(controller, caller_ctx, caller, target, line, sudosh::system::time::now_unix());
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                eprintln!("\nsudosh: session timed out after {}s of inactivity", inactivity_timeout.as_secs());
                break;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    last_code
}

/// Host-match rules keyed on a literal IPv4 or CIDR are evaluated
/// against this list; enumerating local interface addresses needs a
/// netlink/`getifaddrs` call this crate does not yet make, so such
/// rules never match today. Hostname- and wildcard-keyed rules are
/// unaffected.
fn local_ipv4_addresses() -> Vec<std::net::Ipv4Addr> {
    Vec::new()
}

fn main() {
    std::process::exit(run());
}
