//! Process-wide logger installation, modeled on sudo-rs's `SudoLogger`:
//! a single `log::Log` implementor that routes by target prefix.
//! `sudosh::audit` is the Audit Sink's transport and is never
//! suppressed; `sudosh::session` carries non-audit diagnostics.

use log::{Level, Log, Metadata, Record};
use std::ffi::CString;
use std::sync::Once;

pub const AUDIT_TARGET: &str = "sudosh::audit";
pub const SESSION_TARGET: &str = "sudosh::session";
pub const DEV_TARGET: &str = "sudosh::dev";

struct SudoshLogger;

impl Log for SudoshLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let target = record.target();
        if target.starts_with(AUDIT_TARGET) {
            write_syslog(record);
        } else if target.starts_with(DEV_TARGET) {
            #[cfg(feature = "dev")]
            write_dev_log(record);
        } else {
            eprintln!("sudosh: {}", record.args());
        }
    }

    fn flush(&self) {}
}

fn write_syslog(record: &Record) {
    // SAFETY: `msg` is a freshly constructed, nul-terminated, owned
    // CString; `syslog` does not retain the pointer past the call.
    unsafe {
        let priority = match record.level() {
            Level::Error => libc::LOG_ERR,
            Level::Warn => libc::LOG_WARNING,
            _ => libc::LOG_INFO,
        };
        if let Ok(msg) = CString::new(format!("sudosh: {}", record.args())) {
            libc::syslog(libc::LOG_AUTH | priority, msg.as_ptr());
        }
    }
}

#[cfg(feature = "dev")]
fn write_dev_log(record: &Record) {
    use std::io::Write;
    if let Ok(path) = std::env::var("SUDOSH_DEV_LOGS") {
        if let Ok(mut f) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(f, "[{}] {}", record.level(), record.args());
        }
    }
}

static INIT: Once = Once::new();

/// Installs the process-wide logger. Safe to call more than once;
/// only the first call takes effect.
pub fn init() {
    INIT.call_once(|| {
        // SAFETY: `openlog` is called once, before any syslog() call,
        // with a 'static ident string.
        unsafe {
            let ident = CString::new("sudosh").unwrap();
            libc::openlog(ident.as_ptr(), libc::LOG_PID | libc::LOG_NDELAY, libc::LOG_AUTH);
        }
        log::set_boxed_logger(Box::new(SudoshLogger))
            .map(|()| log::set_max_level(log::LevelFilter::Info))
            .ok();
    });
}

/// Emits an always-on structured audit record.
#[macro_export]
macro_rules! audit_event {
    ($($arg:tt)+) => {
        ::log::info!(target: $crate::log::AUDIT_TARGET, $($arg)+)
    };
}

/// Non-audit session diagnostic, warning severity.
#[macro_export]
macro_rules! sess_warn {
    ($($arg:tt)+) => {
        ::log::warn!(target: $crate::log::SESSION_TARGET, $($arg)+)
    };
}

/// Non-audit session diagnostic, informational severity.
#[macro_export]
macro_rules! sess_info {
    ($($arg:tt)+) => {
        ::log::info!(target: $crate::log::SESSION_TARGET, $($arg)+)
    };
}
