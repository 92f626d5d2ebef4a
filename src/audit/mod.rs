#![forbid(unsafe_code)]

//! Audit Sink: every decision and execution emits at least one record
//! to the platform's structured audit facility (`sudosh::audit`, see
//! `log.rs`); there is no quiet mode. Callers are responsible for the
//! ordering guarantee in §5 (validation-decision →
//! authentication-event → execution-start → per-stage events →
//! execution-complete); this module only formats and emits.

use crate::audit_event;
use crate::exec::ExitStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    ValidationDecision,
    AuthenticationEvent,
    ExecutionStart,
    StageStart,
    StageComplete,
    ExecutionComplete,
    CacheHit,
    CacheMiss,
    CacheInvalidated,
}

impl RecordKind {
    fn label(self) -> &'static str {
        match self {
            RecordKind::ValidationDecision => "validation-decision",
            RecordKind::AuthenticationEvent => "authentication-event",
            RecordKind::ExecutionStart => "execution-start",
            RecordKind::StageStart => "stage-start",
            RecordKind::StageComplete => "stage-complete",
            RecordKind::ExecutionComplete => "execution-complete",
            RecordKind::CacheHit => "cache-hit",
            RecordKind::CacheMiss => "cache-miss",
            RecordKind::CacheInvalidated => "cache-invalidated",
        }
    }
}

/// One structured record's fixed fields, per §4.9: timestamp is
/// supplied by the logger at emission time, not carried here.
pub struct AuditRecord<'a> {
    pub kind: RecordKind,
    pub caller_username: &'a str,
    pub caller_terminal: &'a str,
    pub target_username: &'a str,
    pub command: &'a str,
    pub decision: &'a str,
    pub source_label: Option<&'a str>,
    pub reason: Option<&'a str>,
}

pub struct AuditSink;

impl AuditSink {
    pub fn emit(record: &AuditRecord) {
        let source = record.source_label.unwrap_or("-");
        let reason = record.reason.unwrap_or("-");
        audit_event!(
            "kind={} caller={} tty={} target={} command={:?} decision={} source={} reason={}",
            record.kind.label(),
            record.caller_username,
            record.caller_terminal,
            record.target_username,
            record.command,
            record.decision,
            source,
            reason
        );
    }

    pub fn execution_start(caller: &str, tty: &str, target: &str, command: &str, source_label: &str) {
        AuditSink::emit(&AuditRecord {
            kind: RecordKind::ExecutionStart,
            caller_username: caller,
            caller_terminal: tty,
            target_username: target,
            command,
            decision: "allow",
            source_label: Some(source_label),
            reason: None,
        });
    }

    /// §5's "per-stage events": one pair per pipeline stage, between
    /// `execution_start` and `execution_complete`.
    pub fn stage_start(caller: &str, tty: &str, target: &str, stage_index: usize, stage_command: &str) {
        audit_event!(
            "kind={} caller={caller} tty={tty} target={target} stage={stage_index} command={stage_command:?}",
            RecordKind::StageStart.label()
        );
    }

    pub fn stage_complete(caller: &str, tty: &str, target: &str, stage_index: usize, status: ExitStatus) {
        let exit_code = status.as_process_exit_code();
        audit_event!(
            "kind={} caller={caller} tty={tty} target={target} stage={stage_index} exit_code={exit_code}",
            RecordKind::StageComplete.label()
        );
    }

    pub fn execution_complete(caller: &str, tty: &str, target: &str, command: &str, status: ExitStatus) {
        let exit_code = status.as_process_exit_code();
        audit_event!(
            "kind={} caller={caller} tty={tty} target={target} command={command:?} exit_code={exit_code}",
            RecordKind::ExecutionComplete.label()
        );
    }

    pub fn cache_event(kind: RecordKind, caller: &str, tty: &str) {
        audit_event!("kind={} caller={caller} tty={tty}", kind.label());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_kind_labels_are_stable() {
        assert_eq!(RecordKind::ValidationDecision.label(), "validation-decision");
        assert_eq!(RecordKind::ExecutionComplete.label(), "execution-complete");
        assert_eq!(RecordKind::StageStart.label(), "stage-start");
        assert_eq!(RecordKind::StageComplete.label(), "stage-complete");
    }

    #[test]
    fn emit_does_not_panic_on_minimal_record() {
        AuditSink::emit(&AuditRecord {
            kind: RecordKind::ValidationDecision,
            caller_username: "erin",
            caller_terminal: "_dev_pts_3",
            target_username: "root",
            command: "ls -la",
            decision: "allow",
            source_label: None,
            reason: None,
        });
    }
}
