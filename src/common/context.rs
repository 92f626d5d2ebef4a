use crate::system::interface::{GroupId, ProcessId, UserId};

/// How the session was invoked, per the external-interfaces surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationMode {
    Interactive,
    SingleCommand,
    ValidateOnly,
    ListOnly,
}

/// Whether the calling environment is considered hostile (automation,
/// an editor driving the shell, etc). Reduced to a boolean input per
/// the out-of-scope AI/editor/Ansible detection heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvIntent {
    Interactive,
    Automated,
}

impl EnvIntent {
    pub fn is_automated(self) -> bool {
        matches!(self, EnvIntent::Automated)
    }
}

/// Immutable for the life of a session. Threaded explicitly through
/// the Session Controller and down into each component; no component
/// reaches up for ambient state.
#[derive(Debug, Clone)]
pub struct CallerContext {
    pub real_uid: UserId,
    pub real_gid: GroupId,
    pub real_name: String,
    pub effective_uid: UserId,
    pub terminal: Option<String>,
    pub hostname_short: String,
    pub hostname_canonical: String,
    pub pid: ProcessId,
    pub mode: InvocationMode,
    pub env_intent: EnvIntent,
}

impl CallerContext {
    /// The terminal label used by the credential cache: the device
    /// name with `/` replaced by `_`, or `unknown`.
    pub fn terminal_label(&self) -> String {
        match &self.terminal {
            Some(t) => t.replace('/', "_"),
            None => "unknown".to_string(),
        }
    }
}

/// Either the default elevated identity (conventionally the
/// superuser) or an explicit named account.
#[derive(Debug, Clone)]
pub enum TargetIdentity {
    DefaultElevated,
    Named(String),
}

impl TargetIdentity {
    pub fn display_name(&self, default_elevated_name: &str) -> String {
        match self {
            TargetIdentity::DefaultElevated => default_elevated_name.to_string(),
            TargetIdentity::Named(n) => n.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_label_replaces_slashes() {
        let ctx = CallerContext {
            real_uid: UserId::new(1000),
            real_gid: GroupId::new(1000),
            real_name: "alice".into(),
            effective_uid: UserId::ROOT,
            terminal: Some("/dev/pts/3".into()),
            hostname_short: "db01".into(),
            hostname_canonical: "db01.example.com".into(),
            pid: ProcessId::new(42),
            mode: InvocationMode::Interactive,
            env_intent: EnvIntent::Interactive,
        };
        assert_eq!(ctx.terminal_label(), "_dev_pts_3");
    }

    #[test]
    fn terminal_label_unknown_when_absent() {
        assert_eq!(
            CallerContext {
                real_uid: UserId::new(1000),
                real_gid: GroupId::new(1000),
                real_name: "bob".into(),
                effective_uid: UserId::ROOT,
                terminal: None,
                hostname_short: "h".into(),
                hostname_canonical: "h.example.com".into(),
                pid: ProcessId::new(1),
                mode: InvocationMode::SingleCommand,
                env_intent: EnvIntent::Interactive,
            }
            .terminal_label(),
            "unknown"
        );
    }
}
