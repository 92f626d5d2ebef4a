//! The four message kinds a PAM-style conversation produces, and the
//! `Converser` trait that answers them.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStyle {
    EchoOffPrompt,
    EchoOnPrompt,
    Info,
    Error,
}

pub trait Converser {
    /// An echo-on prompt (e.g. a username confirmation); returns the
    /// collected line.
    fn handle_normal_prompt(&self, prompt: &str) -> std::io::Result<String>;

    /// An echo-off prompt (a password); local echo must be disabled
    /// while reading.
    fn handle_hidden_prompt(&self, prompt: &str) -> std::io::Result<String>;

    fn handle_info(&self, message: &str);

    fn handle_error(&self, message: &str);

    fn handle_message(&self, style: MessageStyle, text: &str) -> std::io::Result<Option<String>> {
        match style {
            MessageStyle::EchoOnPrompt => self.handle_normal_prompt(text).map(Some),
            MessageStyle::EchoOffPrompt => self.handle_hidden_prompt(text).map(Some),
            MessageStyle::Info => {
                self.handle_info(text);
                Ok(None)
            }
            MessageStyle::Error => {
                self.handle_error(text);
                Ok(None)
            }
        }
    }
}

/// Deterministic, rule-based stand-in used when `SUDOSH_TEST_MODE=1`
/// (REDESIGN FLAGS: dependency-injected component factories, no
/// conditional compilation in the core).
pub struct TestConverser {
    pub canned_password: String,
}

impl Converser for TestConverser {
    fn handle_normal_prompt(&self, _prompt: &str) -> std::io::Result<String> {
        Ok(String::new())
    }

    fn handle_hidden_prompt(&self, _prompt: &str) -> std::io::Result<String> {
        Ok(self.canned_password.clone())
    }

    fn handle_info(&self, _message: &str) {}

    fn handle_error(&self, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converser_returns_canned_password_for_hidden_prompt() {
        let c = TestConverser {
            canned_password: "hunter2".into(),
        };
        assert_eq!(
            c.handle_message(MessageStyle::EchoOffPrompt, "Password:").unwrap(),
            Some("hunter2".to_string())
        );
    }

    #[test]
    fn info_and_error_messages_produce_no_reply() {
        let c = TestConverser {
            canned_password: "x".into(),
        };
        assert_eq!(c.handle_message(MessageStyle::Info, "note").unwrap(), None);
        assert_eq!(c.handle_message(MessageStyle::Error, "oops").unwrap(), None);
    }
}
