//! Socket transport: connects to the responder's Unix socket, sends a
//! framed request, and decodes a framed reply into rules. Every read
//! is polled with a bounded timeout (at least two seconds); partial
//! reads are retried until the declared length is satisfied or the
//! timeout fires.

use super::wire::{encode_body, Attr, AttrReader, AttrType, Header, HEADER_LEN};
use crate::common::Error;
use crate::sudoers::ast::{apply_option_token, CommandPattern, HostMatch, Rule, UserMatch};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

const CMD_GET_SUDO_RULES: u32 = 0x1001;

pub struct SocketTransport {
    pub socket_path: String,
    pub timeout: Duration,
}

impl SocketTransport {
    pub fn new(socket_path: impl Into<String>, timeout: Duration) -> SocketTransport {
        SocketTransport {
            socket_path: socket_path.into(),
            timeout,
        }
    }

    pub fn query(
        &self,
        uid: u32,
        username: &str,
        hostname_short: &str,
        hostname_canonical: &str,
        runas_user: &str,
    ) -> Result<Vec<Rule>, Error> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .map_err(|e| Error::Transport(format!("connect failed: {e}")))?;
        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(Error::from)?;
        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(Error::from)?;

        let mut attrs = vec![
            Attr::new(AttrType::User, username.as_bytes().to_vec()),
            Attr::new(AttrType::Uid, uid.to_le_bytes().to_vec()),
            Attr::new(AttrType::Hostname, hostname_short.as_bytes().to_vec()),
        ];
        if hostname_canonical != hostname_short {
            attrs.push(Attr::new(
                AttrType::Hostname,
                hostname_canonical.as_bytes().to_vec(),
            ));
        }
        attrs.push(Attr::new(AttrType::RunAsUser, runas_user.as_bytes().to_vec()));

        let body = encode_body(&attrs);
        let header = Header {
            total_length: (HEADER_LEN + body.len()) as u32,
            command_id: CMD_GET_SUDO_RULES,
            reserved1: 0,
            reserved2: 0,
        };

        stream
            .write_all(&header.encode())
            .map_err(|e| Error::Transport(format!("write failed: {e}")))?;
        stream
            .write_all(&body)
            .map_err(|e| Error::Transport(format!("write failed: {e}")))?;

        let reply_header_buf = read_exact_with_retry(&mut stream, HEADER_LEN)?;
        let reply_header = Header::decode(&reply_header_buf)?;
        if reply_header.reserved1 != 0 {
            // a nonzero status field signals an error; no body follows
            return Err(Error::Transport(format!(
                "responder status {}",
                reply_header.reserved1
            )));
        }
        let body_len = (reply_header.total_length as usize).saturating_sub(HEADER_LEN);
        let body = read_exact_with_retry(&mut stream, body_len)?;

        decode_rules(&body, "directory")
    }
}

fn read_exact_with_retry(stream: &mut UnixStream, len: usize) -> Result<Vec<u8>, Error> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Err(Error::Transport("connection closed early".into())),
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(Error::Timeout("directory socket read".into()))
            }
            Err(e) => return Err(Error::Transport(format!("read failed: {e}"))),
        }
    }
    Ok(buf)
}

/// Walks the TLV stream left-to-right, accumulating `RUNASUSER`,
/// `RUNASGROUP`, and `OPTION` TLVs as running state, emitting a Rule
/// each time a `COMMAND` TLV is seen (§4.3).
fn decode_rules(body: &[u8], source_label: &str) -> Result<Vec<Rule>, Error> {
    let mut rules = Vec::new();
    let mut runas_user: Option<String> = None;
    let mut runas_group: Option<String> = None;
    let mut pending_options: Vec<String> = Vec::new();

    for attr in AttrReader::new(body)? {
        let attr = attr?;
        match attr.attr_type {
            AttrType::RunAsUser => runas_user = Some(attr.as_str().into_owned()),
            AttrType::RunAsGroup => runas_group = Some(attr.as_str().into_owned()),
            AttrType::Option => pending_options.push(attr.as_str().into_owned()),
            AttrType::Command => {
                let mut rule = Rule::new(source_label);
                rule.users = vec![UserMatch::All];
                rule.hosts = vec![HostMatch::All];
                rule.runas_user = runas_user.clone();
                rule.runas_group = runas_group.clone();
                rule.commands = vec![parse_command(&attr.as_str())];
                for opt in &pending_options {
                    for token in opt.split(|c| c == ',' || c == '\n') {
                        apply_option_token(&mut rule, token);
                    }
                }
                rules.push(rule);
            }
            // unknown TLV types are skipped
            _ => {}
        }
    }
    Ok(rules)
}

fn parse_command(s: &str) -> CommandPattern {
    if let Some(rest) = s.strip_prefix('!') {
        return CommandPattern::Negated(Box::new(parse_command(rest)));
    }
    if s == "ALL" {
        CommandPattern::All
    } else if s.contains('*') || s.contains('?') {
        CommandPattern::Glob(s.to_string())
    } else {
        CommandPattern::Exact(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::wire::encode_body;

    #[test]
    fn decodes_rule_on_command_tlv() {
        let attrs = vec![
            Attr::new(AttrType::RunAsUser, b"root".to_vec()),
            Attr::new(AttrType::Option, b"nopasswd".to_vec()),
            Attr::new(AttrType::Command, b"/usr/bin/systemctl restart nginx".to_vec()),
        ];
        let body = encode_body(&attrs);
        let rules = decode_rules(&body, "directory").unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].runas_user.as_deref(), Some("root"));
        assert_eq!(
            rules[0].commands[0],
            CommandPattern::Exact("/usr/bin/systemctl restart nginx".into())
        );
    }

    #[test]
    fn unknown_tlv_is_skipped_not_fatal() {
        let attrs = vec![
            Attr::new(AttrType::Unknown(250), b"ignore-me".to_vec()),
            Attr::new(AttrType::Command, b"ALL".to_vec()),
        ];
        let body = encode_body(&attrs);
        let rules = decode_rules(&body, "directory").unwrap();
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn authenticate_option_sets_nopasswd_same_as_library_transport() {
        let attrs = vec![
            Attr::new(AttrType::Option, b"!authenticate".to_vec()),
            Attr::new(AttrType::Command, b"ALL".to_vec()),
        ];
        let body = encode_body(&attrs);
        let rules = decode_rules(&body, "directory").unwrap();
        assert!(rules[0].nopasswd);
    }
}
