//! Typed, sealed wire codec for the directory responder protocol.
//! Header fields are four native-endian 32-bit words (matches the
//! local host, per the spec's literal description); TLV attribute
//! `type`/`length` fields are big-endian. Keeping the two codecs as
//! distinct types makes the byte-order split a compile-time fact
//! rather than a runtime parameter.

use crate::common::Error;

pub const HEADER_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub total_length: u32,
    pub command_id: u32,
    pub reserved1: u32,
    pub reserved2: u32,
}

impl Header {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.total_length.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.command_id.to_ne_bytes());
        buf[8..12].copy_from_slice(&self.reserved1.to_ne_bytes());
        buf[12..16].copy_from_slice(&self.reserved2.to_ne_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Header, Error> {
        if buf.len() < HEADER_LEN {
            return Err(Error::Transport("short header".into()));
        }
        Ok(Header {
            total_length: u32::from_ne_bytes(buf[0..4].try_into().unwrap()),
            command_id: u32::from_ne_bytes(buf[4..8].try_into().unwrap()),
            reserved1: u32::from_ne_bytes(buf[8..12].try_into().unwrap()),
            reserved2: u32::from_ne_bytes(buf[12..16].try_into().unwrap()),
        })
    }
}

/// The attribute alphabet named in §4.3/§6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    User,
    Uid,
    Groups,
    Hostname,
    Command,
    RunAsUser,
    RunAsGroup,
    Option,
    Unknown(u32),
}

impl AttrType {
    fn to_u32(self) -> u32 {
        match self {
            AttrType::User => 1,
            AttrType::Uid => 2,
            AttrType::Groups => 3,
            AttrType::Hostname => 4,
            AttrType::Command => 5,
            AttrType::RunAsUser => 6,
            AttrType::RunAsGroup => 7,
            AttrType::Option => 8,
            AttrType::Unknown(v) => v,
        }
    }

    fn from_u32(v: u32) -> AttrType {
        match v {
            1 => AttrType::User,
            2 => AttrType::Uid,
            3 => AttrType::Groups,
            4 => AttrType::Hostname,
            5 => AttrType::Command,
            6 => AttrType::RunAsUser,
            7 => AttrType::RunAsGroup,
            8 => AttrType::Option,
            other => AttrType::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub attr_type: AttrType,
    pub value: Vec<u8>,
}

impl Attr {
    pub fn new(attr_type: AttrType, value: impl Into<Vec<u8>>) -> Attr {
        Attr {
            attr_type,
            value: value.into(),
        }
    }

    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.value.len());
        out.extend_from_slice(&self.attr_type.to_u32().to_be_bytes());
        out.extend_from_slice(&(self.value.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.value);
        out
    }
}

/// Encodes a full request body: a big-endian attribute count followed
/// by the attribute TLVs.
pub fn encode_body(attrs: &[Attr]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(attrs.len() as u32).to_be_bytes());
    for a in attrs {
        out.extend_from_slice(&a.encode());
    }
    out
}

/// Walks a body left-to-right, yielding attributes one at a time.
/// Unknown TLV types are yielded too (as `AttrType::Unknown`) so
/// callers can skip them explicitly, matching "unknown TLV types are
/// skipped" (§4.3) without the codec silently dropping bytes.
pub struct AttrReader<'a> {
    buf: &'a [u8],
    remaining: u32,
}

impl<'a> AttrReader<'a> {
    pub fn new(body: &'a [u8]) -> Result<AttrReader<'a>, Error> {
        if body.len() < 4 {
            return Err(Error::Transport("short body".into()));
        }
        let count = u32::from_be_bytes(body[0..4].try_into().unwrap());
        Ok(AttrReader {
            buf: &body[4..],
            remaining: count,
        })
    }
}

impl<'a> Iterator for AttrReader<'a> {
    type Item = Result<Attr, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        if self.buf.len() < 8 {
            return Some(Err(Error::Transport("truncated attribute header".into())));
        }
        let attr_type = u32::from_be_bytes(self.buf[0..4].try_into().unwrap());
        let len = u32::from_be_bytes(self.buf[4..8].try_into().unwrap()) as usize;
        if self.buf.len() < 8 + len {
            return Some(Err(Error::Transport("truncated attribute value".into())));
        }
        let value = self.buf[8..8 + len].to_vec();
        self.buf = &self.buf[8 + len..];
        self.remaining -= 1;
        Some(Ok(Attr::new(AttrType::from_u32(attr_type), value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let h = Header {
            total_length: 100,
            command_id: 7,
            reserved1: 0,
            reserved2: 0,
        };
        let bytes = h.encode();
        assert_eq!(Header::decode(&bytes).unwrap(), h);
    }

    #[test]
    fn attr_body_round_trips() {
        let attrs = vec![
            Attr::new(AttrType::User, "alice".as_bytes().to_vec()),
            Attr::new(AttrType::Hostname, "db01".as_bytes().to_vec()),
        ];
        let body = encode_body(&attrs);
        let read: Vec<Attr> = AttrReader::new(&body).unwrap().map(|a| a.unwrap()).collect();
        assert_eq!(read, attrs);
    }

    #[test]
    fn unknown_type_preserved_for_caller_to_skip() {
        let attrs = vec![Attr::new(AttrType::Unknown(99), vec![1, 2, 3])];
        let body = encode_body(&attrs);
        let read: Vec<Attr> = AttrReader::new(&body).unwrap().map(|a| a.unwrap()).collect();
        assert_eq!(read[0].attr_type, AttrType::Unknown(99));
    }

    #[test]
    fn truncated_body_errors_instead_of_panicking() {
        let body = vec![0, 0, 0, 1, 0, 0, 0, 5]; // declares 1 attr, truncated header
        let mut reader = AttrReader::new(&body).unwrap();
        assert!(reader.next().unwrap().is_err());
    }
}
