use std::fmt;
use std::str::FromStr;

macro_rules! newtype_id {
    ($name:ident, $inner:ty) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name($inner);

        impl $name {
            pub const fn new(v: $inner) -> Self {
                Self(v)
            }

            pub fn inner(self) -> $inner {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }
    };
}

newtype_id!(UserId, libc::uid_t);
newtype_id!(GroupId, libc::gid_t);
newtype_id!(ProcessId, libc::pid_t);
newtype_id!(DeviceId, libc::dev_t);

impl UserId {
    pub const ROOT: UserId = UserId(0);
}

impl GroupId {
    pub const ROOT: GroupId = GroupId(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_zero() {
        assert_eq!(UserId::ROOT.inner(), 0);
        assert_eq!(GroupId::ROOT.inner(), 0);
    }

    #[test]
    fn parses_from_str() {
        let uid: UserId = "1000".parse().unwrap();
        assert_eq!(uid.inner(), 1000);
    }
}
