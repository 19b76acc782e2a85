// Queue key derivation: (account, domain, change class) -> file name prefix.
use std::fmt;
use std::str::FromStr;

use crate::core::error::{Error, ErrorKind};
use crate::core::principal::Principal;

/// Downstream systems a change can be queued for.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Domain {
    Ad,
}

impl Domain {
    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Ad => "ad",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ad" => Ok(Domain::Ad),
            other => Err(Error::new(ErrorKind::Parse)
                .with_message(format!("unknown target system {other:?}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Operation {
    Password,
    Enable,
    Disable,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Password => "password",
            Operation::Enable => "enable",
            Operation::Disable => "disable",
        }
    }

    pub fn class(self) -> ChangeClass {
        match self {
            Operation::Password => ChangeClass::Password,
            Operation::Enable | Operation::Disable => ChangeClass::Enable,
        }
    }

    pub fn status(enabled: bool) -> Self {
        if enabled {
            Operation::Enable
        } else {
            Operation::Disable
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "password" => Ok(Operation::Password),
            "enable" => Ok(Operation::Enable),
            "disable" => Ok(Operation::Disable),
            other => {
                Err(Error::new(ErrorKind::Parse).with_message(format!("unknown action {other:?}")))
            }
        }
    }
}

/// Enable and disable share one class so they can never race each other.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ChangeClass {
    Password,
    Enable,
}

impl ChangeClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeClass::Password => "password",
            ChangeClass::Enable => "enable",
        }
    }
}

/// `user-domain-class-`, used both as the entry name prefix and for conflict scans.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct QueueKey {
    prefix: String,
}

impl QueueKey {
    pub fn derive(principal: &Principal, domain: Domain, operation: Operation) -> Self {
        let user = normalize_user(principal);
        let prefix = format!("{user}-{domain}-{}-", operation.class().as_str());
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn matches(&self, file_name: &str) -> bool {
        file_name.starts_with(&self.prefix)
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefix)
    }
}

/// Realm-stripped display name with `/` made file-name safe.
pub fn normalize_user(principal: &Principal) -> String {
    principal.name_without_realm().replace('/', ".")
}

/// Pieces of `<prefix><YYYYMMDD>T<HHMMSS>Z-<NN>`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EntryName<'a> {
    pub prefix: &'a str,
    pub timestamp: &'a str,
    pub sequence: u8,
}

/// Splits a queue entry file name, or returns `None` when it is not one.
pub fn split_entry_name(name: &str) -> Option<EntryName<'_>> {
    let (rest, sequence) = name.rsplit_once('-')?;
    if sequence.len() != 2 || !sequence.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let sequence = sequence.parse().ok()?;
    if rest.len() < TIMESTAMP_LEN + 1 || !rest.is_char_boundary(rest.len() - TIMESTAMP_LEN) {
        return None;
    }
    let (prefix, timestamp) = rest.split_at(rest.len() - TIMESTAMP_LEN);
    if !is_timestamp(timestamp) || !prefix.ends_with('-') {
        return None;
    }
    // user-domain-class-
    let mut parts = prefix[..prefix.len() - 1].rsplitn(3, '-');
    let class = parts.next()?;
    let domain = parts.next()?;
    let user = parts.next()?;
    if user.is_empty() || domain.parse::<Domain>().is_err() {
        return None;
    }
    if class != ChangeClass::Password.as_str() && class != ChangeClass::Enable.as_str() {
        return None;
    }
    Some(EntryName {
        prefix,
        timestamp,
        sequence,
    })
}

const TIMESTAMP_LEN: usize = "YYYYMMDDTHHMMSSZ".len();

fn is_timestamp(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.len() == TIMESTAMP_LEN
        && bytes[..8].iter().all(u8::is_ascii_digit)
        && bytes[8] == b'T'
        && bytes[9..15].iter().all(u8::is_ascii_digit)
        && bytes[15] == b'Z'
}
