// Queue entry file contents: newline-terminated fields, one per line.
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::core::error::{Error, ErrorKind};
use crate::core::key::{Domain, Operation};

/// Decoded contents of one queue file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueueEntry {
    /// Realm-stripped, escaped principal name.
    pub account: String,
    pub domain: Domain,
    pub operation: Operation,
    /// Present only for password changes.
    pub password: Option<String>,
}

impl QueueEntry {
    /// Every field must fit on one line of the entry file.
    pub fn check_fields(&self) -> Result<(), Error> {
        let fields = [("account", Some(self.account.as_str())), ("password", self.password.as_deref())];
        for (field, value) in fields {
            if value.is_some_and(|value| value.contains('\n')) {
                return Err(Error::new(ErrorKind::Parse)
                    .with_message(format!("{field} contains a newline and cannot be queued")));
            }
        }
        Ok(())
    }

    /// Field order is account, domain, operation, then the optional password.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::new();
        for field in [
            Some(self.account.as_str()),
            Some(self.domain.as_str()),
            Some(self.operation.as_str()),
            self.password.as_deref(),
        ]
        .into_iter()
        .flatten()
        {
            out.push_str(field);
            out.push('\n');
        }
        out.into_bytes()
    }

    pub fn read(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)
            .map_err(|err| Error::system("cannot open queue file", path, err))?;
        Self::decode(BufReader::new(file), path)
    }

    pub fn decode(mut reader: impl BufRead, path: &Path) -> Result<Self, Error> {
        let account = read_line(&mut reader, path, "account")?;
        let domain = read_line(&mut reader, path, "domain")?
            .parse::<Domain>()
            .map_err(|err| err.with_path(path))?;
        let operation = read_line(&mut reader, path, "operation")?
            .parse::<Operation>()
            .map_err(|err| err.with_path(path))?;
        let password = match operation {
            Operation::Password => Some(read_line(&mut reader, path, "password")?),
            Operation::Enable | Operation::Disable => None,
        };
        let trailing = reader
            .fill_buf()
            .map_err(|err| Error::system("cannot read from queue file", path, err))?;
        if !trailing.is_empty() {
            return Err(Error::new(ErrorKind::Parse)
                .with_message("unexpected data after last line of queue file")
                .with_path(path));
        }
        Ok(Self {
            account,
            domain,
            operation,
            password,
        })
    }
}

/// One complete line without its terminator; a missing or unterminated line
/// is a parse error.
fn read_line(reader: &mut impl BufRead, path: &Path, field: &str) -> Result<String, Error> {
    let mut buf = Vec::new();
    let read = reader
        .read_until(b'\n', &mut buf)
        .map_err(|err| Error::system("cannot read from queue file", path, err))?;
    if read == 0 {
        return Err(Error::new(ErrorKind::Parse)
            .with_message(format!("missing {field} line in queue file"))
            .with_path(path));
    }
    if buf.pop() != Some(b'\n') {
        return Err(Error::new(ErrorKind::Parse)
            .with_message(format!("unterminated {field} line in queue file"))
            .with_path(path));
    }
    String::from_utf8(buf).map_err(|err| {
        Error::new(ErrorKind::Parse)
            .with_message(format!("{field} line in queue file is not UTF-8"))
            .with_path(path)
            .with_source(err)
    })
}

#[cfg(test)]
mod tests {
    use super::QueueEntry;
    use crate::core::error::ErrorKind;
    use crate::core::key::{Domain, Operation};
    use std::path::Path;

    fn decode(bytes: &[u8]) -> Result<QueueEntry, crate::core::error::Error> {
        QueueEntry::decode(bytes, Path::new("q"))
    }

    #[test]
    fn password_entry_has_four_lines() {
        let entry = QueueEntry {
            account: "test".to_string(),
            domain: Domain::Ad,
            operation: Operation::Password,
            password: Some("foobar".to_string()),
        };
        assert_eq!(entry.encode(), b"test\nad\npassword\nfoobar\n");
        assert_eq!(decode(b"test\nad\npassword\nfoobar\n").expect("decode"), entry);
    }

    #[test]
    fn status_entry_stops_after_operation() {
        let entry = decode(b"host/web\nad\ndisable\n").expect("decode");
        assert_eq!(entry.account, "host/web");
        assert_eq!(entry.operation, Operation::Disable);
        assert_eq!(entry.password, None);
    }

    #[test]
    fn missing_or_unterminated_lines_are_rejected() {
        for bytes in [
            &b""[..],
            b"test\n",
            b"test\nad",
            b"test\nad\nenable",
            b"test\nad\npassword\n",
            b"test\nad\npassword\nfoobar",
        ] {
            let err = decode(bytes).expect_err("parse error");
            assert_eq!(err.kind(), ErrorKind::Parse);
            assert_eq!(err.path(), Some(Path::new("q")));
        }
    }

    #[test]
    fn trailing_lines_are_rejected() {
        for bytes in [&b"test\nad\npassword\nfirst\nsecond\n"[..], b"test\nad\nenable\nextra"] {
            let err = decode(bytes).expect_err("trailing data");
            assert_eq!(err.kind(), ErrorKind::Parse);
        }
    }

    #[test]
    fn multi_line_fields_cannot_be_stored() {
        let mut entry = QueueEntry {
            account: "test".to_string(),
            domain: Domain::Ad,
            operation: Operation::Password,
            password: Some("first\nsecond".to_string()),
        };
        assert_eq!(entry.check_fields().expect_err("password").kind(), ErrorKind::Parse);

        entry.password = Some("first second".to_string());
        entry.check_fields().expect("single line");
        entry.account = "te\nst".to_string();
        assert_eq!(entry.check_fields().expect_err("account").kind(), ErrorKind::Parse);
    }

    #[test]
    fn unknown_domain_and_operation_are_rejected() {
        let err = decode(b"test\nkaserver\nenable\n").expect_err("domain");
        assert_eq!(err.kind(), ErrorKind::Parse);
        let err = decode(b"test\nad\npurge\n").expect_err("operation");
        assert_eq!(err.kind(), ErrorKind::Parse);
    }
}
