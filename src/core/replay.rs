// Replay of queued entries: deliver, then delete only on success.
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::core::delivery::Delivery;
use crate::core::entry::QueueEntry;
use crate::core::error::Error;
use crate::core::principal::Principal;
use crate::core::queue::Queue;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReplayOutcome {
    pub account: Principal,
    pub entry: QueueEntry,
}

/// Replays one queue file. On any error the file is left exactly as it was.
pub fn replay(
    path: &Path,
    default_realm: Option<&str>,
    delivery: &dyn Delivery,
) -> Result<ReplayOutcome, Error> {
    let entry = QueueEntry::read(path)?;
    let account = Principal::parse(&entry.account, default_realm).map_err(|err| err.with_path(path))?;

    delivery.deliver(&account, entry.operation, entry.password.as_deref())?;

    fs::remove_file(path).map_err(|err| Error::system("unable to unlink queue file", path, err))?;
    info!(file = %path.display(), %account, operation = %entry.operation, "replayed queued change");
    Ok(ReplayOutcome { account, entry })
}

#[derive(Debug, Default)]
pub struct DrainReport {
    pub replayed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, Error)>,
    /// Entries held back because an older entry for the same key failed.
    pub skipped: Vec<PathBuf>,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Replays every pending entry oldest-first per key. Once an entry fails,
/// later entries for the same key wait for the next drain.
pub fn drain(
    queue: &Queue,
    default_realm: Option<&str>,
    delivery: &dyn Delivery,
) -> Result<DrainReport, Error> {
    let mut report = DrainReport::default();
    let mut blocked: HashSet<String> = HashSet::new();
    for pending in queue.pending()? {
        if blocked.contains(&pending.key) {
            report.skipped.push(pending.path);
            continue;
        }
        match replay(&pending.path, default_realm, delivery) {
            Ok(_) => report.replayed.push(pending.path),
            Err(err) => {
                warn!(file = %pending.path.display(), error = %err, "queued change failed");
                blocked.insert(pending.key);
                report.failed.push((pending.path, err));
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::{drain, replay};
    use crate::core::delivery::Delivery;
    use crate::core::error::{Error, ErrorKind};
    use crate::core::key::{Domain, Operation};
    use crate::core::principal::Principal;
    use crate::core::queue::Queue;
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::fs;
    use time::macros::datetime;

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<(String, Operation, Option<String>)>>,
        reject: HashSet<String>,
    }

    impl Delivery for Recorder {
        fn deliver(
            &self,
            account: &Principal,
            operation: Operation,
            password: Option<&str>,
        ) -> Result<(), Error> {
            let account = account.to_string();
            self.calls
                .borrow_mut()
                .push((account.clone(), operation, password.map(str::to_string)));
            if self.reject.contains(&account) {
                return Err(Error::new(ErrorKind::Delivery).with_message("server unavailable"));
            }
            Ok(())
        }
    }

    fn principal(text: &str) -> Principal {
        Principal::parse(text, None).expect("principal")
    }

    fn remaining(queue: &Queue) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(queue.dir())
            .expect("read_dir")
            .map(|entry| entry.expect("entry").file_name().into_string().expect("utf8"))
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn replay_delivers_original_change_and_deletes_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = Queue::new(dir.path());
        let path = queue
            .enqueue_at(
                &principal("test@EXAMPLE.COM"),
                Domain::Ad,
                Operation::Password,
                Some("foobar"),
                datetime!(2024-01-01 00:00:00 UTC),
            )
            .expect("enqueue");

        let delivery = Recorder::default();
        let outcome = replay(&path, Some("EXAMPLE.COM"), &delivery).expect("replay");

        assert_eq!(
            delivery.calls.borrow().as_slice(),
            [(
                "test@EXAMPLE.COM".to_string(),
                Operation::Password,
                Some("foobar".to_string())
            )]
        );
        assert_eq!(outcome.account.to_string(), "test@EXAMPLE.COM");
        assert!(!path.exists());
        assert!(remaining(&queue).is_empty());
    }

    #[test]
    fn failed_delivery_leaves_entry_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = Queue::new(dir.path());
        let path = queue
            .enqueue(&principal("bob@EXAMPLE.COM"), Domain::Ad, Operation::Disable, None)
            .expect("enqueue");
        let before = fs::read(&path).expect("read");

        let delivery = Recorder {
            reject: HashSet::from(["bob@EXAMPLE.COM".to_string()]),
            ..Recorder::default()
        };
        let err = replay(&path, Some("EXAMPLE.COM"), &delivery).expect_err("rejected");

        assert_eq!(err.kind(), ErrorKind::Delivery);
        assert_eq!(fs::read(&path).expect("read"), before);
    }

    #[test]
    fn malformed_entry_is_not_delivered_or_removed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test-ad-password-20240101T000000Z-00");
        for bytes in [&b"test\nad\npassword\nfoobar"[..], b"test\nad\npassword\nfirst\nsecond\n"] {
            fs::write(&path, bytes).expect("write");

            let delivery = Recorder::default();
            let err = replay(&path, None, &delivery).expect_err("parse");

            assert_eq!(err.kind(), ErrorKind::Parse);
            assert!(delivery.calls.borrow().is_empty());
            assert_eq!(fs::read(&path).expect("read"), bytes);
        }
    }

    #[test]
    fn instance_account_is_reparsed_with_default_realm() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = Queue::new(dir.path());
        let path = queue
            .enqueue(&principal("host/web@EXAMPLE.COM"), Domain::Ad, Operation::Enable, None)
            .expect("enqueue");

        let delivery = Recorder::default();
        replay(&path, Some("EXAMPLE.COM"), &delivery).expect("replay");
        assert_eq!(
            delivery.calls.borrow().as_slice(),
            [("host/web@EXAMPLE.COM".to_string(), Operation::Enable, None)]
        );
    }

    #[test]
    fn drain_holds_back_later_entries_for_a_failed_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = Queue::new(dir.path());
        let bob = principal("bob@EXAMPLE.COM");
        let carol = principal("carol@EXAMPLE.COM");
        let first = datetime!(2024-01-01 00:00:00 UTC);
        let second = datetime!(2024-01-01 00:00:01 UTC);
        queue.enqueue_at(&bob, Domain::Ad, Operation::Disable, None, first).expect("enqueue");
        queue.enqueue_at(&bob, Domain::Ad, Operation::Enable, None, second).expect("enqueue");
        queue
            .enqueue_at(&bob, Domain::Ad, Operation::Password, Some("pw"), first)
            .expect("enqueue");
        queue.enqueue_at(&carol, Domain::Ad, Operation::Enable, None, first).expect("enqueue");

        let delivery = Recorder {
            reject: HashSet::from(["bob@EXAMPLE.COM".to_string()]),
            ..Recorder::default()
        };
        let report = drain(&queue, Some("EXAMPLE.COM"), &delivery).expect("drain");

        assert_eq!(report.replayed.len(), 1);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert!(!report.is_clean());
        assert_eq!(
            remaining(&queue),
            [
                "bob-ad-enable-20240101T000000Z-00",
                "bob-ad-enable-20240101T000001Z-00",
                "bob-ad-password-20240101T000000Z-00",
            ]
        );
        let attempted: Vec<Operation> =
            delivery.calls.borrow().iter().map(|(_, op, _)| *op).collect();
        assert_eq!(attempted, [Operation::Disable, Operation::Password, Operation::Enable]);
    }
}
