// Entry name allocation: UTC second-resolution timestamp plus a bounded sequence.
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::core::error::{Error, ErrorKind};
use crate::core::key::QueueKey;

/// Entries allowed per key within one timestamp second (`00` through `99`).
pub const MAX_SEQUENCE: u8 = 100;

const TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year][month][day]T[hour][minute][second]Z");

pub fn timestamp(now: OffsetDateTime) -> Result<String, Error> {
    now.to_offset(UtcOffset::UTC)
        .format(TIMESTAMP_FORMAT)
        .map_err(|err| {
            Error::new(ErrorKind::System)
                .with_message("cannot format queue timestamp")
                .with_source(err)
        })
}

pub fn entry_name(key: &QueueKey, timestamp: &str, sequence: u8) -> String {
    format!("{}{timestamp}-{sequence:02}", key.prefix())
}

/// Candidate names in allocation order; the first one that can be created wins.
pub fn candidate_names<'a>(key: &'a QueueKey, timestamp: &'a str) -> impl Iterator<Item = String> + 'a {
    (0..MAX_SEQUENCE).map(move |sequence| entry_name(key, timestamp, sequence))
}
