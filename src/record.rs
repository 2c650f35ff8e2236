use std::fmt;
use std::str::FromStr;

use crate::errors::{Result, WalError};

/// The operation a single log line describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKind {
    Begin,
    Read(String),
    Write(String),
    Commit,
    Rollback,
}

impl RecordKind {
    /// Returns `true` for COMMIT and ROLLBACK.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordKind::Commit | RecordKind::Rollback)
    }
}

/// One line of the write-ahead log.
///
/// Rendered as `[<id>] BEGIN`, `[<id>] READ `<key>``, `[<id>] WRITE `<key>``,
/// `[<id>] COMMIT` or `[<id>] ROLLBACK`. The rendered form never carries the
/// trailing newline; storages add it when appending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub txn_id: u64,
    pub kind: RecordKind,
}

impl LogRecord {
    pub fn begin(txn_id: u64) -> Self {
        Self {
            txn_id,
            kind: RecordKind::Begin,
        }
    }

    pub fn read(txn_id: u64, key: &str) -> Self {
        Self {
            txn_id,
            kind: RecordKind::Read(key.to_string()),
        }
    }

    pub fn write(txn_id: u64, key: &str) -> Self {
        Self {
            txn_id,
            kind: RecordKind::Write(key.to_string()),
        }
    }

    pub fn commit(txn_id: u64) -> Self {
        Self {
            txn_id,
            kind: RecordKind::Commit,
        }
    }

    pub fn rollback(txn_id: u64) -> Self {
        Self {
            txn_id,
            kind: RecordKind::Rollback,
        }
    }

    /// Parses every non-empty line of `content`.
    pub fn parse_all(content: &str) -> Result<Vec<LogRecord>> {
        content
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::parse)
            .collect()
    }
}

/// Checks that `key` fits on a single log line.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.contains('\n') || key.contains('\r') {
        return Err(WalError::InvalidKey(key.to_string()));
    }
    Ok(())
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RecordKind::Begin => write!(f, "[{}] BEGIN", self.txn_id),
            RecordKind::Read(key) => write!(f, "[{}] READ `{}`", self.txn_id, key),
            RecordKind::Write(key) => write!(f, "[{}] WRITE `{}`", self.txn_id, key),
            RecordKind::Commit => write!(f, "[{}] COMMIT", self.txn_id),
            RecordKind::Rollback => write!(f, "[{}] ROLLBACK", self.txn_id),
        }
    }
}

impl FromStr for LogRecord {
    type Err = WalError;

    fn from_str(line: &str) -> Result<Self> {
        let malformed = || WalError::MalformedRecord(line.to_string());

        let rest = line.strip_prefix('[').ok_or_else(malformed)?;
        let (id, rest) = rest.split_once("] ").ok_or_else(malformed)?;
        let txn_id: u64 = id.parse().map_err(|_| malformed())?;

        let kind = match rest {
            "BEGIN" => RecordKind::Begin,
            "COMMIT" => RecordKind::Commit,
            "ROLLBACK" => RecordKind::Rollback,
            _ => {
                let (op, quoted) = rest.split_once(' ').ok_or_else(malformed)?;
                // Keys may contain backticks themselves, only the outer pair delimits.
                let key = quoted
                    .strip_prefix('`')
                    .and_then(|k| k.strip_suffix('`'))
                    .ok_or_else(malformed)?;
                match op {
                    "READ" => RecordKind::Read(key.to_string()),
                    "WRITE" => RecordKind::Write(key.to_string()),
                    _ => return Err(malformed()),
                }
            }
        };

        Ok(Self { txn_id, kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_line_format() {
        assert_eq!(LogRecord::begin(1).to_string(), "[1] BEGIN");
        assert_eq!(LogRecord::read(2, "foo").to_string(), "[2] READ `foo`");
        assert_eq!(LogRecord::write(3, "bar").to_string(), "[3] WRITE `bar`");
        assert_eq!(LogRecord::commit(4).to_string(), "[4] COMMIT");
        assert_eq!(LogRecord::rollback(15).to_string(), "[15] ROLLBACK");
    }

    #[test]
    fn parses_keys_with_spaces_and_backticks() {
        let record: LogRecord = "[7] WRITE `a `b` c`".parse().unwrap();
        assert_eq!(record, LogRecord::write(7, "a `b` c"));

        let record: LogRecord = "[8] READ ``".parse().unwrap();
        assert_eq!(record, LogRecord::read(8, ""));
    }

    #[test]
    fn rejects_malformed_lines() {
        for line in [
            "BEGIN",
            "[x] BEGIN",
            "[1] START",
            "[1] READ foo",
            "[1] DELETE `foo`",
            "[1]BEGIN",
        ] {
            assert!(
                matches!(line.parse::<LogRecord>(), Err(WalError::MalformedRecord(_))),
                "{line} should not parse"
            );
        }
    }

    #[test]
    fn parse_all_skips_blank_lines() {
        let records = LogRecord::parse_all("[1] BEGIN\n\n[1] COMMIT\n").unwrap();
        assert_eq!(records, vec![LogRecord::begin(1), LogRecord::commit(1)]);
        assert!(records[1].kind.is_terminal());
    }

    #[test]
    fn keys_with_line_breaks_are_invalid() {
        assert!(validate_key("plain key").is_ok());
        assert!(matches!(validate_key("a\nb"), Err(WalError::InvalidKey(_))));
    }
}
