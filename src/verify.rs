//! Set comparison between what the service delivered and what it should have.

use std::collections::HashSet;
use std::fmt;

use crate::collector::Collected;
use crate::error::{BenchError, BenchResult};

/// Number of offending lines quoted in a mismatch report.
const SAMPLE_LINES: usize = 3;

/// Distinct trimmed lines, plus a count of lines seen more than once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineSet {
    lines: HashSet<Vec<u8>>,
    duplicates: usize,
}

impl LineSet {
    /// Splits a raw response on newlines. Blank lines are ignored.
    pub fn from_bytes(buf: &[u8]) -> Self {
        Self::from_messages(buf.split(|&b| b == b'\n'))
    }

    pub fn from_messages<I, T>(messages: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let mut set = LineSet::default();
        for m in messages {
            let line = trim(m.as_ref());
            if line.is_empty() {
                continue;
            }
            if !set.lines.insert(line.to_vec()) {
                set.duplicates += 1;
            }
        }
        set
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn contains(&self, line: &[u8]) -> bool {
        self.lines.contains(line)
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.lines.iter().map(Vec::as_slice)
    }
}

fn trim(line: &[u8]) -> &[u8] {
    let start = line.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(line.len());
    let end = line.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &line[start..end]
}

/// What went wrong with one collected response.
#[derive(Debug, Clone)]
pub struct Mismatch {
    pub context: String,
    pub expected: usize,
    pub received: usize,
    pub missing: usize,
    pub unexpected: usize,
    pub duplicates: usize,
    pub timed_out: bool,
    pub missing_sample: Vec<String>,
    pub unexpected_sample: Vec<String>,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected {} lines, received {} ({} missing, {} unexpected, {} duplicated)",
            self.context, self.expected, self.received, self.missing, self.unexpected, self.duplicates
        )?;
        if self.timed_out {
            f.write_str(", collection timed out")?;
        }
        if !self.missing_sample.is_empty() {
            write!(f, "; missing e.g. {:?}", self.missing_sample)?;
        }
        if !self.unexpected_sample.is_empty() {
            write!(f, "; unexpected e.g. {:?}", self.unexpected_sample)?;
        }
        Ok(())
    }
}

/// Fails unless `got` holds exactly the lines of `expected`, each once.
pub fn equal(expected: &LineSet, got: &Collected, context: &str) -> BenchResult<()> {
    let received = &got.lines;
    let missing: Vec<&[u8]> = expected.iter().filter(|l| !received.contains(l)).collect();
    let unexpected: Vec<&[u8]> = received.iter().filter(|l| !expected.contains(l)).collect();
    if missing.is_empty() && unexpected.is_empty() && received.duplicates() == 0 {
        return Ok(());
    }
    Err(mismatch(context, expected, got, &missing, &unexpected))
}

/// Fails if any line under `key_root` still reports a live value. Expired
/// entries come back as `key!value` and are accepted; anything else under
/// the root, a `key=value` line included, is not.
pub fn expired(key_root: &[u8], got: &Collected, context: &str) -> BenchResult<()> {
    let live: Vec<&[u8]> = got
        .lines
        .iter()
        .filter(|l| l.starts_with(key_root) && !is_expired_marker(&l[key_root.len()..]))
        .collect();
    if live.is_empty() {
        return Ok(());
    }
    Err(mismatch(context, &LineSet::default(), got, &[], &live))
}

// The separator after the key is the first `=` or `!`.
fn is_expired_marker(rest: &[u8]) -> bool {
    rest.iter().find(|&&b| b == b'=' || b == b'!') == Some(&b'!')
}

fn mismatch(context: &str, expected: &LineSet, got: &Collected, missing: &[&[u8]], unexpected: &[&[u8]]) -> BenchError {
    let sample = |lines: &[&[u8]]| -> Vec<String> {
        lines
            .iter()
            .take(SAMPLE_LINES)
            .map(|l| String::from_utf8_lossy(l).into_owned())
            .collect()
    };
    BenchError::Verification(Box::new(Mismatch {
        context: context.to_string(),
        expected: expected.len(),
        received: got.lines.len(),
        missing: missing.len(),
        unexpected: unexpected.len(),
        duplicates: got.lines.duplicates(),
        timed_out: got.timed_out,
        missing_sample: sample(missing),
        unexpected_sample: sample(unexpected),
    }))
}
