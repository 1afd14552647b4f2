//! Package version ordering.
//!
//! Versions are compared segment-wise: runs of digits compare numerically,
//! runs of letters lexically, and a version with a remaining tail orders
//! after its prefix (`1.0.1 > 1.0`). This is enough to pick the newest of a
//! name's candidates; full constraint algebra is the resolver's problem.

use std::cmp::Ordering;

#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Number(u64),
    Text(&'a str),
}

fn segments(version: &str) -> impl Iterator<Item = Segment<'_>> {
    let bytes = version.as_bytes();
    let mut pos = 0;
    std::iter::from_fn(move || {
        while pos < bytes.len() && !bytes[pos].is_ascii_alphanumeric() {
            pos += 1;
        }
        if pos >= bytes.len() {
            return None;
        }
        let start = pos;
        if bytes[pos].is_ascii_digit() {
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
            let number = version[start..pos].parse().unwrap_or(u64::MAX);
            Some(Segment::Number(number))
        } else {
            while pos < bytes.len() && bytes[pos].is_ascii_alphabetic() {
                pos += 1;
            }
            Some(Segment::Text(&version[start..pos]))
        }
    })
}

/// Total order over version strings.
#[must_use]
pub fn compare(a: &str, b: &str) -> Ordering {
    let mut left = segments(a);
    let mut right = segments(b);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ord = match (l, r) {
                    (Segment::Number(l), Segment::Number(r)) => l.cmp(&r),
                    (Segment::Text(l), Segment::Text(r)) => l.cmp(r),
                    // Numeric releases order after lettered pre-releases.
                    (Segment::Number(_), Segment::Text(_)) => Ordering::Greater,
                    (Segment::Text(_), Segment::Number(_)) => Ordering::Less,
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}
