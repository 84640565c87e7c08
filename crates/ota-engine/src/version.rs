//! Firmware version strings and their ordering.
//!
//! Versions are dotted numeric strings with an optional `v`/`V` prefix, such
//! as `v1.2.0`. Two strings only compare when both carry the prefix or both
//! omit it.

use std::cmp::Ordering;
use std::fmt;

/// Result of comparing two version strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOrdering {
    Less,
    Equal,
    Greater,
    /// Prefix mismatch, or nothing left after the prefix
    Incomparable,
}

impl From<Ordering> for VersionOrdering {
    fn from(ordering: Ordering) -> Self {
        match ordering {
            Ordering::Less => Self::Less,
            Ordering::Equal => Self::Equal,
            Ordering::Greater => Self::Greater,
        }
    }
}

impl fmt::Display for VersionOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Less => "less",
            Self::Equal => "equal",
            Self::Greater => "greater",
            Self::Incomparable => "incomparable",
        };
        f.write_str(s)
    }
}

fn strip_prefix(version: &str) -> (bool, &str) {
    match version.strip_prefix(['v', 'V']) {
        Some(rest) => (true, rest),
        None => (false, version),
    }
}

/// Leading decimal digits of `component`, or 0 when there are none.
fn component_value(component: &str) -> u64 {
    component
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0u64, |acc, digit| {
            acc.saturating_mul(10).saturating_add(u64::from(digit - b'0'))
        })
}

fn components(version: &str) -> Vec<u64> {
    version
        .split('.')
        .filter(|part| !part.is_empty())
        .map(component_value)
        .collect()
}

/// Compare version `a` against version `b`.
///
/// Components are compared numerically from the left; a missing trailing
/// component counts as `0`, so `v1.2` equals `v1.2.0`.
pub fn compare(a: &str, b: &str) -> VersionOrdering {
    let (a_prefixed, a_rest) = strip_prefix(a);
    let (b_prefixed, b_rest) = strip_prefix(b);

    if a_prefixed != b_prefixed || a_rest.is_empty() || b_rest.is_empty() {
        return VersionOrdering::Incomparable;
    }

    let a_parts = components(a_rest);
    let b_parts = components(b_rest);
    let len = a_parts.len().max(b_parts.len());

    for i in 0..len {
        let left = a_parts.get(i).copied().unwrap_or(0);
        let right = b_parts.get(i).copied().unwrap_or(0);
        if left != right {
            return left.cmp(&right).into();
        }
    }

    VersionOrdering::Equal
}

/// Whether `candidate` is strictly newer than `current`.
pub fn is_newer(candidate: &str, current: &str) -> bool {
    compare(candidate, current) == VersionOrdering::Greater
}
