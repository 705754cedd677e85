use std::cmp::Ordering;

use memmem::{Searcher, TwoWaySearcher};

use crate::error::{Error, Result};
use crate::glob::Glob;

/// Collations from RFC 4790 that scripts may name with `:comparator`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparator {
    Octet,
    AsciiCasemap,
    AsciiNumeric,
}

impl Default for Comparator {
    fn default() -> Self {
        Comparator::AsciiCasemap
    }
}

impl Comparator {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "i;octet" => Some(Comparator::Octet),
            "i;ascii-casemap" => Some(Comparator::AsciiCasemap),
            "i;ascii-numeric" => Some(Comparator::AsciiNumeric),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Comparator::Octet => "i;octet",
            Comparator::AsciiCasemap => "i;ascii-casemap",
            Comparator::AsciiNumeric => "i;ascii-numeric",
        }
    }

    /// The `require` string that makes this comparator available.
    pub fn capability(self) -> &'static str {
        match self {
            Comparator::Octet => "comparator-i;octet",
            Comparator::AsciiCasemap => "comparator-i;ascii-casemap",
            Comparator::AsciiNumeric => "comparator-i;ascii-numeric",
        }
    }

    /// RFC 5228 makes these two usable without any `require`.
    pub fn always_available(self) -> bool {
        self != Comparator::AsciiNumeric
    }

    pub fn is(self, actual: &str, key: &str) -> Result<bool> {
        Ok(self.order(actual, key)? == Ordering::Equal)
    }

    pub fn contains(self, actual: &str, key: &str) -> Result<bool> {
        let found = match self {
            Comparator::Octet => substring(actual.as_bytes(), key.as_bytes()),
            Comparator::AsciiCasemap => substring(
                actual.to_ascii_uppercase().as_bytes(),
                key.to_ascii_uppercase().as_bytes(),
            ),
            // Substring matching has no meaning for numbers.
            Comparator::AsciiNumeric => {
                tracing::debug!("i;ascii-numeric does not support :contains");
                false
            }
        };
        Ok(found)
    }

    /// Wildcard match. On success yields the match groups, whole match first.
    pub fn matches(self, actual: &str, pattern: &str) -> Result<Option<Vec<String>>> {
        let casemap = match self {
            Comparator::Octet => false,
            Comparator::AsciiCasemap => true,
            Comparator::AsciiNumeric => {
                tracing::debug!("i;ascii-numeric does not support :matches");
                return Ok(None);
            }
        };
        let glob = Glob::compile(pattern, casemap).map_err(|e| anyhow::anyhow!(e))?;
        Ok(glob.captures(actual))
    }

    pub fn relation(self, op: RelOp, actual: &str, key: &str) -> Result<bool> {
        Ok(op.holds(self.order(actual, key)?))
    }

    /// Reject an operand this comparator cannot order, whether or not
    /// anything is compared against it.
    pub fn check_operand(self, s: &str) -> Result<()> {
        match self {
            Comparator::AsciiNumeric => numeric_value(s).map(|_| ()),
            _ => Ok(()),
        }
    }

    fn order(self, a: &str, b: &str) -> Result<Ordering> {
        match self {
            Comparator::Octet => Ok(a.as_bytes().cmp(b.as_bytes())),
            Comparator::AsciiCasemap => Ok(a
                .bytes()
                .map(|c| c.to_ascii_uppercase())
                .cmp(b.bytes().map(|c| c.to_ascii_uppercase()))),
            Comparator::AsciiNumeric => numeric_order(a, b),
        }
    }
}

fn substring(haystack: &[u8], needle: &[u8]) -> bool {
    TwoWaySearcher::new(needle).search_in(haystack).is_some()
}

/// Digits of the leading number in `s` with leading zeros removed, or `None`
/// for a string that does not start with a digit (positive infinity). A
/// `-` followed by a digit is a negative number, which is an error.
fn numeric_value(s: &str) -> Result<Option<&str>> {
    let bytes = s.as_bytes();
    if bytes.first() == Some(&b'-') && bytes.get(1).map_or(false, u8::is_ascii_digit) {
        return Err(Error::NegativeNumber(s.to_owned()));
    }
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or_else(|| s.len());
    if end == 0 {
        return Ok(None);
    }
    Ok(Some(s[..end].trim_start_matches('0')))
}

fn numeric_order(a: &str, b: &str) -> Result<Ordering> {
    let ord = match (numeric_value(a)?, numeric_value(b)?) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
    };
    Ok(ord)
}

/// Relational operators of RFC 5231.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl RelOp {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "eq" => Some(RelOp::Eq),
            "ne" => Some(RelOp::Ne),
            "gt" => Some(RelOp::Gt),
            "ge" => Some(RelOp::Ge),
            "lt" => Some(RelOp::Lt),
            "le" => Some(RelOp::Le),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RelOp::Eq => "eq",
            RelOp::Ne => "ne",
            RelOp::Gt => "gt",
            RelOp::Ge => "ge",
            RelOp::Lt => "lt",
            RelOp::Le => "le",
        }
    }

    pub fn holds(self, ord: Ordering) -> bool {
        match self {
            RelOp::Eq => ord == Ordering::Equal,
            RelOp::Ne => ord != Ordering::Equal,
            RelOp::Gt => ord == Ordering::Greater,
            RelOp::Ge => ord != Ordering::Less,
            RelOp::Lt => ord == Ordering::Less,
            RelOp::Le => ord != Ordering::Greater,
        }
    }
}
