//! Sequence comparators.

use crate::exchange::Exchange;
use serde_json::Value;
use std::cmp::Ordering;

/// Derives ordering information from exchanges.
///
/// `predecessor`/`successor` describe immediate adjacency in the
/// sequence, which is what lets the stream resequencer emit without
/// waiting when no element is missing in between.
pub trait SequenceComparator: Send + Sync {
    /// Returns true if a sequence position can be derived at all.
    fn is_valid(&self, exchange: &Exchange) -> bool;

    /// Orders two valid exchanges by sequence position.
    fn compare(&self, a: &Exchange, b: &Exchange) -> Ordering;

    /// Returns true if `before` sits immediately before `after`.
    fn predecessor(&self, before: &Exchange, after: &Exchange) -> bool;

    /// Returns true if `after` sits immediately after `before`.
    fn successor(&self, after: &Exchange, before: &Exchange) -> bool;

    /// The derived sequence key, for bookkeeping and events.
    fn key_of(&self, exchange: &Exchange) -> Option<Value> {
        let _ = exchange;
        None
    }
}

/// Orders exchanges by an integer sequence number in a named header.
#[derive(Debug, Clone)]
pub struct HeaderSequenceComparator {
    header: String,
}

impl HeaderSequenceComparator {
    /// Creates a comparator reading the given header.
    #[must_use]
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }

    fn sequence_number(&self, exchange: &Exchange) -> Option<i64> {
        exchange.input().header(&self.header).and_then(Value::as_i64)
    }
}

impl SequenceComparator for HeaderSequenceComparator {
    fn is_valid(&self, exchange: &Exchange) -> bool {
        self.sequence_number(exchange).is_some()
    }

    fn compare(&self, a: &Exchange, b: &Exchange) -> Ordering {
        let a = self.sequence_number(a).unwrap_or(i64::MIN);
        let b = self.sequence_number(b).unwrap_or(i64::MIN);
        a.cmp(&b)
    }

    fn predecessor(&self, before: &Exchange, after: &Exchange) -> bool {
        match (self.sequence_number(before), self.sequence_number(after)) {
            (Some(before), Some(after)) => before.checked_add(1) == Some(after),
            _ => false,
        }
    }

    fn successor(&self, after: &Exchange, before: &Exchange) -> bool {
        self.predecessor(before, after)
    }

    fn key_of(&self, exchange: &Exchange) -> Option<Value> {
        self.sequence_number(exchange).map(Value::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn numbered(seq: i64) -> Exchange {
        let mut exchange = Exchange::one_way(json!("payload"));
        exchange
            .input_mut()
            .expect("mutable")
            .set_header("seq", json!(seq));
        exchange
    }

    #[test]
    fn test_validity() {
        let comparator = HeaderSequenceComparator::new("seq");
        assert!(comparator.is_valid(&numbered(1)));
        assert!(!comparator.is_valid(&Exchange::one_way(json!("no header"))));
    }

    #[test]
    fn test_non_numeric_header_is_invalid() {
        let comparator = HeaderSequenceComparator::new("seq");
        let mut exchange = Exchange::one_way(json!(1));
        exchange
            .input_mut()
            .expect("mutable")
            .set_header("seq", json!("three"));
        assert!(!comparator.is_valid(&exchange));
    }

    #[test]
    fn test_ordering() {
        let comparator = HeaderSequenceComparator::new("seq");
        assert_eq!(comparator.compare(&numbered(1), &numbered(2)), Ordering::Less);
        assert_eq!(comparator.compare(&numbered(2), &numbered(2)), Ordering::Equal);
        assert_eq!(
            comparator.compare(&numbered(3), &numbered(2)),
            Ordering::Greater
        );
    }

    #[test]
    fn test_adjacency() {
        let comparator = HeaderSequenceComparator::new("seq");
        assert!(comparator.predecessor(&numbered(1), &numbered(2)));
        assert!(!comparator.predecessor(&numbered(1), &numbered(3)));
        assert!(comparator.successor(&numbered(2), &numbered(1)));
        assert!(!comparator.successor(&numbered(1), &numbered(2)));
    }

    #[test]
    fn test_adjacency_at_numeric_limit_does_not_wrap() {
        let comparator = HeaderSequenceComparator::new("seq");
        assert!(!comparator.predecessor(&numbered(i64::MAX), &numbered(i64::MIN)));
    }

    #[test]
    fn test_key_extraction() {
        let comparator = HeaderSequenceComparator::new("seq");
        assert_eq!(comparator.key_of(&numbered(7)), Some(json!(7)));
        assert_eq!(comparator.key_of(&Exchange::one_way(json!(1))), None);
    }
}
