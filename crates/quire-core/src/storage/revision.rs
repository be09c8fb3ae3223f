//! Document revisions
//!
//! A revision is `"{generation}-{hash}"`. The generation counts writes to a
//! document; the hash makes revisions produced independently on two replicas
//! distinct even when their generations match. Ordering by
//! `(generation, hash)` gives every replica the same winner for a conflict.

use std::cmp::Ordering;
use std::fmt;

/// Maximum number of ancestor revisions kept per document
pub const REVS_LIMIT: usize = 1000;

/// A parsed revision token
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision {
    generation: u64,
    hash: String,
}

impl Revision {
    /// First revision of a new document
    pub fn first() -> Self {
        Self::with_generation(1)
    }

    fn with_generation(generation: u64) -> Self {
        Self {
            generation,
            hash: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    /// Revision following this one
    pub fn next(&self) -> Self {
        Self::with_generation(self.generation + 1)
    }

    /// Parse a revision string; `None` when malformed
    pub fn parse(s: &str) -> Option<Self> {
        let (generation, hash) = s.split_once('-')?;
        let generation = generation.parse().ok()?;
        if hash.is_empty() {
            return None;
        }
        Some(Self {
            generation,
            hash: hash.to_string(),
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> Ordering {
        self.generation
            .cmp(&other.generation)
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.hash)
    }
}

/// Successor of a stored revision string
///
/// Malformed revisions (e.g. imported from elsewhere) restart at generation 1.
pub fn next_after(rev: &str) -> Revision {
    Revision::parse(rev)
        .map(|r| r.next())
        .unwrap_or_else(Revision::first)
}

/// Append `rev` to an ancestor list, keeping at most [`REVS_LIMIT`] entries
pub fn extend_history(mut history: Vec<String>, rev: String) -> Vec<String> {
    history.push(rev);
    if history.len() > REVS_LIMIT {
        let excess = history.len() - REVS_LIMIT;
        history.drain(..excess);
    }
    history
}

/// Compare two revision strings, treating malformed ones as oldest
pub fn compare(a: &str, b: &str) -> Ordering {
    match (Revision::parse(a), Revision::parse(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_and_next() {
        let first = Revision::first();
        assert_eq!(first.generation(), 1);

        let second = first.next();
        assert_eq!(second.generation(), 2);
        assert!(second > first);
    }

    #[test]
    fn test_parse_roundtrip() {
        let rev = Revision::first().next();
        let parsed = Revision::parse(&rev.to_string()).unwrap();
        assert_eq!(parsed, rev);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Revision::parse("nope").is_none());
        assert!(Revision::parse("x-abc").is_none());
        assert!(Revision::parse("3-").is_none());
    }

    #[test]
    fn test_same_generation_orders_by_hash() {
        assert_eq!(compare("2-aaa", "2-bbb"), Ordering::Less);
        assert_eq!(compare("3-aaa", "2-bbb"), Ordering::Greater);
        assert_eq!(compare("garbage", "1-a"), Ordering::Less);
    }

    #[test]
    fn test_next_after_malformed() {
        assert_eq!(next_after("4-abc").generation(), 5);
        assert_eq!(next_after("bogus").generation(), 1);
    }

    #[test]
    fn test_history_is_capped() {
        let history: Vec<String> = (0..REVS_LIMIT).map(|i| format!("{}-x", i + 1)).collect();
        let history = extend_history(history, "newest".to_string());
        assert_eq!(history.len(), REVS_LIMIT);
        assert_eq!(history.last().unwrap(), "newest");
        assert_eq!(history[0], "2-x");
    }
}
