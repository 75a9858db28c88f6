//! Topic names and filters.
//!
//! A topic is split on `/` and empty levels are dropped, so `a//b`, `/a/b` and
//! `a/b/` all name the same topic. In a filter `+` stands for exactly one level
//! and `#` for zero or more. A `#` that is not the last level is tolerated: the
//! rest of the filter is tried against every suffix of the remaining topic.
//!
//! A topic whose first or last level starts with `|` is cluster-wide.

use std::fmt;
use std::str::FromStr;

const CLUSTER_MARK: char = '|';

#[derive(Debug, Eq, PartialEq, Clone, Hash)]
pub enum Level {
    Normal(String),
    SingleWildcard, // +
    MultiWildcard,  // #
}

impl Level {
    #[inline]
    pub fn value(&self) -> Option<&str> {
        match self {
            Level::Normal(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn is_wildcard(&self) -> bool {
        !matches!(self, Level::Normal(_))
    }
}

impl From<&str> for Level {
    fn from(s: &str) -> Self {
        match s {
            "+" => Level::SingleWildcard,
            "#" => Level::MultiWildcard,
            _ => Level::Normal(s.to_owned()),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Normal(s) => f.write_str(s),
            Level::SingleWildcard => f.write_str("+"),
            Level::MultiWildcard => f.write_str("#"),
        }
    }
}

/// A parsed topic filter (or topic name, which is a filter without wildcards).
#[derive(Debug, Eq, PartialEq, Clone, Hash, Default)]
pub struct Topic(Vec<Level>);

impl Topic {
    #[inline]
    pub fn levels(&self) -> &[Level] {
        &self.0
    }

    #[inline]
    pub fn has_wildcard(&self) -> bool {
        self.0.iter().any(Level::is_wildcard)
    }

    /// Does this filter match the concrete `topic`?
    #[inline]
    pub fn matches_str(&self, topic: &str) -> bool {
        let topic = split(topic).collect::<Vec<_>>();
        match_levels(&self.0, &topic)
    }
}

impl FromStr for Topic {
    type Err = std::convert::Infallible;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Topic(split(s).map(Level::from).collect()))
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Topic(split(s).map(Level::from).collect())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, l) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{l}")?;
        }
        Ok(())
    }
}

#[inline]
fn split(s: &str) -> impl DoubleEndedIterator<Item = &str> {
    s.split('/').filter(|l| !l.is_empty())
}

fn match_levels(filter: &[Level], topic: &[&str]) -> bool {
    match filter.split_first() {
        None => topic.is_empty(),
        Some((Level::MultiWildcard, rest)) => {
            rest.is_empty() || (0..=topic.len()).any(|skip| match_levels(rest, &topic[skip..]))
        }
        Some((Level::SingleWildcard, rest)) => !topic.is_empty() && match_levels(rest, &topic[1..]),
        Some((Level::Normal(l), rest)) => match topic.split_first() {
            Some((t, topic)) => *t == l.as_str() && match_levels(rest, topic),
            None => false,
        },
    }
}

/// `pattern` matches `topic`.
#[inline]
pub fn matches(pattern: &str, topic: &str) -> bool {
    Topic::from(pattern).matches_str(topic)
}

/// First or last level starts with `|`.
#[inline]
pub fn is_cluster_wide(topic: &str) -> bool {
    let mut levels = split(topic);
    let first = levels.next();
    let last = levels.next_back().or(first);
    [first, last].into_iter().flatten().any(|l| l.starts_with(CLUSTER_MARK))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact() {
        assert!(matches("a/b", "a/b"));
        assert!(!matches("a/b", "a/b/c"));
        assert!(!matches("a/b", "a"));
        assert!(matches("a//b", "/a/b/"));
        assert!(matches("", ""));
        assert!(!matches("a", ""));
    }

    #[test]
    fn test_single_wildcard() {
        assert!(matches("a/+/c", "a/x/c"));
        assert!(!matches("a/+/c", "a/x/y/c"));
        assert!(!matches("a/+/c", "a/c"));
        assert!(matches("+", "a"));
        assert!(!matches("+", ""));
        assert!(matches("+/+", "a/b"));
    }

    #[test]
    fn test_multi_wildcard() {
        assert!(matches("a/#", "a"));
        assert!(matches("a/#", "a/b"));
        assert!(matches("a/#", "a/b/c"));
        assert!(!matches("a/#", "b"));
        assert!(matches("#", ""));
        assert!(matches("#", "x/y"));
        assert!(matches("a/+/#", "a/b"));
        assert!(!matches("a/+/#", "a"));
    }

    #[test]
    fn test_non_final_multi_wildcard() {
        assert!(matches("a/#/c", "a/c"));
        assert!(matches("a/#/c", "a/b/c"));
        assert!(matches("a/#/c", "a/b/x/c"));
        assert!(!matches("a/#/c", "a/b/x"));
        assert!(matches("#/+/z", "q/r/y/z"));
        assert!(!matches("#/+/z", "z"));
    }

    #[test]
    fn test_cluster_wide() {
        assert!(is_cluster_wide("|g/a/b"));
        assert!(is_cluster_wide("a/b/|g"));
        assert!(is_cluster_wide("/|g/"));
        assert!(is_cluster_wide("$SYS/brokers/n1/|announce"));
        assert!(!is_cluster_wide("a/|b/c"));
        assert!(!is_cluster_wide("a/b"));
        assert!(!is_cluster_wide(""));
    }

    #[test]
    fn test_display() {
        let t = Topic::from("/a//+/#");
        assert_eq!(t.to_string(), "a/+/#");
        assert!(t.has_wildcard());
        assert!(!Topic::from("a/b").has_wildcard());
        assert_eq!(t.levels()[0].value(), Some("a"));
    }
}
