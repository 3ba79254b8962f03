//! Listener matchers.
//!
//! ```text
//! "success"        → Name(Exact("success"))       events named `success` on the node
//! "*"              → Name(Wildcard)                every event on the node
//! "run.success"    → Path([run, success])          relative to the node's namespace
//! "*.error"        → Path([*, error])              `error` on any direct sub-namespace
//! ```
//!
//! Name and predicate matchers only see events from descendant emitters when
//! the listener was registered with `match_nested`. Path matchers already
//! encode the depth they target.

use std::fmt;
use std::sync::Arc;

use super::event::EventMeta;

/// A single segment in a matcher pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Matches exactly the given string.
    Exact(String),
    /// Matches any single segment.
    Wildcard,
}

impl Segment {
    fn parse(raw: &str) -> Self {
        if raw == "*" {
            Self::Wildcard
        } else {
            Self::Exact(raw.to_string())
        }
    }

    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Exact(s) => s == value,
            Self::Wildcard => true,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(s) => f.write_str(s),
            Self::Wildcard => f.write_str("*"),
        }
    }
}

pub type EventPredicate = Arc<dyn Fn(&EventMeta) -> bool + Send + Sync>;

/// Decides which events a listener receives
#[derive(Clone)]
pub enum Matcher {
    /// Match on the event name
    Name(Segment),
    /// Match the event path relative to the listener's emitter
    Path(Vec<Segment>),
    /// Arbitrary test over the event metadata
    Predicate(EventPredicate),
}

impl Matcher {
    /// Parse a pattern string. Dotted patterns become relative path matchers.
    pub fn parse(pattern: &str) -> Self {
        let segments: Vec<Segment> = pattern.split('.').map(Segment::parse).collect();
        if segments.len() == 1 {
            Self::Name(segments.into_iter().next().unwrap_or(Segment::Wildcard))
        } else {
            Self::Path(segments)
        }
    }

    pub fn any() -> Self {
        Self::Name(Segment::Wildcard)
    }

    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(&EventMeta) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(predicate))
    }

    /// `relative` is the event path below the listener's namespace, `depth`
    /// the number of emitter hops between origin and listener.
    pub(crate) fn matches(
        &self,
        meta: &EventMeta,
        relative: &[&str],
        depth: usize,
        match_nested: bool,
    ) -> bool {
        match self {
            Self::Name(segment) => (depth == 0 || match_nested) && segment.matches(&meta.name),
            Self::Predicate(predicate) => (depth == 0 || match_nested) && predicate(meta),
            Self::Path(segments) => {
                segments.len() == relative.len()
                    && segments
                        .iter()
                        .zip(relative)
                        .all(|(segment, value)| segment.matches(value))
            }
        }
    }
}

impl From<&str> for Matcher {
    fn from(pattern: &str) -> Self {
        Self::parse(pattern)
    }
}

impl From<String> for Matcher {
    fn from(pattern: String) -> Self {
        Self::parse(&pattern)
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(segment) => write!(f, "Name({segment})"),
            Self::Path(segments) => {
                let joined: Vec<String> = segments.iter().map(ToString::to_string).collect();
                write!(f, "Path({})", joined.join("."))
            }
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}
