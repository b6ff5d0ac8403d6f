//! Property paths, parsed once at subscription time.
use super::error::ArrayError;
use bevy_platform::prelude::*;
use core::{fmt, str::FromStr};

/// Synthetic key under which membership changes of an array are published.
pub const EACH_KEY: &str = "@each";

/// What the last resolved hop of a [`PropertyPath`] observes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathKind {
    /// A single named property, e.g. `length`, `[]` or `desc`.
    Plain(String),
    /// `@each`: membership changes of an array.
    Each,
    /// `@each.<key>`: membership changes of an array or changes of `<key>` on any element.
    EachProperty(String),
}

/// A parsed property path such as `resources.@each.common`.
///
/// `chain` holds the plain hops walked before the tail `kind` is resolved; when any of them
/// changes, the observers registered further along the path are re-linked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyPath {
    #[allow(missing_docs)]
    pub chain: Vec<String>,
    #[allow(missing_docs)]
    pub kind: PathKind,
}

impl PropertyPath {
    /// Parses a dotted path.
    pub fn parse(path: &str) -> Result<Self, ArrayError> {
        let invalid = |reason| ArrayError::InvalidPath {
            path: path.into(),
            reason,
        };
        let segments = path.split('.').collect::<Vec<_>>();
        if segments.iter().any(|segment| segment.is_empty()) {
            return Err(invalid("empty segment"));
        }
        match segments.iter().position(|segment| *segment == EACH_KEY) {
            Some(at) => {
                let chain = segments[..at].iter().map(|segment| String::from(*segment)).collect();
                let kind = match &segments[at + 1..] {
                    [] => PathKind::Each,
                    [key] if *key != EACH_KEY => PathKind::EachProperty((*key).into()),
                    [_] => return Err(invalid("nested @each")),
                    _ => return Err(invalid("@each must be followed by at most one key")),
                };
                Ok(Self { chain, kind })
            }
            None => {
                let (key, chain) = segments.split_last().ok_or_else(|| invalid("empty path"))?;
                Ok(Self {
                    chain: chain.iter().map(|segment| String::from(*segment)).collect(),
                    kind: PathKind::Plain((*key).into()),
                })
            }
        }
    }

    /// Returns the path with its first chain hop removed, if any.
    pub fn rest(&self) -> Option<Self> {
        self.chain.split_first().map(|(_, chain)| Self {
            chain: chain.to_vec(),
            kind: self.kind.clone(),
        })
    }
}

impl FromStr for PropertyPath {
    type Err = ArrayError;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        Self::parse(path)
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for hop in &self.chain {
            write!(f, "{hop}.")?;
        }
        match &self.kind {
            PathKind::Plain(key) => f.write_str(key),
            PathKind::Each => f.write_str(EACH_KEY),
            PathKind::EachProperty(key) => write!(f, "{EACH_KEY}.{key}"),
        }
    }
}
