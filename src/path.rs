//! Member paths: the `/`-joined address of one archive member.
//!
//! A path's first segment is the sample's index within its shard, followed by
//! one segment per container on the way down to the member: the field name for
//! a struct, the element index for a sequence.

use std::fmt;
use std::str::FromStr;

use crate::error::{ShardError, ShardResult};

pub const SEPARATOR: char = '/';

/// One step of a [`MemberPath`].
///
/// Indices order numerically and sort before field names, so sorting paths
/// puts `"9"` before `"10"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Segment {
    Index(usize),
    Field(String),
}

impl Segment {
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Segment::Index(i) => Some(*i),
            Segment::Field(_) => None,
        }
    }

    /// Parse one segment. Canonical decimal numbers (no sign, no leading
    /// zeros) are indices; anything else is a field name.
    pub fn parse(s: &str) -> ShardResult<Segment> {
        if s.is_empty() {
            return Err(ShardError::Codec("empty member path segment".into()));
        }
        if is_index_token(s) {
            let i = s
                .parse::<usize>()
                .map_err(|e| ShardError::Codec(format!("invalid index segment {s}: {e}")))?;
            return Ok(Segment::Index(i));
        }
        Ok(Segment::Field(s.to_string()))
    }
}

fn is_index_token(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit()) && (s == "0" || !s.starts_with('0'))
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Index(i) => write!(f, "{i}"),
            Segment::Field(name) => f.write_str(name),
        }
    }
}

/// A deterministic, structurally ordered member address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MemberPath(Vec<Segment>);

impl MemberPath {
    /// The root path of sample `index` within its shard.
    pub fn sample(index: usize) -> Self {
        MemberPath(vec![Segment::Index(index)])
    }

    pub fn child(&self, segment: Segment) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        MemberPath(segments)
    }

    pub fn field(&self, name: &str) -> Self {
        self.child(Segment::Field(name.to_string()))
    }

    pub fn index(&self, i: usize) -> Self {
        self.child(Segment::Index(i))
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Index of the owning sample within its shard.
    pub fn sample_index(&self) -> Option<usize> {
        self.0.first().and_then(Segment::as_index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for MemberPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "{SEPARATOR}")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for MemberPath {
    type Err = ShardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(SEPARATOR)
            .map(Segment::parse)
            .collect::<ShardResult<Vec<_>>>()
            .map(MemberPath)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_roundtrips_through_parse() {
        let path = MemberPath::sample(3).field("b").index(10).field("text");
        assert_eq!(path.to_string(), "3/b/10/text");
        assert_eq!("3/b/10/text".parse::<MemberPath>().unwrap(), path);
        assert_eq!(path.sample_index(), Some(3));
    }

    #[test]
    fn indices_sort_numerically() {
        let mut paths: Vec<MemberPath> = ["0/b/10", "0/b/2", "0/b/9", "0/b/1"]
            .iter()
            .map(|p| p.parse().unwrap())
            .collect();
        paths.sort();
        let rendered: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        assert_eq!(rendered, vec!["0/b/1", "0/b/2", "0/b/9", "0/b/10"]);
    }

    #[test]
    fn leading_zero_is_not_an_index() {
        assert_eq!(Segment::parse("01").unwrap(), Segment::Field("01".into()));
        assert_eq!(Segment::parse("0").unwrap(), Segment::Index(0));
    }

    #[test]
    fn empty_segments_are_rejected() {
        assert!("0//a".parse::<MemberPath>().is_err());
        assert!("".parse::<MemberPath>().is_err());
    }
}
