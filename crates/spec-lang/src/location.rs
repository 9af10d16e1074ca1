//! Source ranges and node locations.
//!
//! A range is the solc-style `offset:length:fileIndex` triple, with offsets and lengths in bytes.
//! Annotation nodes either point straight into the user's file, or, when they were instantiated
//! from a macro, carry two ranges: one inside the macro definition and one at the invocation site.

use std::{fmt, str::FromStr};

use foundry_compilers::artifacts::ast::SourceLocation;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::SpecError;

/// A byte range inside one source file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SrcRange {
    pub offset: usize,
    pub length: usize,
    pub file_index: usize,
}

impl SrcRange {
    pub fn new(offset: usize, length: usize, file_index: usize) -> Self {
        Self { offset, length, file_index }
    }

    /// One past the last byte of the range.
    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    pub fn contains(&self, other: &Self) -> bool {
        self.file_index == other.file_index &&
            self.offset <= other.offset &&
            self.end() >= other.end()
    }

    /// Slice the range out of `source`. Returns `None` if the range is out of bounds or does not
    /// fall on character boundaries.
    pub fn fragment<'a>(&self, source: &'a str) -> Option<&'a str> {
        source.get(self.offset..self.end())
    }
}

impl fmt::Display for SrcRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.offset, self.length, self.file_index)
    }
}

impl TryFrom<&SourceLocation> for SrcRange {
    type Error = SpecError;

    /// solc reports unknown parts as `-1`, which have no range.
    fn try_from(src: &SourceLocation) -> Result<Self, Self::Error> {
        let malformed = || SpecError::MalformedRange(src.to_string());
        let offset = src.start.ok_or_else(malformed)?;
        let length = src.length.ok_or_else(malformed)?;
        let file_index = src.index.ok_or_else(malformed)?;
        Ok(Self::new(offset, length, file_index))
    }
}

impl FromStr for SrcRange {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.split(':').count() != 3 {
            return Err(SpecError::MalformedRange(s.to_string()));
        }
        let loc: SourceLocation =
            s.parse().map_err(|_| SpecError::MalformedRange(s.to_string()))?;
        Self::try_from(&loc)
    }
}

impl Serialize for SrcRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SrcRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Where an annotation-language node came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeLocation {
    /// The annotation was written directly in the source file.
    Direct(SrcRange),

    /// The annotation was instantiated from a macro. The first range locates the node inside the
    /// macro definition, the second one locates the macro invocation in the user's file.
    MacroInstantiated(SrcRange, SrcRange),
}

impl NodeLocation {
    /// The range every location consumer should operate on.
    pub fn primary(&self) -> SrcRange {
        match self {
            Self::Direct(range) | Self::MacroInstantiated(range, _) => *range,
        }
    }

    /// The macro invocation site, if this node was instantiated from a macro.
    pub fn invocation(&self) -> Option<SrcRange> {
        match self {
            Self::Direct(_) => None,
            Self::MacroInstantiated(_, site) => Some(*site),
        }
    }

    pub fn is_macro(&self) -> bool {
        matches!(self, Self::MacroInstantiated(..))
    }
}

impl From<SrcRange> for NodeLocation {
    fn from(range: SrcRange) -> Self {
        Self::Direct(range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_src_triple() {
        let range: SrcRange = "12:34:1".parse().unwrap();
        assert_eq!(range, SrcRange::new(12, 34, 1));
        assert_eq!(range.to_string(), "12:34:1");
        assert_eq!(range.end(), 46);

        assert!("12:34".parse::<SrcRange>().is_err());
        assert!("a:1:0".parse::<SrcRange>().is_err());
        assert!("1:2:3:4".parse::<SrcRange>().is_err());
        assert!("-1:-1:-1".parse::<SrcRange>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let range = SrcRange::new(5, 3, 0);
        let json = serde_json::to_string(&range).unwrap();
        assert_eq!(json, "\"5:3:0\"");
        let back: SrcRange = serde_json::from_str(&json).unwrap();
        assert_eq!(back, range);
    }

    #[test]
    fn test_primary_range_of_macro_location() {
        let in_macro = SrcRange::new(100, 10, 1);
        let site = SrcRange::new(7, 20, 0);

        let direct = NodeLocation::from(site);
        assert_eq!(direct.primary(), site);
        assert_eq!(direct.invocation(), None);

        let instantiated = NodeLocation::MacroInstantiated(in_macro, site);
        assert_eq!(instantiated.primary(), in_macro);
        assert_eq!(instantiated.invocation(), Some(site));
        assert!(instantiated.is_macro());
    }

    #[test]
    fn test_fragment() {
        let source = "contract C { uint x; }";
        assert_eq!(SrcRange::new(9, 1, 0).fragment(source), Some("C"));
        assert_eq!(SrcRange::new(20, 10, 0).fragment(source), None);
    }
}
