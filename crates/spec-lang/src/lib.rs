//! # scribe-spec-lang
//!
//! The annotation (specification) language: source locations, node identities, types, and the
//! AST handed to the instrumenter by the annotation parser.

pub mod ast;
pub mod location;
pub mod types;

pub use ast::{BinaryOp, IdAllocator, NodeBuilder, SNode, SNodeId, SNodeKind, UnaryOp};
pub use location::{NodeLocation, SrcRange};
pub use types::{DataLocation, SType};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The variant of a parsed annotation.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
pub enum AnnotationType {
    #[strum(serialize = "require")]
    Require,
    #[strum(serialize = "try")]
    Try,
    #[strum(serialize = "assert")]
    Assert,
    #[strum(serialize = "if_succeeds")]
    IfSucceeds,
    #[strum(serialize = "let")]
    LetAnnotation,
    #[strum(serialize = "invariant")]
    Invariant,
    #[strum(serialize = "define")]
    UserFunctionDefinition,
}

impl AnnotationType {
    /// Everything but user-function definitions is a property, i.e. is compiled into code at a
    /// particular instrumentation site.
    pub fn is_property(&self) -> bool {
        !matches!(self, Self::UserFunctionDefinition)
    }

    /// Annotations evaluated before the annotated statement runs.
    pub fn is_single_point(&self) -> bool {
        matches!(self, Self::Assert | Self::Try | Self::Require | Self::LetAnnotation)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("missing source information for node {0}")]
    MissingLocation(SNodeId),
    #[error("malformed source range `{0}`")]
    MalformedRange(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotation_type_keywords() {
        assert_eq!(AnnotationType::IfSucceeds.to_string(), "if_succeeds");
        assert_eq!("invariant".parse::<AnnotationType>().unwrap(), AnnotationType::Invariant);
        assert!(!AnnotationType::UserFunctionDefinition.is_property());
        assert!(AnnotationType::LetAnnotation.is_single_point());
        assert!(!AnnotationType::IfSucceeds.is_single_point());
    }
}
