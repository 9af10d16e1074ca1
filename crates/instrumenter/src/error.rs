use scribe_spec_lang::{SpecError, SrcRange};
use thiserror::Error;

use crate::ast::{NodeId, SolAst};

pub type Result<T, E = InstrumentationError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum InstrumentationError {
    /// A valid host-language construct that we do not know how to instrument.
    #[error("unsupported construct at {location}: {msg}")]
    Unsupported { msg: String, node: NodeId, range: Option<SrcRange>, location: String },

    /// One of the engine's own preconditions does not hold. This is a bug in the instrumenter.
    #[error("internal error: {0}")]
    Internal(String),

    /// Marker mode encodes property ids in 12 bits.
    #[error("can't instrument more than {limit} properties in mstore mode (property id {id})")]
    PropertyCapacity { id: usize, limit: usize },

    /// A compiler AST node that has no counterpart in the arena.
    #[error("cannot load {what} at {location}")]
    Unloadable { what: String, location: String },

    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("invalid instrumentation config: {0}")]
    Config(#[from] toml::de::Error),
}

impl InstrumentationError {
    /// Report `node` as unsupported, resolving it to the closest original source range.
    pub fn unsupported(ast: &SolAst, node: NodeId, msg: impl Into<String>) -> Self {
        let range = ast.closest_src(node);
        let location = match range {
            Some(range) => match ast.unit_path(node) {
                Some(path) => format!("{path}:{range}"),
                None => range.to_string(),
            },
            None => "<unknown>".to_string(),
        };
        Self::Unsupported { msg: msg.into(), node, range, location }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

/// Bail out with an [`InstrumentationError::Internal`] if the condition does not hold.
#[macro_export]
macro_rules! internal_ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::InstrumentationError::Internal(format!($($arg)+)));
        }
    };
}

/// Return the only element of `items`, or an internal error mentioning `what`.
pub fn single<T>(items: impl IntoIterator<Item = T>, what: &str) -> Result<T> {
    let mut iter = items.into_iter();
    match (iter.next(), iter.next()) {
        (Some(item), None) => Ok(item),
        (None, _) => Err(InstrumentationError::Internal(format!("expected single {what}, got none"))),
        (Some(_), Some(_)) => {
            Err(InstrumentationError::Internal(format!("expected single {what}, got several")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single() {
        assert_eq!(single(vec![3], "item").unwrap(), 3);
        assert!(matches!(single(Vec::<u8>::new(), "item"), Err(InstrumentationError::Internal(_))));
        assert!(matches!(single(vec![1, 2], "item"), Err(InstrumentationError::Internal(_))));
    }
}
