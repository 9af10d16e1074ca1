//! Annotation metadata: one record per parsed annotation, keyed by the host node it is attached
//! to.

use rustc_hash::FxHashMap;
use scribe_spec_lang::{AnnotationType, SNode, SNodeKind, SrcRange};

use crate::{
    ast::{NodeId, NodeKind, SolAst},
    error::{InstrumentationError, Result},
};

#[derive(Clone, Debug, PartialEq)]
pub struct AnnotationMetaData {
    /// Unique within one compilation; also the id encoded in failure reports.
    pub id: usize,
    pub kind: AnnotationType,
    /// Contract, function or statement the annotation is attached to.
    pub target: NodeId,
    pub message: String,
    pub parsed: SNode,
    /// Verbatim annotation text, for diagnostics.
    pub original: String,
}

/// The kind of an annotation root, or `None` for a plain expression.
pub fn annotation_kind(node: &SNode) -> Option<AnnotationType> {
    match &node.kind {
        SNodeKind::Property { kind, .. } => Some(*kind),
        SNodeKind::LetAnnotation { .. } => Some(AnnotationType::LetAnnotation),
        SNodeKind::UserFunctionDefinition { .. } => Some(AnnotationType::UserFunctionDefinition),
        _ => None,
    }
}

impl AnnotationMetaData {
    pub fn is_property(&self) -> bool {
        self.kind.is_property()
    }

    /// Range of the whole annotation in the original sources.
    pub fn annotation_range(&self) -> Result<SrcRange> {
        Ok(self.parsed.required_range()?)
    }

    /// Range of the bare predicate (or bound expression, or function body).
    pub fn expression_range(&self) -> Result<SrcRange> {
        let expr = self.parsed.annotation_expr().ok_or_else(|| {
            InstrumentationError::Internal(format!("annotation {} has no expression", self.id))
        })?;
        Ok(expr.required_range()?)
    }

    /// The text that failure reports carry: the user message, or the annotation itself.
    pub fn report_message(&self) -> &str {
        if self.message.is_empty() {
            &self.original
        } else {
            &self.message
        }
    }
}

/// All annotations of a compilation, in id order.
#[derive(Clone, Debug, Default)]
pub struct Annotations {
    all: Vec<AnnotationMetaData>,
    by_target: FxHashMap<NodeId, Vec<usize>>,
}

impl Annotations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an annotation attached to `target`, assigning it the next id.
    pub fn push(
        &mut self,
        target: NodeId,
        parsed: SNode,
        original: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<usize> {
        let kind = annotation_kind(&parsed).ok_or_else(|| {
            InstrumentationError::Internal(format!("{} is not an annotation", parsed.id))
        })?;
        let id = self.all.len();
        self.all.push(AnnotationMetaData {
            id,
            kind,
            target,
            message: message.into(),
            parsed,
            original: original.into(),
        });
        self.by_target.entry(target).or_default().push(id);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnnotationMetaData> {
        self.all.iter()
    }

    pub fn get(&self, id: usize) -> Option<&AnnotationMetaData> {
        self.all.get(id)
    }

    /// Annotations attached to `target`, in id order.
    pub fn of(&self, target: NodeId) -> Vec<&AnnotationMetaData> {
        self.by_target
            .get(&target)
            .map(|ids| ids.iter().filter_map(|id| self.all.get(*id)).collect())
            .unwrap_or_default()
    }

    pub fn of_kind(&self, target: NodeId, kind: AnnotationType) -> Vec<&AnnotationMetaData> {
        self.of(target).into_iter().filter(|annot| annot.kind == kind).collect()
    }

    pub fn has_any(&self, target: NodeId) -> bool {
        self.by_target.get(&target).is_some_and(|ids| !ids.is_empty())
    }

    /// Targets that are statements, in id order of their first annotation.
    pub fn statement_targets(&self, ast: &SolAst) -> Vec<NodeId> {
        let mut seen = vec![];
        for annot in &self.all {
            if !seen.contains(&annot.target) &&
                ast.kind(annot.target).is_ok_and(NodeKind::is_statement)
            {
                seen.push(annot.target);
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use scribe_spec_lang::{BinaryOp, IdAllocator, NodeBuilder};

    use super::*;

    #[test]
    fn test_ids_and_grouping() {
        let mut ast = SolAst::new();
        let f = ast.make_break();
        let g = ast.make_continue();

        let mut ids = IdAllocator::new();
        let mut b = NodeBuilder::new(&mut ids);
        let mut annots = Annotations::new();
        for target in [f, g, f] {
            let x = b.id("x");
            let zero = b.number(0);
            let pred = b.binary(x, BinaryOp::Gt, zero);
            let prop = b.property(AnnotationType::Assert, pred);
            annots.push(target, prop, "#assert x > 0;", "").unwrap();
        }

        assert_eq!(annots.of(f).iter().map(|a| a.id).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(annots.statement_targets(&ast), vec![f, g]);
        assert_eq!(annots.get(1).unwrap().report_message(), "#assert x > 0;");

        let plain = b.id("x");
        assert!(annots.push(f, plain, "x", "").is_err());
    }
}
